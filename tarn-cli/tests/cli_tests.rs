//! Integration tests for the `tarn` binary.
//!
//! These invoke the binary as a subprocess and check exit codes, stdout and
//! stderr. Images are built with `CodeBuilder` and written to temp files.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::PathBuf;
use tarn_common::{BinOp, CodeBuilder, Space};
use tempfile::TempDir;

fn tarn() -> Command {
    Command::cargo_bin("tarn").unwrap()
}

fn write_image(dir: &TempDir, name: &str, b: &mut CodeBuilder) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, b.finish().encode()).unwrap();
    path
}

/// A program that writes 42 and halts.
fn hello_image(b: &mut CodeBuilder) {
    b.begin(0, 0);
    b.const_num(42);
    b.write();
    b.drop_top();
    b.const_num(0);
    b.end();
    b.stop();
}

// ---- Usage ----

#[test]
fn no_args_prints_usage_and_exits_1() {
    tarn()
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("Usage: tarn"));
}

#[test]
fn help_flag_exits_0() {
    tarn()
        .arg("--help")
        .assert()
        .success()
        .stderr(predicate::str::contains("Commands:"));
}

#[test]
fn run_without_file_exits_1() {
    tarn()
        .arg("run")
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("requires an input file"));
}

// ---- Run ----

#[test]
fn run_executes_an_image() {
    let dir = TempDir::new().unwrap();
    let mut b = CodeBuilder::new();
    hello_image(&mut b);
    let path = write_image(&dir, "hello.tbc", &mut b);

    tarn()
        .args(["run", path.to_str().unwrap()])
        .assert()
        .success()
        .stdout("42\n");
}

#[test]
fn bare_positional_runs_the_file() {
    let dir = TempDir::new().unwrap();
    let mut b = CodeBuilder::new();
    hello_image(&mut b);
    let path = write_image(&dir, "hello.tbc", &mut b);

    tarn()
        .arg(path.to_str().unwrap())
        .assert()
        .success()
        .stdout("42\n");
}

#[test]
fn run_reads_integers_from_stdin() {
    let dir = TempDir::new().unwrap();
    let mut b = CodeBuilder::new();
    b.begin(0, 0);
    b.read();
    b.read();
    b.binop(BinOp::Add);
    b.write();
    b.drop_top();
    b.const_num(0);
    b.end();
    b.stop();
    let path = write_image(&dir, "sum.tbc", &mut b);

    tarn()
        .args(["run", path.to_str().unwrap()])
        .write_stdin("30\n12\n")
        .assert()
        .success()
        .stdout("42\n");
}

// ---- Exit code contract ----

#[test]
fn match_failure_is_a_clean_exit_with_diagnostic() {
    let dir = TempDir::new().unwrap();
    let mut b = CodeBuilder::new();
    b.begin(0, 0);
    b.const_num(1);
    b.sexp("Boom", 1);
    b.fail(12, 3);
    b.end();
    b.stop();
    let path = write_image(&dir, "boom.tbc", &mut b);

    tarn()
        .args(["run", path.to_str().unwrap()])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("match failure at")
                .and(predicate::str::contains(":12:3"))
                .and(predicate::str::contains("'Boom (1)'")),
        );
}

#[test]
fn runtime_error_exits_2() {
    let dir = TempDir::new().unwrap();
    let mut b = CodeBuilder::new();
    b.begin(0, 0);
    b.const_num(1);
    b.const_num(0);
    b.binop(BinOp::Div);
    b.end();
    b.stop();
    let path = write_image(&dir, "div0.tbc", &mut b);

    tarn()
        .args(["run", path.to_str().unwrap()])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("division by zero"));
}

#[test]
fn decode_error_exits_2() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bad.tbc");
    // Valid container, bogus opcode 0x17 in the code section.
    let image = tarn_common::Image::from_parts(0, vec![], vec![], vec![0x17]);
    fs::write(&path, image.encode()).unwrap();

    tarn()
        .args(["run", path.to_str().unwrap()])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("unknown opcode"));
}

#[test]
fn truncated_container_exits_1() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("short.tbc");
    fs::write(&path, [0u8; 5]).unwrap();

    tarn()
        .args(["run", path.to_str().unwrap()])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("truncated image"));
}

#[test]
fn missing_file_exits_1() {
    tarn()
        .args(["run", "/no/such/file.tbc"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("cannot read"));
}

// ---- Dump ----

#[test]
fn dump_prints_the_listing() {
    let dir = TempDir::new().unwrap();
    let mut b = CodeBuilder::new();
    let main = b.label();
    b.bind(main);
    b.public("main", main);
    b.begin(0, 1);
    b.const_num(42);
    b.st(Space::Local, 0);
    b.drop_top();
    b.const_num(0);
    b.end();
    b.stop();
    let path = write_image(&dir, "prog.tbc", &mut b);

    tarn()
        .args(["dump", path.to_str().unwrap()])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("public main -> 0x0000")
                .and(predicate::str::contains("BEGIN 0 1"))
                .and(predicate::str::contains("CONST 42"))
                .and(predicate::str::contains("ST L(0)"))
                .and(predicate::str::contains("STOP")),
        );
}

#[test]
fn dump_without_file_exits_1() {
    tarn()
        .arg("dump")
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("requires an input file"));
}
