//! CLI command implementations.

use std::fs;
use tarn_common::Image;
use tarn_vm::{Outcome, StdHost};

fn load(path: &str) -> Result<Image, i32> {
    let bytes = fs::read(path).map_err(|e| {
        eprintln!("error: cannot read '{path}': {e}");
        1
    })?;
    Image::from_bytes(&bytes).map_err(|e| {
        eprintln!("error: {e}");
        1
    })
}

/// Execute a bytecode image.
pub fn run(args: &[String]) -> Result<(), i32> {
    if args.is_empty() {
        eprintln!("error: run requires an input file");
        eprintln!("Usage: tarn run <input.tbc>");
        return Err(1);
    }

    let input = &args[0];
    let image = load(input)?;
    let mut host = StdHost::new();

    match tarn_vm::run(&image, &mut host) {
        Ok(Outcome::Halted) => Ok(()),
        Ok(Outcome::MatchFailure { value, line, col }) => {
            // An expected, language-level outcome: diagnostic on stdout,
            // clean exit.
            println!("*** FAILURE: match failure at {input}:{line}:{col}, value '{value}'");
            Ok(())
        }
        Err(e) => {
            eprintln!("runtime error: {e}");
            Err(2)
        }
    }
}

/// Print the listing of a bytecode image.
pub fn dump(args: &[String]) -> Result<(), i32> {
    if args.is_empty() {
        eprintln!("error: dump requires an input file");
        eprintln!("Usage: tarn dump <input.tbc>");
        return Err(1);
    }

    let image = load(&args[0])?;
    print!("{}", tarn_disasm::dump(&image));
    Ok(())
}
