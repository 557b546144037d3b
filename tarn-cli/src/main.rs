//! Tarn CLI — execute and inspect bytecode images.
//!
//! Exit codes:
//! - 0: Normal halt, or a pattern-match failure (a language-level outcome)
//! - 1: Usage or load error
//! - 2: Runtime error

mod commands;

use std::process;

fn main() {
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    let result = match args[1].as_str() {
        "run" => commands::run(&args[2..]),
        "dump" => commands::dump(&args[2..]),
        "--help" | "-h" | "help" => {
            print_usage();
            process::exit(0);
        }
        // Bare positional: `tarn program.tbc` executes the file.
        _ => commands::run(&args[1..]),
    };

    if let Err(code) = result {
        process::exit(code);
    }
}

fn print_usage() {
    eprintln!("Usage: tarn [command] <file>");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  run <input.tbc>    Execute a bytecode image (default)");
    eprintln!("  dump <input.tbc>   Print the image's listing");
}
