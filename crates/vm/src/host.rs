//! The host collaborator: allocation and integer I/O.
//!
//! The machine never owns heap storage or talks to file descriptors
//! directly; both go through a [`Host`] owned by the embedding application.
//! The allocation methods have handle-backed default implementations — a
//! host that wants to account for or intern allocations overrides them. No
//! allocated object is ever moved, so the machine may hold handles across
//! host calls.

use crate::value::Value;
use std::io::{self, BufRead, Write};

pub trait Host {
    fn alloc_string(&mut self, bytes: Vec<u8>) -> Value {
        Value::string(bytes)
    }

    fn alloc_array(&mut self, elems: Vec<Value>) -> Value {
        Value::array(elems)
    }

    fn alloc_sexp(&mut self, tag: Box<str>, fields: Vec<Value>) -> Value {
        Value::sexp(tag, fields)
    }

    fn alloc_closure(&mut self, entry: usize, captures: Vec<Value>) -> Value {
        Value::closure(entry, captures)
    }

    /// One integer from the input stream. Blocks until available.
    fn read_int(&mut self) -> io::Result<i64>;

    /// One integer to the output stream, on its own line.
    fn write_int(&mut self, n: i64) -> io::Result<()>;
}

/// The process host: integers from stdin, one per output line to stdout.
pub struct StdHost {
    input: io::BufReader<io::Stdin>,
}

impl StdHost {
    pub fn new() -> Self {
        Self {
            input: io::BufReader::new(io::stdin()),
        }
    }
}

impl Default for StdHost {
    fn default() -> Self {
        Self::new()
    }
}

impl Host for StdHost {
    fn read_int(&mut self) -> io::Result<i64> {
        read_token_int(&mut self.input)
    }

    fn write_int(&mut self, n: i64) -> io::Result<()> {
        let mut out = io::stdout().lock();
        writeln!(out, "{n}")
    }
}

/// Read the next whitespace-delimited token and parse it as an integer.
pub fn read_token_int<R: BufRead>(input: &mut R) -> io::Result<i64> {
    let mut token = Vec::new();
    loop {
        let (done, consumed) = {
            let buf = input.fill_buf()?;
            if buf.is_empty() {
                (true, 0)
            } else {
                let mut consumed = 0;
                let mut done = false;
                for &b in buf {
                    consumed += 1;
                    if b.is_ascii_whitespace() {
                        if token.is_empty() {
                            continue;
                        }
                        done = true;
                        break;
                    }
                    token.push(b);
                }
                (done, consumed)
            }
        };
        input.consume(consumed);
        if done {
            break;
        }
    }

    if token.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "expected an integer, got end of input",
        ));
    }
    std::str::from_utf8(&token)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("expected an integer, got {:?}", String::from_utf8_lossy(&token)),
            )
        })
}
