//! Tarn virtual machine — executes bytecode images.
//!
//! The VM is a stack machine with:
//! - An operand stack shared by all frames, addressed by offset
//! - A call-frame stack; each frame sees its arguments, captures and locals
//!   through the four-space location resolver
//! - A global area sized by the image header
//! - A [`Host`] collaborator owning allocation and integer I/O
//!
//! # Usage
//!
//! ```
//! use tarn_common::CodeBuilder;
//! use tarn_vm::{run, Outcome, StdHost};
//!
//! let mut b = CodeBuilder::new();
//! b.begin(0, 0);
//! b.const_num(0);
//! b.end();
//! b.stop();
//! let image = b.finish();
//!
//! let mut host = StdHost::new();
//! assert_eq!(run(&image, &mut host).unwrap(), Outcome::Halted);
//! ```

pub mod error;
pub mod execute;
pub mod host;
pub mod machine;
pub mod value;

pub use error::{ErrorKind, VmError};
pub use host::{Host, StdHost};
pub use machine::Machine;
pub use value::{Place, Value};

use tarn_common::Image;

/// How a program run ended, short of a fatal error.
///
/// A pattern-match failure is a language-level outcome, not a bug: the
/// evaluator hands it to the driver instead of terminating the process, and
/// the driver reports it and exits cleanly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// STOP was executed, or the entry function returned.
    Halted,
    /// The FAIL opcode fired: no pattern matched `value` at the source
    /// coordinates.
    MatchFailure { value: String, line: u32, col: u32 },
}

/// Execute an image against a host, from code offset 0 until it halts.
///
/// # Errors
///
/// Returns [`VmError`] on any fatal condition: malformed instruction
/// streams, kind mismatches, index or depth violations, zero division, or a
/// failed read. All are unrecoverable; the machine state is not reusable
/// afterwards.
pub fn run(image: &Image, host: &mut dyn Host) -> Result<Outcome, VmError> {
    let mut machine = Machine::new(image, host);
    machine.run()
}
