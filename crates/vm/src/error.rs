//! Runtime errors for the Tarn VM.
//!
//! Every fatal condition the evaluator can hit is a variant here; there is
//! no retry or degraded mode. Each variant carries `at`, the code offset of
//! the instruction that failed. A pattern-match failure is *not* an error —
//! it is an [`Outcome`](crate::Outcome).

use tarn_common::{DecodeError, Space};
use thiserror::Error;

/// Coarse classification of a [`VmError`], for drivers and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Unrecognized opcode or malformed operand stream.
    Decode,
    /// An operation received a value of the wrong kind after dereferencing.
    Type,
    /// An index outside its space, or a stack/frame depth violation.
    Bounds,
    /// Division or modulo by zero.
    Arithmetic,
    /// The host failed to produce an input integer.
    Input,
}

/// Errors that abort program execution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VmError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// A jump or call target outside the code section.
    #[error("jump target {target:#06x} out of range at {at:#06x}")]
    JumpOutOfRange { at: usize, target: usize },

    /// A call transferred to code that does not start with a prologue.
    #[error("call target {target:#06x} is not a function prologue at {at:#06x}")]
    BadCallTarget { at: usize, target: usize },

    /// BEGIN consumed a nonzero capture-count marker.
    #[error("plain prologue with {count} captures at {at:#06x}")]
    UnexpectedCaptures { at: usize, count: i64 },

    /// A string operand pointing outside the string table.
    #[error("string offset {offset} not in string table at {at:#06x}")]
    BadStringOffset { at: usize, offset: u32 },

    /// An operation received the wrong kind of value (after dereferencing).
    #[error("expected {expected}, found {found} at {at:#06x}")]
    TypeMismatch {
        at: usize,
        expected: &'static str,
        found: &'static str,
    },

    /// A location index outside its space's declared size.
    #[error("{space}({index}) out of range ({count} declared) at {at:#06x}")]
    LocationOutOfRange {
        at: usize,
        space: Space,
        index: u32,
        count: usize,
    },

    /// A pop or peek reaching below the active frame's base.
    #[error("stack underflow at {at:#06x}")]
    StackUnderflow { at: usize },

    /// A function epilogue with anything but exactly one result slot.
    #[error("epilogue with {depth} values above the frame (expected 1) at {at:#06x}")]
    UnbalancedReturn { at: usize, depth: usize },

    /// An epilogue with no caller frame to return to.
    #[error("epilogue without a caller at {at:#06x}")]
    CallStackUnderflow { at: usize },

    /// An aggregate element index outside the aggregate.
    #[error("element index {index} out of bounds (length {len}) at {at:#06x}")]
    IndexOutOfBounds { at: usize, index: i64, len: usize },

    /// A reference to a stack slot that no longer exists.
    #[error("reference to dead stack slot {index} at {at:#06x}")]
    StaleReference { at: usize, index: usize },

    #[error("division by zero at {at:#06x}")]
    DivisionByZero { at: usize },

    /// The host could not produce an integer for READ.
    #[error("input failed at {at:#06x}: {message}")]
    Input { at: usize, message: String },
}

impl VmError {
    /// Which class of the error taxonomy this variant belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            VmError::Decode(_)
            | VmError::JumpOutOfRange { .. }
            | VmError::BadCallTarget { .. }
            | VmError::UnexpectedCaptures { .. }
            | VmError::BadStringOffset { .. } => ErrorKind::Decode,
            VmError::TypeMismatch { .. } => ErrorKind::Type,
            VmError::LocationOutOfRange { .. }
            | VmError::StackUnderflow { .. }
            | VmError::UnbalancedReturn { .. }
            | VmError::CallStackUnderflow { .. }
            | VmError::IndexOutOfBounds { .. }
            | VmError::StaleReference { .. } => ErrorKind::Bounds,
            VmError::DivisionByZero { .. } => ErrorKind::Arithmetic,
            VmError::Input { .. } => ErrorKind::Input,
        }
    }
}
