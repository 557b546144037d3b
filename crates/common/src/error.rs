//! Load and decode errors for Tarn bytecode.

use thiserror::Error;

/// Errors detected while unpacking a bytecode container, before execution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    /// The file is shorter than its own header claims.
    #[error("truncated image: need {expected} bytes, found {found}")]
    Truncated { expected: usize, found: usize },

    /// A header word holds a value that cannot describe a section.
    #[error("bad header field {field}: {value}")]
    BadHeader { field: &'static str, value: i32 },
}

/// Errors that occur while decoding the instruction stream.
///
/// Every variant carries `at`, the code offset of the opcode byte.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// No opcode maps to this (category, sub-opcode) pair.
    #[error("unknown opcode {category}-{sub} at {at:#06x}")]
    UnknownOpcode { at: usize, category: u8, sub: u8 },

    /// The instruction stream ended in the middle of an operand.
    #[error("truncated operand at {at:#06x}")]
    Truncated { at: usize },

    /// A location space nibble outside 0..=3.
    #[error("bad location space {value} at {at:#06x}")]
    BadSpace { at: usize, value: u8 },

    /// An index or count operand that must be non-negative is negative.
    #[error("negative operand {value} at {at:#06x}")]
    NegativeOperand { at: usize, value: i32 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_formats() {
        assert_eq!(
            LoadError::Truncated {
                expected: 20,
                found: 7
            }
            .to_string(),
            "truncated image: need 20 bytes, found 7"
        );
        assert_eq!(
            DecodeError::UnknownOpcode {
                at: 0x10,
                category: 1,
                sub: 7
            }
            .to_string(),
            "unknown opcode 1-7 at 0x0010"
        );
        assert_eq!(
            DecodeError::BadSpace { at: 3, value: 9 }.to_string(),
            "bad location space 9 at 0x0003"
        );
    }
}
