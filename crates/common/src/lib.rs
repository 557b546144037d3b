//! Tarn common types: instruction decoding and the bytecode container.
//!
//! This crate provides the foundational pieces shared by the VM, the
//! disassembler and the CLI:
//!
//! - [`Insn`] — the structured instruction, decoded one step at a time from
//!   the nibble-encoded byte stream via [`decode`]
//! - [`BinOp`], [`Space`], [`Location`], [`Pattern`] — operand types
//! - [`Image`] — the unpacked bytecode container (strings, publics, code)
//! - [`CodeBuilder`] — programmatic emitter with label patching
//! - [`LoadError`] / [`DecodeError`] — typed failures for both layers
//!
//! The crate uses `thiserror` and has no other dependencies.

pub mod builder;
pub mod error;
pub mod image;
pub mod insn;

pub use builder::{CodeBuilder, Label};
pub use error::{DecodeError, LoadError};
pub use image::{Image, Public};
pub use insn::{decode, BinOp, Decoded, Insn, Location, Pattern, Space};
