//! Programmatic bytecode emitter.
//!
//! `CodeBuilder` is how tests and tooling construct images: one method per
//! instruction, an interning string table, and forward labels for jump and
//! call targets that are patched when the builder finishes.
//!
//! ```
//! use tarn_common::CodeBuilder;
//!
//! let mut b = CodeBuilder::new();
//! b.begin(0, 0);
//! b.const_num(42);
//! b.write();
//! b.drop_top();
//! b.const_num(0);
//! b.end();
//! b.stop();
//! let image = b.finish();
//! assert!(!image.code().is_empty());
//! ```

use crate::image::{Image, Public};
use crate::insn::{BinOp, Pattern, Space};
use std::collections::HashMap;

/// A code position that may be referenced before it is bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(usize);

/// Emits code, strings and publics; `finish` packs them into an [`Image`].
#[derive(Debug, Default)]
pub struct CodeBuilder {
    code: Vec<u8>,
    strings: Vec<u8>,
    interned: HashMap<Vec<u8>, u32>,
    bound: Vec<Option<u32>>,
    patches: Vec<(usize, Label)>,
    publics: Vec<(u32, Label)>,
    globals: usize,
}

impl CodeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare the global-area size in words.
    pub fn globals(&mut self, count: usize) -> &mut Self {
        self.globals = count;
        self
    }

    /// Create a fresh, unbound label.
    pub fn label(&mut self) -> Label {
        self.bound.push(None);
        Label(self.bound.len() - 1)
    }

    /// Bind `label` to the current code offset.
    pub fn bind(&mut self, label: Label) -> &mut Self {
        self.bound[label.0] = Some(self.code.len() as u32);
        self
    }

    /// Export the current offset of `label` under `name`.
    pub fn public(&mut self, name: &str, label: Label) -> &mut Self {
        let name = self.intern(name.as_bytes());
        self.publics.push((name, label));
        self
    }

    fn intern(&mut self, s: &[u8]) -> u32 {
        if let Some(&off) = self.interned.get(s) {
            return off;
        }
        let off = self.strings.len() as u32;
        self.strings.extend_from_slice(s);
        self.strings.push(0);
        self.interned.insert(s.to_vec(), off);
        off
    }

    fn op(&mut self, category: u8, sub: u8) {
        self.code.push((category << 4) | (sub & 0x0F));
    }

    fn word(&mut self, w: i32) {
        self.code.extend_from_slice(&w.to_le_bytes());
    }

    fn target(&mut self, label: Label) {
        self.patches.push((self.code.len(), label));
        self.word(0);
    }

    pub fn binop(&mut self, op: BinOp) -> &mut Self {
        self.op(0, op as u8);
        self
    }

    pub fn const_num(&mut self, n: i32) -> &mut Self {
        self.op(1, 0);
        self.word(n);
        self
    }

    pub fn string_lit(&mut self, s: &str) -> &mut Self {
        let off = self.intern(s.as_bytes());
        self.op(1, 1);
        self.word(off as i32);
        self
    }

    pub fn sexp(&mut self, tag: &str, arity: u32) -> &mut Self {
        let off = self.intern(tag.as_bytes());
        self.op(1, 2);
        self.word(off as i32);
        self.word(arity as i32);
        self
    }

    pub fn sta(&mut self) -> &mut Self {
        self.op(1, 4);
        self
    }

    pub fn jmp(&mut self, label: Label) -> &mut Self {
        self.op(1, 5);
        self.target(label);
        self
    }

    pub fn end(&mut self) -> &mut Self {
        self.op(1, 6);
        self
    }

    pub fn drop_top(&mut self) -> &mut Self {
        self.op(1, 8);
        self
    }

    pub fn dup(&mut self) -> &mut Self {
        self.op(1, 9);
        self
    }

    pub fn swap(&mut self) -> &mut Self {
        self.op(1, 10);
        self
    }

    pub fn elem(&mut self) -> &mut Self {
        self.op(1, 11);
        self
    }

    pub fn ld(&mut self, space: Space, index: u32) -> &mut Self {
        self.op(2, space as u8);
        self.word(index as i32);
        self
    }

    pub fn lda(&mut self, space: Space, index: u32) -> &mut Self {
        self.op(3, space as u8);
        self.word(index as i32);
        self
    }

    pub fn st(&mut self, space: Space, index: u32) -> &mut Self {
        self.op(4, space as u8);
        self.word(index as i32);
        self
    }

    pub fn cjmp_z(&mut self, label: Label) -> &mut Self {
        self.op(5, 0);
        self.target(label);
        self
    }

    pub fn cjmp_nz(&mut self, label: Label) -> &mut Self {
        self.op(5, 1);
        self.target(label);
        self
    }

    pub fn begin(&mut self, n_args: u32, n_locals: u32) -> &mut Self {
        self.op(5, 2);
        self.word(n_args as i32);
        self.word(n_locals as i32);
        self
    }

    pub fn cbegin(&mut self, n_args: u32, n_locals: u32) -> &mut Self {
        self.op(5, 3);
        self.word(n_args as i32);
        self.word(n_locals as i32);
        self
    }

    pub fn closure(&mut self, entry: Label, captures: &[(Space, u32)]) -> &mut Self {
        self.op(5, 4);
        self.target(entry);
        self.word(captures.len() as i32);
        for &(space, index) in captures {
            self.code.push(space as u8);
            self.word(index as i32);
        }
        self
    }

    pub fn callc(&mut self, n_args: u32) -> &mut Self {
        self.op(5, 5);
        self.word(n_args as i32);
        self
    }

    pub fn call(&mut self, entry: Label, n_args: u32) -> &mut Self {
        self.op(5, 6);
        self.target(entry);
        self.word(n_args as i32);
        self
    }

    pub fn tag(&mut self, name: &str, arity: u32) -> &mut Self {
        let off = self.intern(name.as_bytes());
        self.op(5, 7);
        self.word(off as i32);
        self.word(arity as i32);
        self
    }

    pub fn array_patt(&mut self, len: u32) -> &mut Self {
        self.op(5, 8);
        self.word(len as i32);
        self
    }

    pub fn fail(&mut self, line: u32, col: u32) -> &mut Self {
        self.op(5, 9);
        self.word(line as i32);
        self.word(col as i32);
        self
    }

    pub fn line(&mut self, n: u32) -> &mut Self {
        self.op(5, 10);
        self.word(n as i32);
        self
    }

    pub fn patt(&mut self, p: Pattern) -> &mut Self {
        let sub = match p {
            Pattern::EqString => 0,
            Pattern::IsString => 1,
            Pattern::IsArray => 2,
            Pattern::IsSexp => 3,
            Pattern::IsRef => 4,
            Pattern::IsVal => 5,
            Pattern::IsClosure => 6,
        };
        self.op(6, sub);
        self
    }

    pub fn read(&mut self) -> &mut Self {
        self.op(7, 0);
        self
    }

    pub fn write(&mut self) -> &mut Self {
        self.op(7, 1);
        self
    }

    pub fn length(&mut self) -> &mut Self {
        self.op(7, 2);
        self
    }

    pub fn string_val(&mut self) -> &mut Self {
        self.op(7, 3);
        self
    }

    pub fn mk_array(&mut self, n: u32) -> &mut Self {
        self.op(7, 4);
        self.word(n as i32);
        self
    }

    pub fn stop(&mut self) -> &mut Self {
        self.op(15, 0);
        self
    }

    /// Patch all label references and pack the sections into an image.
    ///
    /// # Panics
    ///
    /// Panics if a referenced or exported label was never bound.
    pub fn finish(&mut self) -> Image {
        for &(pos, label) in &self.patches {
            let offset = self.bound[label.0].expect("jump or call target label never bound");
            self.code[pos..pos + 4].copy_from_slice(&(offset as i32).to_le_bytes());
        }
        let publics = self
            .publics
            .iter()
            .map(|&(name, label)| Public {
                name,
                offset: self.bound[label.0].expect("public label never bound"),
            })
            .collect();
        Image::from_parts(
            self.globals,
            publics,
            std::mem::take(&mut self.strings),
            std::mem::take(&mut self.code),
        )
    }
}
