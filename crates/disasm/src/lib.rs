//! Bytecode listing: image → readable text.
//!
//! One instruction per line, prefixed with its code offset. String operands
//! are resolved against the image's string table and quoted; locations are
//! printed as `G(i)/L(i)/A(i)/C(i)`. Public symbols head the listing. A
//! decode failure ends the listing with an error line instead of failing
//! the whole dump, so a partially corrupt file still shows its readable
//! prefix.

use std::fmt::Write as _;
use tarn_common::{decode, Image, Insn};

/// Render the full listing of an image.
pub fn dump(image: &Image) -> String {
    let mut out = String::new();

    for public in image.publics() {
        let name = match image.string_at(public.name) {
            Some(bytes) => String::from_utf8_lossy(bytes).into_owned(),
            None => format!("<bad name offset {}>", public.name),
        };
        let _ = writeln!(out, "public {name} -> {:#06x}", public.offset);
    }
    if !image.publics().is_empty() {
        out.push('\n');
    }

    let code = image.code();
    let mut pc = 0;
    while pc < code.len() {
        match decode(code, pc) {
            Ok(decoded) => {
                let _ = writeln!(out, "{pc:#06x}:\t{}", render(image, &decoded.insn));
                pc = decoded.next;
            }
            Err(e) => {
                let _ = writeln!(out, "{pc:#06x}:\t<{e}>");
                break;
            }
        }
    }
    out
}

fn quoted(image: &Image, offset: u32) -> String {
    match image.string_at(offset) {
        Some(bytes) => format!("\"{}\"", String::from_utf8_lossy(bytes)),
        None => format!("<bad string offset {offset}>"),
    }
}

fn render(image: &Image, insn: &Insn) -> String {
    let m = insn.mnemonic();
    match insn {
        Insn::Binop(op) => format!("{m} {}", op.symbol()),
        Insn::Const(n) => format!("{m} {n}"),
        Insn::StringLit(offset) => format!("{m} {}", quoted(image, *offset)),
        Insn::Sexp { tag, arity } => format!("{m} {} {arity}", quoted(image, *tag)),
        Insn::Jmp(target) => format!("{m} {target:#06x}"),
        Insn::Ld(loc) | Insn::Lda(loc) | Insn::St(loc) => format!("{m} {loc}"),
        Insn::CJmpZ(target) | Insn::CJmpNz(target) => format!("{m} {target:#06x}"),
        Insn::Begin { n_args, n_locals } | Insn::CBegin { n_args, n_locals } => {
            format!("{m} {n_args} {n_locals}")
        }
        Insn::Closure { entry, captures } => {
            let caps: Vec<String> = captures.iter().map(|loc| loc.to_string()).collect();
            format!("{m} {entry:#06x} [{}]", caps.join(", "))
        }
        Insn::CallC { n_args } => format!("{m} {n_args}"),
        Insn::Call { entry, n_args } => format!("{m} {entry:#06x} {n_args}"),
        Insn::Tag { name, arity } => format!("{m} {} {arity}", quoted(image, *name)),
        Insn::Array(len) => format!("{m} {len}"),
        Insn::Fail { line, col } => format!("{m} {line} {col}"),
        Insn::Line(n) => format!("{m} {n}"),
        Insn::Patt(p) => format!("{m} {}", p.name()),
        Insn::MkArray(n) => format!("{m} {n}"),
        Insn::Sta
        | Insn::End
        | Insn::Drop
        | Insn::Dup
        | Insn::Swap
        | Insn::Elem
        | Insn::Read
        | Insn::Write
        | Insn::Length
        | Insn::StringVal
        | Insn::Stop => m.to_string(),
    }
}
