//! The bytecode container: header, publics table, string table, code.
//!
//! On disk an image is three little-endian `i32` header words (string-table
//! size in bytes, global-area size in words, public-symbol count), the
//! publics table (`2 * n` words: name offset, code offset), the string table
//! (NUL-terminated byte strings addressed by offset), and the code section
//! running to the end of the file.

use crate::error::LoadError;

/// One public symbol: a name in the string table and a code offset.
///
/// Publics are consumed by the tooling layer only; the execution loop never
/// reads them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Public {
    /// String-table offset of the symbol name.
    pub name: u32,
    /// Code offset of the symbol.
    pub offset: u32,
}

/// An unpacked bytecode container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    globals: usize,
    publics: Vec<Public>,
    strings: Vec<u8>,
    code: Vec<u8>,
}

const HEADER_WORDS: usize = 3;

fn word(bytes: &[u8], index: usize) -> i32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[index * 4..index * 4 + 4]);
    i32::from_le_bytes(raw)
}

impl Image {
    /// Unpack a container from its on-disk form.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, LoadError> {
        if bytes.len() < HEADER_WORDS * 4 {
            return Err(LoadError::Truncated {
                expected: HEADER_WORDS * 4,
                found: bytes.len(),
            });
        }

        let stringtab_size = word(bytes, 0);
        let global_count = word(bytes, 1);
        let public_count = word(bytes, 2);

        if stringtab_size < 0 {
            return Err(LoadError::BadHeader {
                field: "string table size",
                value: stringtab_size,
            });
        }
        if global_count < 0 {
            return Err(LoadError::BadHeader {
                field: "global area size",
                value: global_count,
            });
        }
        if public_count < 0 {
            return Err(LoadError::BadHeader {
                field: "public symbol count",
                value: public_count,
            });
        }

        let publics_bytes = public_count as usize * 8;
        let sections_end = HEADER_WORDS * 4 + publics_bytes + stringtab_size as usize;
        if bytes.len() < sections_end {
            return Err(LoadError::Truncated {
                expected: sections_end,
                found: bytes.len(),
            });
        }

        let mut publics = Vec::with_capacity(public_count as usize);
        for i in 0..public_count as usize {
            let name = word(bytes, HEADER_WORDS + i * 2);
            let offset = word(bytes, HEADER_WORDS + i * 2 + 1);
            if name < 0 || offset < 0 {
                return Err(LoadError::BadHeader {
                    field: "public symbol entry",
                    value: if name < 0 { name } else { offset },
                });
            }
            publics.push(Public {
                name: name as u32,
                offset: offset as u32,
            });
        }

        let strings_start = HEADER_WORDS * 4 + publics_bytes;
        Ok(Self {
            globals: global_count as usize,
            publics,
            strings: bytes[strings_start..sections_end].to_vec(),
            code: bytes[sections_end..].to_vec(),
        })
    }

    /// Assemble an image from already-built sections.
    pub fn from_parts(globals: usize, publics: Vec<Public>, strings: Vec<u8>, code: Vec<u8>) -> Self {
        Self {
            globals,
            publics,
            strings,
            code,
        }
    }

    /// Serialize back to the on-disk form.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            HEADER_WORDS * 4 + self.publics.len() * 8 + self.strings.len() + self.code.len(),
        );
        out.extend_from_slice(&(self.strings.len() as i32).to_le_bytes());
        out.extend_from_slice(&(self.globals as i32).to_le_bytes());
        out.extend_from_slice(&(self.publics.len() as i32).to_le_bytes());
        for p in &self.publics {
            out.extend_from_slice(&(p.name as i32).to_le_bytes());
            out.extend_from_slice(&(p.offset as i32).to_le_bytes());
        }
        out.extend_from_slice(&self.strings);
        out.extend_from_slice(&self.code);
        out
    }

    /// The string starting at `offset`, up to (not including) its NUL.
    ///
    /// Returns `None` when the offset is outside the table or the string is
    /// not terminated.
    pub fn string_at(&self, offset: u32) -> Option<&[u8]> {
        let start = offset as usize;
        let rest = self.strings.get(start..)?;
        let len = rest.iter().position(|&b| b == 0)?;
        Some(&rest[..len])
    }

    /// Number of global-area words declared by the header.
    pub fn global_count(&self) -> usize {
        self.globals
    }

    pub fn publics(&self) -> &[Public] {
        &self.publics
    }

    pub fn code(&self) -> &[u8] {
        &self.code
    }
}
