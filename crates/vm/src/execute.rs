//! The fetch-decode-execute loop and per-group opcode handlers.

use crate::error::VmError;
use crate::machine::{Machine, HALT_IP};
use crate::value::{Place, Value};
use crate::Outcome;
use tarn_common::{decode, BinOp, Decoded, Insn, Location, Pattern};

/// Quotient rounded toward negative infinity.
fn floor_div(a: i64, b: i64) -> i64 {
    let q = a.wrapping_div(b);
    if a.wrapping_rem(b) != 0 && (a < 0) != (b < 0) {
        q - 1
    } else {
        q
    }
}

/// Remainder of floor division: `a - floor(a/b)*b`, sign follows `b`.
fn floor_mod(a: i64, b: i64) -> i64 {
    let r = a.wrapping_rem(b);
    if r != 0 && (r < 0) != (b < 0) {
        r + b
    } else {
        r
    }
}

impl<'a> Machine<'a> {
    /// Execute until STOP, the entry epilogue, a match failure, or a fatal
    /// error.
    pub fn run(&mut self) -> Result<Outcome, VmError> {
        loop {
            if self.ip == HALT_IP {
                return Ok(Outcome::Halted);
            }
            let Decoded { insn, next } = decode(self.image.code(), self.ip)?;
            self.at = self.ip;
            self.ip = next;

            match insn {
                Insn::Binop(op) => self.exec_binop(op)?,
                Insn::Const(n) => self.push(Value::Number(n as i64)),
                Insn::StringLit(offset) => self.exec_string(offset)?,
                Insn::Sexp { tag, arity } => self.exec_sexp(tag, arity)?,
                Insn::Sta => self.exec_sta()?,
                Insn::Jmp(target) => self.jump_to(target)?,
                Insn::End => self.end_call()?,
                Insn::Drop => self.popn(1)?,
                Insn::Dup => self.exec_dup()?,
                Insn::Swap => self.exec_swap()?,
                Insn::Elem => self.exec_elem()?,
                Insn::Ld(loc) => self.exec_ld(loc)?,
                Insn::Lda(loc) => self.exec_lda(loc)?,
                Insn::St(loc) => self.exec_st(loc)?,
                Insn::CJmpZ(target) => self.exec_cjmp(target, false)?,
                Insn::CJmpNz(target) => self.exec_cjmp(target, true)?,
                Insn::Begin { n_args, n_locals } => self.exec_begin(n_args, n_locals, false)?,
                Insn::CBegin { n_args, n_locals } => self.exec_begin(n_args, n_locals, true)?,
                Insn::Closure { entry, captures } => self.exec_closure(entry, &captures)?,
                Insn::CallC { n_args } => self.exec_callc(n_args)?,
                Insn::Call { entry, .. } => self.exec_call(entry)?,
                Insn::Tag { name, arity } => self.exec_tag(name, arity)?,
                Insn::Array(len) => self.exec_array_patt(len)?,
                Insn::Fail { line, col } => {
                    let v = self.peek(1)?.clone();
                    let v = self.unref(v)?;
                    return Ok(Outcome::MatchFailure {
                        value: v.render(),
                        line,
                        col,
                    });
                }
                Insn::Line(_) => {}
                Insn::Patt(p) => self.exec_patt(p)?,
                Insn::Read => self.exec_read()?,
                Insn::Write => self.exec_write()?,
                Insn::Length => self.exec_length()?,
                Insn::StringVal => self.exec_string_val()?,
                Insn::MkArray(n) => self.exec_mk_array(n)?,
                Insn::Stop => return Ok(Outcome::Halted),
            }
        }
    }

    fn jump_to(&mut self, target: u32) -> Result<(), VmError> {
        let target = target as usize;
        if target >= self.image.code().len() {
            return Err(VmError::JumpOutOfRange { at: self.at, target });
        }
        self.ip = target;
        Ok(())
    }

    /// Assert that `entry` is inside the code and starts with BEGIN/CBEGIN.
    fn check_entry(&self, entry: usize) -> Result<(), VmError> {
        let op = self
            .image
            .code()
            .get(entry)
            .copied()
            .ok_or(VmError::JumpOutOfRange { at: self.at, target: entry })?;
        if op >> 4 == 5 && matches!(op & 0x0F, 2 | 3) {
            Ok(())
        } else {
            Err(VmError::BadCallTarget { at: self.at, target: entry })
        }
    }

    /// Look an operand string up in the image's string table.
    fn string_operand(&self, offset: u32) -> Result<&[u8], VmError> {
        self.image
            .string_at(offset)
            .ok_or(VmError::BadStringOffset { at: self.at, offset })
    }

    /// Pop `n` operands, dereferenced, in source order (deepest first).
    fn take_values(&mut self, n: usize) -> Result<Vec<Value>, VmError> {
        if n > 0 {
            // Depth check up front, before reserving anything for a count
            // that the stack cannot satisfy.
            self.peek(n)?;
        }
        let mut values = Vec::with_capacity(n);
        for i in 0..n {
            let v = self.peek(n - i)?.clone();
            values.push(self.unref(v)?);
        }
        self.popn(n)?;
        Ok(values)
    }

    // ---- Binary operators ----

    fn exec_binop(&mut self, op: BinOp) -> Result<(), VmError> {
        let rhs = self.pop_number()?;
        let lhs = self.pop_number()?;

        let result = match op {
            BinOp::Add => lhs.wrapping_add(rhs),
            BinOp::Sub => lhs.wrapping_sub(rhs),
            BinOp::Mul => lhs.wrapping_mul(rhs),
            BinOp::Div => {
                if rhs == 0 {
                    return Err(VmError::DivisionByZero { at: self.at });
                }
                floor_div(lhs, rhs)
            }
            BinOp::Mod => {
                if rhs == 0 {
                    return Err(VmError::DivisionByZero { at: self.at });
                }
                floor_mod(lhs, rhs)
            }
            BinOp::Lt => (lhs < rhs) as i64,
            BinOp::Le => (lhs <= rhs) as i64,
            BinOp::Gt => (lhs > rhs) as i64,
            BinOp::Ge => (lhs >= rhs) as i64,
            BinOp::Eq => (lhs == rhs) as i64,
            BinOp::Ne => (lhs != rhs) as i64,
            BinOp::And => (lhs != 0 && rhs != 0) as i64,
            BinOp::Or => (lhs != 0 || rhs != 0) as i64,
        };
        self.push(Value::Number(result));
        Ok(())
    }

    // ---- Value and stack operators ----

    fn exec_string(&mut self, offset: u32) -> Result<(), VmError> {
        let bytes = self.string_operand(offset)?.to_vec();
        let v = self.host.alloc_string(bytes);
        self.push(v);
        Ok(())
    }

    fn exec_sexp(&mut self, tag: u32, arity: u32) -> Result<(), VmError> {
        let name = String::from_utf8_lossy(self.string_operand(tag)?).into_owned();
        let fields = self.take_values(arity as usize)?;
        let v = self.host.alloc_sexp(name.into_boxed_str(), fields);
        self.push(v);
        Ok(())
    }

    /// Two forms: store through a reference (value above a Ref slot), or
    /// the indexed store into an array, sexp or string (value, index,
    /// target). Either way the stored value replaces the operands.
    fn exec_sta(&mut self) -> Result<(), VmError> {
        let v = self.pop()?;
        let stored = self.unref(v)?;

        let under = self.pop()?;
        if let Value::Ref(place) = under {
            self.write_place(&place, stored.clone())?;
            self.push(stored);
            return Ok(());
        }

        let index = self.number(under)?;
        let target = self.pop()?;
        match self.unref(target)? {
            Value::Array(handle) => {
                let mut elems = handle.borrow_mut();
                let len = elems.len();
                let slot = elems.get_mut(to_index(index, len, self.at)?).ok_or(
                    VmError::IndexOutOfBounds { at: self.at, index, len },
                )?;
                *slot = stored.clone();
            }
            Value::Sexp(handle) => {
                let mut sexp = handle.borrow_mut();
                let len = sexp.fields.len();
                let i = to_index(index, len, self.at)?;
                sexp.fields[i] = stored.clone();
            }
            Value::String(handle) => {
                let byte = match &stored {
                    Value::Number(n) => *n as u8,
                    other => {
                        return Err(VmError::TypeMismatch {
                            at: self.at,
                            expected: "number",
                            found: other.kind(),
                        })
                    }
                };
                let mut bytes = handle.borrow_mut();
                let len = bytes.len();
                let i = to_index(index, len, self.at)?;
                bytes[i] = byte;
            }
            other => {
                return Err(VmError::TypeMismatch {
                    at: self.at,
                    expected: "array, sexp or string",
                    found: other.kind(),
                })
            }
        }
        self.push(stored);
        Ok(())
    }

    fn exec_dup(&mut self) -> Result<(), VmError> {
        // The raw slot is duplicated: a reference stays a reference.
        let v = self.peek(1)?.clone();
        self.push(v);
        Ok(())
    }

    fn exec_swap(&mut self) -> Result<(), VmError> {
        self.peek(2)?;
        let len = self.stack.len();
        self.stack.swap(len - 1, len - 2);
        Ok(())
    }

    fn exec_elem(&mut self) -> Result<(), VmError> {
        let index = self.pop_number()?;
        let aggregate = self.pop()?;
        match self.unref(aggregate)? {
            Value::Array(handle) => {
                let len = handle.borrow().len();
                let i = to_index(index, len, self.at)?;
                self.push(Value::Ref(Place::ArrayElem(handle, i)));
            }
            Value::Sexp(handle) => {
                let len = handle.borrow().fields.len();
                let i = to_index(index, len, self.at)?;
                self.push(Value::Ref(Place::SexpField(handle, i)));
            }
            Value::String(handle) => {
                // String bytes are not addressable l-values: the byte value
                // itself is pushed.
                let bytes = handle.borrow();
                let i = to_index(index, bytes.len(), self.at)?;
                self.push(Value::Number(bytes[i] as i64));
            }
            other => {
                return Err(VmError::TypeMismatch {
                    at: self.at,
                    expected: "array, sexp or string",
                    found: other.kind(),
                })
            }
        }
        Ok(())
    }

    // ---- Location operators ----

    fn exec_ld(&mut self, loc: Location) -> Result<(), VmError> {
        let place = self.resolve(loc)?;
        self.push(Value::Ref(place));
        Ok(())
    }

    fn exec_lda(&mut self, loc: Location) -> Result<(), VmError> {
        let place = self.resolve(loc)?;
        let held = self.read_place(&place)?;
        match held {
            Value::Array(_) | Value::Sexp(_) => {
                self.push(Value::Ref(place));
                Ok(())
            }
            other => Err(VmError::TypeMismatch {
                at: self.at,
                expected: "array or sexp",
                found: other.kind(),
            }),
        }
    }

    fn exec_st(&mut self, loc: Location) -> Result<(), VmError> {
        let place = self.resolve(loc)?;
        let v = self.peek(1)?.clone();
        let stored = self.unref(v)?;
        // The operand stays on the stack.
        self.write_place(&place, stored)
    }

    // ---- Control operators ----

    fn exec_cjmp(&mut self, target: u32, on_nonzero: bool) -> Result<(), VmError> {
        let n = self.pop_number()?;
        if (n != 0) == on_nonzero {
            self.jump_to(target)?;
        }
        Ok(())
    }

    fn exec_begin(&mut self, n_args: u32, n_locals: u32, capturing: bool) -> Result<(), VmError> {
        let marker = self.pop_number()?;
        if marker < 0 {
            return Err(VmError::UnexpectedCaptures { at: self.at, count: marker });
        }
        if !capturing && marker != 0 {
            return Err(VmError::UnexpectedCaptures { at: self.at, count: marker });
        }
        let ret = self.pending_ret;
        self.begin_call(marker as usize, n_args as usize, n_locals as usize, ret)
    }

    fn exec_closure(&mut self, entry: u32, captures: &[Location]) -> Result<(), VmError> {
        // Captures are by-value snapshots taken now, not aliases.
        let mut taken = Vec::with_capacity(captures.len());
        for &loc in captures {
            let place = self.resolve(loc)?;
            let v = self.read_place(&place)?;
            taken.push(self.unref(v)?);
        }
        let v = self.host.alloc_closure(entry as usize, taken);
        self.push(v);
        Ok(())
    }

    fn exec_call(&mut self, entry: u32) -> Result<(), VmError> {
        let entry = entry as usize;
        self.check_entry(entry)?;
        self.push(Value::Number(0)); // zero-capture marker
        self.pending_ret = self.ip;
        self.ip = entry;
        Ok(())
    }

    fn exec_callc(&mut self, n_args: u32) -> Result<(), VmError> {
        let n_args = n_args as usize;
        let fun = self.peek(n_args + 1)?.clone();
        let closure = match self.unref(fun)? {
            Value::Closure(c) => c,
            other => {
                return Err(VmError::TypeMismatch {
                    at: self.at,
                    expected: "closure",
                    found: other.kind(),
                })
            }
        };

        // Shift the arguments down one slot to absorb the closure value.
        let top = self.stack.len();
        self.stack.remove(top - n_args - 1);

        for cap in &closure.captures {
            self.push(cap.clone());
        }
        self.push(Value::Number(closure.captures.len() as i64));
        self.check_entry(closure.entry)?;
        self.pending_ret = self.ip;
        self.ip = closure.entry;
        Ok(())
    }

    fn exec_tag(&mut self, name: u32, arity: u32) -> Result<(), VmError> {
        let name = self.string_operand(name)?.to_vec();
        let v = self.pop()?;
        let v = self.unref(v)?;
        let matches = match v {
            Value::Sexp(handle) => {
                let sexp = handle.borrow();
                sexp.tag.as_bytes() == name.as_slice() && sexp.fields.len() == arity as usize
            }
            _ => false,
        };
        self.push(Value::Number(matches as i64));
        Ok(())
    }

    fn exec_array_patt(&mut self, len: u32) -> Result<(), VmError> {
        let v = self.pop()?;
        let v = self.unref(v)?;
        let matches = match v {
            Value::Array(handle) => handle.borrow().len() == len as usize,
            _ => false,
        };
        self.push(Value::Number(matches as i64));
        Ok(())
    }

    // ---- Pattern predicates ----

    fn exec_patt(&mut self, pattern: Pattern) -> Result<(), VmError> {
        let matches = match pattern {
            Pattern::EqString => {
                // The pattern literal is compiler-emitted and must be a
                // string; only the scrutinee is lenient.
                let pat = self.pop()?;
                let pat = match self.unref(pat)? {
                    Value::String(h) => h,
                    other => {
                        return Err(VmError::TypeMismatch {
                            at: self.at,
                            expected: "string",
                            found: other.kind(),
                        })
                    }
                };
                let scrutinee = self.pop()?;
                match self.unref(scrutinee)? {
                    Value::String(s) => *s.borrow() == *pat.borrow(),
                    _ => false,
                }
            }
            Pattern::IsString => {
                let v = self.pop()?;
                matches!(self.unref(v)?, Value::String(_))
            }
            Pattern::IsArray => {
                let v = self.pop()?;
                matches!(self.unref(v)?, Value::Array(_))
            }
            Pattern::IsSexp => {
                let v = self.pop()?;
                matches!(self.unref(v)?, Value::Sexp(_))
            }
            Pattern::IsClosure => {
                let v = self.pop()?;
                matches!(self.unref(v)?, Value::Closure(_))
            }
            // The reference tests inspect the raw slot, no dereferencing.
            Pattern::IsRef => self.pop()?.is_ref(),
            Pattern::IsVal => !self.pop()?.is_ref(),
        };
        self.push(Value::Number(matches as i64));
        Ok(())
    }

    // ---- Builtin calls ----

    fn exec_read(&mut self) -> Result<(), VmError> {
        let n = self.host.read_int().map_err(|e| VmError::Input {
            at: self.at,
            message: e.to_string(),
        })?;
        self.push(Value::Number(n));
        Ok(())
    }

    fn exec_write(&mut self) -> Result<(), VmError> {
        let v = self.peek(1)?.clone();
        let n = self.number(v)?;
        // The operand stays on the stack as the call's result.
        self.host.write_int(n).map_err(|e| VmError::Input {
            at: self.at,
            message: e.to_string(),
        })
    }

    fn exec_length(&mut self) -> Result<(), VmError> {
        let v = self.pop()?;
        let len = match self.unref(v)? {
            Value::Array(h) => h.borrow().len(),
            Value::Sexp(h) => h.borrow().fields.len(),
            Value::String(h) => h.borrow().len(),
            other => {
                return Err(VmError::TypeMismatch {
                    at: self.at,
                    expected: "array, sexp or string",
                    found: other.kind(),
                })
            }
        };
        self.push(Value::Number(len as i64));
        Ok(())
    }

    fn exec_string_val(&mut self) -> Result<(), VmError> {
        let v = self.pop()?;
        let v = self.unref(v)?;
        let rendered = self.host.alloc_string(v.render().into_bytes());
        self.push(rendered);
        Ok(())
    }

    fn exec_mk_array(&mut self, n: u32) -> Result<(), VmError> {
        let elems = self.take_values(n as usize)?;
        let v = self.host.alloc_array(elems);
        self.push(v);
        Ok(())
    }
}

/// A non-negative in-range aggregate index, or a bounds error.
fn to_index(index: i64, len: usize, at: usize) -> Result<usize, VmError> {
    usize::try_from(index)
        .ok()
        .filter(|&i| i < len)
        .ok_or(VmError::IndexOutOfBounds { at, index, len })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn floor_div_rounds_toward_negative_infinity() {
        assert_eq!(floor_div(7, 2), 3);
        assert_eq!(floor_div(-7, 2), -4);
        assert_eq!(floor_div(7, -2), -4);
        assert_eq!(floor_div(-7, -2), 3);
        assert_eq!(floor_div(6, 3), 2);
        assert_eq!(floor_div(-6, 3), -2);
    }

    #[test]
    fn floor_mod_sign_follows_divisor() {
        assert_eq!(floor_mod(-7, 3), 2);
        assert_eq!(floor_mod(7, -3), -2);
        assert_eq!(floor_mod(7, 3), 1);
        assert_eq!(floor_mod(-7, -3), -1);
        assert_eq!(floor_mod(6, 3), 0);
    }

    #[test]
    fn floor_identities_hold() {
        for a in -20i64..=20 {
            for b in [-7i64, -3, -1, 1, 2, 5] {
                let q = floor_div(a, b);
                let r = floor_mod(a, b);
                assert_eq!(q * b + r, a, "a={a} b={b}");
                assert!(r == 0 || (r < 0) == (b < 0), "a={a} b={b} r={r}");
            }
        }
    }

    #[test]
    fn to_index_rejects_negative_and_overflow() {
        assert_eq!(to_index(1, 3, 0), Ok(1));
        assert!(to_index(-1, 3, 0).is_err());
        assert!(to_index(3, 3, 0).is_err());
    }
}
