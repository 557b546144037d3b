//! Machine state: operand stack, call frames, globals, location resolution.

use crate::error::VmError;
use crate::host::Host;
use crate::value::{Place, Value};
use tarn_common::{Image, Location, Space};

/// Initial operand-stack capacity in slots. The stack grows on demand and is
/// never shrunk during execution.
const STACK_INIT: usize = 1024;

/// Initial call-stack capacity in frames.
const FRAMES_INIT: usize = 256;

/// The return address of the outermost frame. The dispatch loop halts when
/// the instruction pointer lands here.
pub(crate) const HALT_IP: usize = usize::MAX;

/// One call frame. `base` is the absolute stack offset just above the local
/// segment; below it sit, in order from the bottom: the argument segment,
/// the capture segment, and the local segment.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Frame {
    pub n_args: usize,
    pub n_locals: usize,
    pub n_caps: usize,
    pub base: usize,
    pub ret: usize,
}

/// A Tarn virtual machine instance.
///
/// All state is owned here; independent instances do not share anything but
/// the host the caller hands in. Stack slots are addressed by offset, never
/// by pointer, so growth of the backing storage cannot invalidate an
/// outstanding [`Place`].
pub struct Machine<'a> {
    pub(crate) image: &'a Image,
    pub(crate) host: &'a mut dyn Host,
    pub(crate) stack: Vec<Value>,
    pub(crate) frames: Vec<Frame>,
    pub(crate) globals: Vec<Value>,
    /// Offset of the next instruction.
    pub(crate) ip: usize,
    /// Offset of the instruction currently executing, for diagnostics.
    pub(crate) at: usize,
    /// Return address recorded by CALL/CALLC, consumed by the next prologue.
    pub(crate) pending_ret: usize,
}

impl<'a> Machine<'a> {
    /// Create a machine ready to execute `image` from code offset 0.
    ///
    /// The entry function's prologue consumes a zero capture marker and a
    /// halt return address, both seeded here, so it needs no special casing:
    /// its epilogue halts the machine.
    pub fn new(image: &'a Image, host: &'a mut dyn Host) -> Self {
        let mut frames = Vec::with_capacity(FRAMES_INIT);
        frames.push(Frame {
            n_args: 0,
            n_locals: 0,
            n_caps: 0,
            base: 0,
            ret: HALT_IP,
        });
        let mut stack = Vec::with_capacity(STACK_INIT);
        stack.push(Value::Number(0));
        Self {
            image,
            host,
            stack,
            frames,
            globals: vec![Value::Undef; image.global_count()],
            ip: 0,
            at: 0,
            pending_ret: HALT_IP,
        }
    }

    pub(crate) fn frame(&self) -> &Frame {
        // A machine always has at least the sentinel frame.
        self.frames.last().expect("frame stack is never empty")
    }

    pub(crate) fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    /// Reference to the `i`-th slot from the top (1-based). Access is
    /// bounded by the active frame: transient slots only.
    pub(crate) fn peek(&self, i: usize) -> Result<&Value, VmError> {
        let depth = self.stack.len().saturating_sub(self.frame().base);
        if i == 0 || i > depth {
            return Err(VmError::StackUnderflow { at: self.at });
        }
        Ok(&self.stack[self.stack.len() - i])
    }

    /// Remove the `n` topmost slots, which must all belong to the active
    /// frame's transient segment.
    pub(crate) fn popn(&mut self, n: usize) -> Result<(), VmError> {
        let depth = self.stack.len().saturating_sub(self.frame().base);
        if n > depth {
            return Err(VmError::StackUnderflow { at: self.at });
        }
        self.stack.truncate(self.stack.len() - n);
        Ok(())
    }

    pub(crate) fn pop(&mut self) -> Result<Value, VmError> {
        if self.stack.len() <= self.frame().base {
            return Err(VmError::StackUnderflow { at: self.at });
        }
        self.stack.pop().ok_or(VmError::StackUnderflow { at: self.at })
    }

    /// The pointee for a reference; any other value unchanged.
    pub(crate) fn unref(&self, value: Value) -> Result<Value, VmError> {
        match value {
            Value::Ref(place) => self.read_place(&place),
            other => Ok(other),
        }
    }

    /// Pop, dereference, and require a number.
    pub(crate) fn pop_number(&mut self) -> Result<i64, VmError> {
        let v = self.pop()?;
        self.number(v)
    }

    /// Dereference and require a number.
    pub(crate) fn number(&self, value: Value) -> Result<i64, VmError> {
        match self.unref(value)? {
            Value::Number(n) => Ok(n),
            other => Err(VmError::TypeMismatch {
                at: self.at,
                expected: "number",
                found: other.kind(),
            }),
        }
    }

    pub(crate) fn read_place(&self, place: &Place) -> Result<Value, VmError> {
        match place {
            Place::Global(i) => self.globals.get(*i).cloned().ok_or_else(|| {
                VmError::LocationOutOfRange {
                    at: self.at,
                    space: Space::Global,
                    index: *i as u32,
                    count: self.globals.len(),
                }
            }),
            Place::Stack(i) => self
                .stack
                .get(*i)
                .cloned()
                .ok_or(VmError::StaleReference { at: self.at, index: *i }),
            Place::ArrayElem(handle, i) => {
                let elems = handle.borrow();
                elems.get(*i).cloned().ok_or(VmError::IndexOutOfBounds {
                    at: self.at,
                    index: *i as i64,
                    len: elems.len(),
                })
            }
            Place::SexpField(handle, i) => {
                let sexp = handle.borrow();
                sexp.fields.get(*i).cloned().ok_or(VmError::IndexOutOfBounds {
                    at: self.at,
                    index: *i as i64,
                    len: sexp.fields.len(),
                })
            }
        }
    }

    pub(crate) fn write_place(&mut self, place: &Place, value: Value) -> Result<(), VmError> {
        match place {
            Place::Global(i) => {
                let count = self.globals.len();
                let slot = self.globals.get_mut(*i).ok_or(VmError::LocationOutOfRange {
                    at: self.at,
                    space: Space::Global,
                    index: *i as u32,
                    count,
                })?;
                *slot = value;
                Ok(())
            }
            Place::Stack(i) => {
                let at = self.at;
                let slot = self
                    .stack
                    .get_mut(*i)
                    .ok_or(VmError::StaleReference { at, index: *i })?;
                *slot = value;
                Ok(())
            }
            Place::ArrayElem(handle, i) => {
                let mut elems = handle.borrow_mut();
                let len = elems.len();
                let slot = elems.get_mut(*i).ok_or(VmError::IndexOutOfBounds {
                    at: self.at,
                    index: *i as i64,
                    len,
                })?;
                *slot = value;
                Ok(())
            }
            Place::SexpField(handle, i) => {
                let mut sexp = handle.borrow_mut();
                let len = sexp.fields.len();
                let slot = sexp.fields.get_mut(*i).ok_or(VmError::IndexOutOfBounds {
                    at: self.at,
                    index: *i as i64,
                    len,
                })?;
                *slot = value;
                Ok(())
            }
        }
    }

    /// Map a (space, index) pair to the slot it names in the active frame.
    pub(crate) fn resolve(&self, loc: Location) -> Result<Place, VmError> {
        let frame = self.frame();
        let index = loc.index as usize;
        let out_of_range = |count: usize| VmError::LocationOutOfRange {
            at: self.at,
            space: loc.space,
            index: loc.index,
            count,
        };
        match loc.space {
            Space::Global => {
                if index >= self.globals.len() {
                    return Err(out_of_range(self.globals.len()));
                }
                Ok(Place::Global(index))
            }
            Space::Local => {
                if index >= frame.n_locals {
                    return Err(out_of_range(frame.n_locals));
                }
                Ok(Place::Stack(frame.base - frame.n_locals + index))
            }
            Space::Capture => {
                if index >= frame.n_caps {
                    return Err(out_of_range(frame.n_caps));
                }
                Ok(Place::Stack(frame.base - frame.n_locals - frame.n_caps + index))
            }
            Space::Argument => {
                if index >= frame.n_args {
                    return Err(out_of_range(frame.n_args));
                }
                Ok(Place::Stack(
                    frame.base - frame.n_locals - frame.n_caps - frame.n_args + index,
                ))
            }
        }
    }

    /// Establish a frame: dereference the arguments in place, reserve the
    /// local segment, and set the new base. The arguments and captures must
    /// already sit on top of the stack, arguments below captures.
    pub(crate) fn begin_call(
        &mut self,
        n_caps: usize,
        n_args: usize,
        n_locals: usize,
        ret: usize,
    ) -> Result<(), VmError> {
        let top = self.stack.len();
        if top.saturating_sub(self.frame().base) < n_caps + n_args {
            return Err(VmError::StackUnderflow { at: self.at });
        }

        // A frame never starts with reference arguments.
        let args_start = top - n_caps - n_args;
        for i in args_start..args_start + n_args {
            let v = self.stack[i].clone();
            let v = self.unref(v)?;
            self.stack[i] = v;
        }

        for _ in 0..n_locals {
            self.stack.push(Value::Undef);
        }
        self.frames.push(Frame {
            n_args,
            n_locals,
            n_caps,
            base: self.stack.len(),
            ret,
        });
        Ok(())
    }

    /// Tear down the active frame: exactly one result above the local
    /// segment, dereferenced and re-pushed onto the caller's stack.
    pub(crate) fn end_call(&mut self) -> Result<(), VmError> {
        let frame = *self.frame();
        let depth = self.stack.len().saturating_sub(frame.base);
        if depth != 1 {
            return Err(VmError::UnbalancedReturn { at: self.at, depth });
        }
        if self.frames.len() == 1 {
            return Err(VmError::CallStackUnderflow { at: self.at });
        }

        let result = self.pop()?;
        let result = self.unref(result)?;

        self.frames.pop();
        self.stack
            .truncate(frame.base - frame.n_locals - frame.n_caps - frame.n_args);
        self.ip = frame.ret;
        self.push(result);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::StdHost;
    use tarn_common::CodeBuilder;

    fn empty_image(globals: usize) -> Image {
        let mut b = CodeBuilder::new();
        b.globals(globals);
        b.stop();
        b.finish()
    }

    #[test]
    fn starts_with_marker_and_sentinel_frame() {
        let image = empty_image(0);
        let mut host = StdHost::new();
        let m = Machine::new(&image, &mut host);
        assert_eq!(m.stack, vec![Value::Number(0)]);
        assert_eq!(m.frames.len(), 1);
        assert_eq!(m.frame().ret, HALT_IP);
    }

    #[test]
    fn peek_is_one_based_from_top() {
        let image = empty_image(0);
        let mut host = StdHost::new();
        let mut m = Machine::new(&image, &mut host);
        m.push(Value::Number(10));
        m.push(Value::Number(20));
        assert_eq!(m.peek(1).unwrap(), &Value::Number(20));
        assert_eq!(m.peek(2).unwrap(), &Value::Number(10));
    }

    #[test]
    fn pop_below_frame_base_is_underflow() {
        let image = empty_image(0);
        let mut host = StdHost::new();
        let mut m = Machine::new(&image, &mut host);
        // Pretend a frame owns everything currently on the stack.
        m.begin_call(0, 0, 0, HALT_IP).unwrap();
        assert_eq!(m.pop(), Err(VmError::StackUnderflow { at: 0 }));
    }

    #[test]
    fn resolver_walks_segments_downward_from_base() {
        let image = empty_image(1);
        let mut host = StdHost::new();
        let mut m = Machine::new(&image, &mut host);
        // Two args, one capture, two locals. Stack: marker arg0 arg1 cap0.
        m.push(Value::Number(100)); // arg 0
        m.push(Value::Number(101)); // arg 1
        m.push(Value::Number(200)); // capture 0
        m.begin_call(1, 2, 2, HALT_IP).unwrap();

        let base = m.frame().base;
        assert_eq!(m.resolve(Location::new(Space::Local, 0)).unwrap(), Place::Stack(base - 2));
        assert_eq!(m.resolve(Location::new(Space::Capture, 0)).unwrap(), Place::Stack(base - 3));
        assert_eq!(m.resolve(Location::new(Space::Argument, 0)).unwrap(), Place::Stack(base - 5));
        assert_eq!(m.resolve(Location::new(Space::Argument, 1)).unwrap(), Place::Stack(base - 4));
        assert_eq!(m.resolve(Location::new(Space::Global, 0)).unwrap(), Place::Global(0));

        let arg0 = m.resolve(Location::new(Space::Argument, 0)).unwrap();
        assert_eq!(m.read_place(&arg0).unwrap(), Value::Number(100));
        let cap0 = m.resolve(Location::new(Space::Capture, 0)).unwrap();
        assert_eq!(m.read_place(&cap0).unwrap(), Value::Number(200));
    }

    #[test]
    fn resolver_bounds_checks_every_space() {
        let image = empty_image(1);
        let mut host = StdHost::new();
        let mut m = Machine::new(&image, &mut host);
        m.begin_call(0, 0, 1, HALT_IP).unwrap();

        assert!(matches!(
            m.resolve(Location::new(Space::Local, 1)),
            Err(VmError::LocationOutOfRange { space: Space::Local, index: 1, count: 1, .. })
        ));
        assert!(matches!(
            m.resolve(Location::new(Space::Argument, 0)),
            Err(VmError::LocationOutOfRange { space: Space::Argument, .. })
        ));
        assert!(matches!(
            m.resolve(Location::new(Space::Capture, 0)),
            Err(VmError::LocationOutOfRange { space: Space::Capture, .. })
        ));
        assert!(matches!(
            m.resolve(Location::new(Space::Global, 1)),
            Err(VmError::LocationOutOfRange { space: Space::Global, index: 1, count: 1, .. })
        ));
    }

    #[test]
    fn locals_start_undefined() {
        let image = empty_image(0);
        let mut host = StdHost::new();
        let mut m = Machine::new(&image, &mut host);
        m.begin_call(0, 0, 2, HALT_IP).unwrap();
        let l0 = m.resolve(Location::new(Space::Local, 0)).unwrap();
        assert_eq!(m.read_place(&l0).unwrap(), Value::Undef);
    }

    #[test]
    fn begin_call_dereferences_arguments() {
        let image = empty_image(1);
        let mut host = StdHost::new();
        let mut m = Machine::new(&image, &mut host);
        m.globals[0] = Value::Number(7);
        m.push(Value::Ref(Place::Global(0)));
        m.begin_call(0, 1, 0, HALT_IP).unwrap();
        let arg0 = m.resolve(Location::new(Space::Argument, 0)).unwrap();
        assert_eq!(m.read_place(&arg0).unwrap(), Value::Number(7));
    }

    #[test]
    fn end_call_requires_exactly_one_result() {
        let image = empty_image(0);
        let mut host = StdHost::new();
        let mut m = Machine::new(&image, &mut host);
        m.begin_call(0, 0, 0, 5).unwrap();
        assert_eq!(
            m.end_call(),
            Err(VmError::UnbalancedReturn { at: 0, depth: 0 })
        );
        m.push(Value::Number(1));
        m.push(Value::Number(2));
        assert_eq!(
            m.end_call(),
            Err(VmError::UnbalancedReturn { at: 0, depth: 2 })
        );
    }

    #[test]
    fn end_call_pops_frame_slots_and_pushes_result() {
        let image = empty_image(0);
        let mut host = StdHost::new();
        let mut m = Machine::new(&image, &mut host);
        let depth_before = m.stack.len();
        m.push(Value::Number(11)); // arg
        m.push(Value::Number(22)); // capture
        m.begin_call(1, 1, 1, 77).unwrap();
        m.push(Value::Number(99)); // result
        m.end_call().unwrap();

        assert_eq!(m.stack.len(), depth_before + 1);
        assert_eq!(m.stack.last(), Some(&Value::Number(99)));
        assert_eq!(m.ip, 77);
        assert_eq!(m.frames.len(), 1);
    }

    #[test]
    fn reference_survives_stack_growth() {
        let image = empty_image(0);
        let mut host = StdHost::new();
        let mut m = Machine::new(&image, &mut host);
        m.push(Value::Number(42));
        let place = Place::Stack(m.stack.len() - 1);

        // Push enough to force several reallocations of the backing store.
        for i in 0..(STACK_INIT * 4) {
            m.push(Value::Number(i as i64));
        }
        assert_eq!(m.read_place(&place).unwrap(), Value::Number(42));
        m.write_place(&place, Value::Number(-1)).unwrap();
        assert_eq!(m.read_place(&place).unwrap(), Value::Number(-1));
    }
}
