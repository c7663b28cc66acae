//! The overridable per-opcode-category hooks a concrete abstract
//! interpretation refines.
//!
//! Rather than a Java-style inheritance hierarchy of per-opcode overrides,
//! this crate exposes one trait method per opcode category; the
//! interpreter's dispatch table calls into exactly one of these per
//! instruction. Every default returns [`Lattice::top`], so a type that
//! implements no method at all gets the trivially-terminating
//! over-approximating analysis ([`TopAnalysis`]).

use crate::common::{ConstantPoolIndex, ProgramCounter};
use crate::frame::Lattice;
use crate::interp::opcode::Opcode;

/// Per-opcode-category transfer hooks over abstract value type `T`.
///
/// Every method receives the instruction's bci and operand values already
/// popped off the stack (in left-to-right operand order) and returns the
/// value(s) to push. The interpreter is responsible for slot accounting;
/// these hooks only ever see and produce bare `T`s.
pub trait Transfer<T: Lattice> {
    /// `*CONST_*`, `BIPUSH`, `SIPUSH`, `LDC*`: produces the pushed
    /// constant's abstract value.
    fn constant(&mut self, _bci: ProgramCounter, _opcode: Opcode, _cpi: Option<ConstantPoolIndex>) -> T {
        T::top()
    }

    /// `*LOAD`-family: reads a local and republishes it on the stack.
    fn load(&mut self, _bci: ProgramCounter, _opcode: Opcode, value: &T) -> T {
        value.join(value)
    }

    /// `*STORE`-family: the value about to be written to a local.
    fn store(&mut self, _bci: ProgramCounter, _opcode: Opcode, value: &T) -> T {
        value.join(value)
    }

    /// Two-operand arithmetic/logic/bitwise operators.
    fn binary(&mut self, _bci: ProgramCounter, _opcode: Opcode, _lhs: &T, _rhs: &T) -> T {
        T::top()
    }

    /// One-operand arithmetic operators (negation).
    fn unary(&mut self, _bci: ProgramCounter, _opcode: Opcode, _value: &T) -> T {
        T::top()
    }

    /// Widening/narrowing numeric conversions.
    fn cast(&mut self, _bci: ProgramCounter, _opcode: Opcode, _value: &T) -> T {
        T::top()
    }

    /// `LCMP`, `FCMPL/G`, `DCMPL/G`: always produces a one-slot integer.
    fn compare(&mut self, _bci: ProgramCounter, _opcode: Opcode, _lhs: &T, _rhs: &T) -> T {
        T::top()
    }

    /// Array element load: `(array, index) -> element`.
    fn array_load(&mut self, _bci: ProgramCounter, _opcode: Opcode, _array: &T, _index: &T) -> T {
        T::top()
    }

    /// Array element store: no value produced, but observed for analyses
    /// that track array contents.
    fn array_store(
        &mut self,
        _bci: ProgramCounter,
        _opcode: Opcode,
        _array: &T,
        _index: &T,
        _value: &T,
    ) {
    }

    /// `GETFIELD`/`GETSTATIC`: produces the field's abstract value.
    fn field_read(&mut self, _bci: ProgramCounter, _opcode: Opcode, _cpi: ConstantPoolIndex) -> T {
        T::top()
    }

    /// `PUTFIELD`/`PUTSTATIC`: observed for analyses that track field
    /// contents; produces nothing.
    fn field_write(&mut self, _bci: ProgramCounter, _opcode: Opcode, _cpi: ConstantPoolIndex, _value: &T) {
    }

    /// `INVOKE*`: produces the call's return value (never called for
    /// `void`-returning calls).
    fn invoke(
        &mut self,
        _bci: ProgramCounter,
        _opcode: Opcode,
        _cpi: ConstantPoolIndex,
        _args: &[T],
    ) -> T {
        T::top()
    }

    /// The method-handle "appendix" value an indy-family call site pushes
    /// ahead of its arguments.
    fn invoke_appendix(&mut self, _bci: ProgramCounter, _opcode: Opcode, _cpi: ConstantPoolIndex) -> T {
        T::top()
    }

    /// `NEW`/`NEWARRAY`/`ANEWARRAY`/`MULTIANEWARRAY`: produces the new
    /// reference's abstract value.
    fn allocate(&mut self, _bci: ProgramCounter, _opcode: Opcode, _dimensions: &[T]) -> T {
        T::top()
    }

    /// `CHECKCAST`/`INSTANCEOF`: produces a one-slot value.
    fn type_check(&mut self, _bci: ProgramCounter, _opcode: Opcode, _value: &T) -> T {
        T::top()
    }

    /// `ARRAYLENGTH`: produces a one-slot integer.
    fn array_length(&mut self, _bci: ProgramCounter, _array: &T) -> T {
        T::top()
    }

    /// `MONITORENTER`/`MONITOREXIT`: observed only.
    fn monitor(&mut self, _bci: ProgramCounter, _opcode: Opcode, _value: &T) {}

    /// `ATHROW`: observed only; the interpreter treats this bci as a
    /// block terminator with no fall-through successor.
    fn throw(&mut self, _bci: ProgramCounter, _value: &T) {}
}

/// The zero-size analysis that implements no [`Transfer`] method at all:
/// every hook defaults to [`Lattice::top`], so this analysis reaches a
/// fixed point in one iteration per block.
#[derive(Debug, Clone, Copy, Default)]
pub struct TopAnalysis;

impl Transfer<()> for TopAnalysis {}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn top_analysis_constant_is_unit() {
        let mut analysis = TopAnalysis;
        let value = analysis.constant(ProgramCounter::ZERO, Opcode::Iconst0, None);
        assert_eq!(value, ());
    }
}
