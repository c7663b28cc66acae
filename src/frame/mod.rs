//! The abstract execution frame: operand stack + local-variable table.
//!
//! The frame is parametrized over any abstract value type `T`, so the same
//! stack/locals bookkeeping can drive arbitrary dataflow analyses without
//! rewriting the slot-accounting rules for each one.

mod lattice;
mod lvt;
mod stack;

pub use lattice::Lattice;
pub use lvt::LocalVariableTable;
pub use stack::OperandStack;

use thiserror::Error;

/// The width, in 32-bit slots, that a value occupies on the operand stack or
/// in the local-variable table.
///
/// `long` and `double` occupy [`Slots::Two`]; every other JVM type occupies
/// [`Slots::One`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slots {
    /// A single 32-bit addressable position.
    One,
    /// Two adjacent 32-bit addressable positions.
    Two,
}

impl Slots {
    /// The number of 32-bit positions this width occupies.
    #[must_use]
    pub const fn count(self) -> u16 {
        match self {
            Self::One => 1,
            Self::Two => 2,
        }
    }
}

/// A value together with the number of stack/local slots it occupies.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SizedValue<T> {
    /// The abstract value carried at this position.
    pub value: T,
    /// The slot width of the value.
    pub slots: Slots,
}

impl<T> SizedValue<T> {
    /// Creates a new one-slot value.
    pub const fn one(value: T) -> Self {
        Self {
            value,
            slots: Slots::One,
        }
    }

    /// Creates a new two-slot value.
    pub const fn two(value: T) -> Self {
        Self {
            value,
            slots: Slots::Two,
        }
    }

    /// Creates a value of the given width.
    pub const fn new(value: T, slots: Slots) -> Self {
        Self { value, slots }
    }

    /// Maps the carried value, preserving the slot width.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> SizedValue<U> {
        SizedValue {
            value: f(self.value),
            slots: self.slots,
        }
    }
}

/// Errors raised while manipulating an [`OperandStack`], [`LocalVariableTable`],
/// or [`AbstractFrame`].
///
/// These correspond to the `StackUnderflow`, `MissingLocal`, `SlotMismatch`,
/// and `StackShapeMismatch` variants of the crate's error taxonomy.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum FrameError {
    /// `pop`/`peek` was attempted on an empty operand stack.
    #[error("operand stack underflow")]
    StackUnderflow,
    /// `get` was attempted for a local-variable-table index with no stored
    /// value.
    #[error("no local variable stored at index {0}")]
    MissingLocal(u16),
    /// Two frames were merged but a stack position disagreed on slot width.
    #[error("slot width mismatch at stack position {position}")]
    SlotMismatch {
        /// The stack position (0 = bottom of stack) at which the mismatch
        /// was observed.
        position: usize,
    },
    /// Two operand stacks of different lengths were merged.
    #[error("operand stack shape mismatch: {left} vs {right}")]
    StackShapeMismatch {
        /// Length of the left-hand stack.
        left: usize,
        /// Length of the right-hand stack.
        right: usize,
    },
}

/// The operand stack + local-variable table that the interpreter threads
/// through a method's bytecode.
///
/// `merge_with` runs a pointwise merge over matching stack/local positions;
/// failures propagate as [`FrameError`]s rather than panicking, since a
/// merge failure during analysis is recoverable (it aborts the analysis,
/// not the process).
#[derive(Debug, Clone)]
pub struct AbstractFrame<T> {
    /// The operand stack.
    pub stack: OperandStack<T>,
    /// The local-variable table.
    pub locals: LocalVariableTable<T>,
}

impl<T: Clone> AbstractFrame<T> {
    /// Creates an empty frame.
    #[must_use]
    pub fn new() -> Self {
        Self {
            stack: OperandStack::new(),
            locals: LocalVariableTable::new(),
        }
    }

    /// Merges `self` with `other` using `merge_fn` for each overlapping
    /// value.
    ///
    /// The stack shapes must match exactly (`StackShapeMismatch` otherwise);
    /// the local-variable tables are merged over the *intersection* of
    /// defined indices.
    pub fn merge_with(
        &self,
        other: &Self,
        mut merge_fn: impl FnMut(&T, &T) -> T,
    ) -> Result<Self, FrameError> {
        let stack = self.stack.merge(&other.stack, &mut merge_fn)?;
        let locals = self.locals.merge(&other.locals, &mut merge_fn);
        Ok(Self { stack, locals })
    }
}

impl<T: Clone> Default for AbstractFrame<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: PartialEq> PartialEq for AbstractFrame<T> {
    fn eq(&self, other: &Self) -> bool {
        self.stack == other.stack && self.locals == other.locals
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn copy_equals_self() {
        let mut frame: AbstractFrame<i32> = AbstractFrame::new();
        frame.stack.push(SizedValue::one(1));
        frame.locals.put(0, SizedValue::one(2));
        let copy = frame.clone();
        assert_eq!(frame, copy);
    }

    #[test]
    fn merge_with_self_is_identity() {
        let mut frame: AbstractFrame<i32> = AbstractFrame::new();
        frame.stack.push(SizedValue::one(7));
        frame.locals.put(0, SizedValue::one(9));
        let merged = frame.merge_with(&frame, |a, _| *a).unwrap();
        assert_eq!(frame, merged);
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    /// Builds a same-shaped pair of one-slot-only frames so the merge is
    /// guaranteed to succeed, carrying small integers joined by `max`.
    fn frame_pair_strategy() -> impl Strategy<Value = (Vec<i32>, Vec<i32>)> {
        (1_usize..6).prop_flat_map(|len| {
            (
                prop::collection::vec(-50_i32..50, len),
                prop::collection::vec(-50_i32..50, len),
            )
        })
    }

    fn frame_from(values: &[i32]) -> AbstractFrame<i32> {
        let mut frame = AbstractFrame::new();
        for &v in values {
            frame.stack.push(SizedValue::one(v));
        }
        frame
    }

    proptest! {
        #[test]
        fn merge_is_commutative((left, right) in frame_pair_strategy()) {
            let a = frame_from(&left);
            let b = frame_from(&right);
            let join = |x: &i32, y: &i32| *x.max(y);
            let ab = a.merge_with(&b, join).unwrap();
            let ba = b.merge_with(&a, join).unwrap();
            prop_assert_eq!(ab, ba);
        }

        #[test]
        fn merge_preserves_slot_width((left, right) in frame_pair_strategy()) {
            let a = frame_from(&left);
            let b = frame_from(&right);
            let merged = a.merge_with(&b, |x, y| *x.max(y)).unwrap();
            prop_assert_eq!(merged.stack.slot_height(), a.stack.slot_height());
            prop_assert_eq!(a.stack.len(), merged.stack.iter().count());
        }

        #[test]
        fn merge_with_self_is_identity_any_values(values in prop::collection::vec(-50_i32..50, 0..6)) {
            let frame = frame_from(&values);
            let merged = frame.merge_with(&frame, |x, _| *x).unwrap();
            prop_assert_eq!(frame, merged);
        }
    }
}
