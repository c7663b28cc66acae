//! Small newtypes shared across the interpreter and debug-info subsystems.

use std::fmt;

/// A bytecode-code index: the byte offset of an instruction within a
/// method's code array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct ProgramCounter(pub u16);

impl ProgramCounter {
    /// The entry bci of a method (`0`).
    pub const ZERO: Self = Self(0);

    /// Returns the bci `self + delta`, saturating at `u16::MAX`.
    #[must_use]
    pub fn offset(self, delta: i32) -> Self {
        let value = i32::from(self.0) + delta;
        Self(value.clamp(0, i32::from(u16::MAX)) as u16)
    }
}

impl From<u16> for ProgramCounter {
    fn from(value: u16) -> Self {
        Self(value)
    }
}

impl From<ProgramCounter> for u16 {
    fn from(pc: ProgramCounter) -> Self {
        pc.0
    }
}

impl fmt::Display for ProgramCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A constant-pool index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct ConstantPoolIndex(pub u16);

impl From<u16> for ConstantPoolIndex {
    fn from(value: u16) -> Self {
        Self(value)
    }
}

impl fmt::Display for ConstantPoolIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A byte offset within a compiled method's native code (used by the
/// debug-info model's ranges, as distinct from a bytecode [`ProgramCounter`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct CodeOffset(pub u32);

impl From<u32> for CodeOffset {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl fmt::Display for CodeOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "+{:#x}", self.0)
    }
}
