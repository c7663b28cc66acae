//! The interpreter's unified failure type.

use thiserror::Error;

use crate::analysis::fixed_point::Cancellable;
use crate::common::ProgramCounter;
use crate::frame::FrameError;

/// Every way an abstract-interpretation pass can fail.
///
/// A failure aborts analysis outright; partial per-bci state is discarded
/// by the caller rather than surfaced.
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// A frame-level failure (stack underflow, missing local, merge
    /// mismatch) occurred while interpreting the instruction at `at`.
    #[error("at {at}: {source}")]
    Frame {
        at: ProgramCounter,
        #[source]
        source: FrameError,
    },
    /// The opcode at `at` is not supported by this interpreter (`JSR`,
    /// `RET`, `JSR_W`, `BREAKPOINT`).
    #[error("unsupported opcode {opcode} at {at}")]
    UnsupportedOpcode {
        opcode: crate::interp::opcode::Opcode,
        at: ProgramCounter,
    },
    /// The bytecode stream could not be decoded: truncated operand, a
    /// branch or switch target outside the method, or an invalid opcode
    /// byte.
    #[error("malformed bytecode at {at}: {reason}")]
    MalformedBytecode { at: ProgramCounter, reason: String },
    /// A constant-pool/metadata collaborator failed in a way that is not a
    /// resolution failure (those are silently swallowed upstream) but an
    /// infrastructure error that must propagate.
    #[error("metadata resolution failed at {at}: {reason}")]
    MetadataFailure { at: ProgramCounter, reason: String },
}

impl AnalysisError {
    /// Wraps a [`FrameError`] observed while interpreting the instruction
    /// at `at`.
    #[must_use]
    pub fn frame(at: ProgramCounter, source: FrameError) -> Self {
        Self::Frame { at, source }
    }
}

/// [`AnalysisError`] wrapped with the worklist driver's cancellation
/// outcome.
pub type AnalysisResult<T> = Result<T, Cancellable<AnalysisError>>;
