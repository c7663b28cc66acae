//! A JVM-bytecode abstract interpreter and DWARF debug-info emitter for
//! ahead-of-time and JIT-compiled methods.
//!
//! The crate is organized around three mostly-independent layers:
//!
//! - [`frame`]/[`interp`]/[`analysis`]: a generic abstract interpreter
//!   (parametrized over any [`frame::Lattice`]-shaped value type) driven to a
//!   fixed point by a reusable worklist engine.
//! - [`debuginfo`]: a normalized debug-entry model, a two-pass DWARF section
//!   encoder, and the runtime GDB JIT-registration interface.
//! - [`bindings`]/[`types`]/[`common`]: the external collaborator traits and
//!   shared value types both layers are built over.

pub mod analysis;
pub mod bindings;
pub mod common;
pub mod config;
pub mod debuginfo;
pub mod frame;
pub mod interp;
pub mod types;

pub use common::{CodeOffset, ConstantPoolIndex, ProgramCounter};

use thiserror::Error;

/// The crate's unified error type.
///
/// Each subsystem defines its own focused error enum; this type exists only
/// at the boundary where a caller drives more than one subsystem (e.g. an
/// analysis pass feeding a DWARF emission) and needs one type to propagate
/// with `?`.
#[derive(Debug, Error)]
pub enum Error {
    /// An abstract-interpretation pass failed.
    #[error(transparent)]
    Analysis(#[from] interp::AnalysisError),
    /// Encoding or laying out DWARF sections failed.
    #[error(transparent)]
    Emitter(#[from] debuginfo::EmitterError),
    /// A frame/stack/local-variable-table operation failed outside the
    /// context of a running analysis (e.g. constructing a synthetic frame).
    #[error(transparent)]
    Frame(#[from] frame::FrameError),
    /// Registering or unregistering a JIT code entry failed.
    #[error(transparent)]
    Registration(#[from] debuginfo::RegistrationError),
}
