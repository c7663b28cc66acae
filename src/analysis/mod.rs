//! The generic worklist fixed-point engine (C2/driver half of C3) and the
//! basic-block partitioning collaborator (C2).

pub mod cfg;
pub mod fixed_point;

pub use cfg::BlockCfg;
pub use fixed_point::{Analyzer, CancellationToken};
