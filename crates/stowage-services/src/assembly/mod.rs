//! Assembly Engine
//!
//! Turns a READY_TO_ASSEMBLE upload into a published, verified artifact and
//! recovers assemblies interrupted by a crash.

mod engine;
mod recovery;

pub use engine::{AssemblyConfig, AssemblyEngine};
pub use recovery::RecoveryReport;
