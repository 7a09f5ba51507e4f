//! Command-line flags for the binaries in `src/app`.

pub mod job;
pub mod runner;
pub mod standalone;
