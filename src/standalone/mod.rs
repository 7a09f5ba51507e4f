//! Runs pipelines on one machine, with the test harness standing in for
//! the cluster's shuffle.

pub mod engine;

pub use crate::cmd::standalone::Job;
