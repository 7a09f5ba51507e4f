//! Strategies for running a [`JobDescriptor`] on a cluster.
//!
//! [`hadoop`] shells out to the streaming jar on an on-prem install and
//! waits for the process. [`cloud`] posts the job to a managed job service
//! and polls it until it reaches a terminal state. Either way `submit`
//! returns only once the job is finished, so the runner can chain steps.

use async_trait::async_trait;

use crate::error::Result;
use crate::job::JobDescriptor;

pub mod cloud;
pub mod hadoop;

pub use cloud::{CloudBackend, JobService, RestJobService};
pub use hadoop::HadoopBackend;

#[async_trait]
pub trait Backend: Send + Sync {
    /// Runs `job` to completion. Any error fails the step.
    async fn submit(&self, job: &JobDescriptor) -> Result<()>;
}
