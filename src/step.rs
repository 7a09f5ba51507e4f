//! The unit of work in a job pipeline.
//!
//! Every step reduces. Mapping and combining are optional capabilities a
//! step advertises through [`Step::as_mapper`] and [`Step::as_combiner`];
//! the runner and the test harness look them up once when dispatching a
//! stage.

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

/// Byte stream a stage reads from (standard input on a worker).
pub type StageInput = Box<dyn AsyncRead + Send + Unpin>;

/// Byte stream a stage writes to (standard output on a worker).
pub type StageOutput = Box<dyn AsyncWrite + Send + Unpin>;

#[async_trait]
pub trait Mapper: Send + Sync {
    async fn map(&self, input: StageInput, output: StageOutput) -> anyhow::Result<()>;
}

#[async_trait]
pub trait Reducer: Send + Sync {
    async fn reduce(&self, input: StageInput, output: StageOutput) -> anyhow::Result<()>;
}

#[async_trait]
pub trait Combiner: Send + Sync {
    async fn combine(&self, input: StageInput, output: StageOutput) -> anyhow::Result<()>;
}

/// One map/combine/reduce round of a pipeline.
pub trait Step: Reducer {
    /// The mapper for this step. Steps without one copy their input
    /// through unchanged.
    fn as_mapper(&self) -> Option<&dyn Mapper> {
        None
    }

    fn as_combiner(&self) -> Option<&dyn Combiner> {
        None
    }

    /// Overrides the runner's default number of reduce tasks.
    fn reducer_tasks(&self) -> Option<usize> {
        None
    }
}
