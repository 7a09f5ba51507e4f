//! Error taxonomy shared by the orchestrator and the worker stages.
//!
//! Data errors (malformed lines, values of the wrong type) never show up
//! here: they are counted through the reporter, logged and skipped.

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum Error {
    /// Missing or contradictory configuration. Fatal before any work starts.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A stream stage stopped before its input was exhausted.
    #[error("stream closed: {0}")]
    StreamClosed(String),

    #[error("streaming jar not found: {0}")]
    JarNotFound(String),

    #[error("`{command}` failed: {status}")]
    CommandFailed { command: String, status: String },

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("got status code {status} from {resource}")]
    HttpStatus { status: u16, resource: String },

    #[error("job {job} ended in state {state}")]
    JobFailed { job: String, state: String },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }
}
