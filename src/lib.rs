//! Multi-step MapReduce jobs over a streaming execution engine.
//!
//! A single executable acts as the job orchestrator and, when re-invoked on a
//! worker with `--stage`/`--step`, as the per-record mapper, combiner or
//! reducer. Jobs run either on an on-premise cluster through the streaming
//! jar, or on a managed cluster through a REST job service. Intermediate data
//! between steps lives on the distributed filesystem or an S3-compatible
//! object store.

pub mod backend;
pub mod cache;
pub mod cmd;
pub mod error;
pub mod fs;
pub mod harness;
pub mod job;
pub mod logging;
pub mod protocol;
pub mod relay;
pub mod reporter;
pub mod runner;
pub mod standalone;
pub mod step;
pub mod workload;

pub use cache::{AggregationCache, Evict, OnEvict};
pub use error::{Error, Result};
pub use job::JobDescriptor;
pub use runner::{Runner, Stage};
pub use step::{Combiner, Mapper, Reducer, StageInput, StageOutput, Step};

/////////////////////////////////////////////////////////////////////////////
// Key-value pairs
/////////////////////////////////////////////////////////////////////////////

/// A single key-value record.
///
/// Keys and values are independently typed; which types appear depends on
/// the [`protocol`] used to decode or encode them.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct KeyValue<K, V> {
    /// The key.
    pub key: K,
    /// The value.
    pub value: V,
}

impl<K, V> KeyValue<K, V> {
    /// Construct a new key-value pair from the given key and value.
    pub fn new(key: K, value: V) -> Self {
        Self { key, value }
    }

    /// Consumes the key-value pair and returns the key.
    #[inline]
    pub fn into_key(self) -> K {
        self.key
    }

    /// Consumes the key-value pair and returns the value.
    #[inline]
    pub fn into_value(self) -> V {
        self.value
    }

    /// Splits the pair into its parts.
    #[inline]
    pub fn into_parts(self) -> (K, V) {
        (self.key, self.value)
    }
}
