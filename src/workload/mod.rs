//! Converts workload names to pipelines of steps.
//!
//! # Example
//!
//! To get the two-step histogram pipeline:
//! ```
//! # use anyhow::Result;
//! use mrstream::workload;
//! # fn main() -> Result<()> {
//! let steps = workload::named("entry-histogram")?.steps(&["--field=user".to_string()])?;
//! assert_eq!(steps.len(), 2);
//! # Ok(())
//! # }
//! ```

use anyhow::{bail, Result};
use bytes::Bytes;
use tracing::warn;

use crate::protocol::RawJsonInternal;
use crate::reporter;
use crate::step::{StageInput, StageOutput, Step};

pub mod entry_count;
pub mod field_count;
pub mod histogram;

/// Names accepted by [`named`].
pub const NAMES: [&str; 3] = ["field-count", "entry-count", "entry-histogram"];

/// A named pipeline. `build` parses the workload's own arguments.
#[derive(Clone, Copy)]
pub struct Workload {
    pub build: fn(&[String]) -> Result<Vec<Box<dyn Step>>>,
}

impl Workload {
    pub fn steps(&self, args: &[String]) -> Result<Vec<Box<dyn Step>>> {
        (self.build)(args)
    }
}

/// Gets the [`Workload`] named `name`.
///
/// Returns [`None`] if no workload with the given name was found.
pub fn try_named(name: &str) -> Option<Workload> {
    match name {
        "field-count" => Some(Workload {
            build: field_count::steps,
        }),
        "entry-count" => Some(Workload {
            build: entry_count::steps,
        }),
        "entry-histogram" => Some(Workload {
            build: histogram::steps,
        }),
        _ => None,
    }
}

/// Gets the [`Workload`] named `name`.
///
/// Returns an [`anyhow::Error`] if no workload with the given name was found.
pub fn named(name: &str) -> Result<Workload> {
    match try_named(name) {
        Some(workload) => Ok(workload),
        None => bail!("No workload named `{}` found. Known: {}", name, NAMES.join(", ")),
    }
}

/// Sums the integer values of each key group, writing `key\tsum`.
///
/// Keys are passed through as raw bytes. A value that isn't an integer is
/// counted and skipped.
pub async fn sum_values(input: StageInput, output: StageOutput) -> Result<()> {
    let mut groups = RawJsonInternal::decode_groups(input);
    let mut out = RawJsonInternal::encoder::<Bytes, i64, _>(output);

    while let Some(mut group) = groups.next().await {
        let mut sum = 0i64;
        while let Some(value) = group.next().await {
            match value.as_i64() {
                Some(n) => sum += n,
                None => {
                    reporter::counter("sum", "non-integer value", 1);
                    warn!("skipping non-integer value {value} for key {:?}", group.key);
                }
            }
        }
        out.send(group.key, sum).await?;
    }

    groups.finish().await?;
    out.finish().await?;
    Ok(())
}
