//! Two-step histogram: how many distinct values of a field occur exactly
//! `n` times.
//!
//! Step one is [`JsonEntryCounter`]. Step two re-keys its `value\tcount`
//! output by count and sums.

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use clap::Parser;
use serde_json::Value;

use super::entry_count::{Args, JsonEntryCounter};
use crate::protocol::{JsonInternal, RawJsonInternal};
use crate::step::{Mapper, Reducer, StageInput, StageOutput, Step};
use crate::{reporter, workload};

pub fn steps(args: &[String]) -> Result<Vec<Box<dyn Step>>> {
    let args = Args::try_parse_from(args)?;
    Ok(vec![
        Box::new(JsonEntryCounter::new(args.field)),
        Box::new(CountHistogram),
    ])
}

/// Emits `(count, 1)` for every `key\tcount` line.
pub struct CountHistogram;

#[async_trait]
impl Mapper for CountHistogram {
    async fn map(&self, input: StageInput, output: StageOutput) -> Result<()> {
        let mut pairs = RawJsonInternal::decode_pairs(input);
        let mut out = JsonInternal::encoder::<i64, i64, _>(output);

        while let Some(pair) = pairs.next().await {
            let (_key, count): (Bytes, Value) = pair.into_parts();
            match count.as_i64() {
                Some(count) => out.send(count, 1).await?,
                None => reporter::counter("CountHistogram", "non-integer count", 1),
            }
        }

        pairs.finish().await?;
        out.finish().await?;
        Ok(())
    }
}

#[async_trait]
impl Reducer for CountHistogram {
    async fn reduce(&self, input: StageInput, output: StageOutput) -> Result<()> {
        workload::sum_values(input, output).await
    }
}

impl Step for CountHistogram {
    fn as_mapper(&self) -> Option<&dyn Mapper> {
        Some(self)
    }

    fn reducer_tasks(&self) -> Option<usize> {
        Some(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness;

    #[tokio::test]
    async fn histograms_counts() {
        let input: &[u8] = b"\"a\"\t2\n\"another\"\t1\n\"q\"\t2\n\"z\"\t3\n";
        harness::assert_step(&CountHistogram, input, "1\t1\n2\t2\n3\t1").await;
    }

    #[test]
    fn builds_two_steps() {
        let steps = steps(&["--field=user".to_string()]).unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[1].reducer_tasks(), Some(1));
        assert!(steps[0].as_combiner().is_some());
    }
}
