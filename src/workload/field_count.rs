//! Counts how often each top-level field name appears across JSON lines.
//!
//! Every line also bumps `lines_read`, so the output tells how many lines
//! were seen next to the per-field totals.

use anyhow::Result;
use async_trait::async_trait;
use clap::Parser;
use tracing::{debug, warn};

use crate::cache::AggregationCache;
use crate::protocol::{json_input, JsonInternal};
use crate::step::{Combiner, Mapper, Reducer, StageInput, StageOutput, Step};
use crate::{reporter, workload};

pub const LINES_READ: &str = "lines_read";

#[derive(Parser, Debug)]
#[clap(no_binary_name = true)]
struct Args {
    /// Distinct field names counted in memory before the oldest is emitted
    #[clap(long, default_value_t = 1000)]
    cache_size: usize,
}

pub fn steps(args: &[String]) -> Result<Vec<Box<dyn Step>>> {
    let args = Args::try_parse_from(args)?;
    anyhow::ensure!(args.cache_size > 0, "--cache-size must be at least 1");
    Ok(vec![Box::new(JsonFieldCounter::new(args.cache_size))])
}

pub struct JsonFieldCounter {
    cache_size: usize,
}

impl JsonFieldCounter {
    pub fn new(cache_size: usize) -> Self {
        Self { cache_size }
    }
}

#[async_trait]
impl Mapper for JsonFieldCounter {
    async fn map(&self, input: StageInput, output: StageOutput) -> Result<()> {
        let mut records = json_input(input);
        let mut out = JsonInternal::encoder::<String, i64, _>(output);
        let mut cache = AggregationCache::new(self.cache_size, Vec::new());

        while let Some(record) = records.next().await {
            cache.increment(LINES_READ.to_string(), 1);
            match record.as_object() {
                Some(fields) => {
                    for field in fields.keys() {
                        cache.increment(field.clone(), 1);
                    }
                }
                None => {
                    reporter::counter("JsonFieldCounter", "not an object", 1);
                    warn!("skipping non-object record {record}");
                }
            }
            for (field, n) in cache.sink_mut().drain(..) {
                out.send(field, n).await?;
            }
        }

        cache.flush();
        for (field, n) in cache.into_sink() {
            out.send(field, n).await?;
        }
        let invalid = records.finish().await?;
        let written = out.finish().await?;
        debug!("wrote {written} field counts, dropped {invalid} lines");
        Ok(())
    }
}

#[async_trait]
impl Reducer for JsonFieldCounter {
    async fn reduce(&self, input: StageInput, output: StageOutput) -> Result<()> {
        workload::sum_values(input, output).await
    }
}

#[async_trait]
impl Combiner for JsonFieldCounter {
    async fn combine(&self, input: StageInput, output: StageOutput) -> Result<()> {
        workload::sum_values(input, output).await
    }
}

impl Step for JsonFieldCounter {
    fn as_mapper(&self) -> Option<&dyn Mapper> {
        Some(self)
    }

    fn as_combiner(&self) -> Option<&dyn Combiner> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness;

    const INPUT: &[u8] = b"{\"key_field\":\"z\"}
{\"key_field\":\"a\"}
{\"key_field\":\"another\"}
{\"key_field\":\"z\"}
{\"key_field\":\"z\"}
{\"another_key\":\"a\"}
";

    const EXPECTED: &str = "\"another_key\"\t1\n\"key_field\"\t5\n\"lines_read\"\t6";

    #[tokio::test]
    async fn counts_fields_and_lines() {
        harness::assert_step(&JsonFieldCounter::new(100), INPUT, EXPECTED).await;
    }

    #[tokio::test]
    async fn tiny_cache_gives_the_same_totals() {
        harness::assert_step(&JsonFieldCounter::new(1), INPUT, EXPECTED).await;
    }

    #[test]
    fn rejects_empty_cache() {
        assert!(steps(&["--cache-size=0".to_string()]).is_err());
        assert_eq!(steps(&[]).unwrap().len(), 1);
    }
}
