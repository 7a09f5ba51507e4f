//! Counts the values of one field across JSON lines.

use anyhow::Result;
use async_trait::async_trait;
use clap::Parser;
use serde_json::Value;

use crate::protocol::{json_input, JsonInternal};
use crate::step::{Combiner, Mapper, Reducer, StageInput, StageOutput, Step};
use crate::{reporter, workload};

#[derive(Parser, Debug)]
#[clap(no_binary_name = true)]
pub(super) struct Args {
    /// Field whose values are counted
    #[clap(long, default_value = "key_field")]
    pub(super) field: String,
}

pub fn steps(args: &[String]) -> Result<Vec<Box<dyn Step>>> {
    let args = Args::try_parse_from(args)?;
    Ok(vec![Box::new(JsonEntryCounter::new(args.field))])
}

/// Emits `(value, 1)` for the field of every record that has it.
pub struct JsonEntryCounter {
    field: String,
}

impl JsonEntryCounter {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
        }
    }
}

#[async_trait]
impl Mapper for JsonEntryCounter {
    async fn map(&self, input: StageInput, output: StageOutput) -> Result<()> {
        let mut records = json_input(input);
        let mut out = JsonInternal::encoder::<Value, i64, _>(output);

        while let Some(mut record) = records.next().await {
            match record.get_mut(&self.field).map(Value::take) {
                Some(value) => out.send(value, 1).await?,
                None => reporter::counter("JsonEntryCounter", "missing field", 1),
            }
        }

        records.finish().await?;
        out.finish().await?;
        Ok(())
    }
}

#[async_trait]
impl Reducer for JsonEntryCounter {
    async fn reduce(&self, input: StageInput, output: StageOutput) -> Result<()> {
        workload::sum_values(input, output).await
    }
}

#[async_trait]
impl Combiner for JsonEntryCounter {
    async fn combine(&self, input: StageInput, output: StageOutput) -> Result<()> {
        workload::sum_values(input, output).await
    }
}

impl Step for JsonEntryCounter {
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

    #[tokio::test]
    async fn counts_entries() {
        let input: &[u8] = b"{\"key_field\":\"a\"}
{\"key_field\":\"z\"}
{\"key_field\":\"another\"}
{\"other\":\"q\"}
{\"key_field\":\"z\"}
{\"key_field\":\"z\"}
{\"key_field\":\"a\"}
";
        harness::assert_step(
            &JsonEntryCounter::new("key_field"),
            input,
            "\"a\"\t2\n\"another\"\t1\n\"z\"\t3",
        )
        .await;
    }
}
