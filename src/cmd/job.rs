use clap::Parser;

use super::runner::RunnerFlags;

/// Runs a named workload on a cluster.
///
/// Operators pass `--submit-job` with the inputs; the cluster re-runs this
/// binary with `--stage` and `--step` for every task.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct JobArgs {
    /// Name of the workload
    #[arg(short, long)]
    pub workload: String,

    /// Input locations, globs allowed
    #[arg(short, long)]
    pub input: Vec<String>,

    /// Final output location
    #[arg(short, long)]
    pub output: Option<String>,

    /// Default number of reduce tasks per step
    #[arg(long, default_value_t = crate::runner::DEFAULT_REDUCER_TASKS)]
    pub reducer_tasks: usize,

    /// Gzip the final output
    #[arg(long)]
    pub compress_output: bool,

    /// Engine properties, as key=value
    #[arg(short = 'D', value_parser = parse_property)]
    pub properties: Vec<(String, String)>,

    #[command(flatten)]
    pub runner: RunnerFlags,

    /// Auxiliary arguments to pass to the workload.
    #[clap(value_parser, last = true)]
    pub args: Vec<String>,
}

impl JobArgs {
    /// Flags every task needs to rebuild the same pipeline.
    pub fn passthrough(&self) -> Vec<String> {
        let mut args = vec![format!("--workload={}", self.workload)];
        if !self.args.is_empty() {
            args.push("--".to_string());
            args.extend(self.args.iter().cloned());
        }
        args
    }
}

fn parse_property(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got {s:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_submission() {
        let args = JobArgs::try_parse_from([
            "mrs-job",
            "--submit-job",
            "-w",
            "entry-histogram",
            "-i",
            "logs/a*.json",
            "-i",
            "s3://other/b.json",
            "-D",
            "mapred.map.tasks=8",
            "--",
            "--field=user",
        ])
        .unwrap();
        assert!(args.runner.submit_job);
        assert_eq!(args.input.len(), 2);
        assert_eq!(
            args.properties,
            vec![("mapred.map.tasks".to_string(), "8".to_string())]
        );
        assert_eq!(
            args.passthrough(),
            vec!["--workload=entry-histogram", "--", "--field=user"]
        );
    }

    #[test]
    fn rejects_bad_property() {
        assert!(parse_property("novalue").is_err());
        assert!(parse_property("=x").is_err());
    }
}
