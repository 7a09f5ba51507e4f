use anyhow::{Context, Result};
use clap::Parser;
use mrstream::cmd::job::JobArgs;
use mrstream::{workload, Runner};

#[tokio::main]
async fn main() -> Result<()> {
    let args = JobArgs::parse();
    let steps = workload::named(&args.workload)?.steps(&args.args)?;

    let mut runner = Runner::new(args.workload.clone(), args.runner.clone())
        .with_steps(steps)
        .with_input(args.input.iter().cloned())
        .with_output(args.output.clone())
        .with_reducer_tasks(args.reducer_tasks)
        .with_compressed_output(args.compress_output)
        .with_passthrough(args.passthrough());
    for (key, value) in &args.properties {
        runner = runner.with_property(key, value);
    }

    runner
        .run()
        .await
        .with_context(|| format!("running workload {}", args.workload))
}
