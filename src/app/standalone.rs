use anyhow::Result;
use clap::Parser;
use mrstream::cmd::standalone::{Args, Commands};
use mrstream::standalone::{engine::perform_job, Job};
use mrstream::{logging, workload};

fn parse_args() -> Option<Job> {
    let args = Args::parse();
    match args.command {
        Commands::Submit {
            input,
            workload,
            output,
            args,
        } => Some(Job {
            input,
            workload,
            output,
            args,
        }),
        Commands::Workloads => None,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init()?;
    let Some(job) = parse_args() else {
        for name in workload::NAMES {
            println!("{name}");
        }
        return Ok(());
    };
    let steps = workload::named(&job.workload)?.steps(&job.args)?;
    perform_job(&job, &steps).await
}
