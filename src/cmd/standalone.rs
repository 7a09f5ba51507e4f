use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a workload over local files, without a cluster
    Submit {
        /// Glob spec for the input files
        #[arg(short, long)]
        input: String,

        /// Name of the workload
        #[arg(short, long)]
        workload: String,

        /// Output file
        #[arg(short, long)]
        output: String,

        /// Auxiliary arguments to pass to the workload.
        #[clap(value_parser, last = true)]
        args: Vec<String>,
    },
    /// List the workloads that can be run
    Workloads,
}

/// A local run, as parsed from [`Commands::Submit`].
#[derive(Debug, Clone)]
pub struct Job {
    pub input: String,
    pub workload: String,
    pub output: String,
    pub args: Vec<String>,
}
