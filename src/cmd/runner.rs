use std::path::PathBuf;

use clap::Args;

use crate::runner::Stage;

/// Flags every job binary accepts.
///
/// `--stage`, `--step` and `--remote-logger` are set by the orchestrator on
/// the command lines it hands to the cluster; operators only pass
/// `--submit-job` and the backend settings.
#[derive(Args, Debug, Clone, Default)]
pub struct RunnerFlags {
    /// Submit the job to the cluster
    #[arg(long)]
    pub submit_job: bool,

    /// Run one stage of a step: mapper, reducer or combiner
    #[arg(long, hide = true)]
    pub stage: Option<Stage>,

    /// The step to execute
    #[arg(long, default_value_t = 0, hide = true)]
    pub step: usize,

    /// Address of the orchestrator's log relay
    #[arg(long, hide = true)]
    pub remote_logger: Option<String>,

    /// Credentials file for the cloud job service; selects the cloud backend
    #[arg(long, env = "MRS_CREDENTIALS")]
    pub credentials: Option<PathBuf>,

    /// Cloud project
    #[arg(long, env = "MRS_PROJECT")]
    pub project: Option<String>,

    /// Cloud region
    #[arg(long, env = "MRS_REGION")]
    pub region: Option<String>,

    /// Cluster jobs are placed on
    #[arg(long, env = "MRS_CLUSTER")]
    pub cluster: Option<String>,

    /// Bucket for the executable, staged files and job output
    #[arg(long, env = "MRS_BUCKET")]
    pub bucket: Option<String>,

    /// Root URL of the cloud job service
    #[arg(long, env = "MRS_API_ENDPOINT")]
    pub api_endpoint: Option<String>,

    /// Endpoint of an S3-compatible store, when not AWS
    #[arg(long, env = "MRS_STORAGE_ENDPOINT")]
    pub storage_endpoint: Option<String>,

    /// Hadoop installation root
    #[arg(long, env = "HADOOP_HOME")]
    pub hadoop_home: Option<PathBuf>,

    /// Streaming jar, instead of searching HADOOP_HOME for one
    #[arg(long, env = "HADOOP_STREAMING_JAR")]
    pub streaming_jar: Option<PathBuf>,
}

/// Settings of the cloud backend, all present.
#[derive(Debug, Clone, PartialEq)]
pub struct CloudSettings {
    pub credentials: PathBuf,
    pub project: String,
    pub region: String,
    pub cluster: String,
    pub bucket: String,
    pub api_endpoint: String,
    pub storage_endpoint: Option<String>,
}

impl RunnerFlags {
    /// The cloud settings when credentials are given. Missing companions of
    /// the credentials are reported by flag name.
    pub fn cloud(&self) -> Result<Option<CloudSettings>, String> {
        let Some(credentials) = self.credentials.clone() else {
            return Ok(None);
        };
        let require = |value: &Option<String>, flag: &str| {
            value
                .clone()
                .filter(|v| !v.is_empty())
                .ok_or_else(|| format!("missing --{flag}"))
        };
        Ok(Some(CloudSettings {
            credentials,
            project: require(&self.project, "project")?,
            cluster: require(&self.cluster, "cluster")?,
            region: require(&self.region, "region")?,
            bucket: require(&self.bucket, "bucket")?,
            api_endpoint: require(&self.api_endpoint, "api-endpoint")?,
            storage_endpoint: self.storage_endpoint.clone(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Cli {
        #[command(flatten)]
        runner: RunnerFlags,
    }

    #[test]
    fn parses_worker_flags() {
        let cli = Cli::try_parse_from([
            "job",
            "--remote-logger=host:4000",
            "--step=1",
            "--stage=combiner",
        ])
        .unwrap();
        assert_eq!(cli.runner.stage, Some(Stage::Combiner));
        assert_eq!(cli.runner.step, 1);
        assert_eq!(cli.runner.remote_logger.as_deref(), Some("host:4000"));
        assert!(!cli.runner.submit_job);
    }

    #[test]
    fn rejects_unknown_stage() {
        assert!(Cli::try_parse_from(["job", "--stage=shuffle"]).is_err());
    }

    #[test]
    fn cloud_settings_need_every_companion() {
        let mut flags = RunnerFlags::default();
        assert_eq!(flags.cloud(), Ok(None));

        flags.credentials = Some("creds.json".into());
        flags.project = Some("proj".into());
        assert_eq!(flags.cloud(), Err("missing --cluster".to_string()));

        flags.cluster = Some("c".into());
        flags.region = Some("r".into());
        flags.bucket = Some("b".into());
        flags.api_endpoint = Some("https://jobs.example.com".into());
        let cloud = flags.cloud().unwrap().unwrap();
        assert_eq!(cloud.bucket, "b");
    }
}
