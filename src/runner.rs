//! The job binary's entry point.
//!
//! The same executable is both the orchestrator and every task the cluster
//! runs. Invoked by an operator with `--submit-job`, it stages itself on
//! the cluster's storage and submits one job per [`Step`]. Each of those
//! jobs runs the executable again with `--stage` and `--step`, which makes
//! it process one stage of one step over standard input and exit.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::Local;
use tokio::io::AsyncWriteExt;
use tracing::{error, info, warn};

use crate::backend::{Backend, CloudBackend, HadoopBackend, RestJobService};
use crate::cmd::runner::{CloudSettings, RunnerFlags};
use crate::error::{Error, Result};
use crate::fs::{HadoopFs, ObjectStore};
use crate::job::{absolute_path, JobDescriptor, DEFAULT_SCHEME};
use crate::relay::{self, LogRelay, PrefixWriter};
use crate::step::{StageInput, StageOutput, Step};
use crate::{logging, reporter};

/// Name the executable is staged under and invoked as on the cluster.
pub const EXECUTABLE_NAME: &str = "mrstream_binary";

pub const DEFAULT_REDUCER_TASKS: usize = 30;

/// Counter group for the CPU audit.
pub const COUNTER_GROUP: &str = "mrstream";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Mapper,
    Reducer,
    Combiner,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Mapper => "mapper",
            Stage::Reducer => "reducer",
            Stage::Combiner => "combiner",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "mapper" => Ok(Stage::Mapper),
            "reducer" => Ok(Stage::Reducer),
            "combiner" => Ok(Stage::Combiner),
            other => Err(Error::config(format!(
                "unknown stage {other:?}, expected mapper, reducer or combiner"
            ))),
        }
    }
}

/// What this invocation does, decided once from the flags.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Neither a stage nor `--submit-job`.
    Unconfigured,
    WorkerMapper { step: usize },
    WorkerReducer { step: usize },
    WorkerCombiner { step: usize },
    Orchestrator,
}

impl Mode {
    pub fn resolve(flags: &RunnerFlags) -> Self {
        match (flags.stage, flags.submit_job) {
            (Some(Stage::Mapper), _) => Mode::WorkerMapper { step: flags.step },
            (Some(Stage::Reducer), _) => Mode::WorkerReducer { step: flags.step },
            (Some(Stage::Combiner), _) => Mode::WorkerCombiner { step: flags.step },
            (None, true) => Mode::Orchestrator,
            (None, false) => Mode::Unconfigured,
        }
    }

    /// The stage and step a worker runs.
    pub fn worker(self) -> Option<(Stage, usize)> {
        match self {
            Mode::WorkerMapper { step } => Some((Stage::Mapper, step)),
            Mode::WorkerReducer { step } => Some((Stage::Reducer, step)),
            Mode::WorkerCombiner { step } => Some((Stage::Combiner, step)),
            Mode::Unconfigured | Mode::Orchestrator => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendKind {
    Hadoop,
    Cloud,
}

/// Where the run stages its files.
enum Storage {
    Hdfs(HadoopFs),
    Object(ObjectStore),
}

/// A linear pipeline of steps and the settings to run it with.
pub struct Runner {
    name: String,
    steps: Vec<Box<dyn Step>>,
    input: Vec<String>,
    output: Option<String>,
    reducer_tasks: usize,
    passthrough: Vec<String>,
    compress_output: bool,
    cache_files: Vec<String>,
    files: Vec<String>,
    properties: BTreeMap<String, String>,
    flags: RunnerFlags,
    backend: BackendKind,
    default_scheme: String,
    tmp_path: String,
}

impl Runner {
    pub fn new(name: impl Into<String>, flags: RunnerFlags) -> Self {
        let name = name.into();
        let tmp_path = tmp_path(&whoami::username(), &name);
        let (backend, default_scheme) = match (&flags.credentials, &flags.bucket) {
            (Some(_), Some(bucket)) => (BackendKind::Cloud, format!("s3://{bucket}/")),
            (Some(_), None) => (BackendKind::Cloud, DEFAULT_SCHEME.to_string()),
            (None, _) => (BackendKind::Hadoop, DEFAULT_SCHEME.to_string()),
        };
        Self {
            name,
            steps: Vec::new(),
            input: Vec::new(),
            output: None,
            reducer_tasks: DEFAULT_REDUCER_TASKS,
            passthrough: Vec::new(),
            compress_output: false,
            cache_files: Vec::new(),
            files: Vec::new(),
            properties: BTreeMap::new(),
            flags,
            backend,
            default_scheme,
            tmp_path,
        }
    }

    pub fn with_step(mut self, step: impl Step + 'static) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    pub fn with_steps(mut self, steps: impl IntoIterator<Item = Box<dyn Step>>) -> Self {
        self.steps.extend(steps);
        self
    }

    /// Input locations: globs, relative to the default scheme or fully
    /// qualified.
    pub fn with_input(mut self, input: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.input.extend(input.into_iter().map(Into::into));
        self
    }

    /// Final output location. Defaults to `<tmp>/output`.
    pub fn with_output(mut self, output: Option<String>) -> Self {
        self.output = output;
        self
    }

    pub fn with_reducer_tasks(mut self, tasks: usize) -> Self {
        self.reducer_tasks = tasks;
        self
    }

    /// Arguments added to every task's command line, ahead of the
    /// runner's own flags.
    pub fn with_passthrough(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.passthrough.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn with_compressed_output(mut self, compress: bool) -> Self {
        self.compress_output = compress;
        self
    }

    /// A distributed-storage file made available to every task.
    pub fn with_cache_file(mut self, file: impl Into<String>) -> Self {
        self.cache_files.push(file.into());
        self
    }

    /// A local file shipped with every job.
    pub fn with_file(mut self, file: impl Into<String>) -> Self {
        self.files.push(file.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> Mode {
        Mode::resolve(&self.flags)
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend
    }

    pub fn default_scheme(&self) -> &str {
        &self.default_scheme
    }

    /// This run's working path, relative to the default scheme.
    pub fn tmp_path(&self) -> &str {
        &self.tmp_path
    }

    /// Runs whatever the flags ask for. In worker mode this never returns:
    /// the process exits with the stage's status.
    pub async fn run(self) -> Result<()> {
        match self.mode() {
            Mode::Unconfigured => Err(Error::config(
                "missing --submit-job (or --stage when run as a task)",
            )),
            Mode::Orchestrator => {
                let _ = logging::init();
                self.run_orchestrator().await
            }
            mode => {
                let Some((stage, step)) = mode.worker() else {
                    return Err(Error::config(format!("{mode:?} is not a worker mode")));
                };
                self.run_worker(stage, step).await
            }
        }
    }

    fn step(&self, index: usize) -> Result<&dyn Step> {
        self.steps.get(index).map(Box::as_ref).ok_or_else(|| {
            Error::config(format!(
                "invalid --step={index} (pipeline has {} steps)",
                self.steps.len()
            ))
        })
    }

    /// Task command line for one stage of one step.
    fn task_command(&self, step: usize, stage: Stage, logger: Option<&str>) -> String {
        // Anything after `--` has to stay last or our flags become positional.
        let split = self
            .passthrough
            .iter()
            .position(|arg| arg == "--")
            .unwrap_or(self.passthrough.len());
        let (flags, trailing) = self.passthrough.split_at(split);

        let mut args = vec![EXECUTABLE_NAME.to_string()];
        args.extend(flags.iter().cloned());
        if let Some(addr) = logger {
            args.push(format!("--remote-logger={addr}"));
        }
        args.push(format!("--step={step}"));
        args.push(format!("--stage={stage}"));
        args.extend(trailing.iter().cloned());
        args.join(" ")
    }

    fn executable_path(&self) -> String {
        format!("{}/{EXECUTABLE_NAME}", self.tmp_path)
    }

    /// The job submitted for step `index`.
    ///
    /// Step 0 reads the runner's input and every later step reads the
    /// previous step's `part-*` files. The last step writes the final
    /// output; earlier ones write under `<tmp>/step_<i>/output`.
    pub fn job_for_step(&self, index: usize, logger: Option<&str>) -> Result<JobDescriptor> {
        let step = self.step(index)?;
        let tmp = &self.tmp_path;
        let last = index + 1 == self.steps.len();

        let input = if index == 0 {
            self.input.clone()
        } else {
            vec![format!("{tmp}/step_{}/output/part-*", index - 1)]
        };
        let output = match (&self.output, last) {
            (Some(output), true) => output.clone(),
            (None, true) => format!("{tmp}/output"),
            (_, false) => format!("{tmp}/step_{index}/output"),
        };
        let name = if self.steps.len() == 1 {
            self.name.clone()
        } else {
            format!("{}-step_{index}", self.name)
        };

        let mut properties = self.properties.clone();
        if self.compress_output {
            properties.insert("mapred.output.compress".into(), "true".into());
            properties.insert(
                "mapred.output.compression.codec".into(),
                "org.apache.hadoop.io.compress.GzipCodec".into(),
            );
        }

        let exe = self.executable_path();
        let mut cache_files = self.cache_files.clone();
        cache_files.push(format!("{exe}#{EXECUTABLE_NAME}"));
        let files = match self.backend {
            BackendKind::Hadoop => self.files.clone(),
            BackendKind::Cloud => {
                // Staged next to the executable by the orchestrator.
                cache_files.extend(self.files.iter().map(|f| self.staged_path(f)));
                Vec::new()
            }
        };

        Ok(JobDescriptor {
            name,
            input,
            output,
            mapper: self.task_command(index, Stage::Mapper, logger),
            combiner: step
                .as_combiner()
                .map(|_| self.task_command(index, Stage::Combiner, logger)),
            reducer: self.task_command(index, Stage::Reducer, logger),
            reducer_tasks: step.reducer_tasks().unwrap_or(self.reducer_tasks),
            properties,
            cache_files,
            files,
            default_scheme: self.default_scheme.clone(),
        })
    }

    fn staged_path(&self, local: &str) -> String {
        let base = Path::new(local)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| local.to_string());
        format!("{}/{base}", self.tmp_path)
    }

    /// Runs one stage of step `index` from `input` to `output`.
    ///
    /// A step without a mapper copies its input through unchanged; asking a
    /// step without a combiner to combine is a configuration error.
    pub async fn execute_stage(
        &self,
        index: usize,
        stage: Stage,
        mut input: StageInput,
        mut output: StageOutput,
    ) -> anyhow::Result<()> {
        let step = self.step(index)?;
        match stage {
            Stage::Mapper => match step.as_mapper() {
                Some(mapper) => mapper.map(input, output).await,
                None => {
                    tokio::io::copy(&mut input, &mut output).await?;
                    output.flush().await?;
                    Ok(())
                }
            },
            Stage::Reducer => step.reduce(input, output).await,
            Stage::Combiner => match step.as_combiner() {
                Some(combiner) => combiner.combine(input, output).await,
                None => Err(Error::config(format!(
                    "step {index} does not support the combiner stage"
                ))
                .into()),
            },
        }
    }

    async fn run_worker(&self, stage: Stage, step: usize) -> Result<()> {
        self.connect_logger(stage, step).await;
        info!("starting {stage} step {step}");

        let result = self
            .execute_stage(
                step,
                stage,
                Box::new(tokio::io::stdin()),
                Box::new(tokio::io::stdout()),
            )
            .await;

        reporter::audit_cpu_time(COUNTER_GROUP, &format!("{stage}[{step}]"));
        match result {
            Ok(()) => std::process::exit(0),
            Err(e) => {
                error!("Error: {e:#}");
                std::process::exit(1)
            }
        }
    }

    /// Sends this process's logs to the orchestrator's relay, if one was
    /// given. Falls back to local logging when it can't be reached.
    async fn connect_logger(&self, stage: Stage, step: usize) {
        let Some(addr) = &self.flags.remote_logger else {
            let _ = logging::init();
            return;
        };
        match relay::dial(addr).await {
            Ok(conn) => {
                let prefix = relay::prefix(&relay::hostname(), stage.as_str(), step);
                let _ = logging::init_with_writer(PrefixWriter::new(prefix, conn));
            }
            Err(e) => {
                let _ = logging::init();
                warn!("failed connecting to remote logger {e}");
                reporter::status(&format!("error dialing remote logger {e}"));
            }
        }
    }

    async fn run_orchestrator(&self) -> Result<()> {
        if self.steps.is_empty() {
            return Err(Error::config("pipeline has no steps"));
        }
        let (backend, storage) = self.connect().await?;
        self.stage_files(&storage).await?;

        let relay = LogRelay::bind().await?;
        let logger = relay.addr().to_string();
        info!("listening on {logger} for log messages");
        let relay = relay.start();

        let result = self.submit_steps(backend.as_ref(), &logger).await;
        relay.abort();
        result
    }

    async fn submit_steps(&self, backend: &dyn Backend, logger: &str) -> Result<()> {
        for index in 0..self.steps.len() {
            let job = self.job_for_step(index, Some(logger))?;
            if let Err(e) = backend.submit(&job).await {
                error!("failed running step {index}: {e}");
                return Err(e);
            }
        }
        info!(
            "output in {}",
            absolute_path(
                self.output.as_deref().unwrap_or(&format!("{}/output", self.tmp_path)),
                &self.default_scheme
            )
        );
        Ok(())
    }

    /// Validates the backend settings and opens the backend and storage.
    async fn connect(&self) -> Result<(Box<dyn Backend>, Storage)> {
        match self.backend {
            BackendKind::Hadoop => {
                let home = self
                    .flags
                    .hadoop_home
                    .clone()
                    .ok_or_else(|| Error::config("HADOOP_HOME not set"))?;
                let backend =
                    HadoopBackend::new(&home).with_streaming_jar(self.flags.streaming_jar.clone());
                Ok((Box::new(backend), Storage::Hdfs(HadoopFs::new(&home))))
            }
            BackendKind::Cloud => {
                let cloud = self.flags.cloud().map_err(Error::Config)?;
                let Some(CloudSettings {
                    credentials,
                    project,
                    region,
                    cluster,
                    bucket,
                    api_endpoint,
                    storage_endpoint,
                }) = cloud
                else {
                    return Err(Error::config("missing --credentials"));
                };
                let service = RestJobService::from_credentials_file(
                    &credentials,
                    &api_endpoint,
                    &project,
                    &region,
                )?;
                let store =
                    ObjectStore::connect(&bucket, &region, storage_endpoint.as_deref()).await;
                Ok((
                    Box::new(CloudBackend::new(service, cluster)),
                    Storage::Object(store),
                ))
            }
        }
    }

    /// Creates the working path and uploads the running executable once,
    /// plus the local files on the cloud backend.
    async fn stage_files(&self, storage: &Storage) -> Result<()> {
        let local_exe = current_exe()?;
        let exe = self.executable_path();
        match storage {
            Storage::Hdfs(fs) => {
                let tmp = absolute_path(&self.tmp_path, &self.default_scheme);
                fs.fs_cmd("-mkdir", &["-p", tmp.as_str()]).await?;
                fs.put(&local_exe.to_string_lossy(), &absolute_path(&exe, &self.default_scheme))
                    .await?;
            }
            Storage::Object(store) => {
                info!("uploading {} as {}{exe}", local_exe.display(), store.scheme());
                store.insert(&exe, &local_exe).await?;
                for file in &self.files {
                    let target = self.staged_path(file);
                    info!("uploading {file} as {}{target}", store.scheme());
                    store.insert(&target, Path::new(file)).await?;
                }
            }
        }
        Ok(())
    }

    /// Removes this run's working path. Never called automatically.
    pub async fn cleanup(&self) -> Result<()> {
        match self.connect().await?.1 {
            Storage::Hdfs(fs) => fs.rmr(&absolute_path(&self.tmp_path, &self.default_scheme)).await,
            Storage::Object(store) => store.delete_prefix(&self.tmp_path).await.map(|_| ()),
        }
    }
}

/// `user/<user>/tmp/<name>.<YYYYMMDD-HHMMSS>`
pub fn tmp_path(user: &str, name: &str) -> String {
    let now = Local::now().format("%Y%m%d-%H%M%S");
    format!("user/{user}/tmp/{name}.{now}")
}

fn current_exe() -> Result<PathBuf> {
    let exe = std::env::current_exe()?;
    Ok(exe.canonicalize().unwrap_or(exe))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::{Combiner, Mapper, Reducer};
    use async_trait::async_trait;
    use tokio::io::AsyncReadExt;

    struct Identity;

    #[async_trait]
    impl Reducer for Identity {
        async fn reduce(&self, mut input: StageInput, mut output: StageOutput) -> anyhow::Result<()> {
            tokio::io::copy(&mut input, &mut output).await?;
            output.shutdown().await?;
            Ok(())
        }
    }

    impl Step for Identity {}

    struct Full;

    #[async_trait]
    impl Mapper for Full {
        async fn map(&self, _input: StageInput, mut output: StageOutput) -> anyhow::Result<()> {
            output.write_all(b"mapped\n").await?;
            output.shutdown().await?;
            Ok(())
        }
    }

    #[async_trait]
    impl Reducer for Full {
        async fn reduce(&self, input: StageInput, output: StageOutput) -> anyhow::Result<()> {
            Identity.reduce(input, output).await
        }
    }

    #[async_trait]
    impl Combiner for Full {
        async fn combine(&self, input: StageInput, output: StageOutput) -> anyhow::Result<()> {
            Identity.reduce(input, output).await
        }
    }

    impl Step for Full {
        fn as_mapper(&self) -> Option<&dyn Mapper> {
            Some(self)
        }

        fn as_combiner(&self) -> Option<&dyn Combiner> {
            Some(self)
        }

        fn reducer_tasks(&self) -> Option<usize> {
            Some(4)
        }
    }

    fn runner(steps: usize) -> Runner {
        let mut runner = Runner::new("count", RunnerFlags::default())
            .with_input(["logs/2024-*.json"])
            .with_passthrough(["--field=user"]);
        for _ in 0..steps {
            runner = runner.with_step(Identity);
        }
        runner
    }

    #[test]
    fn resolves_mode_once_from_flags() {
        let mut flags = RunnerFlags::default();
        assert_eq!(Mode::resolve(&flags), Mode::Unconfigured);
        flags.submit_job = true;
        assert_eq!(Mode::resolve(&flags), Mode::Orchestrator);
        flags.stage = Some(Stage::Reducer);
        flags.step = 2;
        assert_eq!(Mode::resolve(&flags), Mode::WorkerReducer { step: 2 });
        assert_eq!(Mode::resolve(&flags).worker(), Some((Stage::Reducer, 2)));
    }

    #[test]
    fn parses_stages() {
        assert_eq!("combiner".parse::<Stage>().unwrap(), Stage::Combiner);
        assert_eq!(Stage::Mapper.to_string(), "mapper");
        assert!("map".parse::<Stage>().is_err());
    }

    #[test]
    fn tmp_path_names_user_and_job() {
        let path = tmp_path("alice", "count");
        let stamp = path.strip_prefix("user/alice/tmp/count.").unwrap();
        assert_eq!(stamp.len(), "20240301-091500".len());
        assert_eq!(stamp.as_bytes()[8], b'-');
    }

    #[test]
    fn chains_two_steps_through_tmp() {
        let runner = runner(2);
        let tmp = runner.tmp_path().to_string();

        let first = runner.job_for_step(0, Some("host:4000")).unwrap();
        assert_eq!(first.name, "count-step_0");
        assert_eq!(first.input, vec!["logs/2024-*.json"]);
        assert_eq!(first.output, format!("{tmp}/step_0/output"));
        assert_eq!(
            first.mapper,
            "mrstream_binary --field=user --remote-logger=host:4000 --step=0 --stage=mapper"
        );
        assert_eq!(first.combiner, None);
        assert_eq!(first.reducer_tasks, DEFAULT_REDUCER_TASKS);

        let second = runner.job_for_step(1, Some("host:4000")).unwrap();
        assert_eq!(second.name, "count-step_1");
        assert_eq!(second.input, vec![format!("{tmp}/step_0/output/part-*")]);
        assert_eq!(second.output, format!("{tmp}/output"));
        assert!(second.reducer.ends_with("--step=1 --stage=reducer"));

        assert!(matches!(runner.job_for_step(2, None), Err(Error::Config(_))));
    }

    #[test]
    fn trailing_args_stay_after_runner_flags() {
        let runner = Runner::new("count", RunnerFlags::default())
            .with_step(Identity)
            .with_passthrough(["--workload=entry-count", "--", "--field=user"]);
        let job = runner.job_for_step(0, None).unwrap();
        assert_eq!(
            job.reducer,
            "mrstream_binary --workload=entry-count --step=0 --stage=reducer -- --field=user"
        );
    }

    #[test]
    fn single_step_uses_job_name_and_final_output() {
        let runner = runner(0)
            .with_step(Full)
            .with_output(Some("s3://results/out".into()))
            .with_compressed_output(true)
            .with_file("lookup.txt");
        let job = runner.job_for_step(0, None).unwrap();
        assert_eq!(job.name, "count");
        assert_eq!(job.output, "s3://results/out");
        assert_eq!(
            job.combiner.as_deref(),
            Some("mrstream_binary --field=user --step=0 --stage=combiner")
        );
        assert_eq!(job.reducer_tasks, 4);
        assert_eq!(job.properties["mapred.output.compress"], "true");
        assert_eq!(
            job.cache_files,
            vec![format!("{}/mrstream_binary#mrstream_binary", runner.tmp_path())]
        );
        assert_eq!(job.files, vec!["lookup.txt"]);
        assert_eq!(job.default_scheme, "hdfs:///");
    }

    #[test]
    fn cloud_backend_stages_files_as_cache_files() {
        let flags = RunnerFlags {
            credentials: Some("creds.json".into()),
            bucket: Some("jobs".into()),
            ..Default::default()
        };
        let runner = Runner::new("count", flags)
            .with_step(Identity)
            .with_file("conf/lookup.txt");
        assert_eq!(runner.backend_kind(), BackendKind::Cloud);
        assert_eq!(runner.default_scheme(), "s3://jobs/");

        let job = runner.job_for_step(0, None).unwrap();
        assert!(job.files.is_empty());
        assert_eq!(
            job.cache_files[1],
            format!("{}/lookup.txt", runner.tmp_path())
        );
    }

    async fn run_stage(runner: &Runner, stage: Stage, input: &'static [u8]) -> anyhow::Result<String> {
        let (writer, mut reader) = tokio::io::duplex(1024);
        runner
            .execute_stage(0, stage, Box::new(input), Box::new(writer))
            .await?;
        let mut out = String::new();
        reader.read_to_string(&mut out).await?;
        Ok(out)
    }

    #[tokio::test]
    async fn missing_mapper_copies_input() {
        let runner = runner(1);
        let out = run_stage(&runner, Stage::Mapper, b"a\t1\nb\t2\n").await.unwrap();
        assert_eq!(out, "a\t1\nb\t2\n");
    }

    #[tokio::test]
    async fn missing_combiner_is_a_config_error() {
        let runner = runner(1);
        let err = run_stage(&runner, Stage::Combiner, b"a\t1\n").await.unwrap_err();
        assert!(matches!(err.downcast_ref::<Error>(), Some(Error::Config(_))));
    }

    #[tokio::test]
    async fn dispatches_to_step_capabilities() {
        let runner = runner(0).with_step(Full);
        let out = run_stage(&runner, Stage::Mapper, b"ignored\n").await.unwrap();
        assert_eq!(out, "mapped\n");
        let out = run_stage(&runner, Stage::Combiner, b"x\t1\n").await.unwrap();
        assert_eq!(out, "x\t1\n");
    }

    /// Records submitted job names and fails the job named `fail`.
    struct Recording {
        fail: &'static str,
        submitted: std::sync::Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Backend for Recording {
        async fn submit(&self, job: &JobDescriptor) -> Result<()> {
            self.submitted.lock().unwrap().push(job.name.clone());
            if job.name == self.fail {
                return Err(Error::JobFailed {
                    job: job.name.clone(),
                    state: "ERROR".into(),
                });
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn submits_steps_in_order() {
        let backend = Recording {
            fail: "none",
            submitted: Default::default(),
        };
        runner(3).submit_steps(&backend, "host:4000").await.unwrap();
        assert_eq!(
            *backend.submitted.lock().unwrap(),
            vec!["count-step_0", "count-step_1", "count-step_2"]
        );
    }

    #[tokio::test]
    async fn first_failed_step_stops_the_run() {
        let backend = Recording {
            fail: "count-step_0",
            submitted: Default::default(),
        };
        let err = runner(2)
            .submit_steps(&backend, "host:4000")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::JobFailed { ref job, .. } if job == "count-step_0"));
        assert_eq!(*backend.submitted.lock().unwrap(), vec!["count-step_0"]);
    }

    #[tokio::test]
    async fn unconfigured_run_does_no_work() {
        let err = runner(1).run().await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
