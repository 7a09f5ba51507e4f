use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use glob::{glob, Pattern};
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::Backend;
use crate::error::{Error, Result};
use crate::job::JobDescriptor;

/// Submits jobs with `hadoop jar <streaming jar>` on the local machine.
#[derive(Clone, Debug)]
pub struct HadoopBackend {
    home: PathBuf,
    streaming_jar: Option<PathBuf>,
}

impl HadoopBackend {
    /// `home` is the Hadoop installation root (`$HADOOP_HOME`).
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self {
            home: home.into(),
            streaming_jar: None,
        }
    }

    /// Uses `jar` instead of searching the installation for one.
    pub fn with_streaming_jar(mut self, jar: Option<PathBuf>) -> Self {
        self.streaming_jar = jar;
        self
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    pub fn hadoop_bin(&self) -> PathBuf {
        hadoop_bin(&self.home)
    }

    /// The streaming jar: the explicit override if set, otherwise the first
    /// `hadoop*streaming*.jar` found under the installation root.
    pub fn streaming_jar(&self) -> Result<PathBuf> {
        if let Some(jar) = &self.streaming_jar {
            return Ok(jar.clone());
        }
        if self.home.as_os_str().is_empty() {
            return Err(Error::JarNotFound("HADOOP_HOME not set".into()));
        }
        let root = Pattern::escape(&self.home.to_string_lossy());
        let pattern = format!("{root}/**/hadoop*streaming*.jar");
        let found = glob(&pattern)
            .map_err(|e| Error::JarNotFound(format!("bad search pattern {pattern}: {e}")))?
            .flatten()
            .find(|path| path.is_file());
        match found {
            Some(jar) => {
                debug!("found streaming jar {}", jar.display());
                Ok(jar)
            }
            None => Err(Error::JarNotFound(format!(
                "no streaming jar under {}",
                self.home.display()
            ))),
        }
    }

    /// Full argument list for the `hadoop` binary.
    pub fn submit_args(&self, job: &JobDescriptor) -> Result<Vec<String>> {
        job.validate()?;
        let jar = self.streaming_jar().inspect_err(|e| {
            warn!("failed finding streaming jar {e}");
        })?;
        let mut args = vec!["jar".to_string(), jar.to_string_lossy().into_owned()];
        args.extend(job.streaming_args(true));
        Ok(args)
    }
}

#[async_trait]
impl Backend for HadoopBackend {
    async fn submit(&self, job: &JobDescriptor) -> Result<()> {
        let args = self.submit_args(job)?;
        let mut cmd = Command::new(self.hadoop_bin());
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        info!("submitting {}", job.name);
        run(cmd).await
    }
}

pub(crate) fn hadoop_bin(home: &Path) -> PathBuf {
    home.join("bin").join("hadoop")
}

pub(crate) fn display_command(cmd: &Command) -> String {
    let std = cmd.as_std();
    std::iter::once(std.get_program())
        .chain(std.get_args())
        .map(|arg| arg.to_string_lossy())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Runs `cmd` to completion; a non-zero exit is an error.
pub(crate) async fn run(mut cmd: Command) -> Result<()> {
    let command = display_command(&cmd);
    info!("{command}");
    let status = cmd.status().await?;
    if status.success() {
        return Ok(());
    }
    let status = match status.code() {
        Some(code) => format!("exit code: {code}"),
        None => "terminated by signal".into(),
    };
    Err(Error::CommandFailed { command, status })
}
