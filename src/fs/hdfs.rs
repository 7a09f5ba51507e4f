//! `hadoop fs` shell commands.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use chrono::NaiveDateTime;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{info, warn};

use crate::backend::hadoop::{display_command, hadoop_bin, run};
use crate::error::{Error, Result};

const LS_TIME_FORMAT: &str = "%Y-%m-%d %H:%M";

/// One entry of `hadoop fs -ls` output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HdfsFile {
    pub permissions: String,
    pub replicas: u32,
    pub user: String,
    pub group: String,
    pub size: u64,
    pub modified: NaiveDateTime,
    pub path: String,
}

impl HdfsFile {
    pub fn is_dir(&self) -> bool {
        self.permissions.starts_with('d')
    }
}

/// Parses one `-ls` line:
/// `permissions replicas user group size date time path`.
pub fn parse_ls_line(line: &str) -> Result<HdfsFile> {
    let chunks: Vec<&str> = line.split_whitespace().collect();
    let [permissions, replicas, user, group, size, date, time, path] = chunks[..] else {
        return Err(Error::Storage(format!("invalid file parts in {line:?}")));
    };
    let bad = |what: &str, e: &dyn std::fmt::Display| {
        Error::Storage(format!("invalid {what} in {line:?}: {e}"))
    };
    // Directories report "-" as their replica count.
    let replicas = match replicas {
        "-" => 0,
        n => n.parse().map_err(|e| bad("replica count", &e))?,
    };
    Ok(HdfsFile {
        permissions: permissions.to_string(),
        replicas,
        user: user.to_string(),
        group: group.to_string(),
        size: size.parse().map_err(|e| bad("size", &e))?,
        modified: NaiveDateTime::parse_from_str(&format!("{date} {time}"), LS_TIME_FORMAT)
            .map_err(|e| bad("modification time", &e))?,
        path: path.to_string(),
    })
}

/// Parses full `-ls` output, skipping the `Found N items` header and any
/// line that doesn't describe a file.
pub fn parse_ls_output(output: &str) -> Vec<HdfsFile> {
    output.lines().filter_map(ls_entry).collect()
}

/// One `-ls` line as a file, or `None` for headers, blanks and lines that
/// don't parse.
fn ls_entry(line: &str) -> Option<HdfsFile> {
    if line.trim().is_empty() || line.starts_with("Found ") {
        return None;
    }
    parse_ls_line(line).inspect_err(|e| warn!("{e}")).ok()
}

/// Distributed filesystem reached through `$HADOOP_HOME/bin/hadoop fs`.
#[derive(Clone, Debug)]
pub struct HadoopFs {
    hadoop: PathBuf,
}

impl HadoopFs {
    pub fn new(home: &Path) -> Self {
        Self {
            hadoop: hadoop_bin(home),
        }
    }

    fn command(&self, command: &str, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.hadoop);
        cmd.arg("fs").arg(command).args(args);
        cmd
    }

    /// Runs `hadoop fs <command> <args>`; the child's output goes to stderr.
    pub async fn fs_cmd(&self, command: &str, args: &[&str]) -> Result<()> {
        let mut cmd = self.command(command, args);
        cmd.stdin(Stdio::null()).stdout(std::io::stderr()).stderr(Stdio::inherit());
        run(cmd).await
    }

    pub async fn mkdir(&self, remote: &str) -> Result<()> {
        self.fs_cmd("-mkdir", &[remote]).await
    }

    pub async fn put(&self, local: &str, remote: &str) -> Result<()> {
        self.fs_cmd("-put", &[local, remote]).await
    }

    pub async fn remove(&self, remote: &str) -> Result<()> {
        self.fs_cmd("-rm", &[remote]).await
    }

    /// Recursive remove.
    pub async fn rmr(&self, remote: &str) -> Result<()> {
        self.fs_cmd("-rmr", &[remote]).await
    }

    pub async fn copy(&self, from: &str, to: &str) -> Result<()> {
        self.fs_cmd("-cp", &[from, to]).await
    }

    pub async fn rename(&self, from: &str, to: &str) -> Result<()> {
        self.fs_cmd("-mv", &[from, to]).await
    }

    /// `flag` is `-e` (exists), `-z` (zero length) or `-d` (directory).
    /// Returns whether the test held.
    pub async fn test(&self, flag: &str, remote: &str) -> Result<bool> {
        let mut cmd = self.command("-test", &[flag, remote]);
        cmd.stdin(Stdio::null()).stdout(Stdio::null()).stderr(Stdio::null());
        info!("{}", display_command(&cmd));
        Ok(cmd.status().await?.success())
    }

    /// Contents of the remote files, concatenated.
    pub async fn cat(&self, remote: &[&str]) -> Result<Vec<u8>> {
        let mut cmd = self.command("-cat", remote);
        cmd.stdin(Stdio::null()).stderr(Stdio::inherit());
        let command = display_command(&cmd);
        info!("{command}");
        let output = cmd.output().await?;
        if !output.status.success() {
            return Err(Error::CommandFailed {
                command,
                status: output.status.to_string(),
            });
        }
        Ok(output.stdout)
    }

    /// Lists `remote`, streaming the command's output through the parser.
    pub async fn ls(&self, remote: &str) -> Result<Vec<HdfsFile>> {
        let mut cmd = self.command("-ls", &[remote]);
        cmd.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::inherit());
        let command = display_command(&cmd);
        let mut child = cmd.spawn()?;
        let Some(stdout) = child.stdout.take() else {
            return Err(Error::Storage(format!("no stdout from {command}")));
        };

        let mut files = Vec::new();
        let mut lines = BufReader::new(stdout).lines();
        while let Some(line) = lines.next_line().await? {
            files.extend(ls_entry(&line));
        }

        let status = child.wait().await?;
        if !status.success() {
            warn!("ls err {status}");
        }
        Ok(files)
    }
}
