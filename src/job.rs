//! What gets submitted to the cluster for one step.

use std::collections::BTreeMap;

use itertools::Itertools;

use crate::error::{Error, Result};

/// Engine property holding the job name.
pub const JOB_NAME_PROPERTY: &str = "mapred.job.name";

/// Engine property holding the number of reduce tasks.
pub const REDUCE_TASKS_PROPERTY: &str = "mapred.reduce.tasks";

/// Scheme prefixed to relative paths when none is configured.
pub const DEFAULT_SCHEME: &str = "hdfs:///";

/// One streaming job. Built fresh for every step of every run.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct JobDescriptor {
    pub name: String,
    pub input: Vec<String>,
    pub output: String,
    /// Command line the engine runs for map tasks.
    pub mapper: String,
    pub combiner: Option<String>,
    pub reducer: String,
    pub reducer_tasks: usize,
    /// Generic `-D key=value` engine options.
    pub properties: BTreeMap<String, String>,
    /// Distributed-storage files made available to every task (`-files`).
    pub cache_files: Vec<String>,
    /// Local files shipped with the job (`-file`).
    pub files: Vec<String>,
    /// Prefix that makes relative paths absolute, e.g. `hdfs:///` or
    /// `s3://bucket/`.
    pub default_scheme: String,
}

impl JobDescriptor {
    pub fn validate(&self) -> Result<()> {
        if self.mapper.is_empty() || self.reducer.is_empty() {
            return Err(Error::config("missing argument mapper or reducer"));
        }
        Ok(())
    }

    pub fn absolute(&self, path: &str) -> String {
        absolute_path(path, &self.default_scheme)
    }

    /// Properties with the job name and reduce-task count filled in where
    /// the explicit properties don't already set them.
    pub fn effective_properties(&self) -> BTreeMap<String, String> {
        let mut properties = self.properties.clone();
        properties
            .entry(JOB_NAME_PROPERTY.to_string())
            .or_insert_with(|| self.name.clone());
        properties
            .entry(REDUCE_TASKS_PROPERTY.to_string())
            .or_insert_with(|| self.reducer_tasks.to_string());
        properties
    }

    /// Arguments for the streaming jar, after `jar <path>`.
    ///
    /// When `inline_properties` is false the `-D` options are left out, for
    /// backends that pass properties separately.
    pub fn streaming_args(&self, inline_properties: bool) -> Vec<String> {
        let mut args = Vec::new();
        if inline_properties {
            for (key, value) in self.effective_properties() {
                args.push("-D".to_string());
                args.push(format!("{key}={value}"));
            }
        }
        for path in &self.input {
            args.push("-input".to_string());
            args.push(self.absolute(path));
        }
        if !self.cache_files.is_empty() {
            args.push("-files".to_string());
            args.push(self.cache_files.iter().map(|f| self.absolute(f)).join(","));
        }
        for file in &self.files {
            args.push("-file".to_string());
            args.push(file.clone());
        }
        args.push("-output".to_string());
        args.push(self.absolute(&self.output));
        args.push("-mapper".to_string());
        args.push(self.mapper.clone());
        if let Some(combiner) = &self.combiner {
            args.push("-combiner".to_string());
            args.push(combiner.clone());
        }
        args.push("-reducer".to_string());
        args.push(self.reducer.clone());
        args
    }
}

/// Makes `path` absolute under `scheme` unless it already names one.
pub fn absolute_path(path: &str, scheme: &str) -> String {
    if path.contains("://") {
        return path.to_string();
    }
    let scheme = if scheme.is_empty() { DEFAULT_SCHEME } else { scheme };
    format!("{scheme}{}", path.trim_start_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absolute_paths() {
        let cases = [
            ("/a", "hdfs:///", "hdfs:///a"),
            ("a", "hdfs:///", "hdfs:///a"),
            ("/a", "", "hdfs:///a"),
            ("hdfs:///a", "s3://bucket/", "hdfs:///a"),
            ("s3://bucketa/a", "s3://bucketb/", "s3://bucketa/a"),
        ];
        for (path, scheme, expect) in cases {
            assert_eq!(absolute_path(path, scheme), expect, "{path} under {scheme}");
        }
    }

    fn job() -> JobDescriptor {
        JobDescriptor {
            name: "count".into(),
            input: vec!["in/a*".into(), "s3://other/b".into()],
            output: "tmp/output".into(),
            mapper: "mrstream_binary --step=0 --stage=mapper".into(),
            combiner: None,
            reducer: "mrstream_binary --step=0 --stage=reducer".into(),
            reducer_tasks: 3,
            properties: BTreeMap::new(),
            cache_files: vec!["tmp/mrstream_binary#mrstream_binary".into()],
            files: vec!["lookup.txt".into()],
            default_scheme: "hdfs:///".into(),
        }
    }

    #[test]
    fn explicit_properties_win_over_defaults() {
        let mut job = job();
        job.properties
            .insert(REDUCE_TASKS_PROPERTY.into(), "7".into());
        let properties = job.effective_properties();
        assert_eq!(properties[REDUCE_TASKS_PROPERTY], "7");
        assert_eq!(properties[JOB_NAME_PROPERTY], "count");
    }

    #[test]
    fn builds_streaming_args() {
        let mut job = job();
        job.combiner = Some("mrstream_binary --step=0 --stage=combiner".into());
        assert_eq!(
            job.streaming_args(true),
            vec![
                "-D",
                "mapred.job.name=count",
                "-D",
                "mapred.reduce.tasks=3",
                "-input",
                "hdfs:///in/a*",
                "-input",
                "s3://other/b",
                "-files",
                "hdfs:///tmp/mrstream_binary#mrstream_binary",
                "-file",
                "lookup.txt",
                "-output",
                "hdfs:///tmp/output",
                "-mapper",
                "mrstream_binary --step=0 --stage=mapper",
                "-combiner",
                "mrstream_binary --step=0 --stage=combiner",
                "-reducer",
                "mrstream_binary --step=0 --stage=reducer",
            ]
        );
        assert!(!job.streaming_args(false).contains(&"-D".to_string()));
    }

    #[test]
    fn requires_mapper_and_reducer() {
        let mut job = job();
        assert!(job.validate().is_ok());
        job.reducer.clear();
        assert!(matches!(job.validate(), Err(Error::Config(_))));
    }
}
