//! Managed cloud job service.
//!
//! A job is submitted once and then polled on a fixed interval until it
//! reaches one of [`TERMINAL_STATES`]. State changes are logged as they are
//! seen, and the unchanged state every [`LIVENESS_EVERY`] polls so an
//! operator can tell the orchestrator is still waiting.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::Backend;
use crate::error::{Error, Result};
use crate::job::JobDescriptor;

pub const TERMINAL_STATES: [&str; 4] = ["ATTEMPT_FAILURE", "ERROR", "DONE", "CANCELLED"];

/// Streaming jar preinstalled on the cluster's nodes.
pub const DEFAULT_MAIN_JAR: &str = "file:///usr/lib/hadoop-mapreduce/hadoop-streaming.jar";

pub const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// With a 2s interval this logs roughly every 30s.
pub const LIVENESS_EVERY: usize = 15;

pub fn is_terminal(state: &str) -> bool {
    TERMINAL_STATES.contains(&state)
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobRequest {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub request_id: String,
    pub job: JobResource,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct JobResource {
    pub placement: Placement,
    pub reference: Reference,
    pub hadoop_job: HadoopJob,
    pub status: JobStatus,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Placement {
    pub cluster_name: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Reference {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub job_id: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct HadoopJob {
    pub args: Vec<String>,
    pub main_jar_file_uri: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub file_uris: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct JobStatus {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub state: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub state_start_time: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub details: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub substate: String,
}

/// Request/response contract of the job service.
#[async_trait]
pub trait JobService: Send + Sync {
    async fn submit(&self, request: &JobRequest) -> Result<JobResource>;
    async fn status(&self, job_id: &str) -> Result<JobResource>;
}

/// [`JobService`] over HTTPS with a bearer token.
pub struct RestJobService {
    client: Client,
    base: Url,
    token: String,
}

impl RestJobService {
    /// `endpoint` is the service root, e.g. `https://jobs.example.com`.
    pub fn new(endpoint: &str, project: &str, region: &str, token: String) -> Result<Self> {
        let mut base = Url::parse(endpoint)
            .map_err(|e| Error::config(format!("invalid api endpoint {endpoint}: {e}")))?;
        base.path_segments_mut()
            .map_err(|_| Error::config(format!("api endpoint {endpoint} cannot be a base")))?
            .pop_if_empty()
            .extend(["v1", "projects", project, "regions", region]);
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            client,
            base,
            token,
        })
    }

    /// Like [`new`](Self::new), reading the token from a credentials file.
    ///
    /// The file holds either the bare token or a JSON object with an
    /// `access_token` field.
    pub fn from_credentials_file(
        path: &Path,
        endpoint: &str,
        project: &str,
        region: &str,
    ) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::new(endpoint, project, region, parse_token(&contents)?)
    }

    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.extend(segments);
        }
        url
    }

    async fn send<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder, url: &Url) -> Result<T> {
        let response = request.bearer_auth(&self.token).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if status != StatusCode::OK {
            warn!("{body}");
            return Err(Error::HttpStatus {
                status: status.as_u16(),
                resource: url.to_string(),
            });
        }
        Ok(serde_json::from_str(&body)?)
    }
}

fn parse_token(contents: &str) -> Result<String> {
    let trimmed = contents.trim();
    let token = if trimmed.starts_with('{') {
        let value: serde_json::Value = serde_json::from_str(trimmed)?;
        value
            .get("access_token")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default()
            .to_string()
    } else {
        trimmed.to_string()
    };
    if token.is_empty() {
        return Err(Error::config("credentials file holds no access token"));
    }
    Ok(token)
}

#[async_trait]
impl JobService for RestJobService {
    async fn submit(&self, request: &JobRequest) -> Result<JobResource> {
        let url = self.url(&["jobs:submit"]);
        debug!("{url}");
        self.send(self.client.post(url.clone()).json(request), &url)
            .await
    }

    async fn status(&self, job_id: &str) -> Result<JobResource> {
        let url = self.url(&["jobs", job_id]);
        self.send(self.client.get(url.clone()), &url).await
    }
}

/// Submits to a named cluster through a [`JobService`] and waits for the
/// job to finish.
pub struct CloudBackend<S = RestJobService> {
    service: S,
    cluster: String,
    main_jar: String,
    poll_interval: Duration,
    max_polls: Option<usize>,
}

impl<S: JobService> CloudBackend<S> {
    pub fn new(service: S, cluster: impl Into<String>) -> Self {
        Self {
            service,
            cluster: cluster.into(),
            main_jar: DEFAULT_MAIN_JAR.to_string(),
            poll_interval: POLL_INTERVAL,
            max_polls: None,
        }
    }

    pub fn with_main_jar(mut self, uri: impl Into<String>) -> Self {
        self.main_jar = uri.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Gives up after `polls` status checks without a terminal state.
    /// Unbounded by default.
    pub fn with_max_polls(mut self, polls: usize) -> Self {
        self.max_polls = Some(polls);
        self
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    pub fn build_request(&self, job: &JobDescriptor) -> JobRequest {
        JobRequest {
            request_id: Uuid::new_v4().to_string(),
            job: JobResource {
                placement: Placement {
                    cluster_name: self.cluster.clone(),
                },
                reference: Reference {
                    job_id: job.name.clone(),
                },
                hadoop_job: HadoopJob {
                    args: job.streaming_args(false),
                    main_jar_file_uri: self.main_jar.clone(),
                    file_uris: job.cache_files.iter().map(|f| job.absolute(f)).collect(),
                    properties: job.effective_properties(),
                },
                status: JobStatus::default(),
            },
        }
    }

    /// Polls `job_id` until it reaches a terminal state and returns that
    /// state.
    async fn wait(&self, job_id: &str, mut state: String) -> Result<String> {
        let mut ticker = interval_at(Instant::now() + self.poll_interval, self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut polls = 0;
        while !is_terminal(&state) {
            if self.max_polls.is_some_and(|max| polls >= max) {
                return Err(Error::JobFailed {
                    job: job_id.to_string(),
                    state: format!("{state} after {polls} polls"),
                });
            }
            ticker.tick().await;
            polls += 1;
            let job = self.service.status(job_id).await?;
            if job.status.state != state || polls % LIVENESS_EVERY == 0 {
                state = job.status.state;
                info!("job:{job_id} status:{state}");
            }
        }
        Ok(state)
    }
}

#[async_trait]
impl<S: JobService> Backend for CloudBackend<S> {
    async fn submit(&self, job: &JobDescriptor) -> Result<()> {
        job.validate()?;
        let request = self.build_request(job);
        info!(
            "submitting job {:?} to cluster {:?}",
            request.job.reference.job_id, request.job.placement.cluster_name
        );
        info!("args: {:?}", request.job.hadoop_job.args);
        for (key, value) in &request.job.hadoop_job.properties {
            info!("   -D {key}={value}");
        }

        let submitted = self.service.submit(&request).await?;
        let job_id = if submitted.reference.job_id.is_empty() {
            request.job.reference.job_id.clone()
        } else {
            submitted.reference.job_id
        };
        let state = submitted.status.state;
        info!("job:{job_id} status:{state}");

        let state = self.wait(&job_id, state).await?;
        if state == "DONE" {
            Ok(())
        } else {
            Err(Error::JobFailed { job: job_id, state })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Replays a fixed sequence of states, one per status call.
    struct Canned {
        states: Mutex<Vec<&'static str>>,
        polls: Mutex<usize>,
        submitted: Mutex<Option<JobRequest>>,
    }

    impl Canned {
        fn new(states: &[&'static str]) -> Self {
            let mut states = states.to_vec();
            states.reverse();
            Self {
                states: Mutex::new(states),
                polls: Mutex::new(0),
                submitted: Mutex::new(None),
            }
        }

        fn polls(&self) -> usize {
            *self.polls.lock().unwrap()
        }
    }

    fn resource(job_id: &str, state: &str) -> JobResource {
        let mut job = JobResource::default();
        job.reference.job_id = job_id.to_string();
        job.status.state = state.to_string();
        job
    }

    #[async_trait]
    impl JobService for Canned {
        async fn submit(&self, request: &JobRequest) -> Result<JobResource> {
            *self.submitted.lock().unwrap() = Some(request.clone());
            Ok(resource(&request.job.reference.job_id, "PENDING"))
        }

        async fn status(&self, job_id: &str) -> Result<JobResource> {
            *self.polls.lock().unwrap() += 1;
            let state = self.states.lock().unwrap().pop().unwrap_or("EXHAUSTED");
            Ok(resource(job_id, state))
        }
    }

    fn job() -> JobDescriptor {
        let mut job = JobDescriptor {
            name: "count-step_0".into(),
            input: vec!["in/*".into()],
            output: "tmp/step_0/output".into(),
            mapper: "mrstream_binary --stage=mapper".into(),
            reducer: "mrstream_binary --stage=reducer".into(),
            reducer_tasks: 30,
            cache_files: vec!["tmp/mrstream_binary#mrstream_binary".into()],
            default_scheme: "s3://bucket/".into(),
            ..Default::default()
        };
        job.properties
            .insert("mapred.job.name".into(), "custom".into());
        job
    }

    fn backend(states: &[&'static str]) -> CloudBackend<Canned> {
        CloudBackend::new(Canned::new(states), "cluster-1")
            .with_poll_interval(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn stops_polling_at_done() {
        let backend = backend(&["RUNNING", "RUNNING", "DONE", "RUNNING"]);
        backend.submit(&job()).await.unwrap();
        assert_eq!(backend.service().polls(), 3);
    }

    #[tokio::test]
    async fn error_state_fails_the_job() {
        let backend = backend(&["RUNNING", "ERROR"]);
        match backend.submit(&job()).await {
            Err(Error::JobFailed { job, state }) => {
                assert_eq!(job, "count-step_0");
                assert_eq!(state, "ERROR");
            }
            other => panic!("unexpected result {other:?}"),
        }
        assert_eq!(backend.service().polls(), 2);
    }

    #[tokio::test]
    async fn poll_bound_gives_up() {
        let backend = backend(&["RUNNING"; 10]).with_max_polls(4);
        assert!(matches!(
            backend.submit(&job()).await,
            Err(Error::JobFailed { .. })
        ));
        assert_eq!(backend.service().polls(), 4);
    }

    #[tokio::test]
    async fn request_carries_job_description() {
        let backend = backend(&["DONE"]);
        backend.submit(&job()).await.unwrap();
        let request = backend.service().submitted.lock().unwrap().clone().unwrap();

        assert!(Uuid::parse_str(&request.request_id).is_ok());
        assert_eq!(request.job.placement.cluster_name, "cluster-1");
        assert_eq!(request.job.hadoop_job.main_jar_file_uri, DEFAULT_MAIN_JAR);
        assert_eq!(
            request.job.hadoop_job.file_uris,
            vec!["s3://bucket/tmp/mrstream_binary#mrstream_binary"]
        );
        let properties = &request.job.hadoop_job.properties;
        assert_eq!(properties["mapred.job.name"], "custom");
        assert_eq!(properties["mapred.reduce.tasks"], "30");
        assert!(!request.job.hadoop_job.args.contains(&"-D".to_string()));
    }

    #[test]
    fn request_serializes_in_camel_case() {
        let request = backend(&[]).build_request(&job());
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["job"]["placement"]["clusterName"], "cluster-1");
        assert_eq!(value["job"]["reference"]["jobId"], "count-step_0");
        assert!(value["job"]["hadoopJob"]["mainJarFileUri"].is_string());
    }

    #[test]
    fn builds_service_urls() {
        let service =
            RestJobService::new("https://jobs.example.com/", "proj", "us-east1", "t".into())
                .unwrap();
        assert_eq!(
            service.url(&["jobs:submit"]).as_str(),
            "https://jobs.example.com/v1/projects/proj/regions/us-east1/jobs:submit"
        );
        assert_eq!(
            service.url(&["jobs", "count-step_0"]).as_str(),
            "https://jobs.example.com/v1/projects/proj/regions/us-east1/jobs/count-step_0"
        );
    }

    #[test]
    fn reads_tokens() {
        assert_eq!(parse_token("abc\n").unwrap(), "abc");
        assert_eq!(parse_token(r#"{"access_token":"xyz"}"#).unwrap(), "xyz");
        assert!(parse_token("{}").is_err());
    }
}
