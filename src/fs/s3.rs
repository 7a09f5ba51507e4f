//! Object storage for the cloud backend.

use std::path::Path;

use aws_config::{from_env, BehaviorVersion, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use tracing::{debug, trace};

use crate::error::{Error, Result};

/// A bucket on an S3-compatible store.
#[derive(Clone, Debug)]
pub struct ObjectStore {
    client: Client,
    bucket: String,
}

fn storage_error(what: &str, e: impl std::fmt::Display) -> Error {
    Error::Storage(format!("{what}: {e}"))
}

impl ObjectStore {
    /// Connects with credentials from the environment. `endpoint` points at
    /// a non-AWS store such as MinIO.
    pub async fn connect(bucket: &str, region: &str, endpoint: Option<&str>) -> Self {
        let mut loader = from_env()
            .region(Region::new(region.to_string()))
            .behavior_version(BehaviorVersion::latest());
        if let Some(endpoint) = endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let config = loader.load().await;
        let s3_config = aws_sdk_s3::config::Builder::from(&config)
            .force_path_style(endpoint.is_some())
            .build();
        Self::new(Client::from_conf(s3_config), bucket)
    }

    pub fn new(client: Client, bucket: &str) -> Self {
        Self {
            client,
            bucket: bucket.to_string(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// `s3://bucket/` prefix for job paths stored here.
    pub fn scheme(&self) -> String {
        format!("s3://{}/", self.bucket)
    }

    /// Uploads the local file at `path` as `key`.
    pub async fn insert(&self, key: &str, path: &Path) -> Result<()> {
        trace!("bucket:      {}", self.bucket);
        trace!("object:      {}", key);
        let body = ByteStream::from_path(path)
            .await
            .map_err(|e| storage_error(&format!("reading {}", path.display()), e))?;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .send()
            .await
            .map_err(|e| storage_error(&format!("uploading {key}"), e))?;
        debug!("uploaded {} to {}{key}", path.display(), self.scheme());
        Ok(())
    }

    /// Every key under `prefix`, following continuation tokens.
    pub async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix)
            .into_paginator()
            .send();
        while let Some(page) = pages.next().await {
            let page = page.map_err(|e| storage_error(&format!("listing {prefix}"), e))?;
            keys.extend(page.contents().iter().filter_map(|o| o.key().map(str::to_string)));
        }
        Ok(keys)
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| storage_error(&format!("deleting {key}"), e))?;
        Ok(())
    }

    /// Deletes every object under `prefix`; returns how many went.
    pub async fn delete_prefix(&self, prefix: &str) -> Result<usize> {
        let keys = self.list(prefix).await?;
        for key in &keys {
            self.delete(key).await?;
        }
        debug!("deleted {} objects under {prefix}", keys.len());
        Ok(keys.len())
    }
}
