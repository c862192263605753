// ==============================================================================
// storage.rs - Object Storage Access
// ==============================================================================
// Description: Staging bucket downloads and diagnostic uploads through S3
// Author: Matt Barham
// Created: 2026-10-11
// Modified: 2026-10-17
// Version: 1.0.0
// ==============================================================================

use aws_sdk_s3::primitives::ByteStream;
use std::fmt;
use std::future::Future;
use std::path::Path;
use submission_processor::scratch::silent_remove;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Object store request failed for {location}: {message}")]
    Request { location: String, message: String },

    #[error("Local I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Bucket + key pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectLocation {
    pub bucket: String,
    pub key: String,
}

impl ObjectLocation {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// `scheme://bucket/key...`; the key keeps any further slashes
    pub fn parse_url(url: &str) -> Option<Self> {
        let (scheme, rest) = url.split_once("://")?;
        if scheme.is_empty() {
            return None;
        }
        let (bucket, key) = rest.split_once('/')?;
        if bucket.is_empty() || key.is_empty() {
            return None;
        }
        Some(Self::new(bucket, key))
    }
}

impl fmt::Display for ObjectLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.key)
    }
}

/// Object store seam (staging downloads, diagnostic uploads)
pub trait ObjectStore: Send + Sync {
    /// Materialize `location` at `destination`
    fn download(
        &self,
        location: &ObjectLocation,
        destination: &Path,
    ) -> impl Future<Output = Result<(), StorageError>> + Send;

    fn upload(
        &self,
        source: &Path,
        location: &ObjectLocation,
    ) -> impl Future<Output = Result<(), StorageError>> + Send;
}

/// Remove whatever a failed download left behind
pub fn discard_partial(destination: &Path) {
    if let Err(e) = silent_remove(destination) {
        warn!("Failed to remove partial download {:?}: {}", destination, e);
    }
}

pub struct S3ObjectStore {
    client: aws_sdk_s3::Client,
}

impl S3ObjectStore {
    pub fn new(client: aws_sdk_s3::Client) -> Self {
        Self { client }
    }

    /// Client from the ambient AWS configuration (env, profile, instance role)
    pub async fn from_env() -> Self {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Self::new(aws_sdk_s3::Client::new(&config))
    }

    async fn fetch(&self, location: &ObjectLocation, destination: &Path) -> Result<u64, StorageError> {
        let mut output = self
            .client
            .get_object()
            .bucket(&location.bucket)
            .key(&location.key)
            .send()
            .await
            .map_err(|e| {
                let service = e.into_service_error();
                if service.is_no_such_key() {
                    StorageError::NotFound(location.to_string())
                } else {
                    StorageError::Request {
                        location: location.to_string(),
                        message: service.to_string(),
                    }
                }
            })?;

        let mut file = tokio::fs::File::create(destination).await?;
        let mut written = 0u64;
        while let Some(chunk) = output.body.try_next().await.map_err(|e| StorageError::Request {
            location: location.to_string(),
            message: e.to_string(),
        })? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        file.sync_all().await?;

        Ok(written)
    }
}

impl ObjectStore for S3ObjectStore {
    async fn download(&self, location: &ObjectLocation, destination: &Path) -> Result<(), StorageError> {
        info!("Downloading {} to {:?}", location, destination);

        match self.fetch(location, destination).await {
            Ok(bytes) => {
                debug!("Downloaded {} bytes", bytes);
                Ok(())
            }
            Err(e) => {
                discard_partial(destination);
                Err(e)
            }
        }
    }

    async fn upload(&self, source: &Path, location: &ObjectLocation) -> Result<(), StorageError> {
        info!("Uploading {:?} to {}", source, location);

        let body = ByteStream::from_path(source)
            .await
            .map_err(|e| StorageError::Request {
                location: location.to_string(),
                message: e.to_string(),
            })?;

        self.client
            .put_object()
            .bucket(&location.bucket)
            .key(&location.key)
            .body(body)
            .send()
            .await
            .map_err(|e| StorageError::Request {
                location: location.to_string(),
                message: e.into_service_error().to_string(),
            })?;

        Ok(())
    }
}
