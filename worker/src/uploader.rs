// ==============================================================================
// uploader.rs - Artifact Delivery
// ==============================================================================
// Description: Ships finished artifacts with the secure-transfer tool, or to the
//              diagnostic bucket in test mode
// Author: Matt Barham
// Created: 2026-10-12
// Modified: 2026-10-18
// Version: 1.0.0
// Security: Commands are argument vectors (no shell); the passphrase only
//           reaches the child through its own environment
// ==============================================================================

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tracing::{debug, info};
use zeroize::Zeroize;

use crate::config::{UploadMode, WorkerConfig};
use crate::storage::{ObjectLocation, ObjectStore, StorageError};

/// Environment variable the transfer tool reads the content passphrase from
pub const PASSPHRASE_ENV: &str = "ASPERA_SCP_FILEPASS";

#[derive(Error, Debug)]
pub enum TransferError {
    #[error("Failed to launch {program:?}: {source}")]
    Launch {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Transfer of {path:?} failed ({status}): {stderr}")]
    Failed {
        path: PathBuf,
        status: String,
        stderr: String,
    },

    #[error("Artifact has no file name: {0:?}")]
    InvalidArtifact(PathBuf),

    #[error("Diagnostic upload failed: {0}")]
    Diagnostic(#[from] StorageError),
}

/// Which repository endpoint an artifact goes to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    /// Alignment files and their metadata packages
    Alignment,
    /// Sealed variant batches (encrypted in transit)
    VariantBatch,
}

#[derive(Debug, Clone)]
struct Endpoint {
    key: PathBuf,
    user: String,
    host: String,
    remote_dir: String,
    flags: &'static [&'static str],
}

impl Endpoint {
    fn target(&self) -> String {
        format!("{}@{}:{}", self.user, self.host, self.remote_dir)
    }
}

const ALIGNMENT_FLAGS: &[&str] = &["-Q", "-l", "5000m", "-k", "1"];
const VARIANT_FLAGS: &[&str] = &["--file-crypt=encrypt"];

pub struct Uploader {
    mode: UploadMode,
    program: PathBuf,
    alignment: Endpoint,
    variant: Endpoint,
    passphrase: String,
    diagnostic_bucket: String,
    diagnostic_prefix: String,
}

impl Uploader {
    pub fn new(config: &WorkerConfig) -> Self {
        let secret = &config.secret;
        Self {
            mode: config.upload_mode(),
            program: config.ascp_bin.clone(),
            alignment: Endpoint {
                key: config.alignment_key_path(),
                user: secret.alignment_transfer_user.clone(),
                host: secret.alignment_transfer_host.clone(),
                remote_dir: format!("{}/", secret.alignment_destination),
                flags: ALIGNMENT_FLAGS,
            },
            variant: Endpoint {
                key: config.variant_key_path(),
                user: secret.variant_transfer_user.clone(),
                host: secret.variant_transfer_host.clone(),
                remote_dir: format!("uploads/upload_requests/{}/", secret.variant_destination),
                flags: VARIANT_FLAGS,
            },
            passphrase: secret.transfer_passphrase.clone(),
            diagnostic_bucket: secret.testing_bucket.clone(),
            diagnostic_prefix: secret.testing_folder.clone(),
        }
    }

    pub fn mode(&self) -> UploadMode {
        self.mode
    }

    fn endpoint(&self, destination: Destination) -> &Endpoint {
        match destination {
            Destination::Alignment => &self.alignment,
            Destination::VariantBatch => &self.variant,
        }
    }

    /// `-i <key> <flags...> <path> <user>@<host>:<dir>/`
    pub fn transfer_args(&self, path: &Path, destination: Destination) -> Vec<OsString> {
        let endpoint = self.endpoint(destination);
        let mut args: Vec<OsString> = vec!["-i".into(), endpoint.key.clone().into_os_string()];
        args.extend(endpoint.flags.iter().map(OsString::from));
        args.push(path.as_os_str().to_os_string());
        args.push(endpoint.target().into());
        args
    }

    /// Object the diagnostic copy of `path` lands at
    pub fn diagnostic_location(&self, path: &Path) -> Result<ObjectLocation, TransferError> {
        let name = path
            .file_name()
            .ok_or_else(|| TransferError::InvalidArtifact(path.to_path_buf()))?;
        let prefix = self.diagnostic_prefix.trim_end_matches('/');
        Ok(ObjectLocation::new(
            self.diagnostic_bucket.clone(),
            format!("{}/{}", prefix, name.to_string_lossy()),
        ))
    }

    /// Ship one artifact
    pub async fn upload<S: ObjectStore>(
        &self,
        store: &S,
        path: &Path,
        destination: Destination,
    ) -> Result<(), TransferError> {
        match self.mode {
            UploadMode::Diagnostic => {
                let location = self.diagnostic_location(path)?;
                info!("Diagnostic mode: copying {:?} to {}", path, location);
                store.upload(path, &location).await?;
                Ok(())
            }
            UploadMode::Transfer => self.transfer(path, destination).await,
        }
    }

    async fn transfer(&self, path: &Path, destination: Destination) -> Result<(), TransferError> {
        let endpoint = self.endpoint(destination);
        info!("Transferring {:?} to {}", path, endpoint.target());

        let output = tokio::process::Command::new(&self.program)
            .args(self.transfer_args(path, destination))
            .env(PASSPHRASE_ENV, &self.passphrase)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| TransferError::Launch {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(TransferError::Failed {
                path: path.to_path_buf(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        debug!(
            "Transfer tool output: {}",
            String::from_utf8_lossy(&output.stdout).trim()
        );
        info!("Transferred {:?}", path);
        Ok(())
    }
}

impl Drop for Uploader {
    fn drop(&mut self) {
        self.passphrase.zeroize();
    }
}
