// ==============================================================================
// config.rs - Worker Configuration & Secret Provisioning
// ==============================================================================
// Description: Environment settings, the submission secret and transfer key
//              provisioning, loaded once at startup
// Author: Matt Barham
// Created: 2026-10-10
// Modified: 2026-10-18
// Version: 1.0.0
// Security: Keys written owner-only (0600), decoded bytes zeroized, secret
//           values redacted from Debug output
// ==============================================================================

use anyhow::{Context, Result};
use base64::Engine;
use serde::Deserialize;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use submission_processor::archive::DEFAULT_THRESHOLD_BYTES;
use submission_processor::metadata::{Contact, SubmissionProfile};
use tracing::info;
use zeroize::Zeroize;

pub const ALIGNMENT_KEY_FILE: &str = "aspera.pk";
pub const VARIANT_KEY_FILE: &str = "aspera_vcf.pk";

const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";
const DEFAULT_QUEUE_NAME: &str = "upload-preprocessing";
const DEFAULT_SCRATCH_ROOT: &str = "/scratch";
const DEFAULT_KEY_DIR: &str = "/aspera";
const DEFAULT_POLL_BACKOFF_SECS: u64 = 10;
const DEFAULT_ASCP_BIN: &str = "/home/aspera/.aspera/connect/bin/ascp";
const DEFAULT_XMLLINT_BIN: &str = "xmllint";

/// Where finished artifacts go
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadMode {
    /// Secure transfer to the external repository
    Transfer,
    /// Copy to the diagnostic bucket (`status == "test"`)
    Diagnostic,
}

fn default_accession_version() -> String {
    "v2".to_string()
}
fn default_testing_bucket() -> String {
    "udn-files-test".to_string()
}
fn default_testing_folder() -> String {
    "ups-testing".to_string()
}
fn default_alignment_user() -> String {
    "asp-hms-cc".to_string()
}
fn default_alignment_host() -> String {
    "gap-submit.ncbi.nlm.nih.gov".to_string()
}
fn default_variant_user() -> String {
    "subasp".to_string()
}
fn default_variant_host() -> String {
    "upload.ncbi.nlm.nih.gov".to_string()
}

/// Startup secret blob
#[derive(Clone, Deserialize)]
pub struct SubmissionSecret {
    pub status: String,
    pub accession: String,
    #[serde(default = "default_accession_version")]
    pub accession_version: String,
    pub center_name: String,
    #[serde(default)]
    pub contacts: Vec<Contact>,

    #[serde(rename = "aspera-location-code", default)]
    pub alignment_destination: String,
    #[serde(rename = "aspera-location-code-vcf", default)]
    pub variant_destination: String,
    #[serde(rename = "aspera-pass", default)]
    pub transfer_passphrase: String,
    #[serde(rename = "aspera-key", default)]
    pub alignment_key: String,
    #[serde(rename = "aspera-vcf-key", default)]
    pub variant_key: String,

    #[serde(default = "default_alignment_user")]
    pub alignment_transfer_user: String,
    #[serde(default = "default_alignment_host")]
    pub alignment_transfer_host: String,
    #[serde(default = "default_variant_user")]
    pub variant_transfer_user: String,
    #[serde(default = "default_variant_host")]
    pub variant_transfer_host: String,

    pub udn_api_url: String,
    pub udn_api_token: String,

    #[serde(default = "default_testing_bucket")]
    pub testing_bucket: String,
    #[serde(default = "default_testing_folder")]
    pub testing_folder: String,

    #[serde(default)]
    pub latf_load: bool,
}

impl SubmissionSecret {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to parse submission secret")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let mut json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read submission secret from {:?}", path))?;
        let secret = Self::from_json(&json);
        json.zeroize();
        secret
    }

    pub fn upload_mode(&self) -> UploadMode {
        if self.status == "test" {
            UploadMode::Diagnostic
        } else {
            UploadMode::Transfer
        }
    }

    /// Production transfers need every credential present
    fn check_transfer_fields(&self) -> Result<()> {
        let required = [
            ("aspera-location-code", &self.alignment_destination),
            ("aspera-location-code-vcf", &self.variant_destination),
            ("aspera-pass", &self.transfer_passphrase),
            ("aspera-key", &self.alignment_key),
            ("aspera-vcf-key", &self.variant_key),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                anyhow::bail!("Submission secret is missing '{}'", name);
            }
        }
        Ok(())
    }
}

impl fmt::Debug for SubmissionSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubmissionSecret")
            .field("status", &self.status)
            .field("accession", &self.accession)
            .field("center_name", &self.center_name)
            .field("contacts", &self.contacts.len())
            .field("udn_api_url", &self.udn_api_url)
            .field("credentials", &"[REDACTED]")
            .finish()
    }
}

impl Drop for SubmissionSecret {
    fn drop(&mut self) {
        self.transfer_passphrase.zeroize();
        self.alignment_key.zeroize();
        self.variant_key.zeroize();
        self.udn_api_token.zeroize();
    }
}

/// Process-wide configuration, built once in `main`
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub redis_url: String,
    pub queue_name: String,
    pub worker_id: String,
    pub scratch_root: PathBuf,
    pub transfer_key_dir: PathBuf,
    pub archive_threshold: u64,
    pub poll_backoff: Duration,
    pub ascp_bin: PathBuf,
    pub xmllint_bin: PathBuf,
    pub secret: SubmissionSecret,
}

impl WorkerConfig {
    /// Load environment variables and the secret file they point at
    pub fn from_env() -> Result<Self> {
        let secret_file = std::env::var("SUBMISSION_SECRET_FILE")
            .context("SUBMISSION_SECRET_FILE must be set")?;
        let secret = SubmissionSecret::load(Path::new(&secret_file))?;

        Self::from_lookup(|key| std::env::var(key).ok(), secret)
    }

    /// Build from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F, secret: SubmissionSecret) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let archive_threshold = match lookup("ARCHIVE_THRESHOLD_BYTES") {
            Some(value) => value
                .parse()
                .context("ARCHIVE_THRESHOLD_BYTES must be a byte count")?,
            None => DEFAULT_THRESHOLD_BYTES,
        };
        let poll_backoff_secs = match lookup("POLL_BACKOFF_SECS") {
            Some(value) => value
                .parse()
                .context("POLL_BACKOFF_SECS must be a number of seconds")?,
            None => DEFAULT_POLL_BACKOFF_SECS,
        };
        let worker_id = lookup("WORKER_ID")
            .or_else(|| lookup("HOSTNAME"))
            .unwrap_or_else(|| "worker-1".to_string());

        let config = Self {
            redis_url: get("REDIS_URL", DEFAULT_REDIS_URL),
            queue_name: get("QUEUE_NAME", DEFAULT_QUEUE_NAME),
            worker_id,
            scratch_root: PathBuf::from(get("SCRATCH_ROOT", DEFAULT_SCRATCH_ROOT)),
            transfer_key_dir: PathBuf::from(get("TRANSFER_KEY_DIR", DEFAULT_KEY_DIR)),
            archive_threshold,
            poll_backoff: Duration::from_secs(poll_backoff_secs),
            ascp_bin: PathBuf::from(get("ASCP_BIN", DEFAULT_ASCP_BIN)),
            xmllint_bin: PathBuf::from(get("XMLLINT_BIN", DEFAULT_XMLLINT_BIN)),
            secret,
        };

        if config.upload_mode() == UploadMode::Transfer {
            config.secret.check_transfer_fields()?;
        }

        Ok(config)
    }

    pub fn upload_mode(&self) -> UploadMode {
        self.secret.upload_mode()
    }

    pub fn alignment_key_path(&self) -> PathBuf {
        self.transfer_key_dir.join(ALIGNMENT_KEY_FILE)
    }

    pub fn variant_key_path(&self) -> PathBuf {
        self.transfer_key_dir.join(VARIANT_KEY_FILE)
    }

    pub fn submission_profile(&self) -> SubmissionProfile {
        SubmissionProfile {
            center: self.secret.center_name.clone(),
            accession: self.secret.accession.clone(),
            accession_version: self.secret.accession_version.clone(),
            contacts: self.secret.contacts.clone(),
            latf_load: self.secret.latf_load,
        }
    }
}

fn write_key(path: &Path, encoded: &str) -> Result<()> {
    let mut decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .with_context(|| format!("Transfer key for {:?} is not valid base64", path))?;

    let dir = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("Key path has no parent: {:?}", path))?;
    let result = (|| -> Result<()> {
        let mut file = tempfile::NamedTempFile::new_in(dir)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.as_file()
                .set_permissions(std::fs::Permissions::from_mode(0o600))?;
        }
        file.write_all(&decoded)?;
        file.as_file().sync_all()?;
        file.persist(path)?;
        Ok(())
    })();

    decoded.zeroize();
    result.with_context(|| format!("Failed to write transfer key {:?}", path))
}

/// Write both transfer keys where the transfer tool expects them
///
/// Diagnostic mode never runs the transfer tool, so nothing is written.
pub fn provision_transfer_keys(config: &WorkerConfig) -> Result<()> {
    if config.upload_mode() == UploadMode::Diagnostic {
        info!("Diagnostic upload mode, skipping transfer key provisioning");
        return Ok(());
    }

    std::fs::create_dir_all(&config.transfer_key_dir)
        .with_context(|| format!("Failed to create {:?}", config.transfer_key_dir))?;

    write_key(&config.alignment_key_path(), &config.secret.alignment_key)?;
    write_key(&config.variant_key_path(), &config.secret.variant_key)?;

    info!("Transfer keys provisioned in {:?}", config.transfer_key_dir);
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    pub(crate) fn secret_json(status: &str) -> String {
        serde_json::json!({
            "status": status,
            "accession": "phs001232",
            "center_name": "HMS-CC",
            "contacts": [{"name": "Data Coordinator", "email": "coordinator@example.org"}],
            "aspera-location-code": "ALIGN-CODE",
            "aspera-location-code-vcf": "VCF-CODE",
            "aspera-pass": "passphrase",
            "aspera-key": base64::engine::general_purpose::STANDARD.encode(b"alignment key"),
            "aspera-vcf-key": base64::engine::general_purpose::STANDARD.encode(b"variant key"),
            "udn_api_url": "http://127.0.0.1:9",
            "udn_api_token": "token"
        })
        .to_string()
    }

    pub(crate) fn test_config(status: &str, scratch_root: &Path) -> WorkerConfig {
        let vars: HashMap<&str, String> = HashMap::from([
            ("SCRATCH_ROOT", scratch_root.display().to_string()),
            ("TRANSFER_KEY_DIR", scratch_root.join("keys").display().to_string()),
            ("WORKER_ID", "worker-test".to_string()),
        ]);
        let secret = SubmissionSecret::from_json(&secret_json(status)).unwrap();
        WorkerConfig::from_lookup(|k| vars.get(k).cloned(), secret).unwrap()
    }

    #[test]
    fn test_secret_defaults_and_mode() {
        let secret = SubmissionSecret::from_json(&secret_json("test")).unwrap();

        assert_eq!(secret.upload_mode(), UploadMode::Diagnostic);
        assert_eq!(secret.testing_bucket, "udn-files-test");
        assert_eq!(secret.testing_folder, "ups-testing");
        assert_eq!(secret.accession_version, "v2");
        assert_eq!(secret.alignment_transfer_host, "gap-submit.ncbi.nlm.nih.gov");

        let prod = SubmissionSecret::from_json(&secret_json("production")).unwrap();
        assert_eq!(prod.upload_mode(), UploadMode::Transfer);
    }

    #[test]
    fn test_debug_redacts_credentials() {
        let secret = SubmissionSecret::from_json(&secret_json("production")).unwrap();
        let debug = format!("{:?}", secret);

        assert!(!debug.contains("passphrase"));
        assert!(!debug.contains("token"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn test_config_defaults() {
        let secret = SubmissionSecret::from_json(&secret_json("production")).unwrap();
        let config = WorkerConfig::from_lookup(|_| None, secret).unwrap();

        assert_eq!(config.queue_name, "upload-preprocessing");
        assert_eq!(config.scratch_root, PathBuf::from("/scratch"));
        assert_eq!(config.archive_threshold, 250 * 1024 * 1024 * 1024);
        assert_eq!(config.poll_backoff, Duration::from_secs(10));
        assert_eq!(config.alignment_key_path(), PathBuf::from("/aspera/aspera.pk"));
        assert_eq!(config.submission_profile().alias(), "phs001232.v2");
    }

    #[test]
    fn test_config_rejects_bad_numbers() {
        let secret = SubmissionSecret::from_json(&secret_json("test")).unwrap();
        let result = WorkerConfig::from_lookup(
            |k| (k == "POLL_BACKOFF_SECS").then(|| "soon".to_string()),
            secret,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_transfer_mode_requires_credentials() {
        let mut value: serde_json::Value = serde_json::from_str(&secret_json("production")).unwrap();
        value.as_object_mut().unwrap().remove("aspera-key");
        let secret = SubmissionSecret::from_json(&value.to_string()).unwrap();

        assert!(WorkerConfig::from_lookup(|_| None, secret).is_err());
    }

    #[test]
    fn test_provision_transfer_keys() {
        let root = TempDir::new().unwrap();
        let config = test_config("production", root.path());

        provision_transfer_keys(&config).unwrap();

        assert_eq!(std::fs::read(config.alignment_key_path()).unwrap(), b"alignment key");
        assert_eq!(std::fs::read(config.variant_key_path()).unwrap(), b"variant key");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(config.alignment_key_path()).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn test_provision_skipped_in_diagnostic_mode() {
        let root = TempDir::new().unwrap();
        let config = test_config("test", root.path());

        provision_transfer_keys(&config).unwrap();
        assert!(!config.alignment_key_path().exists());
    }
}
