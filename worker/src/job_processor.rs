// ==============================================================================
// job_processor.rs - Submission Job Loop
// ==============================================================================
// Description: Receives one job at a time, runs it through retrieval,
//              normalization, packaging and delivery, then acknowledges or
//              requeues it
// Author: Matt Barham
// Created: 2025-11-06
// Modified: 2026-10-19
// Version: 2.0.0
// ==============================================================================

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

use submission_processor::alignment::normalize_alignment;
use submission_processor::archive::{ArchiveBatcher, ArchiveError};
use submission_processor::audit::{log_event, AuditEventType};
use submission_processor::metadata::{MetadataBuilder, SchemaValidator, SubmissionProfile};
use submission_processor::models::FileKind;
use submission_processor::scratch::{silent_remove, JobScratch};
use submission_processor::variant::normalize_variant;

use crate::config::WorkerConfig;
use crate::error::{Disposition, JobError};
use crate::job::Job;
use crate::notifier::CompletionNotifier;
use crate::queue::{Delivery, JobQueue};
use crate::storage::ObjectStore;
use crate::uploader::{Destination, Uploader};

/// Directory under the scratch root holding the running and sealed archives
pub const ARCHIVE_DIR: &str = "archive";

/// What one poll did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Queue was empty; the archive was flushed
    Idle,
    Completed,
    Retried,
    Dropped,
}

/// Run a blocking stage off the async runtime
async fn run_blocking<T, E, F>(stage: F) -> Result<T, JobError>
where
    F: FnOnce() -> std::result::Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: Into<JobError> + Send + 'static,
{
    tokio::task::spawn_blocking(stage)
        .await
        .map_err(|e| JobError::Transform(format!("blocking stage failed: {}", e)))?
        .map_err(Into::into)
}

/// Single-consumer submission worker
pub struct Worker<Q, S, N> {
    config: WorkerConfig,
    queue: Q,
    store: S,
    notifier: N,
    validator: Arc<dyn SchemaValidator>,
    uploader: Uploader,
    batcher: ArchiveBatcher,
    profile: SubmissionProfile,
}

impl<Q, S, N> Worker<Q, S, N>
where
    Q: JobQueue,
    S: ObjectStore,
    N: CompletionNotifier,
{
    pub fn new(
        config: WorkerConfig,
        queue: Q,
        store: S,
        notifier: N,
        validator: Arc<dyn SchemaValidator>,
    ) -> Self {
        let uploader = Uploader::new(&config);
        let batcher = ArchiveBatcher::new(config.scratch_root.join(ARCHIVE_DIR), config.archive_threshold);
        let profile = config.submission_profile();

        Self {
            config,
            queue,
            store,
            notifier,
            validator,
            uploader,
            batcher,
            profile,
        }
    }

    /// Put back anything a previous run left in flight
    pub async fn recover(&mut self) -> Result<usize> {
        let recovered = self.queue.recover().await?;
        let batches = self.batcher.pending_batches()?;
        if !batches.is_empty() {
            warn!("{} unshipped batch archive(s) found, shipping on next flush", batches.len());
        }
        Ok(recovered)
    }

    /// Main processing loop
    pub async fn run(&mut self) -> Result<()> {
        info!(
            "Worker {} polling {} ({:?} mode)",
            self.config.worker_id,
            self.config.queue_name,
            self.uploader.mode()
        );

        loop {
            match self.poll_once().await {
                Ok(PollOutcome::Idle) => tokio::time::sleep(self.config.poll_backoff).await,
                Ok(_) => {}
                Err(e) => {
                    error!("Queue operation failed: {:#}", e);
                    tokio::time::sleep(self.config.poll_backoff).await;
                }
            }
        }
    }

    /// Receive and fully handle at most one job
    pub async fn poll_once(&mut self) -> Result<PollOutcome> {
        let Some(delivery) = self.queue.receive().await? else {
            self.flush_archive().await;
            return Ok(PollOutcome::Idle);
        };

        log_event(
            AuditEventType::JobReceived,
            &self.config.worker_id,
            Some(delivery.label()),
            serde_json::json!({}),
        );

        let job = match &delivery.message {
            Ok(message) => Job::from_attributes(&message.message_id, &message.attributes),
            Err(e) => Err(JobError::Malformed(format!("invalid envelope: {}", e))),
        };

        let result = match job {
            Ok(job) => {
                info!(
                    "Processing {} job {} (export {}, participant {})",
                    job.kind, job.message_id, job.export_id, job.participant_id
                );
                self.process(&job).await.map(|()| job)
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(job) => {
                self.complete(&job).await;
                self.queue.acknowledge(&delivery).await?;
                log_event(
                    AuditEventType::JobCompleted,
                    &self.config.worker_id,
                    Some(job.message_id.clone()),
                    serde_json::json!({
                        "file_type": job.kind.to_string(),
                        "upload_file_name": job.upload_file_name(),
                    }),
                );
                info!("Job {} completed", job.message_id);
                Ok(PollOutcome::Completed)
            }
            Err(e) => self.fail(&delivery, e).await,
        }
    }

    async fn fail(&mut self, delivery: &Delivery, e: JobError) -> Result<PollOutcome> {
        error!("Job {} failed ({}): {}", delivery.label(), e.kind(), e);
        let details = serde_json::json!({ "kind": e.kind(), "error": e.to_string() });

        match e.disposition() {
            Disposition::Drop => {
                self.queue.acknowledge(delivery).await?;
                log_event(AuditEventType::JobDropped, &self.config.worker_id, Some(delivery.label()), details);
                Ok(PollOutcome::Dropped)
            }
            Disposition::Retry => {
                self.queue.retry(delivery).await?;
                warn!("Job {} requeued for retry", delivery.label());
                log_event(AuditEventType::JobRetried, &self.config.worker_id, Some(delivery.label()), details);
                Ok(PollOutcome::Retried)
            }
        }
    }

    /// Best-effort completion callback; never fails the job
    async fn complete(&self, job: &Job) {
        if let Err(e) = self.notifier.notify(&job.export_id).await {
            warn!("Failed to mark export {} complete: {}", job.export_id, e);
            log_event(
                AuditEventType::NotificationFailed,
                &self.config.worker_id,
                Some(job.message_id.clone()),
                serde_json::json!({ "export_id": job.export_id, "error": e.to_string() }),
            );
        }
    }

    /// Every stage for one job, inside its own scratch directory
    async fn process(&self, job: &Job) -> Result<(), JobError> {
        let scratch = JobScratch::new(&self.config.scratch_root, &job.fileservice_uuid)
            .map_err(|e| JobError::Transform(format!("scratch allocation failed: {}", e)))?;

        let result = self.run_stages(job, &scratch).await;
        scratch.cleanup();
        result
    }

    async fn run_stages(&self, job: &Job, scratch: &JobScratch) -> Result<(), JobError> {
        let upload_name = job.upload_file_name();
        let source = match job.kind {
            FileKind::Alignment => scratch.join(&format!("source.{}", job.kind.extension())),
            // The variant output keeps the upload name through compression
            FileKind::Variant => scratch.join(&upload_name),
        };

        self.store.download(&job.source, &source).await?;
        info!("Retrieved {} into {:?}", job.source, source);

        match job.kind {
            FileKind::Alignment => self.process_alignment(job, &source, scratch).await,
            FileKind::Variant => self.process_variant(job, &source).await,
        }
    }

    async fn process_alignment(&self, job: &Job, source: &Path, scratch: &JobScratch) -> Result<(), JobError> {
        let output = scratch.join(&job.upload_file_name());

        let (input, target, sample_id) = (source.to_path_buf(), output.clone(), job.sample_id.clone());
        let normalized = run_blocking(move || normalize_alignment(&input, &target, &sample_id)).await?;
        if let Err(e) = silent_remove(source) {
            warn!("Failed to remove retrieved source {:?}: {}", source, e);
        }

        let md5 = normalized
            .md5
            .clone()
            .ok_or_else(|| JobError::Transform("alignment output has no checksum".to_string()))?;

        let library = job.library_descriptor(&md5);
        let profile = self.profile.clone();
        let validator = Arc::clone(&self.validator);
        let dir = scratch.path().to_path_buf();
        let package = run_blocking(move || {
            MetadataBuilder::new(&profile, validator.as_ref()).build_package(&library, &dir)
        })
        .await?;

        self.uploader
            .upload(&self.store, &normalized.path, Destination::Alignment)
            .await?;
        self.uploader
            .upload(&self.store, &package, Destination::Alignment)
            .await?;

        Ok(())
    }

    async fn process_variant(&self, job: &Job, source: &Path) -> Result<(), JobError> {
        let (input, sample_id) = (source.to_path_buf(), job.sample_id.clone());
        let indexed = run_blocking(move || normalize_variant(&input, &sample_id)).await?;

        let members = [indexed.compressed.path.as_path(), indexed.index.as_path()];
        if self.batcher.needs_flush_before(&members).map_err(ArchiveError::from)? {
            info!(
                "Archive would exceed {} bytes, flushing before {}",
                self.batcher.threshold(),
                job.upload_file_name()
            );
            self.flush_archive().await;
        }

        let batcher = self.batcher.clone();
        let size = run_blocking(move || batcher.append(&indexed)).await?;
        info!("Archived {} (archive now {} bytes)", job.upload_file_name(), size);

        Ok(())
    }

    /// Seal the running archive and ship every sealed batch
    ///
    /// Batches that fail to ship stay on disk and go out with the next flush.
    pub async fn flush_archive(&self) {
        match self.batcher.seal() {
            Ok(Some(sealed)) => log_event(
                AuditEventType::BatchSealed,
                &self.config.worker_id,
                Some(sealed.display().to_string()),
                serde_json::json!({}),
            ),
            Ok(None) => {}
            Err(e) => error!("Failed to seal batch archive: {}", e),
        }

        let batches = match self.batcher.pending_batches() {
            Ok(batches) => batches,
            Err(e) => {
                error!("Failed to list batch archives: {}", e);
                return;
            }
        };

        for batch in batches {
            let resource = Some(batch.display().to_string());
            match self
                .uploader
                .upload(&self.store, &batch, Destination::VariantBatch)
                .await
            {
                Ok(()) => {
                    log_event(AuditEventType::BatchShipped, &self.config.worker_id, resource, serde_json::json!({}));
                    if let Err(e) = silent_remove(&batch) {
                        warn!("Failed to remove shipped batch {:?}: {}", batch, e);
                    }
                }
                Err(e) => {
                    error!("Failed to ship batch {:?}: {}", batch, e);
                    log_event(
                        AuditEventType::BatchShipFailed,
                        &self.config.worker_id,
                        resource,
                        serde_json::json!({ "error": e.to_string() }),
                    );
                }
            }
        }
    }
}
