// ==============================================================================
// error.rs - Job Failure Taxonomy
// ==============================================================================
// Description: Stage errors folded into the kinds the job loop acts on
// Author: Matt Barham
// Created: 2026-10-10
// Modified: 2026-10-16
// Version: 1.0.0
// ==============================================================================

use submission_processor::alignment::AlignmentError;
use submission_processor::archive::ArchiveError;
use submission_processor::metadata::MetadataError;
use submission_processor::variant::VariantError;
use thiserror::Error;

use crate::storage::StorageError;
use crate::uploader::TransferError;

/// What the loop does with a failed job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Acknowledge and forget; retrying cannot help
    Drop,
    /// Put back on the queue for a later receive
    Retry,
}

#[derive(Error, Debug)]
pub enum JobError {
    #[error("Malformed job: {0}")]
    Malformed(String),

    #[error("Retrieval failed: {0}")]
    Retrieval(#[from] StorageError),

    #[error("Transform failed: {0}")]
    Transform(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Transfer failed: {0}")]
    Transfer(#[from] TransferError),
}

impl JobError {
    pub fn disposition(&self) -> Disposition {
        match self {
            JobError::Malformed(_) => Disposition::Drop,
            _ => Disposition::Retry,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            JobError::Malformed(_) => "malformed",
            JobError::Retrieval(_) => "retrieval",
            JobError::Transform(_) => "transform",
            JobError::Validation(_) => "validation",
            JobError::Transfer(_) => "transfer",
        }
    }
}

impl From<AlignmentError> for JobError {
    fn from(e: AlignmentError) -> Self {
        JobError::Transform(e.to_string())
    }
}

impl From<VariantError> for JobError {
    fn from(e: VariantError) -> Self {
        JobError::Transform(e.to_string())
    }
}

impl From<ArchiveError> for JobError {
    fn from(e: ArchiveError) -> Self {
        JobError::Transform(e.to_string())
    }
}

impl From<MetadataError> for JobError {
    fn from(e: MetadataError) -> Self {
        match e {
            MetadataError::Validation { .. } | MetadataError::ValidatorUnavailable(_) => {
                JobError::Validation(e.to_string())
            }
            MetadataError::TooManyReads(_) => JobError::Malformed(e.to_string()),
            _ => JobError::Transform(e.to_string()),
        }
    }
}
