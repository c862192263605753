// ==============================================================================
// scratch.rs - Scratch Space Management
// ==============================================================================
// Description: Job-scoped scratch directories and tolerant file removal
// Author: Matt Barham
// Created: 2026-10-05
// Modified: 2026-10-13
// Version: 1.0.0
// ==============================================================================

use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info, warn};

/// Remove a file, treating "not found" as success
pub fn silent_remove(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            debug!("Removed {:?}", path);
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Scratch directory owned by exactly one job
///
/// Lives under the worker's scratch root so large files stay on the scratch
/// volume. The directory and everything in it is removed on `cleanup` or on
/// drop, whichever comes first.
pub struct JobScratch {
    dir: Option<TempDir>,
    path: PathBuf,
}

impl JobScratch {
    pub fn new(scratch_root: &Path, job_label: &str) -> io::Result<Self> {
        std::fs::create_dir_all(scratch_root)?;
        let dir = tempfile::Builder::new()
            .prefix(&format!("job-{}-", job_label))
            .tempdir_in(scratch_root)?;
        let path = dir.path().to_path_buf();

        debug!("Allocated job scratch {:?}", path);
        Ok(Self { dir: Some(dir), path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn join(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }

    /// Remove the directory, logging (not returning) any failure
    pub fn cleanup(mut self) {
        if let Some(dir) = self.dir.take() {
            match dir.close() {
                Ok(()) => info!("Cleaned up job scratch {:?}", self.path),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to clean up job scratch {:?}: {}", self.path, e),
            }
        }
    }
}
