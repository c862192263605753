// ==============================================================================
// archive.rs - Variant Batch Archive
// ==============================================================================
// Description: Size-bounded tar archive accumulating compressed variant files
//              and their indexes across jobs until it is sealed and shipped
// Author: Matt Barham
// Created: 2026-10-08
// Modified: 2026-10-17
// Version: 1.0.0
// ==============================================================================
//
// The running archive lives at {scratch_root}/vcf_archive.tar. Appending
// strips the 1024-byte end-of-archive marker, writes the new members and
// writes a fresh marker, so the file is a valid tar between jobs.
//
// Sealing renames it to vcf_archive_{timestamp}_{random}.tar. Sealed batches
// stay in the scratch root until they have been shipped.
//
// ==============================================================================

use chrono::Utc;
use rand::Rng;
use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::models::IndexedVariantFile;
use crate::scratch::silent_remove;

pub const ARCHIVE_NAME: &str = "vcf_archive.tar";
const SEALED_PREFIX: &str = "vcf_archive_";
const SEALED_SUFFIX: &str = ".tar";

/// 250 GiB
pub const DEFAULT_THRESHOLD_BYTES: u64 = 250 * 1024 * 1024 * 1024;

const BLOCK: u64 = 512;
const END_OF_ARCHIVE: u64 = 2 * BLOCK;

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Archive {0:?} is corrupt (shorter than its end marker)")]
    Corrupt(PathBuf),

    #[error("Member has no file name: {0:?}")]
    InvalidMember(PathBuf),
}

fn member_footprint(len: u64) -> u64 {
    BLOCK + len.div_ceil(BLOCK) * BLOCK
}

#[derive(Debug, Clone)]
pub struct ArchiveBatcher {
    root: PathBuf,
    threshold: u64,
}

impl ArchiveBatcher {
    pub fn new(root: impl Into<PathBuf>, threshold: u64) -> Self {
        Self {
            root: root.into(),
            threshold,
        }
    }

    pub fn path(&self) -> PathBuf {
        self.root.join(ARCHIVE_NAME)
    }

    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    /// Current archive size in bytes (0 when absent)
    pub fn size(&self) -> io::Result<u64> {
        match std::fs::metadata(self.path()) {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e),
        }
    }

    /// True when there is nothing to ship
    pub fn is_empty(&self) -> io::Result<bool> {
        Ok(self.size()? <= END_OF_ARCHIVE)
    }

    /// Archive size after appending `members`
    pub fn projected_size(&self, members: &[&Path]) -> io::Result<u64> {
        let mut size = self.size()?.saturating_sub(END_OF_ARCHIVE);
        for member in members {
            size += member_footprint(std::fs::metadata(member)?.len());
        }
        Ok(size + END_OF_ARCHIVE)
    }

    /// Whether the archive must be sealed before `members` go in
    ///
    /// An empty archive always accepts, so one job's output is never split.
    pub fn needs_flush_before(&self, members: &[&Path]) -> io::Result<bool> {
        if self.is_empty()? {
            return Ok(false);
        }
        Ok(self.projected_size(members)? > self.threshold)
    }

    /// Append a compressed file and its index, removing the originals
    ///
    /// A failed append leaves the archive exactly as it was.
    pub fn append(&self, files: &IndexedVariantFile) -> Result<u64, ArchiveError> {
        let members = [files.compressed.path.as_path(), files.index.as_path()];
        let mut names = Vec::with_capacity(members.len());
        for member in members {
            let name = member
                .file_name()
                .ok_or_else(|| ArchiveError::InvalidMember(member.to_path_buf()))?;
            names.push(name.to_os_string());
        }

        let path = self.path();
        std::fs::create_dir_all(&self.root)?;
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let original_len = file.metadata()?.len();
        let base = match original_len {
            0 => 0,
            len if len >= END_OF_ARCHIVE => len - END_OF_ARCHIVE,
            _ => return Err(ArchiveError::Corrupt(path)),
        };
        file.set_len(base)?;
        file.seek(SeekFrom::End(0))?;

        let result = (|| -> io::Result<()> {
            let mut builder = tar::Builder::new(&mut file);
            for (member, name) in members.iter().zip(&names) {
                builder.append_path_with_name(member, name)?;
            }
            builder.finish()
        })();

        if let Err(e) = result {
            warn!("Append to {:?} failed, rolling back: {}", path, e);
            if original_len == 0 {
                drop(file);
                silent_remove(&path)?;
            } else {
                file.set_len(base)?;
                file.set_len(original_len)?;
            }
            return Err(e.into());
        }

        file.sync_all()?;
        let size = file.metadata()?.len();
        drop(file);

        for member in members {
            silent_remove(member)?;
        }

        debug!("Archive {:?} now {} bytes", path, size);
        Ok(size)
    }

    /// Rename the running archive to a unique batch name
    ///
    /// Returns `None` (and removes any member-less file) when there is
    /// nothing to seal.
    pub fn seal(&self) -> Result<Option<PathBuf>, ArchiveError> {
        let path = self.path();
        if self.is_empty()? {
            silent_remove(&path)?;
            return Ok(None);
        }

        let sealed = loop {
            let candidate = self.root.join(format!(
                "{}{}_{:08x}{}",
                SEALED_PREFIX,
                Utc::now().format("%Y%m%dT%H%M%S%.6f"),
                rand::thread_rng().gen::<u32>(),
                SEALED_SUFFIX
            ));
            if !candidate.exists() {
                break candidate;
            }
        };

        std::fs::rename(&path, &sealed)?;
        info!("Sealed batch archive {:?}", sealed);
        Ok(Some(sealed))
    }

    /// Sealed batches waiting to be shipped, oldest name first
    pub fn pending_batches(&self) -> io::Result<Vec<PathBuf>> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut batches = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with(SEALED_PREFIX) && name.ends_with(SEALED_SUFFIX) && entry.file_type()?.is_file() {
                batches.push(entry.path());
            }
        }

        batches.sort();
        Ok(batches)
    }
}

/// Member names of a tar file, in order
pub fn list_members(path: &Path) -> io::Result<Vec<String>> {
    let mut archive = tar::Archive::new(File::open(path)?);
    let mut names = Vec::new();
    for entry in archive.entries()? {
        names.push(entry?.path()?.to_string_lossy().into_owned());
    }
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NormalizedFile;
    use tempfile::TempDir;

    fn variant_output(dir: &Path, name: &str, size: usize) -> IndexedVariantFile {
        let compressed = dir.join(format!("{}.vcf.gz", name));
        let index = dir.join(format!("{}.vcf.gz.tbi", name));
        std::fs::write(&compressed, vec![7u8; size]).unwrap();
        std::fs::write(&index, vec![3u8; 100]).unwrap();

        IndexedVariantFile {
            compressed: NormalizedFile {
                path: compressed,
                md5: None,
                size: size as u64,
            },
            index,
        }
    }

    #[test]
    fn test_append_creates_archive_and_removes_originals() {
        let staging = TempDir::new().unwrap();
        let root = TempDir::new().unwrap();
        let batcher = ArchiveBatcher::new(root.path(), DEFAULT_THRESHOLD_BYTES);
        assert!(batcher.is_empty().unwrap());

        let first = variant_output(staging.path(), "u1", 1000);
        batcher.append(&first).unwrap();
        assert!(!first.compressed.path.exists());
        assert!(!first.index.exists());

        let second = variant_output(staging.path(), "u2", 10);
        let size = batcher.append(&second).unwrap();

        assert_eq!(
            list_members(&batcher.path()).unwrap(),
            vec!["u1.vcf.gz", "u1.vcf.gz.tbi", "u2.vcf.gz", "u2.vcf.gz.tbi"]
        );
        assert_eq!(size, batcher.size().unwrap());
    }

    #[test]
    fn test_projected_size_matches_append() {
        let staging = TempDir::new().unwrap();
        let root = TempDir::new().unwrap();
        let batcher = ArchiveBatcher::new(root.path(), DEFAULT_THRESHOLD_BYTES);

        batcher.append(&variant_output(staging.path(), "u1", 700)).unwrap();
        let next = variant_output(staging.path(), "u2", 1300);
        let projected = batcher
            .projected_size(&[&next.compressed.path, &next.index])
            .unwrap();

        assert_eq!(batcher.append(&next).unwrap(), projected);
    }

    #[test]
    fn test_flush_triggered_before_overflowing_append() {
        let staging = TempDir::new().unwrap();
        let root = TempDir::new().unwrap();
        // Fits two 4 KiB members plus indexes, not three
        let batcher = ArchiveBatcher::new(root.path(), 12 * 1024);

        let mut flushes = Vec::new();
        for i in 0..5 {
            let output = variant_output(staging.path(), &format!("u{}", i), 4096);
            if batcher
                .needs_flush_before(&[&output.compressed.path, &output.index])
                .unwrap()
            {
                flushes.push(i);
                batcher.seal().unwrap();
            }
            batcher.append(&output).unwrap();
            assert!(batcher.size().unwrap() <= batcher.threshold());
        }

        assert_eq!(flushes, vec![2, 4]);
        assert_eq!(batcher.pending_batches().unwrap().len(), 2);
    }

    #[test]
    fn test_oversized_output_goes_into_empty_archive() {
        let staging = TempDir::new().unwrap();
        let root = TempDir::new().unwrap();
        let batcher = ArchiveBatcher::new(root.path(), 1024);

        let output = variant_output(staging.path(), "big", 8192);
        assert!(!batcher
            .needs_flush_before(&[&output.compressed.path, &output.index])
            .unwrap());
        batcher.append(&output).unwrap();
        assert!(batcher.size().unwrap() > batcher.threshold());
    }

    #[test]
    fn test_seal_renames_and_resets() {
        let staging = TempDir::new().unwrap();
        let root = TempDir::new().unwrap();
        let batcher = ArchiveBatcher::new(root.path(), DEFAULT_THRESHOLD_BYTES);

        assert!(batcher.seal().unwrap().is_none());

        batcher.append(&variant_output(staging.path(), "u1", 10)).unwrap();
        let sealed = batcher.seal().unwrap().unwrap();
        let name = sealed.file_name().unwrap().to_string_lossy().into_owned();

        assert!(name.starts_with("vcf_archive_") && name.ends_with(".tar"));
        assert!(!batcher.path().exists());
        assert!(batcher.is_empty().unwrap());
        assert_eq!(list_members(&sealed).unwrap().len(), 2);
        assert_eq!(batcher.pending_batches().unwrap(), vec![sealed]);
    }

    #[test]
    fn test_failed_append_leaves_archive_intact() {
        let staging = TempDir::new().unwrap();
        let root = TempDir::new().unwrap();
        let batcher = ArchiveBatcher::new(root.path(), DEFAULT_THRESHOLD_BYTES);
        batcher.append(&variant_output(staging.path(), "u1", 10)).unwrap();
        let before = std::fs::read(batcher.path()).unwrap();

        let broken = variant_output(staging.path(), "u2", 10);
        std::fs::remove_file(&broken.index).unwrap();

        assert!(batcher.append(&broken).is_err());
        assert_eq!(std::fs::read(batcher.path()).unwrap(), before);
        assert!(broken.compressed.path.exists());
    }
}
