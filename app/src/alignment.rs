// ==============================================================================
// alignment.rs - Alignment File (BAM) Normalizer
// ==============================================================================
// Description: De-identifies BAM headers (read groups, program records),
//              reheaders the record stream, runs a structural integrity check
//              and computes the submission checksum
// Author: Matt Barham
// Created: 2026-10-06
// Modified: 2026-10-19
// Version: 1.1.0
// Security: @PG lines removed (processing history and host paths),
//           @RG sample replaced with the approved alternate label
// ==============================================================================
//
// Dependencies:
// - noodles-bam: https://docs.rs/noodles-bam/0.83.0/noodles_bam/
// - noodles-sam: https://docs.rs/noodles-sam/0.79.0/noodles_sam/ (header model)
//
// The reference dictionary is carried over unchanged and every record is
// written back in input order, so order and count are preserved exactly.
//
// ==============================================================================

use noodles_bam as bam;
use noodles_sam::{self as sam, header::record::value::map::read_group::tag};
use std::fs::File;
use std::io;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::models::NormalizedFile;
use crate::scratch::silent_remove;
use crate::validator::{compute_md5, has_bgzf_eof};

/// Identifier forced onto the submitted read group
const READ_GROUP_ID: &str = "0";

#[derive(Error, Debug)]
pub enum AlignmentError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Integrity check failed for {path}: {reason}")]
    IntegrityCheck { path: String, reason: String },
}

/// De-identify a SAM header in place
///
/// Program records are dropped. Read groups collapse into a single group `0`
/// that keeps only PL/DT/CN of the first group and carries the new sample
/// label. Everything else passes through.
pub fn deidentify_header(header: &mut sam::Header, sample_id: &str) {
    let programs = header.programs().as_ref().len();
    if programs > 0 {
        debug!("Dropping {} program records", programs);
        header.programs_mut().as_mut().clear();
    }

    let read_groups = std::mem::take(header.read_groups_mut());
    if read_groups.len() > 1 {
        warn!("Collapsing {} read groups into one", read_groups.len());
    }

    if let Some((_, mut read_group)) = read_groups.into_iter().next() {
        let kept = [tag::PLATFORM, tag::PRODUCED_AT, tag::SEQUENCING_CENTER];
        let fields = read_group.other_fields_mut();
        fields.retain(|key, _| kept.contains(key));
        fields.insert(tag::SAMPLE, sample_id.into());

        header
            .read_groups_mut()
            .insert(READ_GROUP_ID.into(), read_group);
    }
}

/// Write `output` with the de-identified header and every record of `input`
///
/// Returns the number of records copied.
pub fn reheader(input: &Path, output: &Path, sample_id: &str) -> Result<u64, AlignmentError> {
    let result = (|| -> Result<u64, AlignmentError> {
        let mut reader = bam::io::reader::Builder::default().build_from_path(input)?;
        let mut header = reader.read_header()?;
        deidentify_header(&mut header, sample_id);

        let mut writer = bam::io::Writer::new(File::create(output)?);
        writer.write_header(&header)?;

        let mut copied = 0;
        for result in reader.records() {
            writer.write_record(&header, &result?)?;
            copied += 1;
        }
        writer.try_finish()?;

        debug!("Reheadered {:?}: {} records copied", output, copied);
        Ok(copied)
    })();

    if result.is_err() {
        if let Err(e) = silent_remove(output) {
            warn!("Failed to remove partial output {:?}: {}", output, e);
        }
    }

    result
}

/// Structural integrity check (samtools quickcheck semantics)
///
/// A BAM header that parses and declares at least one reference sequence,
/// and the BGZF end-of-file block.
pub fn quickcheck(path: &Path) -> Result<(), AlignmentError> {
    let fail = |reason: String| AlignmentError::IntegrityCheck {
        path: path.display().to_string(),
        reason,
    };

    let header = bam::io::reader::Builder::default()
        .build_from_path(path)
        .and_then(|mut reader| reader.read_header())
        .map_err(|e| fail(format!("unreadable header: {}", e)))?;

    if header.reference_sequences().is_empty() {
        return Err(fail("header declares no reference sequences".to_string()));
    }

    if !has_bgzf_eof(path)? {
        return Err(fail("missing BGZF EOF marker (truncated file)".to_string()));
    }

    Ok(())
}

/// Full BAM path: reheader, integrity check, checksum
///
/// The integrity check runs against the original input; a failure removes the
/// reheadered output and aborts.
pub fn normalize_alignment(
    input: &Path,
    output: &Path,
    sample_id: &str,
) -> Result<NormalizedFile, AlignmentError> {
    info!("Normalizing alignment {:?} -> {:?}", input, output);

    let records = reheader(input, output, sample_id)?;

    if let Err(e) = quickcheck(input) {
        if let Err(rm) = silent_remove(output) {
            warn!("Failed to remove reheadered output {:?}: {}", output, rm);
        }
        return Err(e);
    }

    let md5 = compute_md5(output)?;
    let size = std::fs::metadata(output)?.len();
    info!("Alignment normalized: {} records, {} bytes, md5 {}", records, size, md5);

    Ok(NormalizedFile {
        path: output.to_path_buf(),
        md5: Some(md5),
        size,
    })
}
