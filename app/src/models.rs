// ==============================================================================
// models.rs - Submission Domain Models
// ==============================================================================
// Description: File kinds, sequencing strategies and read-length layouts
//              shared by the normalizers, metadata builder and worker
// Author: Matt Barham
// Created: 2026-10-05
// Modified: 2026-10-14
// Version: 1.0.0
// ==============================================================================

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// On-disk artifact produced by a normalizer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedFile {
    pub path: PathBuf,
    /// Hex MD5 (alignment outputs only)
    pub md5: Option<String>,
    pub size: u64,
}

/// Compressed variant output plus its positional index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedVariantFile {
    pub compressed: NormalizedFile,
    pub index: PathBuf,
}

/// Kind of sequencing file carried by a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileKind {
    /// Aligned reads (BAM)
    Alignment,
    /// Variant calls (VCF, optionally gzip-compressed)
    Variant,
}

impl FileKind {
    /// Parse the queue's `file_type` attribute (`BAM` | `VCF`)
    pub fn from_attribute(value: &str) -> Option<Self> {
        match value {
            "BAM" => Some(FileKind::Alignment),
            "VCF" => Some(FileKind::Variant),
            _ => None,
        }
    }

    /// Extension used for the derived output filename
    pub fn extension(&self) -> &'static str {
        match self {
            FileKind::Alignment => "bam",
            FileKind::Variant => "vcf",
        }
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileKind::Alignment => write!(f, "BAM"),
            FileKind::Variant => write!(f, "VCF"),
        }
    }
}

/// Sequencing strategy code carried by the `sequence_type` attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SequencingType {
    Exome,      // 2
    Genome,     // 3
    Rna,        // 4
}

impl SequencingType {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            2 => Some(SequencingType::Exome),
            3 => Some(SequencingType::Genome),
            4 => Some(SequencingType::Rna),
            _ => None,
        }
    }

    pub fn code(&self) -> i64 {
        match self {
            SequencingType::Exome => 2,
            SequencingType::Genome => 3,
            SequencingType::Rna => 4,
        }
    }

    /// Aligner reported in the experiment attributes
    pub fn alignment_software(&self) -> &'static str {
        match self {
            SequencingType::Exome => "BWA v0.6.2",
            SequencingType::Genome => "BWA-mem v0.7.12",
            SequencingType::Rna => "STAR",
        }
    }

    /// SRA `LIBRARY_SOURCE`
    pub fn library_source(&self) -> &'static str {
        match self {
            SequencingType::Exome | SequencingType::Genome => "GENOMIC",
            SequencingType::Rna => "TRANSCRIPTOMIC",
        }
    }

    /// SRA `LIBRARY_STRATEGY`
    pub fn library_strategy(&self) -> &'static str {
        match self {
            SequencingType::Exome => "WXS",
            SequencingType::Genome => "WGS",
            SequencingType::Rna => "RNA-Seq",
        }
    }

    pub fn design_description(&self) -> &'static str {
        match self {
            SequencingType::Exome => "The exome capture utilizes the NimbleGen liquid capture on HGSC VCRome 2.1 that targets approximately 34 Mbp of genomic DNA including all coding exons of currently known disease genes (OMIM, HGMD, and GeneTests). To enhance the coverage of clinically relevant disease genes, the spike-in probe set (Exome 3 - PKV2) is used in 1:1.25 equimolar ratio with the VCRome exome capture design",
            SequencingType::Genome => "DNA was sonicated to a specific fragment size and prepared as a paired-end library with ligation of Illumina-flowcell specific adapter sequences and a unique barcode. Prepared library was then quality checked for adequate yield through fluorescent methods and quantitative PCR, as well as accurate library size and profile using bioanalysis.",
            SequencingType::Rna => "RNA-Seq consists of isolating RNA, converting it to complementary DNA (cDNA), enriching for polyadenylated transcripts or ribo-depletion to remove ribosomal RNAs, preparing the sequencing library and sequencing on an NGS platform.",
        }
    }

    /// Experiment title, e.g. "exome sequencing of homo sapiens: whole blood: Sample S1"
    pub fn experiment_title(&self, dna_source: &str, sample_id: &str) -> String {
        match self {
            SequencingType::Exome => {
                format!("exome sequencing of homo sapiens: whole blood: Sample {}", sample_id)
            }
            SequencingType::Genome => {
                format!("genome sequencing of homo sapiens: whole blood: Sample {}", sample_id)
            }
            SequencingType::Rna => {
                format!("RNA sequencing of homo sapiens: {}: Sample {}", dna_source, sample_id)
            }
        }
    }
}

/// Read-length parsing errors
#[derive(Error, Debug, PartialEq)]
pub enum ReadLengthError {
    #[error("Invalid read length '{0}'")]
    InvalidLength(String),

    #[error("Unsupported read layout: {0} reads (at most 2)")]
    TooManyReads(usize),
}

/// Per-read lengths of a (single or paired) sequencing spot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadLengths(Vec<u32>);

impl ReadLengths {
    /// Parse "100, 100" / "150," style attributes
    ///
    /// Trailing spaces and commas are tolerated; an empty attribute yields no reads.
    pub fn parse(value: &str) -> Result<Self, ReadLengthError> {
        let trimmed = value.trim_end_matches([' ', ',']);
        if trimmed.trim().is_empty() {
            return Ok(Self(Vec::new()));
        }

        let lengths = trimmed
            .split(',')
            .map(|part| {
                part.trim()
                    .parse::<u32>()
                    .map_err(|_| ReadLengthError::InvalidLength(part.trim().to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        if lengths.len() > 2 {
            return Err(ReadLengthError::TooManyReads(lengths.len()));
        }

        Ok(Self(lengths))
    }

    pub fn as_slice(&self) -> &[u32] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Total bases per spot
    pub fn spot_length(&self) -> u64 {
        self.0.iter().map(|&l| u64::from(l)).sum()
    }
}

impl From<Vec<u32>> for ReadLengths {
    fn from(lengths: Vec<u32>) -> Self {
        Self(lengths)
    }
}
