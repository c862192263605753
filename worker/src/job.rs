// ==============================================================================
// job.rs - Job Model
// ==============================================================================
// Description: Typed job parsed from queue message attributes
// Author: Matt Barham
// Created: 2026-10-11
// Modified: 2026-10-18
// Version: 1.0.0
// ==============================================================================

use std::collections::HashMap;
use submission_processor::metadata::LibraryDescriptor;
use submission_processor::models::{FileKind, ReadLengths, SequencingType};

use crate::error::JobError;
use crate::storage::ObjectLocation;

pub const ATTR_DNA_DATA: &str = "dna_data";
pub const ATTR_EXPORTFILE_ID: &str = "exportfile_id";
pub const ATTR_FILE_TYPE: &str = "file_type";
pub const ATTR_FILE_URL: &str = "file_url";
pub const ATTR_FILESERVICE_UUID: &str = "fileservice_uuid";
pub const ATTR_INSTRUMENT_MODEL: &str = "instrument_model";
pub const ATTR_READ_LENGTHS: &str = "read_lengths";
pub const ATTR_SAMPLE_ID: &str = "sample_id";
pub const ATTR_SEQUENCE_TYPE: &str = "sequence_type";
pub const ATTR_UDN_ID: &str = "udn_id";

/// Every attribute a message must carry, in the order they are checked
pub const REQUIRED_ATTRIBUTES: [&str; 10] = [
    ATTR_DNA_DATA,
    ATTR_EXPORTFILE_ID,
    ATTR_FILE_TYPE,
    ATTR_FILE_URL,
    ATTR_FILESERVICE_UUID,
    ATTR_INSTRUMENT_MODEL,
    ATTR_READ_LENGTHS,
    ATTR_SAMPLE_ID,
    ATTR_SEQUENCE_TYPE,
    ATTR_UDN_ID,
];

/// One submission request
#[derive(Debug, Clone)]
pub struct Job {
    pub message_id: String,
    pub participant_id: String,
    pub sample_id: String,
    pub kind: FileKind,
    pub source: ObjectLocation,
    pub fileservice_uuid: String,
    pub instrument_model: String,
    pub read_lengths: ReadLengths,
    pub dna_source: String,
    pub reference_genome: String,
    pub sequencing_type: SequencingType,
    /// Export record to mark complete
    pub export_id: String,
}

fn malformed(message: impl Into<String>) -> JobError {
    JobError::Malformed(message.into())
}

impl Job {
    /// Parse and check message attributes
    ///
    /// Any missing, empty or unparseable attribute makes the job malformed.
    pub fn from_attributes(
        message_id: &str,
        attributes: &HashMap<String, String>,
    ) -> Result<Self, JobError> {
        for name in REQUIRED_ATTRIBUTES {
            match attributes.get(name) {
                Some(value) if !value.trim().is_empty() => {}
                Some(_) => return Err(malformed(format!("attribute '{}' is empty", name))),
                None => return Err(malformed(format!("attribute '{}' is missing", name))),
            }
        }
        let attr = |name: &str| attributes.get(name).map(|v| v.trim()).unwrap_or_default();

        let (dna_source, reference_genome) = attr(ATTR_DNA_DATA)
            .split_once('|')
            .map(|(source, reference)| (source.trim(), reference.trim()))
            .filter(|(source, reference)| !source.is_empty() && !reference.is_empty())
            .ok_or_else(|| malformed("dna_data must be '{source}|{reference}'"))?;

        let kind = FileKind::from_attribute(attr(ATTR_FILE_TYPE))
            .ok_or_else(|| malformed(format!("unknown file_type '{}'", attr(ATTR_FILE_TYPE))))?;

        let source = ObjectLocation::parse_url(attr(ATTR_FILE_URL))
            .ok_or_else(|| malformed(format!("unusable file_url '{}'", attr(ATTR_FILE_URL))))?;

        let fileservice_uuid = attr(ATTR_FILESERVICE_UUID);
        if fileservice_uuid.contains(['/', '\\']) || fileservice_uuid == "." || fileservice_uuid == ".." {
            return Err(malformed(format!("fileservice_uuid '{}' is not a file name", fileservice_uuid)));
        }

        let sample_id = attr(ATTR_SAMPLE_ID);
        if sample_id.chars().any(char::is_control) {
            return Err(malformed("sample_id contains control characters"));
        }

        let code: i64 = attr(ATTR_SEQUENCE_TYPE)
            .parse()
            .map_err(|_| malformed(format!("sequence_type '{}' is not an integer", attr(ATTR_SEQUENCE_TYPE))))?;
        let sequencing_type = SequencingType::from_code(code)
            .ok_or_else(|| malformed(format!("unsupported sequence_type {}", code)))?;

        let read_lengths = ReadLengths::parse(attr(ATTR_READ_LENGTHS))
            .map_err(|e| malformed(format!("read_lengths: {}", e)))?;

        Ok(Self {
            message_id: message_id.to_string(),
            participant_id: attr(ATTR_UDN_ID).to_string(),
            sample_id: sample_id.to_string(),
            kind,
            source,
            fileservice_uuid: fileservice_uuid.to_string(),
            instrument_model: attr(ATTR_INSTRUMENT_MODEL).to_string(),
            read_lengths,
            dna_source: dna_source.to_string(),
            reference_genome: reference_genome.to_string(),
            sequencing_type,
            export_id: attr(ATTR_EXPORTFILE_ID).to_string(),
        })
    }

    /// `{fileservice_uuid}.{bam|vcf}`
    pub fn upload_file_name(&self) -> String {
        format!("{}.{}", self.fileservice_uuid, self.kind.extension())
    }

    pub fn library_descriptor(&self, md5: &str) -> LibraryDescriptor {
        LibraryDescriptor {
            sample_id: self.sample_id.clone(),
            fileservice_uuid: self.fileservice_uuid.clone(),
            upload_file_name: self.upload_file_name(),
            instrument_model: self.instrument_model.clone(),
            md5: md5.to_string(),
            read_lengths: self.read_lengths.clone(),
            sequencing_type: self.sequencing_type,
            dna_source: self.dna_source.clone(),
            reference_genome: Some(self.reference_genome.clone()),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn attributes(file_type: &str, url: &str) -> HashMap<String, String> {
        [
            (ATTR_DNA_DATA, "whole blood|GRCh38"),
            (ATTR_EXPORTFILE_ID, "4242"),
            (ATTR_FILE_TYPE, file_type),
            (ATTR_FILE_URL, url),
            (ATTR_FILESERVICE_UUID, "9d1c6f0e-5b7a-4c11-9e0a-2f3b4c5d6e7f"),
            (ATTR_INSTRUMENT_MODEL, "Illumina HiSeq 2500"),
            (ATTR_READ_LENGTHS, "101,101"),
            (ATTR_SAMPLE_ID, "S1"),
            (ATTR_SEQUENCE_TYPE, "3"),
            (ATTR_UDN_ID, "UDN123456"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    #[test]
    fn test_parse_complete_job() {
        let job = Job::from_attributes("m-1", &attributes("BAM", "s3://udn-files/UDN123456/sample.bam")).unwrap();

        assert_eq!(job.kind, FileKind::Alignment);
        assert_eq!(job.source, ObjectLocation::new("udn-files", "UDN123456/sample.bam"));
        assert_eq!(job.dna_source, "whole blood");
        assert_eq!(job.reference_genome, "GRCh38");
        assert_eq!(job.sequencing_type, SequencingType::Genome);
        assert_eq!(job.read_lengths.as_slice(), &[101, 101]);
        assert_eq!(job.upload_file_name(), "9d1c6f0e-5b7a-4c11-9e0a-2f3b4c5d6e7f.bam");
        assert_eq!(job.export_id, "4242");
    }

    #[test]
    fn test_library_descriptor() {
        let job = Job::from_attributes("m-1", &attributes("BAM", "s3://b/k.bam")).unwrap();
        let library = job.library_descriptor("0123abcd");

        assert_eq!(library.md5, "0123abcd");
        assert_eq!(library.upload_file_name, job.upload_file_name());
        assert_eq!(library.reference_genome.as_deref(), Some("GRCh38"));
    }

    #[test]
    fn test_missing_attribute_is_malformed() {
        let mut attrs = attributes("VCF", "s3://b/k.vcf");
        attrs.remove(ATTR_SAMPLE_ID);

        let err = Job::from_attributes("m-1", &attrs).unwrap_err();
        assert!(matches!(err, JobError::Malformed(ref m) if m.contains("sample_id")));
    }

    #[test]
    fn test_empty_attribute_is_malformed() {
        let mut attrs = attributes("VCF", "s3://b/k.vcf");
        attrs.insert(ATTR_INSTRUMENT_MODEL.to_string(), "  ".to_string());

        assert!(Job::from_attributes("m-1", &attrs).is_err());
    }

    #[test]
    fn test_unparseable_values() {
        let cases = [
            (ATTR_DNA_DATA, "whole blood"),
            (ATTR_DNA_DATA, "|GRCh38"),
            (ATTR_FILE_TYPE, "CRAM"),
            (ATTR_FILE_URL, "not-a-url"),
            (ATTR_FILESERVICE_UUID, "../escape"),
            (ATTR_SEQUENCE_TYPE, "five"),
            (ATTR_SEQUENCE_TYPE, "7"),
            (ATTR_READ_LENGTHS, "101,x"),
            (ATTR_READ_LENGTHS, "101,101,50"),
            (ATTR_SAMPLE_ID, "S1\tSM:other"),
        ];

        for (name, value) in cases {
            let mut attrs = attributes("BAM", "s3://b/k.bam");
            attrs.insert(name.to_string(), value.to_string());
            let err = Job::from_attributes("m-1", &attrs).unwrap_err();
            assert_eq!(err.kind(), "malformed", "{}={:?} should be rejected", name, value);
        }
    }

    #[test]
    fn test_read_lengths_tolerate_trailing_separators() {
        let mut attrs = attributes("BAM", "s3://b/k.bam");
        attrs.insert(ATTR_READ_LENGTHS.to_string(), "151, ".to_string());

        let job = Job::from_attributes("m-1", &attrs).unwrap();
        assert_eq!(job.read_lengths.as_slice(), &[151]);
    }
}
