// ==============================================================================
// metadata.rs - Submission Metadata Builder
// ==============================================================================
// Description: Experiment, run and submission XML for one alignment file,
//              schema validation and packaging into a single tar
// Author: Matt Barham
// Created: 2026-10-09
// Modified: 2026-10-17
// Version: 1.0.0
// ==============================================================================
//
// Documents:
//   experiment.xml  EXPERIMENT_SET/EXPERIMENT (library + spot layout)
//   run.xml         RUN_SET/RUN (checksum, file name, assembly)
//   submission.xml  SUBMISSION (contacts, ADD actions for the two above)
//
// Each document must pass its published SRA schema before packaging.
//
// ==============================================================================

use quick_xml::events::{BytesDecl, BytesText, Event};
use quick_xml::Writer;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::models::{ReadLengths, SequencingType};
use crate::scratch::silent_remove;

pub const EXPERIMENT_XSD: &str =
    "http://www.ncbi.nlm.nih.gov/viewvc/v1/trunk/sra/doc/SRA/SRA.experiment.xsd?view=co";
pub const RUN_XSD: &str =
    "http://www.ncbi.nlm.nih.gov/viewvc/v1/trunk/sra/doc/SRA/SRA.run.xsd?view=co";
pub const SUBMISSION_XSD: &str =
    "http://www.ncbi.nlm.nih.gov/viewvc/v1/trunk/sra/doc/SRA/SRA.submission.xsd?view=co";

const XSI_NAMESPACE: &str = "http://www.w3.org/2001/XMLSchema-instance";

pub const EXPERIMENT_FILE: &str = "experiment.xml";
pub const RUN_FILE: &str = "run.xml";
pub const SUBMISSION_FILE: &str = "submission.xml";

const PLATFORM: &str = "ILLUMINA";
const LIBRARY_SELECTION: &str = "RANDOM";
const READ_CLASS: &str = "Application Read";

#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Unsupported read layout: {0} reads (at most 2)")]
    TooManyReads(usize),

    #[error("Generated XML is not UTF-8: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),

    #[error("Schema validator could not run: {0}")]
    ValidatorUnavailable(String),

    #[error("Schema validation failed (experiment={experiment}, run={run}, submission={submission})")]
    Validation {
        experiment: i32,
        run: i32,
        submission: i32,
    },
}

/// Recipient of repository status and error mail
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub name: String,
    pub email: String,
}

/// Per-deployment submission settings
#[derive(Debug, Clone)]
pub struct SubmissionProfile {
    /// Submitting center (SUBMITTER_ID namespace, center_name)
    pub center: String,
    /// Study accession, e.g. phs001232
    pub accession: String,
    /// Submission alias suffix, e.g. v2
    pub accession_version: String,
    pub contacts: Vec<Contact>,
    /// Ask the repository to load with latf-load
    pub latf_load: bool,
}

impl SubmissionProfile {
    pub fn alias(&self) -> String {
        format!("{}.{}", self.accession, self.accession_version)
    }
}

/// Everything the three documents say about one alignment file
#[derive(Debug, Clone)]
pub struct LibraryDescriptor {
    pub sample_id: String,
    pub fileservice_uuid: String,
    /// `{fileservice_uuid}.bam`
    pub upload_file_name: String,
    pub instrument_model: String,
    pub md5: String,
    pub read_lengths: ReadLengths,
    pub sequencing_type: SequencingType,
    pub dna_source: String,
    pub reference_genome: Option<String>,
}

impl LibraryDescriptor {
    pub fn title(&self) -> String {
        self.sequencing_type
            .experiment_title(&self.dna_source, &self.sample_id)
    }
}

fn new_writer() -> io::Result<Writer<Vec<u8>>> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    Ok(writer)
}

fn finish(writer: Writer<Vec<u8>>) -> Result<String, MetadataError> {
    let mut xml = String::from_utf8(writer.into_inner())?;
    xml.push('\n');
    Ok(xml)
}

fn text_element<W: io::Write>(writer: &mut Writer<W>, name: &str, text: &str) -> io::Result<()> {
    writer
        .create_element(name)
        .write_text_content(BytesText::new(text))?;
    Ok(())
}

fn submitter_id<W: io::Write>(writer: &mut Writer<W>, namespace: &str, id: &str) -> io::Result<()> {
    writer.create_element("IDENTIFIERS").write_inner_content(|w| {
        w.create_element("SUBMITTER_ID")
            .with_attribute(("namespace", namespace))
            .write_text_content(BytesText::new(id))?;
        Ok(())
    })?;
    Ok(())
}

fn tag_value<W: io::Write>(writer: &mut Writer<W>, element: &str, tag: &str, value: &str) -> io::Result<()> {
    writer.create_element(element).write_inner_content(|w| {
        text_element(w, "TAG", tag)?;
        text_element(w, "VALUE", value)
    })?;
    Ok(())
}

fn spot_descriptor<W: io::Write>(writer: &mut Writer<W>, lengths: &[u32]) -> io::Result<()> {
    let spot_length: u64 = lengths.iter().map(|&l| u64::from(l)).sum();

    writer.create_element("SPOT_DESCRIPTOR").write_inner_content(|w| {
        w.create_element("SPOT_DECODE_SPEC").write_inner_content(|w| {
            if spot_length > 0 {
                text_element(w, "SPOT_LENGTH", &spot_length.to_string())?;
            }
            for (index, _) in lengths.iter().enumerate() {
                let (read_type, base_coord) = match index {
                    0 => ("Forward", 1),
                    _ => ("Reverse", u64::from(lengths[0]) + 1),
                };
                w.create_element("READ_SPEC").write_inner_content(|w| {
                    text_element(w, "READ_INDEX", &index.to_string())?;
                    text_element(w, "READ_CLASS", READ_CLASS)?;
                    text_element(w, "READ_TYPE", read_type)?;
                    text_element(w, "BASE_COORD", &base_coord.to_string())
                })?;
            }
            Ok(())
        })?;
        Ok(())
    })?;
    Ok(())
}

/// EXPERIMENT_SET document
pub fn experiment_xml(
    library: &LibraryDescriptor,
    profile: &SubmissionProfile,
) -> Result<String, MetadataError> {
    let lengths = library.read_lengths.as_slice();
    if lengths.len() > 2 {
        return Err(MetadataError::TooManyReads(lengths.len()));
    }
    let sequencing = library.sequencing_type;

    let mut writer = new_writer()?;
    writer.create_element("EXPERIMENT_SET").write_inner_content(|w| {
        w.create_element("EXPERIMENT").write_inner_content(|w| {
            submitter_id(w, &profile.center, &library.sample_id)?;
            text_element(w, "TITLE", &library.title())?;
            w.create_element("STUDY_REF")
                .with_attribute(("accession", profile.accession.as_str()))
                .write_empty()?;

            w.create_element("DESIGN").write_inner_content(|w| {
                text_element(w, "DESIGN_DESCRIPTION", sequencing.design_description())?;
                w.create_element("SAMPLE_DESCRIPTOR")
                    .with_attribute(("refname", library.sample_id.as_str()))
                    .with_attribute(("refcenter", profile.accession.as_str()))
                    .write_empty()?;
                w.create_element("LIBRARY_DESCRIPTOR").write_inner_content(|w| {
                    text_element(w, "LIBRARY_NAME", &library.sample_id)?;
                    text_element(w, "LIBRARY_STRATEGY", sequencing.library_strategy())?;
                    text_element(w, "LIBRARY_SOURCE", sequencing.library_source())?;
                    text_element(w, "LIBRARY_SELECTION", LIBRARY_SELECTION)?;
                    w.create_element("LIBRARY_LAYOUT").write_inner_content(|w| {
                        w.create_element("PAIRED").write_empty()?;
                        Ok(())
                    })?;
                    Ok(())
                })?;
                if !lengths.is_empty() {
                    spot_descriptor(w, lengths)?;
                }
                Ok(())
            })?;

            w.create_element("PLATFORM").write_inner_content(|w| {
                w.create_element(PLATFORM).write_inner_content(|w| {
                    text_element(w, "INSTRUMENT_MODEL", &library.instrument_model)
                })?;
                Ok(())
            })?;

            w.create_element("EXPERIMENT_ATTRIBUTES").write_inner_content(|w| {
                tag_value(
                    w,
                    "EXPERIMENT_ATTRIBUTE",
                    "alignment_software",
                    sequencing.alignment_software(),
                )
            })?;
            Ok(())
        })?;
        Ok(())
    })?;

    finish(writer)
}

/// RUN_SET document
pub fn run_xml(library: &LibraryDescriptor, profile: &SubmissionProfile) -> Result<String, MetadataError> {
    let mut writer = new_writer()?;
    writer.create_element("RUN_SET").write_inner_content(|w| {
        w.create_element("RUN").write_inner_content(|w| {
            submitter_id(w, &profile.center, &library.fileservice_uuid)?;
            w.create_element("EXPERIMENT_REF").write_inner_content(|w| {
                submitter_id(w, &profile.center, &library.sample_id)
            })?;

            w.create_element("DATA_BLOCK").write_inner_content(|w| {
                w.create_element("FILES").write_inner_content(|w| {
                    w.create_element("FILE")
                        .with_attribute(("checksum", library.md5.as_str()))
                        .with_attribute(("checksum_method", "MD5"))
                        .with_attribute(("filename", library.upload_file_name.as_str()))
                        .with_attribute(("filetype", "bam"))
                        .write_empty()?;
                    Ok(())
                })?;
                Ok(())
            })?;

            if library.reference_genome.is_some() || profile.latf_load {
                w.create_element("RUN_ATTRIBUTES").write_inner_content(|w| {
                    if let Some(reference) = &library.reference_genome {
                        tag_value(w, "RUN_ATTRIBUTE", "assembly", reference)?;
                    }
                    if profile.latf_load {
                        tag_value(w, "RUN_ATTRIBUTE", "loader", "latf-load")?;
                    }
                    Ok(())
                })?;
            }
            Ok(())
        })?;
        Ok(())
    })?;

    finish(writer)
}

/// SUBMISSION document
pub fn submission_xml(profile: &SubmissionProfile) -> Result<String, MetadataError> {
    let alias = profile.alias();

    let mut writer = new_writer()?;
    writer
        .create_element("SUBMISSION")
        .with_attribute(("alias", alias.as_str()))
        .with_attribute(("center_name", profile.center.as_str()))
        .with_attribute(("xmlns:xsi", XSI_NAMESPACE))
        .with_attribute(("xsi:noNamespaceSchemaLocation", SUBMISSION_XSD))
        .write_inner_content(|w| {
            w.create_element("CONTACTS").write_inner_content(|w| {
                for contact in &profile.contacts {
                    w.create_element("CONTACT")
                        .with_attribute(("name", contact.name.as_str()))
                        .with_attribute(("inform_on_error", contact.email.as_str()))
                        .with_attribute(("inform_on_status", contact.email.as_str()))
                        .write_empty()?;
                }
                Ok(())
            })?;

            w.create_element("ACTIONS").write_inner_content(|w| {
                for (source, schema) in [(EXPERIMENT_FILE, "experiment"), (RUN_FILE, "run")] {
                    w.create_element("ACTION").write_inner_content(|w| {
                        w.create_element("ADD")
                            .with_attribute(("source", source))
                            .with_attribute(("schema", schema))
                            .write_empty()?;
                        Ok(())
                    })?;
                }
                Ok(())
            })?;
            Ok(())
        })?;

    finish(writer)
}

/// Checks a document against a published XSD
pub trait SchemaValidator: Send + Sync {
    /// Validator exit status (0 = valid)
    fn validate(&self, document: &Path, schema: &str) -> Result<i32, MetadataError>;
}

/// `xmllint --noout --schema <xsd> <document>`
pub struct XmllintValidator {
    binary: PathBuf,
}

impl XmllintValidator {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl SchemaValidator for XmllintValidator {
    fn validate(&self, document: &Path, schema: &str) -> Result<i32, MetadataError> {
        let output = Command::new(&self.binary)
            .arg("--noout")
            .arg("--schema")
            .arg(schema)
            .arg(document)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| MetadataError::ValidatorUnavailable(format!("{}: {}", self.binary.display(), e)))?;

        let code = output.status.code().unwrap_or(-1);
        if code != 0 {
            error!(
                "Schema validation of {:?} failed ({}): {}",
                document,
                code,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(code)
    }
}

/// Builds, validates and packages the metadata for one alignment file
pub struct MetadataBuilder<'a> {
    profile: &'a SubmissionProfile,
    validator: &'a dyn SchemaValidator,
}

impl<'a> MetadataBuilder<'a> {
    pub fn new(profile: &'a SubmissionProfile, validator: &'a dyn SchemaValidator) -> Self {
        Self { profile, validator }
    }

    /// Write `{upload_file_name}.tar` into `dir`
    ///
    /// All three documents must validate; the loose XML files are removed
    /// whatever the outcome.
    pub fn build_package(&self, library: &LibraryDescriptor, dir: &Path) -> Result<PathBuf, MetadataError> {
        let documents = [
            (dir.join(EXPERIMENT_FILE), experiment_xml(library, self.profile)?, EXPERIMENT_XSD),
            (dir.join(RUN_FILE), run_xml(library, self.profile)?, RUN_XSD),
            (dir.join(SUBMISSION_FILE), submission_xml(self.profile)?, SUBMISSION_XSD),
        ];

        let result = self.validate_and_package(library, dir, &documents);

        for (path, _, _) in &documents {
            silent_remove(path)?;
        }
        result
    }

    fn validate_and_package(
        &self,
        library: &LibraryDescriptor,
        dir: &Path,
        documents: &[(PathBuf, String, &str); 3],
    ) -> Result<PathBuf, MetadataError> {
        let mut codes = [0i32; 3];
        for (i, (path, xml, schema)) in documents.iter().enumerate() {
            std::fs::write(path, xml)?;
            codes[i] = self.validator.validate(path, schema)?;
            debug!("Validated {:?}: exit {}", path, codes[i]);
        }

        if codes.iter().any(|&code| code != 0) {
            return Err(MetadataError::Validation {
                experiment: codes[0],
                run: codes[1],
                submission: codes[2],
            });
        }

        let package = dir.join(format!("{}.tar", library.upload_file_name));
        let mut builder = tar::Builder::new(File::create(&package)?);
        for (path, _, _) in documents {
            if let Some(name) = path.file_name() {
                builder.append_path_with_name(path, name)?;
            }
        }
        builder.into_inner()?;

        info!("Metadata package written: {:?}", package);
        Ok(package)
    }
}
