// ==============================================================================
// variant.rs - Variant File (VCF) Normalizer
// ==============================================================================
// Description: Filters VCF meta lines and INFO annotations against a fixed
//              whitelist, substitutes the de-identified sample label, then
//              BGZF-compresses and tabix-indexes the result
// Author: Matt Barham
// Created: 2026-10-07
// Modified: 2026-10-19
// Version: 1.1.0
// Security: Only whitelisted annotations leave the building; sample columns
//           are replaced, never copied from the source header
// ==============================================================================
//
// Dependencies:
// - noodles-vcf: https://docs.rs/noodles-vcf/0.81.0/noodles_vcf/ (output check, indexing)
// - noodles-bgzf: https://docs.rs/noodles-bgzf/0.43.0/noodles_bgzf/
// - noodles-tabix: https://docs.rs/noodles-tabix/0.57.0/noodles_tabix/
// - flate2: transparent gzip input
//
// ==============================================================================

use flate2::read::MultiGzDecoder;
use noodles_bgzf as bgzf;
use noodles_tabix as tabix;
use noodles_vcf as vcf;
use std::collections::HashSet;
use std::ffi::OsString;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::models::{IndexedVariantFile, NormalizedFile};
use crate::scratch::silent_remove;
use crate::validator::is_gzip;

/// INFO keys allowed in submitted variant files (case-sensitive)
pub const WHITELISTED_ANNOTATIONS: [&str; 23] = [
    "AC",
    "AF",
    "AN",
    "BaseQRankSum",
    "ClippingRankSum",
    "DP",
    "FS",
    "GQ_MEAN",
    "GQ_STDDEV",
    "InbreedingCoeff",
    "MQ",
    "MQ0",
    "MQRankSum",
    "MS",
    "NCC",
    "NEGATIVE_TRAIN_SITE",
    "P",
    "POSITIVE_TRAIN_SITE",
    "QD",
    "ReadPosRankSum",
    "SOR",
    "VQSLOD",
    "culprit",
];

/// Structural meta-line tags that survive trimming
const ALLOWED_META_PREFIXES: [&str; 6] = [
    "##fileformat",
    "##INFO",
    "##FILTER",
    "##FORMAT",
    "##ALT",
    "##contig",
];

/// Fixed VCF columns (CHROM..FORMAT)
const FIXED_COLUMNS: usize = 9;

const INFO_COLUMN: usize = 7;

#[derive(Error, Debug)]
pub enum VariantError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Records are not sorted at {reference_sequence_name}:{position}")]
    Unsorted {
        reference_sequence_name: String,
        position: usize,
    },

    #[error("Trimmed VCF failed verification: {0}")]
    Verification(String),
}

/// Line counts from one trim pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TrimStats {
    pub header_kept: usize,
    pub header_dropped: usize,
    pub records: usize,
}

pub fn is_whitelisted(key: &str) -> bool {
    WHITELISTED_ANNOTATIONS.contains(&key)
}

fn info_declaration_id(line: &str) -> Option<&str> {
    let rest = line.strip_prefix("##INFO=<ID=")?;
    let end = rest.find([',', '>']).unwrap_or(rest.len());
    Some(&rest[..end])
}

/// Filter one header line; `None` drops it
///
/// The column-header line is cut to the nine fixed columns and the sample
/// label(s) appended.
pub fn process_header_line(line: &str, sample_ids: &[&str]) -> Option<String> {
    let body = line.trim_end_matches(['\n', '\r']);

    if body.starts_with("#CHROM") {
        let mut columns: Vec<&str> = body.split('\t').take(FIXED_COLUMNS).collect();
        columns.extend_from_slice(sample_ids);
        return Some(format!("{}\n", columns.join("\t")));
    }

    if !ALLOWED_META_PREFIXES.iter().any(|prefix| body.starts_with(prefix)) {
        return None;
    }

    if body.starts_with("##INFO") {
        match info_declaration_id(body) {
            Some(id) if is_whitelisted(id) => {}
            _ => return None,
        }
    }

    Some(format!("{}\n", body))
}

/// Keep only whitelisted INFO entries of a data line
///
/// Key/value entries match on the key, flags on the full token. An INFO field
/// left empty becomes `.`.
pub fn process_body_line(line: &str) -> String {
    let body = line.trim_end_matches(['\n', '\r']);
    let mut output = String::with_capacity(body.len() + 1);

    for (i, field) in body.split('\t').enumerate() {
        if i > 0 {
            output.push('\t');
        }
        if i == INFO_COLUMN {
            output.push_str(&filter_info(field));
        } else {
            output.push_str(field);
        }
    }

    output.push('\n');
    output
}

fn filter_info(info: &str) -> String {
    let kept: Vec<&str> = info
        .split(';')
        .filter(|entry| {
            let key = entry.split_once('=').map(|(k, _)| k).unwrap_or(*entry);
            is_whitelisted(key)
        })
        .collect();

    if kept.is_empty() {
        ".".to_string()
    } else {
        kept.join(";")
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

fn open_text(path: &Path) -> io::Result<Box<dyn BufRead>> {
    let file = File::open(path)?;
    let reader: Box<dyn Read> = if is_gzip(path)? {
        debug!("{:?} is gzip compressed", path);
        Box::new(MultiGzDecoder::new(file))
    } else {
        Box::new(file)
    };
    Ok(Box::new(BufReader::new(reader)))
}

fn trim_stream(source: &Path, destination: &Path, sample_id: &str) -> Result<TrimStats, VariantError> {
    let mut reader = open_text(source)?;
    let mut writer = BufWriter::new(File::create(destination)?);
    let mut stats = TrimStats::default();
    let sample_ids = [sample_id];
    let mut line = String::new();

    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            break;
        }

        if line.starts_with('#') {
            match process_header_line(&line, &sample_ids) {
                Some(kept) => {
                    writer.write_all(kept.as_bytes())?;
                    stats.header_kept += 1;
                }
                None => stats.header_dropped += 1,
            }
        } else if !line.trim().is_empty() {
            writer.write_all(process_body_line(&line).as_bytes())?;
            stats.records += 1;
        }
    }

    writer.flush()?;
    Ok(stats)
}

/// Trim a VCF in place
///
/// The input is moved to `{path}.bak` and streamed back into `path`. On any
/// failure the partial output is removed and the original restored.
pub fn trim_vcf(path: &Path, sample_id: &str) -> Result<TrimStats, VariantError> {
    let backup = with_suffix(path, ".bak");
    std::fs::rename(path, &backup)?;

    match trim_stream(&backup, path, sample_id) {
        Ok(stats) => {
            silent_remove(&backup)?;
            info!(
                "Trimmed {:?}: {} header lines kept, {} dropped, {} records",
                path, stats.header_kept, stats.header_dropped, stats.records
            );
            Ok(stats)
        }
        Err(e) => {
            error!("Trim of {:?} failed, restoring original: {}", path, e);
            if let Err(rm) = silent_remove(path) {
                warn!("Failed to remove partial output {:?}: {}", path, rm);
            }
            if let Err(mv) = std::fs::rename(&backup, path) {
                error!("Failed to restore {:?} from {:?}: {}", path, backup, mv);
            }
            Err(e)
        }
    }
}

/// Re-read a trimmed VCF to confirm header and records still parse
///
/// Records must be grouped by contig and ascending by position within each
/// contig, or the output cannot be indexed.
pub fn verify_vcf(path: &Path) -> Result<usize, VariantError> {
    let mut reader = vcf::io::reader::Builder::default()
        .build_from_path(path)
        .map_err(|e| VariantError::Verification(format!("{}: {}", path.display(), e)))?;

    reader
        .read_header()
        .map_err(|e| VariantError::Verification(format!("header: {}", e)))?;

    let mut finished: HashSet<String> = HashSet::new();
    let mut last: Option<(String, usize)> = None;
    let mut records = 0;

    for (i, result) in reader.records().enumerate() {
        let record =
            result.map_err(|e| VariantError::Verification(format!("record {}: {}", i + 1, e)))?;

        let name = record.reference_sequence_name();
        let position = match record.variant_start() {
            Some(Ok(start)) => usize::from(start),
            Some(Err(e)) => {
                return Err(VariantError::Verification(format!("record {}: {}", i + 1, e)))
            }
            None => return Err(VariantError::Verification(format!("record {}: missing position", i + 1))),
        };

        let out_of_order = match &last {
            Some((last_name, last_position)) if last_name == name => position < *last_position,
            Some((last_name, _)) => {
                finished.insert(last_name.clone());
                finished.contains(name)
            }
            None => false,
        };

        if out_of_order {
            return Err(VariantError::Unsorted {
                reference_sequence_name: name.to_string(),
                position,
            });
        }

        last = Some((name.to_string(), position));
        records += 1;
    }

    Ok(records)
}

/// BGZF-compress `plain` into `compressed` and write its tabix index
pub fn compress_and_index(plain: &Path, compressed: &Path, index: &Path) -> Result<(), VariantError> {
    let mut reader = File::open(plain)?;
    let mut writer = bgzf::io::Writer::new(File::create(compressed)?);
    io::copy(&mut reader, &mut writer)?;
    writer.finish()?;

    let tbi = vcf::fs::index(compressed)?;
    tabix::fs::write(index, &tbi)?;
    debug!("Indexed {:?} ({} contigs)", compressed, tbi.reference_sequences().len());
    Ok(())
}

/// Full VCF path: trim, verify, compress, index
///
/// `input` must already carry the upload name (`{uuid}.vcf`); outputs are
/// `{input}.gz` and `{input}.gz.tbi` and the plain file is removed.
pub fn normalize_variant(input: &Path, sample_id: &str) -> Result<IndexedVariantFile, VariantError> {
    info!("Normalizing variant file {:?}", input);

    trim_vcf(input, sample_id)?;
    let records = verify_vcf(input)?;
    debug!("Verified {} records", records);

    let compressed = with_suffix(input, ".gz");
    let index = with_suffix(input, ".gz.tbi");
    if let Err(e) = compress_and_index(input, &compressed, &index) {
        for partial in [&compressed, &index] {
            if let Err(rm) = silent_remove(partial) {
                warn!("Failed to remove partial output {:?}: {}", partial, rm);
            }
        }
        return Err(e);
    }
    silent_remove(input)?;

    let size = std::fs::metadata(&compressed)?.len();
    info!("Variant file normalized: {:?} ({} bytes)", compressed, size);

    Ok(IndexedVariantFile {
        compressed: NormalizedFile {
            path: compressed,
            md5: None,
            size,
        },
        index,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const VCF: &str = "##fileformat=VCFv4.2\n\
        ##source=GATK HaplotypeCaller /home/analyst/run.sh\n\
        ##INFO=<ID=AC,Number=A,Type=Integer,Description=\"Allele count\">\n\
        ##INFO=<ID=RandomTag,Number=1,Type=Integer,Description=\"Leaky\">\n\
        ##INFO=<ID=DP,Number=1,Type=Integer,Description=\"Depth\">\n\
        ##FILTER=<ID=LowQual,Description=\"Low quality\">\n\
        ##FORMAT=<ID=GT,Number=1,Type=String,Description=\"Genotype\">\n\
        ##contig=<ID=chr1,length=248956422>\n\
        ##GATKCommandLine=<ID=HaplotypeCaller,CommandLine=\"--sample UDN123456\">\n\
        #CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\tUDN123456\n\
        chr1\t100\t.\tA\tG\t50\tPASS\tAC=1;RandomTag=5;DP=10\tGT\t0/1\n\
        chr1\t200\t.\tC\tT\t60\tPASS\tRandomTag=3\tGT\t1/1\n";

    fn read_bgzf_text(path: &Path) -> String {
        let mut text = String::new();
        MultiGzDecoder::new(File::open(path).unwrap())
            .read_to_string(&mut text)
            .unwrap();
        text
    }

    #[test]
    fn test_info_declarations() {
        assert!(process_header_line("##INFO=<ID=AC,Number=A,Type=Integer,Description=\"x\">\n", &["S1"]).is_some());
        assert!(process_header_line("##INFO=<ID=RandomTag,Number=1,Type=Integer,Description=\"x\">\n", &["S1"]).is_none());
        // Prefix of a whitelisted key is not whitelisted
        assert!(process_header_line("##INFO=<ID=ACX,Number=1,Type=Integer,Description=\"x\">\n", &["S1"]).is_none());
    }

    #[test]
    fn test_meta_allow_list() {
        assert!(process_header_line("##fileformat=VCFv4.2\n", &["S1"]).is_some());
        assert!(process_header_line("##contig=<ID=chr1,length=10>\n", &["S1"]).is_some());
        assert!(process_header_line("##ALT=<ID=DEL,Description=\"Deletion\">\n", &["S1"]).is_some());
        assert!(process_header_line("##source=GATK\n", &["S1"]).is_none());
        assert!(process_header_line("##reference=file:///home/analyst/hg19.fa\n", &["S1"]).is_none());
    }

    #[test]
    fn test_column_header_substitution() {
        let line = "#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\tUDN1\tUDN2\n";
        assert_eq!(
            process_header_line(line, &["S1"]).unwrap(),
            "#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\tS1\n"
        );
    }

    #[test]
    fn test_body_line_filtering() {
        let line = "chr1\t100\t.\tA\tG\t50\tPASS\tAC=1;RandomTag=5;DP=10\tGT\t0/1\n";
        assert_eq!(
            process_body_line(line),
            "chr1\t100\t.\tA\tG\t50\tPASS\tAC=1;DP=10\tGT\t0/1\n"
        );
    }

    #[test]
    fn test_body_line_flags_and_order() {
        let line = "chr1\t1\t.\tA\tG\t.\t.\tculprit=MQ;DB;POSITIVE_TRAIN_SITE;AF=0.5\n";
        assert_eq!(
            process_body_line(line),
            "chr1\t1\t.\tA\tG\t.\t.\tculprit=MQ;POSITIVE_TRAIN_SITE;AF=0.5\n"
        );
        assert_eq!(
            process_body_line("chr1\t1\t.\tA\tG\t.\t.\tDB;Other=1"),
            "chr1\t1\t.\tA\tG\t.\t.\t.\n"
        );
    }

    #[test]
    fn test_trim_vcf_plain() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("u1.vcf");
        std::fs::write(&path, VCF).unwrap();

        let stats = trim_vcf(&path, "S1").unwrap();
        let trimmed = std::fs::read_to_string(&path).unwrap();

        assert_eq!(stats.records, 2);
        assert_eq!(stats.header_dropped, 3);
        assert!(!trimmed.contains("UDN123456"));
        assert!(!trimmed.contains("RandomTag"));
        assert!(!dir.path().join("u1.vcf.bak").exists());
    }

    #[test]
    fn test_trim_vcf_gzip_input() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("u2.vcf");
        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(VCF.as_bytes()).unwrap();
        std::fs::write(&path, encoder.finish().unwrap()).unwrap();

        trim_vcf(&path, "S1").unwrap();
        let trimmed = std::fs::read_to_string(&path).unwrap();
        assert!(trimmed.starts_with("##fileformat=VCFv4.2\n"));
        assert!(trimmed.contains("\tFORMAT\tS1\n"));
    }

    #[test]
    fn test_trim_vcf_restores_original_on_failure() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("u3.vcf");
        let mut original = VCF.as_bytes().to_vec();
        original.extend_from_slice(b"chr1\t300\t.\tA\tG\t1\tPASS\t\xff\xfe\n");
        std::fs::write(&path, &original).unwrap();

        assert!(trim_vcf(&path, "S1").is_err());
        assert_eq!(std::fs::read(&path).unwrap(), original);
        assert!(!dir.path().join("u3.vcf.bak").exists());
    }

    #[test]
    fn test_normalize_variant() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("u4.vcf");
        std::fs::write(&path, VCF).unwrap();

        let output = normalize_variant(&path, "S1").unwrap();

        assert_eq!(output.compressed.path, dir.path().join("u4.vcf.gz"));
        assert_eq!(output.index, dir.path().join("u4.vcf.gz.tbi"));
        assert!(output.index.exists());
        assert!(!path.exists());

        let text = read_bgzf_text(&output.compressed.path);
        let chrom = text.lines().find(|l| l.starts_with("#CHROM")).unwrap();
        assert!(chrom.ends_with("\tS1"));
        let first = text.lines().find(|l| !l.starts_with('#')).unwrap();
        assert_eq!(first.split('\t').nth(7), Some("AC=1;DP=10"));
    }

    #[test]
    fn test_normalize_variant_rejects_unsorted_records() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("u5.vcf");
        let unsorted = VCF.replace("chr1\t200", "chr1\t50");
        std::fs::write(&path, unsorted).unwrap();

        let err = normalize_variant(&path, "S1").unwrap_err();
        assert!(matches!(err, VariantError::Unsorted { position: 50, .. }));
        assert!(!dir.path().join("u5.vcf.gz").exists());
    }

    const TWO_CONTIGS: &str = "##fileformat=VCFv4.2\n\
        ##INFO=<ID=DP,Number=1,Type=Integer,Description=\"Depth\">\n\
        ##contig=<ID=chr1,length=248956422>\n\
        ##contig=<ID=chr2,length=242193529>\n\
        #CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\tUDN123456\n\
        chr1\t100\t.\tA\tG\t50\tPASS\tDP=10\tGT\t0/1\n\
        chr1\t5000\t.\tC\tT\t50\tPASS\tDP=11\tGT\t0/1\n\
        chr2\t150\t.\tG\tA\t50\tPASS\tDP=12\tGT\t1/1\n\
        chr2\t900\t.\tT\tC\t50\tPASS\tDP=13\tGT\t0/1\n\
        chr2\t2500\t.\tA\tT\t50\tPASS\tDP=14\tGT\t0/1\n";

    fn query_positions(path: &Path, region: &str) -> Vec<(String, usize)> {
        let mut reader = vcf::io::indexed_reader::Builder::default()
            .build_from_path(path)
            .unwrap();
        let header = reader.read_header().unwrap();
        let region: noodles_core::Region = region.parse().unwrap();

        reader
            .query(&header, &region)
            .unwrap()
            .map(|result| {
                let record = result.unwrap();
                let start = record.variant_start().unwrap().unwrap();
                (record.reference_sequence_name().to_string(), usize::from(start))
            })
            .collect()
    }

    #[test]
    fn test_index_answers_region_queries() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("u6.vcf");
        std::fs::write(&path, TWO_CONTIGS).unwrap();

        let output = normalize_variant(&path, "S1").unwrap();

        let index = tabix::fs::read(&output.index).unwrap();
        assert_eq!(index.reference_sequences().len(), 2);

        assert_eq!(
            query_positions(&output.compressed.path, "chr2:100-1000"),
            [("chr2".to_string(), 150), ("chr2".to_string(), 900)]
        );
        assert_eq!(
            query_positions(&output.compressed.path, "chr1:4000-6000"),
            [("chr1".to_string(), 5000)]
        );
        assert!(query_positions(&output.compressed.path, "chr2:3000-4000").is_empty());
    }

    #[test]
    fn test_normalize_variant_rejects_interleaved_contigs() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("u7.vcf");
        let interleaved = format!("{}chr1\t6000\t.\tG\tC\t50\tPASS\tDP=9\tGT\t0/1\n", TWO_CONTIGS);
        std::fs::write(&path, interleaved).unwrap();

        let err = normalize_variant(&path, "S1").unwrap_err();
        assert!(matches!(
            err,
            VariantError::Unsorted { ref reference_sequence_name, position: 6000 } if reference_sequence_name == "chr1"
        ));
        assert!(!dir.path().join("u7.vcf.gz.tbi").exists());
    }
}
