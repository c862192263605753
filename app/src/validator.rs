// ==============================================================================
// validator.rs - Container Sniffing & Checksums
// ==============================================================================
// Description: Magic-number sniffing, BGZF end-of-file marker checks and
//              streaming MD5 digests for staged sequencing files
// Author: Matt Barham
// Created: 2026-10-05
// Modified: 2026-10-12
// Version: 1.0.0
// Security: Content-based detection only, extensions are never trusted
// ==============================================================================

use md5::{Digest, Md5};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;
use tracing::debug;

/// Gzip member magic (BGZF blocks share it)
pub const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Empty BGZF block terminating every well-formed BGZF file
pub const BGZF_EOF: [u8; 28] = [
    0x1f, 0x8b, 0x08, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00, 0xff, 0x06, 0x00, 0x42, 0x43,
    0x02, 0x00, 0x1b, 0x00, 0x03, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

/// Streaming read size for checksums (1 MiB)
const CHECKSUM_CHUNK: usize = 1024 * 1024;

fn read_magic_number(path: &Path, len: usize) -> io::Result<Vec<u8>> {
    let mut file = File::open(path)?;
    let mut buffer = Vec::with_capacity(len);
    file.by_ref().take(len as u64).read_to_end(&mut buffer)?;
    Ok(buffer)
}

fn verify_magic_number(expected: &[u8], actual: &[u8]) -> bool {
    expected.len() <= actual.len() && expected.iter().zip(actual.iter()).all(|(e, a)| e == a)
}

/// True when the file starts with the gzip magic bytes
pub fn is_gzip(path: &Path) -> io::Result<bool> {
    let magic = read_magic_number(path, GZIP_MAGIC.len())?;
    Ok(verify_magic_number(&GZIP_MAGIC, &magic))
}

/// True when the file ends with the BGZF EOF block
pub fn has_bgzf_eof(path: &Path) -> io::Result<bool> {
    let mut file = File::open(path)?;
    let len = file.metadata()?.len();
    if len < BGZF_EOF.len() as u64 {
        return Ok(false);
    }

    file.seek(SeekFrom::End(-(BGZF_EOF.len() as i64)))?;
    let mut tail = [0u8; BGZF_EOF.len()];
    file.read_exact(&mut tail)?;
    Ok(tail == BGZF_EOF)
}

/// Hex MD5 digest of a file, read in fixed-size chunks
pub fn compute_md5(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Md5::new();
    let mut buffer = vec![0u8; CHECKSUM_CHUNK];

    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    let digest = format!("{:x}", hasher.finalize());
    debug!("MD5 {:?}: {}", path, digest);
    Ok(digest)
}
