//! Content digests for change detection.
//!
//! Files are hashed by streaming fixed-size blocks through SHA-256, so a
//! chunk store with arbitrarily large files never has to be held in memory.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// Read block size for [`file_digest`].
const BLOCK_SIZE: usize = 1024 * 1024;

/// Lower-case hex SHA-256 of everything `reader` yields.
pub fn reader_digest<R: Read>(mut reader: R) -> std::io::Result<String> {
    let mut hasher = Sha256::new();
    let mut block = vec![0u8; BLOCK_SIZE];
    loop {
        let n = reader.read(&mut block)?;
        if n == 0 {
            break;
        }
        hasher.update(&block[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Lower-case hex SHA-256 of the file at `path`.
pub fn file_digest(path: &Path) -> Result<String> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    reader_digest(BufReader::new(file))
        .with_context(|| format!("Failed to read {}", path.display()))
}

/// Lower-case hex SHA-256 of an in-memory buffer.
pub fn bytes_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
