//! Chunk store scanner.
//!
//! Walks `chunks_dir/<category>/*.txt` and produces one [`ChunkFile`] per
//! chunk with its content digest. Only the immediate children of category
//! folders are considered; files at the top level or nested deeper are
//! ignored. Results are sorted by relative path so repeated scans of an
//! unchanged store yield identical sequences.

use anyhow::{Context, Result};
use std::path::Path;
use walkdir::WalkDir;

use crate::hashing::file_digest;
use crate::models::ChunkFile;

/// Scan the chunk store.
///
/// Returns `Ok(None)` when `chunks_dir` does not exist, so callers can report
/// "nothing to do" instead of failing.
pub fn scan_chunk_store(chunks_dir: &Path, root: &Path) -> Result<Option<Vec<ChunkFile>>> {
    if !chunks_dir.is_dir() {
        return Ok(None);
    }

    let chunks_dir = chunks_dir
        .canonicalize()
        .with_context(|| format!("Failed to resolve {}", chunks_dir.display()))?;
    let root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());

    let mut items = Vec::new();

    let walker = WalkDir::new(&chunks_dir).min_depth(2).max_depth(2);
    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("txt") {
            continue;
        }

        let category = match path
            .parent()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
        {
            Some(c) => c,
            None => continue,
        };
        let filename = entry.file_name().to_string_lossy().into_owned();

        items.push(ChunkFile {
            source_path: path.to_path_buf(),
            relative_path: relative_slash_path(path, &root),
            category,
            filename,
            content_hash: file_digest(path)?,
        });
    }

    items.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));

    Ok(Some(items))
}

/// `path` relative to `root` with `/` separators; the full path when `path`
/// lies outside `root`.
pub fn relative_slash_path(path: &Path, root: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative.to_string_lossy().replace('\\', "/")
}
