//! `erag index status` and `erag index repair`.
//!
//! Repair rewrites the `path`/`rel_path` of every metadata record whose
//! chunk file can be found under `chunks_dir`: first in the record's own
//! category folder, then anywhere, provided the name is unique. Records keep
//! their position, so row `i` still pairs with record `i`.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::Config;
use crate::indexer::{load_metadata, metadata_to_bytes};
use crate::persist::write_atomic;
use crate::scan::relative_slash_path;
use crate::vector_index::{FlatL2Index, VectorIndex};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexStatus {
    pub index_path: PathBuf,
    pub metadata_path: PathBuf,
    pub index_exists: bool,
    pub metadata_exists: bool,
    pub rows: Option<usize>,
    pub dims: Option<usize>,
    pub records: Option<usize>,
}

impl IndexStatus {
    /// `None` until both files are readable.
    pub fn consistent(&self) -> Option<bool> {
        Some(self.rows? == self.records?)
    }
}

pub fn index_status(config: &Config) -> Result<IndexStatus> {
    let index_path = config.paths.index_path();
    let metadata_path = config.paths.metadata_path();

    let (rows, dims) = if index_path.exists() {
        let index = FlatL2Index::load(&index_path)?;
        (Some(index.len()), Some(index.dims()))
    } else {
        (None, None)
    };
    let records = if metadata_path.exists() {
        Some(load_metadata(&metadata_path)?.len())
    } else {
        None
    };

    Ok(IndexStatus {
        index_exists: index_path.exists(),
        metadata_exists: metadata_path.exists(),
        index_path,
        metadata_path,
        rows,
        dims,
        records,
    })
}

pub fn run_index_status(config: &Config) -> Result<()> {
    let status = index_status(config)?;
    let show = |v: Option<usize>| v.map_or("-".to_string(), |n| n.to_string());

    println!("index status");
    println!(
        "  index:    {} ({})",
        status.index_path.display(),
        if status.index_exists { "present" } else { "missing" }
    );
    println!(
        "  metadata: {} ({})",
        status.metadata_path.display(),
        if status.metadata_exists { "present" } else { "missing" }
    );
    println!("  rows: {}", show(status.rows));
    println!("  records: {}", show(status.records));
    println!("  dims: {}", show(status.dims));
    match status.consistent() {
        Some(true) => println!("  consistent: yes"),
        Some(false) => println!("  consistent: NO (run `erag index build --full`)"),
        None => println!("  consistent: -"),
    }
    Ok(())
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepairReport {
    pub total: usize,
    pub fixed: usize,
    pub unmatched: Vec<String>,
}

/// Every file under `dir`, grouped by file name, in sorted walk order.
fn files_by_name(dir: &Path) -> HashMap<String, Vec<PathBuf>> {
    let mut map: HashMap<String, Vec<PathBuf>> = HashMap::new();
    for entry in WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if entry.file_type().is_file() {
            map.entry(entry.file_name().to_string_lossy().into_owned())
                .or_default()
                .push(entry.path().to_path_buf());
        }
    }
    map
}

/// `chunks_dir/<category>/<name>` when it exists, otherwise the only file
/// with that name anywhere under `chunks_dir`. A name shared by several
/// categories never matches outside its own category.
fn locate(
    chunks_dir: &Path,
    category: &str,
    name: &str,
    available: &HashMap<String, Vec<PathBuf>>,
) -> Option<PathBuf> {
    if !category.is_empty() {
        let own = chunks_dir.join(category).join(name);
        if own.is_file() {
            return Some(own);
        }
    }
    match available.get(name).map(Vec::as_slice) {
        Some([only]) => Some(only.clone()),
        Some(many) if many.len() > 1 => {
            tracing::warn!(
                "{} exists in {} categories; not guessing for category {:?}",
                name,
                many.len(),
                category
            );
            None
        }
        _ => None,
    }
}

fn basename(raw: &str) -> Option<String> {
    raw.replace('\\', "/")
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

pub fn repair_metadata(config: &Config) -> Result<RepairReport> {
    let metadata_path = config.paths.metadata_path();
    let mut records = load_metadata(&metadata_path)?;

    let chunks_dir = config.paths.chunks_dir();
    let chunks_dir = chunks_dir.canonicalize().unwrap_or(chunks_dir);
    let root = config
        .paths
        .root
        .canonicalize()
        .unwrap_or_else(|_| config.paths.root.clone());
    let available = files_by_name(&chunks_dir);

    let mut report = RepairReport {
        total: records.len(),
        ..Default::default()
    };

    for record in records.iter_mut() {
        let name = basename(&record.path)
            .or_else(|| basename(&record.rel_path))
            .or_else(|| basename(&record.filename));
        let Some(name) = name else {
            continue;
        };

        match locate(&chunks_dir, &record.category, &name, &available) {
            Some(found) => {
                record.path = found.to_string_lossy().into_owned();
                record.rel_path = relative_slash_path(&found, &root);
                report.fixed += 1;
            }
            None => {
                tracing::warn!("no chunk file for {}/{}", record.category, name);
                report.unmatched.push(name);
            }
        }
    }

    write_atomic(&metadata_path, &metadata_to_bytes(&records)?)
        .with_context(|| format!("Failed to save {}", metadata_path.display()))?;
    Ok(report)
}

pub fn run_index_repair(config: &Config) -> Result<()> {
    let report = repair_metadata(config)?;
    println!("index repair");
    println!("  records: {}", report.total);
    println!("  fixed: {}", report.fixed);
    println!("  unmatched: {}", report.unmatched.len());
    for name in &report.unmatched {
        println!("    {}", name);
    }
    Ok(())
}
