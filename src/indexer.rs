//! Incremental index builder.
//!
//! Keeps `index.vec` and `metadatas.json` in step with the chunk store while
//! embedding only the delta. A chunk is embedded iff its `(path, sha256)`
//! pair does not already appear in the persisted metadata, so new files and
//! changed files are picked up and unchanged files are skipped regardless
//! of scan order.
//!
//! Rows are append-only. Stale rows (deleted or superseded chunks) stay in
//! the index until an explicit `--full` rebuild.
//!
//! The run is all-or-nothing: every batch is embedded before anything is
//! written, then both files are staged and committed. An embedding failure
//! that exhausts its retry budget aborts the run with the previous files
//! untouched.

use anyhow::{bail, Context, Result};
use std::collections::HashSet;
use std::path::Path;

use crate::config::Config;
use crate::embedding::{embed_with_retry, Embedder, RetryPolicy};
use crate::error::RagError;
use crate::models::{ChunkFile, MetadataRecord};
use crate::persist::stage;
use crate::progress::{IndexProgressEvent, IndexProgressReporter, NoProgress};
use crate::scan::scan_chunk_store;
use crate::vector_index::{FlatL2Index, VectorIndex};

/// Options for one build run.
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// Ignore the persisted index and embed every chunk.
    pub full: bool,
    /// Override `[embedding].batch_size`.
    pub batch_size: Option<usize>,
}

/// Outcome of a build run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexReport {
    /// The chunk store directory is missing, or it is empty and there is
    /// no index yet. Nothing is written.
    NoSourceChunks,
    /// Nothing new to embed; files were not rewritten.
    Unchanged { rows: usize },
    /// A fresh index was created.
    Bootstrapped { embedded: usize, dims: usize },
    /// Delta rows were appended to an existing index.
    Appended { embedded: usize, rows: usize },
}

/// Chunks whose `(path, content_hash)` pair is absent from `existing`,
/// in scan order.
pub fn diff_delta<'a>(existing: &[MetadataRecord], current: &'a [ChunkFile]) -> Vec<&'a ChunkFile> {
    let known: HashSet<(&str, &str)> = existing
        .iter()
        .map(|m| (m.path.as_str(), m.content_hash.as_str()))
        .collect();

    current
        .iter()
        .filter(|c| {
            let key = c.path_key();
            !known.contains(&(key.as_str(), c.content_hash.as_str()))
        })
        .collect()
}

pub fn load_metadata(path: &Path) -> Result<Vec<MetadataRecord>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Failed to parse {}", path.display()))
}

/// Pretty JSON array; Hangul is written as-is.
pub fn metadata_to_bytes(records: &[MetadataRecord]) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec_pretty(records)?)
}

/// The persisted index and metadata, or `None` when either file is absent.
pub fn load_existing(config: &Config) -> Result<Option<(FlatL2Index, Vec<MetadataRecord>)>> {
    let index_path = config.paths.index_path();
    let meta_path = config.paths.metadata_path();

    if !index_path.exists() || !meta_path.exists() {
        return Ok(None);
    }
    let index = FlatL2Index::load(&index_path)?;
    let records = load_metadata(&meta_path)?;
    Ok(Some((index, records)))
}

/// Drives one incremental build.
pub struct IndexBuilder<'a> {
    config: &'a Config,
    embedder: &'a dyn Embedder,
    progress: &'a dyn IndexProgressReporter,
}

impl<'a> IndexBuilder<'a> {
    pub fn new(config: &'a Config, embedder: &'a dyn Embedder) -> Self {
        Self {
            config,
            embedder,
            progress: &NoProgress,
        }
    }

    pub fn with_progress(mut self, progress: &'a dyn IndexProgressReporter) -> Self {
        self.progress = progress;
        self
    }

    pub async fn run(&self, options: &BuildOptions) -> Result<IndexReport> {
        let paths = &self.config.paths;

        let existing = if options.full {
            None
        } else {
            load_existing(self.config)?
        };

        self.progress.report(IndexProgressEvent::Scanning);
        let Some(current) = scan_chunk_store(&paths.chunks_dir(), &paths.root)? else {
            tracing::warn!(
                "chunk store {} does not exist; run `erag split` first",
                paths.chunks_dir().display()
            );
            return Ok(IndexReport::NoSourceChunks);
        };

        let (mut index, mut records, targets) = match existing {
            Some((index, records)) => {
                if index.len() != records.len() {
                    return Err(RagError::InconsistentIndex {
                        rows: index.len(),
                        records: records.len(),
                    }
                    .into());
                }
                let targets = diff_delta(&records, &current);
                if targets.is_empty() {
                    tracing::info!("no new or changed chunks; index kept ({} rows)", index.len());
                    return Ok(IndexReport::Unchanged { rows: index.len() });
                }
                tracing::info!("{} new or changed chunks to append", targets.len());
                (Some(index), records, targets)
            }
            None => {
                if current.is_empty() {
                    tracing::warn!(
                        "no chunks under {}; run `erag split` first",
                        paths.chunks_dir().display()
                    );
                    return Ok(IndexReport::NoSourceChunks);
                }
                tracing::info!("bootstrapping index from {} chunks", current.len());
                (None, Vec::new(), current.iter().collect())
            }
        };

        let batch_size = options
            .batch_size
            .unwrap_or(self.config.embedding.batch_size);
        let vectors = self.embed_all(&targets, batch_size).await?;

        let bootstrapped = index.is_none();
        let dims = match (&index, vectors.first()) {
            (Some(idx), _) => idx.dims(),
            (None, Some(v)) => v.len(),
            (None, None) => bail!("embedding provider returned no vectors"),
        };
        if dims == 0 {
            bail!("embedding provider returned zero-length vectors");
        }
        if let Some(expected) = self.config.embedding.dims {
            if expected != dims {
                return Err(RagError::DimensionMismatch {
                    expected,
                    actual: dims,
                }
                .into());
            }
        }

        let index = index.get_or_insert_with(|| FlatL2Index::new(dims));
        index.add(&vectors)?;
        records.extend(targets.iter().map(|c| c.to_record()));

        if index.len() != records.len() {
            return Err(RagError::InconsistentIndex {
                rows: index.len(),
                records: records.len(),
            }
            .into());
        }

        let staged_index = index.stage_save(&paths.index_path())?;
        let staged_meta = stage(&paths.metadata_path(), &metadata_to_bytes(&records)?)?;
        staged_index.commit()?;
        staged_meta.commit()?;

        tracing::info!(
            "saved {} rows to {}",
            index.len(),
            paths.index_path().display()
        );

        Ok(if bootstrapped {
            IndexReport::Bootstrapped {
                embedded: targets.len(),
                dims,
            }
        } else {
            IndexReport::Appended {
                embedded: targets.len(),
                rows: index.len(),
            }
        })
    }

    /// Embed every target sequentially, batch by batch.
    async fn embed_all(&self, targets: &[&ChunkFile], batch_size: usize) -> Result<Vec<Vec<f32>>> {
        let batch_size = batch_size.max(1);
        let policy = RetryPolicy::from_config(&self.config.embedding);
        let total = targets.len() as u64;
        let mut out = Vec::with_capacity(targets.len());

        for batch in targets.chunks(batch_size) {
            let mut texts = Vec::with_capacity(batch.len());
            for chunk in batch {
                let bytes = std::fs::read(&chunk.source_path)
                    .with_context(|| format!("Failed to read {}", chunk.source_path.display()))?;
                texts.push(String::from_utf8_lossy(&bytes).into_owned());
            }

            let vectors = embed_with_retry(self.embedder, &texts, policy).await?;
            out.extend(vectors);
            self.progress.report(IndexProgressEvent::Embedding {
                n: out.len() as u64,
                total,
            });
        }

        Ok(out)
    }
}

/// `erag index build`: run the builder with the configured provider and
/// print a summary.
pub async fn run_index_build(
    config: &Config,
    options: &BuildOptions,
    progress: &dyn IndexProgressReporter,
) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    }
    let embedder = crate::embedding::create_embedder(&config.embedding)?;

    let report = IndexBuilder::new(config, embedder.as_ref())
        .with_progress(progress)
        .run(options)
        .await?;

    println!("index build{}", if options.full { " (full)" } else { "" });
    match report {
        IndexReport::NoSourceChunks => {
            println!("  no source chunks, nothing to do");
        }
        IndexReport::Unchanged { rows } => {
            println!("  no changes");
            println!("  rows: {}", rows);
        }
        IndexReport::Bootstrapped { embedded, dims } => {
            println!("  created new index");
            println!("  embedded: {}", embedded);
            println!("  dims: {}", dims);
        }
        IndexReport::Appended { embedded, rows } => {
            println!("  appended: {}", embedded);
            println!("  rows: {}", rows);
        }
    }
    println!("  model: {}", embedder.model_name());
    Ok(())
}
