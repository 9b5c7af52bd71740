//! Read side of the vector index.
//!
//! [`IndexStore`] owns the loaded index and metadata for a long-running
//! service. Each request calls [`IndexStore::snapshot`] once and works on
//! the returned `Arc` for its whole lifetime; when the index builder renames
//! new files into place, the next `snapshot()` call sees the changed
//! modification times and loads a fresh snapshot with a higher `version`,
//! while requests still holding the old `Arc` finish undisturbed.

use anyhow::Result;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::SystemTime;

use crate::config::Config;
use crate::error::RagError;
use crate::indexer::load_metadata;
use crate::models::MetadataRecord;
use crate::vector_index::{FlatL2Index, VectorIndex};

/// An immutable view of the index and its metadata.
#[derive(Debug)]
pub struct IndexSnapshot {
    pub index: FlatL2Index,
    pub records: Vec<MetadataRecord>,
    /// Increases by one on every reload.
    pub version: u64,
}

impl IndexSnapshot {
    /// Metadata for `row`; `None` when the files disagree in length.
    pub fn record(&self, row: usize) -> Option<&MetadataRecord> {
        self.records.get(row)
    }

    pub fn is_consistent(&self) -> bool {
        self.index.len() == self.records.len()
    }
}

type Stamp = (Option<SystemTime>, Option<SystemTime>);

struct Cached {
    stamp: Stamp,
    snapshot: Arc<IndexSnapshot>,
}

pub struct IndexStore {
    index_path: PathBuf,
    metadata_path: PathBuf,
    cached: RwLock<Option<Cached>>,
}

impl IndexStore {
    pub fn new(index_path: impl Into<PathBuf>, metadata_path: impl Into<PathBuf>) -> Self {
        Self {
            index_path: index_path.into(),
            metadata_path: metadata_path.into(),
            cached: RwLock::new(None),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.paths.index_path(), config.paths.metadata_path())
    }

    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    pub fn metadata_path(&self) -> &Path {
        &self.metadata_path
    }

    /// Whether both backing files exist.
    pub fn is_available(&self) -> bool {
        self.index_path.exists() && self.metadata_path.exists()
    }

    /// Current snapshot, reloading if either file changed since last load.
    pub fn snapshot(&self) -> Result<Arc<IndexSnapshot>> {
        if !self.is_available() {
            return Err(RagError::MissingIndex {
                index: self.index_path.clone(),
                metadata: self.metadata_path.clone(),
            }
            .into());
        }

        let stamp = (modified(&self.index_path), modified(&self.metadata_path));

        {
            let guard = self
                .cached
                .read()
                .map_err(|_| anyhow::anyhow!("index cache lock poisoned"))?;
            if let Some(cached) = guard.as_ref() {
                if cached.stamp == stamp {
                    return Ok(Arc::clone(&cached.snapshot));
                }
            }
        }

        let mut guard = self
            .cached
            .write()
            .map_err(|_| anyhow::anyhow!("index cache lock poisoned"))?;

        // Another request may have reloaded while we waited for the lock.
        if let Some(cached) = guard.as_ref() {
            if cached.stamp == stamp {
                return Ok(Arc::clone(&cached.snapshot));
            }
        }

        let version = guard.as_ref().map_or(1, |c| c.snapshot.version + 1);
        let snapshot = Arc::new(self.load(version)?);
        *guard = Some(Cached {
            stamp,
            snapshot: Arc::clone(&snapshot),
        });
        Ok(snapshot)
    }

    fn load(&self, version: u64) -> Result<IndexSnapshot> {
        let index = FlatL2Index::load(&self.index_path)?;
        let records = load_metadata(&self.metadata_path)?;

        let snapshot = IndexSnapshot {
            index,
            records,
            version,
        };
        if !snapshot.is_consistent() {
            tracing::warn!(
                "index has {} rows but metadata has {} records; rows without metadata are ignored",
                snapshot.index.len(),
                snapshot.records.len()
            );
        }
        tracing::info!(
            "loaded index v{} ({} rows, {} dims)",
            version,
            snapshot.index.len(),
            snapshot.index.dims()
        );
        Ok(snapshot)
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}
