//! Locating chunk files from metadata records.
//!
//! Metadata written on one machine (or before the corpus moved) may carry a
//! stale absolute path, Windows separators, or the pre-`data/` layout. A
//! [`ResolverChain`] tries an ordered list of [`PathResolver`] strategies and
//! returns the first hit. When every strategy misses, it still returns a
//! best-guess path with `found = false` so the caller can degrade (empty
//! content) instead of failing the whole answer.
//!
//! Default order:
//!
//! 1. [`RecordedPath`]: `record.path`, absolute then root-relative
//! 2. [`RecordedRelPath`]: `record.rel_path`, absolute then root-relative
//! 3. [`StandardLocation`]: `chunks_dir/<category>/<filename>`
//! 4. [`StandardLocation`]: `legacy_chunks_dir/<category>/<filename>`
//! 5. [`LegacySubstitution`]: `output/chunks` → `data/chunks` inside `record.path`

use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::models::MetadataRecord;

pub trait PathResolver: Send + Sync {
    fn name(&self) -> &'static str;

    /// An existing file for `record`, if this strategy can find one.
    fn resolve(&self, record: &MetadataRecord) -> Option<PathBuf>;
}

/// Backslashes to slashes, surrounding whitespace dropped.
fn normalize(raw: &str) -> PathBuf {
    PathBuf::from(raw.trim().replace('\\', "/"))
}

fn absolute_or_under(root: &Path, raw: &str) -> Option<PathBuf> {
    if raw.trim().is_empty() {
        return None;
    }
    let p = normalize(raw);
    if p.is_absolute() && p.exists() {
        return Some(p);
    }
    let candidate = root.join(&p);
    candidate.exists().then_some(candidate)
}

pub struct RecordedPath {
    pub root: PathBuf,
}

impl PathResolver for RecordedPath {
    fn name(&self) -> &'static str {
        "recorded-path"
    }

    fn resolve(&self, record: &MetadataRecord) -> Option<PathBuf> {
        absolute_or_under(&self.root, &record.path)
    }
}

pub struct RecordedRelPath {
    pub root: PathBuf,
}

impl PathResolver for RecordedRelPath {
    fn name(&self) -> &'static str {
        "rel-path"
    }

    fn resolve(&self, record: &MetadataRecord) -> Option<PathBuf> {
        absolute_or_under(&self.root, &record.rel_path)
    }
}

/// `<dir>/<category>/<filename>`.
pub struct StandardLocation {
    pub dir: PathBuf,
}

impl PathResolver for StandardLocation {
    fn name(&self) -> &'static str {
        "standard-location"
    }

    fn resolve(&self, record: &MetadataRecord) -> Option<PathBuf> {
        if record.category.is_empty() || record.filename.is_empty() {
            return None;
        }
        let candidate = self.dir.join(&record.category).join(&record.filename);
        candidate.exists().then_some(candidate)
    }
}

/// Rewrites a legacy directory fragment in the recorded path.
pub struct LegacySubstitution {
    pub root: PathBuf,
    pub from: String,
    pub to: String,
}

impl LegacySubstitution {
    pub fn output_to_data(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            from: "output/chunks".to_string(),
            to: "data/chunks".to_string(),
        }
    }
}

impl PathResolver for LegacySubstitution {
    fn name(&self) -> &'static str {
        "legacy-substitution"
    }

    fn resolve(&self, record: &MetadataRecord) -> Option<PathBuf> {
        let raw = record.path.replace('\\', "/");
        if !raw.contains(&self.from) {
            return None;
        }
        let replaced = normalize(&raw.replace(&self.from, &self.to));
        let candidate = self.root.join(replaced);
        candidate.exists().then_some(candidate)
    }
}

/// Result of running the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub path: PathBuf,
    /// `false` when `path` is only a best guess.
    pub found: bool,
}

pub struct ResolverChain {
    root: PathBuf,
    strategies: Vec<Box<dyn PathResolver>>,
}

impl ResolverChain {
    pub fn new(root: impl Into<PathBuf>, strategies: Vec<Box<dyn PathResolver>>) -> Self {
        Self {
            root: root.into(),
            strategies,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let root = config.paths.root.clone();
        Self::new(
            root.clone(),
            vec![
                Box::new(RecordedPath { root: root.clone() }),
                Box::new(RecordedRelPath { root: root.clone() }),
                Box::new(StandardLocation {
                    dir: config.paths.chunks_dir(),
                }),
                Box::new(StandardLocation {
                    dir: config.paths.legacy_chunks_dir(),
                }),
                Box::new(LegacySubstitution::output_to_data(root)),
            ],
        )
    }

    pub fn resolve(&self, record: &MetadataRecord) -> Resolution {
        for strategy in &self.strategies {
            if let Some(path) = strategy.resolve(record) {
                tracing::trace!("{} resolved {}", strategy.name(), record.filename);
                return Resolution { path, found: true };
            }
        }

        let guess = if record.path.trim().is_empty() {
            self.root.clone()
        } else {
            self.root.join(normalize(&record.path))
        };
        Resolution {
            path: guess,
            found: false,
        }
    }
}
