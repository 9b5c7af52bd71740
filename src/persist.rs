//! Crash-safe file replacement.
//!
//! A write is split into two steps: [`stage`] writes the new content to
//! `<path>.tmp` and syncs it, [`StagedFile::commit`] renames it over `path`.
//! Until the rename happens readers keep seeing the previous file, and an
//! interrupted run leaves that file untouched. Dropping an uncommitted stage
//! removes the temp file.

use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug)]
#[must_use = "a staged file is discarded unless committed"]
pub struct StagedFile {
    tmp: PathBuf,
    target: PathBuf,
    committed: bool,
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Write `bytes` next to `path` without touching `path` itself.
pub fn stage(path: &Path, bytes: &[u8]) -> Result<StagedFile> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let tmp = tmp_path(path);
    let staged = StagedFile {
        tmp: tmp.clone(),
        target: path.to_path_buf(),
        committed: false,
    };

    let mut file =
        File::create(&tmp).with_context(|| format!("Failed to create {}", tmp.display()))?;
    file.write_all(bytes)
        .with_context(|| format!("Failed to write {}", tmp.display()))?;
    file.sync_all()
        .with_context(|| format!("Failed to sync {}", tmp.display()))?;

    Ok(staged)
}

impl StagedFile {
    /// Atomically move the staged content into place.
    pub fn commit(mut self) -> Result<()> {
        fs::rename(&self.tmp, &self.target).with_context(|| {
            format!(
                "Failed to rename {} -> {}",
                self.tmp.display(),
                self.target.display()
            )
        })?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if !self.committed {
            let _ = fs::remove_file(&self.tmp);
        }
    }
}

/// Stage and commit in one step.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    stage(path, bytes)?.commit()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_replaces_target() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metadatas.json");
        fs::write(&path, "old").unwrap();

        write_atomic(&path, b"new").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "new");
        assert!(!dir.path().join("metadatas.json.tmp").exists());
    }

    #[test]
    fn abandoned_stage_leaves_previous_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.vec");
        fs::write(&path, "previous good state").unwrap();

        {
            let staged = stage(&path, b"half-finished run").unwrap();
            assert!(dir.path().join("index.vec.tmp").exists());
            // Simulated crash: the run ends before commit.
            drop(staged);
        }

        assert_eq!(fs::read_to_string(&path).unwrap(), "previous good state");
        assert!(!dir.path().join("index.vec.tmp").exists());
    }

    #[test]
    fn stage_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vectorstore/dev/current/index.vec");
        write_atomic(&path, b"x").unwrap();
        assert!(path.exists());
    }
}
