//! Line-accumulating text splitter.
//!
//! Cleaned documents are cut into chunks of roughly `max_chars` characters
//! without ever breaking a line: lines are appended to a buffer until its
//! length reaches the limit, at which point the trimmed buffer becomes a
//! chunk. Blank lines collapse to a bare `\n`. Lengths are counted in
//! Unicode scalar values so Hangul text is measured the same way as ASCII.
//!
//! [`run_split`] applies the splitter to `cleaned_dir/<category>/*.txt` and
//! writes `chunks_dir/<category>/<name>.txt_chunk_<i>.txt`.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use crate::config::Config;

/// Split `text` into chunks; empty pieces are dropped.
pub fn split_text(text: &str, max_chars: usize) -> Vec<String> {
    let mut parts = Vec::new();
    let mut buf = String::new();
    let mut acc = 0usize;

    for line in text.split_inclusive('\n') {
        let line = if line.trim().is_empty() { "\n" } else { line };
        buf.push_str(line);
        acc += line.chars().count();

        if acc >= max_chars {
            parts.push(buf.trim().to_string());
            buf.clear();
            acc = 0;
        }
    }
    if !buf.is_empty() {
        parts.push(buf.trim().to_string());
    }

    parts.retain(|p| !p.is_empty());
    parts
}

/// File name of the `index`-th chunk of `source_name`.
pub fn chunk_file_name(source_name: &str, index: usize) -> String {
    format!("{}_chunk_{}.txt", source_name, index)
}

/// Summary of a split run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SplitReport {
    pub documents: usize,
    pub chunks: usize,
}

/// Split every cleaned document into chunk files.
pub fn run_split(config: &Config) -> Result<SplitReport> {
    let cleaned_dir = config.paths.cleaned_dir();
    let chunks_dir = config.paths.chunks_dir();
    let max_chars = config.chunking.max_chars;

    fs::create_dir_all(&chunks_dir)
        .with_context(|| format!("Failed to create {}", chunks_dir.display()))?;

    let mut report = SplitReport::default();
    if !cleaned_dir.is_dir() {
        tracing::warn!("cleaned directory {} does not exist", cleaned_dir.display());
        return Ok(report);
    }

    for cat_dir in sorted_children(&cleaned_dir)? {
        if !cat_dir.is_dir() {
            continue;
        }
        let Some(category) = cat_dir.file_name() else {
            continue;
        };
        let out_dir = chunks_dir.join(category);
        fs::create_dir_all(&out_dir)
            .with_context(|| format!("Failed to create {}", out_dir.display()))?;

        for doc in sorted_children(&cat_dir)? {
            if !doc.is_file() || doc.extension().and_then(|e| e.to_str()) != Some("txt") {
                continue;
            }
            let bytes =
                fs::read(&doc).with_context(|| format!("Failed to read {}", doc.display()))?;
            let text = String::from_utf8_lossy(&bytes);
            let name = doc
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();

            let pieces = split_text(&text, max_chars);
            for (i, piece) in pieces.iter().enumerate() {
                let target = out_dir.join(chunk_file_name(&name, i));
                fs::write(&target, piece)
                    .with_context(|| format!("Failed to write {}", target.display()))?;
            }

            tracing::debug!("{} -> {} chunks", doc.display(), pieces.len());
            report.documents += 1;
            report.chunks += pieces.len();
        }
    }

    tracing::info!(
        "split {} documents into {} chunks under {}",
        report.documents,
        report.chunks,
        chunks_dir.display()
    );
    Ok(report)
}

pub(crate) fn sorted_children(dir: &Path) -> Result<Vec<std::path::PathBuf>> {
    let mut entries: Vec<_> = fs::read_dir(dir)
        .with_context(|| format!("Failed to list {}", dir.display()))?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .collect();
    entries.sort();
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_text_single_chunk() {
        let chunks = split_text("제1조 목적\n이 법은 도로교통에 관한 사항을 정한다.\n", 1200);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0], "제1조 목적\n이 법은 도로교통에 관한 사항을 정한다.");
    }

    #[test]
    fn test_empty_text_yields_nothing() {
        assert!(split_text("", 1200).is_empty());
        assert!(split_text("\n\n   \n", 1200).is_empty());
    }

    #[test]
    fn test_never_breaks_a_line() {
        let text = "aaaa\nbbbb\ncccc\n";
        // Each line is 5 chars with its newline; limit 8 flushes after two lines.
        let chunks = split_text(text, 8);
        assert_eq!(chunks, vec!["aaaa\nbbbb".to_string(), "cccc".to_string()]);
    }

    #[test]
    fn test_counts_characters_not_bytes() {
        // Six Hangul syllables are 18 bytes but 6 characters.
        let text = "과태료부과\n벌금\n";
        let chunks = split_text(text, 10);
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn test_blank_lines_collapse() {
        let chunks = split_text("a\n   \nb", 1200);
        assert_eq!(chunks, vec!["a\n\nb".to_string()]);
    }

    #[test]
    fn test_run_split_writes_named_chunks() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config::minimal(tmp.path());
        let cat = config.paths.cleaned_dir().join("traffic");
        fs::create_dir_all(&cat).unwrap();
        fs::write(cat.join("law.txt"), "과태료 10만원\n").unwrap();
        fs::write(cat.join("skip.md"), "ignored").unwrap();

        let report = run_split(&config).unwrap();
        assert_eq!(
            report,
            SplitReport {
                documents: 1,
                chunks: 1
            }
        );
        let out = config.paths.chunks_dir().join("traffic/law.txt_chunk_0.txt");
        assert_eq!(fs::read_to_string(out).unwrap(), "과태료 10만원");
    }
}
