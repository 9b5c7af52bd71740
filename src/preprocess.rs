//! Raw document normalisation.
//!
//! Reads everything under `raw_dir/<category>/` (recursively) and writes a
//! cleaned UTF-8 copy to `cleaned_dir/<category>/<stem>.txt`. Structured
//! inputs (`.json`, `.csv` holding JSON) are pretty-printed so the splitter
//! sees one field per line.

use anyhow::{Context, Result};
use regex::Regex;
use std::fs;
use std::path::Path;
use std::sync::LazyLock;
use walkdir::WalkDir;

use crate::chunk::sorted_children;
use crate::config::Config;

static BLANK_RUN: LazyLock<Regex> = LazyLock::new(|| match Regex::new(r"\n{3,}") {
    Ok(regex) => regex,
    Err(err) => panic!("blank-run regex is invalid: {err}"),
});

/// Strip carriage returns, collapse 3+ newlines to 2, trim.
pub fn clean_text(text: &str) -> String {
    let text = text.replace('\r', "");
    BLANK_RUN.replace_all(&text, "\n\n").trim().to_string()
}

/// Read a raw file as text according to its extension.
pub fn extract_text(path: &Path) -> Result<String> {
    let bytes = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let text = String::from_utf8_lossy(&bytes).into_owned();

    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "json" | "csv" => match serde_json::from_str::<serde_json::Value>(&text) {
            Ok(value) => Ok(serde_json::to_string_pretty(&value).unwrap_or(text)),
            Err(_) => Ok(text),
        },
        _ => Ok(text),
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PreprocessReport {
    pub categories: usize,
    pub written: usize,
    pub skipped: usize,
}

/// Clean every raw document into `cleaned_dir`.
pub fn run_preprocess(config: &Config) -> Result<PreprocessReport> {
    let raw_dir = config.paths.raw_dir();
    let cleaned_dir = config.paths.cleaned_dir();

    fs::create_dir_all(&raw_dir)
        .with_context(|| format!("Failed to create {}", raw_dir.display()))?;
    fs::create_dir_all(&cleaned_dir)
        .with_context(|| format!("Failed to create {}", cleaned_dir.display()))?;

    let categories: Vec<_> = sorted_children(&raw_dir)?
        .into_iter()
        .filter(|p| p.is_dir())
        .collect();

    let mut report = PreprocessReport::default();
    if categories.is_empty() {
        tracing::warn!(
            "no category folders under {}; put raw documents in {}/<category>/",
            raw_dir.display(),
            raw_dir.display()
        );
        return Ok(report);
    }

    for cat_dir in categories {
        let Some(category) = cat_dir.file_name() else {
            continue;
        };
        let out_dir = cleaned_dir.join(category);
        fs::create_dir_all(&out_dir)
            .with_context(|| format!("Failed to create {}", out_dir.display()))?;
        report.categories += 1;

        for entry in WalkDir::new(&cat_dir).sort_by_file_name() {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    tracing::warn!("skip: {}", e);
                    report.skipped += 1;
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            let target = out_dir.join(format!("{}.txt", stem));

            let result = extract_text(path).and_then(|text| {
                fs::write(&target, clean_text(&text))
                    .with_context(|| format!("Failed to write {}", target.display()))
            });
            match result {
                Ok(()) => report.written += 1,
                Err(e) => {
                    tracing::warn!("skip {}: {:#}", path.display(), e);
                    report.skipped += 1;
                }
            }
        }
    }

    tracing::info!(
        "cleaned {} files in {} categories into {}",
        report.written,
        report.categories,
        cleaned_dir.display()
    );
    Ok(report)
}
