//! Hybrid retrieval: vector recall, per-file deduplication, keyword
//! re-scoring.
//!
//! Scoring for each surviving candidate:
//!
//! ```text
//! sim  = minmax(-distance)          over the candidate set
//! kw   = minmax(keyword_hits)       over the candidate set
//! hyb  = α·sim + (1-α)·kw  ± bonus  (bonus only when keywords exist)
//! ```
//!
//! A flat signal (all values equal) normalises to 0.0 everywhere, so it
//! contributes nothing to the ranking. Results are sorted by `hyb`
//! descending, then distance ascending, then filename, and ranked from 1.

use anyhow::Result;
use std::collections::HashMap;
use std::path::PathBuf;

use crate::config::RetrievalConfig;
use crate::models::{MetadataRecord, RankedCandidate};
use crate::resolve::ResolverChain;
use crate::salience::{contains_any_keyword, keyword_score, SalienceExtractor};
use crate::store::IndexSnapshot;
use crate::vector_index::VectorIndex;

/// Ranked candidates plus the keywords they were scored against.
#[derive(Debug, Clone)]
pub struct Retrieval {
    pub candidates: Vec<RankedCandidate>,
    pub keywords: Vec<String>,
}

/// A deduplicated pool entry with its text loaded, before scoring.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub record: MetadataRecord,
    pub resolved_path: PathBuf,
    pub content: String,
    pub distance: f32,
}

/// Blend weights taken from `[retrieval]`.
#[derive(Debug, Clone, Copy)]
pub struct Weights {
    pub alpha: f64,
    pub keyword_bonus: f64,
}

impl From<&RetrievalConfig> for Weights {
    fn from(c: &RetrievalConfig) -> Self {
        Self {
            alpha: c.hybrid_alpha,
            keyword_bonus: c.keyword_bonus,
        }
    }
}

pub struct HybridRetriever<'a> {
    config: &'a RetrievalConfig,
    salience: &'a dyn SalienceExtractor,
    resolver: &'a ResolverChain,
}

impl<'a> HybridRetriever<'a> {
    pub fn new(
        config: &'a RetrievalConfig,
        salience: &'a dyn SalienceExtractor,
        resolver: &'a ResolverChain,
    ) -> Self {
        Self {
            config,
            salience,
            resolver,
        }
    }

    /// Rank at most `max_docs` chunks for `question` given its query vector.
    pub fn retrieve(
        &self,
        snapshot: &IndexSnapshot,
        query_vector: &[f32],
        question: &str,
        max_docs: usize,
    ) -> Result<Retrieval> {
        let hits = snapshot
            .index
            .search(query_vector, self.config.candidate_k)?;
        let pool = dedupe_by_filename(&hits, &snapshot.records);
        tracing::debug!(
            "{} nearest rows, {} distinct files",
            hits.len(),
            pool.len()
        );

        let keywords = self.salience.keywords(question);

        let candidates: Vec<Candidate> = pool
            .into_iter()
            .filter_map(|(row, distance)| {
                let record = snapshot.record(row)?.clone();
                Some(self.load(record, distance))
            })
            .collect();

        let ranked = rank_candidates(candidates, &keywords, Weights::from(self.config), max_docs);
        Ok(Retrieval {
            candidates: ranked,
            keywords,
        })
    }

    fn load(&self, record: MetadataRecord, distance: f32) -> Candidate {
        let resolution = self.resolver.resolve(&record);
        let content = if resolution.found {
            match std::fs::read(&resolution.path) {
                Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                Err(e) => {
                    tracing::warn!("cannot read {}: {}", resolution.path.display(), e);
                    String::new()
                }
            }
        } else {
            tracing::warn!(
                "chunk {} not found (best guess {})",
                record.filename,
                resolution.path.display()
            );
            String::new()
        };

        Candidate {
            record,
            resolved_path: resolution.path,
            content,
            distance,
        }
    }
}

// ============ Deduplication ============

/// Keep the closest row per filename, in order of first appearance.
///
/// Rows without a metadata record are dropped.
pub fn dedupe_by_filename(hits: &[(f32, usize)], records: &[MetadataRecord]) -> Vec<(usize, f32)> {
    let mut best: Vec<(usize, f32)> = Vec::new();
    let mut position: HashMap<&str, usize> = HashMap::new();

    for &(distance, row) in hits {
        let Some(record) = records.get(row) else {
            continue;
        };
        match position.get(record.filename.as_str()) {
            Some(&i) => {
                if distance < best[i].1 {
                    best[i] = (row, distance);
                }
            }
            None => {
                position.insert(record.filename.as_str(), best.len());
                best.push((row, distance));
            }
        }
    }
    best
}

// ============ Score normalization ============

/// Min-max normalise to [0, 1]; a flat (or empty) signal maps to 0.0.
pub fn min_max(values: &[f64]) -> Vec<f64> {
    if values.is_empty() {
        return Vec::new();
    }
    let lo = values.iter().copied().fold(f64::INFINITY, f64::min);
    let hi = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    if hi - lo < 1e-9 {
        return vec![0.0; values.len()];
    }
    values.iter().map(|v| (v - lo) / (hi - lo)).collect()
}

// ============ Ranking ============

/// Score, sort, truncate and number the candidate pool.
pub fn rank_candidates(
    candidates: Vec<Candidate>,
    keywords: &[String],
    weights: Weights,
    max_docs: usize,
) -> Vec<RankedCandidate> {
    let hits: Vec<usize> = candidates
        .iter()
        .map(|c| keyword_score(&c.content, keywords))
        .collect();

    let sim = min_max(
        &candidates
            .iter()
            .map(|c| -(c.distance as f64))
            .collect::<Vec<_>>(),
    );
    let kw = min_max(&hits.iter().map(|&h| h as f64).collect::<Vec<_>>());

    let mut scored: Vec<RankedCandidate> = candidates
        .into_iter()
        .enumerate()
        .map(|(i, c)| {
            let mut score = weights.alpha * sim[i] + (1.0 - weights.alpha) * kw[i];
            if !keywords.is_empty() {
                if contains_any_keyword(&c.content, keywords) {
                    score += weights.keyword_bonus;
                } else {
                    score -= weights.keyword_bonus;
                }
            }
            RankedCandidate {
                rank: 0,
                record: c.record,
                resolved_path: c.resolved_path,
                content: c.content,
                distance: c.distance,
                keyword_hits: hits[i],
                score,
            }
        })
        .collect();

    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(
                a.distance
                    .partial_cmp(&b.distance)
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
            .then(a.record.filename.cmp(&b.record.filename))
    });
    scored.truncate(max_docs);

    for (i, c) in scored.iter_mut().enumerate() {
        c.rank = i + 1;
    }
    scored
}
