//! Core data types that flow through ingestion and retrieval.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A chunk file found in the chunk store.
///
/// Identity for incremental indexing is `(path, content_hash)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkFile {
    /// Absolute path of the chunk file.
    pub source_path: PathBuf,
    /// Path relative to the project root, forward-slash separated.
    pub relative_path: String,
    /// Name of the folder directly containing the file.
    pub category: String,
    pub filename: String,
    pub content_hash: String,
}

impl ChunkFile {
    pub fn path_key(&self) -> String {
        self.source_path.to_string_lossy().into_owned()
    }

    pub fn to_record(&self) -> MetadataRecord {
        MetadataRecord {
            category: self.category.clone(),
            filename: self.filename.clone(),
            path: self.path_key(),
            rel_path: self.relative_path.clone(),
            content_hash: self.content_hash.clone(),
        }
    }
}

/// One element of `metadatas.json`.
///
/// The record at position `i` describes row `i` of the vector index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataRecord {
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub rel_path: String,
    #[serde(rename = "sha256", default)]
    pub content_hash: String,
}

/// A retrieved chunk after deduplication, scoring and ranking.
#[derive(Debug, Clone)]
pub struct RankedCandidate {
    /// 1-based rank; doubles as the citation number `[rank]`.
    pub rank: usize,
    pub record: MetadataRecord,
    /// Where the chunk text was loaded from (best guess when unresolved).
    pub resolved_path: PathBuf,
    pub content: String,
    /// Squared L2 distance from the query vector (lower is closer).
    pub distance: f32,
    /// Total keyword occurrences in `content`.
    pub keyword_hits: usize,
    /// Blended hybrid score (higher is better).
    pub score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// A single chat message; also the on-disk record of a session log line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Citation entry returned alongside an answer.
#[derive(Debug, Clone, Serialize)]
pub struct Source {
    pub rank: usize,
    pub category: String,
    pub filename: String,
    pub path: String,
    pub rel_path: String,
    pub distance: f32,
    pub score: f64,
}

impl From<&RankedCandidate> for Source {
    fn from(c: &RankedCandidate) -> Self {
        Self {
            rank: c.rank,
            category: c.record.category.clone(),
            filename: c.record.filename.clone(),
            path: c.resolved_path.to_string_lossy().into_owned(),
            rel_path: c.record.rel_path.clone(),
            distance: c.distance,
            score: c.score,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_record_wire_names() {
        let rec = MetadataRecord {
            category: "traffic".into(),
            filename: "law.txt_chunk_0.txt".into(),
            path: "/r/data/chunks/traffic/law.txt_chunk_0.txt".into(),
            rel_path: "data/chunks/traffic/law.txt_chunk_0.txt".into(),
            content_hash: "ab".into(),
        };
        let json = serde_json::to_value(&rec).unwrap();
        assert_eq!(json["rel_path"], "data/chunks/traffic/law.txt_chunk_0.txt");
        assert_eq!(json["sha256"], "ab");
    }

    #[test]
    fn metadata_record_tolerates_missing_fields() {
        let rec: MetadataRecord = serde_json::from_str(r#"{"filename":"a.txt"}"#).unwrap();
        assert_eq!(rec.filename, "a.txt");
        assert!(rec.path.is_empty());
        assert!(rec.content_hash.is_empty());
    }

    #[test]
    fn chat_message_roles_are_lowercase() {
        let line = serde_json::to_string(&ChatMessage::assistant("네")).unwrap();
        assert_eq!(line, r#"{"role":"assistant","content":"네"}"#);
    }
}
