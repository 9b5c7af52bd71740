//! Conversation state and its on-disk log.

use anyhow::{Context, Result};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::models::ChatMessage;

/// Ordered turns of one session. Grows monotonically.
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    turns: Vec<ChatMessage>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn turns(&self) -> &[ChatMessage] {
        &self.turns
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Record a completed exchange; returns the two new turns.
    pub fn push_exchange(&mut self, question: &str, answer: &str) -> &[ChatMessage] {
        self.turns.push(ChatMessage::user(question));
        self.turns.push(ChatMessage::assistant(answer));
        &self.turns[self.turns.len() - 2..]
    }

    /// `" " + first max_chars of the last turn`, appended to the query
    /// before embedding so follow-ups keep their topic.
    pub fn retrieval_hint(&self, max_chars: usize) -> String {
        match self.turns.last() {
            Some(last) if max_chars > 0 => {
                let head: String = last.content.chars().take(max_chars).collect();
                format!(" {}", head)
            }
            _ => String::new(),
        }
    }
}

/// Append-only JSON-lines log, one file per session.
#[derive(Debug, Clone)]
pub struct SessionLog {
    path: PathBuf,
}

impl SessionLog {
    /// Create `dir/chat_<unix-seconds>.jsonl`.
    pub fn create(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
        let path = dir.join(format!("chat_{}.jsonl", chrono::Utc::now().timestamp()));
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, turns: &[ChatMessage]) -> Result<()> {
        let mut file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open {}", self.path.display()))?;
        for turn in turns {
            let line = serde_json::to_string(turn)?;
            writeln!(file, "{}", line)
                .with_context(|| format!("Failed to write {}", self.path.display()))?;
        }
        Ok(())
    }

    pub fn read_all(path: &Path) -> Result<Vec<ChatMessage>> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        text.lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| {
                serde_json::from_str::<ChatMessage>(l)
                    .with_context(|| format!("Malformed session line in {}", path.display()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;

    #[test]
    fn hint_uses_last_turn_prefix() {
        let mut c = Conversation::new();
        assert_eq!(c.retrieval_hint(400), "");
        c.push_exchange("과태료는?", "과태료는 10만원입니다 [1]");
        assert_eq!(c.retrieval_hint(3), " 과태료");
    }

    #[test]
    fn log_appends_one_record_per_turn() {
        let tmp = tempfile::tempdir().unwrap();
        let log = SessionLog::create(&tmp.path().join("sessions")).unwrap();
        let name = log.path().file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("chat_") && name.ends_with(".jsonl"));

        let mut c = Conversation::new();
        log.append(c.push_exchange("q1", "a1")).unwrap();
        log.append(c.push_exchange("q2", "a2")).unwrap();

        let back = SessionLog::read_all(log.path()).unwrap();
        assert_eq!(back.len(), 4);
        assert_eq!(back[2].role, Role::User);
        assert_eq!(back[3].content, "a2");
        assert_eq!(back, c.turns());
    }
}
