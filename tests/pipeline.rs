//! Library-level tests of the ingest → index → answer pipeline.
//!
//! Providers are replaced by in-process fakes so nothing leaves the machine.

use anyhow::Result;
use async_trait::async_trait;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use evidence_rag::answer::AnswerEngine;
use evidence_rag::chat::ChatModel;
use evidence_rag::config::Config;
use evidence_rag::context::INSUFFICIENT_EVIDENCE;
use evidence_rag::embedding::Embedder;
use evidence_rag::error::{rag_error, RagError};
use evidence_rag::indexer::{load_metadata, BuildOptions, IndexBuilder, IndexReport};
use evidence_rag::models::{ChatMessage, Role};
use evidence_rag::salience::SalienceExtractor;
use evidence_rag::session::Conversation;
use evidence_rag::vector_index::{FlatL2Index, VectorIndex};

// ─── Fakes ──────────────────────────────────────────────────────────

/// Same vector for every text, so ranking is decided by keywords alone.
/// Remembers every text it was asked to embed.
#[derive(Default)]
struct ConstantEmbedder {
    seen: Mutex<Vec<String>>,
}

impl ConstantEmbedder {
    fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Embedder for ConstantEmbedder {
    fn model_name(&self) -> &str {
        "constant"
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.seen.lock().unwrap().extend(texts.iter().cloned());
        Ok(texts.iter().map(|_| vec![1.0, 0.0, 0.0]).collect())
    }
}

/// Fails the first `failures` calls, then behaves like [`ConstantEmbedder`].
struct FlakyEmbedder {
    failures: usize,
    calls: AtomicUsize,
    batches: Mutex<Vec<Vec<String>>>,
}

impl FlakyEmbedder {
    fn new(failures: usize) -> Self {
        Self {
            failures,
            calls: AtomicUsize::new(0),
            batches: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Embedder for FlakyEmbedder {
    fn model_name(&self) -> &str {
        "flaky"
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.batches.lock().unwrap().push(texts.to_vec());
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            anyhow::bail!("503 Service Unavailable");
        }
        Ok(texts
            .iter()
            .map(|t| vec![t.chars().count() as f32, 1.0])
            .collect())
    }
}

/// Treats every question as asking about one fixed term.
struct FixedTerm(&'static str);

impl SalienceExtractor for FixedTerm {
    fn keywords(&self, _question: &str) -> Vec<String> {
        vec![self.0.to_string()]
    }

    fn is_salient(&self, segment: &str) -> bool {
        segment.contains(self.0)
    }
}

/// Records every conversation it receives and answers with a fixed text.
#[derive(Default)]
struct RecordingChat {
    calls: Mutex<Vec<Vec<ChatMessage>>>,
}

impl RecordingChat {
    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl ChatModel for RecordingChat {
    fn model_name(&self) -> &str {
        "recording"
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        self.calls.lock().unwrap().push(messages.to_vec());
        Ok("과태료는 10만원입니다 [1].".to_string())
    }
}

// ─── Helpers ────────────────────────────────────────────────────────

fn test_config(tmp: &TempDir) -> Config {
    let mut cfg = Config::minimal(tmp.path());
    cfg.embedding.retry_backoff_ms = 1;
    cfg
}

fn write_chunk(cfg: &Config, category: &str, name: &str, body: &str) {
    let dir = cfg.paths.chunks_dir().join(category);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join(name), body).unwrap();
}

fn seed_two_chunks(cfg: &Config) {
    write_chunk(
        cfg,
        "traffic",
        "fines.txt_chunk_0.txt",
        "도로교통법 제160조에 따라 과태료 10만원을 부과한다.",
    );
    write_chunk(
        cfg,
        "civil",
        "contract.txt_chunk_0.txt",
        "계약의 해제는 상대방에 대한 의사표시로 한다.",
    );
}

async fn build(cfg: &Config, embedder: &dyn Embedder) -> Result<IndexReport> {
    IndexBuilder::new(cfg, embedder)
        .run(&BuildOptions::default())
        .await
}

fn rows(path: &Path) -> usize {
    FlatL2Index::load(path).unwrap().len()
}

// ─── Indexing ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_no_chunks_is_a_noop() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp);
    let embedder = ConstantEmbedder::default();

    let report = build(&cfg, &embedder).await.unwrap();
    assert_eq!(report, IndexReport::NoSourceChunks);
    assert!(!cfg.paths.index_path().exists());
    assert!(embedder.seen().is_empty());
}

#[tokio::test]
async fn test_second_run_without_changes_is_idempotent() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp);
    seed_two_chunks(&cfg);
    let embedder = ConstantEmbedder::default();

    let first = build(&cfg, &embedder).await.unwrap();
    assert_eq!(
        first,
        IndexReport::Bootstrapped {
            embedded: 2,
            dims: 3
        }
    );
    let meta_before = fs::read(cfg.paths.metadata_path()).unwrap();
    let rows_before = rows(&cfg.paths.index_path());

    let second = build(&cfg, &embedder).await.unwrap();
    assert_eq!(second, IndexReport::Unchanged { rows: 2 });
    assert_eq!(fs::read(cfg.paths.metadata_path()).unwrap(), meta_before);
    assert_eq!(rows(&cfg.paths.index_path()), rows_before);
    assert_eq!(embedder.seen().len(), 2);
}

#[tokio::test]
async fn test_one_byte_change_reembeds_exactly_that_chunk() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp);
    seed_two_chunks(&cfg);
    let embedder = ConstantEmbedder::default();
    build(&cfg, &embedder).await.unwrap();

    write_chunk(
        &cfg,
        "civil",
        "contract.txt_chunk_0.txt",
        "계약의 해제는 상대방에 대한 의사표시로 한다!",
    );
    let report = build(&cfg, &embedder).await.unwrap();
    assert_eq!(
        report,
        IndexReport::Appended {
            embedded: 1,
            rows: 3
        }
    );

    let seen = embedder.seen();
    assert_eq!(seen.len(), 3);
    assert!(seen[2].ends_with('!'));

    // Stale rows stay; the new version is appended after them.
    let records = load_metadata(&cfg.paths.metadata_path()).unwrap();
    assert_eq!(records.len(), rows(&cfg.paths.index_path()));
    assert_eq!(records[2].filename, "contract.txt_chunk_0.txt");
    assert_ne!(records[2].content_hash, records[0].content_hash);
}

#[tokio::test]
async fn test_metadata_keeps_hangul_and_parallels_rows() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp);
    seed_two_chunks(&cfg);
    write_chunk(&cfg, "tax", "가산세.txt_chunk_0.txt", "가산세는 별표 1에 따른다.");
    build(&cfg, &ConstantEmbedder::default()).await.unwrap();

    let raw = fs::read_to_string(cfg.paths.metadata_path()).unwrap();
    assert!(raw.contains("가산세.txt_chunk_0.txt"));
    assert!(raw.contains("\"sha256\""));

    let records = load_metadata(&cfg.paths.metadata_path()).unwrap();
    assert_eq!(records.len(), 3);
    assert_eq!(rows(&cfg.paths.index_path()), 3);
    assert!(records.iter().all(|r| r.rel_path.starts_with("data/chunks/")));
}

#[tokio::test]
async fn test_full_rebuild_drops_stale_rows() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp);
    seed_two_chunks(&cfg);
    let embedder = ConstantEmbedder::default();
    build(&cfg, &embedder).await.unwrap();
    write_chunk(&cfg, "civil", "contract.txt_chunk_0.txt", "변경된 본문");
    build(&cfg, &embedder).await.unwrap();
    assert_eq!(rows(&cfg.paths.index_path()), 3);

    let report = IndexBuilder::new(&cfg, &embedder)
        .run(&BuildOptions {
            full: true,
            batch_size: None,
        })
        .await
        .unwrap();
    assert_eq!(
        report,
        IndexReport::Bootstrapped {
            embedded: 2,
            dims: 3
        }
    );
    assert_eq!(rows(&cfg.paths.index_path()), 2);
}

#[tokio::test]
async fn test_batch_recovers_after_four_failures() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp);
    seed_two_chunks(&cfg);
    let embedder = FlakyEmbedder::new(4);

    let report = build(&cfg, &embedder).await.unwrap();
    assert_eq!(
        report,
        IndexReport::Bootstrapped {
            embedded: 2,
            dims: 2
        }
    );
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 5);

    // Every attempt carried the same batch.
    let batches = embedder.batches.lock().unwrap().clone();
    assert!(batches.windows(2).all(|w| w[0] == w[1]));

    let index = FlatL2Index::load(&cfg.paths.index_path()).unwrap();
    let records = load_metadata(&cfg.paths.metadata_path()).unwrap();
    for (row, record) in records.iter().enumerate() {
        let body = fs::read_to_string(cfg.paths.root.join(&record.rel_path)).unwrap();
        assert_eq!(index.row(row).unwrap()[0], body.chars().count() as f32);
    }
}

#[tokio::test]
async fn test_five_failures_abort_without_touching_the_index() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp);
    seed_two_chunks(&cfg);
    build(&cfg, &ConstantEmbedder::default()).await.unwrap();
    let index_before = fs::read(cfg.paths.index_path()).unwrap();
    let meta_before = fs::read(cfg.paths.metadata_path()).unwrap();

    write_chunk(&cfg, "tax", "new.txt_chunk_0.txt", "새 조문");
    let embedder = FlakyEmbedder::new(usize::MAX);
    let err = build(&cfg, &embedder).await.unwrap_err();

    assert!(matches!(
        rag_error(&err),
        Some(RagError::EmbeddingFatal { attempts: 5, .. })
    ));
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 5);
    assert_eq!(fs::read(cfg.paths.index_path()).unwrap(), index_before);
    assert_eq!(fs::read(cfg.paths.metadata_path()).unwrap(), meta_before);
}

#[tokio::test]
async fn test_missing_chunk_store_with_existing_index_is_a_noop() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp);
    seed_two_chunks(&cfg);
    let embedder = ConstantEmbedder::default();
    build(&cfg, &embedder).await.unwrap();
    let index_before = fs::read(cfg.paths.index_path()).unwrap();
    let meta_before = fs::read(cfg.paths.metadata_path()).unwrap();

    fs::remove_dir_all(cfg.paths.chunks_dir()).unwrap();
    let report = build(&cfg, &embedder).await.unwrap();

    assert_eq!(report, IndexReport::NoSourceChunks);
    assert_eq!(embedder.seen().len(), 2);
    assert_eq!(fs::read(cfg.paths.index_path()).unwrap(), index_before);
    assert_eq!(fs::read(cfg.paths.metadata_path()).unwrap(), meta_before);
}

#[tokio::test]
async fn test_dimension_mismatch_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let mut cfg = test_config(&tmp);
    cfg.embedding.dims = Some(1536);
    seed_two_chunks(&cfg);

    let err = build(&cfg, &ConstantEmbedder::default()).await.unwrap_err();
    assert!(matches!(
        rag_error(&err),
        Some(RagError::DimensionMismatch {
            expected: 1536,
            actual: 3
        })
    ));
    assert!(!cfg.paths.index_path().exists());
}

// ─── Answering ──────────────────────────────────────────────────────

fn engine(cfg: &Config, chat: Arc<RecordingChat>) -> AnswerEngine {
    AnswerEngine::new(cfg, Arc::new(ConstantEmbedder::default()), chat)
}

#[tokio::test]
async fn test_missing_index_is_reported() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp);
    let chat = Arc::new(RecordingChat::default());

    let err = engine(&cfg, chat.clone())
        .ask("과태료 금액은?", &Conversation::new())
        .await
        .unwrap_err();
    assert!(matches!(
        rag_error(&err),
        Some(RagError::MissingIndex { .. })
    ));
    assert!(err.to_string().contains("Run ingestion first"));
    assert_eq!(chat.call_count(), 0);
}

#[tokio::test]
async fn test_empty_question_is_rejected_before_retrieval() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp);
    let chat = Arc::new(RecordingChat::default());

    let err = engine(&cfg, chat)
        .ask("   ", &Conversation::new())
        .await
        .unwrap_err();
    assert!(matches!(rag_error(&err), Some(RagError::EmptyQuestion)));
}

#[tokio::test]
async fn test_keyword_chunk_ranks_first_and_is_cited() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp);
    seed_two_chunks(&cfg);
    build(&cfg, &ConstantEmbedder::default()).await.unwrap();

    let chat = Arc::new(RecordingChat::default());
    let answer = engine(&cfg, chat.clone())
        .ask("과태료 금액은?", &Conversation::new())
        .await
        .unwrap();

    assert!(!answer.insufficient_evidence);
    assert_eq!(answer.keywords, vec!["과태료", "금액은"]);
    assert_eq!(answer.sources.len(), 2);
    assert_eq!(answer.sources[0].filename, "fines.txt_chunk_0.txt");
    assert_eq!(answer.sources[0].category, "traffic");
    assert!(answer.sources[0].score > answer.sources[1].score);
    assert_eq!(answer.text, "과태료는 10만원입니다 [1].");

    let calls = chat.calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    let messages = &calls[0];
    assert_eq!(messages[0].role, Role::System);
    let user = &messages.last().unwrap().content;
    assert!(user.contains("과태료 금액은?"));
    assert!(user.contains("**과태료**"));
    assert!(user.contains("[1] fines.txt_chunk_0.txt (traffic)"));
}

#[tokio::test]
async fn test_evidence_gate_skips_the_model() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp);
    write_chunk(
        &cfg,
        "civil",
        "contract.txt_chunk_0.txt",
        "계약의 해제는 상대방에 대한 의사표시로 한다.",
    );
    build(&cfg, &ConstantEmbedder::default()).await.unwrap();

    let chat = Arc::new(RecordingChat::default());
    let answer = engine(&cfg, chat.clone())
        .ask("과태료?", &Conversation::new())
        .await
        .unwrap();

    assert_eq!(answer.keywords, vec!["과태료"]);
    assert!(answer.insufficient_evidence);
    assert_eq!(answer.text, INSUFFICIENT_EVIDENCE);
    assert!(answer.sources.is_empty());
    assert_eq!(chat.call_count(), 0);
}

#[tokio::test]
async fn test_gate_is_off_without_safe_mode() {
    let tmp = TempDir::new().unwrap();
    let mut cfg = test_config(&tmp);
    cfg.retrieval.safe_mode = false;
    write_chunk(
        &cfg,
        "civil",
        "contract.txt_chunk_0.txt",
        "계약의 해제는 상대방에 대한 의사표시로 한다.",
    );
    build(&cfg, &ConstantEmbedder::default()).await.unwrap();

    let chat = Arc::new(RecordingChat::default());
    let answer = engine(&cfg, chat.clone())
        .ask("과태료?", &Conversation::new())
        .await
        .unwrap();
    assert!(!answer.insufficient_evidence);
    assert_eq!(chat.call_count(), 1);
}

#[tokio::test]
async fn test_history_reaches_the_prompt() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp);
    seed_two_chunks(&cfg);
    build(&cfg, &ConstantEmbedder::default()).await.unwrap();

    let chat = Arc::new(RecordingChat::default());
    let engine = engine(&cfg, chat.clone());
    let mut history = Conversation::new();
    let first = engine.ask("과태료 금액은?", &history).await.unwrap();
    history.push_exchange("과태료 금액은?", &first.text);

    engine.ask("과태료 부과 근거는?", &history).await.unwrap();

    let calls = chat.calls.lock().unwrap();
    assert_eq!(calls.len(), 2);
    let user = &calls[1].last().unwrap().content;
    assert!(user.contains("- user: 과태료 금액은?"));
    assert!(user.contains("- assistant: 과태료는 10만원입니다 [1]."));
}

#[tokio::test]
async fn test_custom_salience_drives_ranking_and_gate() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp);
    seed_two_chunks(&cfg);
    build(&cfg, &ConstantEmbedder::default()).await.unwrap();

    let chat = Arc::new(RecordingChat::default());
    let answer = engine(&cfg, chat.clone())
        .with_salience(Box::new(FixedTerm("해제")))
        .ask("과태료 금액은?", &Conversation::new())
        .await
        .unwrap();

    assert_eq!(answer.keywords, vec!["해제"]);
    assert!(!answer.insufficient_evidence);
    assert_eq!(answer.sources[0].filename, "contract.txt_chunk_0.txt");
    let user = chat.calls.lock().unwrap()[0].last().unwrap().content.clone();
    assert!(user.contains("**해제**"));

    let gated = engine(&cfg, chat.clone())
        .with_salience(Box::new(FixedTerm("상속세")))
        .ask("과태료 금액은?", &Conversation::new())
        .await
        .unwrap();
    assert!(gated.insufficient_evidence);
    assert_eq!(chat.call_count(), 1);
}

#[tokio::test]
async fn test_top_limit_caps_sources() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp);
    seed_two_chunks(&cfg);
    build(&cfg, &ConstantEmbedder::default()).await.unwrap();

    let chat = Arc::new(RecordingChat::default());
    let answer = engine(&cfg, chat)
        .ask_with_limit("과태료 금액은?", &Conversation::new(), 1)
        .await
        .unwrap();
    assert_eq!(answer.sources.len(), 1);
    assert_eq!(answer.sources[0].rank, 1);
}

#[tokio::test]
async fn test_moved_chunk_store_still_resolves() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp);
    seed_two_chunks(&cfg);
    build(&cfg, &ConstantEmbedder::default()).await.unwrap();

    // Rewrite the recorded absolute paths to a location that no longer exists.
    let meta_path = cfg.paths.metadata_path();
    let raw = fs::read_to_string(&meta_path).unwrap();
    let root = cfg.paths.root.to_string_lossy().replace('\\', "/");
    let moved = raw.replace(&root, "/nonexistent/old-root");
    fs::write(&meta_path, moved).unwrap();

    let chat = Arc::new(RecordingChat::default());
    let answer = engine(&cfg, chat)
        .ask("과태료 금액은?", &Conversation::new())
        .await
        .unwrap();
    assert!(!answer.insufficient_evidence);
    assert_eq!(answer.sources[0].filename, "fines.txt_chunk_0.txt");
    assert!(Path::new(&answer.sources[0].path).exists());
}
