//! # Evidence RAG
//!
//! Grounded question answering over a Korean legal document corpus.
//!
//! Raw documents are cleaned, cut into chunk files, and embedded into a flat
//! L2 vector index whose rows pair one-to-one with a JSON metadata list.
//! Questions are answered from a hybrid ranking (vector distance blended
//! with keyword overlap), and an evidence gate refuses to call the model
//! when no retrieved chunk mentions a salient term of the question.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌──────────┐   ┌─────────────────────┐
//! │ data/raw │──▶│ cleaned  │──▶│  chunks  │──▶│ index.vec +         │
//! │          │   │          │   │          │   │ metadatas.json      │
//! └──────────┘   └──────────┘   └──────────┘   └──────────┬──────────┘
//!  preprocess       split        index build              │ IndexStore
//!                                                         ▼
//!                 ┌────────────────────────────────────────────────┐
//!                 │ AnswerEngine: embed → hybrid rank → gate →     │
//!                 │ context → prompt → chat model                  │
//!                 └───────────────┬────────────────────┬───────────┘
//!                                 ▼                    ▼
//!                           ┌──────────┐        ┌──────────────┐
//!                           │   CLI    │        │ HTTP         │
//!                           │ (erag)   │        │ /api/ask-rag │
//!                           └──────────┘        └──────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`preprocess`] | Raw document normalisation |
//! | [`chunk`] | Text splitting into chunk files |
//! | [`scan`] | Chunk store enumeration with digests |
//! | [`embedding`] | Embedding providers and batch retry |
//! | [`vector_index`] | Flat L2 index and its on-disk format |
//! | [`persist`] | Atomic file replacement |
//! | [`indexer`] | Incremental index build |
//! | [`store`] | Reloading index snapshots |
//! | [`resolve`] | Metadata path resolution chain |
//! | [`salience`] | Keyword extraction |
//! | [`retrieve`] | Hybrid ranking |
//! | [`context`] | Evidence gate and context block |
//! | [`prompt`] | System/user prompt construction |
//! | [`chat`] | Chat completion providers |
//! | [`answer`] | Question answering engine |
//! | [`server`] | HTTP server |

pub mod answer;
pub mod chat;
pub mod chat_cmd;
pub mod chunk;
pub mod config;
pub mod context;
pub mod embedding;
pub mod error;
pub mod hashing;
pub mod indexer;
pub mod logging;
pub mod maintenance;
pub mod models;
pub mod persist;
pub mod preprocess;
pub mod progress;
pub mod prompt;
pub mod resolve;
pub mod retrieve;
pub mod salience;
pub mod scan;
pub mod search;
pub mod server;
pub mod session;
pub mod store;
pub mod vector_index;
