//! Question answering over the index.
//!
//! One [`AnswerEngine`] is shared by the interactive loop and the HTTP
//! server. A call to [`AnswerEngine::ask`] runs:
//!
//! 1. validate the question ([`RagError::EmptyQuestion`])
//! 2. take an index snapshot ([`RagError::MissingIndex`] when absent)
//! 3. embed `question + hint` (hint = head of the previous turn)
//! 4. hybrid retrieval
//! 5. evidence gate: with `safe_mode`, return [`INSUFFICIENT_EVIDENCE`]
//!    without calling the chat model when no candidate contains a keyword
//! 6. context block + prompt → chat model

use anyhow::Result;
use std::sync::Arc;

use crate::chat::ChatModel;
use crate::config::{Config, RetrievalConfig};
use crate::context::{build_context, has_evidence, INSUFFICIENT_EVIDENCE};
use crate::embedding::{embed_query, Embedder, RetryPolicy};
use crate::error::RagError;
use crate::models::Source;
use crate::prompt::{build_messages, PromptOptions};
use crate::resolve::ResolverChain;
use crate::retrieve::{HybridRetriever, Retrieval};
use crate::salience::{KoreanLegalSalience, SalienceExtractor};
use crate::session::Conversation;
use crate::store::IndexStore;

#[derive(Debug, Clone)]
pub struct Answer {
    pub text: String,
    pub sources: Vec<Source>,
    pub keywords: Vec<String>,
    /// The evidence gate fired; `text` is the fixed insufficiency reply.
    pub insufficient_evidence: bool,
}

pub struct AnswerEngine {
    retrieval: RetrievalConfig,
    retry: RetryPolicy,
    store: IndexStore,
    resolver: ResolverChain,
    salience: Box<dyn SalienceExtractor>,
    embedder: Arc<dyn Embedder>,
    chat: Arc<dyn ChatModel>,
}

impl AnswerEngine {
    pub fn new(config: &Config, embedder: Arc<dyn Embedder>, chat: Arc<dyn ChatModel>) -> Self {
        Self {
            retrieval: config.retrieval.clone(),
            retry: RetryPolicy::from_config(&config.embedding),
            store: IndexStore::from_config(config),
            resolver: ResolverChain::from_config(config),
            salience: Box::new(KoreanLegalSalience::from_config(&config.retrieval)),
            embedder,
            chat,
        }
    }

    /// Replace the default Korean legal salience rules.
    pub fn with_salience(mut self, salience: Box<dyn SalienceExtractor>) -> Self {
        self.salience = salience;
        self
    }

    pub fn store(&self) -> &IndexStore {
        &self.store
    }

    pub fn max_docs(&self) -> usize {
        self.retrieval.max_docs
    }

    /// Retrieval only, without the gate or the chat model.
    pub async fn retrieve(&self, question: &str, hint: &str, max_docs: usize) -> Result<Retrieval> {
        let question = question.trim();
        if question.is_empty() {
            return Err(RagError::EmptyQuestion.into());
        }
        let snapshot = self.store.snapshot()?;

        let query = format!("{}{}", question, hint);
        let vector = embed_query(self.embedder.as_ref(), &query, self.retry).await?;

        let retriever =
            HybridRetriever::new(&self.retrieval, self.salience.as_ref(), &self.resolver);
        retriever.retrieve(&snapshot, &vector, question, max_docs)
    }

    pub async fn ask(&self, question: &str, history: &Conversation) -> Result<Answer> {
        self.ask_with_limit(question, history, self.retrieval.max_docs)
            .await
    }

    /// Like [`ask`](Self::ask) with the ranked list capped at `max_docs`.
    pub async fn ask_with_limit(
        &self,
        question: &str,
        history: &Conversation,
        max_docs: usize,
    ) -> Result<Answer> {
        let question = question.trim();
        let hint = history.retrieval_hint(self.retrieval.hint_chars);
        let Retrieval {
            candidates,
            keywords,
        } = self.retrieve(question, &hint, max_docs).await?;

        if self.retrieval.safe_mode && !has_evidence(&candidates, &keywords) {
            tracing::info!(
                "no retrieved chunk mentions {:?}; answering with insufficiency notice",
                keywords
            );
            return Ok(Answer {
                text: INSUFFICIENT_EVIDENCE.to_string(),
                sources: Vec::new(),
                keywords,
                insufficient_evidence: true,
            });
        }

        let context = build_context(
            &candidates,
            &keywords,
            self.salience.as_ref(),
            self.retrieval.snippet_chars,
        );
        let messages = build_messages(
            history.turns(),
            question,
            &context,
            &keywords,
            PromptOptions {
                history_window: self.retrieval.history_window,
                allow_general_knowledge: self.retrieval.allow_general_knowledge,
            },
        );

        let text = self.chat.complete(&messages).await?;
        tracing::info!(
            "answered with {} sources via {}",
            candidates.len(),
            self.chat.model_name()
        );

        Ok(Answer {
            text,
            sources: candidates.iter().map(Source::from).collect(),
            keywords,
            insufficient_evidence: false,
        })
    }
}
