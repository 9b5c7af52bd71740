use anyhow::{bail, Result};
use std::sync::Arc;

use crate::answer::AnswerEngine;
use crate::chat::DisabledChat;
use crate::config::Config;
use crate::context::{highlight, select_snippet};
use crate::embedding::create_embedder;
use crate::salience::KoreanLegalSalience;

/// `erag search`: show what retrieval would hand to the model, without
/// calling it.
pub async fn run_search(config: &Config, query: &str, limit: Option<usize>) -> Result<()> {
    if query.trim().is_empty() {
        println!("No results.");
        return Ok(());
    }
    if !config.embedding.is_enabled() {
        bail!("Search requires embeddings. Set [embedding] provider in config.");
    }

    let embedder = create_embedder(&config.embedding)?;
    let engine = AnswerEngine::new(config, embedder, Arc::new(DisabledChat));
    let max_docs = limit
        .unwrap_or(config.retrieval.max_docs)
        .clamp(1, config.retrieval.max_docs);

    let retrieval = engine.retrieve(query, "", max_docs).await?;
    if retrieval.candidates.is_empty() {
        println!("No results.");
        return Ok(());
    }

    let salience = KoreanLegalSalience::from_config(&config.retrieval);
    println!("keywords: {}", retrieval.keywords.join(", "));
    println!();

    for c in &retrieval.candidates {
        println!(
            "{}. [{:.3}] {} ({})",
            c.rank, c.score, c.record.filename, c.record.category
        );
        println!("    dist: {:.4}", c.distance);
        println!("    keyword hits: {}", c.keyword_hits);
        println!("    path: {}", c.resolved_path.display());
        let snippet = highlight(&select_snippet(&c.content, &salience, 200), &retrieval.keywords);
        println!("    excerpt: \"{}\"", snippet.replace('\n', " ").trim());
        println!();
    }

    Ok(())
}
