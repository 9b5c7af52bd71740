//! `erag chat`: interactive question loop.
//!
//! Reads one question per line from stdin; an empty line ends the session.
//! Every answered exchange is appended to `sessions/chat_<ts>.jsonl`.

use anyhow::{bail, Result};
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::answer::AnswerEngine;
use crate::chat::create_chat_model;
use crate::config::Config;
use crate::embedding::create_embedder;
use crate::session::{Conversation, SessionLog};

pub async fn run_chat(config: &Config) -> Result<()> {
    if !config.chat.is_enabled() {
        bail!("Chat provider is disabled. Set [chat] provider in config.");
    }
    let embedder = create_embedder(&config.embedding)?;
    let chat = create_chat_model(&config.chat)?;
    let engine = AnswerEngine::new(config, embedder, chat);

    // Refuse to start without an index.
    let snapshot = engine.store().snapshot()?;
    tracing::info!("index v{} ready", snapshot.version);
    drop(snapshot);

    let log = SessionLog::create(&config.paths.sessions_dir())?;
    let mut conversation = Conversation::new();

    println!("interactive RAG (empty line exits)");
    println!("  session log: {}", log.path().display());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("\n질문> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let question = line.trim();
        if question.is_empty() {
            break;
        }

        match engine.ask(question, &conversation).await {
            Ok(answer) => {
                println!("\n답변:\n{}", answer.text);
                if answer.insufficient_evidence {
                    continue;
                }
                for source in &answer.sources {
                    println!(
                        "  [{}] {} ({}) hyb={:.3}",
                        source.rank, source.filename, source.category, source.score
                    );
                }
                log.append(conversation.push_exchange(question, &answer.text))?;
            }
            Err(e) => eprintln!("Error: {:#}", e),
        }
    }

    println!("bye");
    Ok(())
}
