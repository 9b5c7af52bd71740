//! Chat payload for a grounded answer.
//!
//! Two messages are sent: a system instruction fixing the citation persona
//! and a user message carrying recent history, the question, and the
//! context block.

use crate::context::NO_CONTEXT;
use crate::models::ChatMessage;

const PERSONA: &str = "당신은 한국 법률 도메인 RAG 비서입니다. \
제공된 컨텍스트 밖의 내용은 답하지 말고 '근거 부족'이라고 말하세요. \
가능하면 금액·수치·조항을 우선 정리하고, 답변 끝에 [1], [2] 같은 근거 번호를 표기하세요. \
금액·수치·조항 번호는 컨텍스트의 표기를 그대로 옮기고, 모호한 표현은 피하세요. ";

const GENERAL_KNOWLEDGE: &str = "컨텍스트에 근거가 없으면 먼저 '근거 부족'이라고 밝힌 뒤, \
일반적인 법률 상식으로 보충할 수 있습니다. 이 경우 보충한 부분에는 근거 번호를 달지 마세요. ";

const KEYWORD_RULE: &str = "컨텍스트에 있는 질문 키워드는 반드시 본문에 포함하세요: ";

const CLOSING: &str = "지침: 위 컨텍스트와 대화 이력을 바탕으로 정확히 답하세요.";

#[derive(Debug, Clone, Copy)]
pub struct PromptOptions {
    /// Number of most recent history turns included.
    pub history_window: usize,
    pub allow_general_knowledge: bool,
}

pub fn system_prompt(keywords: &[String], allow_general_knowledge: bool) -> String {
    let mut s = String::from(PERSONA);
    if allow_general_knowledge {
        s.push_str(GENERAL_KNOWLEDGE);
    }
    s.push_str(KEYWORD_RULE);
    s.push_str(&keywords.join(", "));
    s
}

pub fn user_prompt(
    history: &[ChatMessage],
    question: &str,
    context: &str,
    window: usize,
) -> String {
    let recent = &history[history.len().saturating_sub(window)..];
    let lines: Vec<String> = recent
        .iter()
        .map(|m| format!("- {}: {}", m.role.as_str(), m.content))
        .collect();

    let context = if context.is_empty() { NO_CONTEXT } else { context };

    format!(
        "이전 대화:\n{}\n\n현재 질문:\n{}\n\n[컨텍스트]\n{}\n\n{}",
        lines.join("\n"),
        question,
        context,
        CLOSING
    )
}

pub fn build_messages(
    history: &[ChatMessage],
    question: &str,
    context: &str,
    keywords: &[String],
    options: PromptOptions,
) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(system_prompt(keywords, options.allow_general_knowledge)),
        ChatMessage::user(user_prompt(history, question, context, options.history_window)),
    ]
}
