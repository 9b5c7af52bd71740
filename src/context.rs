//! Context assembly and the evidence gate.
//!
//! Each ranked chunk becomes a labelled block:
//!
//! ```text
//! [1] law.txt_chunk_3.txt (traffic) (dist=0.2310,hyb=0.712)
//! 제27조 과태료는 **10만원** 이하로 한다.
//! ```
//!
//! Blocks are joined with `\n\n---\n\n`. The rank doubles as the citation
//! number the model is asked to use.

use crate::models::RankedCandidate;
use crate::salience::{contains_any_keyword, keyword_pattern, SalienceExtractor};

/// Fixed reply when retrieval clearly missed the question's topic.
pub const INSUFFICIENT_EVIDENCE: &str =
    "내부 근거가 부족합니다. 데이터 동기화 후 다시 시도해주세요.";

/// Marker used in the prompt when there is no context at all.
pub const NO_CONTEXT: &str = "(없음)";

const BLOCK_SEPARATOR: &str = "\n\n---\n\n";

/// Split into sentence-like segments: after `.`, `!` or `?` followed by
/// whitespace, and after every newline. Delimiters stay with the segment
/// they end.
pub fn segments(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut prev: Option<char> = None;

    for (i, c) in text.char_indices() {
        let end = i + c.len_utf8();
        let boundary = c == '\n' || (c.is_whitespace() && matches!(prev, Some('.' | '!' | '?')));
        if boundary {
            out.push(&text[start..end]);
            start = end;
        }
        prev = Some(c);
    }
    if start < text.len() {
        out.push(&text[start..]);
    }
    out
}

fn take_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((i, _)) => &text[..i],
        None => text,
    }
}

/// Salient segments joined by newlines, or the head of the chunk when no
/// segment is salient. Bounded to `max_chars` characters.
pub fn select_snippet(content: &str, salience: &dyn SalienceExtractor, max_chars: usize) -> String {
    let hits: Vec<&str> = segments(content)
        .into_iter()
        .filter(|s| salience.is_salient(s))
        .collect();

    if hits.is_empty() {
        take_chars(content, max_chars).to_string()
    } else {
        take_chars(&hits.join("\n"), max_chars).to_string()
    }
}

/// Wrap every keyword occurrence in `**…**`.
pub fn highlight(text: &str, keywords: &[String]) -> String {
    match keyword_pattern(keywords) {
        Some(re) => re.replace_all(text, "**$0**").into_owned(),
        None => text.to_string(),
    }
}

pub fn format_block(candidate: &RankedCandidate, snippet: &str) -> String {
    format!(
        "[{}] {} ({}) (dist={:.4},hyb={:.3})\n{}",
        candidate.rank,
        candidate.record.filename,
        candidate.record.category,
        candidate.distance,
        candidate.score,
        snippet
    )
}

/// The full context block for the prompt; empty when there are no
/// candidates.
pub fn build_context(
    candidates: &[RankedCandidate],
    keywords: &[String],
    salience: &dyn SalienceExtractor,
    snippet_chars: usize,
) -> String {
    candidates
        .iter()
        .map(|c| {
            let snippet = highlight(&select_snippet(&c.content, salience, snippet_chars), keywords);
            format_block(c, &snippet)
        })
        .collect::<Vec<_>>()
        .join(BLOCK_SEPARATOR)
}

/// Whether the candidates support an answer: vacuously true without
/// keywords, otherwise some candidate's raw text must contain a keyword.
pub fn has_evidence(candidates: &[RankedCandidate], keywords: &[String]) -> bool {
    if keywords.is_empty() {
        return true;
    }
    candidates
        .iter()
        .any(|c| contains_any_keyword(&c.content, keywords))
}
