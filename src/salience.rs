//! Language-specific salience: which question tokens are keywords, and which
//! chunk segments carry figures worth quoting.
//!
//! Retrieval and context assembly only talk to [`SalienceExtractor`]; the
//! bundled [`KoreanLegalSalience`] knows Korean particles and the
//! amount/penalty/article vocabulary of Korean statutes.

use regex::{Regex, RegexBuilder};
use std::collections::HashSet;
use std::sync::LazyLock;

use crate::config::RetrievalConfig;

pub trait SalienceExtractor: Send + Sync {
    /// Distinct keywords of `question` in first-seen order, original casing.
    fn keywords(&self, question: &str) -> Vec<String>;

    /// Whether a sentence-like segment is worth keeping in a snippet.
    fn is_salient(&self, segment: &str) -> bool;
}

/// Korean particles and common English function words.
pub const STOPWORDS: &[&str] = &[
    "은", "는", "이", "가", "을", "를", "에", "에서", "으로", "과", "와", "및", "the", "a",
    "an", "of", "in", "on", "for", "to", "and", "or", "is", "are",
];

static NON_WORD: LazyLock<Regex> = LazyLock::new(|| match Regex::new(r"[^\w\s]+") {
    Ok(regex) => regex,
    Err(err) => panic!("non-word regex is invalid: {err}"),
});

/// Currency amounts, penalty vocabulary, and article/clause/item references.
static LEGAL_FIGURE: LazyLock<Regex> = LazyLock::new(|| {
    match Regex::new(r"([0-9][0-9,.]*\s*(원|만원|천원|백만원)|과태료|벌금|부과|별표|제\d+조|제\d+항|제\d+호)")
    {
        Ok(regex) => regex,
        Err(err) => panic!("legal figure regex is invalid: {err}"),
    }
});

pub struct KoreanLegalSalience {
    stopwords: HashSet<&'static str>,
    min_len: usize,
    max_keywords: usize,
}

impl KoreanLegalSalience {
    pub fn new(min_len: usize, max_keywords: usize) -> Self {
        Self {
            stopwords: STOPWORDS.iter().copied().collect(),
            min_len,
            max_keywords,
        }
    }

    pub fn from_config(config: &RetrievalConfig) -> Self {
        Self::new(config.min_keyword_len, config.max_keywords)
    }
}

impl Default for KoreanLegalSalience {
    fn default() -> Self {
        Self::new(2, 8)
    }
}

impl SalienceExtractor for KoreanLegalSalience {
    fn keywords(&self, question: &str) -> Vec<String> {
        let cleaned = NON_WORD.replace_all(question, " ");
        let mut seen = HashSet::new();
        let mut out = Vec::new();

        for token in cleaned.split_whitespace() {
            if out.len() >= self.max_keywords {
                break;
            }
            let lower = token.to_lowercase();
            if lower.chars().count() < self.min_len || self.stopwords.contains(lower.as_str()) {
                continue;
            }
            if seen.insert(lower) {
                out.push(token.to_string());
            }
        }
        out
    }

    fn is_salient(&self, segment: &str) -> bool {
        LEGAL_FIGURE.is_match(segment)
    }
}

/// Total case-insensitive, non-overlapping occurrences of all keywords.
pub fn keyword_score(text: &str, keywords: &[String]) -> usize {
    if keywords.is_empty() {
        return 0;
    }
    let haystack = text.to_lowercase();
    keywords
        .iter()
        .map(|k| k.to_lowercase())
        .filter(|k| !k.is_empty())
        .map(|k| haystack.matches(k.as_str()).count())
        .sum()
}

/// Whether `text` contains at least one keyword, ignoring case.
pub fn contains_any_keyword(text: &str, keywords: &[String]) -> bool {
    let haystack = text.to_lowercase();
    keywords
        .iter()
        .any(|k| !k.is_empty() && haystack.contains(&k.to_lowercase()))
}

/// One case-insensitive alternation over all keywords, longest first so a
/// keyword that prefixes another never shadows it.
pub fn keyword_pattern(keywords: &[String]) -> Option<Regex> {
    let mut sorted: Vec<&String> = keywords.iter().filter(|k| !k.is_empty()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(|a, b| b.chars().count().cmp(&a.chars().count()));
    let alternation = sorted
        .iter()
        .map(|k| regex::escape(k))
        .collect::<Vec<_>>()
        .join("|");
    RegexBuilder::new(&alternation)
        .case_insensitive(true)
        .build()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kws(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn keywords_drop_stopwords_punctuation_and_short_tokens() {
        let s = KoreanLegalSalience::default();
        assert_eq!(s.keywords("과태료 금액은?"), kws(&["과태료", "금액은"]));
        assert_eq!(
            s.keywords("What is the fine, and the PENALTY?"),
            kws(&["What", "fine", "PENALTY"])
        );
        assert!(s.keywords("은 는 a ?").is_empty());
    }

    #[test]
    fn keywords_dedupe_case_insensitively_keeping_first() {
        let s = KoreanLegalSalience::default();
        assert_eq!(s.keywords("Fine fine FINE 벌금 벌금"), kws(&["Fine", "벌금"]));
    }

    #[test]
    fn keywords_are_capped() {
        let s = KoreanLegalSalience::new(2, 3);
        assert_eq!(s.keywords("aa bb cc dd ee"), kws(&["aa", "bb", "cc"]));
    }

    #[test]
    fn legal_figures_are_salient() {
        let s = KoreanLegalSalience::default();
        assert!(s.is_salient("범칙금은 30,000 원이다."));
        assert!(s.is_salient("제12조제3항에 따른다."));
        assert!(s.is_salient("과태료를 낸다"));
        assert!(!s.is_salient("이 법은 공포한 날부터 시행한다."));
    }

    #[test]
    fn score_counts_every_occurrence_ignoring_case() {
        let text = "Fine: 10. fine again. 과태료 과태료";
        assert_eq!(keyword_score(text, &kws(&["FINE", "과태료"])), 4);
        assert_eq!(keyword_score(text, &[]), 0);
    }

    #[test]
    fn pattern_prefers_longer_keyword() {
        let re = keyword_pattern(&kws(&["과태", "과태료"])).unwrap();
        let m = re.find("과태료 부과").unwrap();
        assert_eq!(m.as_str(), "과태료");
        assert!(keyword_pattern(&[]).is_none());
    }
}
