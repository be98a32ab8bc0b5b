//! Intent analysis and query decomposition
//!
//! A coarse intent classification decides the processing branch; a
//! decomposition hint flags multi-part questions. Decomposition asks the LLM
//! for a JSON array of sub-questions with a rule-based splitter as fallback,
//! and recomposition merges sub-answers via the LLM with concatenation as
//! fallback.

use atabot_common::llm::{ChatMessage, LlmProvider};
use regex_lite::Regex;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// Coarse query intent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IntentKind {
    Aggregation,
    Comparison,
    Listing,
    Search,
    Question,
    Unknown,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryIntent {
    pub kind: IntentKind,
    pub requires_filtering: bool,
    pub requires_joining: bool,
    /// Conjunctions, comparisons or multiple entities suggest decomposition
    pub needs_decomposition: bool,
}

const CONJUNCTIONS: &[&str] = &[
    "and", "dan", "or", "atau", "serta", "also", "juga", "as well as", "along with", "beserta",
];

const COMPARISONS: &[&str] = &[
    "vs",
    "versus",
    "compared to",
    "dibanding",
    "berbanding",
    "difference between",
    "perbedaan antara",
];

/// Analyze a query without any model call
pub fn analyze_intent(query: &str) -> QueryIntent {
    let q = query.to_lowercase();
    let padded = format!(" {} ", q);

    let kind = if ["total", "sum", "count", "average", "jumlah", "rata-rata"]
        .iter()
        .any(|w| q.contains(w))
    {
        IntentKind::Aggregation
    } else if COMPARISONS.iter().any(|w| q.contains(w)) || q.contains("bandingkan") {
        IntentKind::Comparison
    } else if ["list", "show", "display", "tampilkan", "daftar"]
        .iter()
        .any(|w| q.contains(w))
    {
        IntentKind::Listing
    } else if ["find", "search", "locate", "cari", "temukan"]
        .iter()
        .any(|w| q.contains(w))
    {
        IntentKind::Search
    } else if q.contains('?') {
        IntentKind::Question
    } else {
        IntentKind::Unknown
    };

    let requires_filtering = ["where", "with", "having", "yang", "dengan"]
        .iter()
        .any(|w| padded.contains(&format!(" {} ", w)));

    let entities = capitalized_entities(query);
    let requires_joining = entities.len() > 1;

    let has_conjunction = CONJUNCTIONS
        .iter()
        .any(|w| padded.contains(&format!(" {} ", w)));
    let has_comparison = kind == IntentKind::Comparison;

    QueryIntent {
        kind,
        requires_filtering,
        requires_joining,
        needs_decomposition: has_conjunction || has_comparison || entities.len() > 2,
    }
}

/// Distinct capitalized tokens, a proxy for named entities
fn capitalized_entities(query: &str) -> Vec<String> {
    let re = Regex::new(r"\b[A-Z][A-Za-z0-9]+\b").unwrap();
    let mut out: Vec<String> = Vec::new();
    for m in re.find_iter(query) {
        let s = m.as_str().to_string();
        if !out.contains(&s) {
            out.push(s);
        }
    }
    out
}

/// LLM-backed decomposer with rule-based fallback
pub struct QueryDecomposer {
    llm: Arc<dyn LlmProvider>,
}

impl QueryDecomposer {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }

    /// Decompose a multi-part query into atomic sub-questions
    pub async fn decompose(&self, query: &str) -> Vec<String> {
        let messages = vec![
            ChatMessage::system(
                "You break complex questions into simple, atomic sub-questions. \
                 Each sub-question asks for ONE piece of information, is answerable \
                 independently, and preserves the original language and terminology. \
                 Return ONLY a JSON array of strings.",
            ),
            ChatMessage::user(format!(
                "Decompose this query into simple sub-queries:\n\nQuery: \"{}\"\n\n\
                 Output format: [\"question 1\", \"question 2\"]",
                query
            )),
        ];

        match self.llm.chat(&messages, 500, 0.3).await {
            Ok(response) => {
                if let Some(subs) = parse_json_array(&response) {
                    if subs.len() > 1 {
                        info!(count = subs.len(), "LLM decomposed query");
                        return subs;
                    }
                }
                rule_based_split(query)
            }
            Err(e) => {
                warn!(error = %e, "LLM decomposition failed, using rules");
                rule_based_split(query)
            }
        }
    }

    /// Merge sub-answers into one response; falls back to concatenation
    pub async fn recompose(&self, original: &str, pairs: &[(String, String)]) -> String {
        if pairs.len() == 1 {
            return pairs[0].1.clone();
        }

        let qa = pairs
            .iter()
            .map(|(q, a)| format!("Q: {}\nA: {}", q, a))
            .collect::<Vec<_>>()
            .join("\n");

        let messages = vec![ChatMessage::user(format!(
            "Combine these answers into one coherent response to the original \
             question.\n\nOriginal question: \"{}\"\n\n{}\n\n\
             If the question was a comparison, clearly present both sides.",
            original, qa
        ))];

        match self.llm.chat(&messages, 1000, 0.3).await {
            Ok(combined) => combined,
            Err(e) => {
                warn!(error = %e, "Recomposition failed, concatenating");
                pairs
                    .iter()
                    .map(|(q, a)| format!("Regarding '{}':\n{}", q, a))
                    .collect::<Vec<_>>()
                    .join("\n\n")
            }
        }
    }
}

/// Extract the first JSON array of strings from LLM output
fn parse_json_array(response: &str) -> Option<Vec<String>> {
    let start = response.find('[')?;
    let end = response.rfind(']')?;
    if end <= start {
        return None;
    }
    let parsed: Vec<String> = serde_json::from_str(&response[start..=end]).ok()?;
    let valid: Vec<String> = parsed
        .into_iter()
        .map(|q| q.trim().to_string())
        .filter(|q| q.len() > 5)
        .collect();
    if valid.is_empty() {
        None
    } else {
        Some(valid)
    }
}

/// Split on conjunctions and comparison words
pub fn rule_based_split(query: &str) -> Vec<String> {
    let lower = query.to_lowercase();

    // Comparisons produce one sub-query per side
    for comp in COMPARISONS {
        if let Some(pos) = lower.find(comp) {
            let left = query[..pos].trim();
            let right = query[pos + comp.len()..].trim();
            if !left.is_empty() && !right.is_empty() {
                return vec![left.to_string(), right.to_string()];
            }
        }
    }

    let splitter = Regex::new(r"(?i)\s+(?:and|dan|or|atau|serta)\s+").unwrap();
    let parts: Vec<String> = splitter
        .split(query)
        .map(|p| p.trim().to_string())
        .filter(|p| p.chars().count() > 5)
        .collect();

    if parts.len() > 1 {
        parts
    } else {
        vec![query.to_string()]
    }
}
