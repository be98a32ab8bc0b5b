//! Answer composition
//!
//! Turns retrieved rows or search results into a natural-language answer via
//! the LLM, with deterministic formatting as fallback. Canned no-data and
//! error responses follow the user's detected language.

use atabot_common::llm::{ChatMessage, LlmProvider};
use atabot_search::RankedResult;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::warn;

/// Detected response language
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    Indonesian,
    English,
}

const INDONESIAN_MARKERS: &[&str] = &[
    "berapa", "stok", "jumlah", "tampilkan", "tunjukkan", "cari", "harga", "yang", "dengan",
    "dan", "atau", "semua", "paling", "tertinggi", "terendah", "bulan", "produk", "barang",
];

/// Guess the query language from common Indonesian markers
pub fn detect_language(text: &str) -> Language {
    let lower = text.to_lowercase();
    let hits = INDONESIAN_MARKERS
        .iter()
        .filter(|w| lower.split_whitespace().any(|t| t == **w))
        .count();
    if hits >= 1 {
        Language::Indonesian
    } else {
        Language::English
    }
}

/// Canned response when retrieval finds nothing
pub fn no_data_response(language: Language) -> String {
    match language {
        Language::Indonesian => {
            "Maaf, saya tidak menemukan data yang relevan dengan pertanyaan Anda. \
             Pastikan data sudah disinkronkan atau coba kata kunci lain."
                .to_string()
        }
        Language::English => {
            "Sorry, I could not find any relevant data for your question. \
             Please ensure the data is synchronized or try different keywords."
                .to_string()
        }
    }
}

/// Canned response for rejected queries
pub fn safe_rejection(language: Language) -> String {
    match language {
        Language::Indonesian => {
            "Maaf, saya hanya dapat menjawab pertanyaan yang berkaitan dengan data \
             bisnis Anda: stok, produk, penjualan, dan laporan dari database."
                .to_string()
        }
        Language::English => {
            "Sorry, I can only answer questions about your business data: stock, \
             products, sales, and reports from the database."
                .to_string()
        }
    }
}

/// Canned response when a branch fails terminally
pub fn error_response(language: Language) -> String {
    match language {
        Language::Indonesian => {
            "Maaf, terjadi kesalahan saat memproses pertanyaan Anda. Silakan coba lagi."
                .to_string()
        }
        Language::English => {
            "Sorry, something went wrong while processing your question. Please try again."
                .to_string()
        }
    }
}

/// LLM-backed answer composer with deterministic fallback
pub struct AnswerComposer {
    llm: Arc<dyn LlmProvider>,
}

impl AnswerComposer {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }

    /// Compose an answer from search results
    pub async fn from_results(
        &self,
        query: &str,
        results: &[RankedResult],
        language: Language,
    ) -> String {
        if results.is_empty() {
            return no_data_response(language);
        }

        let context = results
            .iter()
            .take(10)
            .enumerate()
            .map(|(i, r)| format!("{}. {}", i + 1, r.content))
            .collect::<Vec<_>>()
            .join("\n");

        self.compose(query, &context, language).await
    }

    /// Compose an answer from SQL rows
    pub async fn from_rows(
        &self,
        query: &str,
        rows: &[Map<String, Value>],
        language: Language,
    ) -> String {
        if rows.is_empty() {
            return no_data_response(language);
        }

        let context = format_rows(rows, 20);
        self.compose(query, &context, language).await
    }

    async fn compose(&self, query: &str, context: &str, language: Language) -> String {
        let lang_instruction = match language {
            Language::Indonesian => "Respond in Indonesian.",
            Language::English => "Respond in English.",
        };

        let messages = vec![
            ChatMessage::system(format!(
                "You are a business data assistant. Answer based ONLY on the \
                 provided context. Be accurate and concise. If the context does \
                 not contain the answer, say so clearly. {}",
                lang_instruction
            )),
            ChatMessage::user(format!(
                "Question: {}\n\nAvailable Data:\n{}\n\nProvide a clear, accurate \
                 answer based on the data above:",
                query, context
            )),
        ];

        match self.llm.chat(&messages, 2000, 0.3).await {
            Ok(answer) => answer,
            Err(e) => {
                warn!(error = %e, "Answer generation failed, using plain formatting");
                context.to_string()
            }
        }
    }
}

/// Deterministic row formatting: one line per row, scalar fields only
pub fn format_rows(rows: &[Map<String, Value>], max_rows: usize) -> String {
    rows.iter()
        .take(max_rows)
        .map(|row| {
            row.iter()
                .filter(|(k, v)| !k.starts_with('_') && !v.is_null())
                .map(|(k, v)| match v {
                    Value::String(s) => format!("{}: {}", k, s),
                    other => format!("{}: {}", k, other),
                })
                .collect::<Vec<_>>()
                .join(", ")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_language_detection() {
        assert_eq!(detect_language("berapa stok ALO"), Language::Indonesian);
        assert_eq!(
            detect_language("tampilkan semua produk"),
            Language::Indonesian
        );
        assert_eq!(
            detect_language("how many items are in stock"),
            Language::English
        );
    }

    #[test]
    fn test_canned_responses_follow_language() {
        assert!(no_data_response(Language::Indonesian).starts_with("Maaf"));
        assert!(no_data_response(Language::English).starts_with("Sorry"));
        assert!(safe_rejection(Language::Indonesian).contains("bisnis"));
        assert!(error_response(Language::English).contains("try again"));
    }

    #[test]
    fn test_format_rows_skips_internal_and_null_fields() {
        let rows = vec![json!({
            "name": "ALO",
            "qty": 42,
            "_schema": "retail",
            "note": null
        })
        .as_object()
        .cloned()
        .unwrap()];

        let formatted = format_rows(&rows, 10);
        assert!(formatted.contains("name: ALO"));
        assert!(formatted.contains("qty: 42"));
        assert!(!formatted.contains("_schema"));
        assert!(!formatted.contains("note"));
    }

    #[tokio::test]
    async fn test_empty_results_yield_canned_no_data() {
        let llm = Arc::new(atabot_common::llm::MockLlm::new(vec![]));
        let composer = AnswerComposer::new(llm.clone());
        let answer = composer
            .from_results("berapa stok XYZ", &[], Language::Indonesian)
            .await;
        assert!(answer.starts_with("Maaf"));
        assert_eq!(llm.call_count(), 0);
    }
}
