//! Query router
//!
//! Matches a fixed precedence list of patterns against the incoming question
//! and, when a deterministic branch applies, answers without the LLM: product
//! lookups route to hybrid search, count/sum/list questions become SQL
//! templates. A template is only instantiated when the caller supplies a
//! validated table hint; otherwise the decision falls through to the LLM.

use atabot_common::db::{quote_ident, quote_qualified};
use regex_lite::Regex;
use serde::Serialize;
use serde_json::Value;

/// Processing branch chosen for a query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteKind {
    ProductSearch,
    Count,
    Sum,
    List,
    SimpleWhere,
    Complex,
}

/// A deterministic SQL template with parameterised filter values
#[derive(Debug, Clone, Serialize)]
pub struct SqlTemplate {
    pub sql: String,
    pub params: Vec<Value>,
}

/// Router output
#[derive(Debug, Clone, Serialize)]
pub struct RouteDecision {
    pub kind: RouteKind,
    pub needs_llm: bool,
    /// Instantiated template, present only when a validated table hint was
    /// supplied
    pub sql: Option<SqlTemplate>,
    /// Extracted product term for the search branch
    pub search_term: Option<String>,
}

impl RouteDecision {
    fn llm() -> Self {
        Self {
            kind: RouteKind::Complex,
            needs_llm: true,
            sql: None,
            search_term: None,
        }
    }
}

/// Pattern-based query router
pub struct QueryRouter {
    stock: Regex,
    product: Regex,
    count: Regex,
    sum: Regex,
    list: Regex,
    simple_where: Regex,
}

impl Default for QueryRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryRouter {
    pub fn new() -> Self {
        Self {
            stock: Regex::new(r"(?i)\b(?:stok|stock)\s+([A-Za-z][A-Za-z0-9 ]*)").unwrap(),
            product: Regex::new(r"(?i)\b(?:cari|search|find)\s+([A-Za-z][A-Za-z0-9 ]*)").unwrap(),
            count: Regex::new(r"(?i)\b(?:count|jumlah|berapa banyak|how many)\b").unwrap(),
            sum: Regex::new(r"(?i)\b(?:total|sum)\s+(\w+)").unwrap(),
            list: Regex::new(r"(?i)\b(?:list|show|tampilkan|tunjukkan)\s+all\b").unwrap(),
            simple_where: Regex::new(
                r#"(?i)\b(?:where|dengan|yang)\s+(\w+)\s*(?:=|is)\s*["']?([^"']+)["']?"#,
            )
            .unwrap(),
        }
    }

    /// Classify a query. Precedence: stock lookup, product search, count,
    /// sum, list, simple where, complex.
    pub fn classify(
        &self,
        query: &str,
        schema: &str,
        table_hint: Option<&str>,
    ) -> RouteDecision {
        // Product lookups go to hybrid search with the extracted term
        if let Some(caps) = self.stock.captures(query) {
            return Self::product_route(&caps[1]);
        }
        if let Some(caps) = self.product.captures(query) {
            return Self::product_route(&caps[1]);
        }

        // SQL templates need a validated table to be instantiated against
        let where_clause = self.extract_where(query);

        if self.count.is_match(query) {
            return self.template_route(RouteKind::Count, schema, table_hint, |table| {
                let (where_sql, params) = Self::where_fragment(&where_clause, 1);
                Some(SqlTemplate {
                    sql: format!("SELECT COUNT(*) FROM {}{}", table, where_sql),
                    params,
                })
            });
        }

        if let Some(caps) = self.sum.captures(query) {
            let field = caps[1].to_string();
            return self.template_route(RouteKind::Sum, schema, table_hint, |table| {
                let field = quote_ident(&field).ok()?;
                let (where_sql, params) = Self::where_fragment(&where_clause, 1);
                Some(SqlTemplate {
                    sql: format!("SELECT SUM({}) FROM {}{}", field, table, where_sql),
                    params,
                })
            });
        }

        if self.list.is_match(query) {
            return self.template_route(RouteKind::List, schema, table_hint, |table| {
                let (where_sql, params) = Self::where_fragment(&where_clause, 1);
                Some(SqlTemplate {
                    sql: format!("SELECT * FROM {}{} LIMIT 100", table, where_sql),
                    params,
                })
            });
        }

        if where_clause.is_some() {
            return self.template_route(RouteKind::SimpleWhere, schema, table_hint, |table| {
                let (where_sql, params) = Self::where_fragment(&where_clause, 1);
                Some(SqlTemplate {
                    sql: format!("SELECT * FROM {}{} LIMIT 100", table, where_sql),
                    params,
                })
            });
        }

        RouteDecision::llm()
    }

    fn product_route(term: &str) -> RouteDecision {
        let term = term.trim().to_string();
        if term.is_empty() {
            return RouteDecision::llm();
        }
        RouteDecision {
            kind: RouteKind::ProductSearch,
            needs_llm: false,
            sql: None,
            search_term: Some(term),
        }
    }

    fn template_route(
        &self,
        kind: RouteKind,
        schema: &str,
        table_hint: Option<&str>,
        build: impl FnOnce(&str) -> Option<SqlTemplate>,
    ) -> RouteDecision {
        let Some(table) = table_hint else {
            // No validated table: the template is discarded and the LLM
            // path is used
            return RouteDecision::llm();
        };
        let Ok(qualified) = quote_qualified(schema, table) else {
            return RouteDecision::llm();
        };
        match build(&qualified) {
            Some(sql) => RouteDecision {
                kind,
                needs_llm: false,
                sql: Some(sql),
                search_term: None,
            },
            None => RouteDecision::llm(),
        }
    }

    fn extract_where(&self, query: &str) -> Option<(String, String)> {
        let caps = self.simple_where.captures(query)?;
        Some((caps[1].to_string(), caps[2].trim().to_string()))
    }

    /// Build a parameterised WHERE fragment; identifiers are quoted, values
    /// are bound
    fn where_fragment(
        clause: &Option<(String, String)>,
        param_start: usize,
    ) -> (String, Vec<Value>) {
        match clause {
            Some((field, value)) => match quote_ident(field) {
                Ok(field) => (
                    format!(" WHERE {} = ${}", field, param_start),
                    vec![Value::String(value.clone())],
                ),
                Err(_) => (String::new(), Vec::new()),
            },
            None => (String::new(), Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router() -> QueryRouter {
        QueryRouter::new()
    }

    #[test]
    fn test_stock_query_routes_to_product_search() {
        let decision = router().classify("berapa stok ALO", "public", None);
        assert_eq!(decision.kind, RouteKind::ProductSearch);
        assert!(!decision.needs_llm);
        assert_eq!(decision.search_term.as_deref(), Some("ALO"));
    }

    #[test]
    fn test_search_query_extracts_term() {
        let decision = router().classify("cari LEGGING BLACK", "public", None);
        assert_eq!(decision.kind, RouteKind::ProductSearch);
        assert_eq!(decision.search_term.as_deref(), Some("LEGGING BLACK"));
    }

    #[test]
    fn test_count_template_with_table_hint() {
        let decision = router().classify("how many products", "public", Some("products"));
        assert_eq!(decision.kind, RouteKind::Count);
        assert!(!decision.needs_llm);
        let sql = decision.sql.unwrap();
        assert_eq!(sql.sql, "SELECT COUNT(*) FROM \"public\".\"products\"");
        assert!(sql.params.is_empty());
    }

    #[test]
    fn test_count_without_table_hint_falls_to_llm() {
        let decision = router().classify("how many products", "public", None);
        assert_eq!(decision.kind, RouteKind::Complex);
        assert!(decision.needs_llm);
        assert!(decision.sql.is_none());
    }

    #[test]
    fn test_sum_template_quotes_field() {
        let decision = router().classify("total revenue this year", "public", Some("orders"));
        assert_eq!(decision.kind, RouteKind::Sum);
        let sql = decision.sql.unwrap();
        assert_eq!(sql.sql, "SELECT SUM(\"revenue\") FROM \"public\".\"orders\"");
    }

    #[test]
    fn test_list_all_template() {
        let decision = router().classify("show all items", "public", Some("items"));
        assert_eq!(decision.kind, RouteKind::List);
        let sql = decision.sql.unwrap();
        assert_eq!(sql.sql, "SELECT * FROM \"public\".\"items\" LIMIT 100");
    }

    #[test]
    fn test_where_clause_is_parameterised() {
        let decision =
            router().classify("count orders where status = 'open'", "public", Some("orders"));
        assert_eq!(decision.kind, RouteKind::Count);
        let sql = decision.sql.unwrap();
        assert_eq!(
            sql.sql,
            "SELECT COUNT(*) FROM \"public\".\"orders\" WHERE \"status\" = $1"
        );
        assert_eq!(sql.params, vec![Value::String("open".into())]);
    }

    #[test]
    fn test_standalone_where_becomes_filtered_list() {
        let decision = router().classify("items yang warna = merah", "public", Some("items"));
        assert_eq!(decision.kind, RouteKind::SimpleWhere);
        let sql = decision.sql.unwrap();
        assert_eq!(
            sql.sql,
            "SELECT * FROM \"public\".\"items\" WHERE \"warna\" = $1 LIMIT 100"
        );
        assert_eq!(sql.params, vec![Value::String("merah".into())]);
    }

    #[test]
    fn test_injection_in_table_hint_falls_to_llm() {
        let decision = router().classify("how many products", "public", Some("products; DROP"));
        assert!(decision.needs_llm);
        assert!(decision.sql.is_none());
    }

    #[test]
    fn test_complex_query_needs_llm() {
        let decision = router().classify(
            "which supplier had the best margin trend over the last three quarters",
            "public",
            Some("orders"),
        );
        assert_eq!(decision.kind, RouteKind::Complex);
        assert!(decision.needs_llm);
    }

    #[test]
    fn test_stock_precedes_count() {
        // "berapa" alone is also a count word; stock-specific wins
        let decision = router().classify("berapa banyak stok ALO", "public", Some("items"));
        assert_eq!(decision.kind, RouteKind::ProductSearch);
        assert_eq!(decision.search_term.as_deref(), Some("ALO"));
    }
}
