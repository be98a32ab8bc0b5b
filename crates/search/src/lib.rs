//! Atabot Search
//!
//! Two subsystems:
//! - The query router, which classifies a natural-language question and picks
//!   a processing branch without consulting the LLM when a template suffices
//! - Hybrid search, which fuses vector similarity with keyword boosting and
//!   deterministic aggregation shortcuts

mod hybrid;
mod router;

pub use hybrid::{HybridSearch, RankedResult, SearchOptions, SourceRef};
pub use router::{QueryRouter, RouteDecision, RouteKind, SqlTemplate};
