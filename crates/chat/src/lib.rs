//! Atabot Chat Orchestrator
//!
//! Validates input, selects the active schema, optionally decomposes
//! multi-part questions, dispatches each sub-question through the query
//! router, hybrid search or the LLM-SQL branch, and composes the final
//! answer.

mod answer;
mod decompose;
mod guard;
mod joins;
mod orchestrator;
mod session;
mod sqlgen;

pub use answer::{detect_language, AnswerComposer, Language};
pub use decompose::{analyze_intent, IntentKind, QueryDecomposer, QueryIntent};
pub use guard::SecurityGuard;
pub use joins::{JoinPlan, JoinPlanner};
pub use orchestrator::{ChatEvent, ChatOrchestrator, ChatRequest, ChatResponse};
pub use session::{Session, SessionStore};
pub use sqlgen::{validate_sql, SqlGenerator};
