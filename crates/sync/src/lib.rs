//! Atabot Sync Pipeline
//!
//! Streams rows from user-selected tables in pages, renders each row to
//! searchable text, routes the texts through the embedding queue and stores
//! the resulting vectors. Tracks per-table sync state with an incremental
//! watermark and exposes per-job progress.

mod jobs;
mod render;
mod pipeline;

pub use jobs::{JobProgress, JobRegistry, JobState, SyncJob};
pub use pipeline::{ChangeOp, SyncMode, SyncReport, SyncService, TableSyncStatus};
pub use render::{render_searchable_text, sanitize_metadata, stable_row_id};
