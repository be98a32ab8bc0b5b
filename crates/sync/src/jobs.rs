//! Sync job registry
//!
//! In-process bookkeeping for background sync jobs. Multiple jobs may run
//! concurrently; conflicting syncs of the same table stay visible here but
//! are not blocked at the storage layer because upserts are idempotent.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct JobProgress {
    pub percentage: f32,
    pub rows_processed: u64,
    pub total_rows: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncJob {
    pub job_id: String,
    pub schema: String,
    pub table: Option<String>,
    pub mode: String,
    pub state: JobState,
    pub progress: JobProgress,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub errors: Vec<String>,
}

/// Registry of sync jobs for this process
#[derive(Default)]
pub struct JobRegistry {
    jobs: Mutex<HashMap<String, SyncJob>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a running job and return its id
    pub fn create(&self, schema: &str, table: Option<&str>, mode: &str) -> String {
        let job_id = Uuid::new_v4().to_string();
        let job = SyncJob {
            job_id: job_id.clone(),
            schema: schema.to_string(),
            table: table.map(str::to_string),
            mode: mode.to_string(),
            state: JobState::Running,
            progress: JobProgress::default(),
            started_at: Utc::now(),
            completed_at: None,
            errors: Vec::new(),
        };
        self.jobs.lock().unwrap().insert(job_id.clone(), job);
        job_id
    }

    pub fn update_progress(&self, job_id: &str, rows_processed: u64, total_rows: u64) {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(job) = jobs.get_mut(job_id) {
            job.progress = JobProgress {
                percentage: if total_rows == 0 {
                    100.0
                } else {
                    (rows_processed as f32 / total_rows as f32 * 100.0).min(100.0)
                },
                rows_processed,
                total_rows,
            };
        }
    }

    pub fn push_error(&self, job_id: &str, error: String) {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(job) = jobs.get_mut(job_id) {
            job.errors.push(error);
        }
    }

    pub fn finish(&self, job_id: &str, state: JobState) {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(job) = jobs.get_mut(job_id) {
            job.state = state;
            job.completed_at = Some(Utc::now());
        }
    }

    pub fn get(&self, job_id: &str) -> Option<SyncJob> {
        self.jobs.lock().unwrap().get(job_id).cloned()
    }

    pub fn list(&self) -> Vec<SyncJob> {
        let mut jobs: Vec<SyncJob> = self.jobs.lock().unwrap().values().cloned().collect();
        jobs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        jobs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_lifecycle() {
        let registry = JobRegistry::new();
        let id = registry.create("retail", Some("products"), "full");

        let job = registry.get(&id).unwrap();
        assert_eq!(job.state, JobState::Running);
        assert_eq!(job.progress.percentage, 0.0);

        registry.update_progress(&id, 50, 200);
        let job = registry.get(&id).unwrap();
        assert_eq!(job.progress.percentage, 25.0);
        assert_eq!(job.progress.rows_processed, 50);

        registry.finish(&id, JobState::Completed);
        let job = registry.get(&id).unwrap();
        assert_eq!(job.state, JobState::Completed);
        assert!(job.completed_at.is_some());
    }

    #[test]
    fn test_progress_with_zero_rows_is_complete() {
        let registry = JobRegistry::new();
        let id = registry.create("retail", None, "incremental");
        registry.update_progress(&id, 0, 0);
        assert_eq!(registry.get(&id).unwrap().progress.percentage, 100.0);
    }

    #[test]
    fn test_list_newest_first() {
        let registry = JobRegistry::new();
        let a = registry.create("s", None, "full");
        let b = registry.create("s", None, "full");
        let listed = registry.list();
        assert_eq!(listed.len(), 2);
        // Ids are distinct even within the same instant
        assert_ne!(a, b);
    }
}
