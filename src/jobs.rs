use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Finished or failed jobs linger this long so the UI can poll them, then
/// the next submission sweeps them away.
const JOB_TTL_MINUTES: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Processing,
    Completed,
    Error,
}

/// One tracked asynchronous unit of work. Terminal once `status` leaves
/// `Processing`; after that only the TTL sweep touches it.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub status: JobStatus,
    pub progress: String,
    pub content: String,
    pub error_message: Option<String>,
    pub session_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Process-wide job registry. Constructed once in `main` and shared through
/// the application state; all mutation goes through these methods so the
/// terminal-once invariant lives in exactly one place.
#[derive(Debug, Default)]
pub struct JobStore {
    jobs: Mutex<HashMap<String, Job>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create(&self, session_id: Option<String>) -> Job {
        let job = Job {
            id: Uuid::new_v4().to_string(),
            status: JobStatus::Processing,
            progress: String::new(),
            content: String::new(),
            error_message: None,
            session_id,
            created_at: Utc::now(),
        };
        self.jobs.lock().await.insert(job.id.clone(), job.clone());
        job
    }

    pub async fn get(&self, id: &str) -> Option<Job> {
        self.jobs.lock().await.get(id).cloned()
    }

    /// Update the in-flight progress line. Silently ignored once terminal —
    /// a late event from a raced stream must not resurrect the field.
    pub async fn set_progress(&self, id: &str, line: &str) {
        let mut jobs = self.jobs.lock().await;
        if let Some(job) = jobs.get_mut(id) {
            if job.status == JobStatus::Processing {
                job.progress = line.to_string();
            }
        }
    }

    pub async fn complete(&self, id: &str, content: String) {
        self.finish(id, JobStatus::Completed, content, None).await;
    }

    pub async fn fail(&self, id: &str, message: String) {
        self.finish(id, JobStatus::Error, String::new(), Some(message)).await;
    }

    /// Exactly one of the timeout and close paths wins the terminal write;
    /// the status check here is the guard.
    async fn finish(&self, id: &str, status: JobStatus, content: String, error: Option<String>) {
        let mut jobs = self.jobs.lock().await;
        let Some(job) = jobs.get_mut(id) else {
            return;
        };
        if job.status != JobStatus::Processing {
            return;
        }
        job.status = status;
        job.content = content;
        job.error_message = error;
        job.progress.clear();
    }

    /// Drop every job older than the TTL, terminal or not. Runs at the start
    /// of each submission rather than on a timer, so memory is bounded by
    /// request volume.
    pub async fn sweep_expired(&self) {
        let cutoff = Utc::now() - Duration::minutes(JOB_TTL_MINUTES);
        let mut jobs = self.jobs.lock().await;
        let before = jobs.len();
        jobs.retain(|_, job| job.created_at > cutoff);
        let swept = before - jobs.len();
        if swept > 0 {
            tracing::debug!(swept, remaining = jobs.len(), "swept expired jobs");
        }
    }

    #[cfg(test)]
    pub async fn count(&self) -> usize {
        self.jobs.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_starts_processing() {
        let store = JobStore::new();
        let job = store.create(Some("s1".to_string())).await;
        assert_eq!(job.status, JobStatus::Processing);
        assert!(job.content.is_empty());
        assert!(job.error_message.is_none());
        assert_eq!(job.session_id.as_deref(), Some("s1"));

        let fetched = store.get(&job.id).await.unwrap();
        assert_eq!(fetched.status, JobStatus::Processing);
    }

    #[tokio::test]
    async fn test_unknown_id_is_not_found() {
        let store = JobStore::new();
        assert!(store.get("nope").await.is_none());
    }

    #[tokio::test]
    async fn test_progress_updates_while_processing() {
        let store = JobStore::new();
        let job = store.create(None).await;
        store.set_progress(&job.id, "Searching...").await;
        assert_eq!(store.get(&job.id).await.unwrap().progress, "Searching...");
    }

    #[tokio::test]
    async fn test_terminal_clears_progress() {
        let store = JobStore::new();
        let job = store.create(None).await;
        store.set_progress(&job.id, "Generating a reply...").await;
        store.complete(&job.id, "the answer".to_string()).await;

        let done = store.get(&job.id).await.unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.content, "the answer");
        assert!(done.progress.is_empty());
    }

    #[tokio::test]
    async fn test_terminal_state_is_immutable() {
        let store = JobStore::new();
        let job = store.create(None).await;
        store.fail(&job.id, "timed out".to_string()).await;

        // A raced close handler must not overwrite the timeout verdict
        store.complete(&job.id, "late result".to_string()).await;
        store.set_progress(&job.id, "still going?").await;

        let first = store.get(&job.id).await.unwrap();
        let second = store.get(&job.id).await.unwrap();
        assert_eq!(first.status, JobStatus::Error);
        assert_eq!(second.status, JobStatus::Error);
        assert_eq!(first.error_message.as_deref(), Some("timed out"));
        assert!(first.content.is_empty());
        assert!(first.progress.is_empty());
    }

    #[tokio::test]
    async fn test_sweep_removes_expired_regardless_of_status() {
        let store = JobStore::new();
        let old_done = store.create(None).await;
        store.complete(&old_done.id, "done".to_string()).await;
        let old_running = store.create(None).await;
        let fresh = store.create(None).await;

        {
            let mut jobs = store.jobs.lock().await;
            let stale = Utc::now() - Duration::minutes(JOB_TTL_MINUTES + 5);
            jobs.get_mut(&old_done.id).unwrap().created_at = stale;
            jobs.get_mut(&old_running.id).unwrap().created_at = stale;
        }

        store.sweep_expired().await;
        assert_eq!(store.count().await, 1);
        assert!(store.get(&fresh.id).await.is_some());
        assert!(store.get(&old_done.id).await.is_none());
        assert!(store.get(&old_running.id).await.is_none());
    }
}
