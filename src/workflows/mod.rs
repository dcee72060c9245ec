pub mod analysis;
pub mod chat;
pub mod memory;
pub mod review;
pub mod scheduler;

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::jobs::JobStore;

/// Bridge the launcher's progress stream into a job record. The returned
/// task drains until the runner drops its sender.
pub(crate) fn job_progress_sink(
    jobs: Arc<JobStore>,
    job_id: String,
) -> (mpsc::UnboundedSender<String>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let handle = tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            jobs.set_progress(&job_id, &line).await;
        }
    });
    (tx, handle)
}
