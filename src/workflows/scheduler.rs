use anyhow::Result;
use chrono::Utc;
use croner::Cron;

use crate::server::AppState;

use super::analysis;

/// Fires the daily analysis workflow on a cron schedule. Manual submissions
/// through the HTTP API use the same driver; this loop just provides the
/// unattended cadence.
pub struct AnalysisSchedule {
    cron: Cron,
}

impl AnalysisSchedule {
    pub fn new(schedule: &str) -> Result<Self> {
        let cron = Cron::new(schedule)
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid cron expression '{}': {}", schedule, e))?;
        Ok(Self { cron })
    }

    pub async fn run_loop(self, state: AppState) {
        tracing::info!("analysis schedule started");

        loop {
            let now = Utc::now();
            let next = match self.cron.find_next_occurrence(&now, false) {
                Ok(next) => next,
                Err(e) => {
                    tracing::error!(error = %e, "failed to compute next analysis occurrence");
                    tokio::time::sleep(std::time::Duration::from_secs(60)).await;
                    continue;
                }
            };

            let duration = (next - now).to_std().unwrap_or(std::time::Duration::from_secs(1));
            tracing::info!(next = %next.format("%Y-%m-%d %H:%M:%S UTC"), "sleeping until next analysis run");
            tokio::time::sleep(duration).await;

            // Guard against premature wake from sleep imprecision
            let now_after = Utc::now();
            if now_after < next {
                let remaining = (next - now_after).to_std().unwrap_or_default();
                tokio::time::sleep(remaining).await;
            }

            state.jobs.sweep_expired().await;
            let job = state.jobs.create(None).await;
            let date = Utc::now().format("%Y-%m-%d").to_string();
            tracing::info!(job_id = %job.id, %date, "scheduled analysis firing");

            // One run at a time; the next fire waits for this one
            analysis::run(state.clone(), job.id, date).await;
        }
    }
}
