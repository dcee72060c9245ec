use std::time::Duration;

use serde_json::{Value, json};

use crate::engine::extract;
use crate::engine::launcher::LaunchSpec;
use crate::server::AppState;

use super::job_progress_sink;

/// The daily analysis walks the whole pipeline with tool calls; give it room.
const ANALYSIS_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// One-shot directive analysis run for a trading date. On success the job's
/// content is the id the backend assigned to the persisted report, not the
/// raw engine text.
pub async fn run(state: AppState, job_id: String, date: String) {
    let spec = LaunchSpec {
        prompt: directive_prompt(&state.backend_url, &date),
        system_prompt: None,
        resume_session: None,
        timeout: ANALYSIS_TIMEOUT,
    };

    let (progress, progress_task) = job_progress_sink(state.jobs.clone(), job_id.clone());
    let run = state.runner.run(&spec, progress).await;
    let _ = progress_task.await;

    let text = match run {
        Err(failure) => {
            tracing::error!(job_id = %job_id, error = %failure, "analysis engine run could not start");
            state.jobs.fail(&job_id, failure.to_string()).await;
            return;
        }
        Ok(run) => match run.outcome(ANALYSIS_TIMEOUT) {
            Ok(text) => text,
            Err(failure) => {
                tracing::warn!(job_id = %job_id, %date, error = %failure, "analysis run failed");
                state.jobs.fail(&job_id, failure.to_string()).await;
                return;
            }
        },
    };

    let mut report = extract::parse_lenient(&text).unwrap_or_else(|| fallback_report(&text));
    report["date"] = json!(date);

    match state.backend.save_report(&report).await {
        Ok(report_id) => {
            tracing::info!(job_id = %job_id, %date, %report_id, "analysis report persisted");
            state.jobs.complete(&job_id, report_id).await;
        }
        Err(e) => {
            // The engine run succeeded but its output is lost to the caller;
            // no retry, the next scheduled run produces a fresh report.
            tracing::error!(job_id = %job_id, %date, error = %e, "failed to persist analysis report");
            state.jobs.fail(&job_id, format!("analysis finished but saving the report failed: {e}")).await;
        }
    }
}

/// When even the repaired parse fails, the whole reply becomes the summary
/// and every other field takes its default. The caller always gets a report.
fn fallback_report(raw: &str) -> Value {
    json!({
        "market_summary": raw,
        "signals": [],
        "parameters": {},
        "commentary": "",
        "risk_notes": "",
        "confidence": "low",
    })
}

fn directive_prompt(backend_url: &str, date: &str) -> String {
    format!(
        "Run the daily QuantDeck market analysis for {date}. Work through these \
steps in order, using your tools for every fetch:\n\
1. Fetch the latest market snapshot for the watchlist from {backend_url}/api/market/snapshot.\n\
2. Fetch the three most recent analysis reports from {backend_url}/api/analysis-reports/recent for context.\n\
3. Select strategy parameters (lookback window, risk per trade) appropriate to current volatility.\n\
4. Generate entry/exit signals for each watchlist symbol with a conviction between 0 and 1 and a one-sentence rationale.\n\
5. Cross-check every signal against the snapshot from step 1; drop any signal you cannot justify from the data.\n\
6. Reply with exactly one JSON object and nothing else, shaped as:\n\
{{\n\
  \"market_summary\": \"<prose overview of the session>\",\n\
  \"signals\": [{{\"symbol\": \"...\", \"direction\": \"long|short|flat\", \"conviction\": 0.0, \"rationale\": \"...\"}}],\n\
  \"parameters\": {{\"lookback_days\": 0, \"risk_per_trade\": 0.0}},\n\
  \"commentary\": \"<prose on positioning>\",\n\
  \"risk_notes\": \"<prose on what could invalidate the signals>\",\n\
  \"confidence\": \"low|medium|high\"\n\
}}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::jobs::JobStatus;
    use crate::workflows::chat::tests::{RecordingBackend, fake_engine, test_state};

    #[tokio::test]
    async fn test_completed_run_persists_report_and_stores_id() {
        let dir = tempfile::tempdir().unwrap();
        let bin = fake_engine(
            dir.path(),
            r#"echo '{"type":"result","result":"{\"market_summary\":\"quiet\",\"signals\":[],\"confidence\":\"medium\"}"}'"#,
        );
        let backend = Arc::new(RecordingBackend::default());
        let state = test_state(dir.path(), bin, backend.clone());

        let job = state.jobs.create(None).await;
        run(state.clone(), job.id.clone(), "2026-08-06".to_string()).await;

        let done = state.jobs.get(&job.id).await.unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.content, "report-42");

        let saved = backend.saved_reports.lock().await;
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0]["market_summary"], "quiet");
        assert_eq!(saved[0]["date"], "2026-08-06");
    }

    #[tokio::test]
    async fn test_unparseable_result_still_persists_wrapped_report() {
        let dir = tempfile::tempdir().unwrap();
        let bin = fake_engine(
            dir.path(),
            r#"echo '{"type":"result","result":"markets were closed today, nothing to do"}'"#,
        );
        let backend = Arc::new(RecordingBackend::default());
        let state = test_state(dir.path(), bin, backend.clone());

        let job = state.jobs.create(None).await;
        run(state.clone(), job.id.clone(), "2026-08-06".to_string()).await;

        assert_eq!(state.jobs.get(&job.id).await.unwrap().status, JobStatus::Completed);
        let saved = backend.saved_reports.lock().await;
        assert_eq!(saved[0]["market_summary"], "markets were closed today, nothing to do");
        assert_eq!(saved[0]["confidence"], "low");
    }

    #[tokio::test]
    async fn test_persistence_failure_fails_the_job() {
        let dir = tempfile::tempdir().unwrap();
        let bin = fake_engine(
            dir.path(),
            r#"echo '{"type":"result","result":"{\"market_summary\":\"fine\"}"}'"#,
        );
        let backend = Arc::new(RecordingBackend { fail_saves: true, ..Default::default() });
        let state = test_state(dir.path(), bin, backend);

        let job = state.jobs.create(None).await;
        run(state.clone(), job.id.clone(), "2026-08-06".to_string()).await;

        let failed = state.jobs.get(&job.id).await.unwrap();
        assert_eq!(failed.status, JobStatus::Error);
        assert!(failed.error_message.unwrap().contains("saving the report failed"));
    }

    #[test]
    fn test_fallback_report_wraps_raw_text() {
        let report = fallback_report("markets were closed, nothing to analyze");
        assert_eq!(report["market_summary"], "markets were closed, nothing to analyze");
        assert_eq!(report["confidence"], "low");
        assert!(report["signals"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_directive_prompt_mentions_every_step() {
        let prompt = directive_prompt("http://localhost:8000", "2026-08-06");
        assert!(prompt.contains("2026-08-06"));
        assert!(prompt.contains("http://localhost:8000/api/market/snapshot"));
        assert!(prompt.contains("Cross-check"));
        assert!(prompt.contains("exactly one JSON object"));
    }
}
