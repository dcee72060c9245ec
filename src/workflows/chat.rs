use std::time::Duration;

use crate::engine::launcher::LaunchSpec;
use crate::server::AppState;

use super::job_progress_sink;

/// Interactive turns get a short leash; the UI is waiting.
const CHAT_TIMEOUT: Duration = Duration::from_secs(180);

const CHAT_SYSTEM_PROMPT: &str = "You are the QuantDeck trading assistant. \
You answer questions about the user's strategies, signals, positions and \
recent analysis reports. Be concise and concrete; when you cite a number, \
say where it came from. If you are unsure, say so instead of guessing.";

/// One chat turn: resolve continuity, run the engine, record the engine
/// session id, then settle the job.
pub async fn run(state: AppState, job_id: String, logical_id: String, message: String) {
    let session = state.sessions.get_or_create(&logical_id).await;

    let spec = LaunchSpec {
        prompt: message,
        system_prompt: Some(CHAT_SYSTEM_PROMPT.to_string()),
        resume_session: session.engine_session_id.clone(),
        timeout: CHAT_TIMEOUT,
    };

    let (progress, progress_task) = job_progress_sink(state.jobs.clone(), job_id.clone());
    let run = state.runner.run(&spec, progress).await;
    let _ = progress_task.await;

    match run {
        Err(failure) => {
            tracing::error!(job_id = %job_id, error = %failure, "chat engine run could not start");
            state.jobs.fail(&job_id, failure.to_string()).await;
        }
        Ok(run) => {
            // Record continuity before classifying the outcome: a failed turn
            // that still advanced engine context keeps it for the next turn.
            if let Some(engine_id) = &run.session_id {
                state.sessions.record_engine_session(&logical_id, engine_id).await;
            }

            match run.outcome(CHAT_TIMEOUT) {
                Ok(reply) => {
                    tracing::info!(job_id = %job_id, session = %logical_id, "chat turn completed");
                    state.jobs.complete(&job_id, reply).await;
                }
                Err(failure) => {
                    tracing::warn!(job_id = %job_id, error = %failure, "chat turn failed");
                    state.jobs.fail(&job_id, failure.to_string()).await;
                }
            }
        }
    }
}
