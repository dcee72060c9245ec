use std::time::Duration;

use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::mpsc;

use crate::engine::extract;
use crate::engine::launcher::LaunchSpec;
use crate::server::AppState;

use super::memory;

const REVIEW_TIMEOUT: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Clone, Deserialize)]
pub struct ReviewRequest {
    pub review_id: String,
    pub symbol: String,
    pub side: String,
    pub entry_price: f64,
    pub exit_price: f64,
    pub pnl: f64,
    #[serde(default)]
    pub strategy: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Review one closed trade. Fire-and-forget: no job record, every side
/// effect is best-effort, failures are logged and swallowed.
pub async fn run(state: AppState, trade: ReviewRequest) {
    let spec = LaunchSpec {
        prompt: review_prompt(&trade),
        system_prompt: None,
        resume_session: None,
        timeout: REVIEW_TIMEOUT,
    };

    // Progress only gets logged here; there is no job to show it on.
    let (progress, mut progress_rx) = mpsc::unbounded_channel::<String>();
    let review_id = trade.review_id.clone();
    let log_task = tokio::spawn(async move {
        while let Some(line) = progress_rx.recv().await {
            tracing::debug!(review_id = %review_id, progress = %line, "trade review progress");
        }
    });

    let run = state.runner.run(&spec, progress).await;
    let _ = log_task.await;

    let text = match run.and_then(|run| run.outcome(REVIEW_TIMEOUT)) {
        Ok(text) => text,
        Err(failure) => {
            tracing::error!(review_id = %trade.review_id, error = %failure, "trade review run failed");
            return;
        }
    };

    let review = extract::parse_lenient(&text).unwrap_or_else(|| fallback_review(&text));

    let patch = json!({
        "assessment": review["assessment"],
        "grade": review["grade"],
        "lesson": review["lesson"],
        "tags": review["tags"],
    });
    if let Err(e) = state.backend.update_review(&trade.review_id, &patch).await {
        tracing::error!(review_id = %trade.review_id, error = %e, "failed to update review record");
    }

    // A non-empty lesson is worth keeping across sessions
    let lesson = review["lesson"].as_str().unwrap_or("").trim().to_string();
    if lesson.is_empty() {
        return;
    }

    let mut tags: Vec<String> = review["tags"]
        .as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(|t| t.as_str())
                .map(|t| t.to_string())
                .collect()
        })
        .unwrap_or_default();
    tags.push(trade.symbol.to_lowercase());

    match memory::write_note(&state.memory_dir, "trade-lesson", &tags, &lesson) {
        Ok(note_id) => {
            if let Err(e) = state.backend.mark_note_synced(&note_id).await {
                tracing::warn!(note_id = %note_id, error = %e, "failed to mark memory note synced");
            }
        }
        Err(e) => {
            tracing::error!(review_id = %trade.review_id, error = %e, "failed to write memory note");
        }
    }
}

fn fallback_review(raw: &str) -> Value {
    json!({
        "assessment": raw,
        "grade": "C",
        "lesson": "",
        "tags": [],
    })
}

fn review_prompt(trade: &ReviewRequest) -> String {
    format!(
        "Review this closed trade from the QuantDeck journal.\n\
Symbol: {symbol}\n\
Side: {side}\n\
Entry: {entry}\n\
Exit: {exit}\n\
PnL: {pnl}\n\
Strategy: {strategy}\n\
Trader notes: {notes}\n\n\
Judge the execution, not just the outcome: a profitable trade can still be a \
bad trade. Reply with exactly one JSON object shaped as:\n\
{{\n\
  \"assessment\": \"<prose review of the execution>\",\n\
  \"grade\": \"A|B|C|D|F\",\n\
  \"lesson\": \"<one transferable lesson, or an empty string if there is none>\",\n\
  \"tags\": [\"...\"]\n\
}}",
        symbol = trade.symbol,
        side = trade.side,
        entry = trade.entry_price,
        exit = trade.exit_price,
        pnl = trade.pnl,
        strategy = trade.strategy.as_deref().unwrap_or("unspecified"),
        notes = trade.notes.as_deref().unwrap_or("none"),
    )
}
