use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;

use super::progress;
use super::protocol::{self, EngineEvent, StreamParser};
use crate::config::EngineConfig;

/// Stderr accumulation cap. Diagnostics beyond this are dropped, and what we
/// surface to callers is truncated much harder (see `truncate_diag`).
const STDERR_CAP: usize = 16 * 1024;
const DIAG_SURFACE_LEN: usize = 400;

/// Everything that varies between the chat, analysis and review call sites.
/// The spawn/stream/timeout machinery itself is shared.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub prompt: String,
    pub system_prompt: Option<String>,
    pub resume_session: Option<String>,
    pub timeout: Duration,
}

/// What one engine run observed, regardless of how it ended.
#[derive(Debug, Default)]
pub struct EngineRun {
    pub result_text: Option<String>,
    pub result_subtype: Option<String>,
    pub session_id: Option<String>,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub stderr_tail: String,
}

#[derive(Debug, Error)]
pub enum EngineFailure {
    #[error("the assistant could not be started: {0}")]
    Spawn(std::io::Error),
    #[error("the request timed out after {0}s and was cancelled")]
    Timeout(u64),
    #[error("the assistant reached its turn limit before producing an answer; try a narrower request")]
    TurnLimit,
    #[error("the assistant exited without producing a result: {0}")]
    Runtime(String),
    #[error("the assistant returned no output")]
    Empty,
}

impl EngineRun {
    /// Decide the terminal outcome for this run. A captured result is a
    /// usable best-effort answer even when the process exited non-zero.
    pub fn outcome(&self, budget: Duration) -> Result<String, EngineFailure> {
        if self.timed_out {
            return Err(EngineFailure::Timeout(budget.as_secs()));
        }
        if let Some(text) = &self.result_text {
            if !text.is_empty() {
                return Ok(text.clone());
            }
        }
        if self.exit_code == Some(0) {
            return Ok(self.result_text.clone().unwrap_or_default());
        }
        if self.result_subtype.as_deref() == Some("error_max_turns") {
            return Err(EngineFailure::TurnLimit);
        }
        let diag = truncate_diag(&self.stderr_tail);
        if diag.is_empty() {
            Err(EngineFailure::Empty)
        } else {
            Err(EngineFailure::Runtime(diag))
        }
    }
}

/// Spawns the reasoning engine and drives one run to completion: stream
/// events to the progress sender, capture the last result and session id,
/// enforce the deadline, bound stderr.
pub struct EngineRunner {
    config: EngineConfig,
}

impl EngineRunner {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn build_args(&self, spec: &LaunchSpec) -> Vec<String> {
        let mut args = vec![
            "--print".to_string(),
            "--verbose".to_string(),
            "--output-format".to_string(),
            "stream-json".to_string(),
            "--model".to_string(),
            self.config.model.clone(),
            "--max-turns".to_string(),
            self.config.max_turns.to_string(),
            "--max-budget-usd".to_string(),
            format!("{:.2}", self.config.max_budget_usd),
        ];

        if self.config.allowed_tools.is_empty() {
            args.push("--dangerously-skip-permissions".to_string());
        } else {
            args.push("--allowedTools".to_string());
            args.push(self.config.allowed_tools.join(","));
        }

        if let Some(session) = &spec.resume_session {
            args.push("--resume".to_string());
            args.push(session.clone());
        } else if let Some(sys_prompt) = &spec.system_prompt {
            args.push("--append-system-prompt".to_string());
            args.push(sys_prompt.clone());
        }

        // Prompt travels via argv; stdin stays closed
        args.push(spec.prompt.clone());
        args
    }

    pub async fn run(
        &self,
        spec: &LaunchSpec,
        progress: mpsc::UnboundedSender<String>,
    ) -> Result<EngineRun, EngineFailure> {
        let args = self.build_args(spec);
        let mut cmd = Command::new(&self.config.bin);
        cmd.args(&args).current_dir(&self.config.working_dir);

        tracing::info!(
            model = %self.config.model,
            resume = spec.resume_session.is_some(),
            timeout_secs = spec.timeout.as_secs(),
            "spawning engine"
        );

        run_command(cmd, spec.timeout, progress).await
    }
}

async fn run_command(
    mut cmd: Command,
    budget: Duration,
    progress: mpsc::UnboundedSender<String>,
) -> Result<EngineRun, EngineFailure> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(EngineFailure::Spawn)?;

    let stderr = child.stderr.take().expect("stderr piped");
    let stderr_handle = tokio::spawn(async move {
        let mut tail = String::new();
        let reader = BufReader::new(stderr);
        let mut lines = reader.lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if !line.is_empty() && tail.len() < STDERR_CAP {
                tail.push_str(&line);
                tail.push('\n');
            }
        }
        tail
    });

    let mut stdout = child.stdout.take().expect("stdout piped");
    let mut parser = StreamParser::new();
    let mut run = EngineRun::default();
    let mut chunk = [0u8; 8192];

    let deadline = tokio::time::sleep(budget);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => {
                run.timed_out = true;
                tracing::warn!(budget_secs = budget.as_secs(), "engine run exceeded its budget, terminating");
                let _ = child.start_kill();
                break;
            }
            read = stdout.read(&mut chunk) => match read {
                Ok(0) => break,
                Ok(n) => {
                    for value in parser.push(&chunk[..n]) {
                        apply_record(&value, &mut run, &progress);
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "error reading engine stdout");
                    break;
                }
            }
        }
    }

    // Flush the trailing partial line before deciding anything
    if let Some(value) = parser.finish() {
        apply_record(&value, &mut run, &progress);
    }

    if run.timed_out {
        let _ = child.kill().await;
    } else {
        match child.wait().await {
            Ok(status) => run.exit_code = status.code(),
            Err(e) => tracing::warn!(error = %e, "failed to wait on engine process"),
        }
    }

    run.stderr_tail = stderr_handle.await.unwrap_or_default();

    tracing::info!(
        exit_code = ?run.exit_code,
        timed_out = run.timed_out,
        has_result = run.result_text.is_some(),
        "engine run finished"
    );

    Ok(run)
}

fn apply_record(
    value: &serde_json::Value,
    run: &mut EngineRun,
    sink: &mpsc::UnboundedSender<String>,
) {
    if let Some(sid) = protocol::session_id(value) {
        run.session_id = Some(sid.to_string());
    }
    for event in protocol::decode_line(value) {
        if let Some(line) = progress::project(&event) {
            let _ = sink.send(line);
        }
        if let EngineEvent::Result { text, subtype } = event {
            run.result_text = Some(text);
            run.result_subtype = subtype;
        }
    }
}

fn truncate_diag(s: &str) -> String {
    let trimmed = s.trim();
    if trimmed.chars().count() <= DIAG_SURFACE_LEN {
        return trimmed.to_string();
    }
    trimmed.chars().take(DIAG_SURFACE_LEN).collect()
}
