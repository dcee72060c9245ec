use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

/// Continuity of one logical conversation. The caller-visible id is ours;
/// the engine issues its own resumable id on its first response and we pass
/// it back on later turns.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub logical_id: String,
    pub engine_session_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Process-wide map of logical session id to engine session state. A
/// logical session outlives any individual job.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: Mutex<HashMap<String, SessionState>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_or_create(&self, logical_id: &str) -> SessionState {
        let mut sessions = self.sessions.lock().await;
        sessions
            .entry(logical_id.to_string())
            .or_insert_with(|| SessionState {
                logical_id: logical_id.to_string(),
                engine_session_id: None,
                updated_at: Utc::now(),
            })
            .clone()
    }

    /// Replace the stored engine session id with the most recent one seen.
    /// Never rolled back; overlapping turns on the same logical session are
    /// last-writer-wins.
    pub async fn record_engine_session(&self, logical_id: &str, engine_id: &str) {
        let mut sessions = self.sessions.lock().await;
        let state = sessions
            .entry(logical_id.to_string())
            .or_insert_with(|| SessionState {
                logical_id: logical_id.to_string(),
                engine_session_id: None,
                updated_at: Utc::now(),
            });
        state.engine_session_id = Some(engine_id.to_string());
        state.updated_at = Utc::now();
    }
}
