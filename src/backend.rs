use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;

/// The computational backend that owns persisted artifacts. Behind a trait
/// so workflow tests can substitute a recording fake.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Persist a finished analysis report; returns the assigned record id.
    async fn save_report(&self, report: &Value) -> Result<String>;

    /// Apply a partial update to a trade review record.
    async fn update_review(&self, review_id: &str, patch: &Value) -> Result<()>;

    /// Flag a memory note as synced after its file has been written.
    async fn mark_note_synced(&self, note_id: &str) -> Result<()>;
}

pub struct HttpBackend {
    http_client: Arc<reqwest::Client>,
    base_url: String,
    token: Option<String>,
}

impl HttpBackend {
    pub fn new(http_client: Arc<reqwest::Client>, base_url: String, token: Option<String>) -> Self {
        Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        }
    }

    fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => req.header("Authorization", format!("Bearer {token}")),
            None => req,
        }
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn save_report(&self, report: &Value) -> Result<String> {
        let response = self
            .authed(self.http_client.post(format!("{}/api/analysis-reports", self.base_url)))
            .json(report)
            .send()
            .await
            .context("failed to reach backend to save report")?;

        let status = response.status();
        let body: Value = response
            .json()
            .await
            .context("failed to parse backend save-report response")?;

        if !status.is_success() {
            let msg = body["error"].as_str().unwrap_or("unknown error");
            anyhow::bail!("backend returned {status} saving report: {msg}");
        }

        let id = body["id"]
            .as_str()
            .context("backend save-report response missing id")?;
        Ok(id.to_string())
    }

    async fn update_review(&self, review_id: &str, patch: &Value) -> Result<()> {
        let response = self
            .authed(
                self.http_client
                    .patch(format!("{}/api/trade-reviews/{review_id}", self.base_url)),
            )
            .json(patch)
            .send()
            .await
            .context("failed to reach backend to update review")?;

        if !response.status().is_success() {
            anyhow::bail!("backend returned {} updating review {review_id}", response.status());
        }
        Ok(())
    }

    async fn mark_note_synced(&self, note_id: &str) -> Result<()> {
        let response = self
            .authed(
                self.http_client
                    .post(format!("{}/api/memory-notes/{note_id}/synced", self.base_url)),
            )
            .send()
            .await
            .context("failed to reach backend to mark note synced")?;

        if !response.status().is_success() {
            anyhow::bail!("backend returned {} marking note {note_id} synced", response.status());
        }
        Ok(())
    }
}
