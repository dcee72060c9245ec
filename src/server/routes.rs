use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::NaiveDate;
use hyper::StatusCode;
use serde::Deserialize;
use serde_json::{Value, json};
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use super::AppState;
use crate::workflows;
use crate::workflows::review::ReviewRequest;

pub fn build_router(state: AppState) -> Router {
    let health_routes = Router::new().route(
        "/",
        get(|| async {
            Json(json!({
                "status": "ok",
            }))
        }),
    );

    Router::new()
        .nest("/health", health_routes)
        .route("/api/chat", post(submit_chat))
        .route("/api/analysis", post(submit_analysis))
        .route("/api/reviews/trigger", post(trigger_review))
        .route("/api/jobs/{id}", get(poll_job))
        .fallback(not_found)
        .with_state(state)
        .layer(CorsLayer::permissive())
}

async fn not_found(req: axum::extract::Request) -> impl IntoResponse {
    tracing::warn!("unhandled path: {}", req.uri());
    (StatusCode::NOT_FOUND, "Not Found")
}

// --- Submit ---

#[derive(Deserialize)]
pub struct ChatRequest {
    pub message: String,
    pub session_id: Option<String>,
}

/// POST /api/chat — start a chat turn, return a pollable job handle
async fn submit_chat(
    State(state): State<AppState>,
    Json(body): Json<ChatRequest>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    if body.message.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "message is required" })),
        ));
    }

    state.jobs.sweep_expired().await;

    let logical_id = body
        .session_id
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let job = state.jobs.create(Some(logical_id.clone())).await;

    tracing::info!(job_id = %job.id, session = %logical_id, "chat job submitted");
    tokio::spawn(workflows::chat::run(
        state.clone(),
        job.id.clone(),
        logical_id.clone(),
        body.message,
    ));

    Ok(Json(json!({
        "jobId": job.id,
        "sessionId": logical_id,
        "status": "processing",
    })))
}

#[derive(Deserialize)]
pub struct AnalysisRequest {
    pub date: Option<String>,
}

/// POST /api/analysis — start a one-shot analysis run for a trading date
async fn submit_analysis(
    State(state): State<AppState>,
    Json(body): Json<AnalysisRequest>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let date = match body.date {
        Some(date) => {
            if NaiveDate::parse_from_str(&date, "%Y-%m-%d").is_err() {
                return Err((
                    StatusCode::BAD_REQUEST,
                    Json(json!({ "error": "date must be YYYY-MM-DD" })),
                ));
            }
            date
        }
        None => chrono::Utc::now().format("%Y-%m-%d").to_string(),
    };

    state.jobs.sweep_expired().await;
    let job = state.jobs.create(None).await;

    tracing::info!(job_id = %job.id, %date, "analysis job submitted");
    tokio::spawn(workflows::analysis::run(state.clone(), job.id.clone(), date));

    Ok(Json(json!({
        "jobId": job.id,
        "status": "processing",
    })))
}

/// POST /api/reviews/trigger — fire-and-forget trade review
async fn trigger_review(
    State(state): State<AppState>,
    Json(body): Json<ReviewRequest>,
) -> Result<(StatusCode, Json<Value>), (StatusCode, Json<Value>)> {
    if body.review_id.trim().is_empty() || body.symbol.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "review_id and symbol are required" })),
        ));
    }

    tracing::info!(review_id = %body.review_id, symbol = %body.symbol, "trade review triggered");
    tokio::spawn(workflows::review::run(state.clone(), body));

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "status": "accepted" })),
    ))
}

// --- Poll ---

/// GET /api/jobs/{id} — poll a job; unknown ids are a 404, not a status
async fn poll_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let job = state.jobs.get(&id).await.ok_or_else(|| {
        (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "job not found" })),
        )
    })?;

    Ok(Json(json!({
        "status": job.status,
        "progress": job.progress,
        "content": job.content,
        "errorMessage": job.error_message,
        "sessionId": job.session_id,
    })))
}
