pub mod routes;

use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;

use crate::backend::Backend;
use crate::engine::launcher::EngineRunner;
use crate::jobs::JobStore;
use crate::sessions::SessionStore;

#[derive(Clone)]
pub struct AppState {
    pub jobs: Arc<JobStore>,
    pub sessions: Arc<SessionStore>,
    pub backend: Arc<dyn Backend>,
    pub runner: Arc<EngineRunner>,
    pub backend_url: String,
    pub memory_dir: PathBuf,
}

pub fn create_app(state: AppState) -> Router {
    routes::build_router(state)
}
