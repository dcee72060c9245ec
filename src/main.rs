mod backend;
mod config;
mod engine;
mod jobs;
mod server;
mod sessions;
mod workflows;

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::body::Body;
use axum::extract::Request;
use clap::Parser;
use dotenvy::dotenv;
use sentry::integrations::tower::{NewSentryLayer, SentryHttpLayer};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::backend::HttpBackend;
use crate::engine::launcher::EngineRunner;
use crate::jobs::JobStore;
use crate::sessions::SessionStore;
use crate::workflows::scheduler::AnalysisSchedule;

#[derive(Parser)]
#[command(name = "quantdeck-agent", about = "AI-task execution service for the QuantDeck dashboard")]
enum Cli {
    /// Start the HTTP server (default when no subcommand is given)
    #[command(alias = "run")]
    Serve {
        /// Start without the cron-driven analysis schedule
        #[arg(long)]
        no_schedule: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenv().ok();

    let args: Vec<String> = std::env::args().collect();
    let cli = if args.len() <= 1 {
        Cli::Serve { no_schedule: false }
    } else {
        Cli::parse()
    };

    match cli {
        Cli::Serve { no_schedule } => run_server(no_schedule).await,
    }
}

async fn run_server(no_schedule: bool) -> Result<(), Box<dyn Error>> {
    let config = config::Config::from_env();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("quantdeck_agent=info,tower_http=warn,hyper=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_tree::HierarchicalLayer::new(2).with_targets(true).with_bracketed_fields(false))
        .with(sentry::integrations::tracing::layer().event_filter(
            |metadata| match *metadata.level() {
                tracing::Level::ERROR => sentry::integrations::tracing::EventFilter::Event,
                tracing::Level::WARN | tracing::Level::INFO => {
                    sentry::integrations::tracing::EventFilter::Breadcrumb
                }
                _ => sentry::integrations::tracing::EventFilter::Ignore,
            },
        ))
        .init();

    let _guard = sentry::init((
        config.sentry_dsn.clone().unwrap_or_default(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: Some(config.environment.clone().into()),
            send_default_pii: true,
            traces_sample_rate: 0.2,
            enable_logs: true,
            ..Default::default()
        },
    ));

    let http_client = Arc::new(
        reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to build HTTP client")?,
    );

    let backend = Arc::new(HttpBackend::new(
        http_client.clone(),
        config.backend_url.clone(),
        config.backend_token.clone(),
    ));

    let app_state = server::AppState {
        jobs: Arc::new(JobStore::new()),
        sessions: Arc::new(SessionStore::new()),
        backend,
        runner: Arc::new(EngineRunner::new(config.engine.clone())),
        backend_url: config.backend_url.clone(),
        memory_dir: config.memory_dir.clone(),
    };

    match (&config.analysis_schedule, no_schedule) {
        (Some(schedule), false) => {
            let schedule = AnalysisSchedule::new(schedule)
                .context("failed to parse ANALYSIS_SCHEDULE")?;
            tokio::spawn(schedule.run_loop(app_state.clone()));
        }
        (Some(_), true) => {
            tracing::info!("analysis schedule disabled (--no-schedule)");
        }
        (None, _) => {
            tracing::info!("no ANALYSIS_SCHEDULE configured, analysis runs on demand only");
        }
    }

    let app = server::create_app(app_state)
        .layer(SentryHttpLayer::new().enable_transaction())
        .layer(NewSentryLayer::<Request<Body>>::new_from_top());

    let port = config.port;
    let addr = format!("0.0.0.0:{port}");
    let listener = TcpListener::bind(&addr).await?;
    println!("Listening on http://{addr}");
    axum::serve(listener, app).await?;

    Ok(())
}
