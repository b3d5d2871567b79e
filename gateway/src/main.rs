mod api;
mod config;

use anyhow::Context;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tower_http::trace::TraceLayer;
use std::sync::Arc;

// Internal imports
use crate::api::CompletionBody;
use crate::config::GatewayConfig;
use levelone_core::llm::OpenAiInvoker;
use levelone_core::{DeadlineExecutor, RequestDispatcher, SchemaRegistry, ShapeResolver};

// 1. Define Application State
// The dispatcher owns every collaborator and is read-only, so one Arc is enough.
#[derive(Clone)]
struct AppState {
    dispatcher: Arc<RequestDispatcher>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 2. Logging Setup
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .compact()
        .init();

    info!("Level One Gateway Initializing...");

    // 3. Load Configuration (.env first, then the process environment)
    if let Err(err) = dotenvy::dotenv() {
        info!("No .env loaded: {}", err);
    }
    let config = GatewayConfig::from_env()?;

    // 4. Load The Schema Registry
    let registry = match &config.schema_registry {
        Some(path) => SchemaRegistry::load(path).await?,
        None => SchemaRegistry::default(),
    };
    info!("{} registered schemas, shape policy {:?}", registry.len(), config.shape_policy);

    // 5. Initialize The Worker Pool
    let executor = DeadlineExecutor::new(config.max_workers);
    info!(
        "Worker pool ready: {} workers, {:?} deadline",
        executor.max_workers(),
        config.deadline
    );

    // 6. Bundle State
    let invoker = OpenAiInvoker::new(&config.openai_api_key, config.openai_api_base.as_deref());
    let dispatcher = RequestDispatcher::new(
        Arc::new(invoker),
        ShapeResolver::new(Arc::new(registry), config.shape_policy),
        executor,
    )
    .with_deadline(config.deadline)
    .with_models(config.models.clone());
    let state = AppState {
        dispatcher: Arc::new(dispatcher),
    };

    // 7. Define Routes
    let app = router(state);

    // 8. Start Server
    let listener = TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;
    info!("Gateway listening on {}...", config.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("Gateway stopped");
    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/level_one/{model}", post(complete))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", err);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}

// --- HANDLERS ---

async fn health_check() -> &'static str {
    "Level One Gateway: Operational"
}

async fn complete(
    State(state): State<AppState>,
    Path(model): Path<String>,
    Json(payload): Json<CompletionBody>,
) -> Response {
    info!("Completion requested on '{}' (response_format: {})", model, payload.response_format);

    let response = state.dispatcher.handle(payload.into_request(model)).await;
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(response.body)).into_response()
}
