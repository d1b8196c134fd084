//! lifequery-api — HTTP and SSE gateway for the LifeQuery memory engine.

mod auth;
mod error;
mod handlers;
mod sse;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::State;
use axum::http::Method;
use axum::routing::{get, post, put};
use axum::{middleware, Json, Router};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lifequery_core::defaults::SERVER_PORT;
use lifequery_core::{DisconnectedSource, MessageSource};
use lifequery_db::Database;
use lifequery_tasks::spawn_auto_sync;
use lifequery_vector::VectorStore;

use state::AppState;

/// Resolve the data directory: `DATA_DIR` env var, falling back to `./data`.
fn data_dir() -> PathBuf {
    std::env::var("DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("data"))
}

/// `GET /api/health`
async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let db_ok = state.db.ping().await.is_ok();
    Json(json!({
        "status": if db_ok { "ok" } else { "degraded" },
        "database": if db_ok { "connected" } else { "error" },
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Build the full router over the application state.
fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(Any);

    let protected = Router::new()
        .route(
            "/api/settings",
            get(handlers::settings::get_settings).post(handlers::settings::update_settings),
        )
        .route("/api/providers", get(handlers::settings::get_providers))
        .route("/api/models", get(handlers::models::get_models))
        .route("/api/telegram/status", get(handlers::source::status))
        .route("/api/telegram/auth/start", post(handlers::source::auth_start))
        .route("/api/telegram/auth/verify", post(handlers::source::auth_verify))
        .route("/api/telegram/disconnect", post(handlers::source::disconnect))
        .route("/api/stats", get(handlers::data::get_stats))
        .route("/api/pending-stats", get(handlers::data::get_pending_stats))
        .route("/api/sync", post(handlers::data::start_sync))
        .route("/api/sync/cancel", post(handlers::data::cancel_sync))
        .route("/api/sync/logs", get(handlers::data::get_sync_logs))
        .route("/api/process", post(handlers::data::start_process))
        .route("/api/reindex", post(handlers::data::start_reindex))
        .route("/api/import", post(handlers::data::start_import))
        .route("/api/import/path", post(handlers::data::start_import_path))
        .route("/api/chats", get(handlers::chats::list_chats))
        .route(
            "/api/chats/{id}",
            put(handlers::chats::update_chat).delete(handlers::chats::delete_chat),
        )
        .route("/api/chats/sync", post(handlers::chats::sync_chats))
        .route("/api/chat", post(handlers::chat::chat))
        .route("/v1/chat/completions", post(handlers::openai_compat::chat_completions))
        .route("/v1/completions", post(handlers::openai_compat::legacy_completions))
        .route("/v1/models", get(handlers::openai_compat::list_models))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_api_key,
        ));

    Router::new()
        .route("/api/health", get(health))
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lifequery=info,tower_http=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting LifeQuery backend...");

    let data_dir = data_dir();
    let db = match Database::connect(&data_dir.join("data.db")).await {
        Ok(db) => db,
        Err(e) => {
            error!(error = %e, "Failed to open database");
            std::process::exit(1);
        }
    };
    let vectors = match VectorStore::open(&data_dir).await {
        Ok(vectors) => vectors,
        Err(e) => {
            error!(error = %e, "Failed to open vector store");
            std::process::exit(1);
        }
    };

    // The source provider adapter is plugged in deployment-specifically;
    // the default build ships without one, so sync is refused while imports
    // and chat keep working.
    let source: Arc<dyn MessageSource> = Arc::new(DisconnectedSource);

    let state = match AppState::build(db.clone(), vectors, source.clone()).await {
        Ok(state) => state,
        Err(e) => {
            error!(error = %e, "Failed to initialize application state");
            std::process::exit(1);
        }
    };

    match db.stats().await {
        Ok(stats) => info!(
            chats = stats.chat_count,
            messages = stats.message_count,
            chunks = stats.chunk_count,
            "Database connected"
        ),
        Err(e) => error!(error = %e, "Could not read startup stats"),
    }

    let _scheduler = spawn_auto_sync(
        db,
        state.pipeline.clone(),
        source,
        state.tasks.clone(),
    );

    let port = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(SERVER_PORT);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "LifeQuery backend listening");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(error = %e, "Failed to bind listener");
            std::process::exit(1);
        }
    };
    if let Err(e) = axum::serve(listener, router(state)).await {
        error!(error = %e, "Server exited with error");
    }
}
