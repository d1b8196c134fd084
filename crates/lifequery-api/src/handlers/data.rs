//! Data-management endpoints: stats, sync, process, reindex, import, and
//! the operation log.

use axum::extract::{Query, State};
use axum::response::Response;
use axum::Json;
use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use tokio::sync::mpsc;
use tracing::error;

use lifequery_core::defaults::LOG_PAGE_LIMIT;
use lifequery_core::{
    CancelToken, Error, IngestCounts, OperationKind, PendingStats, PipelineEvent, Result, Settings,
    Stats,
};
use lifequery_ingest::IngestPipeline;

use crate::error::ApiResult;
use crate::sse::{pipeline_stream, sse_response};
use crate::state::AppState;

/// `GET /api/stats`
pub async fn get_stats(State(state): State<AppState>) -> ApiResult<Json<Stats>> {
    Ok(Json(state.db.stats().await?))
}

/// `GET /api/pending-stats`
pub async fn get_pending_stats(State(state): State<AppState>) -> ApiResult<Json<PendingStats>> {
    Ok(Json(state.db.pending_stats().await?))
}

type OperationFuture = BoxFuture<'static, Result<IngestCounts>>;

/// Admit a single-flight operation, spawn it, and stream its progress.
///
/// The pipeline keeps running if the client disconnects; the operation log
/// entry is closed with the real outcome either way.
async fn run_operation<F>(state: AppState, kind: OperationKind, op: F) -> ApiResult<Response>
where
    F: FnOnce(IngestPipeline, Settings, CancelToken, mpsc::Sender<PipelineEvent>) -> OperationFuture
        + Send
        + 'static,
{
    let handle = state.tasks.begin(kind, &state.db.log).await?;
    let settings = state.settings().await;
    let (tx, rx) = mpsc::channel(256);

    let pipeline = state.pipeline.clone();
    let log = state.db.log.clone();
    tokio::spawn(async move {
        let cancel = handle.cancel_token();
        let outcome = op(pipeline, settings, cancel, tx.clone()).await;
        match &outcome {
            Ok(counts) => {
                let _ = tx.send(PipelineEvent::Done(*counts)).await;
            }
            Err(e) => {
                let _ = tx
                    .send(PipelineEvent::Error {
                        message: e.to_string(),
                    })
                    .await;
            }
        }
        if let Err(e) = handle.finish(&log, &outcome).await {
            error!(error = %e, op = %kind, "Failed to close operation log entry");
        }
    });

    Ok(sse_response(pipeline_stream(rx)))
}

/// `POST /api/sync` — full source sync; SSE progress.
pub async fn start_sync(State(state): State<AppState>) -> ApiResult<Response> {
    run_operation(state, OperationKind::Sync, |pipeline, settings, cancel, tx| {
        Box::pin(async move { pipeline.sync(&settings, cancel, tx).await })
    })
    .await
}

/// `POST /api/sync/cancel` — signal the running sync to stop.
pub async fn cancel_sync(State(state): State<AppState>) -> Json<JsonValue> {
    let signalled = state.tasks.cancel(OperationKind::Sync);
    Json(json!({ "ok": true, "signalled": signalled }))
}

/// `POST /api/process` — chunk and embed pending data without a sync.
pub async fn start_process(State(state): State<AppState>) -> ApiResult<Response> {
    run_operation(
        state,
        OperationKind::Process,
        |pipeline, settings, cancel, tx| {
            Box::pin(async move { pipeline.process(&settings, cancel, tx).await })
        },
    )
    .await
}

#[derive(Debug, Deserialize)]
pub struct ReindexRequest {
    #[serde(default)]
    pub confirm: bool,
}

/// `POST /api/reindex` — re-embed everything into a fresh collection.
/// Requires explicit confirmation.
pub async fn start_reindex(
    State(state): State<AppState>,
    Json(request): Json<ReindexRequest>,
) -> ApiResult<Response> {
    if !request.confirm {
        return Err(Error::InvalidInput(
            "Confirmation required. Set 'confirm': true in the request body.".to_string(),
        )
        .into());
    }
    run_operation(
        state,
        OperationKind::Reindex,
        |pipeline, settings, cancel, tx| {
            Box::pin(async move { pipeline.reindex(&settings, cancel, tx).await })
        },
    )
    .await
}

/// `POST /api/import` — the request body is the export JSON itself; it is
/// spooled to a temp file and ingested from there.
pub async fn start_import(State(state): State<AppState>, body: String) -> ApiResult<Response> {
    if body.trim().is_empty() {
        return Err(Error::InvalidInput("Empty import body".to_string()).into());
    }
    let file = tempfile::NamedTempFile::new().map_err(Error::Io)?;
    std::fs::write(file.path(), &body).map_err(Error::Io)?;

    run_operation(state, OperationKind::Import, move |pipeline, _settings, cancel, tx| {
        Box::pin(async move {
            // The temp file lives until the import finishes.
            let result = pipeline.import(file.path(), None, cancel, tx).await;
            drop(file);
            result
        })
    })
    .await
}

#[derive(Debug, Deserialize)]
pub struct ImportPathRequest {
    pub path: String,
    #[serde(default)]
    pub username: Option<String>,
}

/// `POST /api/import/path` — import an export file already on the server's
/// filesystem, bypassing upload limits.
pub async fn start_import_path(
    State(state): State<AppState>,
    Json(request): Json<ImportPathRequest>,
) -> ApiResult<Response> {
    let path = std::path::PathBuf::from(&request.path);
    if !path.exists() {
        return Err(Error::NotFound(format!("File not found: {}", request.path)).into());
    }
    if !request.path.to_lowercase().ends_with(".json") {
        return Err(Error::InvalidInput("Only JSON files are supported".to_string()).into());
    }

    let username = request.username;
    run_operation(state, OperationKind::Import, move |pipeline, _settings, cancel, tx| {
        Box::pin(async move {
            pipeline
                .import(&path, username.as_deref(), cancel, tx)
                .await
        })
    })
    .await
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub limit: Option<i64>,
}

/// `GET /api/sync/logs?limit=N`
pub async fn get_sync_logs(
    State(state): State<AppState>,
    Query(query): Query<LogsQuery>,
) -> ApiResult<Json<JsonValue>> {
    let limit = query.limit.unwrap_or(LOG_PAGE_LIMIT).clamp(1, 500);
    let logs = state.db.log.tail(limit).await?;
    Ok(Json(json!({ "logs": logs })))
}
