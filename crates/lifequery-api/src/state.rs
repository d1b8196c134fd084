//! Shared application state.

use std::sync::Arc;

use tokio::sync::RwLock;

use lifequery_core::{EmbeddingBackend, MessageSource, Settings};
use lifequery_db::Database;
use lifequery_inference::EmbeddingClient;
use lifequery_ingest::IngestPipeline;
use lifequery_rag::ChatOrchestrator;
use lifequery_tasks::TaskManager;
use lifequery_vector::VectorStore;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub vectors: VectorStore,
    /// Concrete embedding client (kept for `reset` on settings changes).
    pub embedder: Arc<EmbeddingClient>,
    pub source: Arc<dyn MessageSource>,
    pub pipeline: IngestPipeline,
    pub orchestrator: ChatOrchestrator,
    pub tasks: TaskManager,
    /// Settings snapshot; operations clone it at start and never observe
    /// mid-run changes.
    pub settings: Arc<RwLock<Settings>>,
}

impl AppState {
    pub async fn build(
        db: Database,
        vectors: VectorStore,
        source: Arc<dyn MessageSource>,
    ) -> lifequery_core::Result<Self> {
        let settings = db.config.load_settings().await?;
        let embedder = Arc::new(EmbeddingClient::new(&settings));
        let embedder_backend: Arc<dyn EmbeddingBackend> = embedder.clone();

        let pipeline = IngestPipeline::new(
            db.clone(),
            vectors.clone(),
            embedder_backend.clone(),
            source.clone(),
        );
        let orchestrator =
            ChatOrchestrator::new(db.clone(), vectors.clone(), embedder_backend);

        Ok(Self {
            db,
            vectors,
            embedder,
            source,
            pipeline,
            orchestrator,
            tasks: TaskManager::new(),
            settings: Arc::new(RwLock::new(settings)),
        })
    }

    /// Current settings snapshot.
    pub async fn settings(&self) -> Settings {
        self.settings.read().await.clone()
    }

    /// Reload the shared snapshot from the database after a write.
    pub async fn reload_settings(&self) -> lifequery_core::Result<Settings> {
        let fresh = self.db.config.load_settings().await?;
        *self.settings.write().await = fresh.clone();
        Ok(fresh)
    }
}
