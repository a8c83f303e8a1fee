//! Application state wiring the memory engine to its adapters.
//!
//! Optional collaborators (embedder, vector index, extraction model) are
//! left out when unconfigured or unavailable; the engine degrades instead.

use std::path::PathBuf;
use std::sync::Arc;

use mnemo_core::llm::box_provider::BoxLlmProvider;
use mnemo_core::memory::box_embedder::BoxEmbedder;
use mnemo_core::memory::box_vector::BoxVectorIndex;
use mnemo_core::memory::engine::{EngineComponents, MemoryEngine};
use mnemo_infra::config::{data_dir, load_config, vector_index_path};
use mnemo_infra::embedding::http::HttpEmbedder;
use mnemo_infra::llm::openai_compat::OpenAiCompatibleProvider;
use mnemo_infra::sqlite::memory::SqliteMemoryRepository;
use mnemo_infra::sqlite::pending::SqlitePendingCache;
use mnemo_infra::sqlite::pool::{DatabasePool, database_url};
use mnemo_infra::vector::lance::LanceVectorIndex;
use mnemo_types::config::MemoryConfig;

/// The engine pinned to the SQLite adapters.
pub type ConcreteEngine = MemoryEngine<SqliteMemoryRepository, SqlitePendingCache>;

pub struct AppState {
    pub engine: Arc<ConcreteEngine>,
    pub config: MemoryConfig,
    pub data_dir: PathBuf,
}

impl AppState {
    /// Initialize the application state: load config, open stores, start
    /// the engine.
    pub async fn init() -> anyhow::Result<Self> {
        let data_dir = data_dir();
        tokio::fs::create_dir_all(&data_dir).await?;

        let config = load_config(&data_dir).await;
        let db_pool = DatabasePool::new(&database_url(&data_dir)).await?;

        let embedder = if config.embedding.is_configured() {
            match HttpEmbedder::new(&config.embedding) {
                Ok(embedder) => {
                    let embedder = BoxEmbedder::new(embedder);
                    tracing::debug!(
                        model = embedder.model_name(),
                        dimension = embedder.dimension(),
                        "embedding provider ready"
                    );
                    Some(embedder)
                }
                Err(e) => {
                    tracing::warn!(error = %e, "embedding provider unavailable");
                    None
                }
            }
        } else {
            tracing::info!("embedding provider not configured; retrieval is unranked");
            None
        };

        let vector_index = if config.vector_index.enabled && embedder.is_some() {
            let path = vector_index_path(&data_dir, &config);
            match LanceVectorIndex::open(&path, &config.vector_index).await {
                Ok(index) => Some(BoxVectorIndex::new(index)),
                Err(e) => {
                    tracing::warn!(error = %e, "vector index unavailable; using in-process scan");
                    None
                }
            }
        } else {
            None
        };

        let llm = OpenAiCompatibleProvider::from_config(&config.extraction).map(BoxLlmProvider::new);

        let engine = MemoryEngine::start(
            EngineComponents {
                repository: Arc::new(SqliteMemoryRepository::new(db_pool.clone())),
                cache: Arc::new(SqlitePendingCache::new(db_pool)),
                embedder,
                vector_index,
                llm,
            },
            &config,
        );

        Ok(Self {
            engine: Arc::new(engine),
            config,
            data_dir,
        })
    }

    /// Stop background work, letting queued extractions finish.
    pub async fn shutdown(&self) {
        self.engine.shutdown().await;
    }
}
