use crate::catalog::{CatalogProvider, FileCatalog, StaticCatalog};
use crate::config::{Config, EmbedderKind};
use crate::embedding::{BiEncoderEmbedder, Embedder, HashingEmbedder};
use crate::error::{AppError, Result};
use crate::index::{IndexParams, ToolIndex};
use crate::manager::ToolManager;
use crate::retrieval::Retriever;
use crate::seed;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Semaphore, SemaphorePermit};

/// Application state shared across all request handlers.
///
/// Everything is constructed here and passed down explicitly; there are no
/// process-wide singletons.
pub struct AppState {
    pub config: Arc<Config>,
    pub index: Arc<ToolIndex>,
    pub retriever: Arc<Retriever>,
    pub manager: Arc<ToolManager>,
    pub semaphore: Arc<Semaphore>,
    /// Set once the index is loaded and the embedder has warmed up
    pub ready: AtomicBool,
}

impl AppState {
    /// Initialize application state from configuration.
    ///
    /// # Semaphore Strategy
    /// Permits default to CPU cores. Each search acquires one permit, so no
    /// more queries are embedded concurrently than there are cores (and ONNX
    /// sessions in the pool).
    pub fn new(config: Config) -> Result<Self> {
        let embedder = build_embedder(&config)?;

        let provider: Arc<dyn CatalogProvider> = match &config.catalog_path {
            Some(path) => {
                tracing::info!(path = %path.display(), "Using file-backed tool catalog");
                Arc::new(FileCatalog::new(path))
            }
            None => {
                tracing::warn!("CATALOG_PATH not set; live catalog is empty");
                Arc::new(StaticCatalog::new())
            }
        };

        Self::from_parts(config, embedder, provider)
    }

    /// Assemble state around an explicit embedder and catalog provider.
    pub fn from_parts(
        config: Config,
        embedder: Arc<dyn Embedder>,
        provider: Arc<dyn CatalogProvider>,
    ) -> Result<Self> {
        let params = IndexParams {
            kind: config.index_kind,
            metric: config.metric,
            nlist: config.nlist,
            nprobe: config.nprobe,
        };

        let index = Arc::new(ToolIndex::new(embedder, params, config.index_path.clone()));
        let records = index.load()?;
        tracing::info!(records, "Tool index ready");

        if config.seed_default_tools {
            seed::seed_index(&index, seed::default_tools())?;
        }

        let retriever = Arc::new(Retriever::new(
            Arc::clone(&index),
            config.retrieval_candidates,
        ));
        let manager = Arc::new(ToolManager::new(
            Arc::clone(&retriever),
            provider,
            config.top_k,
            config.score_threshold,
            config.catalog_timeout,
        ));

        let permits = config.permits.unwrap_or_else(Config::available_cores).max(1);
        tracing::info!(permits, "Search concurrency limit");

        let state = Self {
            config: Arc::new(config),
            index,
            retriever,
            manager,
            semaphore: Arc::new(Semaphore::new(permits)),
            ready: AtomicBool::new(false),
        };

        state.warmup()?;
        state.ready.store(true, Ordering::SeqCst);

        Ok(state)
    }

    /// Embed a dummy query so lazy initialisation in the embedder does not
    /// land on the first real request.
    fn warmup(&self) -> Result<()> {
        tracing::info!("Running embedder warmup...");
        let start = std::time::Instant::now();

        let _ = self.index.embedder().embed("warmup query")?;

        tracing::info!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Embedder warmup completed successfully"
        );
        Ok(())
    }

    /// Admission for any request that embeds text (search, insert, filter).
    ///
    /// Waits up to `permit_timeout` for a permit, then sheds the request with
    /// `ResourceError` (503). Holding the permit while embedding keeps callers
    /// queued here instead of failing on an exhausted session pool.
    pub async fn acquire_permit(&self) -> Result<SemaphorePermit<'_>> {
        tokio::time::timeout(self.config.permit_timeout, self.semaphore.acquire())
            .await
            .map_err(|_| {
                AppError::ResourceError("Service temporarily overloaded, please retry".to_string())
            })?
            .map_err(|_| AppError::ResourceError("Semaphore closed".to_string()))
    }

    /// Check if the service is ready to handle requests.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst) && self.index.is_loaded()
    }
}

fn build_embedder(config: &Config) -> Result<Arc<dyn Embedder>> {
    match config.embedder {
        EmbedderKind::Hashing => {
            tracing::info!(dim = config.embedding_dim, "Using hashing embedder");
            Ok(Arc::new(HashingEmbedder::new(config.embedding_dim)?))
        }
        EmbedderKind::Onnx => {
            let pool_size = config.pool_size.unwrap_or_else(Config::available_cores);
            tracing::info!(
                model = %config.bi_encoder_model_path.display(),
                pool_size,
                "Loading bi-encoder embedder"
            );
            Ok(Arc::new(BiEncoderEmbedder::load(
                &config.bi_encoder_model_path,
                &config.bi_encoder_tokenizer_path,
                config.max_sequence_length,
                config.embedding_dim,
                pool_size,
            )?))
        }
    }
}
