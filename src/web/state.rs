use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::{
    config::AppConfig,
    llm,
    modules::evaluator::{ContentFetcher, Evaluator, ModelInvoker, SummaryCache},
    store::{MemoryRecordStore, PgRecordStore, RecordStore},
};

#[derive(Clone)]
pub struct AppState {
    evaluator: Arc<Evaluator>,
}

impl AppState {
    pub fn new(evaluator: Arc<Evaluator>) -> Self {
        Self { evaluator }
    }

    /// Wires the store, generation backend and evaluator described by `config`.
    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        let store: Arc<dyn RecordStore> = match config.database_url.as_deref() {
            Some(url) => Arc::new(PgRecordStore::connect(url).await?),
            None => {
                warn!("DATABASE_URL is not set; projects and summaries are kept in memory");
                Arc::new(MemoryRecordStore::new())
            }
        };

        let backend =
            llm::backend_from_config(config).context("failed to initialize generation backend")?;
        info!(backend = backend.name(), model = %config.model, "generation backend ready");

        let fetcher = ContentFetcher::new(config.fetch_timeout, config.max_concurrent_fetches)?;
        let invoker = ModelInvoker::new(backend, config.model_timeout);
        let cache = Arc::new(SummaryCache::new(store.clone()));

        Ok(Self::new(Arc::new(Evaluator::new(
            fetcher,
            invoker,
            cache,
            store,
            config.retry,
        ))))
    }

    pub fn evaluator(&self) -> &Evaluator {
        &self.evaluator
    }
}
