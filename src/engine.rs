use std::sync::Arc;

use crate::config::EngineConfig;
use crate::pool::WorkerPool;
use crate::statistics::StatisticsCache;
use crate::storage::Storage;
use crate::transaction::TransactionManager;

/// Process-wide engine context: storage, statistics cache, transaction
/// manager and the worker pool. Passed explicitly to everything that needs
/// it, there are no ambient globals.
pub struct Engine {
    pub config: Arc<EngineConfig>,
    pub storage: Storage,
    pub statistics: StatisticsCache,
    pub transaction_manager: TransactionManager,
    pub pool: WorkerPool,
}

impl Engine {
    pub fn new() -> Engine {
        Engine::with_config(EngineConfig::new())
    }

    pub fn with_config(config: EngineConfig) -> Engine {
        let config = Arc::new(config);
        Engine {
            statistics: StatisticsCache::new(config.histogram_bins),
            pool: WorkerPool::new(config.n_threads as usize),
            storage: Storage::new(),
            transaction_manager: TransactionManager::new(),
            config,
        }
    }
}

impl Default for Engine {
    fn default() -> Self {
        Engine::new()
    }
}
