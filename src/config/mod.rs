fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(val) => val.parse::<T>().unwrap_or(default),
        Err(_) => default,
    }
}

pub struct EngineConfig {
    pub n_threads: u32,
    pub target_chunk_size: usize,
    /// Bin target handed to histogram construction by the statistics cache.
    pub histogram_bins: usize,
    /// Clusters whose chunks stay at or below this row count get coalesced
    /// into a shared merge chunk (with the merge-small-chunks feature).
    pub small_chunk_threshold: usize,
}

impl EngineConfig {
    pub fn new() -> EngineConfig {
        EngineConfig {
            n_threads: env_or("STRATA_NTHREADS", 4),
            target_chunk_size: env_or("STRATA_CHUNK_SIZE", 65_536),
            histogram_bins: env_or("STRATA_HISTOGRAM_BINS", 100),
            small_chunk_threshold: env_or("STRATA_SMALL_CHUNK_THRESHOLD", 10_000),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig::new()
    }
}
