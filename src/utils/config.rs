use std::env;
use std::time::Duration;

/// Engine knobs. The pinned block number and the upstream RPC client are
/// constructor arguments; everything here carries a deployment default and
/// an env override.
#[derive(Debug, Clone)]
pub struct StateConfig {
    /// Max elements per transport batch.
    pub batch_size: usize,
    /// Hot-key cache file path; empty disables warm-up.
    pub key_cache_file_path: String,
    /// Upper bound on hot-key lines consumed per warm-up.
    pub max_key_cache: u64,
    /// Coalescer storage tick.
    pub slot_tick: Duration,
    /// Coalescer account tick.
    pub account_tick: Duration,
    /// Max attempts per batched RPC call.
    pub retry_limit: usize,
    /// Pause between transport retry attempts.
    pub retry_backoff: Duration,
    /// Pause between coalescer dispatch attempts when upstream is down.
    pub coalescer_retry_backoff: Duration,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            key_cache_file_path: String::new(),
            max_key_cache: 100_000,
            slot_tick: Duration::from_millis(3),
            account_tick: Duration::from_millis(10),
            retry_limit: 5,
            retry_backoff: Duration::from_millis(100),
            coalescer_retry_backoff: Duration::from_secs(1),
        }
    }
}

impl StateConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let batch_size = env::var("MFER_BATCH_SIZE")
            .ok()
            .and_then(|raw| raw.trim().parse::<usize>().ok())
            .filter(|v| (1..=10_000).contains(v))
            .unwrap_or(defaults.batch_size);
        let key_cache_file_path = env::var("MFER_KEY_CACHE_PATH")
            .ok()
            .map(|v| v.trim().to_string())
            .unwrap_or(defaults.key_cache_file_path);
        let max_key_cache = env::var("MFER_MAX_KEY_CACHE")
            .ok()
            .and_then(|raw| raw.trim().parse::<u64>().ok())
            .unwrap_or(defaults.max_key_cache);
        let slot_tick = env::var("MFER_SLOT_TICK_MS")
            .ok()
            .and_then(|raw| raw.trim().parse::<u64>().ok())
            .filter(|v| (1..=10_000).contains(v))
            .map(Duration::from_millis)
            .unwrap_or(defaults.slot_tick);
        let account_tick = env::var("MFER_ACCOUNT_TICK_MS")
            .ok()
            .and_then(|raw| raw.trim().parse::<u64>().ok())
            .filter(|v| (1..=10_000).contains(v))
            .map(Duration::from_millis)
            .unwrap_or(defaults.account_tick);
        let retry_limit = env::var("MFER_RPC_RETRY_LIMIT")
            .ok()
            .and_then(|raw| raw.trim().parse::<usize>().ok())
            .filter(|v| (1..=100).contains(v))
            .unwrap_or(defaults.retry_limit);
        let retry_backoff = env::var("MFER_RPC_RETRY_BACKOFF_MS")
            .ok()
            .and_then(|raw| raw.trim().parse::<u64>().ok())
            .filter(|v| (1..=60_000).contains(v))
            .map(Duration::from_millis)
            .unwrap_or(defaults.retry_backoff);

        Self {
            batch_size,
            key_cache_file_path,
            max_key_cache,
            slot_tick,
            account_tick,
            retry_limit,
            retry_backoff,
            coalescer_retry_backoff: defaults.coalescer_retry_backoff,
        }
    }
}
