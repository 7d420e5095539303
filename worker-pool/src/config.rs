use std::path::PathBuf;
use std::time::Duration;

/// Pool configuration. Environment parsing happens in the caller (the
/// `server` binary); this crate stays environment-agnostic.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub pool_size: usize,
    pub reserved_for_live: usize,
    pub threads_per_worker: u32,
    pub hash_per_worker_mb: u32,
    pub max_queue_size: usize,
    pub task_timeout: Duration,
    pub engine_path: PathBuf,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            pool_size: 4,
            reserved_for_live: 1,
            threads_per_worker: 1,
            hash_per_worker_mb: 128,
            max_queue_size: 200,
            task_timeout: Duration::from_millis(30_000),
            engine_path: PathBuf::from("stockfish"),
        }
    }
}
