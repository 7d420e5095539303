//! Environment configuration for the analysis server.
//!
//! Env-var-present-else-platform-default precedence throughout.

use std::path::PathBuf;
use std::time::Duration;

use worker_pool::PoolConfig;

const DEFAULT_DB_PATH: &str = "./data/analysis.db";
const DEFAULT_LOG_DIR: &str = "./logs";

#[cfg(target_os = "linux")]
const DEFAULT_ENGINE_PATH: &str = "/usr/bin/stockfish";
#[cfg(target_os = "macos")]
const DEFAULT_ENGINE_PATH: &str = "/usr/local/bin/stockfish";
#[cfg(target_os = "windows")]
const DEFAULT_ENGINE_PATH: &str = "./stockfish.exe";
#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
const DEFAULT_ENGINE_PATH: &str = "stockfish";

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Reads the sqlite database file path.
///
/// Priority: `DATABASE_PATH` env var, else `./data/analysis.db`.
pub fn database_path() -> PathBuf {
    std::env::var("DATABASE_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_DB_PATH))
}

/// Reads `ENGINE_PATH`, falling back to the platform-dependent default.
pub fn engine_path() -> PathBuf {
    std::env::var("ENGINE_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_ENGINE_PATH))
}

/// Reads `LOG_DIR`, falling back to `./logs`. Daily-rolling log files are
/// written here in addition to the stdout trace output.
pub fn log_dir() -> PathBuf {
    std::env::var("LOG_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_LOG_DIR))
}

/// Builds pool configuration from `POOL_SIZE`, `RESERVED_FOR_LIVE`,
/// `THREADS_PER_WORKER`, `HASH_PER_WORKER_MB`, `POOL_MAX_QUEUE`,
/// `TASK_TIMEOUT_MS`, each falling back to `PoolConfig::default()`'s value.
pub fn pool_config() -> PoolConfig {
    let defaults = PoolConfig::default();
    PoolConfig {
        pool_size: env_or("POOL_SIZE", defaults.pool_size),
        reserved_for_live: env_or("RESERVED_FOR_LIVE", defaults.reserved_for_live),
        threads_per_worker: env_or("THREADS_PER_WORKER", defaults.threads_per_worker),
        hash_per_worker_mb: env_or("HASH_PER_WORKER_MB", defaults.hash_per_worker_mb),
        max_queue_size: env_or("POOL_MAX_QUEUE", defaults.max_queue_size),
        task_timeout: Duration::from_millis(env_or(
            "TASK_TIMEOUT_MS",
            defaults.task_timeout.as_millis() as u64,
        )),
        engine_path: engine_path(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn database_path_falls_back_when_unset() {
        // Note: assumes DATABASE_PATH is unset in the test environment.
        if std::env::var("DATABASE_PATH").is_err() {
            assert_eq!(database_path(), PathBuf::from(DEFAULT_DB_PATH));
        }
    }

    #[test]
    fn pool_config_defaults_match_pool_config_default() {
        if std::env::var("POOL_SIZE").is_err() {
            let cfg = pool_config();
            assert_eq!(cfg.pool_size, PoolConfig::default().pool_size);
            assert_eq!(cfg.reserved_for_live, PoolConfig::default().reserved_for_live);
        }
    }

    #[test]
    fn reserved_for_live_is_less_than_pool_size_by_default() {
        let cfg = PoolConfig::default();
        assert!(cfg.reserved_for_live < cfg.pool_size);
    }
}
