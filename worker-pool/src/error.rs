#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("task queue is full")]
    QueueFull,
    #[error("pool is shutting down")]
    PoolShuttingDown,
    #[error("engine error: {0}")]
    Engine(#[from] uci_worker::UciError),
}
