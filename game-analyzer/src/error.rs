#[derive(Debug, thiserror::Error)]
pub enum AnalyzerError {
    #[error("a game analysis is already in progress for this game")]
    AlreadyAnalyzing,
    #[error("cancelled")]
    Cancelled,
    #[error(transparent)]
    Adapter(#[from] chess_adapter::AdapterError),
    #[error(transparent)]
    Pool(#[from] worker_pool::PoolError),
    #[error("persistence error: {0}")]
    Persistence(String),
}
