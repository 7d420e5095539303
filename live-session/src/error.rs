#[derive(Debug, thiserror::Error)]
pub enum LiveError {
    #[error("no active live session")]
    NoActiveSession,
    #[error("session {requested} does not match the active session {active}")]
    SessionMismatch { requested: String, active: String },
    #[error("invalid FEN: {0}")]
    InvalidFen(#[from] chess_adapter::AdapterError),
    #[error(transparent)]
    Pool(#[from] worker_pool::PoolError),
}
