#[derive(Debug, thiserror::Error)]
pub enum UciError {
    #[error("engine did not answer uciok/readyok within the boot timeout")]
    EngineInitTimeout,
    #[error("engine process failed to start: {0}")]
    EngineStartFailed(String),
    #[error("engine process closed its stdout unexpectedly")]
    EngineClosedUnexpectedly,
    #[error("engine reported no legal moves (bestmove (none))")]
    NoLegalMoves,
    #[error("worker is shutting down and rejected the in-flight task")]
    EngineShuttingDown,
    #[error("worker is not ready to accept a task")]
    EngineNotReady,
    #[error("io error talking to the engine process: {0}")]
    Io(#[from] std::io::Error),
}

impl UciError {
    /// Whether the pool should retry the task that failed with this error,
    /// per the error taxonomy (`EngineClosedUnexpectedly` / `EngineNotReady` /
    /// `EngineShuttingDown` are retryable; `NoLegalMoves` and init failures are not).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            UciError::EngineClosedUnexpectedly | UciError::EngineNotReady | UciError::EngineShuttingDown
        )
    }
}
