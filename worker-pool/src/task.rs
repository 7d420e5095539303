use tokio::sync::mpsc;
use uci_worker::{AnalysisOptions, ProgressSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    Live,
    Batch,
}

/// What a caller submits to the pool (`analyzePosition` / per-ply dispatch).
pub struct TaskRequest {
    pub fen: String,
    pub options: AnalysisOptions,
    pub priority: Priority,
    pub progress: Option<mpsc::Sender<ProgressSnapshot>>,
}

impl TaskRequest {
    pub fn new(fen: impl Into<String>, options: AnalysisOptions, priority: Priority) -> Self {
        Self {
            fen: fen.into(),
            options,
            priority,
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: mpsc::Sender<ProgressSnapshot>) -> Self {
        self.progress = Some(progress);
        self
    }
}
