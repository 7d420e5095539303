use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch, Notify};

use crate::error::UciError;
use crate::types::{AnalysisOptions, AnalysisResult, ProgressSnapshot, WorkerStatus};

#[derive(Debug)]
pub(crate) enum WorkerCommand {
    Analyze {
        fen: String,
        opts: AnalysisOptions,
        progress: Option<mpsc::Sender<ProgressSnapshot>>,
        reply: oneshot::Sender<Result<AnalysisResult, UciError>>,
    },
    NewGame,
    Restart {
        reply: oneshot::Sender<Result<(), UciError>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// A cheap-to-clone reference to one running UCI worker actor, following a
/// request/reply-via-oneshot pattern.
#[derive(Clone)]
pub struct UciWorker {
    pub id: u32,
    pub(crate) cmd_tx: mpsc::Sender<WorkerCommand>,
    pub(crate) wake: Arc<Notify>,
    pub(crate) stop_requested: Arc<AtomicBool>,
    pub(crate) shutdown_requested: Arc<AtomicBool>,
    pub(crate) status_rx: watch::Receiver<WorkerStatus>,
}

impl UciWorker {
    pub fn status(&self) -> WorkerStatus {
        *self.status_rx.borrow()
    }

    pub async fn analyze(&self, fen: impl Into<String>, opts: AnalysisOptions) -> Result<AnalysisResult, UciError> {
        self.analyze_with_progress(fen, opts, None).await
    }

    pub async fn analyze_with_progress(
        &self,
        fen: impl Into<String>,
        opts: AnalysisOptions,
        progress: Option<mpsc::Sender<ProgressSnapshot>>,
    ) -> Result<AnalysisResult, UciError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(WorkerCommand::Analyze {
                fen: fen.into(),
                opts,
                progress,
                reply: reply_tx,
            })
            .await
            .map_err(|_| UciError::EngineShuttingDown)?;
        reply_rx.await.map_err(|_| UciError::EngineClosedUnexpectedly)?
    }

    /// Cooperative stop: nudges an in-flight analysis to resolve with its
    /// best-so-far partial PV rather than aborting it.
    pub async fn stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
        self.wake.notify_waiters();
    }

    pub async fn new_game(&self) {
        let _ = self.cmd_tx.send(WorkerCommand::NewGame).await;
    }

    /// Forces the worker to restart its engine process. Uses the same
    /// attempt budget/back-off as the worker's own heartbeat-triggered
    /// restart so pool-driven and self-driven restarts never disagree.
    pub async fn restart(&self) -> Result<(), UciError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(WorkerCommand::Restart { reply: reply_tx })
            .await
            .map_err(|_| UciError::EngineShuttingDown)?;
        reply_rx.await.map_err(|_| UciError::EngineClosedUnexpectedly)?
    }

    pub async fn shutdown(&self) {
        self.shutdown_requested.store(true, Ordering::SeqCst);
        self.wake.notify_waiters();
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(WorkerCommand::Shutdown { reply: reply_tx })
            .await
            .is_ok()
        {
            let _ = reply_rx.await;
        }
    }
}
