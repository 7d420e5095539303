//! Three-phase game review: replay the PGN, dispatch per-ply analysis to
//! the worker pool at `batch` priority, then persist and aggregate.
//! Generalizes a single-worker review orchestration loop to a pool-backed,
//! concurrent one.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chess_adapter::{Ply, Side};
use tokio::sync::{mpsc, Mutex, Semaphore};
use worker_pool::{PoolError, Priority, TaskRequest, WorkerPool};
use uci_worker::AnalysisOptions;

use crate::error::AnalyzerError;
use crate::math::{compute_accuracy, mover_relative, win_probability};
use crate::store::{AnalysisStore, GameSource};
use crate::types::{
    AnalysisStatus, GameAnalysisResult, MistakeCounts, MoveClassification, PositionReview,
    Progress, ProgressStatus, SideAccuracy,
};

#[derive(Debug, Clone)]
pub struct AnalyzeOptions {
    pub depth: u32,
    pub skip_opening_plies: usize,
    pub max_positions: Option<usize>,
    pub progress: Option<mpsc::Sender<Progress>>,
}

impl Default for AnalyzeOptions {
    fn default() -> Self {
        Self {
            depth: 15,
            skip_opening_plies: 0,
            max_positions: None,
            progress: None,
        }
    }
}

pub struct GameAnalyzer<S, A> {
    pool: WorkerPool,
    source: Arc<S>,
    store: Arc<A>,
    in_progress: Mutex<HashSet<String>>,
}

impl<S, A> GameAnalyzer<S, A>
where
    S: GameSource + 'static,
    A: AnalysisStore + 'static,
{
    pub fn new(pool: WorkerPool, source: Arc<S>, store: Arc<A>) -> Self {
        Self {
            pool,
            source,
            store,
            in_progress: Mutex::new(HashSet::new()),
        }
    }

    /// Analyzes a full game end to end. Re-entrant calls for the same
    /// `game_id` while one is already running are rejected; a prior
    /// analysis's rows are discarded and replaced (idempotent re-analysis).
    pub async fn analyze_game(
        &self,
        game_id: &str,
        opts: AnalyzeOptions,
        cancel: Option<Arc<AtomicBool>>,
    ) -> Result<GameAnalysisResult, AnalyzerError> {
        {
            let mut guard = self.in_progress.lock().await;
            if !guard.insert(game_id.to_string()) {
                return Err(AnalyzerError::AlreadyAnalyzing);
            }
        }
        let result = self.run(game_id, opts, cancel).await;
        self.in_progress.lock().await.remove(game_id);
        result
    }

    async fn run(
        &self,
        game_id: &str,
        opts: AnalyzeOptions,
        cancel: Option<Arc<AtomicBool>>,
    ) -> Result<GameAnalysisResult, AnalyzerError> {
        let pgn = self.source.load_pgn(game_id).await?;
        let game = chess_adapter::load_pgn(&pgn)?;
        let all_plies = game.plies();

        let start = opts.skip_opening_plies.min(all_plies.len());
        let end = match opts.max_positions {
            Some(n) => (start + n).min(all_plies.len()),
            None => all_plies.len(),
        };
        let selected: Vec<Ply> = all_plies[start..end].to_vec();

        if selected.is_empty() {
            return Ok(GameAnalysisResult::empty(game_id));
        }

        self.pool.new_game().await;

        let total = selected.len();
        let permits = self.pool.stats().await.batch_workers.max(1);
        let semaphore = Arc::new(Semaphore::new(permits));

        let mut handles = Vec::with_capacity(total);
        for ply in selected {
            let pool = self.pool.clone();
            let sem = semaphore.clone();
            let depth = opts.depth;
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                if cancel.as_ref().is_some_and(|c| c.load(Ordering::Relaxed)) {
                    return Ok(None);
                }
                let _permit = sem.acquire_owned().await.ok();
                analyze_ply(&pool, &ply, depth).await
            }));
        }

        let mut rows = Vec::with_capacity(total);
        for (i, handle) in handles.into_iter().enumerate() {
            if cancel.as_ref().is_some_and(|c| c.load(Ordering::Relaxed)) {
                return Err(AnalyzerError::Cancelled);
            }
            match handle.await {
                Ok(Ok(Some(row))) => rows.push(row),
                Ok(Ok(None)) => {}
                // The pool itself is gone; every remaining ply would fail the
                // same way, so stop dispatching rather than skip one by one.
                Ok(Err(e)) => return Err(e),
                Err(e) => tracing::warn!(ply = i + 1, error = %e, "ply analysis task panicked, skipping"),
            }
            if let Some(tx) = &opts.progress {
                let current = i + 1;
                let _ = tx
                    .send(Progress {
                        current,
                        total,
                        percentage: current as f64 / total as f64 * 100.0,
                        status: ProgressStatus::Analyzing,
                        message: format!("{current}/{total} plies analyzed"),
                    })
                    .await;
            }
        }

        rows.sort_by_key(|r| r.move_number);

        self.store.delete_rows(game_id).await?;
        self.store.insert_rows(game_id, &rows).await?;

        let result = aggregate(game_id, rows);

        if let Some(tx) = &opts.progress {
            let _ = tx
                .send(Progress {
                    current: total,
                    total,
                    percentage: 100.0,
                    status: ProgressStatus::Complete,
                    message: "analysis complete".to_string(),
                })
                .await;
        }

        Ok(result)
    }
}

async fn analyze_ply(pool: &WorkerPool, ply: &Ply, depth: u32) -> Result<Option<PositionReview>, AnalyzerError> {
    let options = AnalysisOptions {
        depth,
        multi_pv: 3,
        time_limit: None,
    };
    let analysis = match pool
        .submit(TaskRequest::new(ply.fen_before.clone(), options, Priority::Batch))
        .await
    {
        Ok(a) => a,
        Err(PoolError::PoolShuttingDown) => return Err(AnalyzerError::Pool(PoolError::PoolShuttingDown)),
        Err(e) => {
            tracing::warn!(ply = ply.index, error = %e, "ply analysis failed, skipping");
            return Ok(None);
        }
    };
    let Some(best_line) = analysis.best().cloned() else {
        return Ok(None);
    };
    let best_eval_mover = mover_relative(best_line.score.to_sentinel_cp(), ply.side);

    let player_eval_mover = if let Some(line) = analysis.lines.iter().find(|l| l.best_move == ply.uci) {
        mover_relative(line.score.to_sentinel_cp(), ply.side)
    } else {
        let follow_up_options = AnalysisOptions {
            depth,
            multi_pv: 1,
            time_limit: None,
        };
        let follow_up = match pool
            .submit(TaskRequest::new(ply.fen_after.clone(), follow_up_options, Priority::Batch))
            .await
        {
            Ok(a) => a,
            Err(PoolError::PoolShuttingDown) => return Err(AnalyzerError::Pool(PoolError::PoolShuttingDown)),
            Err(e) => {
                tracing::warn!(ply = ply.index, error = %e, "follow-up analysis failed, skipping");
                return Ok(None);
            }
        };
        let Some(after_line) = follow_up.best() else {
            return Ok(None);
        };
        mover_relative(after_line.score.to_sentinel_cp(), ply.side)
    };

    let centipawn_loss = (best_eval_mover - player_eval_mover).max(0) as u32;
    let win_probability_loss = (win_probability(best_eval_mover) - win_probability(player_eval_mover)).max(0.0);

    Ok(Some(PositionReview {
        move_number: ply.index,
        side: ply.side,
        player_move: ply.san.clone(),
        position_fen: ply.fen_before.clone(),
        best_move: best_line.best_move.clone(),
        best_line: best_line.pv.join(" "),
        stockfish_evaluation: best_line.score.to_sentinel_cp(),
        analysis_depth: best_line.depth,
        mistake_severity: MoveClassification::from_centipawn_loss(centipawn_loss),
        centipawn_loss,
        win_probability_loss,
    }))
}

fn aggregate(game_id: &str, details: Vec<PositionReview>) -> GameAnalysisResult {
    let mut mistakes = MistakeCounts::default();
    let (mut white_wpl, mut white_n) = (0.0_f64, 0u32);
    let (mut black_wpl, mut black_n) = (0.0_f64, 0u32);

    for row in &details {
        match row.mistake_severity {
            MoveClassification::Blunder => mistakes.blunders += 1,
            MoveClassification::Mistake => mistakes.mistakes += 1,
            MoveClassification::Inaccuracy => mistakes.inaccuracies += 1,
            MoveClassification::Good | MoveClassification::Excellent => {}
        }
        match row.side {
            Side::White => {
                white_wpl += row.win_probability_loss;
                white_n += 1;
            }
            Side::Black => {
                black_wpl += row.win_probability_loss;
                black_n += 1;
            }
        }
    }

    let white_accuracy = compute_accuracy(if white_n > 0 { white_wpl / white_n as f64 } else { 0.0 });
    let black_accuracy = compute_accuracy(if black_n > 0 { black_wpl / black_n as f64 } else { 0.0 });
    let total_n = white_n + black_n;
    let overall_accuracy = if total_n > 0 {
        (white_accuracy * white_n as f64 + black_accuracy * black_n as f64) / total_n as f64
    } else {
        0.0
    };

    GameAnalysisResult {
        game_id: game_id.to_string(),
        status: AnalysisStatus::Complete,
        details,
        mistakes,
        accuracy: SideAccuracy {
            white: white_accuracy,
            black: black_accuracy,
            overall: overall_accuracy,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregate_counts_mistakes_by_side() {
        let rows = vec![
            PositionReview {
                move_number: 1,
                side: Side::White,
                player_move: "e4".into(),
                position_fen: String::new(),
                best_move: "e2e4".into(),
                best_line: "e2e4".into(),
                stockfish_evaluation: 20,
                analysis_depth: 15,
                mistake_severity: MoveClassification::Excellent,
                centipawn_loss: 0,
                win_probability_loss: 0.0,
            },
            PositionReview {
                move_number: 2,
                side: Side::Black,
                player_move: "Qh4??".into(),
                position_fen: String::new(),
                best_move: "e7e5".into(),
                best_line: "e7e5".into(),
                stockfish_evaluation: -10,
                analysis_depth: 15,
                mistake_severity: MoveClassification::Blunder,
                centipawn_loss: 400,
                win_probability_loss: 45.0,
            },
        ];
        let result = aggregate("g1", rows);
        assert_eq!(result.mistakes.blunders, 1);
        assert_eq!(result.mistakes.mistakes, 0);
        assert!(result.accuracy.black < result.accuracy.white);
    }

    #[test]
    fn classification_thresholds_match_table() {
        assert_eq!(MoveClassification::from_centipawn_loss(0), MoveClassification::Excellent);
        assert_eq!(MoveClassification::from_centipawn_loss(10), MoveClassification::Excellent);
        assert_eq!(MoveClassification::from_centipawn_loss(11), MoveClassification::Good);
        assert_eq!(MoveClassification::from_centipawn_loss(49), MoveClassification::Good);
        assert_eq!(MoveClassification::from_centipawn_loss(50), MoveClassification::Inaccuracy);
        assert_eq!(MoveClassification::from_centipawn_loss(149), MoveClassification::Inaccuracy);
        assert_eq!(MoveClassification::from_centipawn_loss(150), MoveClassification::Mistake);
        assert_eq!(MoveClassification::from_centipawn_loss(299), MoveClassification::Mistake);
        assert_eq!(MoveClassification::from_centipawn_loss(300), MoveClassification::Blunder);
    }
}
