use std::future::Future;

use crate::error::AnalyzerError;
use crate::types::PositionReview;

/// Supplies the PGN text for a game. Implemented by the `server` crate
/// against its game repository; kept abstract here so this crate stays
/// independent of `sqlx`.
pub trait GameSource: Send + Sync {
    fn load_pgn(&self, game_id: &str) -> impl Future<Output = Result<String, AnalyzerError>> + Send;
}

/// Persists and clears per-ply analysis rows for a game.
pub trait AnalysisStore: Send + Sync {
    fn delete_rows(&self, game_id: &str) -> impl Future<Output = Result<(), AnalyzerError>> + Send;
    fn insert_rows(
        &self,
        game_id: &str,
        rows: &[PositionReview],
    ) -> impl Future<Output = Result<(), AnalyzerError>> + Send;
}
