//! Async repository trait definitions. Methods return `impl Future + Send`
//! so they compose across `tokio::spawn` boundaries.

use std::future::Future;

use game_analyzer::PositionReview;

use super::PersistenceError;

/// Read-only view over the `games` collaborator table (`{id, pgn, ...}`).
/// `insert_game` exists only to seed rows for tests and local development;
/// the analysis core never writes here.
pub trait GameRepository: Send + Sync {
    fn load_pgn(&self, game_id: &str) -> impl Future<Output = Result<String, PersistenceError>> + Send;

    fn insert_game(
        &self,
        game_id: &str,
        pgn: &str,
    ) -> impl Future<Output = Result<(), PersistenceError>> + Send;
}

/// Owns the per-ply analysis rows: bulk insert, delete-by-game-id, and a
/// find-many ordered by `move_number` ascending.
pub trait AnalysisRepository: Send + Sync {
    fn insert_rows(
        &self,
        game_id: &str,
        rows: &[PositionReview],
    ) -> impl Future<Output = Result<(), PersistenceError>> + Send;

    fn delete_rows(&self, game_id: &str) -> impl Future<Output = Result<(), PersistenceError>> + Send;

    fn find_rows(
        &self,
        game_id: &str,
    ) -> impl Future<Output = Result<Vec<PositionReview>, PersistenceError>> + Send;
}
