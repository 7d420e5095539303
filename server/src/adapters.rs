//! Bridges `server::persistence`'s sqlite repositories to the narrow
//! `GameSource`/`AnalysisStore` traits `game-analyzer` expects, narrowing a
//! concrete repository down to the trait surface a generic manager needs.

use std::sync::Arc;

use game_analyzer::{AnalysisStore, AnalyzerError, GameSource, PositionReview};

use crate::persistence::{AnalysisRepository, GameRepository};

pub struct GameSourceAdapter<R> {
    repo: Arc<R>,
}

impl<R> GameSourceAdapter<R> {
    pub fn new(repo: Arc<R>) -> Self {
        Self { repo }
    }
}

impl<R: GameRepository> GameSource for GameSourceAdapter<R> {
    async fn load_pgn(&self, game_id: &str) -> Result<String, AnalyzerError> {
        self.repo
            .load_pgn(game_id)
            .await
            .map_err(|e| AnalyzerError::Persistence(e.to_string()))
    }
}

pub struct AnalysisStoreAdapter<R> {
    repo: Arc<R>,
}

impl<R> AnalysisStoreAdapter<R> {
    pub fn new(repo: Arc<R>) -> Self {
        Self { repo }
    }
}

impl<R: AnalysisRepository> AnalysisStore for AnalysisStoreAdapter<R> {
    async fn delete_rows(&self, game_id: &str) -> Result<(), AnalyzerError> {
        self.repo
            .delete_rows(game_id)
            .await
            .map_err(|e| AnalyzerError::Persistence(e.to_string()))
    }

    async fn insert_rows(&self, game_id: &str, rows: &[PositionReview]) -> Result<(), AnalyzerError> {
        self.repo
            .insert_rows(game_id, rows)
            .await
            .map_err(|e| AnalyzerError::Persistence(e.to_string()))
    }
}
