//! SQLite-backed [`GameRepository`].

use sqlx::{Row, SqlitePool};

use super::helpers::now_timestamp;
use crate::persistence::traits::GameRepository;
use crate::persistence::PersistenceError;

pub struct SqliteGameRepository {
    pool: SqlitePool,
}

impl SqliteGameRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

impl GameRepository for SqliteGameRepository {
    async fn load_pgn(&self, game_id: &str) -> Result<String, PersistenceError> {
        let row = sqlx::query("SELECT pgn FROM games WHERE id = ?")
            .bind(game_id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(row.get::<String, _>("pgn")),
            None => Err(PersistenceError::GameNotFound(game_id.to_string())),
        }
    }

    async fn insert_game(&self, game_id: &str, pgn: &str) -> Result<(), PersistenceError> {
        sqlx::query("INSERT OR REPLACE INTO games (id, pgn, created_at) VALUES (?, ?, ?)")
            .bind(game_id)
            .bind(pgn)
            .bind(now_timestamp())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::sqlite::Database;

    #[tokio::test]
    async fn round_trips_pgn() {
        let db = Database::new_in_memory().await.unwrap();
        let repo = SqliteGameRepository::new(db.pool().clone());
        repo.insert_game("g1", "1. e4 e5 *").await.unwrap();
        let pgn = repo.load_pgn("g1").await.unwrap();
        assert_eq!(pgn, "1. e4 e5 *");
    }

    #[tokio::test]
    async fn missing_game_is_an_error() {
        let db = Database::new_in_memory().await.unwrap();
        let repo = SqliteGameRepository::new(db.pool().clone());
        assert!(matches!(
            repo.load_pgn("missing").await,
            Err(PersistenceError::GameNotFound(_))
        ));
    }
}
