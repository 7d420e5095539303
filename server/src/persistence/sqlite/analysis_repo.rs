//! SQLite-backed [`AnalysisRepository`]: transactional bulk write, manual
//! `Row::get` decoding of the enum columns.

use sqlx::{Row, SqlitePool};

use super::helpers::{decode_classification, decode_side, encode_classification, encode_side, now_timestamp};
use crate::persistence::traits::AnalysisRepository;
use crate::persistence::PersistenceError;
use game_analyzer::PositionReview;

pub struct SqliteAnalysisRepository {
    pool: SqlitePool,
}

impl SqliteAnalysisRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

impl AnalysisRepository for SqliteAnalysisRepository {
    async fn insert_rows(&self, game_id: &str, rows: &[PositionReview]) -> Result<(), PersistenceError> {
        let mut tx = self.pool.begin().await?;
        let created_at = now_timestamp();

        for row in rows {
            sqlx::query(
                r#"
                INSERT OR REPLACE INTO position_reviews
                    (game_id, move_number, side, player_move, position_fen, best_move,
                     best_line, stockfish_evaluation, analysis_depth, mistake_severity,
                     centipawn_loss, win_probability_loss, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(game_id)
            .bind(row.move_number as i64)
            .bind(encode_side(row.side))
            .bind(&row.player_move)
            .bind(&row.position_fen)
            .bind(&row.best_move)
            .bind(&row.best_line)
            .bind(row.stockfish_evaluation as i64)
            .bind(row.analysis_depth as i64)
            .bind(encode_classification(row.mistake_severity))
            .bind(row.centipawn_loss as i64)
            .bind(row.win_probability_loss)
            .bind(created_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn delete_rows(&self, game_id: &str) -> Result<(), PersistenceError> {
        sqlx::query("DELETE FROM position_reviews WHERE game_id = ?")
            .bind(game_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn find_rows(&self, game_id: &str) -> Result<Vec<PositionReview>, PersistenceError> {
        let rows = sqlx::query(
            r#"
            SELECT move_number, side, player_move, position_fen, best_move, best_line,
                   stockfish_evaluation, analysis_depth, mistake_severity,
                   centipawn_loss, win_probability_loss
            FROM position_reviews
            WHERE game_id = ?
            ORDER BY move_number ASC
            "#,
        )
        .bind(game_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| PositionReview {
                move_number: r.get::<i64, _>("move_number") as u32,
                side: decode_side(r.get::<String, _>("side").as_str()),
                player_move: r.get("player_move"),
                position_fen: r.get("position_fen"),
                best_move: r.get("best_move"),
                best_line: r.get("best_line"),
                stockfish_evaluation: r.get::<i64, _>("stockfish_evaluation") as i32,
                analysis_depth: r.get::<i64, _>("analysis_depth") as u32,
                mistake_severity: decode_classification(r.get::<String, _>("mistake_severity").as_str()),
                centipawn_loss: r.get::<i64, _>("centipawn_loss") as u32,
                win_probability_loss: r.get("win_probability_loss"),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::sqlite::{Database, SqliteGameRepository};
    use crate::persistence::GameRepository;
    use chess_adapter::Side;
    use game_analyzer::MoveClassification;

    fn row(move_number: u32, side: Side) -> PositionReview {
        PositionReview {
            move_number,
            side,
            player_move: "e4".to_string(),
            position_fen: "startpos".to_string(),
            best_move: "e2e4".to_string(),
            best_line: "e2e4 e7e5".to_string(),
            stockfish_evaluation: 25,
            analysis_depth: 18,
            mistake_severity: MoveClassification::Excellent,
            centipawn_loss: 0,
            win_probability_loss: 0.0,
        }
    }

    async fn seeded_db(game_id: &str) -> Database {
        let db = Database::new_in_memory().await.unwrap();
        SqliteGameRepository::new(db.pool().clone())
            .insert_game(game_id, "1. e4 *")
            .await
            .unwrap();
        db
    }

    #[tokio::test]
    async fn round_trips_rows_ordered_by_move_number() {
        let db = seeded_db("g1").await;
        let repo = SqliteAnalysisRepository::new(db.pool().clone());
        let rows = vec![row(2, Side::Black), row(1, Side::White)];
        repo.insert_rows("g1", &rows).await.unwrap();

        let found = repo.find_rows("g1").await.unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].move_number, 1);
        assert_eq!(found[1].move_number, 2);
    }

    #[tokio::test]
    async fn delete_then_reinsert_leaves_no_orphans() {
        let db = seeded_db("g1").await;
        let repo = SqliteAnalysisRepository::new(db.pool().clone());
        repo.insert_rows("g1", &[row(1, Side::White), row(2, Side::Black)])
            .await
            .unwrap();
        repo.delete_rows("g1").await.unwrap();
        repo.insert_rows("g1", &[row(1, Side::White)]).await.unwrap();

        let found = repo.find_rows("g1").await.unwrap();
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn cascade_deletes_rows_when_game_deleted() {
        let db = seeded_db("g1").await;
        let repo = SqliteAnalysisRepository::new(db.pool().clone());
        repo.insert_rows("g1", &[row(1, Side::White)]).await.unwrap();

        sqlx::query("DELETE FROM games WHERE id = ?")
            .bind("g1")
            .execute(db.pool())
            .await
            .unwrap();

        let found = repo.find_rows("g1").await.unwrap();
        assert!(found.is_empty());
    }
}
