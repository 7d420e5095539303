mod analysis_repo;
mod database;
mod game_repo;
mod helpers;

pub use analysis_repo::SqliteAnalysisRepository;
pub use database::Database;
pub use game_repo::SqliteGameRepository;
