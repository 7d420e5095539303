//! Persistence layer for the analysis server.
//!
//! One concrete collaborator backend (sqlite via `sqlx`): a `Database`
//! owning a connection pool and embedded migrations, plus one repository per
//! aggregate. Games and per-ply analysis rows are treated as an external
//! collaborator surface with its own row contract; this module is that
//! contract's one shipped implementation, not the only one a caller could
//! plug in.

mod error;
pub mod sqlite;
pub mod traits;

pub use error::PersistenceError;
pub use sqlite::Database;
pub use traits::{AnalysisRepository, GameRepository};
