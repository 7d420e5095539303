pub mod error;
pub mod pgn;

pub use error::AdapterError;
pub use pgn::{load_pgn, validate_fen, Game, Ply, Side};
