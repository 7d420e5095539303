#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("invalid PGN: {0}")]
    InvalidPgn(String),
    #[error("illegal move at ply {ply}: {san}")]
    IllegalMove { ply: u32, san: String },
    #[error("invalid FEN: {0}")]
    InvalidFen(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
