use chess_adapter::Side;

/// Five-bucket severity table, keyed on mover-relative centipawn loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveClassification {
    Excellent,
    Good,
    Inaccuracy,
    Mistake,
    Blunder,
}

impl MoveClassification {
    pub fn from_centipawn_loss(cp_loss: u32) -> Self {
        match cp_loss {
            0..=10 => MoveClassification::Excellent,
            11..=49 => MoveClassification::Good,
            50..=149 => MoveClassification::Inaccuracy,
            150..=299 => MoveClassification::Mistake,
            _ => MoveClassification::Blunder,
        }
    }
}

/// One analyzed ply, ready to persist (`PositionReview` / `position_reviews` row).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PositionReview {
    pub move_number: u32,
    pub side: Side,
    pub player_move: String,
    pub position_fen: String,
    pub best_move: String,
    pub best_line: String,
    /// White-relative, per the fixed perspective convention.
    pub stockfish_evaluation: i32,
    pub analysis_depth: u32,
    pub mistake_severity: MoveClassification,
    pub centipawn_loss: u32,
    pub win_probability_loss: f64,
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct MistakeCounts {
    pub blunders: u32,
    pub mistakes: u32,
    pub inaccuracies: u32,
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct SideAccuracy {
    pub white: f64,
    pub black: f64,
    pub overall: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStatus {
    Complete,
    Empty,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct GameAnalysisResult {
    pub game_id: String,
    pub status: AnalysisStatus,
    pub details: Vec<PositionReview>,
    pub mistakes: MistakeCounts,
    pub accuracy: SideAccuracy,
}

impl GameAnalysisResult {
    pub fn empty(game_id: impl Into<String>) -> Self {
        Self {
            game_id: game_id.into(),
            status: AnalysisStatus::Empty,
            details: Vec::new(),
            mistakes: MistakeCounts::default(),
            accuracy: SideAccuracy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    Analyzing,
    Complete,
    Error,
}

/// Emitted at least once per completed ply (`{current, total, percentage, status, message}`).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Progress {
    pub current: usize,
    pub total: usize,
    pub percentage: f64,
    pub status: ProgressStatus,
    pub message: String,
}
