pub mod analyzer;
pub mod error;
pub mod math;
pub mod store;
pub mod types;

pub use analyzer::{AnalyzeOptions, GameAnalyzer};
pub use error::AnalyzerError;
pub use store::{AnalysisStore, GameSource};
pub use types::{
    AnalysisStatus, GameAnalysisResult, MistakeCounts, MoveClassification, PositionReview,
    Progress, ProgressStatus, SideAccuracy,
};
