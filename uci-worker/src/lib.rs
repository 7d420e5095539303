pub mod actor;
pub mod error;
pub mod handle;
pub mod protocol;
pub mod types;

pub use actor::spawn;
pub use error::UciError;
pub use handle::UciWorker;
pub use types::{AnalysisOptions, AnalysisResult, ProgressSnapshot, PvLine, Score, WorkerConfig, WorkerStatus};
