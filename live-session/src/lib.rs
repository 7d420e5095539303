pub mod error;
pub mod session;
pub mod types;

pub use error::LiveError;
pub use session::LiveSessionHandle;
pub use types::{EngineStatusKind, Event, ProgressLine, Settings, SettingsPatch};
