use uci_worker::PvLine;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Settings {
    pub depth: u32,
    pub time_limit_ms: u64,
    pub multi_pv: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            depth: 18,
            time_limit_ms: 10_000,
            multi_pv: 3,
        }
    }
}

/// Partial update applied by `updateSettings`; `None` fields are left unchanged.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct SettingsPatch {
    pub depth: Option<u32>,
    pub time_limit_ms: Option<u64>,
    pub multi_pv: Option<u32>,
}

impl Settings {
    pub fn merge(&mut self, patch: &SettingsPatch) {
        if let Some(d) = patch.depth {
            self.depth = d;
        }
        if let Some(t) = patch.time_limit_ms {
            self.time_limit_ms = t;
        }
        if let Some(m) = patch.multi_pv {
            self.multi_pv = m;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineStatusKind {
    SessionCreated,
    SettingsUpdated,
}

/// Every event a live session can publish on its per-session broadcast
/// channel.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    #[serde(rename = "analysis_started")]
    AnalysisStarted { fen: String, options: Settings },
    #[serde(rename = "analysis_progress")]
    AnalysisProgress {
        fen: String,
        depth: u32,
        lines: Vec<ProgressLine>,
    },
    #[serde(rename = "analysis_complete")]
    AnalysisComplete {
        fen: String,
        lines: Vec<ProgressLine>,
        analysis_time_ms: u64,
        is_complete: bool,
    },
    #[serde(rename = "analysis_error")]
    AnalysisError {
        error: String,
        message: String,
        fen: Option<String>,
    },
    #[serde(rename = "engine_status")]
    EngineStatus {
        status: EngineStatusKind,
        settings: Settings,
    },
    #[serde(rename = "session_closed")]
    SessionClosed { reason: String },
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ProgressLine {
    pub multi_pv_index: u32,
    pub evaluation: i32,
    pub best_move: String,
    pub pv: Vec<String>,
}

impl From<&PvLine> for ProgressLine {
    fn from(line: &PvLine) -> Self {
        Self {
            multi_pv_index: line.multipv_index,
            evaluation: line.score.to_sentinel_cp(),
            best_move: line.best_move.clone(),
            pv: line.pv.clone(),
        }
    }
}
