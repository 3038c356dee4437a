use serde::{Deserialize, Serialize};

use crate::{
    domain::{NoticePosition, SessionId},
    error::ApiError,
};

/// Read-only projection of a game handed to rendering surfaces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundView {
    pub started: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Only present once the current round has been revealed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub revealed: bool,
    pub shown: usize,
    pub total: usize,
    pub finished: bool,
    /// Only present once every country has been shown.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elapsed_secs: Option<f64>,
}

impl RoundView {
    pub fn progress_label(&self) -> String {
        format!("{} / {}", self.shown, self.total)
    }

    pub fn elapsed_label(&self) -> Option<String> {
        self.elapsed_secs.map(format_elapsed)
    }
}

pub fn format_elapsed(secs: f64) -> String {
    format!("{secs:.2}")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionNotice {
    pub message: String,
    pub duration_ms: u64,
    pub position: NoticePosition,
    pub elapsed_secs: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UserIntent {
    Start,
    Advance,
    Reveal,
    Restart,
}

impl UserIntent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Advance => "advance",
            Self::Reveal => "reveal",
            Self::Restart => "restart",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum RoundEvent {
    Snapshot {
        view: RoundView,
    },
    Presented {
        view: RoundView,
    },
    Revealed {
        view: RoundView,
    },
    Completed {
        view: RoundView,
        notice: CompletionNotice,
    },
    Restarted {
        view: RoundView,
    },
    FetchFailed {
        country: String,
        message: String,
    },
    Error(ApiError),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateGameResponse {
    pub session_id: SessionId,
    pub view: RoundView,
}
