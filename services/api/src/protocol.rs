//! JSON messages exchanged over `/ws`.

use panel_core::Command;
use panel_core::config::InterviewConfig;
use panel_core::interviewer::{Interviewer, PANEL};
use panel_core::session_state::PanelSession;
use serde::{Deserialize, Serialize};

fn yes() -> bool {
    true
}

/// What the browser sends. The browser owns the speech recogniser and streams
/// its interim and final results as `interim` / `final` messages.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Start {
        #[serde(default)]
        config: InterviewConfig,
        #[serde(default, rename = "userId")]
        user_id: Option<String>,
        /// False when the browser has no speech recognition.
        #[serde(default = "yes", rename = "speechSupported")]
        speech_supported: bool,
    },
    ToggleCapture,
    Interim {
        text: String,
    },
    Final {
        text: String,
    },
    /// The recogniser lost microphone access (e.g. `not-allowed`).
    SpeechDenied {
        reason: String,
    },
    End,
    Reset,
    Abandon,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Sent once on connect.
    Roster { panel: &'static [Interviewer] },
    Command { command: Command },
    Session { session: PanelSession },
    Error { message: String },
}

impl ServerMessage {
    pub fn roster() -> Self {
        ServerMessage::Roster { panel: &PANEL }
    }
}
