pub mod config;
pub mod extract;
pub mod feedback;
pub mod interviewer;
pub mod oracle;
pub mod persistence;
pub mod prompts;
pub mod session_state;
pub mod speech;
pub mod turn_clock;

use crate::feedback::Scorecard;
use crate::interviewer::InterviewerId;
use crate::session_state::{Interruption, Phase};
use serde::Serialize;

/// Represents commands that the panel (`PanelStateMachine`) issues to the runtime.
///
/// The panel decides, the runtime executes: speaking text aloud, highlighting the
/// active persona, rendering the current question. Every command is
/// fire-and-forget; a runtime that falls behind loses commands, never session state.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Speak the given text in the given persona's voice.
    SpeakText { speaker: InterviewerId, text: String },
    /// A new question is awaiting an answer.
    QuestionChanged { speaker: InterviewerId, question: String },
    /// The active persona changed (including Interrupter take-overs and hand-backs).
    SpeakerChanged { speaker: InterviewerId },
    /// The Interrupter broke into the open Lead turn.
    Interrupted(Interruption),
    PhaseChanged { phase: Phase },
    /// Feedback is ready; the panel is now in its terminal phase.
    SessionComplete(Box<Scorecard>),
}
