//! Console runtime: stdin lines stand in for the speech recogniser and
//! synthesized speech is printed.

use panel_core::Command;
use panel_core::feedback::Scorecard;
use panel_core::interviewer::{InterviewerId, PANEL};
use panel_core::session_state::{CaptureToggle, PanelError, PanelStateMachine, Phase};
use panel_core::speech::{SpeechChannel, TranscriptBuffer};
use std::ops::ControlFlow;
use std::sync::Arc;

pub const HELP: &str = "Commands: /mic to start or stop answering, /end to finish, /new for another interview, /quit to leave. \
While the mic is on, every line you type is part of your answer.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleInput {
    Mic,
    End,
    New,
    Quit,
    Help,
    Speech(String),
    Empty,
}

impl ConsoleInput {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        match line {
            "" => ConsoleInput::Empty,
            "/mic" | "/m" => ConsoleInput::Mic,
            "/end" | "/e" => ConsoleInput::End,
            "/new" | "/n" => ConsoleInput::New,
            "/quit" | "/q" => ConsoleInput::Quit,
            "/help" | "/h" | "?" => ConsoleInput::Help,
            text => ConsoleInput::Speech(text.to_string()),
        }
    }
}

/// Intro screen: the roster and how to drive the panel.
pub fn roster() -> String {
    let mut out = String::from("Your panel today:\n");
    for interviewer in PANEL.iter() {
        out.push_str(&format!(
            "  {} ({}): {}\n",
            interviewer.name, interviewer.title, interviewer.description
        ));
    }
    out.push_str(HELP);
    out
}

fn name(speaker: InterviewerId) -> &'static str {
    speaker.interviewer().name
}

/// How a command shows up on the console. `None` for commands that only
/// change highlighting.
pub fn render(command: &Command) -> Option<String> {
    match command {
        Command::SpeakText { speaker, text } => Some(format!("{}: {}", name(*speaker), text)),
        Command::QuestionChanged { .. } | Command::SpeakerChanged { .. } => None,
        Command::Interrupted(_) => Some("(interruption)".to_string()),
        Command::PhaseChanged { phase } => match phase {
            Phase::Intro => Some(roster()),
            Phase::Active => Some("-- Interview started. Type /mic to answer. --".to_string()),
            Phase::Processing => Some("-- Analyzing your interview... --".to_string()),
            Phase::Feedback => None,
        },
        Command::SessionComplete(scorecard) => Some(render_scorecard(scorecard)),
    }
}

pub fn render_scorecard(scorecard: &Scorecard) -> String {
    let mut out = format!(
        "== Scorecard ==\nOverall {:.0} | Confidence {:.0} | Communication {:.0} | Technical {:.0}\n\n{}\n",
        scorecard.overall_score,
        scorecard.confidence_score,
        scorecard.communication_score,
        scorecard.technical_score,
        scorecard.summary
    );
    out.push_str("\nStrengths:\n");
    for s in &scorecard.strengths {
        out.push_str(&format!("  + {s}\n"));
    }
    out.push_str("Improvements:\n");
    for s in &scorecard.improvements {
        out.push_str(&format!("  - {s}\n"));
    }
    let radar = &scorecard.weakness_radar;
    out.push_str(&format!(
        "Radar: clarity {:.0}, structure {:.0}, technical depth {:.0}, confidence {:.0}, relevance {:.0}\n",
        radar.clarity, radar.structure, radar.technical_depth, radar.confidence, radar.relevance
    ));
    for id in InterviewerId::ALL {
        out.push_str(&format!(
            "{}: {}\n",
            name(id),
            scorecard.interviewer_feedback.get(id)
        ));
    }
    out.push_str("Type /new to start another interview or /quit to leave.");
    out
}

/// Feeds typed lines into the speech channel and routes slash commands to the panel.
pub struct Console {
    panel: PanelStateMachine,
    speech: Arc<TranscriptBuffer>,
    spoken: String,
}

impl Console {
    pub fn new(panel: PanelStateMachine, speech: Arc<TranscriptBuffer>) -> Self {
        Self {
            panel,
            speech,
            spoken: String::new(),
        }
    }

    pub fn panel(&self) -> &PanelStateMachine {
        &self.panel
    }

    /// Handles one line of input. Panel misuse is printed for the user;
    /// `Break` means the user asked to quit.
    pub async fn handle(&mut self, input: ConsoleInput) -> ControlFlow<()> {
        let outcome = match input {
            ConsoleInput::Empty => Ok(()),
            ConsoleInput::Help => {
                println!("{HELP}");
                Ok(())
            }
            ConsoleInput::Quit => {
                self.panel.abandon().await;
                return ControlFlow::Break(());
            }
            ConsoleInput::Speech(text) => {
                self.hear(&text).await;
                Ok(())
            }
            ConsoleInput::Mic => self.mic().await,
            ConsoleInput::End => {
                self.spoken.clear();
                self.panel.end().await.map(|_| ())
            }
            ConsoleInput::New => self.new_interview().await,
        };

        if let Err(e) = outcome {
            tracing::debug!("Console command rejected: {}", e);
            println!("({e})");
        }
        ControlFlow::Continue(())
    }

    async fn hear(&mut self, text: &str) {
        if !self.speech.is_listening() {
            match self.panel.snapshot().await.phase {
                Phase::Intro => println!("(type /mic to begin the interview)"),
                Phase::Active => println!("(the mic is off; type /mic to answer)"),
                _ => {}
            }
            return;
        }
        if !self.spoken.is_empty() {
            self.spoken.push(' ');
        }
        self.spoken.push_str(text);
        self.speech.push_interim(&self.spoken);
    }

    async fn mic(&mut self) -> Result<(), PanelError> {
        let phase = self.panel.snapshot().await.phase;
        if phase == Phase::Intro {
            return self.panel.start().await;
        }
        if self.speech.is_listening() {
            let answer = std::mem::take(&mut self.spoken);
            self.speech.push_final(&answer);
        }
        match self.panel.toggle_capture().await? {
            CaptureToggle::Started => println!("(mic on)"),
            CaptureToggle::Stopped { recorded: true } => println!("(answer recorded)"),
            CaptureToggle::Stopped { recorded: false } => println!("(no answer heard)"),
        }
        Ok(())
    }

    async fn new_interview(&mut self) -> Result<(), PanelError> {
        self.spoken.clear();
        self.panel.reset().await
    }
}
