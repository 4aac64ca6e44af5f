use crate::{
    Command,
    config::{InterviewConfig, PanelTiming},
    extract::{Parsed, extract_question},
    feedback::{FeedbackSynthesizer, Scorecard},
    interviewer::InterviewerId,
    oracle::QuestionOracle,
    persistence::{InterviewRecord, InterviewStore},
    prompts::PromptSet,
    speech::{SpeechChannel, SpeechError},
    turn_clock::{Dice, SeededDice, TurnClock, TurnPolicy},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::ops::ControlFlow;
use std::sync::{Arc, Mutex as SyncMutex, MutexGuard};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

/// Asked when the oracle cannot produce an opening question.
pub const OPENING_FALLBACK: &str = "Tell me about a time when you faced a significant challenge at work or school. How did you handle it?";
/// Asked by the Lead when the oracle cannot produce the next main question.
pub const LEAD_FALLBACK: &str = "Can you walk me through another example that shows how you work under pressure?";
/// Asked by the Observer when the oracle cannot produce a follow-up.
pub const OBSERVER_FALLBACK: &str = "Could you expand on that with a specific example?";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Roster and instructions shown; nothing asked yet.
    Intro,
    /// Turn-taking loop running.
    Active,
    /// Feedback synthesis in flight.
    Processing,
    /// Terminal; scorecard available.
    Feedback,
}

/// One finalized question/answer exchange.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Turn {
    pub question: String,
    pub answer: String,
    pub speaker_id: InterviewerId,
    pub answered_at: DateTime<Utc>,
}

/// A challenge injected by the Interrupter into an open Lead turn. Not a turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Interruption {
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub interviewer_id: InterviewerId,
}

/// Working memory of one panel interview attempt.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PanelSession {
    pub phase: Phase,
    pub current_speaker_id: InterviewerId,
    pub current_question: String,
    pub history: Vec<Turn>,
    pub interruptions: Vec<Interruption>,
    pub is_capturing: bool,
    pub scorecard: Option<Scorecard>,
    pub started_at: Option<DateTime<Utc>>,
    // Bumped on every start, end and reset. Deferred work captures the value it
    // was spawned under and drops its result if the session has moved on.
    #[serde(skip)]
    generation: u64,
    // Bumped on every finalized answer. A next question is only applied while
    // no newer answer has been finalized.
    #[serde(skip)]
    turn: u64,
}

impl Default for PanelSession {
    fn default() -> Self {
        Self::new()
    }
}

impl PanelSession {
    pub fn new() -> Self {
        Self::with_generation(0)
    }

    fn with_generation(generation: u64) -> Self {
        Self {
            phase: Phase::Intro,
            current_speaker_id: InterviewerId::Lead,
            current_question: String::new(),
            history: Vec::new(),
            interruptions: Vec::new(),
            is_capturing: false,
            scorecard: None,
            started_at: None,
            generation,
            turn: 0,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn is_live(&self, generation: u64) -> bool {
        self.generation == generation && self.phase == Phase::Active
    }

    fn is_current(&self, generation: u64, turn: u64) -> bool {
        self.is_live(generation) && self.turn == turn
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PanelError {
    #[error("cannot {operation} while the panel is in the {phase:?} phase")]
    WrongPhase { operation: &'static str, phase: Phase },
    #[error(transparent)]
    Speech(#[from] SpeechError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureToggle {
    Started,
    /// `recorded` is false when the final transcript was empty.
    Stopped { recorded: bool },
}

struct Shared {
    session: Mutex<PanelSession>,
    policy: SyncMutex<TurnPolicy>,
    clock: SyncMutex<TurnClock>,
    pending: SyncMutex<Vec<JoinHandle<()>>>,
    oracle: Arc<dyn QuestionOracle>,
    speech: Arc<dyn SpeechChannel>,
    synthesizer: FeedbackSynthesizer,
    prompts: PromptSet,
    timing: PanelTiming,
    interview: InterviewConfig,
    commands: mpsc::Sender<Command>,
    store: Option<Arc<dyn InterviewStore>>,
    user_id: String,
}

fn lock<T>(mutex: &SyncMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Builds a [`PanelStateMachine`]. Everything except the oracle, the speech
/// channel and the command sink has a default.
pub struct PanelBuilder {
    oracle: Arc<dyn QuestionOracle>,
    speech: Arc<dyn SpeechChannel>,
    commands: mpsc::Sender<Command>,
    timing: PanelTiming,
    interview: InterviewConfig,
    prompts: PromptSet,
    dice: Option<Box<dyn Dice>>,
    store: Option<Arc<dyn InterviewStore>>,
    user_id: String,
}

impl PanelBuilder {
    pub fn with_timing(mut self, timing: PanelTiming) -> Self {
        self.timing = timing;
        self
    }

    pub fn with_interview(mut self, interview: InterviewConfig) -> Self {
        self.interview = interview;
        self
    }

    pub fn with_prompts(mut self, prompts: PromptSet) -> Self {
        self.prompts = prompts;
        self
    }

    pub fn with_dice(mut self, dice: Box<dyn Dice>) -> Self {
        self.dice = Some(dice);
        self
    }

    /// Finished interviews are handed to `store` under `user_id`.
    pub fn with_store(mut self, store: Arc<dyn InterviewStore>, user_id: impl Into<String>) -> Self {
        self.store = Some(store);
        self.user_id = user_id.into();
        self
    }

    pub fn build(self) -> PanelStateMachine {
        let dice = self
            .dice
            .unwrap_or_else(|| Box::new(SeededDice::from_entropy()));
        let policy = TurnPolicy::new(dice, &self.timing);
        let synthesizer = FeedbackSynthesizer::new(self.oracle.clone(), self.prompts.clone());
        PanelStateMachine {
            shared: Arc::new(Shared {
                session: Mutex::new(PanelSession::new()),
                policy: SyncMutex::new(policy),
                clock: SyncMutex::new(TurnClock::new()),
                pending: SyncMutex::new(Vec::new()),
                oracle: self.oracle,
                speech: self.speech,
                synthesizer,
                prompts: self.prompts,
                timing: self.timing,
                interview: self.interview,
                commands: self.commands,
                store: self.store,
                user_id: self.user_id,
            }),
        }
    }
}

/// Drives one panel interview: Lead, Interrupter and Observer against a single
/// speech channel.
///
/// The machine is the only writer of the session. Deferred work (next-question
/// generation after the settle delay, interruption cooldowns, clock ticks) runs
/// as spawned tasks that re-check the session generation before applying
/// anything, so results that land after an end or reset are dropped. Next
/// questions also carry the turn they answer; one that arrives after a newer
/// answer was finalized is dropped too.
#[derive(Clone)]
pub struct PanelStateMachine {
    shared: Arc<Shared>,
}

impl PanelStateMachine {
    pub fn builder(
        oracle: Arc<dyn QuestionOracle>,
        speech: Arc<dyn SpeechChannel>,
        commands: mpsc::Sender<Command>,
    ) -> PanelBuilder {
        PanelBuilder {
            oracle,
            speech,
            commands,
            timing: PanelTiming::default(),
            interview: InterviewConfig::default(),
            prompts: PromptSet::default(),
            dice: None,
            store: None,
            user_id: "anonymous".to_string(),
        }
    }

    pub async fn snapshot(&self) -> PanelSession {
        self.shared.session.lock().await.clone()
    }

    /// Whether capture controls should be offered at all.
    pub fn speech_supported(&self) -> bool {
        self.shared.speech.is_supported()
    }

    /// Intro -> Active. Asks the Lead's opening question and starts the
    /// interruption clock. Oracle failure falls back to [`OPENING_FALLBACK`].
    pub async fn start(&self) -> Result<(), PanelError> {
        let (generation, turn) = {
            let mut session = self.shared.session.lock().await;
            if session.phase != Phase::Intro {
                return Err(PanelError::WrongPhase {
                    operation: "start",
                    phase: session.phase,
                });
            }
            *session = PanelSession::with_generation(session.generation + 1);
            session.phase = Phase::Active;
            session.started_at = Some(Utc::now());
            self.shared.start_clock(session.generation);
            (session.generation, session.turn)
        };
        tracing::info!(generation, "Panel interview started ({:?})", self.shared.interview);
        self.shared.emit(Command::PhaseChanged {
            phase: Phase::Active,
        });

        let prompt = self.shared.prompts.opening(&self.shared.interview);
        let question = self.shared.ask(&prompt, OPENING_FALLBACK).await;
        self.shared
            .apply_question(generation, turn, InterviewerId::Lead, question)
            .await;
        Ok(())
    }

    /// Opens the speech channel, or closes it and finalizes the answer.
    ///
    /// Closing records a turn when the final transcript is non-empty, then
    /// schedules next-speaker selection after the settle delay.
    pub async fn toggle_capture(&self) -> Result<CaptureToggle, PanelError> {
        let mut session = self.shared.session.lock().await;
        if session.phase != Phase::Active {
            return Err(PanelError::WrongPhase {
                operation: "toggle capture",
                phase: session.phase,
            });
        }

        let speech = &self.shared.speech;
        if !session.is_capturing {
            speech.reset();
            speech.start()?;
            session.is_capturing = true;
            tracing::debug!("Capture opened for: {}", session.current_question);
            return Ok(CaptureToggle::Started);
        }

        speech.stop();
        session.is_capturing = false;
        let answer = speech.final_transcript().trim().to_string();
        // The Interrupter only ever rides on a Lead turn.
        let asked_by = match session.current_speaker_id {
            InterviewerId::Interrupter => InterviewerId::Lead,
            speaker => speaker,
        };
        let question = session.current_question.clone();
        let recorded = !answer.is_empty();
        if recorded {
            session.history.push(Turn {
                question: question.clone(),
                answer: answer.clone(),
                speaker_id: asked_by,
                answered_at: Utc::now(),
            });
            tracing::info!(
                turn = session.history.len(),
                speaker = %asked_by,
                "Answer recorded ({} chars)",
                answer.len()
            );
        } else {
            tracing::info!("Capture closed with an empty transcript; nothing recorded");
        }
        session.turn += 1;
        let (generation, turn) = (session.generation, session.turn);
        drop(session);

        let shared = self.shared.clone();
        self.shared.track(tokio::spawn(async move {
            shared
                .advance_turn(generation, turn, asked_by, question, answer)
                .await;
        }));
        Ok(CaptureToggle::Stopped { recorded })
    }

    /// Active -> Processing -> Feedback. Any open capture is discarded, not
    /// recorded. Always produces a scorecard; synthesis failure yields the
    /// fallback one.
    pub async fn end(&self) -> Result<Scorecard, PanelError> {
        let (generation, history, interruptions, started_at) = {
            let mut session = self.shared.session.lock().await;
            if session.phase != Phase::Active {
                return Err(PanelError::WrongPhase {
                    operation: "end",
                    phase: session.phase,
                });
            }
            lock(&self.shared.clock).stop();
            if session.is_capturing {
                self.shared.speech.stop();
                self.shared.speech.reset();
                session.is_capturing = false;
                tracing::info!("Discarding the unanswered question: {}", session.current_question);
            }
            session.generation += 1;
            session.phase = Phase::Processing;
            (
                session.generation,
                session.history.clone(),
                session.interruptions.clone(),
                session.started_at.unwrap_or_else(Utc::now),
            )
        };
        tracing::info!(
            turns = history.len(),
            interruptions = interruptions.len(),
            "Panel interview ended, synthesizing feedback"
        );
        self.shared.emit(Command::PhaseChanged {
            phase: Phase::Processing,
        });

        let scorecard = self
            .shared
            .synthesizer
            .synthesize(&history, interruptions.len())
            .await;

        {
            let mut session = self.shared.session.lock().await;
            if session.generation != generation || session.phase != Phase::Processing {
                tracing::info!("Panel was abandoned during feedback synthesis; dropping scorecard");
                return Ok(scorecard);
            }
            session.scorecard = Some(scorecard.clone());
            session.phase = Phase::Feedback;
        }
        self.shared.emit(Command::PhaseChanged {
            phase: Phase::Feedback,
        });
        self.shared
            .emit(Command::SessionComplete(Box::new(scorecard.clone())));

        if let Some(store) = self.shared.store.clone() {
            let record = InterviewRecord::from_panel(
                &self.shared.user_id,
                &self.shared.interview,
                &history,
                &interruptions,
                &scorecard,
                started_at,
                Utc::now(),
            );
            self.shared.track(tokio::spawn(async move {
                match store.save(&record).await {
                    Ok(()) => tracing::info!("Interview saved"),
                    Err(e) => tracing::warn!("Failed to save interview: {:#}", e),
                }
            }));
        }

        Ok(scorecard)
    }

    /// "Start new interview": Feedback -> Intro with an empty session.
    pub async fn reset(&self) -> Result<(), PanelError> {
        let mut session = self.shared.session.lock().await;
        if session.phase != Phase::Feedback {
            return Err(PanelError::WrongPhase {
                operation: "reset",
                phase: session.phase,
            });
        }
        *session = PanelSession::with_generation(session.generation + 1);
        drop(session);
        tracing::info!("Panel reset for a new interview");
        self.shared.emit(Command::PhaseChanged {
            phase: Phase::Intro,
        });
        Ok(())
    }

    /// Tears the session down from any phase (the user navigated away).
    pub async fn abandon(&self) {
        let mut session = self.shared.session.lock().await;
        lock(&self.shared.clock).stop();
        if session.is_capturing {
            self.shared.speech.stop();
            self.shared.speech.reset();
        }
        let previous = session.phase;
        *session = PanelSession::with_generation(session.generation + 1);
        drop(session);
        tracing::info!("Panel abandoned from the {:?} phase", previous);
        self.shared.emit(Command::PhaseChanged {
            phase: Phase::Intro,
        });
    }

    /// Waits for all deferred work spawned so far (next-question generation,
    /// interview hand-off) to finish.
    pub async fn settled(&self) {
        loop {
            let handles = std::mem::take(&mut *lock(&self.shared.pending));
            if handles.is_empty() {
                return;
            }
            for handle in handles {
                if let Err(e) = handle.await {
                    tracing::error!("Panel task failed: {}", e);
                }
            }
        }
    }
}

impl Shared {
    fn emit(&self, command: Command) {
        if let Err(e) = self.commands.try_send(command) {
            tracing::warn!("Dropped panel command: {}", e);
        }
    }

    fn track(&self, handle: JoinHandle<()>) {
        let mut pending = lock(&self.pending);
        pending.retain(|h| !h.is_finished());
        pending.push(handle);
    }

    fn start_clock(self: &Arc<Self>, generation: u64) {
        let weak = Arc::downgrade(self);
        lock(&self.clock).start(self.timing.tick_interval, move || {
            let weak = weak.clone();
            async move {
                match weak.upgrade() {
                    Some(shared) => shared.on_tick(generation).await,
                    None => ControlFlow::Break(()),
                }
            }
        });
    }

    /// Asks the oracle for a question. Never fails.
    async fn ask(&self, prompt: &str, fallback: &str) -> String {
        tracing::debug!("Question prompt:\n{}", prompt);
        match self.oracle.complete(prompt).await {
            Ok(raw) => match extract_question(&raw) {
                Parsed::Value(question) => question,
                Parsed::Failed(failure) => {
                    tracing::warn!("{}; using fallback question", failure);
                    fallback.to_string()
                }
            },
            Err(e) => {
                tracing::warn!("Question oracle failed, using fallback question: {:#}", e);
                fallback.to_string()
            }
        }
    }

    async fn apply_question(
        &self,
        generation: u64,
        turn: u64,
        speaker: InterviewerId,
        question: String,
    ) {
        {
            let mut session = self.session.lock().await;
            if !session.is_current(generation, turn) {
                tracing::debug!("Discarding stale question: {}", question);
                return;
            }
            if session.current_question == question {
                tracing::debug!("Oracle repeated the current question");
            }
            session.current_question = question.clone();
            session.current_speaker_id = speaker;
        }
        tracing::info!("{} asks: {}", speaker.interviewer().name, question);
        self.emit(Command::SpeakerChanged { speaker });
        self.emit(Command::QuestionChanged {
            speaker,
            question: question.clone(),
        });
        self.emit(Command::SpeakText {
            speaker,
            text: question,
        });
    }

    async fn advance_turn(
        &self,
        generation: u64,
        turn: u64,
        asked_by: InterviewerId,
        question: String,
        answer: String,
    ) {
        tokio::time::sleep(self.timing.settle_delay).await;
        if !self.session.lock().await.is_current(generation, turn) {
            tracing::debug!(turn, "A newer answer superseded this turn");
            return;
        }

        let next = lock(&self.policy).next_speaker(asked_by, &answer);
        let (prompt, fallback) = match next {
            InterviewerId::Observer => (self.prompts.observer_followup(&answer), OBSERVER_FALLBACK),
            _ => (
                self.prompts
                    .continuation(&self.interview, &question, &answer),
                LEAD_FALLBACK,
            ),
        };
        tracing::debug!(from = %asked_by, to = %next, "Turn selected");

        let next_question = self.ask(&prompt, fallback).await;
        self.apply_question(generation, turn, next, next_question)
            .await;
    }

    async fn on_tick(self: &Arc<Self>, generation: u64) -> ControlFlow<()> {
        let mut session = self.session.lock().await;
        if !session.is_live(generation) {
            return ControlFlow::Break(());
        }
        if !session.is_capturing || session.current_speaker_id != InterviewerId::Lead {
            return ControlFlow::Continue(());
        }

        let interim_chars = self.speech.interim_transcript().chars().count();
        let message = {
            let mut policy = lock(&self.policy);
            if !policy.should_interrupt(interim_chars) {
                return ControlFlow::Continue(());
            }
            policy.pick_interruption()
        };

        let interruption = Interruption {
            timestamp: Utc::now(),
            message: message.to_string(),
            interviewer_id: InterviewerId::Interrupter,
        };
        session.interruptions.push(interruption.clone());
        session.current_speaker_id = InterviewerId::Interrupter;
        drop(session);

        tracing::info!("Interrupter cuts in: {}", message);
        self.emit(Command::Interrupted(interruption));
        self.emit(Command::SpeakerChanged {
            speaker: InterviewerId::Interrupter,
        });
        self.emit(Command::SpeakText {
            speaker: InterviewerId::Interrupter,
            text: message.to_string(),
        });

        let shared = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(shared.timing.interrupt_cooldown).await;
            let mut session = shared.session.lock().await;
            if session.is_live(generation)
                && session.current_speaker_id == InterviewerId::Interrupter
            {
                session.current_speaker_id = InterviewerId::Lead;
                drop(session);
                shared.emit(Command::SpeakerChanged {
                    speaker: InterviewerId::Lead,
                });
            }
        });
        ControlFlow::Continue(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::{MockQuestionOracle, UNREACHABLE_CONTEXT};
    use crate::persistence::MockInterviewStore;
    use crate::speech::TranscriptBuffer;
    use crate::turn_clock::{INTERRUPTIONS, ScriptedDice};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const LONG_INTERIM: &str = "So the first thing I did was sit down with each engineer";

    struct Harness {
        panel: PanelStateMachine,
        speech: Arc<TranscriptBuffer>,
        commands: mpsc::Receiver<Command>,
    }

    fn harness(oracle: impl QuestionOracle + 'static, dice: ScriptedDice) -> Harness {
        harness_with(oracle, dice, |b| b)
    }

    fn harness_with(
        oracle: impl QuestionOracle + 'static,
        dice: ScriptedDice,
        configure: impl FnOnce(PanelBuilder) -> PanelBuilder,
    ) -> Harness {
        let speech = Arc::new(TranscriptBuffer::new());
        let (tx, rx) = mpsc::channel(256);
        let builder = PanelStateMachine::builder(Arc::new(oracle), speech.clone(), tx)
            .with_dice(Box::new(dice));
        Harness {
            panel: configure(builder).build(),
            speech,
            commands: rx,
        }
    }

    fn down_oracle() -> MockQuestionOracle {
        let mut oracle = MockQuestionOracle::new();
        oracle.expect_complete().returning(|_| {
            Err(anyhow::anyhow!("Connection refused (os error 111)")
                .context(format!("{UNREACHABLE_CONTEXT} at http://localhost:11434/api/generate")))
        });
        oracle
    }

    /// Answers every prompt with a distinct question and records the prompts.
    fn counting_oracle(prompts: Arc<SyncMutex<Vec<String>>>) -> MockQuestionOracle {
        let counter = AtomicUsize::new(0);
        let mut oracle = MockQuestionOracle::new();
        oracle.expect_complete().returning(move |prompt| {
            prompts.lock().unwrap().push(prompt.to_string());
            let n = counter.fetch_add(1, Ordering::SeqCst);
            Ok(format!("Sure! Question {n}: what did you learn from project {n}?"))
        });
        oracle
    }

    async fn answer(h: &Harness, text: &str) {
        assert_eq!(h.panel.toggle_capture().await.unwrap(), CaptureToggle::Started);
        h.speech.push_final(text);
        h.panel.toggle_capture().await.unwrap();
    }

    fn drain(rx: &mut mpsc::Receiver<Command>) -> Vec<Command> {
        let mut out = Vec::new();
        while let Ok(command) = rx.try_recv() {
            out.push(command);
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn end_to_end_with_oracle_down() {
        let h = harness(down_oracle(), ScriptedDice::new([]));

        h.panel.start().await.unwrap();
        let session = h.panel.snapshot().await;
        assert_eq!(session.phase, Phase::Active);
        assert_eq!(session.current_question, OPENING_FALLBACK);
        assert_eq!(session.current_speaker_id, InterviewerId::Lead);

        answer(&h, "I led a team of five").await;
        let session = h.panel.snapshot().await;
        assert_eq!(session.history.len(), 1);
        assert_eq!(session.history[0].question, OPENING_FALLBACK);
        assert_eq!(session.history[0].answer, "I led a team of five");
        assert_eq!(session.history[0].speaker_id, InterviewerId::Lead);

        let scorecard = h.panel.end().await.unwrap();
        assert_eq!(scorecard.overall_score, 0.0);
        assert!(scorecard.summary.contains("unreachable"));

        let session = h.panel.snapshot().await;
        assert_eq!(session.phase, Phase::Feedback);
        assert_eq!(session.scorecard, Some(scorecard));
    }

    #[tokio::test(start_paused = true)]
    async fn history_appends_in_completion_order() {
        let prompts = Arc::new(SyncMutex::new(Vec::new()));
        let h = harness(counting_oracle(prompts.clone()), ScriptedDice::new([]));
        h.panel.start().await.unwrap();

        let mut asked = Vec::new();
        for i in 0..4 {
            let before = h.panel.snapshot().await.current_question;
            asked.push(before.clone());
            answer(&h, &format!("answer number {i}")).await;
            h.panel.settled().await;
            let after = h.panel.snapshot().await.current_question;
            assert_ne!(before, after, "a fresh oracle question must replace the old one");
        }

        let session = h.panel.snapshot().await;
        assert_eq!(session.history.len(), 4);
        for (i, turn) in session.history.iter().enumerate() {
            assert_eq!(turn.question, asked[i]);
            assert_eq!(turn.answer, format!("answer number {i}"));
            assert_eq!(turn.speaker_id, InterviewerId::Lead);
        }
        assert_eq!(asked[0], "what did you learn from project 0?");

        let prompts = prompts.lock().unwrap();
        assert_eq!(prompts.len(), 5);
        assert!(prompts[1].contains("answer number 0"));
        assert!(prompts[1].contains(&asked[0]));
    }

    #[tokio::test(start_paused = true)]
    async fn empty_transcript_records_nothing_but_moves_on() {
        let prompts = Arc::new(SyncMutex::new(Vec::new()));
        let h = harness(counting_oracle(prompts), ScriptedDice::new([0.99]));
        h.panel.start().await.unwrap();

        h.panel.toggle_capture().await.unwrap();
        let stopped = h.panel.toggle_capture().await.unwrap();
        assert_eq!(stopped, CaptureToggle::Stopped { recorded: false });
        h.panel.settled().await;

        let session = h.panel.snapshot().await;
        assert!(session.history.is_empty());
        // No answer to follow up on, so the Lead keeps the floor.
        assert_eq!(session.current_speaker_id, InterviewerId::Lead);
        assert_eq!(session.current_question, "what did you learn from project 1?");
    }

    #[tokio::test(start_paused = true)]
    async fn observer_follows_up_on_the_last_answer_only() {
        let prompts = Arc::new(SyncMutex::new(Vec::new()));
        let h = harness(counting_oracle(prompts.clone()), ScriptedDice::new([0.9, 0.95]));
        h.panel.start().await.unwrap();
        let opening = h.panel.snapshot().await.current_question;

        answer(&h, "We rewrote the billing service in Rust").await;
        h.panel.settled().await;
        let session = h.panel.snapshot().await;
        assert_eq!(session.current_speaker_id, InterviewerId::Observer);
        {
            let prompts = prompts.lock().unwrap();
            let observer_prompt = &prompts[1];
            assert!(observer_prompt.contains("We rewrote the billing service in Rust"));
            assert!(!observer_prompt.contains(&opening));
        }

        // Second answer goes back to the Lead without drawing, even though 0.95 is queued.
        answer(&h, "About four months").await;
        h.panel.settled().await;
        let session = h.panel.snapshot().await;
        assert_eq!(session.current_speaker_id, InterviewerId::Lead);
        assert_eq!(session.history[1].speaker_id, InterviewerId::Observer);

        // The queued draw is used on the next Lead answer.
        answer(&h, "Latency dropped by half").await;
        h.panel.settled().await;
        assert_eq!(
            h.panel.snapshot().await.current_speaker_id,
            InterviewerId::Observer
        );
    }

    #[tokio::test(start_paused = true)]
    async fn interruptions_annotate_without_touching_history() {
        let mut oracle = MockQuestionOracle::new();
        oracle
            .expect_complete()
            .returning(|_| Ok("Tell me about your biggest failure?".to_string()));
        // Three ticks fire: (draw, pick) pairs. Afterwards the script is exhausted (0.0).
        let dice = ScriptedDice::new([0.9, 0.0, 0.85, 0.5, 0.99, 0.999]);
        let mut h = harness(oracle, dice);
        h.panel.start().await.unwrap();

        h.panel.toggle_capture().await.unwrap();
        h.speech.push_interim(LONG_INTERIM);

        // Ticks at 4s, 8s and 12s; each cooldown (3s) ends before the next tick.
        tokio::time::sleep(Duration::from_millis(12_500)).await;
        let session = h.panel.snapshot().await;
        assert_eq!(session.interruptions.len(), 3);
        assert!(session.history.is_empty());
        assert!(session.is_capturing);
        assert!(h.speech.is_listening());
        assert_eq!(session.current_speaker_id, InterviewerId::Interrupter);
        assert_eq!(session.interruptions[0].message, INTERRUPTIONS[0]);
        assert_eq!(session.interruptions[1].message, INTERRUPTIONS[4]);
        assert_eq!(session.interruptions[2].message, INTERRUPTIONS[7]);
        assert!(
            session
                .interruptions
                .iter()
                .all(|i| i.interviewer_id == InterviewerId::Interrupter)
        );

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(
            h.panel.snapshot().await.current_speaker_id,
            InterviewerId::Lead
        );

        let spoken_by_interrupter = drain(&mut h.commands)
            .into_iter()
            .filter(|c| {
                matches!(
                    c,
                    Command::SpeakText {
                        speaker: InterviewerId::Interrupter,
                        ..
                    }
                )
            })
            .count();
        assert_eq!(spoken_by_interrupter, 3);

        // The answer still finalizes as the Lead's turn.
        h.speech.push_final(LONG_INTERIM);
        h.panel.toggle_capture().await.unwrap();
        let session = h.panel.snapshot().await;
        assert_eq!(session.history.len(), 1);
        assert_eq!(session.history[0].speaker_id, InterviewerId::Lead);
        assert_eq!(session.interruptions.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn no_interruptions_on_short_interim_or_observer_turns() {
        let prompts = Arc::new(SyncMutex::new(Vec::new()));
        let h = harness(counting_oracle(prompts), ScriptedDice::new([0.9]).then(0.95));
        h.panel.start().await.unwrap();

        // First answer routes to the Observer (0.9) well before the first tick.
        answer(&h, "We cut costs by a third").await;
        h.panel.settled().await;
        assert_eq!(
            h.panel.snapshot().await.current_speaker_id,
            InterviewerId::Observer
        );

        h.panel.toggle_capture().await.unwrap();
        h.speech.push_interim(LONG_INTERIM);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(h.panel.snapshot().await.interruptions.is_empty());

        h.speech.push_final("By renegotiating vendor contracts");
        h.panel.toggle_capture().await.unwrap();
        h.panel.settled().await;
        assert_eq!(
            h.panel.snapshot().await.current_speaker_id,
            InterviewerId::Lead
        );

        // Lead turn, but the interim transcript is too short to interrupt.
        h.panel.toggle_capture().await.unwrap();
        h.speech.push_interim("Well");
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(h.panel.snapshot().await.interruptions.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn end_discards_the_open_capture() {
        let h = harness(down_oracle(), ScriptedDice::new([]));
        h.panel.start().await.unwrap();
        answer(&h, "First answer").await;

        h.panel.toggle_capture().await.unwrap();
        h.speech.push_final("half an answer");
        h.panel.end().await.unwrap();

        let session = h.panel.snapshot().await;
        assert_eq!(session.history.len(), 1);
        assert!(!session.is_capturing);
        assert!(!h.speech.is_listening());
        assert_eq!(session.phase, Phase::Feedback);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_always_yields_a_clean_intro() {
        let h = harness(down_oracle(), ScriptedDice::new([0.9, 0.0]).then(0.3));
        h.panel.start().await.unwrap();
        h.panel.toggle_capture().await.unwrap();
        h.speech.push_interim(LONG_INTERIM);
        tokio::time::sleep(Duration::from_millis(4_100)).await;
        h.speech.push_final(LONG_INTERIM);
        h.panel.toggle_capture().await.unwrap();
        for i in 0..3 {
            answer(&h, &format!("answer {i}")).await;
        }
        h.panel.end().await.unwrap();
        let before = h.panel.snapshot().await;
        assert_eq!(before.history.len(), 4);
        assert_eq!(before.interruptions.len(), 1);

        h.panel.reset().await.unwrap();
        let session = h.panel.snapshot().await;
        assert_eq!(session.phase, Phase::Intro);
        assert!(session.history.is_empty());
        assert!(session.interruptions.is_empty());
        assert_eq!(session.current_speaker_id, InterviewerId::Lead);
        assert!(session.scorecard.is_none());
        assert!(session.generation() > before.generation());

        // Resetting again is refused; the session stays clean.
        assert!(matches!(
            h.panel.reset().await,
            Err(PanelError::WrongPhase {
                phase: Phase::Intro,
                ..
            })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn operations_are_gated_by_phase() {
        let h = harness(down_oracle(), ScriptedDice::new([]));
        assert!(matches!(
            h.panel.toggle_capture().await,
            Err(PanelError::WrongPhase { .. })
        ));
        assert!(matches!(h.panel.end().await, Err(PanelError::WrongPhase { .. })));
        h.panel.start().await.unwrap();
        assert!(matches!(
            h.panel.start().await,
            Err(PanelError::WrongPhase {
                phase: Phase::Active,
                ..
            })
        ));
        assert!(matches!(h.panel.reset().await, Err(PanelError::WrongPhase { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn unsupported_speech_leaves_machine_running() {
        let speech = Arc::new(TranscriptBuffer::unsupported());
        let (tx, _rx) = mpsc::channel(16);
        let panel = PanelStateMachine::builder(Arc::new(down_oracle()), speech, tx)
            .with_dice(Box::new(ScriptedDice::new([])))
            .build();
        assert!(!panel.speech_supported());
        panel.start().await.unwrap();

        let err = panel.toggle_capture().await.unwrap_err();
        assert!(matches!(err, PanelError::Speech(SpeechError::Unsupported)));
        let session = panel.snapshot().await;
        assert_eq!(session.phase, Phase::Active);
        assert!(!session.is_capturing);
        assert!(panel.end().await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn pending_question_is_dropped_after_abandon() {
        let prompts = Arc::new(SyncMutex::new(Vec::new()));
        let h = harness(counting_oracle(prompts.clone()), ScriptedDice::new([]));
        h.panel.start().await.unwrap();
        answer(&h, "An answer that schedules a follow-up").await;

        h.panel.abandon().await;
        h.panel.start().await.unwrap();
        let fresh_opening = h.panel.snapshot().await.current_question;
        h.panel.settled().await;

        let session = h.panel.snapshot().await;
        assert_eq!(session.current_question, fresh_opening);
        assert!(session.history.is_empty());
        // Two openings; the stale follow-up never reached the oracle.
        assert_eq!(prompts.lock().unwrap().len(), 2);
    }

    /// Takes five seconds per completion.
    struct SlowOracle {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl QuestionOracle for SlowOracle {
        async fn complete(&self, _prompt: &str) -> anyhow::Result<String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(format!("Slow question {n}?"))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn late_question_is_dropped_after_end() {
        let h = harness(
            SlowOracle {
                calls: AtomicUsize::new(0),
            },
            ScriptedDice::new([]),
        );
        h.panel.start().await.unwrap();
        assert_eq!(h.panel.snapshot().await.current_question, "Slow question 0?");

        // Follow-up generation starts after the settle delay and is still in flight
        // when the interview ends.
        answer(&h, "Something worth following up").await;
        tokio::time::sleep(Duration::from_secs(2)).await;
        let scorecard = h.panel.end().await.unwrap();
        h.panel.settled().await;

        let session = h.panel.snapshot().await;
        assert_eq!(session.phase, Phase::Feedback);
        assert_eq!(session.current_question, "Slow question 0?");
        assert_eq!(scorecard.overall_score, 0.0);
    }

    /// Answers the opening at once, the first follow-up after ten seconds and
    /// every later one after one second.
    struct StaggeredOracle {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl QuestionOracle for StaggeredOracle {
        async fn complete(&self, _prompt: &str) -> anyhow::Result<String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            let delay = match n {
                0 => Duration::ZERO,
                1 => Duration::from_secs(10),
                _ => Duration::from_secs(1),
            };
            tokio::time::sleep(delay).await;
            Ok(format!("Question {n}?"))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_follow_up_never_replaces_a_newer_one() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut h = harness(
            StaggeredOracle {
                calls: calls.clone(),
            },
            ScriptedDice::new([]),
        );
        h.panel.start().await.unwrap();
        assert_eq!(h.panel.snapshot().await.current_question, "Question 0?");

        // The first follow-up is in flight when the second answer lands.
        answer(&h, "first answer").await;
        tokio::time::sleep(Duration::from_secs(2)).await;
        answer(&h, "second answer").await;
        h.panel.settled().await;

        let session = h.panel.snapshot().await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(session.current_question, "Question 2?");
        assert_eq!(session.history.len(), 2);
        assert_eq!(session.history[1].answer, "second answer");
        assert!(!drain(&mut h.commands).iter().any(|c| matches!(
            c,
            Command::QuestionChanged { question, .. } if question == "Question 1?"
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn answers_inside_the_settle_delay_ask_only_once() {
        let prompts = Arc::new(SyncMutex::new(Vec::new()));
        let h = harness(counting_oracle(prompts.clone()), ScriptedDice::new([]));
        h.panel.start().await.unwrap();

        answer(&h, "first answer").await;
        answer(&h, "second answer").await;
        h.panel.settled().await;

        assert_eq!(
            h.panel.snapshot().await.current_question,
            "what did you learn from project 1?"
        );
        let prompts = prompts.lock().unwrap();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[1].contains("second answer"));
    }

    #[tokio::test(start_paused = true)]
    async fn finished_interview_is_handed_to_the_store() {
        let mut store = MockInterviewStore::new();
        store
            .expect_save()
            .withf(|record: &InterviewRecord| {
                record.user_id == "user-42"
                    && record.answers.len() == 1
                    && record.answers[0].text == "I led a team of five"
                    && record.feedback.overall_score == 0.0
            })
            .times(1)
            .returning(|_| Ok(()));
        let h = harness_with(down_oracle(), ScriptedDice::new([]), |b| {
            b.with_store(Arc::new(store), "user-42")
        });

        h.panel.start().await.unwrap();
        answer(&h, "I led a team of five").await;
        h.panel.end().await.unwrap();
        h.panel.settled().await;
    }

    #[tokio::test(start_paused = true)]
    async fn store_failure_does_not_change_the_session() {
        let mut store = MockInterviewStore::new();
        store
            .expect_save()
            .times(1)
            .returning(|_| Err(anyhow::anyhow!("Failed to reach interview API")));
        let h = harness_with(down_oracle(), ScriptedDice::new([]), |b| {
            b.with_store(Arc::new(store), "user-42")
        });

        h.panel.start().await.unwrap();
        h.panel.end().await.unwrap();
        h.panel.settled().await;
        assert_eq!(h.panel.snapshot().await.phase, Phase::Feedback);
    }

    #[tokio::test(start_paused = true)]
    async fn commands_follow_the_lifecycle() {
        let mut h = harness(down_oracle(), ScriptedDice::new([]));
        h.panel.start().await.unwrap();
        let commands = drain(&mut h.commands);
        assert!(matches!(
            commands[0],
            Command::PhaseChanged {
                phase: Phase::Active
            }
        ));
        assert!(commands.iter().any(|c| matches!(
            c,
            Command::SpeakText { speaker: InterviewerId::Lead, text } if text == OPENING_FALLBACK
        )));

        h.panel.end().await.unwrap();
        let commands = drain(&mut h.commands);
        assert!(matches!(
            commands.last(),
            Some(Command::SessionComplete(scorecard)) if scorecard.overall_score == 0.0
        ));
    }
}
