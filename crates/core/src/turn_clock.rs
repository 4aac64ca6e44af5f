//! Who speaks next, and when the Interrupter breaks in.

use crate::config::PanelTiming;
use crate::interviewer::InterviewerId;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::VecDeque;
use std::future::Future;
use std::ops::ControlFlow;
use std::time::Duration;
use tokio::task::AbortHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Challenge lines the Interrupter can throw into an open Lead turn.
pub const INTERRUPTIONS: [&str; 8] = [
    "Sorry to jump in, but can you be more specific about your own contribution?",
    "Hold on. What would you have done differently if that had failed?",
    "Let me stop you there. How did you actually measure that outcome?",
    "Wait, that sounds like a team effort. What exactly did you do?",
    "Quick challenge: why was that the right call and not the obvious alternative?",
    "I'm not convinced. Can you give me a number to back that up?",
    "Pause for a second. Who disagreed with you, and how did you handle it?",
    "Let's cut to it. What was the hardest part, honestly?",
];

/// A source of uniform draws in `[0, 1)`.
pub trait Dice: Send {
    fn roll(&mut self) -> f64;

    /// Uniform index in `0..len`. `len` must be non-zero.
    fn pick(&mut self, len: usize) -> usize {
        ((self.roll() * len as f64) as usize).min(len.saturating_sub(1))
    }
}

/// Production dice: ChaCha8, seeded from the OS or a fixed seed for replays.
pub struct SeededDice(ChaCha8Rng);

impl SeededDice {
    pub fn from_seed(seed: u64) -> Self {
        Self(ChaCha8Rng::seed_from_u64(seed))
    }

    pub fn from_entropy() -> Self {
        Self(ChaCha8Rng::from_os_rng())
    }
}

impl Dice for SeededDice {
    fn roll(&mut self) -> f64 {
        self.0.random::<f64>()
    }
}

/// Replays a fixed list of draws, then keeps returning `exhausted`.
#[derive(Debug, Clone)]
pub struct ScriptedDice {
    rolls: VecDeque<f64>,
    exhausted: f64,
}

impl ScriptedDice {
    pub fn new(rolls: impl IntoIterator<Item = f64>) -> Self {
        Self {
            rolls: rolls.into_iter().collect(),
            exhausted: 0.0,
        }
    }

    /// Value returned once the script runs out. Defaults to 0.0, which never
    /// passes a threshold.
    pub fn then(mut self, exhausted: f64) -> Self {
        self.exhausted = exhausted;
        self
    }
}

impl Dice for ScriptedDice {
    fn roll(&mut self) -> f64 {
        self.rolls.pop_front().unwrap_or(self.exhausted)
    }
}

/// The coin flips behind turn selection and interruption.
pub struct TurnPolicy {
    dice: Box<dyn Dice>,
    observer_threshold: f64,
    interrupt_threshold: f64,
    min_interim_chars: usize,
}

impl TurnPolicy {
    pub fn new(dice: Box<dyn Dice>, timing: &PanelTiming) -> Self {
        Self {
            dice,
            observer_threshold: timing.observer_threshold,
            interrupt_threshold: timing.interrupt_threshold,
            min_interim_chars: timing.min_interim_chars,
        }
    }

    /// Picks who asks the next question after an answer is finalized.
    ///
    /// The Interrupter never owns a question. An Observer follow-up always hands
    /// back to the Lead, and an empty answer gives the Observer nothing to ask
    /// about, so neither case consumes a draw.
    pub fn next_speaker(&mut self, current: InterviewerId, answer: &str) -> InterviewerId {
        if current == InterviewerId::Observer || answer.trim().is_empty() {
            return InterviewerId::Lead;
        }
        let roll = self.dice.roll();
        tracing::debug!(roll, threshold = self.observer_threshold, "turn selection draw");
        if roll > self.observer_threshold {
            InterviewerId::Observer
        } else {
            InterviewerId::Lead
        }
    }

    /// One interruption-clock tick. Draws on every call, as the clock ticks
    /// independently of how much has been said.
    pub fn should_interrupt(&mut self, interim_chars: usize) -> bool {
        let roll = self.dice.roll();
        tracing::debug!(roll, interim_chars, "interruption draw");
        roll > self.interrupt_threshold && interim_chars > self.min_interim_chars
    }

    pub fn pick_interruption(&mut self) -> &'static str {
        INTERRUPTIONS[self.dice.pick(INTERRUPTIONS.len())]
    }
}

/// A periodic tick task. The first tick fires one full period after `start`.
/// Stopping (or dropping) the clock aborts the task; it is the only
/// cancellation primitive in the panel.
#[derive(Debug, Default)]
pub struct TurnClock {
    handle: Option<AbortHandle>,
}

impl TurnClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts ticking, replacing any running clock. The task ends on its own
    /// when `on_tick` returns `ControlFlow::Break`.
    pub fn start<F, Fut>(&mut self, every: Duration, mut on_tick: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ControlFlow<()>> + Send + 'static,
    {
        self.stop();
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + every, every);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                if on_tick().await.is_break() {
                    break;
                }
            }
        });
        self.handle = Some(task.abort_handle());
    }

    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for TurnClock {
    fn drop(&mut self) {
        self.stop();
    }
}
