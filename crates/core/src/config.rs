//! Interview and timing configuration shared by every panel runtime.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownVariant {
    kind: &'static str,
    value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum InterviewType {
    #[default]
    Behavioral,
    Technical,
    RapidFire,
    Situational,
    HrBasics,
}

impl InterviewType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InterviewType::Behavioral => "behavioral",
            InterviewType::Technical => "technical",
            InterviewType::RapidFire => "rapid_fire",
            InterviewType::Situational => "situational",
            InterviewType::HrBasics => "hr_basics",
        }
    }
}

impl FromStr for InterviewType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "behavioral" => Ok(InterviewType::Behavioral),
            "technical" => Ok(InterviewType::Technical),
            "rapid_fire" => Ok(InterviewType::RapidFire),
            "situational" => Ok(InterviewType::Situational),
            "hr_basics" => Ok(InterviewType::HrBasics),
            _ => Err(UnknownVariant {
                kind: "interview type",
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for InterviewType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Easy,
    #[default]
    Medium,
    Hard,
}

impl Difficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        }
    }
}

impl FromStr for Difficulty {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "easy" => Ok(Difficulty::Easy),
            "medium" => Ok(Difficulty::Medium),
            "hard" => Ok(Difficulty::Hard),
            _ => Err(UnknownVariant {
                kind: "difficulty",
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What kind of interview the panel runs. Encoded into every question prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct InterviewConfig {
    #[serde(rename = "type")]
    pub interview_type: InterviewType,
    pub difficulty: Difficulty,
}

/// Timing and probability knobs for the turn-taking loop.
#[derive(Debug, Clone, PartialEq)]
pub struct PanelTiming {
    /// Pause after a capture stops before the next speaker is chosen.
    pub settle_delay: Duration,
    /// How long the Interrupter holds the floor before handing back to the Lead.
    pub interrupt_cooldown: Duration,
    /// Period of the interruption clock.
    pub tick_interval: Duration,
    /// A draw above this routes the next question to the Observer.
    pub observer_threshold: f64,
    /// A draw above this lets the Interrupter fire on a tick.
    pub interrupt_threshold: f64,
    /// Interim transcript must be longer than this many characters to be interrupted.
    pub min_interim_chars: usize,
}

impl Default for PanelTiming {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_millis(1500),
            interrupt_cooldown: Duration::from_millis(3000),
            tick_interval: Duration::from_millis(4000),
            observer_threshold: 0.7,
            interrupt_threshold: 0.8,
            min_interim_chars: 20,
        }
    }
}
