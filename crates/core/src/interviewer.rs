use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies one of the three panel personas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterviewerId {
    Lead,
    Interrupter,
    Observer,
}

impl InterviewerId {
    pub const ALL: [InterviewerId; 3] = [
        InterviewerId::Lead,
        InterviewerId::Interrupter,
        InterviewerId::Observer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            InterviewerId::Lead => "lead",
            InterviewerId::Interrupter => "interrupter",
            InterviewerId::Observer => "observer",
        }
    }

    /// The persona record behind this id.
    pub fn interviewer(&self) -> &'static Interviewer {
        match self {
            InterviewerId::Lead => &PANEL[0],
            InterviewerId::Interrupter => &PANEL[1],
            InterviewerId::Observer => &PANEL[2],
        }
    }
}

impl fmt::Display for InterviewerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a persona behaves during the interview.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InterviewerRole {
    /// Asks the primary questions and drives the flow.
    Main,
    /// Breaks into an open Lead turn with a challenge.
    Interrupt,
    /// Listens and asks short clarifying follow-ups.
    Observe,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Interviewer {
    pub id: InterviewerId,
    pub name: &'static str,
    pub title: &'static str,
    pub role: InterviewerRole,
    pub description: &'static str,
}

/// The fixed panel. Built once, never mutated.
pub static PANEL: [Interviewer; 3] = [
    Interviewer {
        id: InterviewerId::Lead,
        name: "Sarah",
        title: "Lead Interviewer",
        role: InterviewerRole::Main,
        description: "Asks main questions and guides the interview flow",
    },
    Interviewer {
        id: InterviewerId::Interrupter,
        name: "Mike",
        title: "The Challenger",
        role: InterviewerRole::Interrupt,
        description: "Throws curveballs and challenges your answers",
    },
    Interviewer {
        id: InterviewerId::Observer,
        name: "Lisa",
        title: "The Observer",
        role: InterviewerRole::Observe,
        description: "Listens carefully and asks follow-up questions",
    },
];
