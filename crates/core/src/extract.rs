//! Best-effort parsing of free-form oracle output.
//!
//! The oracle is a text model and is never guaranteed to follow the format it was
//! asked for. Every parser here returns a [`Parsed`] instead of an error so call
//! sites always spell out their fallback.

use regex::Regex;
use serde::de::DeserializeOwned;
use std::sync::LazyLock;

// A `.` or `!` only ends a sentence when whitespace or the end of the text
// follows it, so "Node.js", "3.12" and "e.g.," stay inside their clause.
static QUESTION_CLAUSE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:[^.!?\n]|[.!][^\s?])*\?").expect("question pattern is valid")
});

static SENTENCE_CLAUSE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:[^.!?\n]|[.!][^\s?])+[.!?]").expect("sentence pattern is valid")
});

/// Outcome of a best-effort parse.
#[derive(Debug, Clone, PartialEq)]
pub enum Parsed<T> {
    Value(T),
    Failed(ParseFailure),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseFailure {
    #[error("oracle returned an empty response")]
    Empty,
    #[error("no sentence-terminated question found in oracle response")]
    NoQuestion,
    #[error("no JSON object found in oracle response")]
    NoJsonSpan,
    #[error("JSON object in oracle response did not decode: {0}")]
    Malformed(String),
}

impl<T> Parsed<T> {
    pub fn into_result(self) -> Result<T, ParseFailure> {
        match self {
            Parsed::Value(value) => Ok(value),
            Parsed::Failed(failure) => Err(failure),
        }
    }
}

/// Pulls the question out of a completion.
///
/// The first `?`-terminated clause wins. Without one, the first sentence of at
/// least three words is taken instead (models sometimes phrase a prompt as
/// "Describe a time ..."). Lead-in labels such as `Question:` are dropped.
pub fn extract_question(raw: &str) -> Parsed<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Parsed::Failed(ParseFailure::Empty);
    }
    let text = raw.replace("**", "");

    for clause in QUESTION_CLAUSE.find_iter(&text) {
        let cleaned = clean_clause(clause.as_str());
        if cleaned.len() > 1 {
            return Parsed::Value(cleaned.to_string());
        }
    }

    for clause in SENTENCE_CLAUSE.find_iter(&text) {
        let cleaned = clean_clause(clause.as_str());
        if cleaned.split_whitespace().count() >= 3 {
            return Parsed::Value(cleaned.to_string());
        }
    }

    Parsed::Failed(ParseFailure::NoQuestion)
}

fn clean_clause(clause: &str) -> &str {
    let mut clause = clause;
    if let Some(idx) = clause.rfind(':') {
        let tail = &clause[idx + 1..];
        if tail.split_whitespace().count() >= 2 {
            clause = tail;
        }
    }
    clause.trim_matches(|c: char| c.is_whitespace() || matches!(c, '"' | '\'' | '`' | '-' | '*'))
}

/// The span from the first `{` to the last `}` of a completion.
pub fn extract_json_span(raw: &str) -> Parsed<&str> {
    match (raw.find('{'), raw.rfind('}')) {
        (Some(start), Some(end)) if start < end => Parsed::Value(&raw[start..=end]),
        _ => Parsed::Failed(ParseFailure::NoJsonSpan),
    }
}

/// Finds the JSON span in a completion and decodes it as `T`.
pub fn parse_json_object<T: DeserializeOwned>(raw: &str) -> Parsed<T> {
    let span = match extract_json_span(raw) {
        Parsed::Value(span) => span,
        Parsed::Failed(failure) => return Parsed::Failed(failure),
    };
    match serde_json::from_str(span) {
        Ok(value) => Parsed::Value(value),
        Err(e) => Parsed::Failed(ParseFailure::Malformed(e.to_string())),
    }
}
