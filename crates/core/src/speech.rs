use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SpeechError {
    #[error("speech capture is not supported on this client")]
    Unsupported,
    #[error("speech capture was denied: {0}")]
    Denied(String),
}

/// The live speech-to-text stream shared by all three personas.
///
/// `interim_transcript` is the growing, not-yet-final text of the current
/// utterance. `final_transcript` accumulates finalized segments until
/// [`SpeechChannel::reset`] is called; the panel resets between turns, never
/// mid-turn.
pub trait SpeechChannel: Send + Sync {
    fn is_supported(&self) -> bool {
        true
    }
    fn start(&self) -> Result<(), SpeechError>;
    fn stop(&self);
    fn reset(&self);
    fn is_listening(&self) -> bool;
    fn interim_transcript(&self) -> String;
    fn final_transcript(&self) -> String;
}

#[derive(Debug, Default)]
struct TranscriptState {
    listening: bool,
    denied: Option<String>,
    interim: String,
    finalized: String,
}

/// A [`SpeechChannel`] fed by an external recogniser (a browser client, a
/// console, a test). Text pushed while not listening is dropped.
#[derive(Debug)]
pub struct TranscriptBuffer {
    supported: bool,
    state: Mutex<TranscriptState>,
}

impl Default for TranscriptBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl TranscriptBuffer {
    pub fn new() -> Self {
        Self {
            supported: true,
            state: Mutex::new(TranscriptState::default()),
        }
    }

    /// A channel for clients that reported no speech recognition support.
    pub fn unsupported() -> Self {
        Self {
            supported: false,
            state: Mutex::new(TranscriptState::default()),
        }
    }

    /// Records that the recogniser lost microphone access, e.g. the user
    /// refused the permission prompt. Any capture in progress stops and later
    /// starts fail with [`SpeechError::Denied`].
    pub fn deny(&self, reason: impl Into<String>) {
        let reason = reason.into();
        tracing::warn!("Speech capture denied: {}", reason);
        self.with_state(|s| {
            s.listening = false;
            s.interim.clear();
            s.denied = Some(reason);
        });
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut TranscriptState) -> T) -> T {
        // A poisoned lock only means a feeder panicked mid-push; the text is still usable.
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }

    /// Replaces the interim text of the utterance in progress.
    pub fn push_interim(&self, text: &str) {
        self.with_state(|s| {
            if s.listening {
                s.interim = text.to_string();
            }
        });
    }

    /// Appends a finalized segment and clears the interim text.
    pub fn push_final(&self, text: &str) {
        self.with_state(|s| {
            if s.listening {
                let text = text.trim();
                if !text.is_empty() {
                    s.finalized.push_str(text);
                    s.finalized.push(' ');
                }
                s.interim.clear();
            }
        });
    }
}

impl SpeechChannel for TranscriptBuffer {
    fn is_supported(&self) -> bool {
        self.supported
    }

    fn start(&self) -> Result<(), SpeechError> {
        if !self.supported {
            return Err(SpeechError::Unsupported);
        }
        self.with_state(|s| match &s.denied {
            Some(reason) => Err(SpeechError::Denied(reason.clone())),
            None => {
                s.listening = true;
                Ok(())
            }
        })
    }

    fn stop(&self) {
        self.with_state(|s| s.listening = false);
    }

    fn reset(&self) {
        self.with_state(|s| {
            s.interim.clear();
            s.finalized.clear();
        });
    }

    fn is_listening(&self) -> bool {
        self.with_state(|s| s.listening)
    }

    fn interim_transcript(&self) -> String {
        self.with_state(|s| s.interim.clone())
    }

    fn final_transcript(&self) -> String {
        self.with_state(|s| s.finalized.trim_end().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segments_accumulate_until_reset() {
        let speech = TranscriptBuffer::new();
        speech.start().unwrap();
        speech.push_interim("I led");
        assert_eq!(speech.interim_transcript(), "I led");
        speech.push_final("I led a team");
        speech.push_final("of five");
        assert_eq!(speech.interim_transcript(), "");
        assert_eq!(speech.final_transcript(), "I led a team of five");

        speech.reset();
        assert_eq!(speech.final_transcript(), "");
    }

    #[test]
    fn text_outside_a_capture_is_dropped() {
        let speech = TranscriptBuffer::new();
        speech.push_final("too early");
        speech.start().unwrap();
        speech.stop();
        speech.push_interim("too late");
        assert_eq!(speech.final_transcript(), "");
        assert_eq!(speech.interim_transcript(), "");
    }

    #[test]
    fn unsupported_channel_refuses_to_start() {
        let speech = TranscriptBuffer::unsupported();
        assert!(!speech.is_supported());
        assert_eq!(speech.start(), Err(SpeechError::Unsupported));
        assert!(!speech.is_listening());
    }

    #[test]
    fn denied_channel_stops_and_refuses_to_start() {
        let speech = TranscriptBuffer::new();
        speech.start().unwrap();
        speech.push_interim("I was about to");
        speech.deny("not-allowed");
        assert!(!speech.is_listening());
        assert_eq!(speech.interim_transcript(), "");
        assert_eq!(
            speech.start(),
            Err(SpeechError::Denied("not-allowed".to_string()))
        );
        assert!(speech.is_supported());
    }
}
