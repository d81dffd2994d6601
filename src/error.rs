//! Error types for the Jarvis voice runtime

use std::time::Duration;

use thiserror::Error;

use crate::voice::{MicHolder, RecognitionErrorKind};

/// Result type alias for runtime operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur outside the voice session itself
///
/// These surface from setup paths (configuration, device construction,
/// persistence). Errors that happen while a session is live are absorbed as
/// [`VoiceError`] and folded into a state transition instead.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio device error
    #[error("audio error: {0}")]
    Audio(String),

    /// Speech-to-text error
    #[error("STT error: {0}")]
    Stt(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// Backend command endpoint error
    #[error("backend error: {0}")]
    Backend(String),

    /// Speech recognition engine error
    #[error("recognition error: {0}")]
    Recognition(String),

    /// Conversation storage error
    #[error("storage error: {0}")]
    Storage(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Failures that can occur during a live voice session
///
/// Every variant has a deterministic follow-up state in the session machine;
/// none of them ends the session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VoiceError {
    /// Recognition hiccup (no speech, aborted, network); retried after a delay
    #[error("transient recognition error: {0}")]
    RecognitionTransient(RecognitionErrorKind),

    /// Recognition cannot work at all (unsupported, permission denied)
    #[error("recognition unavailable: {0}")]
    RecognitionFatal(RecognitionErrorKind),

    /// Command capture produced nothing worth submitting
    #[error("no speech detected ({bytes} bytes captured)")]
    NoSpeechDetected {
        /// Bytes actually captured
        bytes: usize,
    },

    /// Backend did not answer within the ceiling
    #[error("backend timed out after {}s", .0.as_secs())]
    BackendTimeout(Duration),

    /// Backend answered with an error or could not be reached
    #[error("backend error: {0}")]
    Backend(String),

    /// A reply segment could not be decoded or played
    #[error("playback error: {0}")]
    Playback(String),

    /// Another application holds the microphone
    #[error("microphone is in use by another application")]
    MicrophoneContended,

    /// The microphone token is held by another component of this session
    #[error("microphone is held by {0}")]
    MicrophoneBusy(MicHolder),

    /// Command recording failed on the device
    #[error("recording failed: {0}")]
    Recording(String),
}

impl From<crate::backend::BackendError> for VoiceError {
    fn from(err: crate::backend::BackendError) -> Self {
        match err {
            crate::backend::BackendError::Timeout(after) => Self::BackendTimeout(after),
            other => Self::Backend(other.to_string()),
        }
    }
}
