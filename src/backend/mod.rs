//! Command backend
//!
//! The backend turns a recorded command into a transcript, a text reply and
//! reply audio. The session only sees the [`CommandBackend`] trait; the
//! production implementation is [`HttpBackend`].

mod http;

use std::time::Duration;

use async_trait::async_trait;

pub use http::HttpBackend;

use crate::session::ConversationEntry;
use crate::voice::{AudioSegment, PendingCommandAudio};

/// Default backend endpoint
pub const DEFAULT_BACKEND_URL: &str = "http://localhost:8000/api/process-audio/";

/// Default time allowed for one round trip
pub const DEFAULT_BACKEND_TIMEOUT: Duration = Duration::from_secs(45);

/// One command for the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest {
    /// Recorded command audio
    pub audio: PendingCommandAudio,
    /// What recognition heard after the wake word; may be empty
    pub transcript_hint: String,
    /// Recent conversation, oldest first
    pub conversation: Vec<ConversationEntry>,
}

/// The backend's answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandReply {
    /// What the backend heard
    pub transcript: String,
    /// Reply text, possibly with `[NAVIGATE:..]` or `[FEATURE:..]` markers
    pub reply: String,
    /// Reply audio in play order
    pub segments: Vec<AudioSegment>,
}

/// Backend failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// No answer within the time limit
    #[error("backend timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    /// Request could not be sent or the connection dropped
    #[error("backend unreachable: {0}")]
    Unreachable(String),

    /// Backend answered but refused the command
    #[error("backend rejected command: {0}")]
    Rejected(String),

    /// Backend answered with something we cannot read
    #[error("malformed backend response: {0}")]
    Malformed(String),
}

impl BackendError {
    /// Whether the failure was a timeout
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

/// Processes recorded commands
#[async_trait]
pub trait CommandBackend: Send + Sync {
    /// Submit one command
    ///
    /// # Errors
    ///
    /// Returns error if the backend is unreachable, rejects the command or
    /// answers with something unreadable
    async fn submit(&self, request: CommandRequest) -> Result<CommandReply, BackendError>;
}
