//! Session state

use std::fmt;

/// Where the voice session is in its command cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Assistant off
    Idle,
    /// Recognition requested, not yet confirmed
    Listening,
    /// Recognition confirmed running, waiting for the wake word
    AwaitingWakeWord,
    /// Recording a command
    Capturing,
    /// Command submitted, waiting for the backend
    AwaitingBackend,
    /// Reply audio playing
    Playing,
    /// Page hidden or microphone held elsewhere
    Suspended,
    /// Waiting out a backoff before restarting recognition
    Recovering,
}

impl SessionState {
    /// Whether the assistant should be passively listening
    #[must_use]
    pub const fn is_passive(self) -> bool {
        matches!(self, Self::Listening | Self::AwaitingWakeWord)
    }

    /// Whether recognition may be running in this state
    #[must_use]
    pub const fn allows_recognition(self) -> bool {
        self.is_passive()
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Listening => "listening",
            Self::AwaitingWakeWord => "awaiting-wake-word",
            Self::Capturing => "capturing",
            Self::AwaitingBackend => "awaiting-backend",
            Self::Playing => "playing",
            Self::Suspended => "suspended",
            Self::Recovering => "recovering",
        };
        f.write_str(s)
    }
}

/// Conditions holding the session in [`SessionState::Suspended`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Suspension {
    /// Page hidden
    pub hidden: bool,
    /// Microphone held by another application
    pub contended: bool,
}

impl Suspension {
    /// Whether any condition holds
    #[must_use]
    pub const fn is_active(self) -> bool {
        self.hidden || self.contended
    }
}
