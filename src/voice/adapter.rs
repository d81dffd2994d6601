//! Audio I/O adapter contracts
//!
//! Platform capabilities the session runtime drives: continuous speech
//! recognition, fixed-duration command recording and single-segment playback.
//! Every call returns immediately; completion and failures arrive later as
//! [`Signal`](crate::session::Signal)s on the runtime's sink.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Error codes reported by a speech recognition engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecognitionErrorKind {
    /// No speech heard before the engine gave up
    NoSpeech,
    /// Recognition was aborted (usually by our own stop)
    Aborted,
    /// Network failure reaching the recognition service
    Network,
    /// Audio capture failed, typically because another app holds the mic
    AudioCapture,
    /// Microphone permission denied
    NotAllowed,
    /// Recognition service refused to run
    ServiceNotAllowed,
    /// Configured language is not supported
    LanguageNotSupported,
    /// No recognition engine on this platform
    Unsupported,
    /// Anything else the engine reports
    Other,
}

/// How the session should react to a recognition error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Retry after a short delay
    Transient,
    /// Microphone held elsewhere; suspend and check again later
    Contention,
    /// Surface to the user and stop trying
    Fatal,
}

impl RecognitionErrorKind {
    /// Parse a platform error code (e.g. `"no-speech"`)
    #[must_use]
    pub fn from_code(code: &str) -> Self {
        match code.trim().to_ascii_lowercase().as_str() {
            "no-speech" => Self::NoSpeech,
            "aborted" => Self::Aborted,
            "network" => Self::Network,
            "audio-capture" => Self::AudioCapture,
            "not-allowed" => Self::NotAllowed,
            "service-not-allowed" => Self::ServiceNotAllowed,
            "language-not-supported" => Self::LanguageNotSupported,
            "unsupported" => Self::Unsupported,
            _ => Self::Other,
        }
    }

    /// Platform error code for this kind
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::NoSpeech => "no-speech",
            Self::Aborted => "aborted",
            Self::Network => "network",
            Self::AudioCapture => "audio-capture",
            Self::NotAllowed => "not-allowed",
            Self::ServiceNotAllowed => "service-not-allowed",
            Self::LanguageNotSupported => "language-not-supported",
            Self::Unsupported => "unsupported",
            Self::Other => "other",
        }
    }

    /// Classify for the recovery policy
    #[must_use]
    pub const fn class(self) -> ErrorClass {
        match self {
            Self::NoSpeech | Self::Aborted | Self::Network | Self::Other => ErrorClass::Transient,
            Self::AudioCapture => ErrorClass::Contention,
            Self::NotAllowed
            | Self::ServiceNotAllowed
            | Self::LanguageNotSupported
            | Self::Unsupported => ErrorClass::Fatal,
        }
    }
}

impl fmt::Display for RecognitionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Synchronous failures from [`RecognitionEngine`] calls
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// Start was called on an engine that is already running
    #[error("recognition already started")]
    AlreadyStarted,

    /// The engine is stuck in a state it will not leave; discard it
    #[error("recognition engine is poisoned")]
    Poisoned,

    /// The engine refused with a platform error
    #[error("recognition failed: {0}")]
    Failed(RecognitionErrorKind),
}

/// Identifies one start-to-end span of a recognition engine
///
/// Issued by the lifecycle manager on every start. Engines tag each callback
/// with the run it belongs to so late callbacks from a stopped run can be told
/// apart from the current one.
pub type RunId = u64;

/// Continuous speech recognition engine
///
/// Results, errors and end-of-recognition are reported through the signal
/// sink the engine was built with, never through return values. Every
/// callback carries the [`RunId`] passed to the `start` that began it.
pub trait RecognitionEngine {
    /// Begin continuous recognition as `run`
    ///
    /// Must return promptly; device setup that can fail later is reported as
    /// an `Error` followed by `Ended` for the same run.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::AlreadyStarted`] if already running,
    /// [`EngineError::Poisoned`] if the instance must be recreated
    fn start(&mut self, run: RunId) -> Result<(), EngineError>;

    /// Stop recognition; an `Ended` signal for the stopped run may follow
    ///
    /// # Errors
    ///
    /// Returns error if the engine rejects the request
    fn stop(&mut self) -> Result<(), EngineError>;

    /// Queryable running state, if the platform exposes one
    fn is_running(&self) -> Option<bool> {
        None
    }
}

/// Builds recognition engines; called again after an engine is poisoned
pub type EngineFactory = Box<dyn FnMut() -> Result<Box<dyn RecognitionEngine>, EngineError>>;

/// Fixed-duration command recorder
pub trait Recorder {
    /// Start recording; a `Finished` signal follows after `max_duration` or
    /// after [`Recorder::stop`], or `Failed` if the device cannot be opened
    ///
    /// # Errors
    ///
    /// Returns error if the recording cannot even be scheduled
    fn start(&mut self, max_duration: Duration) -> crate::Result<()>;

    /// Finish the recording early, delivering what was captured
    fn stop(&mut self);

    /// Stop and discard the recording; no signal follows
    fn abort(&mut self);

    /// Check in the background whether the input device can be opened;
    /// `MicrophoneReleased` is signalled if it can, nothing if not
    ///
    /// # Errors
    ///
    /// Returns error if the check cannot be scheduled
    fn probe(&mut self) -> crate::Result<()>;
}

/// Single-segment audio player
pub trait Player {
    /// Start playing one encoded segment; `Ended` or `Failed` follows,
    /// including for audio that turns out not to decode
    ///
    /// # Errors
    ///
    /// Returns error if playback cannot be scheduled
    fn play(&mut self, audio: Vec<u8>) -> crate::Result<()>;

    /// Cut the current segment short
    fn stop(&mut self);
}
