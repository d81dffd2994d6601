//! Events, effects and signals
//!
//! Platform callbacks and external requests arrive as [`Signal`]s on one
//! channel. The runtime turns each into an [`Event`] for the session machine,
//! which answers with [`Effect`]s for the runtime to carry out.

use std::fmt;
use std::time::Duration;

use tokio::sync::mpsc;

use super::conversation::ConversationEntry;
use crate::backend::{BackendError, CommandReply, CommandRequest};
use crate::error::VoiceError;
use crate::intent::FeatureAction;
use crate::voice::{AudioSegment, PendingCommandAudio, RecognitionErrorKind, RunId, StartReason, StopReason};

/// Raw input to the runtime
#[derive(Debug)]
pub enum Signal {
    /// Turn the assistant on
    Activate,
    /// Turn the assistant off for good
    Teardown,
    /// Page visibility changed
    Visibility {
        /// Whether the page is now hidden
        hidden: bool,
    },
    /// Another application grabbed the microphone
    MicrophoneContended,
    /// The microphone is available again
    MicrophoneReleased,
    /// Recognition engine callback
    Recognition {
        /// Run the callback belongs to
        run: RunId,
        /// What the engine reported
        signal: RecognitionSignal,
    },
    /// Command recorder callback
    Recording(RecordingSignal),
    /// Audio player callback
    Playback(PlaybackSignal),
    /// Backend round trip finished (or timed out)
    Backend {
        /// Generation the request was issued in
        generation: u64,
        /// Reply or failure
        outcome: Result<CommandReply, BackendError>,
    },
    /// Command recording ceiling reached
    CaptureDeadline {
        /// Generation the recording belongs to
        generation: u64,
    },
    /// Recovery backoff elapsed
    RecoveryElapsed {
        /// Generation the backoff was scheduled in
        generation: u64,
    },
    /// Spoken notice synthesized
    Speech {
        /// Generation the notice was issued in
        generation: u64,
        /// Encoded audio
        audio: Vec<u8>,
    },
}

/// Recognition engine callbacks
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionSignal {
    /// Interim transcript
    Partial(String),
    /// Final transcript for an utterance
    Final(String),
    /// Engine error
    Error(RecognitionErrorKind),
    /// Engine stopped delivering results
    Ended,
}

/// Command recorder callbacks
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordingSignal {
    /// Recording complete
    Finished(Vec<u8>),
    /// Recording broke
    Failed(String),
}

/// Audio player callbacks
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackSignal {
    /// Segment played to the end
    Ended,
    /// Segment failed mid-playback
    Failed(String),
}

/// Cloneable sender for [`Signal`]s
///
/// Adapters running on their own threads hold one of these.
#[derive(Debug, Clone)]
pub struct SignalSink {
    tx: mpsc::UnboundedSender<Signal>,
}

impl SignalSink {
    /// Send a signal; returns `false` once the runtime is gone
    pub fn send(&self, signal: Signal) -> bool {
        self.tx.send(signal).is_ok()
    }

    /// Report a recognition callback for `run`
    pub fn recognition(&self, run: RunId, signal: RecognitionSignal) -> bool {
        self.send(Signal::Recognition { run, signal })
    }

    /// Report a recorder callback
    pub fn recording(&self, signal: RecordingSignal) -> bool {
        self.send(Signal::Recording(signal))
    }

    /// Report a player callback
    pub fn playback(&self, signal: PlaybackSignal) -> bool {
        self.send(Signal::Playback(signal))
    }
}

/// Create the runtime's signal channel
#[must_use]
pub fn signal_channel() -> (SignalSink, mpsc::UnboundedReceiver<Signal>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (SignalSink { tx }, rx)
}

/// Input to the session machine
#[derive(Debug)]
pub enum Event {
    /// Assistant activated
    Activate,
    /// Assistant torn down
    Teardown,
    /// Recognition confirmed running
    RecognitionStarted,
    /// Interim transcript
    PartialResult(String),
    /// Final transcript
    FinalResult(String),
    /// Recognition error, already classified by the lifecycle manager
    RecognitionFailed(RecognitionErrorKind),
    /// The engine refused to start
    StartFailed {
        /// Why recognition was being started
        reason: StartReason,
        /// What the engine reported
        kind: RecognitionErrorKind,
    },
    /// Recognition ended
    RecognitionEnded {
        /// The end was not requested
        unexpected: bool,
    },
    /// Command clip ready for submission
    CommandCaptured(PendingCommandAudio),
    /// Command capture produced nothing usable
    CaptureFailed(VoiceError),
    /// Backend round trip finished
    BackendReplied {
        /// Generation the request was issued in
        generation: u64,
        /// Reply or failure
        outcome: Result<CommandReply, BackendError>,
    },
    /// Current reply segment ended
    PlaybackFinished,
    /// Current reply segment failed
    PlaybackFailed(String),
    /// Page visibility changed
    VisibilityChanged {
        /// Whether the page is now hidden
        hidden: bool,
    },
    /// Microphone held elsewhere
    MicrophoneContended,
    /// Microphone free again
    MicrophoneReleased,
    /// Recovery backoff elapsed
    RecoveryElapsed {
        /// Generation the backoff was scheduled in
        generation: u64,
    },
    /// Watchdog tick
    Tick {
        /// Lifecycle manager's view of recognition
        recognition_active: bool,
    },
    /// Spoken notice ready to play
    SpeechReady {
        /// Generation the notice was issued in
        generation: u64,
        /// Encoded audio
        audio: Vec<u8>,
    },
}

impl Event {
    /// Short name for logs
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Activate => "activate",
            Self::Teardown => "teardown",
            Self::RecognitionStarted => "recognition-started",
            Self::PartialResult(_) => "partial-result",
            Self::FinalResult(_) => "final-result",
            Self::RecognitionFailed(_) => "recognition-failed",
            Self::StartFailed { .. } => "start-failed",
            Self::RecognitionEnded { .. } => "recognition-ended",
            Self::CommandCaptured(_) => "command-captured",
            Self::CaptureFailed(_) => "capture-failed",
            Self::BackendReplied { .. } => "backend-replied",
            Self::PlaybackFinished => "playback-finished",
            Self::PlaybackFailed(_) => "playback-failed",
            Self::VisibilityChanged { .. } => "visibility-changed",
            Self::MicrophoneContended => "microphone-contended",
            Self::MicrophoneReleased => "microphone-released",
            Self::RecoveryElapsed { .. } => "recovery-elapsed",
            Self::Tick { .. } => "tick",
            Self::SpeechReady { .. } => "speech-ready",
        }
    }
}

/// Work the session machine asks the runtime to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Start continuous recognition
    StartRecognition(StartReason),
    /// Stop continuous recognition
    StopRecognition(StopReason),
    /// Record a command clip
    BeginCapture {
        /// Generation of this command cycle
        generation: u64,
        /// Recording ceiling
        max_duration: Duration,
    },
    /// Abandon the recording in progress
    AbortCapture,
    /// Send the command to the backend
    Submit {
        /// Generation of this command cycle
        generation: u64,
        /// Request payload
        request: CommandRequest,
    },
    /// Play one reply segment
    Play(AudioSegment),
    /// Cut the current segment short
    StopPlayback,
    /// Deliver `RecoveryElapsed` after a delay
    ScheduleRecovery {
        /// Generation the backoff belongs to
        generation: u64,
        /// Delay before restarting recognition
        after: Duration,
    },
    /// Check whether the microphone is free again
    ProbeMicrophone,
    /// Ask the application shell to change page
    Navigate(String),
    /// Ask the application shell to run a feature
    PerformFeature(FeatureAction),
    /// Ask the application shell to close the assistant panel
    Close,
    /// Append to the persisted conversation
    Record(ConversationEntry),
    /// Tell the user something
    Notify(Notice),
    /// Say something out loud; the audio comes back as `SpeechReady`
    Speak {
        /// Generation the text belongs to
        generation: u64,
        /// Text to synthesize
        text: String,
    },
}

/// Why the session is suspended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuspendCause {
    /// Page hidden
    Hidden,
    /// Microphone held by another application
    Contended,
}

/// User-visible (and audible) status messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// Wake word heard, recording the command
    Listening,
    /// Captured clip was empty
    NoSpeechDetected,
    /// Backend unreachable or slow; answered locally
    BackendUnavailable(VoiceError),
    /// Session paused
    Suspended(SuspendCause),
    /// Session running again after a pause
    Resumed {
        /// The pause was caused by microphone contention
        after_contention: bool,
    },
    /// Recognition cannot run; the assistant is off
    RecognitionUnavailable(RecognitionErrorKind),
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Listening => write!(f, "Listening..."),
            Self::NoSpeechDetected => write!(f, "No speech detected. Say the wake word and try again."),
            Self::BackendUnavailable(VoiceError::BackendTimeout(_)) => {
                write!(f, "The assistant took too long to respond.")
            }
            Self::BackendUnavailable(_) => write!(f, "The assistant service is unavailable."),
            Self::Suspended(SuspendCause::Hidden) => write!(f, "Voice assistant paused."),
            Self::Suspended(SuspendCause::Contended) => write!(
                f,
                "Another application is using the microphone. The assistant will resume when it is free."
            ),
            Self::Resumed { after_contention: true } => {
                write!(f, "Microphone is free again. Voice assistant resumed.")
            }
            Self::Resumed { after_contention: false } => write!(f, "Voice assistant resumed."),
            Self::RecognitionUnavailable(kind) => {
                write!(f, "Speech recognition is unavailable ({kind}).")
            }
        }
    }
}
