//! Voice session orchestration
//!
//! - [`SessionMachine`]: pure state machine over the command cycle
//! - [`Runtime`]: drives the machine with real audio, backend and shell
//! - watchdog: periodic self-healing policy and recovery backoff
//! - conversation: history and its persistence

mod conversation;
mod event;
mod machine;
mod runtime;
mod state;
pub mod watchdog;

pub use conversation::{
    CONVERSATION_FILE, Conversation, ConversationEntry, ConversationStore, HISTORY_LIMIT, JsonlStore, MemoryStore,
    Role,
};
pub use event::{
    Effect, Event, Notice, PlaybackSignal, RecognitionSignal, RecordingSignal, Signal, SignalSink, SuspendCause,
    signal_channel,
};
pub use machine::{FALLBACK_APOLOGY, SessionMachine, SessionOptions};
pub use runtime::{Collaborators, Runtime};
pub use state::{SessionState, Suspension};
pub use watchdog::{Backoff, TickAction};
