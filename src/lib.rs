//! Jarvis Runtime - Self-healing voice assistant session
//!
//! This library provides the core of a hands-free voice assistant:
//! - Continuous wake word listening with automatic recovery
//! - Command capture, backend round trip and reply playback
//! - Intent dispatch to page navigation and local features, with an offline
//!   fallback when the backend is unreachable
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 Platform adapters                    │
//! │  Recognizer  │  Recorder  │  Player  │  Shell        │
//! └────────────────────┬────────────────────────────────┘
//!                      │ signals
//! ┌────────────────────▼────────────────────────────────┐
//! │                  Session runtime                     │
//! │  Lifecycle manager │ Mic arbiter │ Capture │ Watchdog│
//! │            Session machine (pure)                    │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │  Command backend (HTTP)  │  Intent dispatcher       │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod intent;
pub mod session;
pub mod shell;
pub mod voice;

pub use config::Config;
pub use error::{Error, Result, VoiceError};
pub use intent::{ActionResult, IntentAction, IntentDispatcher};
pub use session::{Runtime, SessionMachine, SessionState, Signal, SignalSink};
pub use shell::{ConsoleShell, Shell};
