//! Voice processing module
//!
//! Pure session components (microphone arbitration, recognition lifecycle,
//! wake word detection, command capture and the playback queue) plus the
//! cpal-backed platform adapters they drive and the hosted STT and TTS
//! clients.

mod adapter;
mod capture;
mod command;
mod mic;
mod playback;
mod queue;
mod recognition;
mod recognizer;
mod segmenter;
mod stt;
mod tts;
mod wake_word;

pub use adapter::{
    EngineError, EngineFactory, ErrorClass, Player, RecognitionEngine, RecognitionErrorKind, Recorder, RunId,
};
pub use capture::{GATE_WAIT, InputGate, MicRecorder, SAMPLE_RATE, build_input_stream, open_input, samples_to_wav};
pub use command::{CaptureSession, DEFAULT_CAPTURE_LIMIT, DEFAULT_MIN_CAPTURE_BYTES, PendingCommandAudio};
pub use mic::{MicArbiter, MicHolder, MicLease};
pub use playback::{DecodedAudio, SpeakerPlayer, decode};
pub use queue::{AudioSegment, PlaybackQueue, QueueStep};
pub use recognition::{RecognitionManager, StartOutcome, StartReason, StopReason};
pub use recognizer::{ConsoleRecognizer, MicrophoneRecognizer};
pub use segmenter::{SegmenterState, SpeechSegmenter, calculate_energy};
pub use stt::{SpeechToText, SttError, SttProvider};
pub use tts::{SpeechSynthesizer, TextToSpeech, TtsProvider};
pub use wake_word::{DetectorState, WakeWordDetector, extract_command};
