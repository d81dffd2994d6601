//! Configuration management for the voice runtime

pub mod file;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::backend::{DEFAULT_BACKEND_TIMEOUT, DEFAULT_BACKEND_URL};
use crate::intent::{IntentDispatcher, IntentTable, NavigationRoute};
use crate::session::SessionOptions;
use crate::session::watchdog::{DEFAULT_RESTART_DELAY, DEFAULT_WATCHDOG_INTERVAL};
use crate::voice::{DEFAULT_CAPTURE_LIMIT, DEFAULT_MIN_CAPTURE_BYTES, SttProvider, TextToSpeech, TtsProvider};
use crate::{Error, Result};

use self::file::JarvisConfigFile;

/// Voice runtime configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Trigger token
    pub wake_word: String,

    /// Path to data directory (conversation log)
    pub data_dir: PathBuf,

    /// Command endpoint configuration
    pub backend: BackendConfig,

    /// Session timing
    pub session: SessionConfig,

    /// Continuous recognition configuration
    pub recognition: RecognitionConfig,

    /// Spoken notices
    pub speech: SpeechConfig,

    /// API keys
    pub api_keys: ApiKeys,

    /// Extra navigation pages
    pub routes: Vec<NavigationRoute>,

    /// Rule names checked before the full scan; built-in shortlist if unset
    pub shortlist: Option<Vec<String>>,
}

/// Command endpoint configuration
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Endpoint URL
    pub url: String,

    /// Round-trip ceiling
    pub timeout: Duration,
}

/// Session timing
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Command recording ceiling
    pub capture_limit: Duration,

    /// Clips below this size count as silence
    pub min_capture_bytes: usize,

    /// Watchdog period
    pub watchdog_interval: Duration,

    /// First recovery delay
    pub restart_delay: Duration,

    /// Conversation entries sent with each command
    pub history_window: usize,
}

/// Continuous recognition configuration
#[derive(Debug, Clone)]
pub struct RecognitionConfig {
    /// Which recognizer to run
    pub engine: RecognizerKind,

    /// STT provider for the microphone recognizer
    pub stt_provider: SttProvider,

    /// STT model (e.g. "whisper-1", "nova-2")
    pub stt_model: String,
}

/// Spoken notice configuration
#[derive(Debug, Clone)]
pub struct SpeechConfig {
    /// Speak notices and fallback replies when a key is available
    pub enabled: bool,

    /// TTS provider
    pub provider: TtsProvider,

    /// TTS model (e.g. "tts-1")
    pub model: String,

    /// Voice identifier (e.g. "alloy", or an ElevenLabs voice id)
    pub voice: String,

    /// Speed multiplier (0.25 to 4.0, `OpenAI` only)
    pub speed: f32,
}

/// API keys for external services
#[derive(Debug, Clone, Default)]
pub struct ApiKeys {
    /// `OpenAI` API key (Whisper and TTS)
    pub openai: Option<String>,

    /// `Deepgram` API key
    pub deepgram: Option<String>,

    /// `ElevenLabs` API key (optional TTS)
    pub elevenlabs: Option<String>,
}

/// Continuous recognizer implementation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RecognizerKind {
    /// Microphone audio segmented locally and sent to an STT service
    #[default]
    Microphone,
    /// Lines typed on stdin
    Console,
}

impl FromStr for RecognizerKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "microphone" | "mic" => Ok(Self::Microphone),
            "console" | "stdin" => Ok(Self::Console),
            other => Err(Error::Config(format!("unknown recognizer: {other}"))),
        }
    }
}

impl fmt::Display for RecognizerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Microphone => f.write_str("microphone"),
            Self::Console => f.write_str("console"),
        }
    }
}

/// Default data directory (~/.local/share/jarvis on Linux)
#[must_use]
pub fn default_data_dir() -> PathBuf {
    directories::BaseDirs::new().map_or_else(|| PathBuf::from(".jarvis"), |d| d.data_dir().join("jarvis"))
}

impl Config {
    /// Load configuration from the environment and the config file
    ///
    /// # Errors
    ///
    /// Returns error if a value is invalid
    pub fn load() -> Result<Self> {
        let fc = file::config_file_path()
            .map(|path| file::load_config_file(&path))
            .unwrap_or_default();
        Self::from_layers(fc, |key| std::env::var(key).ok())
    }

    /// Merge a parsed config file with environment values (env > toml > default)
    ///
    /// # Errors
    ///
    /// Returns error if a value is invalid
    pub fn from_layers(fc: JarvisConfigFile, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let wake_word = env("JARVIS_WAKE_WORD")
            .or(fc.wake_word)
            .unwrap_or_else(|| "jarvis".to_string());

        let data_dir = env("JARVIS_DATA_DIR")
            .or(fc.data_dir)
            .map_or_else(default_data_dir, PathBuf::from);

        // Backend (env > toml > default)
        let backend = BackendConfig {
            url: env("JARVIS_BACKEND_URL")
                .or(fc.backend.url)
                .unwrap_or_else(|| DEFAULT_BACKEND_URL.to_string()),
            timeout: env("JARVIS_BACKEND_TIMEOUT")
                .and_then(|s| s.parse().ok())
                .or(fc.backend.timeout_secs)
                .map_or(DEFAULT_BACKEND_TIMEOUT, Duration::from_secs),
        };

        let session = SessionConfig {
            capture_limit: env("JARVIS_CAPTURE_SECS")
                .and_then(|s| s.parse().ok())
                .or(fc.session.capture_secs)
                .map_or(DEFAULT_CAPTURE_LIMIT, Duration::from_secs),
            min_capture_bytes: fc.session.min_capture_bytes.unwrap_or(DEFAULT_MIN_CAPTURE_BYTES),
            watchdog_interval: env("JARVIS_WATCHDOG_SECS")
                .and_then(|s| s.parse().ok())
                .or(fc.session.watchdog_secs)
                .map_or(DEFAULT_WATCHDOG_INTERVAL, Duration::from_secs),
            restart_delay: fc
                .session
                .restart_delay_ms
                .map_or(DEFAULT_RESTART_DELAY, Duration::from_millis),
            history_window: fc.session.history_window.unwrap_or(20),
        };

        let recognition = RecognitionConfig {
            engine: env("JARVIS_RECOGNIZER")
                .or(fc.recognition.engine)
                .map(|s| s.parse())
                .transpose()?
                .unwrap_or_default(),
            stt_provider: fc
                .recognition
                .stt_provider
                .map(|s| s.parse())
                .transpose()?
                .unwrap_or_default(),
            stt_model: env("JARVIS_STT_MODEL")
                .or(fc.recognition.stt_model)
                .unwrap_or_else(|| "whisper-1".to_string()),
        };

        let provider: TtsProvider = env("JARVIS_TTS_PROVIDER")
            .or(fc.speech.provider)
            .map(|s| s.parse())
            .transpose()?
            .unwrap_or_default();
        let speech = SpeechConfig {
            enabled: env("JARVIS_SPEECH")
                .map(|s| !matches!(s.trim().to_ascii_lowercase().as_str(), "0" | "off" | "false" | "no"))
                .or(fc.speech.enabled)
                .unwrap_or(true),
            provider,
            model: env("JARVIS_TTS_MODEL")
                .or(fc.speech.model)
                .unwrap_or_else(|| provider.default_model().to_string()),
            voice: env("JARVIS_TTS_VOICE")
                .or(fc.speech.voice)
                .unwrap_or_else(|| provider.default_voice().to_string()),
            speed: fc.speech.speed.unwrap_or(1.0),
        };

        // API keys (env > toml > None)
        let api_keys = ApiKeys {
            openai: env("OPENAI_API_KEY").or(fc.api_keys.openai),
            deepgram: env("DEEPGRAM_API_KEY").or(fc.api_keys.deepgram),
            elevenlabs: env("ELEVENLABS_API_KEY").or(fc.api_keys.elevenlabs),
        };

        let config = Self {
            wake_word,
            data_dir,
            backend,
            session,
            recognition,
            speech,
            api_keys,
            routes: fc.intents.routes,
            shortlist: fc.intents.shortlist,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check values that would leave the session unable to run
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the first bad value
    pub fn validate(&self) -> Result<()> {
        if self.wake_word.trim().is_empty() {
            return Err(Error::Config("wake_word must not be empty".to_string()));
        }
        if self.backend.url.trim().is_empty() {
            return Err(Error::Config("backend.url must not be empty".to_string()));
        }

        let durations = [
            ("backend.timeout_secs", self.backend.timeout),
            ("session.capture_secs", self.session.capture_limit),
            ("session.watchdog_secs", self.session.watchdog_interval),
            ("session.restart_delay_ms", self.session.restart_delay),
        ];
        if let Some((key, _)) = durations.iter().find(|(_, d)| d.is_zero()) {
            return Err(Error::Config(format!("{key} must be greater than zero")));
        }

        if self.session.history_window == 0 {
            return Err(Error::Config("session.history_window must be greater than zero".to_string()));
        }
        if !(0.25..=4.0).contains(&self.speech.speed) {
            return Err(Error::Config("speech.speed must be between 0.25 and 4.0".to_string()));
        }
        Ok(())
    }

    /// API key for the configured STT provider
    #[must_use]
    pub fn stt_api_key(&self) -> Option<&str> {
        match self.recognition.stt_provider {
            SttProvider::Whisper => self.api_keys.openai.as_deref(),
            SttProvider::Deepgram => self.api_keys.deepgram.as_deref(),
        }
    }

    /// API key for the configured TTS provider
    #[must_use]
    pub fn tts_api_key(&self) -> Option<&str> {
        let key = match self.speech.provider {
            TtsProvider::OpenAI => self.api_keys.openai.as_deref(),
            TtsProvider::ElevenLabs => self.api_keys.elevenlabs.as_deref(),
        };
        key.filter(|key| !key.is_empty())
    }

    /// Synthesizer for spoken notices; `None` when disabled or unkeyed
    ///
    /// # Errors
    ///
    /// Returns error if the TTS client cannot be built
    pub fn speech_synthesizer(&self) -> Result<Option<TextToSpeech>> {
        if !self.speech.enabled {
            return Ok(None);
        }
        let Some(key) = self.tts_api_key() else {
            tracing::info!(provider = %self.speech.provider, "no TTS key, notices will be shown only");
            return Ok(None);
        };

        let tts = match self.speech.provider {
            TtsProvider::OpenAI => TextToSpeech::new_openai_with_model(
                key.to_string(),
                self.speech.voice.clone(),
                self.speech.speed,
                self.speech.model.clone(),
            )?,
            TtsProvider::ElevenLabs => TextToSpeech::new_elevenlabs_with_model(
                key.to_string(),
                self.speech.voice.clone(),
                self.speech.model.clone(),
            )?,
        };
        Ok(Some(tts))
    }

    /// Session machine tunables
    #[must_use]
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            wake_word: self.wake_word.clone(),
            capture_limit: self.session.capture_limit,
            restart_delay: self.session.restart_delay,
            watchdog_interval: self.session.watchdog_interval,
            history_window: self.session.history_window,
        }
    }

    /// Intent dispatcher over the built-in table plus configured routes
    ///
    /// # Errors
    ///
    /// Returns error if a configured route has no keywords
    pub fn dispatcher(&self) -> Result<IntentDispatcher> {
        let mut table = IntentTable::with_routes(&self.routes)?;
        if let Some(shortlist) = &self.shortlist {
            table.set_shortlist(shortlist);
        }
        Ok(IntentDispatcher::new(table))
    }
}
