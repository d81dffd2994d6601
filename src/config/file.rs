//! TOML configuration file loading
//!
//! Supports `~/.config/jarvis/config.toml` (or `JARVIS_CONFIG`) as a persistent
//! config source. All fields are optional; the file is a partial overlay on
//! top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::intent::NavigationRoute;

/// Environment variable naming an explicit config file
pub const CONFIG_PATH_ENV: &str = "JARVIS_CONFIG";

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct JarvisConfigFile {
    /// Trigger token (e.g. "jarvis")
    #[serde(default)]
    pub wake_word: Option<String>,

    /// Where the conversation log lives
    #[serde(default)]
    pub data_dir: Option<String>,

    /// Command endpoint
    #[serde(default)]
    pub backend: BackendFileConfig,

    /// Session timing
    #[serde(default)]
    pub session: SessionFileConfig,

    /// Continuous recognition
    #[serde(default)]
    pub recognition: RecognitionFileConfig,

    /// Spoken notices
    #[serde(default)]
    pub speech: SpeechFileConfig,

    /// API keys for external services
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,

    /// Intent table additions
    #[serde(default)]
    pub intents: IntentsFileConfig,
}

/// Backend endpoint configuration
#[derive(Debug, Default, Deserialize)]
pub struct BackendFileConfig {
    /// Command endpoint URL
    pub url: Option<String>,

    /// Round-trip ceiling in seconds
    pub timeout_secs: Option<u64>,
}

/// Session timing configuration
#[derive(Debug, Default, Deserialize)]
pub struct SessionFileConfig {
    /// Command recording ceiling in seconds
    pub capture_secs: Option<u64>,

    /// Clips below this size count as silence
    pub min_capture_bytes: Option<usize>,

    /// Watchdog period in seconds
    pub watchdog_secs: Option<u64>,

    /// First recovery delay in milliseconds
    pub restart_delay_ms: Option<u64>,

    /// Conversation entries sent with each command
    pub history_window: Option<usize>,
}

/// Recognition configuration
#[derive(Debug, Default, Deserialize)]
pub struct RecognitionFileConfig {
    /// "microphone" or "console"
    pub engine: Option<String>,

    /// "whisper" or "deepgram"
    pub stt_provider: Option<String>,

    /// STT model (e.g. "whisper-1")
    pub stt_model: Option<String>,
}

/// Spoken notice configuration
#[derive(Debug, Default, Deserialize)]
pub struct SpeechFileConfig {
    /// Speak notices when a TTS key is available
    pub enabled: Option<bool>,

    /// "openai" or "elevenlabs"
    pub provider: Option<String>,

    /// TTS model (e.g. "tts-1")
    pub model: Option<String>,

    /// TTS voice identifier (e.g. "alloy")
    pub voice: Option<String>,

    /// TTS speed multiplier
    pub speed: Option<f32>,
}

/// API keys configuration
#[derive(Debug, Default, Deserialize)]
pub struct ApiKeysFileConfig {
    pub openai: Option<String>,
    pub deepgram: Option<String>,
    pub elevenlabs: Option<String>,
}

/// Intent table configuration
#[derive(Debug, Default, Deserialize)]
pub struct IntentsFileConfig {
    /// Extra pages, checked after the built-in ones
    #[serde(default)]
    pub routes: Vec<NavigationRoute>,

    /// Rule names checked before the full scan
    pub shortlist: Option<Vec<String>>,
}

/// Parse a config file body
///
/// # Errors
///
/// Returns error if the TOML is malformed
pub fn parse_config(content: &str) -> crate::Result<JarvisConfigFile> {
    Ok(toml::from_str(content)?)
}

/// Load the TOML config file from `path`
///
/// Returns `JarvisConfigFile::default()` if the file doesn't exist or can't be parsed.
#[must_use]
pub fn load_config_file(path: &Path) -> JarvisConfigFile {
    if !path.exists() {
        return JarvisConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match parse_config(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                JarvisConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            JarvisConfigFile::default()
        }
    }
}

/// Return the config file path: `JARVIS_CONFIG`, else `~/.config/jarvis/config.toml`
#[must_use]
pub fn config_file_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        return Some(PathBuf::from(path));
    }
    directories::BaseDirs::new().map(|d| d.config_dir().join("jarvis").join("config.toml"))
}
