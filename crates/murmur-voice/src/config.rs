//! Session configuration loaded from `.env` or a TOML file.
//!
//! A `SessionConfig` is immutable once a session is built. Everything the engine
//! needs per frame (pause length in frames, pre-roll capacity) is derived from it
//! here so the segmenter never does time arithmetic of its own.

use crate::error::{VoiceError, VoiceResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

fn default_threshold() -> f32 {
    0.02
}

fn default_pause_duration_ms() -> u32 {
    800
}

fn default_pre_speech_pad_ms() -> u32 {
    200
}

fn default_sample_rate() -> u32 {
    16000
}

fn default_buffer_size() -> usize {
    4096
}

fn default_true() -> bool {
    true
}

fn default_username() -> String {
    "guest".to_string()
}

fn default_server_url() -> String {
    "http://127.0.0.1:8765".to_string()
}

/// Engine verbosity. Standard covers lifecycle and state transitions; verbose adds
/// one line per frame with its energy score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum LogLevel {
    None,
    #[default]
    Standard,
    Verbose,
}

impl LogLevel {
    /// Default `tracing_subscriber::EnvFilter` directive for this level.
    pub fn filter_directive(self) -> &'static str {
        match self {
            LogLevel::None => "off",
            LogLevel::Standard => "info",
            LogLevel::Verbose => "debug",
        }
    }

    pub fn standard(self) -> bool {
        self >= LogLevel::Standard
    }

    pub fn verbose(self) -> bool {
        self >= LogLevel::Verbose
    }
}

impl TryFrom<u8> for LogLevel {
    type Error = VoiceError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(LogLevel::None),
            1 => Ok(LogLevel::Standard),
            2 => Ok(LogLevel::Verbose),
            other => Err(VoiceError::Config(format!(
                "log_level must be 0, 1 or 2, got {}",
                other
            ))),
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = VoiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value: u8 = s
            .trim()
            .parse()
            .map_err(|_| VoiceError::Config(format!("log_level must be 0, 1 or 2, got {:?}", s)))?;
        LogLevel::try_from(value)
    }
}

impl From<LogLevel> for u8 {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::None => 0,
            LogLevel::Standard => 1,
            LogLevel::Verbose => 2,
        }
    }
}

/// Per-session parameters.
///
/// | Env | Default | Description |
/// |-----|---------|-------------|
/// | MURMUR_THRESHOLD | 0.02 | RMS energy above which a frame counts as speech. |
/// | MURMUR_PAUSE_MS | 800 | Silence needed after speech to close an utterance. |
/// | MURMUR_PRE_SPEECH_PAD_MS | 200 | Audio kept from before the detected onset. |
/// | MURMUR_SAMPLE_RATE | 16000 | Capture sample rate (Hz). |
/// | MURMUR_BUFFER_SIZE | 4096 | Samples per frame. |
/// | MURMUR_LOG_LEVEL | 1 | 0 none, 1 standard, 2 verbose. |
/// | MURMUR_PASSTHROUGH | true | Monitor captured audio on the output device. |
/// | MURMUR_USERNAME | guest | Sent in the config message at session start. |
/// | MURMUR_SERVER_URL | http://127.0.0.1:8765 | Server base URL; `/ws` is appended. |
/// | MURMUR_START_MUTED | true | Start response playback at zero volume. |
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_threshold")]
    pub positive_speech_threshold: f32,
    #[serde(default = "default_pause_duration_ms")]
    pub pause_duration_ms: u32,
    #[serde(default = "default_pre_speech_pad_ms")]
    pub pre_speech_pad_ms: u32,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    #[serde(default)]
    pub log_level: LogLevel,
    #[serde(default = "default_true")]
    pub audio_passthrough: bool,
    #[serde(default = "default_username")]
    pub username: String,
    #[serde(default = "default_server_url")]
    pub server_url: String,
    #[serde(default = "default_true")]
    pub start_muted: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            positive_speech_threshold: default_threshold(),
            pause_duration_ms: default_pause_duration_ms(),
            pre_speech_pad_ms: default_pre_speech_pad_ms(),
            sample_rate: default_sample_rate(),
            buffer_size: default_buffer_size(),
            log_level: LogLevel::default(),
            audio_passthrough: true,
            username: default_username(),
            server_url: default_server_url(),
            start_muted: true,
        }
    }
}

impl SessionConfig {
    /// Load from environment. Unset or unparsable numbers fall back to defaults;
    /// range checks happen in [`SessionConfig::validate`]. An unknown log level is
    /// rejected, as it is in TOML.
    pub fn from_env() -> VoiceResult<Self> {
        let defaults = Self::default();
        Ok(Self {
            positive_speech_threshold: env_parse(
                "MURMUR_THRESHOLD",
                defaults.positive_speech_threshold,
            ),
            pause_duration_ms: env_parse("MURMUR_PAUSE_MS", defaults.pause_duration_ms),
            pre_speech_pad_ms: env_parse("MURMUR_PRE_SPEECH_PAD_MS", defaults.pre_speech_pad_ms),
            sample_rate: env_parse("MURMUR_SAMPLE_RATE", defaults.sample_rate),
            buffer_size: env_parse("MURMUR_BUFFER_SIZE", defaults.buffer_size),
            log_level: env_log_level("MURMUR_LOG_LEVEL", defaults.log_level)?,
            audio_passthrough: env_bool("MURMUR_PASSTHROUGH", defaults.audio_passthrough),
            username: env_opt_string("MURMUR_USERNAME").unwrap_or(defaults.username),
            server_url: env_opt_string("MURMUR_SERVER_URL").unwrap_or(defaults.server_url),
            start_muted: env_bool("MURMUR_START_MUTED", defaults.start_muted),
        })
    }

    /// Load from a TOML file. Missing keys take their defaults.
    pub fn load_from_path(path: &Path) -> VoiceResult<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> VoiceResult<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Reject values the engine cannot run with. Called before any device is opened.
    pub fn validate(&self) -> VoiceResult<()> {
        let threshold = self.positive_speech_threshold;
        if !threshold.is_finite() || threshold <= 0.0 {
            return Err(VoiceError::Config(format!(
                "positive_speech_threshold must be a positive number, got {}",
                threshold
            )));
        }
        if self.pause_duration_ms == 0 {
            return Err(VoiceError::Config(
                "pause_duration_ms must be positive".to_string(),
            ));
        }
        if self.sample_rate == 0 {
            return Err(VoiceError::Config("sample_rate must be positive".to_string()));
        }
        if self.buffer_size == 0 {
            return Err(VoiceError::Config("buffer_size must be positive".to_string()));
        }
        Ok(())
    }

    /// Duration of one frame in milliseconds (`buffer_size / sample_rate`).
    pub fn frame_duration_ms(&self) -> f64 {
        self.buffer_size as f64 * 1000.0 / self.sample_rate as f64
    }

    /// Silent frames needed to confirm a pause: `ceil(pause / frame)`, at least 1.
    pub fn max_silent_frames(&self) -> usize {
        frames_for(self.pause_duration_ms, self.sample_rate, self.buffer_size).max(1)
    }

    /// Frames of pre-roll kept ahead of an onset: `ceil(pad / frame)`.
    pub fn pre_roll_capacity(&self) -> usize {
        frames_for(self.pre_speech_pad_ms, self.sample_rate, self.buffer_size)
    }
}

/// `ceil(ms / (buffer_size / sample_rate * 1000))` in integer arithmetic.
fn frames_for(ms: u32, sample_rate: u32, buffer_size: usize) -> usize {
    let numerator = ms as u64 * sample_rate as u64;
    let denominator = (buffer_size as u64).saturating_mul(1000);
    if denominator == 0 {
        return 0;
    }
    numerator.div_ceil(denominator) as usize
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(v) => v.trim().parse().unwrap_or(default),
        Err(_) => default,
    }
}

fn env_log_level(name: &str, default: LogLevel) -> VoiceResult<LogLevel> {
    match env_opt_string(name) {
        Some(v) => v.parse(),
        None => Ok(default),
    }
}

fn env_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(v) => {
            let v = v.trim();
            if v.is_empty() {
                default
            } else {
                v.eq_ignore_ascii_case("true") || v == "1"
            }
        }
        Err(_) => default,
    }
}

fn env_opt_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
