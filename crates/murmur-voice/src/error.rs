//! Error types for the murmur voice engine

use thiserror::Error;

/// Result type alias for voice operations
pub type VoiceResult<T> = Result<T, VoiceError>;

/// Errors that can occur in the voice engine
#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("Audio device error: {0}")]
    AudioDevice(String),

    #[error("Audio stream error: {0}")]
    AudioStream(String),

    #[error("Audio playback error: {0}")]
    Playback(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Channel send error: {0}")]
    ChannelSend(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl VoiceError {
    /// Device and configuration errors end a session before it starts; everything
    /// else is recovered or reported by the session loop.
    pub fn is_fatal_at_start(&self) -> bool {
        matches!(
            self,
            VoiceError::AudioDevice(_) | VoiceError::AudioStream(_) | VoiceError::Config(_)
        )
    }
}

impl From<cpal::DevicesError> for VoiceError {
    fn from(err: cpal::DevicesError) -> Self {
        VoiceError::AudioDevice(err.to_string())
    }
}

impl From<cpal::DefaultStreamConfigError> for VoiceError {
    fn from(err: cpal::DefaultStreamConfigError) -> Self {
        VoiceError::AudioDevice(err.to_string())
    }
}

impl From<cpal::BuildStreamError> for VoiceError {
    fn from(err: cpal::BuildStreamError) -> Self {
        VoiceError::AudioStream(err.to_string())
    }
}

impl From<cpal::PlayStreamError> for VoiceError {
    fn from(err: cpal::PlayStreamError) -> Self {
        VoiceError::AudioStream(err.to_string())
    }
}

impl From<cpal::PauseStreamError> for VoiceError {
    fn from(err: cpal::PauseStreamError) -> Self {
        VoiceError::AudioStream(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for VoiceError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        VoiceError::Transport(err.to_string())
    }
}

impl From<toml::de::Error> for VoiceError {
    fn from(err: toml::de::Error) -> Self {
        VoiceError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_classification() {
        assert!(VoiceError::AudioDevice("denied".into()).is_fatal_at_start());
        assert!(VoiceError::Config("threshold".into()).is_fatal_at_start());
        assert!(!VoiceError::Playback("decode".into()).is_fatal_at_start());
        assert!(!VoiceError::Transport("closed".into()).is_fatal_at_start());
    }

    #[test]
    fn display_includes_context() {
        let err = VoiceError::Config("pause_duration_ms must be positive".into());
        assert_eq!(
            err.to_string(),
            "Configuration error: pause_duration_ms must be positive"
        );
    }
}
