//! Error types for the Mockmate session engine

use thiserror::Error;

/// Result type alias for session operations
pub type SessionResult<T> = Result<T, SessionError>;

/// Errors that can occur while running an interview session.
///
/// None of these ever reach the sequencer's control flow: the speech coordinator and the
/// evaluator client convert them into fallbacks or terminal transitions.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Capture device error: {0}")]
    Capture(String),

    #[error("Synthesis error: {0}")]
    Synthesis(String),

    #[error("Audio playback error: {0}")]
    Playback(String),

    #[error("Evaluator error: {0}")]
    Evaluator(String),

    #[error("Session store error: {0}")]
    Store(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Channel send error: {0}")]
    ChannelSend(String),

    #[error("Session closed")]
    Closed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl From<sled::Error> for SessionError {
    fn from(err: sled::Error) -> Self {
        SessionError::Store(err.to_string())
    }
}

impl From<toml::de::Error> for SessionError {
    fn from(err: toml::de::Error) -> Self {
        SessionError::Config(err.to_string())
    }
}

impl From<reqwest::Error> for SessionError {
    fn from(err: reqwest::Error) -> Self {
        SessionError::Evaluator(err.to_string())
    }
}
