//! Error types for the signaling relay
//!
//! Defines connection-level errors, backplane errors and the few
//! business errors that are surfaced to clients.
//! Uses thiserror for ergonomic error definitions.

use thiserror::Error;

/// Application-level errors
///
/// All of these end the affected connection. Nothing here is fatal to
/// the process.
#[derive(Debug, Error)]
pub enum AppError {
    /// WebSocket protocol error (fatal)
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// JSON serialization/deserialization error
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error (fatal)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Channel send error (fatal - internal channel broken)
    #[error("Channel send error")]
    ChannelSend,
}

/// Message send errors
///
/// Occurs when attempting to send messages through closed channels.
#[derive(Debug, Error)]
pub enum SendError {
    /// The receiving end of the channel has been closed
    #[error("Channel closed")]
    ChannelClosed,

    /// The outbound buffer is full; the client is not reading
    #[error("Channel full")]
    Full,
}

/// Distribution backplane errors
#[derive(Debug, Error)]
pub enum BackplaneError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Backplane codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// The in-process bus actor has stopped
    #[error("Backplane closed")]
    Closed,
}

/// Room creation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CreateError {
    /// The requested room already has members
    #[error("taken")]
    Taken,
}

/// Credential generation errors
#[derive(Debug, Error)]
pub enum CredentialError {
    /// A relay server entry has no shared secret
    #[error("TURN server #{0} has no secret configured")]
    MissingSecret(usize),
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}
