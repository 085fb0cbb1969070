//! Error types for configuration, storage, dispatch and the signal adapters
//!
//! Cooldown and daily-cap rejections are NOT errors; they are ordinary
//! `Admission` outcomes returned by the rate limiter.

use thiserror::Error;

/// Configuration could not be loaded or is internally inconsistent.
///
/// Fatal: the affected runtime refuses to start monitoring.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?}")]
    InvalidValue { var: String, value: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Persistent storage failures (sessions, moments, daily counters).
///
/// Fatal for the streamer whose dispatch hit it.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("trigger data is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("schema directory not found: {0}")]
    SchemaDirMissing(String),

    #[error("session {0} does not exist")]
    SessionNotFound(i64),

    #[error("corrupt stored value: {0}")]
    Corrupt(String),

    #[error("store lock poisoned")]
    Poisoned,
}

/// A clip request could not be handed off.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("moment storage unavailable: {0}")]
    Store(#[from] StoreError),

    #[error("clip sink closed for streamer {streamer}")]
    SinkClosed { streamer: String },
}

/// Viewer-count polling failures. Always treated as a missed sample.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status {0}")]
    Status(u16),

    #[error("malformed channel payload: {0}")]
    Decode(String),
}

/// A raw chat frame could not be turned into a chat message.
#[derive(Debug, Error)]
pub enum ChatParseError {
    #[error("malformed chat frame: {0}")]
    Json(#[from] serde_json::Error),

    #[error("chat frame missing field `{0}`")]
    MissingField(&'static str),
}

/// Supervisor-level failures when starting a streamer.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("monitor is shutting down")]
    ShuttingDown,
}
