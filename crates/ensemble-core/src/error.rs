//! Error types for ensemble-core.

use thiserror::Error;

/// Result type alias for ensemble-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the accompaniment engine.
#[derive(Debug, Error)]
pub enum Error {
    /// A time signature name outside the catalog.
    #[error("unknown time signature: {0}")]
    UnknownTimeSignature(String),

    /// A grouping that does not partition the measure's beats.
    #[error("invalid grouping {grouping:?} for {signature}: {reason}")]
    InvalidGrouping {
        grouping: Vec<u32>,
        signature: String,
        reason: &'static str,
    },

    /// Measure segments that are unsorted, overlapping or empty.
    #[error("invalid measure segment at index {index}: {reason}")]
    InvalidSegment { index: usize, reason: &'static str },

    /// A snapshot rejected at the generator boundary.
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),

    /// A drum preset name that is not in the catalog.
    #[error("unknown drum preset: {0}")]
    UnknownPreset(String),

    /// The other end of the sync channel went away.
    #[error("sync channel disconnected")]
    Disconnected,

    /// The generator worker thread could not be started or joined.
    #[error("generator thread error: {0}")]
    Thread(String),

    /// Configuration file error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Duration parsing error.
    #[error("invalid duration: {0}")]
    Duration(#[from] humantime::DurationError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error.
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
}
