//! Error types for the shared model

use thiserror::Error;

/// Result type alias for model conversions
pub type Result<T> = std::result::Result<T, TypesError>;

/// Errors raised while parsing model values from text
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TypesError {
    #[error("unknown window type: {0}")]
    UnknownWindowType(String),

    #[error("unknown playback kind: {0}")]
    UnknownPlaybackKind(String),
}
