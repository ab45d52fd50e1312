//! Error types for the beacon engine.

use crate::ConfigType;
use thiserror::Error;

/// All possible errors from the beacon engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("unknown config type: {0}")]
    UnknownType(ConfigType),

    #[error("invalid payload for config type '{kind}': {reason}")]
    InvalidPayload { kind: ConfigType, reason: String },

    #[error("config type must not be empty")]
    EmptyType,

    #[error("config id must not be empty")]
    EmptyId,
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
