//! Error types for vncgate

use thiserror::Error;

/// Result type alias using the vncgate Error
pub type Result<T> = std::result::Result<T, Error>;

/// vncgate error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Public endpoint {0:?} is configured more than once")]
    DuplicateEndpoint(String),

    #[error("No signing key configured, refusing to mint action tokens")]
    MissingSigningKey,

    #[error("Token error: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),
}
