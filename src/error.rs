/// Unified error types for netwarden
use thiserror::Error;

/// Main error type for the reconciliation service
#[derive(Error, Debug)]
pub enum WardenError {
    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Migration errors
    #[error("Migration error: {0}")]
    Migration(String),

    /// Controller API errors (unreachable, malformed reply, missing credentials)
    #[error("Controller error: {0}")]
    Controller(String),

    /// Controller answered with a non-success HTTP status
    #[error("Controller returned {status} for {url}")]
    ControllerStatus { status: u16, url: String },

    /// HTTP transport errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Stored or received data could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for WardenError {
    fn from(e: serde_json::Error) -> Self {
        WardenError::Decode(e.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for WardenError {
    fn from(e: sqlx::migrate::MigrateError) -> Self {
        WardenError::Migration(e.to_string())
    }
}

/// Result type alias for netwarden operations
pub type WardenResult<T> = Result<T, WardenError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_message() {
        let err = WardenError::ControllerStatus {
            status: 401,
            url: "http://localhost/controller".to_string(),
        };
        assert_eq!(err.to_string(), "Controller returned 401 for http://localhost/controller");
    }
}
