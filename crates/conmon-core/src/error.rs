use thiserror::Error;

/// Application-wide error types for conmon.
#[derive(Error, Debug)]
pub enum AppError {
    /// HTTP request failed (loading a page or calling a relay).
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Network/connection error.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// A page load or engine execution exceeded its allotted time.
    #[error("Timed out after {0} seconds")]
    Timeout(u64),

    /// Invalid or missing configuration (extraction config, env vars).
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// A selector or parser could not be evaluated against a page.
    #[error("Extraction error: {0}")]
    ExtractionError(String),

    /// The navigation program reached an inconsistent state.
    #[error("Step error: {0}")]
    StepError(String),

    /// The crawl engine process failed or produced a malformed stream.
    #[error("Engine error: {0}")]
    EngineError(String),

    /// Database operation failed.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// A field set or row could not be mapped to or from an entity.
    #[error("Mapping error: {0}")]
    MappingError(String),

    /// The digest could not be delivered.
    #[error("Notification error: {0}")]
    NotificationError(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

impl AppError {
    /// Returns true if this error was raised while evaluating a page.
    pub fn is_extraction(&self) -> bool {
        matches!(self, AppError::ExtractionError(_) | AppError::StepError(_))
    }
}
