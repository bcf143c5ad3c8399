use thiserror::Error;

/// Type alias for Result with IngestError
pub type Result<T> = std::result::Result<T, IngestError>;

/// Error types for the ingestion pipeline
#[derive(Error, Debug)]
pub enum IngestError {
    /// Mailbox authentication invalid or expired - aborts the scan
    #[error("Authentication failed: {0}")]
    AuthError(String),

    /// Inbox provider returned an error
    #[error("Provider error: {0}")]
    ProviderError(String),

    /// Rate limit from a collaborator - should retry after specified seconds
    #[error("Rate limit exceeded, retry after {retry_after} seconds")]
    RateLimitExceeded { retry_after: u64 },

    /// Network-related error (connection issues, timeouts, etc.)
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Classifier batch call failed
    #[error("Classification error: {0}")]
    ClassificationError(String),

    /// Text or document extraction failed
    #[error("Extraction error: {0}")]
    ExtractionError(String),

    /// Checkpoint store errors
    #[error("Checkpoint error: {0}")]
    CheckpointError(String),

    /// Durable record store errors
    #[error("Store error: {0}")]
    StoreError(String),

    /// Invalid message format or parsing error
    #[error("Invalid message format: {0}")]
    InvalidMessageFormat(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// IO error (file operations, etc.)
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Generic catch-all error
    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl IngestError {
    /// Check if the error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            IngestError::RateLimitExceeded { .. } | IngestError::NetworkError(_)
        )
    }

    /// Check if the error must abort the whole scan.
    ///
    /// Everything below this tier is absorbed into counters and
    /// progress messages; only an authentication failure terminates
    /// the pipeline.
    pub fn is_scan_fatal(&self) -> bool {
        matches!(self, IngestError::AuthError(_))
    }
}
