//! Error types for the pattern registry.
//!
//! All errors are explicitly typed using thiserror. No panics in production code.

use thiserror::Error;

use crate::models::Category;

/// Central error type for all registry operations.
#[derive(Debug, Error)]
pub enum WardenError {
    /// Configuration error (missing env vars, invalid values).
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal state error (failed background task, matcher no longer compiling).
    #[error("Internal state error: {0}")]
    InternalState(String),

    /// Regex pattern compilation error.
    #[error("Regex pattern error: {0}")]
    RegexPattern(#[from] regex::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Database error.
    #[error("Database error: {0}")]
    Database(String),

    /// Storage collaborator failed to load or save.
    #[error("Storage error: {0}")]
    Storage(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(String),

    /// Transport collaborator failed to deliver a notice or artifact.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Category is unknown or not enabled in this process.
    #[error("Unknown category: {0}")]
    UnknownCategory(String),

    /// Requested page lies outside the listing.
    #[error("Page {page} out of range (1..={page_count})")]
    InvalidPage {
        /// Requested page number.
        page: usize,
        /// Number of pages available.
        page_count: usize,
    },

    /// Malformed command or callback request.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl WardenError {
    /// Log error with full context using tracing
    ///
    /// This method logs errors with appropriate severity and structured fields
    /// for debugging and monitoring.
    pub fn log_with_context(&self, context: &ErrorContext) {
        let category = context.category.map(|c| c.as_str());
        match self {
            // Critical errors that require immediate attention
            Self::Database(_) | Self::Storage(_) | Self::InternalState(_) => {
                tracing::error!(
                    error = %self,
                    request_id = %context.request_id,
                    category = ?category,
                    token = ?context.token,
                    operation = %context.operation,
                    "Critical error occurred"
                );
            }
            // Peers being unreachable never affects local state
            Self::Transport(_) => {
                tracing::warn!(
                    error = %self,
                    request_id = %context.request_id,
                    operation = %context.operation,
                    "Transport error"
                );
            }
            Self::Config(_) | Self::RegexPattern(_) => {
                tracing::error!(
                    error = %self,
                    request_id = %context.request_id,
                    operation = %context.operation,
                    "Configuration error"
                );
            }
            Self::Json(_) | Self::Io(_) => {
                tracing::error!(
                    error = %self,
                    request_id = %context.request_id,
                    category = ?category,
                    operation = %context.operation,
                    "Data processing error"
                );
            }
            // User input problems
            Self::UnknownCategory(_) | Self::InvalidPage { .. } | Self::InvalidRequest(_) => {
                tracing::debug!(
                    error = %self,
                    request_id = %context.request_id,
                    category = ?category,
                    operation = %context.operation,
                    "Rejected request"
                );
            }
        }
    }

    /// Get user-friendly error message (hides internal details)
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Config(_) => "Service configuration error",
            Self::InternalState(_) => "Internal service error",
            Self::RegexPattern(_) => "Invalid pattern",
            Self::Json(_) => "Data format error",
            Self::Database(_) | Self::Storage(_) => "Storage temporarily unavailable",
            Self::Io(_) => "File system error",
            Self::Transport(_) => "Peer exchange temporarily unavailable",
            Self::UnknownCategory(_) => "Unknown category",
            Self::InvalidPage { .. } => "Page out of range",
            Self::InvalidRequest(_) => "Invalid request",
        }
    }
}

/// Context information for error logging
#[derive(Debug, Clone)]
pub struct ErrorContext {
    /// Unique request identifier for correlation
    pub request_id: String,
    /// Category the request targeted, if any
    pub category: Option<Category>,
    /// Pending confirmation token, if any
    pub token: Option<String>,
    /// Operation being performed
    pub operation: String,
}

impl ErrorContext {
    /// Create a new error context
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            category: None,
            token: None,
            operation: operation.into(),
        }
    }

    /// Set category
    pub fn with_category(mut self, category: Category) -> Self {
        self.category = Some(category);
        self
    }

    /// Set pending token
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }
}

/// Result type alias for registry operations.
pub type Result<T> = std::result::Result<T, WardenError>;
