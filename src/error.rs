use thiserror::Error;

/// Error type shared by every history storage backend
#[derive(Error, Debug)]
pub enum HistoryError {
    #[error("Storage is full: {0}")]
    StorageFull(String),

    #[error("Entry already exists")]
    DuplicatedEntry,

    #[error("Entry not found: {0}")]
    NotFound(String),

    #[error("Operation not supported: {0}")]
    NotSupported(String),

    #[error("Request superseded: {0}")]
    Cancelled(String),

    #[error("Query history API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

impl HistoryError {
    /// Create a storage full error
    pub fn storage_full<S: Into<String>>(msg: S) -> Self {
        Self::StorageFull(msg.into())
    }

    /// Create a not found error
    pub fn not_found<S: Into<String>>(id: S) -> Self {
        Self::NotFound(id.into())
    }

    /// Create a not supported error
    pub fn not_supported<S: Into<String>>(operation: S) -> Self {
        Self::NotSupported(operation.into())
    }

    /// Create an invalid input error
    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Stable name of the failure kind, usable by callers that dispatch on it
    pub fn name(&self) -> &'static str {
        match self {
            Self::StorageFull(_) => "StorageFull",
            Self::DuplicatedEntry => "DuplicatedEntry",
            Self::NotFound(_) => "NotFound",
            Self::NotSupported(_) => "NotSupported",
            Self::Cancelled(_) => "Cancelled",
            Self::Api { .. } => "Api",
            Self::InvalidInput(_) => "InvalidInput",
            Self::Configuration(_) => "Configuration",
            Self::Io(_) => "Io",
            Self::Serialization(_) => "Serialization",
            Self::Http(_) => "Http",
            Self::Url(_) => "Url",
        }
    }

    /// Check if the caller may reasonably retry the operation.
    ///
    /// The stores never retry on their own.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Io(_) | Self::Http(_) => true,
            Self::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Get user-friendly error message with suggestions
    pub fn user_message(&self) -> String {
        match self {
            Self::StorageFull(_) => {
                "Query history storage is full. Delete old or unstarred queries to make room."
                    .to_string()
            }
            Self::DuplicatedEntry => "This query is already saved in the history.".to_string(),
            Self::NotFound(id) => {
                format!("History entry '{}' not found. Run 'query-history list' to see saved queries.", id)
            }
            Self::NotSupported(op) => {
                format!("'{}' is not supported by the configured history backend.", op)
            }
            Self::Http(err) => {
                format!("Query history API error: {}. Check the backend URL and your network connection.", err)
            }
            _ => self.to_string(),
        }
    }
}

/// Kind of warning attached to a successful write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningKind {
    /// Older unstarred entries were evicted to respect the item cap
    LimitExceeded,
}

/// Non-fatal condition reported alongside a successful result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryWarning {
    pub kind: WarningKind,
    pub message: String,
}

impl HistoryWarning {
    pub fn limit_exceeded(max_items: usize) -> Self {
        Self {
            kind: WarningKind::LimitExceeded,
            message: format!(
                "Query history reached the limit of {} items. Oldest unstarred queries were removed.",
                max_items
            ),
        }
    }
}

/// Convenient result type for history operations
pub type Result<T> = std::result::Result<T, HistoryError>;
