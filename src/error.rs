//! Error types for the aggregate assembler
//!
//! This module defines the error taxonomy shared by every stage of an
//! assembly run: configuration, manifest validation, output storage,
//! network transfer and per-task verification.

use std::fmt;

/// Comprehensive error type for assembly operations
#[derive(Debug, Clone)]
pub enum AssembleError {
    /// Bad flags, paths, or a pre-existing output that cannot be reused
    ConfigError {
        message: String,
        field: Option<String>,
    },

    /// Malformed manifest or a plan that does not match its declared aggregate
    ManifestError {
        message: String,
        source: Option<String>,
    },

    /// Allocation, truncation and mapping failures on the output file
    StorageError {
        message: String,
        path: Option<String>,
        source: Option<String>,
    },

    /// Transport-level failures talking to a piece source
    NetworkError {
        message: String,
        url: Option<String>,
        source: Option<String>,
        is_retryable: bool,
    },

    /// Fatal failure of a single task (bad status, short body, digest mismatch)
    TaskError {
        message: String,
        url: Option<String>,
        commitment: Option<String>,
    },

    /// Malformed values (commitments, sizes)
    ValidationError {
        message: String,
        field: Option<String>,
    },

    /// The run was cancelled before the operation could finish
    Cancelled {
        message: String,
    },
}

impl AssembleError {
    /// Create a new ConfigError
    pub fn config_error(message: impl Into<String>) -> Self {
        AssembleError::ConfigError {
            message: message.into(),
            field: None,
        }
    }

    /// Create a new ConfigError with field
    pub fn config_error_with_field(message: impl Into<String>, field: impl Into<String>) -> Self {
        AssembleError::ConfigError {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create a new ManifestError
    pub fn manifest_error(message: impl Into<String>) -> Self {
        AssembleError::ManifestError {
            message: message.into(),
            source: None,
        }
    }

    /// Create a new ManifestError with source
    pub fn manifest_error_with_source(message: impl Into<String>, source: impl Into<String>) -> Self {
        AssembleError::ManifestError {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Create a new StorageError with path and source
    pub fn storage_error_full(message: impl Into<String>, path: impl Into<String>, source: impl Into<String>) -> Self {
        AssembleError::StorageError {
            message: message.into(),
            path: Some(path.into()),
            source: Some(source.into()),
        }
    }

    /// Create a new NetworkError for a url
    pub fn network_error(message: impl Into<String>, url: impl Into<String>, is_retryable: bool) -> Self {
        AssembleError::NetworkError {
            message: message.into(),
            url: Some(url.into()),
            source: None,
            is_retryable,
        }
    }

    /// Create a new NetworkError with url and source
    pub fn network_error_full(
        message: impl Into<String>,
        url: impl Into<String>,
        source: impl Into<String>,
        is_retryable: bool,
    ) -> Self {
        AssembleError::NetworkError {
            message: message.into(),
            url: Some(url.into()),
            source: Some(source.into()),
            is_retryable,
        }
    }

    /// Create a new TaskError
    pub fn task_error(message: impl Into<String>) -> Self {
        AssembleError::TaskError {
            message: message.into(),
            url: None,
            commitment: None,
        }
    }

    /// Create a new TaskError naming the source and the expected commitment
    pub fn task_error_full(message: impl Into<String>, url: impl Into<String>, commitment: impl Into<String>) -> Self {
        AssembleError::TaskError {
            message: message.into(),
            url: Some(url.into()),
            commitment: Some(commitment.into()),
        }
    }

    /// Create a new ValidationError
    pub fn validation_error(message: impl Into<String>) -> Self {
        AssembleError::ValidationError {
            message: message.into(),
            field: None,
        }
    }

    /// Create a new ValidationError with field
    pub fn validation_error_with_field(message: impl Into<String>, field: impl Into<String>) -> Self {
        AssembleError::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create a new Cancelled error
    pub fn cancelled(message: impl Into<String>) -> Self {
        AssembleError::Cancelled {
            message: message.into(),
        }
    }

    /// Whether the HTTP layer may retry the operation that produced this error
    pub fn is_retryable(&self) -> bool {
        matches!(self, AssembleError::NetworkError { is_retryable: true, .. })
    }

    /// Whether this error only reflects the run having been cancelled
    pub fn is_cancelled(&self) -> bool {
        matches!(self, AssembleError::Cancelled { .. })
    }

    /// Add context to the error
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        let ctx = context.into();
        match &mut self {
            AssembleError::ManifestError { source, .. }
            | AssembleError::StorageError { source, .. }
            | AssembleError::NetworkError { source, .. } => {
                *source = Some(source.as_ref().map_or_else(|| ctx.clone(), |s| format!("{}: {}", s, ctx)));
            }
            AssembleError::TaskError { message, .. } | AssembleError::Cancelled { message } => {
                *message = format!("{}: {}", message, ctx);
            }
            _ => {}
        }
        self
    }
}

impl fmt::Display for AssembleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssembleError::ConfigError { message, field } => {
                if let Some(field_val) = field {
                    write!(f, "Config error: {} (field: {})", message, field_val)
                } else {
                    write!(f, "Config error: {}", message)
                }
            }
            AssembleError::ManifestError { message, source } => {
                if let Some(src) = source {
                    write!(f, "Manifest error: {} (source: {})", message, src)
                } else {
                    write!(f, "Manifest error: {}", message)
                }
            }
            AssembleError::StorageError { message, path, source } => {
                match (path, source) {
                    (Some(p), Some(s)) => write!(f, "Storage error: {} (path: {}, source: {})", message, p, s),
                    (Some(p), None) => write!(f, "Storage error: {} (path: {})", message, p),
                    (None, Some(s)) => write!(f, "Storage error: {} (source: {})", message, s),
                    (None, None) => write!(f, "Storage error: {}", message),
                }
            }
            AssembleError::NetworkError { message, url, source, is_retryable } => {
                let kind = if *is_retryable { "Network error (retryable)" } else { "Network error" };
                match (url, source) {
                    (Some(u), Some(s)) => write!(f, "{}: {} (url: {}, source: {})", kind, message, u, s),
                    (Some(u), None) => write!(f, "{}: {} (url: {})", kind, message, u),
                    (None, Some(s)) => write!(f, "{}: {} (source: {})", kind, message, s),
                    (None, None) => write!(f, "{}: {}", kind, message),
                }
            }
            AssembleError::TaskError { message, url, commitment } => {
                match (url, commitment) {
                    (Some(u), Some(c)) => write!(f, "Task error: {} (url: {}, commitment: {})", message, u, c),
                    (Some(u), None) => write!(f, "Task error: {} (url: {})", message, u),
                    (None, Some(c)) => write!(f, "Task error: {} (commitment: {})", message, c),
                    (None, None) => write!(f, "Task error: {}", message),
                }
            }
            AssembleError::ValidationError { message, field } => {
                if let Some(field_val) = field {
                    write!(f, "Validation error: {} (field: {})", message, field_val)
                } else {
                    write!(f, "Validation error: {}", message)
                }
            }
            AssembleError::Cancelled { message } => write!(f, "Cancelled: {}", message),
        }
    }
}

impl std::error::Error for AssembleError {}

impl From<std::io::Error> for AssembleError {
    fn from(err: std::io::Error) -> Self {
        AssembleError::storage_error_full(err.to_string(), "unknown", err.kind().to_string())
    }
}

impl From<serde_json::Error> for AssembleError {
    fn from(err: serde_json::Error) -> Self {
        AssembleError::manifest_error_with_source("Failed to decode manifest JSON", err.to_string())
    }
}

impl From<url::ParseError> for AssembleError {
    fn from(err: url::ParseError) -> Self {
        AssembleError::validation_error_with_field(format!("Invalid URL: {}", err), "sources")
    }
}

impl From<reqwest::Error> for AssembleError {
    fn from(err: reqwest::Error) -> Self {
        let url = err.url().map(|u| u.to_string()).unwrap_or_else(|| "unknown".to_string());
        // Body/decode errors mid-transfer are connection drops as far as a retry is concerned
        let retryable = err.is_timeout() || err.is_connect() || err.is_request() || err.is_body();
        AssembleError::network_error_full("HTTP request failed", url, err.to_string(), retryable)
    }
}

impl From<tokio::time::error::Elapsed> for AssembleError {
    fn from(_err: tokio::time::error::Elapsed) -> Self {
        AssembleError::task_error("Operation timed out")
    }
}
