use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;

/// Application-specific error types.
#[derive(Debug, Clone)]
pub enum AppError {
    /// Unsupported extension, empty or unreadable upload. Fatal to that file only.
    FileFormatError(String),
    /// Row-level data defect. Collected, never fatal to a job.
    ValidationError(String),
    /// Transient transport failure talking to the scoring service
    /// (non-2xx, network error, timeout). Counts toward tripping the circuit.
    ScoringServiceError(String),
    /// The scoring service answered but declared the request failed
    /// (`"success": false`). Does not count toward tripping the circuit.
    ScoringRejected(String),
    /// Circuit is open; the call was not attempted.
    ServiceUnavailable {
        /// Seconds until the guard admits a probe call.
        retry_after_secs: u64,
    },
    /// Attempted transition on a review item that already has a decision.
    ReviewConflictError(String),
    /// Resource not found error.
    NotFound(String),
    /// Bad request error (invalid input).
    BadRequest(String),
    /// Internal server error.
    InternalError(String),
    /// Error with context chain for better debugging.
    WithContext {
        /// The underlying source of the error.
        source: Box<AppError>,
        /// Additional context message.
        context: String,
    },
}

impl AppError {
    /// Whether this error should count as a failed attempt against the scorer.
    pub fn is_transport_failure(&self) -> bool {
        match self {
            AppError::ScoringServiceError(_) => true,
            AppError::WithContext { source, .. } => source.is_transport_failure(),
            _ => false,
        }
    }

    /// Strips `WithContext` wrappers.
    pub fn root(&self) -> &AppError {
        match self {
            AppError::WithContext { source, .. } => source.root(),
            other => other,
        }
    }
}

impl fmt::Display for AppError {
    /// Formats the error for display.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::FileFormatError(msg) => write!(f, "File format error: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            AppError::ScoringServiceError(msg) => write!(f, "Scoring service error: {}", msg),
            AppError::ScoringRejected(msg) => write!(f, "Scoring rejected: {}", msg),
            AppError::ServiceUnavailable { retry_after_secs } => write!(
                f,
                "Scoring service temporarily unavailable, retry after {}s",
                retry_after_secs
            ),
            AppError::ReviewConflictError(msg) => write!(f, "Review conflict: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::InternalError(msg) => write!(f, "Internal error: {}", msg),
            AppError::WithContext { source, context } => {
                write!(f, "{}: {}", context, source)
            }
        }
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    /// Converts the error into an HTTP response.
    ///
    /// Maps each error variant to an appropriate HTTP status code and JSON body.
    /// Logs errors appropriately based on their severity.
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            AppError::FileFormatError(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::ValidationError(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg.clone()),
            AppError::ScoringServiceError(msg) => {
                tracing::error!("Scoring service error: {}", msg);
                (
                    StatusCode::BAD_GATEWAY,
                    "Scoring service error".to_string(),
                )
            }
            AppError::ScoringRejected(msg) => {
                tracing::warn!("Scoring rejected: {}", msg);
                (StatusCode::BAD_GATEWAY, msg.clone())
            }
            AppError::ServiceUnavailable { retry_after_secs } => {
                let body = Json(json!({
                    "error": "Scoring service temporarily unavailable",
                    "details": "Circuit breaker is open due to repeated failures",
                    "retry_after": retry_after_secs,
                }));
                let mut response = (StatusCode::SERVICE_UNAVAILABLE, body).into_response();
                if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                    response.headers_mut().insert(header::RETRY_AFTER, value);
                }
                return response;
            }
            AppError::ReviewConflictError(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            AppError::WithContext { source, context } => {
                // Log full context chain for debugging
                tracing::error!("Error with context: {} -> {}", context, source);
                // Delegate to underlying error's response
                return (**source).clone().into_response();
            }
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

impl From<reqwest::Error> for AppError {
    /// Converts a `reqwest::Error` into an `AppError`.
    fn from(err: reqwest::Error) -> Self {
        AppError::ScoringServiceError(err.to_string())
    }
}

impl From<csv::Error> for AppError {
    fn from(err: csv::Error) -> Self {
        AppError::FileFormatError(format!("CSV parse error: {}", err))
    }
}

impl From<rust_xlsxwriter::XlsxError> for AppError {
    fn from(err: rust_xlsxwriter::XlsxError) -> Self {
        AppError::InternalError(format!("Spreadsheet export failed: {}", err))
    }
}

/// Extension trait for adding context to errors.
/// Similar to `anyhow::Context` but for our `AppError` type.
pub trait ResultExt<T> {
    /// Add context to an error.
    ///
    /// # Arguments
    ///
    /// * `context` - The context message to add.
    fn context(self, context: impl Into<String>) -> Result<T, AppError>;

    /// Add context lazily (only evaluated on error).
    ///
    /// # Arguments
    ///
    /// * `f` - A closure that produces the context message.
    fn with_context<F>(self, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T, AppError> {
    fn context(self, context: impl Into<String>) -> Result<T, AppError> {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(e),
            context: context.into(),
        })
    }

    fn with_context<F>(self, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(e),
            context: f(),
        })
    }
}
