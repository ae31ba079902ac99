use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;

/// Failures raised by the inference client.
///
/// Only `Overloaded` is ever retried (inside the client itself); everything else is
/// terminal for the call that produced it.
#[derive(Debug, Clone, thiserror::Error)]
pub enum InferenceError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("inference provider overburdened after {attempts} attempts")]
    Overloaded { attempts: u32 },
    #[error("inference provider returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("schema validation failed for field '{field}': {reason}")]
    SchemaValidation { field: String, reason: String },
    #[error("malformed JSON: {0}")]
    MalformedJson(String),
    #[error("no structured output found in response")]
    NoStructuredOutput,
}

/// One failed unit of the detail-analysis fan-out.
#[derive(Debug, Clone, PartialEq)]
pub struct CategoryFailure {
    pub category: String,
    pub message: String,
}

impl fmt::Display for CategoryFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "error analyzing category {}: {}", self.category, self.message)
    }
}

/// Application-specific error types.
#[derive(Debug)]
pub enum AppError {
    /// Database-related errors.
    DatabaseError(sqlx::Error),
    /// Resource not found error.
    NotFound(String),
    /// Bad request error (invalid input).
    BadRequest(String),
    /// Error interacting with an external API.
    ExternalApiError(String),
    /// Internal server error.
    InternalError(String),
    /// The inference call failed.
    Inference(InferenceError),
    /// An extracted entity references something that could not be resolved.
    EntityResolution(String),
    /// The store circuit breaker is open.
    StoreUnavailable(String),
    /// Every failed category of a fan-out, in triage order.
    Aggregate(Vec<CategoryFailure>),
    /// Error with context chain for better debugging.
    WithContext {
        /// The underlying source of the error.
        source: Box<AppError>,
        /// Additional context message.
        context: String,
    },
}

impl AppError {
    /// Category failures carried by this error, looking through context wrappers.
    pub fn category_failures(&self) -> &[CategoryFailure] {
        match self {
            AppError::Aggregate(failures) => failures,
            AppError::WithContext { source, .. } => source.category_failures(),
            _ => &[],
        }
    }
}

impl fmt::Display for AppError {
    /// Formats the error for display.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::DatabaseError(e) => write!(f, "Database error: {}", e),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::ExternalApiError(msg) => write!(f, "External API error: {}", msg),
            AppError::InternalError(msg) => write!(f, "Internal error: {}", msg),
            AppError::Inference(e) => write!(f, "Inference error: {}", e),
            AppError::EntityResolution(msg) => write!(f, "Entity resolution error: {}", msg),
            AppError::StoreUnavailable(msg) => write!(f, "Store unavailable: {}", msg),
            AppError::Aggregate(failures) => {
                write!(f, "multiple errors occurred:")?;
                for failure in failures {
                    write!(f, "\n  - {}", failure)?;
                }
                Ok(())
            }
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
    /// Pipeline failures never reach this path (runs are detached from the request), so
    /// everything past input validation is reported as a generic server-side failure.
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            AppError::DatabaseError(e) => {
                tracing::error!("Database error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Database error".to_string(),
                )
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::ExternalApiError(msg) => {
                tracing::error!("External API error: {}", msg);
                (
                    StatusCode::BAD_GATEWAY,
                    "External service error".to_string(),
                )
            }
            AppError::Inference(e) => {
                tracing::error!("Inference error: {}", e);
                (
                    StatusCode::BAD_GATEWAY,
                    "External service error".to_string(),
                )
            }
            AppError::StoreUnavailable(msg) => {
                tracing::warn!("Store unavailable: {}", msg);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Service temporarily unavailable".to_string(),
                )
            }
            AppError::InternalError(_)
            | AppError::EntityResolution(_)
            | AppError::Aggregate(_) => {
                tracing::error!("Internal error: {}", self);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            AppError::WithContext { source, context } => {
                // Log full context chain for debugging
                tracing::error!("Error with context: {} -> {}", context, source);
                // Delegate to underlying error's response
                return source.clone().into_response();
            }
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

// Make AppError cloneable for WithContext variant
impl Clone for AppError {
    /// Clones the error.
    ///
    /// Note: `sqlx::Error` is not cloneable, so `DatabaseError` is simplified to `RowNotFound` during cloning.
    fn clone(&self) -> Self {
        match self {
            // Simplified clone
            AppError::DatabaseError(_e) => AppError::DatabaseError(sqlx::Error::RowNotFound),
            AppError::NotFound(msg) => AppError::NotFound(msg.clone()),
            AppError::BadRequest(msg) => AppError::BadRequest(msg.clone()),
            AppError::ExternalApiError(msg) => AppError::ExternalApiError(msg.clone()),
            AppError::InternalError(msg) => AppError::InternalError(msg.clone()),
            AppError::Inference(e) => AppError::Inference(e.clone()),
            AppError::EntityResolution(msg) => AppError::EntityResolution(msg.clone()),
            AppError::StoreUnavailable(msg) => AppError::StoreUnavailable(msg.clone()),
            AppError::Aggregate(failures) => AppError::Aggregate(failures.clone()),
            AppError::WithContext { source, context } => AppError::WithContext {
                source: source.clone(),
                context: context.clone(),
            },
        }
    }
}

impl From<sqlx::Error> for AppError {
    /// Converts a `sqlx::Error` into an `AppError`.
    fn from(err: sqlx::Error) -> Self {
        AppError::DatabaseError(err)
    }
}

impl From<reqwest::Error> for AppError {
    /// Converts a `reqwest::Error` into an `AppError`.
    fn from(err: reqwest::Error) -> Self {
        AppError::ExternalApiError(err.to_string())
    }
}

impl From<InferenceError> for AppError {
    fn from(err: InferenceError) -> Self {
        AppError::Inference(err)
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::InternalError(format!("JSON conversion failed: {}", err))
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

/// Extension for sqlx::Error to add context
impl<T> ResultExt<T> for Result<T, sqlx::Error> {
    fn context(self, context: impl Into<String>) -> Result<T, AppError> {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(AppError::DatabaseError(e)),
            context: context.into(),
        })
    }

    fn with_context<F>(self, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(AppError::DatabaseError(e)),
            context: f(),
        })
    }
}

impl<T> ResultExt<T> for Result<T, InferenceError> {
    fn context(self, context: impl Into<String>) -> Result<T, AppError> {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(AppError::Inference(e)),
            context: context.into(),
        })
    }

    fn with_context<F>(self, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(AppError::Inference(e)),
            context: f(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate_display_lists_every_category() {
        let err = AppError::Aggregate(vec![
            CategoryFailure {
                category: "CAPACITY".to_string(),
                message: "service not found".to_string(),
            },
            CategoryFailure {
                category: "CONTACT".to_string(),
                message: "timeout".to_string(),
            },
        ]);

        let rendered = err.to_string();
        assert!(rendered.starts_with("multiple errors occurred:"));
        assert!(rendered.contains("error analyzing category CAPACITY: service not found"));
        assert!(rendered.contains("error analyzing category CONTACT: timeout"));
        assert_eq!(rendered.lines().count(), 3);
    }

    #[test]
    fn test_category_failures_visible_through_context() {
        let err: Result<(), AppError> = Err(AppError::Aggregate(vec![CategoryFailure {
            category: "CAPACITY".to_string(),
            message: "boom".to_string(),
        }]));

        let wrapped = err.context("detail fan-out").unwrap_err();
        assert_eq!(wrapped.category_failures().len(), 1);
        assert_eq!(wrapped.category_failures()[0].category, "CAPACITY");
    }

    #[test]
    fn test_inference_context_wraps_error() {
        let err: Result<(), InferenceError> = Err(InferenceError::NoStructuredOutput);
        let wrapped = err.context("triage").unwrap_err();
        assert_eq!(
            wrapped.to_string(),
            "triage: Inference error: no structured output found in response"
        );
    }
}
