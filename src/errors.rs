use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;

/// Domain error taxonomy of the search layer.
#[derive(Debug, Clone, PartialEq)]
pub enum AppError {
    /// The search index rejected or failed a query (transport, status, decoding).
    SearchFailed(String),
    /// An identity lookup returned zero hits.
    NotFound(String),
    /// Caller input that cannot be turned into a query.
    InvalidInput(String),
    /// The circuit breaker in front of the index is open.
    Unavailable(String),
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
    /// Strips any context wrappers and returns the innermost error.
    pub fn root(&self) -> &AppError {
        match self {
            AppError::WithContext { source, .. } => source.root(),
            other => other,
        }
    }

    /// True for errors that come from the index rather than the caller.
    pub fn is_index_failure(&self) -> bool {
        matches!(
            self.root(),
            AppError::SearchFailed(_) | AppError::Unavailable(_)
        )
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::SearchFailed(msg) => write!(f, "Search failed: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::InvalidInput(msg) => write!(f, "Invalid input: {}", msg),
            AppError::Unavailable(msg) => write!(f, "Search index unavailable: {}", msg),
            AppError::InternalError(msg) => write!(f, "Internal error: {}", msg),
            AppError::WithContext { source, context } => {
                write!(f, "{}: {}", context, source)
            }
        }
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    /// Maps each variant to a status code and a JSON body.
    ///
    /// Index failures are logged here with the full message and reported to the
    /// client with a generic one, so transport details never leave the service.
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            AppError::SearchFailed(msg) => {
                tracing::error!("Search index error: {}", msg);
                (StatusCode::BAD_GATEWAY, "Search failed".to_string())
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Unavailable(msg) => {
                tracing::warn!("Search index unavailable: {}", msg);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Search temporarily unavailable".to_string(),
                )
            }
            AppError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            AppError::WithContext { source, context } => {
                tracing::error!("Error with context: {} -> {}", context, source);
                return (*source.clone()).into_response();
            }
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::SearchFailed(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::SearchFailed(format!("Malformed index payload: {}", err))
    }
}

/// Extension trait for adding context to errors.
/// Similar to `anyhow::Context` but for our `AppError` type.
pub trait ResultExt<T> {
    /// Add context to an error.
    fn context(self, context: impl Into<String>) -> Result<T, AppError>;

    /// Add context lazily (only evaluated on error).
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_chain_keeps_root() {
        let err: Result<(), AppError> = Err(AppError::NotFound("entity 42".into()));
        let wrapped = err.context("loading detail view").unwrap_err();

        assert_eq!(wrapped.root(), &AppError::NotFound("entity 42".into()));
        assert_eq!(
            wrapped.to_string(),
            "loading detail view: Not found: entity 42"
        );
    }

    #[test]
    fn index_failures_are_classified() {
        assert!(AppError::SearchFailed("timeout".into()).is_index_failure());
        assert!(AppError::Unavailable("open".into()).is_index_failure());
        assert!(!AppError::NotFound("x".into()).is_index_failure());

        let wrapped = AppError::WithContext {
            source: Box::new(AppError::SearchFailed("boom".into())),
            context: "autocomplete".into(),
        };
        assert!(wrapped.is_index_failure());
    }

    #[test]
    fn status_codes() {
        let cases = [
            (AppError::SearchFailed("x".into()), StatusCode::BAD_GATEWAY),
            (AppError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (AppError::InvalidInput("x".into()), StatusCode::BAD_REQUEST),
            (
                AppError::Unavailable("x".into()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(err.into_response().status(), status);
        }
    }
}
