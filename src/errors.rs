use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;

/// Application-specific error types.
#[derive(Debug)]
pub enum AppError {
    /// Database-related errors.
    Database(sqlx::Error),
    /// The caller could not be resolved to a registered principal.
    Unauthorized(String),
    /// Resource not found error.
    NotFound(String),
    /// Bad request error (invalid input).
    BadRequest(String),
    /// The access gate refused the request (account, origin, or protection).
    Denied {
        /// Client-facing denial message.
        message: String,
        /// Stored protection reason, when one applies.
        reason: Option<String>,
    },
    /// The principal's balance does not cover the service cost.
    InsufficientCredits {
        /// Current balance, returned so the client can prompt a recharge.
        credits: i64,
    },
    /// The provider affirmatively has no record for the query.
    ProviderAbsence(String),
    /// The provider rejected the query with a terminal, client-visible error.
    ProviderOther(String),
    /// Every retry attempt failed; carries the last error and the attempt count.
    ProviderExhausted {
        /// Last observed provider or transport error.
        message: String,
        /// Total attempts made before giving up.
        attempts: u32,
    },
    /// The per-request upstream deadline elapsed before the retry loop finished.
    DeadlineExceeded(u64),
    /// Internal server error.
    Internal(String),
    /// Error with context chain for better debugging.
    WithContext {
        /// The underlying source of the error.
        source: Box<AppError>,
        /// Additional context message.
        context: String,
    },
}

impl fmt::Display for AppError {
    /// Formats the error for display.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Database(e) => write!(f, "Database error: {}", e),
            AppError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::Denied { message, reason } => match reason {
                Some(r) => write!(f, "Denied: {} ({})", message, r),
                None => write!(f, "Denied: {}", message),
            },
            AppError::InsufficientCredits { credits } => {
                write!(f, "Insufficient credits (balance: {})", credits)
            }
            AppError::ProviderAbsence(msg) => write!(f, "Provider has no record: {}", msg),
            AppError::ProviderOther(msg) => write!(f, "Provider error: {}", msg),
            AppError::ProviderExhausted { message, attempts } => {
                write!(f, "Provider failed after {} attempts: {}", attempts, message)
            }
            AppError::DeadlineExceeded(secs) => {
                write!(f, "Lookup deadline of {}s exceeded", secs)
            }
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
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
    /// Maps each variant to its status code (402 insufficient credits, 403
    /// denied, 404 absence, 400 provider rejection, 500 exhausted/internal)
    /// and the structured JSON body clients consume.
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            AppError::Database(e) => {
                tracing::error!("Database error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "success": false, "message": "Internal server error" }),
                )
            }
            AppError::Unauthorized(msg) => {
                tracing::warn!("Unauthorized access: {}", msg);
                (
                    StatusCode::UNAUTHORIZED,
                    json!({ "success": false, "message": msg }),
                )
            }
            AppError::NotFound(msg) => (
                StatusCode::NOT_FOUND,
                json!({ "success": false, "message": msg }),
            ),
            AppError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                json!({ "success": false, "message": msg }),
            ),
            AppError::Denied { message, reason } => {
                tracing::warn!("Access denied: {}", self);
                let body = match reason {
                    Some(r) => json!({ "success": false, "message": message, "reason": r }),
                    None => json!({ "success": false, "message": message }),
                };
                (StatusCode::FORBIDDEN, body)
            }
            AppError::InsufficientCredits { credits } => (
                StatusCode::PAYMENT_REQUIRED,
                json!({ "success": false, "message": "Insufficient credits", "credits": credits }),
            ),
            AppError::ProviderAbsence(msg) => (
                StatusCode::NOT_FOUND,
                json!({ "success": false, "message": msg }),
            ),
            AppError::ProviderOther(msg) => (
                StatusCode::BAD_REQUEST,
                json!({ "success": false, "message": msg }),
            ),
            AppError::ProviderExhausted { message, attempts } => {
                tracing::error!("Upstream exhausted after {} attempts: {}", attempts, message);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "success": false, "message": message, "attempts": attempts }),
                )
            }
            AppError::DeadlineExceeded(secs) => {
                tracing::error!("Upstream deadline of {}s exceeded", secs);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "success": false, "message": "External lookup timed out" }),
                )
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "success": false, "message": "Internal server error" }),
                )
            }
            AppError::WithContext { source, context } => {
                // Log full context chain for debugging
                tracing::error!("Error with context: {} -> {}", context, source);
                // Delegate to underlying error's response
                return source.clone().into_response();
            }
        };

        (status, Json(body)).into_response()
    }
}

// Make AppError cloneable for WithContext variant
impl Clone for AppError {
    /// Clones the error.
    ///
    /// Note: `sqlx::Error` is not cloneable, so `Database` is simplified to
    /// `RowNotFound` during cloning.
    fn clone(&self) -> Self {
        match self {
            AppError::Database(_e) => AppError::Database(sqlx::Error::RowNotFound),
            AppError::Unauthorized(msg) => AppError::Unauthorized(msg.clone()),
            AppError::NotFound(msg) => AppError::NotFound(msg.clone()),
            AppError::BadRequest(msg) => AppError::BadRequest(msg.clone()),
            AppError::Denied { message, reason } => AppError::Denied {
                message: message.clone(),
                reason: reason.clone(),
            },
            AppError::InsufficientCredits { credits } => {
                AppError::InsufficientCredits { credits: *credits }
            }
            AppError::ProviderAbsence(msg) => AppError::ProviderAbsence(msg.clone()),
            AppError::ProviderOther(msg) => AppError::ProviderOther(msg.clone()),
            AppError::ProviderExhausted { message, attempts } => AppError::ProviderExhausted {
                message: message.clone(),
                attempts: *attempts,
            },
            AppError::DeadlineExceeded(secs) => AppError::DeadlineExceeded(*secs),
            AppError::Internal(msg) => AppError::Internal(msg.clone()),
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
        AppError::Database(err)
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
    #[allow(dead_code)]
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
            source: Box::new(AppError::Database(e)),
            context: context.into(),
        })
    }

    fn with_context<F>(self, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(AppError::Database(e)),
            context: f(),
        })
    }
}
