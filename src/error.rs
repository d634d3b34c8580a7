//! Error types for Libris server

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Application error codes returned in every error body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorCode {
    Failure = 1,
    NotAuthorized = 2,
    DbFailure = 3,
    NoSuchData = 4,
    BadValue = 5,
    Duplicate = 6,
    AlreadyBorrowed = 7,
    AlreadyReturned = 8,
    NotAvailable = 9,
    Busy = 10,
}

/// Main application error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Authorization failed: {0}")]
    Authorization(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    /// The user already holds an open loan for this book
    #[error("Already borrowed: {0}")]
    AlreadyBorrowed(String),

    /// The loan is already closed
    #[error("Already returned: {0}")]
    AlreadyReturned(String),

    /// No copies left to lend
    #[error("Unavailable: {0}")]
    Unavailable(String),

    /// Lock wait timed out or the store aborted the transaction under contention
    #[error("Busy: {0}")]
    Busy(String),
}

impl AppError {
    /// Transient failures that may succeed when the operation is attempted again
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::Busy(_))
    }

    /// Guard rejections that leave state untouched and are reported as warnings
    pub fn is_warning(&self) -> bool {
        matches!(self, AppError::AlreadyBorrowed(_) | AppError::AlreadyReturned(_))
    }
}

/// Postgres SQLSTATE codes raised by lock contention
const LOCK_NOT_AVAILABLE: &str = "55P03";
const DEADLOCK_DETECTED: &str = "40P01";
const SERIALIZATION_FAILURE: &str = "40001";
const UNIQUE_VIOLATION: &str = "23505";

/// Classify a database error raised inside a lending transaction.
///
/// Lock timeouts, deadlocks and pool exhaustion become [`AppError::Busy`];
/// anything else stays a storage failure.
pub fn classify_lock_error(err: sqlx::Error) -> AppError {
    if let sqlx::Error::PoolTimedOut = err {
        return AppError::Busy("Timed out waiting for a database connection".to_string());
    }
    if let sqlx::Error::Database(ref db_err) = err {
        match db_err.code().as_deref() {
            Some(LOCK_NOT_AVAILABLE) => {
                return AppError::Busy("Timed out waiting for a row lock".to_string())
            }
            Some(DEADLOCK_DETECTED) | Some(SERIALIZATION_FAILURE) => {
                return AppError::Busy("Transaction aborted under contention".to_string())
            }
            _ => {}
        }
    }
    AppError::Database(err)
}

/// True when `err` is a unique constraint violation
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().as_deref() == Some(UNIQUE_VIOLATION),
        _ => false,
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        AppError::Validation(errors.to_string())
    }
}

/// Error response body
#[derive(Serialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    pub code: u32,
    pub error: String,
    pub message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Authentication(msg) => {
                (StatusCode::UNAUTHORIZED, ErrorCode::NotAuthorized, msg.clone())
            }
            AppError::Authorization(msg) => {
                (StatusCode::FORBIDDEN, ErrorCode::NotAuthorized, msg.clone())
            }
            AppError::NotFound(msg) => {
                (StatusCode::NOT_FOUND, ErrorCode::NoSuchData, msg.clone())
            }
            AppError::Validation(msg) => {
                (StatusCode::BAD_REQUEST, ErrorCode::BadValue, msg.clone())
            }
            AppError::Database(e) => {
                tracing::error!("Database error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorCode::DbFailure,
                    "Database error".to_string(),
                )
            }
            AppError::Conflict(msg) => {
                (StatusCode::CONFLICT, ErrorCode::Duplicate, msg.clone())
            }
            AppError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, ErrorCode::BadValue, msg.clone())
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorCode::Failure,
                    "Internal server error".to_string(),
                )
            }
            AppError::AlreadyBorrowed(msg) => {
                (StatusCode::CONFLICT, ErrorCode::AlreadyBorrowed, msg.clone())
            }
            AppError::AlreadyReturned(msg) => {
                (StatusCode::CONFLICT, ErrorCode::AlreadyReturned, msg.clone())
            }
            AppError::Unavailable(msg) => {
                (StatusCode::CONFLICT, ErrorCode::NotAvailable, msg.clone())
            }
            AppError::Busy(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, ErrorCode::Busy, msg.clone())
            }
        };

        let body = Json(ErrorResponse {
            code: code as u32,
            error: format!("{:?}", code),
            message,
        });

        (status, body).into_response()
    }
}

/// Result type alias for application operations
pub type AppResult<T> = Result<T, AppError>;
