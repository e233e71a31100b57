use crate::models::match_record::MatchStatus;
use crate::store::StoreError;
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

/// Distinguishes between retryable and permanent errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Retryable,
    Permanent,
}

/// What a client should offer the user when an operation fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UserAffordance {
    /// Generic "try again" affordance
    Retry,
    /// Quota exhausted; prompt for an upgrade
    Upgrade,
    /// Hard denial, retrying will not help
    Deny,
}

#[derive(Debug, Error, Clone)]
pub enum AppError {
    #[error("not authenticated")]
    NotAuthenticated,

    #[error("not authorized")]
    NotAuthorized,

    #[error("record not found: {0}")]
    RecordNotFound(String),

    #[error("write conflict: {0}")]
    WriteConflict(String),

    #[error("discovery quota exceeded")]
    QuotaExceeded,

    #[error("secondary index unavailable: {0}")]
    IndexUnavailable(String),

    #[error("network error: {0}")]
    NetworkError(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid match transition {from:?} -> {to:?}")]
    InvalidTransition { from: MatchStatus, to: MatchStatus },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("server start failure: {0}")]
    StartServer(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::IndexUnavailable(collection) => AppError::IndexUnavailable(collection),
            StoreError::Network(msg) => AppError::NetworkError(msg),
            StoreError::Conflict(msg) => AppError::WriteConflict(msg),
            StoreError::PreconditionFailed { collection, id } => {
                AppError::WriteConflict(format!("precondition failed on {collection}/{id}"))
            }
            StoreError::Serialization(msg) => AppError::Internal(format!("serialization: {msg}")),
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::Internal(format!("serialization: {e}"))
    }
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        if self.is_retryable() {
            ErrorKind::Retryable
        } else {
            ErrorKind::Permanent
        }
    }

    /// Returns whether this error is transient and worth retrying with backoff
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::WriteConflict(_) | AppError::NetworkError(_))
    }

    pub fn affordance(&self) -> UserAffordance {
        match self {
            AppError::QuotaExceeded => UserAffordance::Upgrade,
            AppError::NotAuthorized | AppError::NotAuthenticated => UserAffordance::Deny,
            AppError::InvalidInput(_) | AppError::InvalidTransition { .. } => UserAffordance::Deny,
            _ => UserAffordance::Retry,
        }
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            AppError::NotAuthenticated => "NOT_AUTHENTICATED",
            AppError::NotAuthorized => "NOT_AUTHORIZED",
            AppError::RecordNotFound(_) => "RECORD_NOT_FOUND",
            AppError::WriteConflict(_) => "WRITE_CONFLICT",
            AppError::QuotaExceeded => "QUOTA_EXCEEDED",
            AppError::IndexUnavailable(_) => "INDEX_UNAVAILABLE",
            AppError::NetworkError(_) => "NETWORK_ERROR",
            AppError::InvalidInput(_) => "INVALID_INPUT",
            AppError::InvalidTransition { .. } => "INVALID_TRANSITION",
            AppError::Config(_) | AppError::StartServer(_) | AppError::Internal(_) => {
                "INTERNAL_SERVER_ERROR"
            }
        }
    }

    /// Returns HTTP status code
    pub fn http_status(&self) -> u16 {
        match self {
            AppError::InvalidInput(_) => 400,
            AppError::NotAuthenticated => 401,
            AppError::QuotaExceeded => 402,
            AppError::NotAuthorized => 403,
            AppError::RecordNotFound(_) => 404,
            AppError::WriteConflict(_) | AppError::InvalidTransition { .. } => 409,
            AppError::NetworkError(_) | AppError::IndexUnavailable(_) => 503,
            AppError::Config(_) | AppError::StartServer(_) | AppError::Internal(_) => 500,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: &'static str,
    pub code: &'static str,
    pub message: String,
    pub retryable: bool,
    pub affordance: UserAffordance,
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    fn error_response(&self) -> HttpResponse {
        let status = ResponseError::status_code(self);
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        HttpResponse::build(status).json(ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error"),
            code: self.code(),
            message: self.to_string(),
            retryable: self.is_retryable(),
            affordance: self.affordance(),
        })
    }
}
