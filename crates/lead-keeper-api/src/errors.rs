//! Error types for the HTTP service

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use lead_keeper_core::{
    activity::ActivityError, contact_service::ContactError, deal::DealError,
    deal_service::DealServiceError, pipeline::PipelineError, timeline::TimelineError,
    AuthorizationError, ParseError, SignatureError, StorageError, ValidationError,
};
use serde::Serialize;
use tracing::{error, warn};

/// Seconds a client should wait before retrying a transient failure
pub const RETRY_AFTER_SECONDS: u64 = 5;

/// One offending input field
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl From<&ValidationError> for FieldError {
    fn from(error: &ValidationError) -> Self {
        Self {
            field: error.field().to_string(),
            message: error.to_string(),
        }
    }
}

/// Handler errors with HTTP status code mapping
///
/// | variant           | status |
/// |-------------------|--------|
/// | `BadRequest`      | 400    |
/// | `Unauthenticated` | 401    |
/// | `InvalidSignature`| 401    |
/// | `Forbidden`       | 403    |
/// | `NotFound`        | 404    |
/// | `Conflict`        | 409    |
/// | `PayloadTooLarge` | 413    |
/// | `Validation`      | 422    |
/// | `Internal`        | 500    |
/// | `Unavailable`     | 503, with `Retry-After` |
///
/// Internal error details are logged server-side and never returned.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Bad request: {message}")]
    BadRequest { message: String },

    #[error("Authentication required: {message}")]
    Unauthenticated { message: String },

    #[error("Invalid webhook signature: {0}")]
    InvalidSignature(#[from] SignatureError),

    #[error(transparent)]
    Forbidden(#[from] AuthorizationError),

    #[error("{message}")]
    NotFound { message: String },

    #[error("{message}")]
    Conflict { message: String },

    #[error("Payload too large (max: {max_size} bytes)")]
    PayloadTooLarge { max_size: usize },

    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        fields: Vec<FieldError>,
    },

    #[error("Service temporarily unavailable: {message}")]
    Unavailable { message: String },

    #[error("Internal server error: {message}")]
    Internal { message: String },
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Self::Unauthenticated { .. } | Self::InvalidSignature(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Conflict { .. } => StatusCode::CONFLICT,
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Validation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Unavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        let (message, fields, retry_after) = match self {
            Self::Internal { ref message } => {
                error!(error = %message, "Internal server error occurred");
                (
                    "Internal server error occurred. Please try again later.".to_string(),
                    None,
                    None,
                )
            }
            Self::Unavailable { ref message } => {
                warn!(error = %message, "Transient failure");
                (self.to_string(), None, Some(RETRY_AFTER_SECONDS))
            }
            Self::Validation { ref fields, .. } => {
                let fields = fields.clone();
                (self.to_string(), Some(fields), None)
            }
            _ => (self.to_string(), None, None),
        };

        let mut body = serde_json::json!({
            "error": message,
            "status": status.as_u16(),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });
        if let Some(fields) = fields {
            body["fields"] = serde_json::json!(fields);
        }

        let mut response = (status, Json(body)).into_response();

        if let Some(retry_seconds) = retry_after {
            if let Ok(header_value) = retry_seconds.to_string().parse() {
                response.headers_mut().insert("Retry-After", header_value);
            }
        }

        response
    }
}

impl From<ValidationError> for ApiError {
    fn from(error: ValidationError) -> Self {
        Self::Validation {
            message: error.to_string(),
            fields: vec![FieldError::from(&error)],
        }
    }
}

impl From<ParseError> for ApiError {
    fn from(error: ParseError) -> Self {
        Self::bad_request(error.to_string())
    }
}

impl From<StorageError> for ApiError {
    fn from(error: StorageError) -> Self {
        match error {
            StorageError::NotFound { .. } => Self::not_found(error.to_string()),
            StorageError::UniqueViolation { .. } | StorageError::InvalidTransition { .. } => {
                Self::Conflict {
                    message: error.to_string(),
                }
            }
            e if e.is_transient() => Self::Unavailable {
                message: e.to_string(),
            },
            e => Self::Internal {
                message: e.to_string(),
            },
        }
    }
}

impl From<DealError> for ApiError {
    fn from(error: DealError) -> Self {
        match error {
            DealError::Validation(e) => e.into(),
            e => Self::Conflict {
                message: e.to_string(),
            },
        }
    }
}

impl From<DealServiceError> for ApiError {
    fn from(error: DealServiceError) -> Self {
        match error {
            DealServiceError::Unauthorized(e) => e.into(),
            DealServiceError::NotFound { .. } => Self::not_found(error.to_string()),
            DealServiceError::Deal(e) => e.into(),
            DealServiceError::Validation(e) => e.into(),
            DealServiceError::Storage(e) => e.into(),
        }
    }
}

impl From<ContactError> for ApiError {
    fn from(error: ContactError) -> Self {
        match error {
            ContactError::Unauthorized(e) => e.into(),
            ContactError::NotFound(_) => Self::not_found(error.to_string()),
            ContactError::Conflict { .. } | ContactError::InvalidTransition { .. } => Self::Conflict {
                message: error.to_string(),
            },
            ContactError::Validation(e) => e.into(),
            ContactError::Storage(e) => e.into(),
        }
    }
}

impl From<ActivityError> for ApiError {
    fn from(error: ActivityError) -> Self {
        match error {
            ActivityError::Unauthorized(e) => e.into(),
            ActivityError::NotFound { .. } => Self::not_found(error.to_string()),
            ActivityError::InvalidTransition { .. } => Self::Conflict {
                message: error.to_string(),
            },
            ActivityError::Validation(e) => e.into(),
            ActivityError::Storage(e) => e.into(),
        }
    }
}

impl From<TimelineError> for ApiError {
    fn from(error: TimelineError) -> Self {
        match error {
            TimelineError::Unauthorized(e) => e.into(),
            TimelineError::ContactNotFound(_) => Self::not_found(error.to_string()),
            TimelineError::Validation(e) => e.into(),
            TimelineError::Storage(e) => e.into(),
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(error: PipelineError) -> Self {
        match error {
            PipelineError::Unauthorized(e) => e.into(),
            PipelineError::ReceiptNotFound(_) => Self::not_found(error.to_string()),
            PipelineError::InFlight(_) => Self::Conflict {
                message: error.to_string(),
            },
            PipelineError::AttemptFailed { .. } => Self::Internal {
                message: error.to_string(),
            },
            PipelineError::Storage(e) => e.into(),
        }
    }
}

/// Service-level errors
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Failed to bind to address {address}: {message}")]
    BindFailed { address: String, message: String },

    #[error("Server failed: {message}")]
    ServerFailed { message: String },

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Storage initialization failed: {0}")]
    Storage(#[from] StorageError),
}

impl ServiceError {
    /// Process exit code for this failure
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::BindFailed { .. } => 1,
            Self::ServerFailed { .. } => 2,
            Self::Configuration(_) => 3,
            Self::Storage(_) => 4,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Missing required configuration: {key}")]
    Missing { key: String },

    #[error("Failed to load configuration: {message}")]
    Load { message: String },
}

#[cfg(test)]
#[path = "errors_tests.rs"]
mod tests;
