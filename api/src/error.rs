use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use trax_core::error::{self, ApiError};
use trax_core::invitations::LifecycleError;
use trax_core::menu::SelectionError;
use trax_core::validation::ValidationError;

use crate::identity::IdentityError;
use crate::mail::MailError;
use crate::store::StoreError;

/// Internal error type that converts to structured API responses
#[derive(Debug)]
pub enum AppError {
    /// Malformed or missing input, or a selection that breaks menu rules (400)
    InvalidArgument {
        message: String,
        field: Option<String>,
    },
    /// No caller identity (401)
    Unauthenticated { message: String },
    /// Role or organisation mismatch, wrong guest token (403)
    PermissionDenied { message: String },
    /// Invitation, event or host absent (404)
    NotFound { message: String },
    /// Duplicate organisation per admin, duplicate email (409)
    AlreadyExists { message: String },
    /// Expired invitation, out-of-order submission, missing config (412)
    FailedPrecondition { message: String },
    /// Unexpected collaborator failure (500)
    Internal {
        message: String,
        details: Option<serde_json::Value>,
    },
    /// Unknown operation (501)
    Unimplemented { message: String },
}

impl AppError {
    pub fn invalid(field: &str, message: impl Into<String>) -> Self {
        AppError::InvalidArgument {
            message: message.into(),
            field: Some(field.to_string()),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        AppError::Internal {
            message: message.into(),
            details: None,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        AppError::NotFound {
            message: message.into(),
        }
    }

    pub fn precondition(message: impl Into<String>) -> Self {
        AppError::FailedPrecondition {
            message: message.into(),
        }
    }

    pub fn denied(message: impl Into<String>) -> Self {
        AppError::PermissionDenied {
            message: message.into(),
        }
    }

    pub fn unauthenticated(message: impl Into<String>) -> Self {
        AppError::Unauthenticated {
            message: message.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::InvalidArgument { .. } => error::codes::INVALID_ARGUMENT,
            AppError::Unauthenticated { .. } => error::codes::UNAUTHENTICATED,
            AppError::PermissionDenied { .. } => error::codes::PERMISSION_DENIED,
            AppError::NotFound { .. } => error::codes::NOT_FOUND,
            AppError::AlreadyExists { .. } => error::codes::ALREADY_EXISTS,
            AppError::FailedPrecondition { .. } => error::codes::FAILED_PRECONDITION,
            AppError::Internal { .. } => error::codes::INTERNAL,
            AppError::Unimplemented { .. } => error::codes::UNIMPLEMENTED,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            AppError::InvalidArgument { message, .. }
            | AppError::Unauthenticated { message }
            | AppError::PermissionDenied { message }
            | AppError::NotFound { message }
            | AppError::AlreadyExists { message }
            | AppError::FailedPrecondition { message }
            | AppError::Internal { message, .. }
            | AppError::Unimplemented { message } => message,
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::InvalidArgument { .. } => StatusCode::BAD_REQUEST,
            AppError::Unauthenticated { .. } => StatusCode::UNAUTHORIZED,
            AppError::PermissionDenied { .. } => StatusCode::FORBIDDEN,
            AppError::NotFound { .. } => StatusCode::NOT_FOUND,
            AppError::AlreadyExists { .. } => StatusCode::CONFLICT,
            AppError::FailedPrecondition { .. } => StatusCode::PRECONDITION_FAILED,
            AppError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Unimplemented { .. } => StatusCode::NOT_IMPLEMENTED,
        }
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code(), self.message())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let request_id = uuid::Uuid::now_v7().to_string();
        let status = self.status();
        let code = self.code().to_string();

        let api_error = match self {
            AppError::InvalidArgument { message, field } => ApiError {
                error: code,
                message,
                field,
                details: None,
                request_id,
            },
            AppError::Internal { message, details } => {
                tracing::error!(request_id = %request_id, details = ?details, "Internal error: {}", message);
                ApiError {
                    error: code,
                    message,
                    field: None,
                    details,
                    request_id,
                }
            }
            other => ApiError {
                message: other.message().to_string(),
                error: code,
                field: None,
                details: None,
                request_id,
            },
        };

        (status, Json(api_error)).into_response()
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict => AppError::Internal {
                message: "Transaction contention, please retry".to_string(),
                details: None,
            },
            other => AppError::Internal {
                message: "Storage operation failed".to_string(),
                details: Some(serde_json::json!({ "cause": other.to_string() })),
            },
        }
    }
}

impl From<MailError> for AppError {
    fn from(err: MailError) -> Self {
        let details = match &err {
            MailError::Rejected { status, body, .. } => {
                serde_json::json!({ "status": status, "body": body })
            }
            MailError::Transport(cause) => serde_json::json!({ "cause": cause }),
        };
        AppError::Internal {
            message: format!("Email delivery failed: {err}"),
            details: Some(details),
        }
    }
}

impl From<IdentityError> for AppError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::EmailAlreadyExists => AppError::AlreadyExists {
                message: "The account already exists for this email.".to_string(),
            },
            IdentityError::InvalidEmail => AppError::invalid("email", "Invalid email."),
            IdentityError::UserNotFound => AppError::not_found("User not found."),
            IdentityError::Backend(cause) => AppError::Internal {
                message: "Identity provider failure".to_string(),
                details: Some(serde_json::json!({ "cause": cause })),
            },
        }
    }
}

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        AppError::InvalidArgument {
            message: err.message,
            field: err.field,
        }
    }
}

impl From<SelectionError> for AppError {
    fn from(err: SelectionError) -> Self {
        AppError::invalid("selectedMenuItemIds", err.to_string())
    }
}

impl From<LifecycleError> for AppError {
    fn from(err: LifecycleError) -> Self {
        let message = err.to_string();
        match err {
            LifecycleError::InvalidToken => AppError::PermissionDenied { message },
            LifecycleError::InvalidCompanionIndex(_) | LifecycleError::CompanionOutOfRange { .. } => {
                AppError::InvalidArgument {
                    message,
                    field: Some("companionIndex".to_string()),
                }
            }
            LifecycleError::Expired
            | LifecycleError::DemographicsMissing
            | LifecycleError::CompanionDemographicsMissing(_)
            | LifecycleError::Collision { .. }
            | LifecycleError::PointerMismatch { .. } => AppError::FailedPrecondition { message },
        }
    }
}
