use serde::Serialize;
use utoipa::ToSchema;

/// Structured error body returned by every handler.
/// A caller gets exactly one `(code, message)` pair plus optional context.
#[derive(Debug, Serialize, ToSchema)]
pub struct ApiError {
    /// Machine-readable error code (e.g. "invalid-argument", "not-found")
    pub error: String,
    /// Human-readable description of what went wrong
    pub message: String,
    /// Which request field caused the error (if applicable)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    /// Diagnostic detail attached to internal and collaborator failures
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    /// Request ID for tracing and debugging
    pub request_id: String,
}

/// Error codes used across the API
pub mod codes {
    pub const INVALID_ARGUMENT: &str = "invalid-argument";
    pub const UNAUTHENTICATED: &str = "unauthenticated";
    pub const PERMISSION_DENIED: &str = "permission-denied";
    pub const NOT_FOUND: &str = "not-found";
    pub const ALREADY_EXISTS: &str = "already-exists";
    pub const FAILED_PRECONDITION: &str = "failed-precondition";
    pub const INTERNAL: &str = "internal";
    pub const UNIMPLEMENTED: &str = "unimplemented";
    pub const RESOURCE_EXHAUSTED: &str = "resource-exhausted";
}
