//! Custom extractors that convert axum rejections to structured AppError responses.
//!
//! Use `AppJson<T>` as a drop-in replacement for `axum::Json<T>` in handler signatures.
//! Deserialization failures, including unknown fields on `deny_unknown_fields`
//! request types, become `invalid-argument` errors naming the offending field.

use axum::{
    Json,
    extract::{FromRequest, Request, rejection::JsonRejection},
};

use crate::error::AppError;

/// JSON extractor that converts deserialization errors to structured `AppError` responses.
pub struct AppJson<T>(pub T);

impl<S, T> FromRequest<S> for AppJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(AppJson(value)),
            Err(rejection) => Err(map_json_rejection(rejection)),
        }
    }
}

/// Convert a `JsonRejection` to `AppError::InvalidArgument`.
pub fn map_json_rejection(rejection: JsonRejection) -> AppError {
    let body_text = rejection.body_text();

    if let Some(field) = extract_unknown_field(&body_text) {
        return AppError::InvalidArgument {
            message: format!("Unexpected field: {field}"),
            field: Some(field),
        };
    }

    AppError::InvalidArgument {
        message: format!("Invalid request body: {body_text}"),
        field: Some(extract_missing_field(&body_text).unwrap_or_else(|| "body".to_string())),
    }
}

fn backticked_after(msg: &str, marker: &str) -> Option<String> {
    let start = msg.find(marker)?;
    let after = &msg[start + marker.len()..];
    let end = after.find('`')?;
    Some(after[..end].to_string())
}

fn extract_unknown_field(msg: &str) -> Option<String> {
    backticked_after(msg, "unknown field `")
}

fn extract_missing_field(msg: &str) -> Option<String> {
    backticked_after(msg, "missing field `")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_missing_field_name() {
        let msg = "Failed to deserialize: missing field `invitationId` at line 1 column 72";
        assert_eq!(extract_missing_field(msg), Some("invitationId".to_string()));
    }

    #[test]
    fn extracts_unknown_field_name() {
        let msg = "unknown field `tokn`, expected one of `invitationId`, `token`";
        assert_eq!(extract_unknown_field(msg), Some("tokn".to_string()));
    }

    #[test]
    fn returns_none_for_generic_error() {
        let msg = "invalid type: string, expected u64";
        assert_eq!(extract_unknown_field(msg), None);
        assert_eq!(extract_missing_field(msg), None);
    }
}
