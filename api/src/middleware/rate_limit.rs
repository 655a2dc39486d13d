use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use tower_governor::{
    GovernorError, GovernorLayer, governor::GovernorConfigBuilder,
    key_extractor::SmartIpKeyExtractor,
};

use trax_core::error::codes;

type RateLimitLayer = GovernorLayer<SmartIpKeyExtractor, governor::middleware::NoOpMiddleware, axum::body::Body>;

#[derive(Debug, thiserror::Error)]
#[error("invalid rate limit configuration for {0}")]
pub struct RateLimitConfigError(&'static str);

fn per_ip_layer(
    name: &'static str,
    replenish_ms: u64,
    burst_size: u32,
) -> Result<RateLimitLayer, RateLimitConfigError> {
    let config = GovernorConfigBuilder::default()
        .per_millisecond(replenish_ms)
        .burst_size(burst_size)
        .key_extractor(SmartIpKeyExtractor)
        .finish()
        .ok_or(RateLimitConfigError(name))?;
    Ok(GovernorLayer::new(config).error_handler(json_error_handler))
}

/// Guest invitation endpoints: 60 requests/minute per IP, bursts of 20.
pub fn guest_layer() -> Result<RateLimitLayer, RateLimitConfigError> {
    per_ip_layer("guest", 1_000, 20)
}

/// POST /v1/signupAdmin: 5 requests per hour per IP.
pub fn signup_layer() -> Result<RateLimitLayer, RateLimitConfigError> {
    per_ip_layer("signup", 720_000, 5)
}

/// POST /v1/issueToken: 30 requests per minute per IP.
pub fn token_layer() -> Result<RateLimitLayer, RateLimitConfigError> {
    per_ip_layer("token", 2_000, 30)
}

/// Returns JSON in ApiError format with a Retry-After header.
fn json_error_handler(err: GovernorError) -> Response {
    let (status, retry_after, message) = match err {
        GovernorError::TooManyRequests { wait_time, .. } => (
            StatusCode::TOO_MANY_REQUESTS,
            Some(wait_time),
            format!("Too many requests. Retry after {wait_time} seconds."),
        ),
        GovernorError::UnableToExtractKey => (
            StatusCode::INTERNAL_SERVER_ERROR,
            None,
            "Unable to determine client identity for rate limiting".to_string(),
        ),
        GovernorError::Other { code, msg, .. } => (code, None, msg.unwrap_or_default()),
    };

    let error = if status == StatusCode::TOO_MANY_REQUESTS {
        codes::RESOURCE_EXHAUSTED
    } else {
        codes::INTERNAL
    };
    let body = serde_json::json!({
        "error": error,
        "message": message,
        "request_id": uuid::Uuid::now_v7().to_string(),
    });

    let mut response = (status, axum::Json(body)).into_response();
    if let Some(wait) = retry_after {
        if let Ok(value) = HeaderValue::from_str(&wait.to_string()) {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layers_build() {
        assert!(guest_layer().is_ok());
        assert!(signup_layer().is_ok());
        assert!(token_layer().is_ok());
    }

    #[tokio::test]
    async fn throttled_requests_get_json_and_retry_after() {
        let response = json_error_handler(GovernorError::TooManyRequests {
            wait_time: 7,
            headers: None,
        });
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "7");
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"], "resource-exhausted");
    }
}
