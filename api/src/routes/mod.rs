pub mod analytics;
pub mod auth;
pub mod guest;
pub mod health;
pub mod hosts;
pub mod invitations;
pub mod organisation;
pub mod sales;

use crate::error::AppError;

/// Catch-all for operation names the service does not know.
pub async fn unknown_operation() -> AppError {
    AppError::Unimplemented {
        message: "Unknown operation".to_string(),
    }
}

/// Trimmed, non-empty request string.
pub(crate) fn required_str(field: &str, raw: Option<&str>) -> Result<String, AppError> {
    raw.map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| AppError::invalid(field, format!("{field} is required")))
}

#[cfg(test)]
pub(crate) mod testing {
    use axum::Router;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::Value;
    use tower::ServiceExt;

    use crate::identity::NewUser;
    use crate::state::testing::TestApp;
    use crate::store::{DocumentStore, collections};

    /// POST `body` to `path` and decode the JSON reply.
    pub async fn post_json(
        router: Router,
        path: &str,
        token: Option<&str>,
        body: Value,
    ) -> (StatusCode, Value) {
        let mut request = Request::builder()
            .method("POST")
            .uri(path)
            .header("content-type", "application/json");
        if let Some(token) = token {
            request = request.header("authorization", format!("Bearer {token}"));
        }
        let response = router
            .oneshot(request.body(Body::from(body.to_string())).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    /// Create an account with the given `users` profile and return its uid
    /// and a bearer token.
    pub async fn sign_in(app: &TestApp, email: &str, profile: Value) -> (String, String) {
        let user = app
            .state
            .identity
            .create_user(NewUser {
                email: email.to_string(),
                password: "Str0ng!pass".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        if !profile.is_null() {
            app.store
                .set(collections::USERS, &user.uid, profile)
                .await
                .unwrap();
        }
        let token = app.state.identity.issue_access_token(&user.uid).await.unwrap();
        (user.uid, token)
    }
}

#[cfg(test)]
mod tests {
    use axum::Router;
    use axum::http::StatusCode;
    use serde_json::json;

    use super::testing::post_json;
    use super::*;
    use crate::state::testing::test_app;

    #[tokio::test]
    async fn unknown_operations_are_unimplemented() {
        let app = test_app();
        let router = Router::new()
            .merge(health::router())
            .fallback(unknown_operation)
            .with_state(app.state.clone());
        let (status, body) = post_json(router, "/v1/doesNotExist", None, json!({})).await;
        assert_eq!(status, StatusCode::NOT_IMPLEMENTED);
        assert_eq!(body["error"], "unimplemented");
    }

    #[test]
    fn required_str_trims_and_names_the_field() {
        assert_eq!(required_str("eventId", Some("  ev-1 ")).unwrap(), "ev-1");
        let err = required_str("eventId", Some("   ")).unwrap_err();
        assert_eq!(err.message(), "eventId is required");
    }
}
