use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::extract::{FromRequestParts, Request};
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};
use tower::{Layer, Service, ServiceExt};

use trax_core::identity::{AuthzDecision, UserProfile, authorize};

use crate::error::AppError;
use crate::identity::IdentityProvider;
use crate::state::AppState;
use crate::store::{DocumentStore, collections, decode};

/// Caller identity resolved from the `Authorization: Bearer <token>` header.
///
/// The `InjectAuthLayer` resolves tokens once per request and stores the
/// result in the request extensions. The extractor reads it from there, or
/// resolves the token itself when the layer did not run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub uid: String,
}

// --- Tower Layer/Service for auth injection ---

/// Injects `Caller` into request extensions. Requests without a valid token
/// pass through untouched; guest routes don't need one.
#[derive(Clone)]
pub struct InjectAuthLayer {
    identity: Arc<dyn IdentityProvider>,
}

impl InjectAuthLayer {
    pub fn new(identity: Arc<dyn IdentityProvider>) -> Self {
        Self { identity }
    }
}

impl<S> Layer<S> for InjectAuthLayer {
    type Service = InjectAuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        InjectAuthService {
            inner,
            identity: self.identity.clone(),
        }
    }
}

#[derive(Clone)]
pub struct InjectAuthService<S> {
    inner: S,
    identity: Arc<dyn IdentityProvider>,
}

impl<S> Service<Request> for InjectAuthService<S>
where
    S: Service<Request, Response = Response, Error = Infallible> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Response, Infallible>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request) -> Self::Future {
        let not_ready = self.inner.clone();
        let ready = std::mem::replace(&mut self.inner, not_ready);
        let identity = self.identity.clone();

        let token = bearer_token(req.headers()).map(str::to_owned);

        Box::pin(async move {
            if let Some(token) = token {
                match identity.verify_access_token(&token).await {
                    Ok(Some(uid)) => {
                        req.extensions_mut().insert(Caller { uid });
                    }
                    Ok(None) => {}
                    Err(e) => tracing::warn!(error = %e, "access token lookup failed"),
                }
            }
            Ok(ready.oneshot(req).await.into_response())
        })
    }
}

fn bearer_token(headers: &axum::http::HeaderMap) -> Option<&str> {
    headers
        .get("authorization")?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

// --- Extractor (used by handlers) ---

impl FromRequestParts<AppState> for Caller {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        if let Some(caller) = parts.extensions.get::<Caller>() {
            return Ok(caller.clone());
        }

        let token = bearer_token(&parts.headers)
            .ok_or_else(|| AppError::unauthenticated("User must be authenticated."))?;
        match state.identity.verify_access_token(token).await? {
            Some(uid) => Ok(Caller { uid }),
            None => Err(AppError::unauthenticated("Invalid or expired access token.")),
        }
    }
}

/// The caller's `users/{uid}` profile, if one exists.
pub async fn load_profile(
    store: &dyn DocumentStore,
    uid: &str,
) -> Result<Option<UserProfile>, AppError> {
    match store.get(collections::USERS, uid).await? {
        Some(doc) => Ok(Some(decode(doc)?)),
        None => Ok(None),
    }
}

/// Gate an organisation-scoped operation. Returns the caller's profile on allow.
pub async fn require_org_access(
    state: &AppState,
    caller: &Caller,
    organisation_id: &str,
    operation: &str,
) -> Result<UserProfile, AppError> {
    let profile = load_profile(state.store.as_ref(), &caller.uid).await?;
    match authorize(profile.as_ref(), organisation_id) {
        AuthzDecision::Allow => {
            tracing::info!(
                user_id = %caller.uid,
                organisation_id = organisation_id,
                operation = operation,
                decision = "allow",
                "organisation authorization decision"
            );
            Ok(profile.unwrap_or_default())
        }
        AuthzDecision::Deny(reason) => {
            tracing::warn!(
                user_id = %caller.uid,
                organisation_id = organisation_id,
                operation = operation,
                decision = "deny",
                reason = reason,
                "organisation authorization decision"
            );
            Err(AppError::denied(reason))
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{HeaderMap, HeaderValue, Request, StatusCode};
    use axum::routing::get;
    use axum::{Router, middleware};
    use serde_json::json;
    use tower::ServiceExt;

    use super::*;
    use crate::identity::NewUser;
    use crate::state::testing::test_app;

    async fn whoami(caller: Caller) -> String {
        caller.uid
    }

    #[test]
    fn bearer_token_requires_scheme() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_token(&headers), None);
        headers.insert("authorization", HeaderValue::from_static("Bearer trax_at_x"));
        assert_eq!(bearer_token(&headers), Some("trax_at_x"));
    }

    #[tokio::test]
    async fn extractor_rejects_missing_and_unknown_tokens() {
        let app = test_app();
        let router = Router::new()
            .route("/me", get(whoami))
            .with_state(app.state.clone());

        let missing = router
            .clone()
            .oneshot(Request::builder().uri("/me").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

        let unknown = router
            .oneshot(
                Request::builder()
                    .uri("/me")
                    .header("authorization", "Bearer trax_at_nope")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(unknown.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn layer_injects_caller() {
        let app = test_app();
        let user = app
            .state
            .identity
            .create_user(NewUser {
                email: "ana@example.com".into(),
                password: "Str0ng!pass".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        let token = app.state.identity.issue_access_token(&user.uid).await.unwrap();

        let router = Router::new()
            .route("/me", get(whoami))
            .layer(InjectAuthLayer::new(app.state.identity.clone()))
            .layer(middleware::from_fn(crate::middleware::security_headers::apply))
            .with_state(app.state.clone());
        let response = router
            .oneshot(
                Request::builder()
                    .uri("/me")
                    .header("authorization", format!("Bearer {token}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn org_gate_follows_role_rules() {
        let app = test_app();
        app.store
            .set(
                collections::USERS,
                "admin-1",
                json!({ "role": "admin", "organisationId": "org-1" }),
            )
            .await
            .unwrap();
        let caller = Caller {
            uid: "admin-1".into(),
        };
        assert!(require_org_access(&app.state, &caller, "org-1", "test").await.is_ok());
        let err = require_org_access(&app.state, &caller, "org-2", "test")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "permission-denied");

        let stranger = Caller {
            uid: "nobody".into(),
        };
        assert!(require_org_access(&app.state, &stranger, "org-1", "test").await.is_err());
    }
}
