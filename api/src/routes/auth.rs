use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;
use serde::Serialize;
use serde_json::json;

use trax_core::identity::Role;
use trax_core::validation::{Credentials, validate_credentials};

use crate::error::AppError;
use crate::extract::AppJson;
use crate::identity::NewUser;
use crate::state::AppState;
use crate::store::collections;

pub fn signup_router() -> Router<AppState> {
    Router::new().route("/v1/signupAdmin", post(signup_admin))
}

pub fn token_router() -> Router<AppState> {
    Router::new().route("/v1/issueToken", post(issue_token))
}

// ──────────────────────────────────────────────
// POST /v1/signupAdmin
// ──────────────────────────────────────────────

#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SignupResponse {
    pub uid: String,
    pub email: String,
    pub role: String,
    pub organisation_id: Option<String>,
    pub access_token: String,
}

#[utoipa::path(
    post,
    path = "/v1/signupAdmin",
    request_body = Credentials,
    responses(
        (status = 201, description = "Admin account created", body = SignupResponse),
        (status = 400, description = "Invalid credentials", body = trax_core::error::ApiError),
        (status = 409, description = "Email already registered", body = trax_core::error::ApiError)
    ),
    tag = "auth"
)]
pub async fn signup_admin(
    State(state): State<AppState>,
    AppJson(req): AppJson<Credentials>,
) -> Result<impl IntoResponse, AppError> {
    let email = validate_credentials(&req)?;
    let password = req.password.unwrap_or_default();

    let user = state
        .identity
        .create_user(NewUser {
            email: email.clone(),
            password,
            ..Default::default()
        })
        .await?;

    // Organisation is attached later by saveCompanyInfo
    let now = Utc::now();
    state
        .store
        .set(
            collections::USERS,
            &user.uid,
            json!({
                "userId": user.uid,
                "email": email,
                "emailLower": email.to_lowercase(),
                "isDisabled": false,
                "role": Role::Admin.as_str(),
                "organisationId": null,
                "createdAt": now,
                "modifiedAt": now,
            }),
        )
        .await?;
    let access_token = state.identity.issue_access_token(&user.uid).await?;

    tracing::info!(user_id = %user.uid, "admin account created");

    Ok((
        StatusCode::CREATED,
        Json(SignupResponse {
            uid: user.uid,
            email,
            role: Role::Admin.as_str().to_string(),
            organisation_id: None,
            access_token,
        }),
    ))
}

// ──────────────────────────────────────────────
// POST /v1/issueToken
// ──────────────────────────────────────────────

#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub uid: String,
    pub access_token: String,
}

#[utoipa::path(
    post,
    path = "/v1/issueToken",
    request_body = Credentials,
    responses(
        (status = 200, description = "Access token issued", body = TokenResponse),
        (status = 401, description = "Wrong credentials or disabled account", body = trax_core::error::ApiError)
    ),
    tag = "auth"
)]
pub async fn issue_token(
    State(state): State<AppState>,
    AppJson(req): AppJson<Credentials>,
) -> Result<Json<TokenResponse>, AppError> {
    let email = req.email.as_deref().map(str::trim).unwrap_or_default();
    let password = req.password.as_deref().unwrap_or_default();
    if email.is_empty() || password.is_empty() {
        return Err(AppError::unauthenticated("Invalid email or password."));
    }

    let user = match state.identity.verify_password(email, password).await? {
        Some(user) if !user.disabled => user,
        Some(user) => {
            tracing::warn!(user_id = %user.uid, "token requested for disabled account");
            return Err(AppError::unauthenticated("Account is disabled."));
        }
        None => return Err(AppError::unauthenticated("Invalid email or password.")),
    };
    let access_token = state.identity.issue_access_token(&user.uid).await?;
    Ok(Json(TokenResponse {
        uid: user.uid,
        access_token,
    }))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::routes::testing::post_json;
    use crate::state::testing::test_app;
    use crate::store::DocumentStore;

    fn router() -> Router<AppState> {
        signup_router().merge(token_router())
    }

    #[tokio::test]
    async fn signup_creates_admin_profile_and_token() {
        let app = test_app();
        let router = router().with_state(app.state.clone());
        let (status, body) = post_json(
            router.clone(),
            "/v1/signupAdmin",
            None,
            json!({ "email": "Owner@Example.com", "password": "Str0ng!pass" }),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["role"], "admin");
        assert!(body["organisationId"].is_null());
        assert!(body["accessToken"].as_str().unwrap().starts_with("trax_at_"));

        let uid = body["uid"].as_str().unwrap();
        let profile = app.store.get(collections::USERS, uid).await.unwrap().unwrap();
        assert_eq!(profile["role"], "admin");
        assert_eq!(profile["emailLower"], "owner@example.com");

        let (status, body) = post_json(
            router,
            "/v1/signupAdmin",
            None,
            json!({ "email": "owner@example.com", "password": "Str0ng!pass" }),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "already-exists");
    }

    #[tokio::test]
    async fn signup_rejects_weak_passwords_and_unknown_fields() {
        let app = test_app();
        let router = router().with_state(app.state.clone());
        let (status, body) = post_json(
            router.clone(),
            "/v1/signupAdmin",
            None,
            json!({ "email": "a@example.com", "password": "short" }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["field"], "password");

        let (status, body) = post_json(
            router,
            "/v1/signupAdmin",
            None,
            json!({ "email": "a@example.com", "password": "Str0ng!pass", "role": "superAdmin" }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["field"], "role");
    }

    #[tokio::test]
    async fn issue_token_checks_password_and_disabled_flag() {
        let app = test_app();
        let router = router().with_state(app.state.clone());
        let (_, created) = post_json(
            router.clone(),
            "/v1/signupAdmin",
            None,
            json!({ "email": "owner@example.com", "password": "Str0ng!pass" }),
        )
        .await;

        let (status, body) = post_json(
            router.clone(),
            "/v1/issueToken",
            None,
            json!({ "email": "owner@example.com", "password": "Str0ng!pass" }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["uid"], created["uid"]);

        let (status, _) = post_json(
            router.clone(),
            "/v1/issueToken",
            None,
            json!({ "email": "owner@example.com", "password": "Wr0ng!pass" }),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        app.state
            .identity
            .set_disabled(created["uid"].as_str().unwrap(), true)
            .await
            .unwrap();
        let (status, body) = post_json(
            router,
            "/v1/issueToken",
            None,
            json!({ "email": "owner@example.com", "password": "Str0ng!pass" }),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["message"], "Account is disabled.");
    }
}
