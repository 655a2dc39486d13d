use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;

use trax_core::auth::generate_temporary_password;
use trax_core::identity::{HostEntry, Role, UserProfile, host_entry_id};
use trax_core::validation::is_valid_email;

use crate::auth::{Caller, require_org_access};
use crate::emails;
use crate::error::AppError;
use crate::extract::AppJson;
use crate::identity::NewUser;
use crate::routes::required_str;
use crate::state::AppState;
use crate::store::{collections, decode, run_transaction};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/createHostUser", post(create_host_user))
        .route("/v1/deleteHostUser", post(delete_host_user))
        .route(
            "/v1/resendHostVerificationEmail",
            post(resend_host_verification_email),
        )
}

fn optional_trimmed(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

async fn load_host_entry(
    state: &AppState,
    organisation_id: &str,
    host_uid: &str,
) -> Result<Option<HostEntry>, AppError> {
    let id = host_entry_id(organisation_id, host_uid);
    match state.store.get(collections::ORGANISATION_HOSTS, &id).await? {
        Some(doc) => Ok(Some(decode(doc)?)),
        None => Ok(None),
    }
}

/// Mail a password set-up link to a host and stamp the directory entry.
/// Returns the link that was sent.
async fn send_welcome(
    state: &AppState,
    organisation_id: &str,
    host_uid: &str,
    email: &str,
    name: Option<&str>,
) -> Result<String, AppError> {
    let reset_link = match state.identity.generate_password_reset_link(email).await {
        Ok(link) => link,
        Err(e) => {
            tracing::error!(host_uid = %host_uid, error = %e, "password reset link generation failed");
            return Err(AppError::precondition("Could not generate password reset link."));
        }
    };
    let message = emails::host_welcome(email, name, &reset_link, &state.config.host_portal_url);
    let sent = state.mail.send(message).await?;

    let now = Utc::now();
    state
        .store
        .merge(
            collections::ORGANISATION_HOSTS,
            &host_entry_id(organisation_id, host_uid),
            json!({ "passwordResetEmailSentAt": now, "updatedAt": now }),
        )
        .await?;
    tracing::info!(
        host_uid = %host_uid,
        organisation_id = %organisation_id,
        message_id = ?sent.message_id,
        "host welcome email sent"
    );
    Ok(reset_link)
}

// ──────────────────────────────────────────────
// POST /v1/createHostUser
// ──────────────────────────────────────────────

#[derive(Debug, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CreateHostRequest {
    pub organisation_id: Option<String>,
    pub email: Option<String>,
    pub name: Option<String>,
    pub address: Option<String>,
    pub country: Option<String>,
    #[serde(default)]
    pub is_disabled: bool,
    /// Mail the new host a password set-up link
    #[serde(default)]
    pub send_email: bool,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateHostResponse {
    pub uid: String,
    pub email: String,
    pub created: bool,
    pub already_verified: bool,
    pub email_sent: bool,
}

#[utoipa::path(
    post,
    path = "/v1/createHostUser",
    request_body = CreateHostRequest,
    responses(
        (status = 200, description = "Host provisioned for the organisation", body = CreateHostResponse),
        (status = 400, description = "Missing organisation, name or email", body = trax_core::error::ApiError),
        (status = 403, description = "Caller may not manage this organisation", body = trax_core::error::ApiError),
        (status = 412, description = "Email belongs to a non-host account", body = trax_core::error::ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "hosts"
)]
pub async fn create_host_user(
    State(state): State<AppState>,
    caller: Caller,
    AppJson(req): AppJson<CreateHostRequest>,
) -> Result<Json<CreateHostResponse>, AppError> {
    let organisation_id = required_str("organisationId", req.organisation_id.as_deref())?;
    let name = required_str("name", req.name.as_deref())?;
    let email = req
        .email
        .as_deref()
        .map(|e| e.trim().to_lowercase())
        .filter(|e| is_valid_email(e))
        .ok_or_else(|| AppError::invalid("email", "Valid email is required"))?;
    let address = optional_trimmed(req.address.as_deref());
    let country = optional_trimmed(req.country.as_deref());

    require_org_access(&state, &caller, &organisation_id, "createHostUser").await?;

    let (account, created) = match state.identity.get_user_by_email(&email).await? {
        Some(account) => (account, false),
        None => {
            let account = state
                .identity
                .create_user(NewUser {
                    email: email.clone(),
                    password: generate_temporary_password(),
                    display_name: Some(name.clone()),
                    disabled: req.is_disabled,
                })
                .await?;
            (account, true)
        }
    };
    let uid = account.uid.clone();

    let now = Utc::now();
    let mut entry = json!({
        "hostUid": uid,
        "organisationId": organisation_id,
        "email": email,
        "emailLower": email,
        "name": name,
        "isDisabled": req.is_disabled,
        "updatedAt": now,
    });
    let mut profile_patch = json!({
        "userId": uid,
        "email": email,
        "emailLower": email,
        "role": Role::Host.as_str(),
        "isDisabled": req.is_disabled,
        "name": name,
        "modifiedAt": now,
    });
    for (key, value) in [("address", &address), ("country", &country)] {
        if let Some(value) = value {
            entry[key] = json!(value);
            profile_patch[key] = json!(value);
        }
    }
    run_transaction(state.store.as_ref(), &state.config.retry, |tx| {
        let uid = uid.clone();
        let organisation_id = organisation_id.clone();
        let mut entry = entry.clone();
        let mut profile_patch = profile_patch.clone();
        Box::pin(async move {
            let existing: Option<UserProfile> = match tx.get(collections::USERS, &uid).await? {
                Some(doc) => Some(decode(doc)?),
                None => None,
            };
            let mut managed_by = Vec::new();
            if let Some(profile) = &existing {
                let role = profile.role.as_deref().map(str::trim).unwrap_or_default();
                if !role.is_empty() && profile.role() != Role::Host {
                    return Err(AppError::precondition(format!(
                        "This email is already used by a non-host account (role: {role})."
                    )));
                }
                managed_by = profile.managed_by_org_ids.clone();
            } else {
                profile_patch["createdAt"] = profile_patch["modifiedAt"].clone();
            }
            if !managed_by.contains(&organisation_id) {
                managed_by.push(organisation_id.clone());
            }
            profile_patch["managedByOrgIds"] = json!(managed_by);

            let entry_id = host_entry_id(&organisation_id, &uid);
            if tx.get(collections::ORGANISATION_HOSTS, &entry_id).await?.is_none() {
                entry["createdAt"] = entry["updatedAt"].clone();
            }
            tx.merge(collections::USERS, &uid, profile_patch);
            tx.merge(collections::ORGANISATION_HOSTS, &entry_id, entry);
            Ok(())
        })
    })
    .await?;

    tracing::info!(
        host_uid = %uid,
        organisation_id = %organisation_id,
        created = created,
        "host user provisioned"
    );

    let mut email_sent = false;
    if req.send_email {
        if state.mail_configured() {
            match send_welcome(&state, &organisation_id, &uid, &email, Some(&name)).await {
                Ok(_) => email_sent = true,
                Err(e) => tracing::warn!(host_uid = %uid, error = %e, "host welcome email failed"),
            }
        } else {
            tracing::warn!(host_uid = %uid, "welcome email requested but mail is not configured");
        }
    }

    Ok(Json(CreateHostResponse {
        uid,
        email,
        created,
        already_verified: account.email_verified,
        email_sent,
    }))
}

// ──────────────────────────────────────────────
// POST /v1/deleteHostUser
// ──────────────────────────────────────────────

#[derive(Debug, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DeleteHostRequest {
    pub organisation_id: Option<String>,
    pub host_uid: Option<String>,
    /// Delete the identity account instead of disabling it
    #[serde(default)]
    pub delete_auth: bool,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeleteHostResponse {
    pub ok: bool,
    pub deleted_auth: bool,
}

#[utoipa::path(
    post,
    path = "/v1/deleteHostUser",
    request_body = DeleteHostRequest,
    responses(
        (status = 200, description = "Host removed", body = DeleteHostResponse),
        (status = 403, description = "Caller may not manage this organisation", body = trax_core::error::ApiError),
        (status = 404, description = "Host not in the organisation", body = trax_core::error::ApiError),
        (status = 412, description = "Profile is not a host", body = trax_core::error::ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "hosts"
)]
pub async fn delete_host_user(
    State(state): State<AppState>,
    caller: Caller,
    AppJson(req): AppJson<DeleteHostRequest>,
) -> Result<Json<DeleteHostResponse>, AppError> {
    let organisation_id = required_str("organisationId", req.organisation_id.as_deref())?;
    let host_uid = required_str("hostUid", req.host_uid.as_deref())?;

    require_org_access(&state, &caller, &organisation_id, "deleteHostUser").await?;

    if load_host_entry(&state, &organisation_id, &host_uid).await?.is_none() {
        return Err(AppError::not_found("Host not found in this organisation."));
    }
    if let Some(doc) = state.store.get(collections::USERS, &host_uid).await? {
        let profile: UserProfile = decode(doc)?;
        let role = profile.role.as_deref().map(str::trim).unwrap_or_default();
        if !role.is_empty() && profile.role() != Role::Host {
            return Err(AppError::precondition(format!(
                "User role is '{role}', not 'host'."
            )));
        }
    }

    let outcome = if req.delete_auth {
        state.identity.delete_user(&host_uid).await
    } else {
        state.identity.set_disabled(&host_uid, true).await
    };
    if let Err(e) = outcome {
        tracing::warn!(host_uid = %host_uid, error = %e, "identity account cleanup failed");
    }

    state
        .store
        .delete(
            collections::ORGANISATION_HOSTS,
            &host_entry_id(&organisation_id, &host_uid),
        )
        .await?;
    state.store.delete(collections::USERS, &host_uid).await?;

    tracing::info!(
        host_uid = %host_uid,
        organisation_id = %organisation_id,
        deleted_auth = req.delete_auth,
        "host user deleted"
    );
    Ok(Json(DeleteHostResponse {
        ok: true,
        deleted_auth: req.delete_auth,
    }))
}

// ──────────────────────────────────────────────
// POST /v1/resendHostVerificationEmail
// ──────────────────────────────────────────────

#[derive(Debug, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ResendHostEmailRequest {
    pub organisation_id: Option<String>,
    pub host_uid: Option<String>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResendHostEmailResponse {
    pub ok: bool,
    pub email: String,
    pub password_reset_link: String,
}

#[utoipa::path(
    post,
    path = "/v1/resendHostVerificationEmail",
    request_body = ResendHostEmailRequest,
    responses(
        (status = 200, description = "Set-up email sent again", body = ResendHostEmailResponse),
        (status = 404, description = "Host not in the organisation", body = trax_core::error::ApiError),
        (status = 412, description = "Host email invalid or mail not configured", body = trax_core::error::ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "hosts"
)]
pub async fn resend_host_verification_email(
    State(state): State<AppState>,
    caller: Caller,
    AppJson(req): AppJson<ResendHostEmailRequest>,
) -> Result<Json<ResendHostEmailResponse>, AppError> {
    let organisation_id = required_str("organisationId", req.organisation_id.as_deref())?;
    let host_uid = required_str("hostUid", req.host_uid.as_deref())?;

    require_org_access(&state, &caller, &organisation_id, "resendHostVerificationEmail").await?;

    let entry = load_host_entry(&state, &organisation_id, &host_uid)
        .await?
        .ok_or_else(|| AppError::not_found("Host not found in this organisation."))?;
    let email = entry
        .email_lower
        .as_deref()
        .or(entry.email.as_deref())
        .map(|e| e.trim().to_lowercase())
        .filter(|e| is_valid_email(e))
        .ok_or_else(|| AppError::precondition("Host email is missing or invalid."))?;

    if !state.mail_configured() {
        return Err(AppError::precondition("Email delivery is not configured."));
    }

    if let Err(e) = state.identity.set_email_verified(&host_uid, true).await {
        tracing::warn!(host_uid = %host_uid, error = %e, "could not mark host email verified");
    }
    let password_reset_link =
        send_welcome(&state, &organisation_id, &host_uid, &email, entry.name.as_deref()).await?;

    Ok(Json(ResendHostEmailResponse {
        ok: true,
        email,
        password_reset_link,
    }))
}
