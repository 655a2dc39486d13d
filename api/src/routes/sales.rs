use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;

use trax_core::auth::generate_temporary_password;
use trax_core::identity::{Role, UserProfile};
use trax_core::validation::is_valid_email;

use crate::auth::{Caller, load_profile};
use crate::emails;
use crate::error::AppError;
use crate::extract::AppJson;
use crate::identity::NewUser;
use crate::routes::required_str;
use crate::state::AppState;
use crate::store::{collections, decode, run_transaction};

pub fn router() -> Router<AppState> {
    Router::new().route("/v1/createSalesPersonAccount", post(create_sales_person_account))
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CreateSalesPersonRequest {
    pub email: Option<String>,
    pub name: Option<String>,
    /// Id of the sales directory record this account signs in for
    pub sales_person_id: Option<String>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateSalesPersonResponse {
    pub uid: String,
    pub message: String,
    pub already_exists: bool,
}

#[utoipa::path(
    post,
    path = "/v1/createSalesPersonAccount",
    request_body = CreateSalesPersonRequest,
    responses(
        (status = 200, description = "Sales account ready and password set-up mail sent", body = CreateSalesPersonResponse),
        (status = 400, description = "Missing name, salesPersonId or a valid email", body = trax_core::error::ApiError),
        (status = 401, description = "Not signed in", body = trax_core::error::ApiError),
        (status = 403, description = "Caller is not a super admin", body = trax_core::error::ApiError),
        (status = 412, description = "Mail not configured or email used by another role", body = trax_core::error::ApiError),
        (status = 500, description = "Account saved but the mail could not be sent", body = trax_core::error::ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "sales"
)]
pub async fn create_sales_person_account(
    State(state): State<AppState>,
    caller: Caller,
    AppJson(req): AppJson<CreateSalesPersonRequest>,
) -> Result<Json<CreateSalesPersonResponse>, AppError> {
    let profile = load_profile(state.store.as_ref(), &caller.uid).await?;
    if profile.as_ref().map(UserProfile::role) != Some(Role::SuperAdmin) {
        tracing::warn!(
            user_id = %caller.uid,
            operation = "createSalesPersonAccount",
            decision = "deny",
            "sales account creation denied"
        );
        return Err(AppError::denied(
            "Only super admins can create sales person accounts",
        ));
    }

    let email = required_str("email", req.email.as_deref())?.to_lowercase();
    let name = required_str("name", req.name.as_deref())?;
    let sales_person_id = required_str("salesPersonId", req.sales_person_id.as_deref())?;
    if !is_valid_email(&email) {
        return Err(AppError::invalid("email", "Invalid email format"));
    }
    if !state.mail_configured() {
        return Err(AppError::precondition("Email delivery is not configured."));
    }

    let (account, already_exists) = match state.identity.get_user_by_email(&email).await? {
        Some(account) => (account, true),
        None => {
            let account = state
                .identity
                .create_user(NewUser {
                    email: email.clone(),
                    password: generate_temporary_password(),
                    display_name: Some(name.clone()),
                    disabled: false,
                })
                .await?;
            (account, false)
        }
    };
    let uid = account.uid;

    let now = Utc::now();
    let profile_patch = json!({
        "userId": uid,
        "email": email,
        "emailLower": email,
        "name": name,
        "role": Role::SalesPerson.as_str(),
        "salesPersonId": sales_person_id,
        "modifiedAt": now,
    });
    run_transaction(state.store.as_ref(), &state.config.retry, |tx| {
        let uid = uid.clone();
        let mut profile_patch = profile_patch.clone();
        Box::pin(async move {
            match tx.get(collections::USERS, &uid).await? {
                Some(doc) => {
                    let existing: UserProfile = decode(doc)?;
                    let role = existing.role.as_deref().map(str::trim).unwrap_or_default();
                    if !role.is_empty() && existing.role() != Role::SalesPerson {
                        return Err(AppError::precondition(format!(
                            "This email is already used by a non-sales account (role: {role})."
                        )));
                    }
                }
                None => {
                    profile_patch["createdAt"] = profile_patch["modifiedAt"].clone();
                    profile_patch["isDisabled"] = json!(false);
                }
            }
            tx.merge(collections::USERS, &uid, profile_patch);
            Ok(())
        })
    })
    .await?;

    let reset_link = match state.identity.generate_password_reset_link(&email).await {
        Ok(link) => link,
        Err(e) => {
            tracing::error!(user_id = %uid, error = %e, "password reset link generation failed");
            return Err(AppError::precondition("Could not generate password reset link."));
        }
    };
    let message = emails::sales_welcome(&email, &name, &reset_link, &state.config.sales_portal_url);
    match state.mail.send(message).await {
        Ok(sent) => tracing::info!(
            user_id = %uid,
            sales_person_id = %sales_person_id,
            already_exists = already_exists,
            message_id = ?sent.message_id,
            "sales person account ready, password set-up mail sent"
        ),
        Err(e) => {
            tracing::error!(user_id = %uid, error = %e, "sales password set-up mail failed");
            return Err(AppError::internal(format!(
                "Account created but failed to send email: {e}"
            )));
        }
    }

    let message = if already_exists {
        "User already exists. Password setup email sent."
    } else {
        "Sales person account created successfully. Password setup email sent."
    };
    Ok(Json(CreateSalesPersonResponse {
        uid,
        message: message.to_string(),
        already_exists,
    }))
}
