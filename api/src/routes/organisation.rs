use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use trax_core::identity::Role;
use trax_core::validation::{CompanyInfo, validate_company_info};

use crate::auth::Caller;
use crate::error::AppError;
use crate::extract::AppJson;
use crate::state::AppState;
use crate::store::{DocumentReader, Filter, collections, run_transaction};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/checkOrganisationInfo", post(check_organisation_info))
        .route("/v1/saveCompanyInfo", post(save_company_info))
}

/// A `roles/{roleId}` document.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RoleRecord {
    organisation_id: Option<String>,
    role: Option<String>,
}

/// The caller's enabled admin role, if any.
async fn active_admin_role<R>(reader: &mut R, uid: &str) -> Result<Option<RoleRecord>, AppError>
where
    R: DocumentReader + ?Sized,
{
    let filters = [
        Filter::eq("userId", uid),
        Filter::eq("role", Role::Admin.as_str()),
        Filter::eq("isDisabled", false),
    ];
    let found = reader.read_query(collections::ROLES, &filters, Some(1)).await?;
    match found.into_iter().next() {
        Some(snapshot) => Ok(Some(snapshot.decode()?)),
        None => Ok(None),
    }
}

/// Hyphen-less v4 UUID, the id format of organisations and roles.
fn simple_uuid() -> String {
    Uuid::new_v4().simple().to_string()
}

// ──────────────────────────────────────────────
// POST /v1/checkOrganisationInfo
// ──────────────────────────────────────────────

#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrganisationInfoResponse {
    pub has_organisation: bool,
    pub organisation_id: Option<String>,
    pub role: Option<String>,
}

#[utoipa::path(
    post,
    path = "/v1/checkOrganisationInfo",
    responses(
        (status = 200, description = "Organisation membership of the caller", body = OrganisationInfoResponse),
        (status = 401, description = "Not signed in", body = trax_core::error::ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "organisation"
)]
pub async fn check_organisation_info(
    State(state): State<AppState>,
    caller: Caller,
) -> Result<Json<OrganisationInfoResponse>, AppError> {
    let mut reader = state.store.as_ref();
    let response = match active_admin_role(&mut reader, &caller.uid).await? {
        Some(role) => {
            tracing::info!(user_id = %caller.uid, organisation_id = ?role.organisation_id, "caller has an organisation");
            OrganisationInfoResponse {
                has_organisation: true,
                organisation_id: role.organisation_id,
                role: Some(role.role.unwrap_or_else(|| Role::Admin.as_str().to_string())),
            }
        }
        None => OrganisationInfoResponse {
            has_organisation: false,
            organisation_id: None,
            role: None,
        },
    };
    Ok(Json(response))
}

// ──────────────────────────────────────────────
// POST /v1/saveCompanyInfo
// ──────────────────────────────────────────────

#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SaveCompanyInfoResponse {
    pub success: bool,
    pub message: String,
    pub organisation_id: String,
    pub role_id: String,
    pub role: String,
}

fn organisation_document(info: &CompanyInfo, organisation_id: &str, uid: &str) -> serde_json::Value {
    let trimmed = |v: &Option<String>| {
        v.as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };
    let address = info.address.clone().unwrap_or_default();
    let now = Utc::now();
    json!({
        "organisationId": organisation_id,
        "name": trimmed(&info.name),
        "phone": trimmed(&info.phone),
        "website": trimmed(&info.website),
        "address": {
            "street": trimmed(&address.street),
            "city": trimmed(&address.city),
            "state": trimmed(&address.state),
            "zip": trimmed(&address.zip),
            "country": trimmed(&address.country),
        },
        "timezone": trimmed(&info.timezone),
        "currency": trimmed(&info.currency).unwrap_or_else(|| "USD".to_string()),
        "logo": trimmed(&info.logo),
        "assignedSalesPersonId": trimmed(&info.assigned_sales_person_id),
        "createdBy": uid,
        "isDisabled": false,
        "createdAt": now,
        "modifiedAt": now,
    })
}

#[utoipa::path(
    post,
    path = "/v1/saveCompanyInfo",
    request_body = CompanyInfo,
    responses(
        (status = 200, description = "Organisation and admin role created", body = SaveCompanyInfoResponse),
        (status = 400, description = "Invalid company details", body = trax_core::error::ApiError),
        (status = 401, description = "Not signed in", body = trax_core::error::ApiError),
        (status = 409, description = "Caller already owns an organisation", body = trax_core::error::ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "organisation"
)]
pub async fn save_company_info(
    State(state): State<AppState>,
    caller: Caller,
    AppJson(info): AppJson<CompanyInfo>,
) -> Result<impl IntoResponse, AppError> {
    validate_company_info(&info)?;

    let organisation_id = simple_uuid();
    let role_id = simple_uuid();
    let organisation = organisation_document(&info, &organisation_id, &caller.uid);
    let now = Utc::now();
    let role = json!({
        "roleId": role_id,
        "userId": caller.uid,
        "organisationId": organisation_id,
        "role": Role::Admin.as_str(),
        "isDisabled": false,
        "createdAt": now,
        "modifiedAt": now,
    });
    let profile_patch = json!({
        "userId": caller.uid,
        "organisationId": organisation_id,
        "role": Role::Admin.as_str(),
        "modifiedAt": now,
    });

    run_transaction(state.store.as_ref(), &state.config.retry, |tx| {
        let uid = caller.uid.clone();
        let organisation_id = organisation_id.clone();
        let role_id = role_id.clone();
        let organisation = organisation.clone();
        let role = role.clone();
        let profile_patch = profile_patch.clone();
        Box::pin(async move {
            // The profile read makes concurrent saves by one user conflict.
            tx.get(collections::USERS, &uid).await?;
            if let Some(existing) = active_admin_role(&mut &mut *tx, &uid).await? {
                tracing::warn!(
                    user_id = %uid,
                    organisation_id = ?existing.organisation_id,
                    "caller already administers an organisation"
                );
                return Err(AppError::AlreadyExists {
                    message: "You have already created an organisation. Each user can only create one organisation."
                        .to_string(),
                });
            }
            tx.set(collections::ORGANISATIONS, &organisation_id, organisation);
            tx.set(collections::ROLES, &role_id, role);
            tx.merge(collections::USERS, &uid, profile_patch);
            Ok(())
        })
    })
    .await?;

    tracing::info!(
        user_id = %caller.uid,
        organisation_id = %organisation_id,
        role_id = %role_id,
        "organisation created"
    );

    Ok(Json(SaveCompanyInfoResponse {
        success: true,
        message: "Company information and admin role created successfully".to_string(),
        organisation_id,
        role_id,
        role: Role::Admin.as_str().to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::{Value, json};

    use super::*;
    use crate::routes::testing::{post_json, sign_in};
    use crate::state::testing::test_app;
    use crate::store::DocumentStore;

    fn company() -> Value {
        json!({
            "name": "Acme Catering",
            "phone": "+1 (555) 123-4567",
            "timezone": "America/New_York",
            "address": {
                "street": "1 Main St",
                "city": "Springfield",
                "state": "IL",
                "zip": "62701",
                "country": "US"
            }
        })
    }

    #[tokio::test]
    async fn save_then_check_reports_the_organisation() {
        let app = test_app();
        let (uid, token) = sign_in(&app, "owner@example.com", json!({ "role": "admin" })).await;
        let router = router().with_state(app.state.clone());

        let (status, body) =
            post_json(router.clone(), "/v1/checkOrganisationInfo", Some(&token), json!({})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["hasOrganisation"], false);

        let (status, saved) =
            post_json(router.clone(), "/v1/saveCompanyInfo", Some(&token), company()).await;
        assert_eq!(status, StatusCode::OK);
        let org_id = saved["organisationId"].as_str().unwrap().to_string();
        assert_eq!(org_id.len(), 32);
        assert!(!org_id.contains('-'));

        let org = app
            .store
            .get(collections::ORGANISATIONS, &org_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(org["currency"], "USD");
        assert_eq!(org["address"]["zip"], "62701");
        let profile = app.store.get(collections::USERS, &uid).await.unwrap().unwrap();
        assert_eq!(profile["organisationId"], org_id.as_str());
        assert_eq!(profile["role"], "admin");

        let (_, body) =
            post_json(router.clone(), "/v1/checkOrganisationInfo", Some(&token), json!({})).await;
        assert_eq!(body["hasOrganisation"], true);
        assert_eq!(body["organisationId"], org_id.as_str());
        assert_eq!(body["role"], "admin");

        let (status, body) = post_json(router, "/v1/saveCompanyInfo", Some(&token), company()).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "already-exists");
    }

    #[tokio::test]
    async fn save_validates_company_fields() {
        let app = test_app();
        let (_, token) = sign_in(&app, "owner@example.com", Value::Null).await;
        let router = router().with_state(app.state.clone());

        let mut bad = company();
        bad["timezone"] = json!("Mars/Olympus");
        let (status, body) = post_json(router.clone(), "/v1/saveCompanyInfo", Some(&token), bad).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["field"], "timezone");

        let (status, _) = post_json(router, "/v1/saveCompanyInfo", None, company()).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}
