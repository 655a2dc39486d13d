//! Token-guarded endpoints used by invited guests. No bearer token needed.

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use trax_core::invitations::{DemographicAnswer, Recipient};
use trax_core::menu::{CategoryKey, MenuItem};

use crate::catalog::{find_event, resolve_catalog};
use crate::error::AppError;
use crate::extract::AppJson;
use crate::lifecycle::{SubmissionOutcome, load_guest_invitation, submit_demographics, submit_menu_selection};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/v1/getSelectedMenuItemsForInvitation",
            post(get_selected_menu_items),
        )
        .route("/v1/submitDemographics", post(submit_demographics_handler))
        .route("/v1/submitMenuSelection", post(submit_menu_selection_handler))
}

/// Both values must be present and non-blank.
fn invitation_credentials<'a>(
    invitation_id: Option<&'a str>,
    token: Option<&'a str>,
) -> Result<(&'a str, &'a str), AppError> {
    match (
        invitation_id.map(str::trim).filter(|v| !v.is_empty()),
        token.map(str::trim).filter(|v| !v.is_empty()),
    ) {
        (Some(id), Some(token)) => Ok((id, token)),
        (None, _) => Err(AppError::invalid("invitationId", "invitationId and token are required")),
        (_, None) => Err(AppError::invalid("token", "invitationId and token are required")),
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionResponse {
    pub ok: bool,
    pub already_submitted: bool,
    pub response_id: Option<String>,
    pub companion_index: Option<usize>,
}

impl From<SubmissionOutcome> for SubmissionResponse {
    fn from(outcome: SubmissionOutcome) -> Self {
        SubmissionResponse {
            ok: true,
            already_submitted: outcome.already_submitted,
            response_id: outcome.response_id,
            companion_index: outcome.companion_index,
        }
    }
}

// ──────────────────────────────────────────────
// POST /v1/getSelectedMenuItemsForInvitation
// ──────────────────────────────────────────────

#[derive(Debug, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct InvitationAccessRequest {
    pub invitation_id: Option<String>,
    pub token: Option<String>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MenuGroupView {
    pub group_id: String,
    pub name: String,
    pub category_key: CategoryKey,
    pub category_label: String,
    pub max_pick: u32,
    pub items: Vec<MenuItem>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SelectedMenuResponse {
    pub ok: bool,
    pub event_id: String,
    pub event_name: String,
    pub groups: Vec<MenuGroupView>,
    /// Items outside every group, each individually selectable
    pub items: Vec<MenuItem>,
}

#[utoipa::path(
    post,
    path = "/v1/getSelectedMenuItemsForInvitation",
    request_body = InvitationAccessRequest,
    responses(
        (status = 200, description = "Menu the guest may choose from", body = SelectedMenuResponse),
        (status = 403, description = "Wrong invitation token", body = trax_core::error::ApiError),
        (status = 404, description = "Invitation or event not found", body = trax_core::error::ApiError),
        (status = 412, description = "Invitation expired", body = trax_core::error::ApiError)
    ),
    tag = "guest"
)]
pub async fn get_selected_menu_items(
    State(state): State<AppState>,
    AppJson(req): AppJson<InvitationAccessRequest>,
) -> Result<Json<SelectedMenuResponse>, AppError> {
    let (invitation_id, token) =
        invitation_credentials(req.invitation_id.as_deref(), req.token.as_deref())?;

    let mut reader = state.store.as_ref();
    let invitation = load_guest_invitation(&mut reader, invitation_id, token, Utc::now()).await?;
    if invitation.event_id.trim().is_empty() {
        return Err(AppError::precondition("Invitation missing eventId"));
    }
    let found = find_event(&mut reader, &invitation.event_id)
        .await?
        .ok_or_else(|| AppError::not_found("Event not found"))?;
    let catalog = resolve_catalog(&mut reader, &found.event).await?;

    let groups = catalog
        .groups
        .iter()
        .map(|group| MenuGroupView {
            group_id: group.group_id.clone(),
            name: group.name.clone(),
            category_key: group.category_key,
            category_label: group.category_label.clone(),
            max_pick: group.max_pick,
            items: group
                .item_ids
                .iter()
                .filter_map(|id| catalog.items_by_id.get(id).cloned())
                .collect(),
        })
        .collect();
    let items = catalog
        .ungrouped_ids
        .iter()
        .filter_map(|id| catalog.items_by_id.get(id).cloned())
        .collect();

    Ok(Json(SelectedMenuResponse {
        ok: true,
        event_id: invitation.event_id.clone(),
        event_name: found.event.display_name(),
        groups,
        items,
    }))
}

// ──────────────────────────────────────────────
// POST /v1/submitDemographics
// ──────────────────────────────────────────────

#[derive(Debug, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SubmitDemographicsRequest {
    pub invitation_id: Option<String>,
    pub token: Option<String>,
    pub answers: Option<Vec<DemographicAnswer>>,
    /// Absent for the primary guest
    pub companion_index: Option<i64>,
}

#[utoipa::path(
    post,
    path = "/v1/submitDemographics",
    request_body = SubmitDemographicsRequest,
    responses(
        (status = 200, description = "Answers stored, or the earlier submission returned", body = SubmissionResponse),
        (status = 400, description = "Missing fields or bad companion index", body = trax_core::error::ApiError),
        (status = 403, description = "Wrong invitation token", body = trax_core::error::ApiError),
        (status = 412, description = "Invitation expired", body = trax_core::error::ApiError)
    ),
    tag = "guest"
)]
pub async fn submit_demographics_handler(
    State(state): State<AppState>,
    AppJson(req): AppJson<SubmitDemographicsRequest>,
) -> Result<Json<SubmissionResponse>, AppError> {
    let (invitation_id, token) =
        invitation_credentials(req.invitation_id.as_deref(), req.token.as_deref())?;
    let answers = req
        .answers
        .as_deref()
        .ok_or_else(|| AppError::invalid("answers", "answers must be an array"))?;
    let recipient = Recipient::from_index(req.companion_index)?;

    let outcome = submit_demographics(
        state.store.as_ref(),
        &state.config.retry,
        invitation_id,
        token,
        recipient,
        answers,
        Utc::now(),
    )
    .await?;
    Ok(Json(outcome.into()))
}

// ──────────────────────────────────────────────
// POST /v1/submitMenuSelection
// ──────────────────────────────────────────────

#[derive(Debug, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SubmitMenuSelectionRequest {
    pub invitation_id: Option<String>,
    pub token: Option<String>,
    pub selected_menu_item_ids: Option<Vec<String>>,
    pub companion_index: Option<i64>,
}

#[utoipa::path(
    post,
    path = "/v1/submitMenuSelection",
    request_body = SubmitMenuSelectionRequest,
    responses(
        (status = 200, description = "Selection stored, or the earlier submission returned", body = SubmissionResponse),
        (status = 400, description = "Unknown item or group limit exceeded", body = trax_core::error::ApiError),
        (status = 403, description = "Wrong invitation token", body = trax_core::error::ApiError),
        (status = 412, description = "Expired, or demographics not yet submitted", body = trax_core::error::ApiError)
    ),
    tag = "guest"
)]
pub async fn submit_menu_selection_handler(
    State(state): State<AppState>,
    AppJson(req): AppJson<SubmitMenuSelectionRequest>,
) -> Result<Json<SubmissionResponse>, AppError> {
    let (invitation_id, token) =
        invitation_credentials(req.invitation_id.as_deref(), req.token.as_deref())?;
    let selected = req.selected_menu_item_ids.as_deref().ok_or_else(|| {
        AppError::invalid("selectedMenuItemIds", "selectedMenuItemIds must be an array")
    })?;
    let recipient = Recipient::from_index(req.companion_index)?;

    let outcome = submit_menu_selection(
        state.store.as_ref(),
        &state.config.retry,
        invitation_id,
        token,
        recipient,
        selected,
        Utc::now(),
    )
    .await?;
    Ok(Json(outcome.into()))
}
