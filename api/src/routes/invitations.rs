use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use trax_core::auth::compact_id;
use trax_core::invitations::{InvitationResult, SendStatus};

use crate::auth::{Caller, require_org_access};
use crate::emails::{self, InviteEmail};
use crate::error::AppError;
use crate::extract::AppJson;
use crate::lifecycle::{GuestInvite, SendContext, record_delivery_outcome, send_or_reuse_invitation};
use crate::routes::required_str;
use crate::state::AppState;
use crate::store::{DocumentStore, RetryPolicy, collections, run_transaction};

pub fn router() -> Router<AppState> {
    Router::new().route("/v1/sendInvitations", post(send_invitations))
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GuestEntry {
    pub guest_id: Option<String>,
    pub guest_email: Option<String>,
    pub guest_name: Option<String>,
    pub max_guest_invite: Option<i64>,
    pub batch_id: Option<String>,
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SendInvitationsRequest {
    pub event_id: Option<String>,
    pub organisation_id: Option<String>,
    #[serde(default)]
    pub invitations: Vec<GuestEntry>,
    pub demographic_question_set_id: Option<String>,
    /// Event-level code, stored alongside each guest's own code
    pub invitation_code: Option<String>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SendInvitationsResponse {
    pub ok: bool,
    /// Recipients whose mail was accepted
    pub invited: usize,
    pub results: Vec<InvitationResult>,
}

fn trimmed(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Mark a guest-list entry as invited. The guest document is optional; the
/// send counter is bumped inside a transaction so concurrent batches add up.
async fn mark_guest_invited(
    store: &dyn DocumentStore,
    policy: &RetryPolicy,
    guest_id: &str,
    host_uid: &str,
    now: DateTime<Utc>,
) -> Result<(), AppError> {
    run_transaction(store, policy, |tx| {
        let guest_id = guest_id.to_string();
        let host_uid = host_uid.to_string();
        Box::pin(async move {
            let Some(doc) = tx.get(collections::GUESTS, &guest_id).await? else {
                return Ok(());
            };
            let sent_count = doc
                .get("inviteSentCount")
                .and_then(serde_json::Value::as_i64)
                .unwrap_or(0);
            tx.merge(
                collections::GUESTS,
                &guest_id,
                json!({
                    "isInvited": true,
                    "modifiedAt": now,
                    "lastInvitedAt": now,
                    "lastInvitedByHost": host_uid,
                    "inviteSentCount": sent_count + 1,
                }),
            );
            Ok(())
        })
    })
    .await
}

#[utoipa::path(
    post,
    path = "/v1/sendInvitations",
    request_body = SendInvitationsRequest,
    responses(
        (status = 200, description = "Batch processed; per-recipient outcomes in results", body = SendInvitationsResponse),
        (status = 400, description = "Missing eventId or empty invitation list", body = trax_core::error::ApiError),
        (status = 403, description = "Caller may not manage the event's organisation", body = trax_core::error::ApiError),
        (status = 404, description = "Event not found", body = trax_core::error::ApiError),
        (status = 412, description = "Mail delivery not configured", body = trax_core::error::ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "invitations"
)]
pub async fn send_invitations(
    State(state): State<AppState>,
    caller: Caller,
    AppJson(req): AppJson<SendInvitationsRequest>,
) -> Result<Json<SendInvitationsResponse>, AppError> {
    let event_id = required_str("eventId", req.event_id.as_deref())?;
    if req.invitations.is_empty() {
        return Err(AppError::invalid("invitations", "invitations array required"));
    }
    if !state.mail_configured() {
        return Err(AppError::precondition("Email delivery is not configured."));
    }

    let mut reader = state.store.as_ref();
    let found = crate::catalog::require_event(&mut reader, &event_id).await?;
    let requested_org = trimmed(req.organisation_id.as_deref());
    let organisation_id = match (found.event.organisation(), requested_org.as_deref()) {
        (Some(event_org), requested) => {
            if let Some(requested) = requested.filter(|r| *r != event_org) {
                tracing::warn!(
                    event_id = %event_id,
                    event_organisation_id = %event_org,
                    requested_organisation_id = %requested,
                    "organisation mismatch on send, using the event's"
                );
            }
            event_org.to_string()
        }
        (None, Some(requested)) => requested.to_string(),
        (None, None) => {
            return Err(AppError::precondition("Event is not attached to an organisation."));
        }
    };
    require_org_access(&state, &caller, &organisation_id, "sendInvitations").await?;

    let public_event_id = found.public_id();
    let ctx = SendContext {
        event_id: public_event_id.clone(),
        organisation_id: Some(organisation_id.clone()),
        demographic_question_set_id: trimmed(req.demographic_question_set_id.as_deref()),
        event_invitation_code: trimmed(req.invitation_code.as_deref()),
        sent_by_host: Some(caller.uid.clone()),
        expiry_days: state.config.invitation_expiry_days,
    };

    let mut results = Vec::with_capacity(req.invitations.len());
    for entry in &req.invitations {
        let Some(email) = trimmed(entry.guest_email.as_deref()) else {
            tracing::warn!(event_id = %public_event_id, guest_id = ?entry.guest_id, "skipping recipient without email");
            continue;
        };
        let guest = GuestInvite {
            guest_id: trimmed(entry.guest_id.as_deref()),
            email: email.clone(),
            name: trimmed(entry.guest_name.as_deref()).unwrap_or_default(),
            max_guest_invite: entry.max_guest_invite.unwrap_or(0),
            batch_id: trimmed(entry.batch_id.as_deref()),
        };

        let resolved =
            match send_or_reuse_invitation(state.store.as_ref(), &state.config.retry, &ctx, &guest, Utc::now()).await {
                Ok(resolved) => resolved,
                Err(e) => {
                    tracing::error!(
                        event_id = %public_event_id,
                        guest_id = ?guest.guest_id,
                        error = %e,
                        "invitation could not be prepared"
                    );
                    results.push(InvitationResult {
                        guest_email: email,
                        guest_id: guest.guest_id.clone(),
                        invitation_id: None,
                        invitation_code: None,
                        status: SendStatus::Failed,
                        error: Some(e.message().to_string()),
                        status_code: None,
                    });
                    continue;
                }
            };

        let message = emails::invitation(&InviteEmail {
            app_base_url: &state.config.app_base_url,
            event: &found.event,
            event_id: &public_event_id,
            invitation_id: &resolved.invitation_id,
            token: &resolved.token,
            invitation_code: &resolved.invitation_code,
            guest_id: guest.guest_id.as_deref(),
            guest_email: &email,
            guest_name: &guest.name,
            batch_id: guest.batch_id.as_deref(),
            expiry_days: ctx.expiry_days,
        });
        let delivery = state.mail.send(message).await;
        if let Err(e) = record_delivery_outcome(
            state.store.as_ref(),
            &state.config.retry,
            &resolved.invitation_id,
            delivery.as_ref(),
            Utc::now(),
        )
        .await
        {
            tracing::error!(invitation_id = %resolved.invitation_id, error = %e, "delivery outcome not recorded");
        }

        let result = match delivery {
            Ok(sent) => {
                tracing::info!(
                    invitation_id = %resolved.invitation_id,
                    event_id = %public_event_id,
                    guest_id = ?guest.guest_id,
                    is_new = resolved.is_new,
                    message_id = ?sent.message_id,
                    "invitation sent"
                );
                if let Some(guest_id) = guest.guest_id.as_deref() {
                    if let Err(e) = mark_guest_invited(
                        state.store.as_ref(),
                        &state.config.retry,
                        guest_id,
                        &caller.uid,
                        Utc::now(),
                    )
                    .await {
                        tracing::warn!(guest_id = %guest_id, error = %e, "guest record not updated");
                    }
                }
                InvitationResult {
                    guest_email: email,
                    guest_id: guest.guest_id.clone(),
                    invitation_id: Some(resolved.invitation_id),
                    invitation_code: Some(resolved.invitation_code),
                    status: SendStatus::Sent,
                    error: None,
                    status_code: None,
                }
            }
            Err(e) => {
                tracing::warn!(
                    invitation_id = %resolved.invitation_id,
                    event_id = %public_event_id,
                    error = %e,
                    "invitation delivery failed"
                );
                InvitationResult {
                    guest_email: email,
                    guest_id: guest.guest_id.clone(),
                    invitation_id: Some(resolved.invitation_id),
                    invitation_code: Some(resolved.invitation_code),
                    status: SendStatus::Failed,
                    error: Some(e.to_string()),
                    status_code: e.status(),
                }
            }
        };
        results.push(result);
    }

    let log_id = compact_id();
    let log = json!({
        "eventId": public_event_id,
        "organisationId": organisation_id,
        "sentByHost": caller.uid,
        "createdAt": Utc::now(),
        "results": results,
    });
    if let Err(e) = state.store.set(collections::INVITATION_LOGS, &log_id, log).await {
        tracing::error!(event_id = %public_event_id, error = %e, "invitation log not written");
    }

    let invited = results
        .iter()
        .filter(|r| r.status == SendStatus::Sent)
        .count();
    tracing::info!(
        event_id = %public_event_id,
        invited = invited,
        attempted = results.len(),
        "invitation batch complete"
    );
    Ok(Json(SendInvitationsResponse {
        ok: true,
        invited,
        results,
    }))
}
