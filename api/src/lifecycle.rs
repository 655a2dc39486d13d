//! Invitation lifecycle: idempotent creation per (event, guest), delivery
//! bookkeeping and the per-recipient submission state machine.
//!
//! Every read-modify-write here runs through `run_transaction`, so concurrent
//! retries of the same request converge on one invitation and one response
//! per recipient.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value, json};

use trax_core::auth::{compact_id, generate_invitation_code, generate_invitation_token};
use trax_core::invitations::{
    DemographicAnswer, DemographicResponse, Invitation, InvitationPointer, MenuSelectionResponse,
    Recipient, expires_at_from, pointer_id, response_doc_id,
};

use crate::catalog::{require_event, resolve_catalog};
use crate::error::AppError;
use crate::mail::{MailError, SentMessage};
use crate::store::{
    DocumentReader, DocumentStore, Filter, RetryPolicy, Snapshot, collections, decode, encode,
    run_transaction,
};

/// Candidates examined when a pointer is missing.
const FALLBACK_QUERY_LIMIT: usize = 10;

/// Fields shared by every invitation of one send batch.
#[derive(Debug, Clone, Default)]
pub struct SendContext {
    /// Public event id invitations are keyed by
    pub event_id: String,
    pub organisation_id: Option<String>,
    pub demographic_question_set_id: Option<String>,
    pub event_invitation_code: Option<String>,
    pub sent_by_host: Option<String>,
    pub expiry_days: i64,
}

#[derive(Debug, Clone, Default)]
pub struct GuestInvite {
    pub guest_id: Option<String>,
    pub email: String,
    pub name: String,
    pub max_guest_invite: i64,
    pub batch_id: Option<String>,
}

impl GuestInvite {
    fn guest_id(&self) -> Option<&str> {
        self.guest_id.as_deref().map(str::trim).filter(|g| !g.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedInvitation {
    pub invitation_id: String,
    pub token: String,
    pub invitation_code: String,
    pub is_new: bool,
}

fn non_empty(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Earliest `createdAt` wins; documents without one sort last.
fn pick_earliest(candidates: Vec<Snapshot>) -> Option<(Snapshot, Invitation)> {
    let mut chosen: Option<(Snapshot, Invitation, DateTime<Utc>)> = None;
    for snapshot in candidates {
        let Ok(invitation) = snapshot.decode::<Invitation>() else {
            tracing::warn!(invitation_id = %snapshot.id, "skipping unreadable invitation candidate");
            continue;
        };
        let created = invitation.created_at.unwrap_or(DateTime::<Utc>::MAX_UTC);
        if chosen.as_ref().is_none_or(|(_, _, best)| created < *best) {
            chosen = Some((snapshot, invitation, created));
        }
    }
    chosen.map(|(snapshot, invitation, _)| (snapshot, invitation))
}

/// Core fields written on every (re)send. A merge, so submission state survives.
fn send_fields(
    ctx: &SendContext,
    guest: &GuestInvite,
    invitation_id: &str,
    existing: &Invitation,
    token: &str,
    invitation_code: &str,
    now: DateTime<Utc>,
) -> Value {
    let email = guest.email.trim();
    let mut fields = Map::new();
    fields.insert("invitationId".into(), json!(invitation_id));
    fields.insert("eventId".into(), json!(ctx.event_id));
    fields.insert("organisationId".into(), json!(ctx.organisation_id));
    fields.insert("guestId".into(), json!(guest.guest_id()));
    fields.insert("guestEmail".into(), json!(email));
    fields.insert("guestEmailLower".into(), json!(email.to_lowercase()));
    fields.insert("guestName".into(), json!(guest.name.trim()));
    fields.insert("maxGuestInvite".into(), json!(guest.max_guest_invite));
    fields.insert(
        "demographicQuestionSetId".into(),
        json!(ctx.demographic_question_set_id),
    );
    fields.insert("token".into(), json!(token));
    fields.insert("invitationCode".into(), json!(invitation_code));
    fields.insert("createdAt".into(), json!(existing.created_at.unwrap_or(now)));
    fields.insert(
        "expiresAt".into(),
        json!(expires_at_from(now, ctx.expiry_days)),
    );
    fields.insert("sent".into(), json!(false));
    fields.insert("lastSendAttemptAt".into(), json!(now));
    if let Some(code) = &ctx.event_invitation_code {
        fields.insert("eventInvitationCode".into(), json!(code));
    }
    if let Some(batch_id) = &guest.batch_id {
        fields.insert("batchId".into(), json!(batch_id));
    }
    if let Some(host) = &ctx.sent_by_host {
        fields.insert("sentByHost".into(), json!(host));
    }
    Value::Object(fields)
}

/// Create the invitation for `guest`, or reuse the canonical one for its
/// (event, guest id) pair. Token and code never change once assigned.
pub async fn send_or_reuse_invitation(
    store: &dyn DocumentStore,
    policy: &RetryPolicy,
    ctx: &SendContext,
    guest: &GuestInvite,
    now: DateTime<Utc>,
) -> Result<ResolvedInvitation, AppError> {
    let Some(guest_id) = guest.guest_id().map(str::to_string) else {
        return create_fresh_invitation(store, ctx, guest, now).await;
    };
    let pointer_key = pointer_id(&ctx.event_id, &guest_id);

    let resolved = run_transaction(store, policy, |tx| {
        let ctx = ctx.clone();
        let guest = guest.clone();
        let guest_id = guest_id.clone();
        let pointer_key = pointer_key.clone();
        Box::pin(async move {
            let (invitation_id, existing, is_new) =
                match tx.get(collections::INVITATION_POINTERS, &pointer_key).await? {
                    Some(doc) => {
                        let pointer: InvitationPointer = decode(doc)?;
                        pointer.ensure_matches(&ctx.event_id, &guest_id)?;
                        let invitation_id = non_empty(&pointer.invitation_id)
                            .ok_or_else(|| AppError::internal("Pointer has empty invitationId"))?;
                        let existing = match tx.get(collections::INVITATIONS, &invitation_id).await? {
                            Some(doc) => Some(decode::<Invitation>(doc)?),
                            None => None,
                        };
                        let is_new = existing.is_none();
                        (invitation_id, existing.unwrap_or_default(), is_new)
                    }
                    None => {
                        let candidates = tx
                            .query(
                                collections::INVITATIONS,
                                &[
                                    Filter::eq("eventId", ctx.event_id.as_str()),
                                    Filter::eq("guestId", guest_id.as_str()),
                                ],
                                Some(FALLBACK_QUERY_LIMIT),
                            )
                            .await?;
                        let (invitation_id, existing, is_new) = match pick_earliest(candidates) {
                            Some((snapshot, invitation)) => (snapshot.id, invitation, false),
                            None => (compact_id(), Invitation::default(), true),
                        };
                        let pointer = InvitationPointer {
                            event_id: ctx.event_id.clone(),
                            guest_id: guest_id.clone(),
                            invitation_id: invitation_id.clone(),
                            created_at: Some(now),
                        };
                        tx.set(collections::INVITATION_POINTERS, &pointer_key, encode(&pointer)?);
                        (invitation_id, existing, is_new)
                    }
                };

            existing.ensure_owned_by(&invitation_id, &guest_id)?;

            let token = non_empty(&existing.token).unwrap_or_else(generate_invitation_token);
            let invitation_code =
                non_empty(&existing.invitation_code).unwrap_or_else(generate_invitation_code);
            tx.merge(
                collections::INVITATIONS,
                &invitation_id,
                send_fields(&ctx, &guest, &invitation_id, &existing, &token, &invitation_code, now),
            );

            Ok(ResolvedInvitation {
                invitation_id,
                token,
                invitation_code,
                is_new,
            })
        })
    })
    .await?;

    tracing::info!(
        invitation_id = %resolved.invitation_id,
        event_id = %ctx.event_id,
        guest_id = %guest_id,
        is_new = resolved.is_new,
        "invitation resolved"
    );
    Ok(resolved)
}

/// Guests known only by email get a brand-new invitation every time.
async fn create_fresh_invitation(
    store: &dyn DocumentStore,
    ctx: &SendContext,
    guest: &GuestInvite,
    now: DateTime<Utc>,
) -> Result<ResolvedInvitation, AppError> {
    let resolved = ResolvedInvitation {
        invitation_id: compact_id(),
        token: generate_invitation_token(),
        invitation_code: generate_invitation_code(),
        is_new: true,
    };
    let fields = send_fields(
        ctx,
        guest,
        &resolved.invitation_id,
        &Invitation::default(),
        &resolved.token,
        &resolved.invitation_code,
        now,
    );
    store
        .set(collections::INVITATIONS, &resolved.invitation_id, fields)
        .await?;
    tracing::info!(
        invitation_id = %resolved.invitation_id,
        event_id = %ctx.event_id,
        "invitation created for guest without id"
    );
    Ok(resolved)
}

/// Record how a delivery attempt ended. Counters are read and bumped in one
/// small transaction of their own.
pub async fn record_delivery_outcome(
    store: &dyn DocumentStore,
    policy: &RetryPolicy,
    invitation_id: &str,
    outcome: Result<&SentMessage, &MailError>,
    now: DateTime<Utc>,
) -> Result<(), AppError> {
    let base = match outcome {
        Ok(sent) => json!({
            "sent": true,
            "sentAt": now,
            "providerMessageId": sent.message_id,
            "sendError": null,
            "sendErrorStatus": null,
            "sendErrorBody": null,
        }),
        Err(err) => json!({
            "sent": false,
            "sentAt": now,
            "sendError": err.to_string(),
            "sendErrorStatus": err.status(),
            "sendErrorBody": err.body(),
        }),
    };
    let delivered = outcome.is_ok();

    run_transaction(store, policy, |tx| {
        let mut patch = base.clone();
        let invitation_id = invitation_id.to_string();
        Box::pin(async move {
            let current: Invitation = match tx.get(collections::INVITATIONS, &invitation_id).await? {
                Some(doc) => decode(doc)?,
                None => return Err(AppError::not_found("Invitation not found")),
            };
            if let Some(fields) = patch.as_object_mut() {
                fields.insert("sendAttemptCount".into(), json!(current.send_attempt_count + 1));
                if delivered {
                    fields.insert("sendSuccessCount".into(), json!(current.send_success_count + 1));
                }
            }
            tx.merge(collections::INVITATIONS, &invitation_id, patch);
            Ok(())
        })
    })
    .await
}

/// Load an invitation for a guest request and check its token and expiry.
pub async fn load_guest_invitation<R>(
    reader: &mut R,
    invitation_id: &str,
    token: &str,
    now: DateTime<Utc>,
) -> Result<Invitation, AppError>
where
    R: DocumentReader + ?Sized,
{
    let invitation: Invitation = match reader.read(collections::INVITATIONS, invitation_id).await? {
        Some(doc) => decode(doc)?,
        None => return Err(AppError::not_found("Invitation not found")),
    };
    invitation.check_access(token, now)?;
    Ok(invitation)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionOutcome {
    pub already_submitted: bool,
    pub response_id: Option<String>,
    pub companion_index: Option<usize>,
}

/// First call for a recipient stores the answers; later calls return the
/// original response id without writing anything.
pub async fn submit_demographics(
    store: &dyn DocumentStore,
    policy: &RetryPolicy,
    invitation_id: &str,
    token: &str,
    recipient: Recipient,
    answers: &[DemographicAnswer],
    now: DateTime<Utc>,
) -> Result<SubmissionOutcome, AppError> {
    let outcome = run_transaction(store, policy, |tx| {
        let invitation_id = invitation_id.to_string();
        let token = token.to_string();
        let answers = answers.to_vec();
        Box::pin(async move {
            let invitation = load_guest_invitation(&mut &mut *tx, &invitation_id, &token, now).await?;
            let companion_index = recipient.companion_index();

            let track = invitation.demographics_track(recipient)?;
            if track.submitted {
                return Ok(SubmissionOutcome {
                    already_submitted: true,
                    response_id: track.response_id,
                    companion_index,
                });
            }

            let response_id = response_doc_id(&invitation_id, recipient);
            if tx.get(collections::DEMOGRAPHIC_RESPONSES, &response_id).await?.is_some() {
                return Ok(SubmissionOutcome {
                    already_submitted: true,
                    response_id: Some(response_id),
                    companion_index,
                });
            }

            let who = invitation.recipient_identity(recipient)?;
            let response = DemographicResponse {
                event_id: invitation.event_id.clone(),
                organisation_id: invitation.organisation_id.clone(),
                invitation_id: invitation_id.clone(),
                guest_id: who.guest_id,
                guest_email: who.email,
                guest_name: who.name,
                is_companion: recipient.is_companion(),
                companion_index,
                demographic_question_set_id: invitation.demographic_question_set_id.clone(),
                answers,
                created_at: Some(now),
            };
            tx.set(collections::DEMOGRAPHIC_RESPONSES, &response_id, encode(&response)?);
            tx.merge(
                collections::INVITATIONS,
                &invitation_id,
                invitation.demographics_patch(recipient, &response_id, now)?,
            );

            Ok(SubmissionOutcome {
                already_submitted: false,
                response_id: Some(response_id),
                companion_index,
            })
        })
    })
    .await?;

    if !outcome.already_submitted {
        tracing::info!(
            invitation_id = %invitation_id,
            companion_index = ?outcome.companion_index,
            "demographics submitted"
        );
    }
    Ok(outcome)
}

/// Validate and store a menu selection. Requires demographics for the same
/// recipient; idempotent like `submit_demographics`.
pub async fn submit_menu_selection(
    store: &dyn DocumentStore,
    policy: &RetryPolicy,
    invitation_id: &str,
    token: &str,
    recipient: Recipient,
    selected: &[String],
    now: DateTime<Utc>,
) -> Result<SubmissionOutcome, AppError> {
    let outcome = run_transaction(store, policy, |tx| {
        let invitation_id = invitation_id.to_string();
        let token = token.to_string();
        let selected = selected.to_vec();
        Box::pin(async move {
            let invitation = load_guest_invitation(&mut &mut *tx, &invitation_id, &token, now).await?;
            let companion_index = recipient.companion_index();

            invitation.ensure_menu_allowed(recipient)?;
            let track = invitation.menu_track(recipient)?;
            if track.submitted {
                return Ok(SubmissionOutcome {
                    already_submitted: true,
                    response_id: track.response_id,
                    companion_index,
                });
            }

            let response_id = response_doc_id(&invitation_id, recipient);
            if tx.get(collections::MENU_RESPONSES, &response_id).await?.is_some() {
                return Ok(SubmissionOutcome {
                    already_submitted: true,
                    response_id: Some(response_id),
                    companion_index,
                });
            }

            let event_id = non_empty(&invitation.event_id)
                .ok_or_else(|| AppError::precondition("Invitation missing eventId"))?;
            let found = require_event(&mut &mut *tx, &event_id).await?;
            let catalog = resolve_catalog(&mut &mut *tx, &found.event).await?;
            let selection = catalog.validate(&selected)?;

            let who = invitation.recipient_identity(recipient)?;
            let response = MenuSelectionResponse {
                event_id: event_id.clone(),
                organisation_id: invitation.organisation_id.clone(),
                invitation_id: invitation_id.clone(),
                guest_id: who.guest_id,
                guest_email: who.email,
                guest_name: who.name,
                is_companion: recipient.is_companion(),
                companion_index,
                selected_menu_item_ids: selection.selected_ids,
                group_selections: selection.group_selections,
                created_at: Some(now),
            };
            tx.set(collections::MENU_RESPONSES, &response_id, encode(&response)?);
            tx.merge(
                collections::INVITATIONS,
                &invitation_id,
                invitation.menu_patch(recipient, &response_id, now)?,
            );

            Ok(SubmissionOutcome {
                already_submitted: false,
                response_id: Some(response_id),
                companion_index,
            })
        })
    })
    .await?;

    if !outcome.already_submitted {
        tracing::info!(
            invitation_id = %invitation_id,
            companion_index = ?outcome.companion_index,
            "menu selection submitted"
        );
    }
    Ok(outcome)
}
