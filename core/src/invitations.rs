use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::ToSchema;

pub const DEFAULT_EXPIRY_DAYS: i64 = 14;

/// Parse an expiry setting the way the deployment env has always been read:
/// leading integer only, anything below one day falls back to the default.
pub fn parse_expiry_days(raw: Option<&str>) -> i64 {
    let raw = raw.unwrap_or_default().trim();
    let digits_end = raw
        .char_indices()
        .find(|(i, c)| !(c.is_ascii_digit() || (*i == 0 && (*c == '-' || *c == '+'))))
        .map(|(i, _)| i)
        .unwrap_or(raw.len());
    match raw[..digits_end].parse::<i64>() {
        Ok(n) if n >= 1 => n,
        _ => DEFAULT_EXPIRY_DAYS,
    }
}

pub fn expires_at_from(now: DateTime<Utc>, days: i64) -> DateTime<Utc> {
    now + Duration::days(days.max(1))
}

/// Document id of the (eventId, guestId) pointer.
///
/// The key is not unique when ids contain `_` (`("a_b", "c")` and
/// `("a", "b_c")` share `a_b_c`), so resolution also checks the ids stored in
/// the pointer with `InvitationPointer::ensure_matches`.
pub fn pointer_id(event_id: &str, guest_id: &str) -> String {
    format!("{event_id}_{guest_id}")
}

/// Secondary index entry: the canonical invitation for one (event, guest).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InvitationPointer {
    pub event_id: String,
    pub guest_id: String,
    pub invitation_id: String,
    pub created_at: Option<DateTime<Utc>>,
}

impl InvitationPointer {
    /// Reject a pointer recorded for a different (event, guest) pair under the
    /// same key. Pointers written without ids are accepted.
    pub fn ensure_matches(&self, event_id: &str, guest_id: &str) -> Result<(), LifecycleError> {
        let stored_event = self.event_id.trim();
        let stored_guest = self.guest_id.trim();
        if (!stored_event.is_empty() && stored_event != event_id)
            || (!stored_guest.is_empty() && stored_guest != guest_id)
        {
            return Err(LifecycleError::PointerMismatch {
                key: pointer_id(event_id, guest_id),
                stored_event_id: stored_event.to_string(),
                stored_guest_id: stored_guest.to_string(),
            });
        }
        Ok(())
    }
}

/// A guest attached to a primary invitation, with its own submission tracks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct Companion {
    pub guest_id: Option<String>,
    pub name: String,
    pub email: String,
    pub demographic_submitted: bool,
    pub demographic_response_id: Option<String>,
    pub demographic_submitted_at: Option<DateTime<Utc>>,
    pub menu_submitted: bool,
    pub menu_response_id: Option<String>,
    pub menu_submitted_at: Option<DateTime<Utc>>,
}

/// One invitation per (event, guest) when the guest id is known.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct Invitation {
    pub invitation_id: String,
    pub event_id: String,
    pub organisation_id: Option<String>,
    pub guest_id: Option<String>,
    pub guest_email: String,
    pub guest_email_lower: String,
    pub guest_name: String,
    pub max_guest_invite: i64,
    pub demographic_question_set_id: Option<String>,
    pub event_invitation_code: Option<String>,
    pub batch_id: Option<String>,
    pub sent_by_host: Option<String>,

    pub token: String,
    pub invitation_code: String,
    pub created_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,

    pub sent: bool,
    pub sent_at: Option<DateTime<Utc>>,
    pub last_send_attempt_at: Option<DateTime<Utc>>,
    pub provider_message_id: Option<String>,
    pub send_error: Option<String>,
    pub send_error_status: Option<i64>,
    pub send_error_body: Option<String>,
    pub send_attempt_count: u32,
    pub send_success_count: u32,

    /// Primary guest submitted demographics
    pub used: bool,
    pub used_at: Option<DateTime<Utc>>,
    pub response_id: Option<String>,
    pub menu_selection_submitted: bool,
    pub menu_selection_submitted_at: Option<DateTime<Utc>>,
    pub menu_response_id: Option<String>,

    pub companions: Vec<Companion>,
}

/// Who a submission is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipient {
    Primary,
    Companion(usize),
}

impl Recipient {
    pub fn from_index(companion_index: Option<i64>) -> Result<Recipient, LifecycleError> {
        match companion_index {
            None => Ok(Recipient::Primary),
            Some(i) if i >= 0 => Ok(Recipient::Companion(i as usize)),
            Some(i) => Err(LifecycleError::InvalidCompanionIndex(i)),
        }
    }

    pub fn companion_index(self) -> Option<usize> {
        match self {
            Recipient::Primary => None,
            Recipient::Companion(i) => Some(i),
        }
    }

    pub fn is_companion(self) -> bool {
        matches!(self, Recipient::Companion(_))
    }
}

/// Response documents are keyed so at most one exists per recipient and kind.
pub fn response_doc_id(invitation_id: &str, recipient: Recipient) -> String {
    match recipient {
        Recipient::Primary => invitation_id.to_string(),
        Recipient::Companion(i) => format!("{invitation_id}_companion_{i}"),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RecipientStage {
    Invited,
    DemographicsSubmitted,
    MenuSubmitted,
}

/// Submission state of one track (demographics or menu) for one recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackState {
    pub submitted: bool,
    pub response_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipientIdentity {
    pub guest_id: Option<String>,
    pub email: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LifecycleError {
    #[error("Invalid token")]
    InvalidToken,
    #[error("Invitation expired")]
    Expired,
    #[error("companionIndex must be a non-negative integer, got {0}")]
    InvalidCompanionIndex(i64),
    #[error("Companion index {index} is out of range. Only {len} companions exist.")]
    CompanionOutOfRange { index: usize, len: usize },
    #[error("Demographic questions not submitted yet")]
    DemographicsMissing,
    #[error("Companion {0} has not submitted demographics yet")]
    CompanionDemographicsMissing(usize),
    #[error(
        "Invitation collision: invitationId={invitation_id} belongs to guestId={stored_guest_id}, attempted guestId={requested_guest_id}"
    )]
    Collision {
        invitation_id: String,
        stored_guest_id: String,
        requested_guest_id: String,
    },
    #[error(
        "Invitation collision: pointer {key} belongs to eventId={stored_event_id}, guestId={stored_guest_id}"
    )]
    PointerMismatch {
        key: String,
        stored_event_id: String,
        stored_guest_id: String,
    },
}

impl Invitation {
    /// Guest-facing gate: token must match and the invitation must not be expired.
    /// A missing expiry never expires.
    pub fn check_access(&self, token: &str, now: DateTime<Utc>) -> Result<(), LifecycleError> {
        if self.token.is_empty() || self.token != token {
            return Err(LifecycleError::InvalidToken);
        }
        if self.expires_at.is_some_and(|expires_at| expires_at < now) {
            return Err(LifecycleError::Expired);
        }
        Ok(())
    }

    /// Refuse to reuse an invitation that belongs to a different guest.
    pub fn ensure_owned_by(&self, invitation_id: &str, guest_id: &str) -> Result<(), LifecycleError> {
        let stored = self.guest_id.as_deref().unwrap_or_default().trim();
        if !stored.is_empty() && stored != guest_id {
            return Err(LifecycleError::Collision {
                invitation_id: invitation_id.to_string(),
                stored_guest_id: stored.to_string(),
                requested_guest_id: guest_id.to_string(),
            });
        }
        Ok(())
    }

    pub fn companion(&self, index: usize) -> Result<&Companion, LifecycleError> {
        self.companions
            .get(index)
            .ok_or(LifecycleError::CompanionOutOfRange {
                index,
                len: self.companions.len(),
            })
    }

    pub fn demographics_track(&self, recipient: Recipient) -> Result<TrackState, LifecycleError> {
        Ok(match recipient {
            Recipient::Primary => TrackState {
                submitted: self.used,
                response_id: self.response_id.clone(),
            },
            Recipient::Companion(i) => {
                let companion = self.companion(i)?;
                TrackState {
                    submitted: companion.demographic_submitted,
                    response_id: companion.demographic_response_id.clone(),
                }
            }
        })
    }

    pub fn menu_track(&self, recipient: Recipient) -> Result<TrackState, LifecycleError> {
        Ok(match recipient {
            Recipient::Primary => TrackState {
                submitted: self.menu_selection_submitted,
                response_id: self.menu_response_id.clone(),
            },
            Recipient::Companion(i) => {
                let companion = self.companion(i)?;
                TrackState {
                    submitted: companion.menu_submitted,
                    response_id: companion.menu_response_id.clone(),
                }
            }
        })
    }

    pub fn stage(&self, recipient: Recipient) -> Result<RecipientStage, LifecycleError> {
        if self.menu_track(recipient)?.submitted {
            Ok(RecipientStage::MenuSubmitted)
        } else if self.demographics_track(recipient)?.submitted {
            Ok(RecipientStage::DemographicsSubmitted)
        } else {
            Ok(RecipientStage::Invited)
        }
    }

    /// Menu selection is gated behind demographics for the same recipient.
    pub fn ensure_menu_allowed(&self, recipient: Recipient) -> Result<(), LifecycleError> {
        if self.demographics_track(recipient)?.submitted {
            return Ok(());
        }
        Err(match recipient {
            Recipient::Primary => LifecycleError::DemographicsMissing,
            Recipient::Companion(i) => LifecycleError::CompanionDemographicsMissing(i),
        })
    }

    pub fn recipient_identity(&self, recipient: Recipient) -> Result<RecipientIdentity, LifecycleError> {
        Ok(match recipient {
            Recipient::Primary => RecipientIdentity {
                guest_id: self.guest_id.clone().filter(|g| !g.is_empty()),
                email: self.guest_email.clone(),
                name: self.guest_name.clone(),
            },
            Recipient::Companion(i) => {
                let companion = self.companion(i)?;
                RecipientIdentity {
                    guest_id: companion.guest_id.clone().filter(|g| !g.is_empty()),
                    email: companion.email.clone(),
                    name: companion.name.clone(),
                }
            }
        })
    }

    /// Merge patch flipping the demographics track. Companions are replaced as a
    /// whole collection.
    pub fn demographics_patch(
        &self,
        recipient: Recipient,
        response_id: &str,
        now: DateTime<Utc>,
    ) -> Result<serde_json::Value, LifecycleError> {
        match recipient {
            Recipient::Primary => Ok(json!({
                "used": true,
                "usedAt": now,
                "responseId": response_id,
            })),
            Recipient::Companion(i) => {
                let companions = self.with_companion(i, |c| {
                    c.demographic_submitted = true;
                    c.demographic_response_id = Some(response_id.to_string());
                    c.demographic_submitted_at = Some(now);
                })?;
                Ok(json!({ "companions": companions }))
            }
        }
    }

    pub fn menu_patch(
        &self,
        recipient: Recipient,
        response_id: &str,
        now: DateTime<Utc>,
    ) -> Result<serde_json::Value, LifecycleError> {
        match recipient {
            Recipient::Primary => Ok(json!({
                "menuSelectionSubmitted": true,
                "menuSelectionSubmittedAt": now,
                "menuResponseId": response_id,
            })),
            Recipient::Companion(i) => {
                let companions = self.with_companion(i, |c| {
                    c.menu_submitted = true;
                    c.menu_response_id = Some(response_id.to_string());
                    c.menu_submitted_at = Some(now);
                })?;
                Ok(json!({ "companions": companions }))
            }
        }
    }

    fn with_companion(
        &self,
        index: usize,
        update: impl FnOnce(&mut Companion),
    ) -> Result<Vec<Companion>, LifecycleError> {
        self.companion(index)?;
        let mut companions = self.companions.clone();
        update(&mut companions[index]);
        Ok(companions)
    }
}

/// One answered demographic question as submitted by a guest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct DemographicAnswer {
    pub question_id: String,
    pub question_text: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub is_required: Option<bool>,
    /// String, `{value, freeText}` or an array of those, depending on `type`
    pub answer: serde_json::Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DemographicResponse {
    pub event_id: String,
    pub organisation_id: Option<String>,
    pub invitation_id: String,
    pub guest_id: Option<String>,
    pub guest_email: String,
    pub guest_name: String,
    pub is_companion: bool,
    pub companion_index: Option<usize>,
    pub demographic_question_set_id: Option<String>,
    pub answers: Vec<DemographicAnswer>,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MenuSelectionResponse {
    pub event_id: String,
    pub organisation_id: Option<String>,
    pub invitation_id: String,
    pub guest_id: Option<String>,
    pub guest_email: String,
    pub guest_name: String,
    pub is_companion: bool,
    pub companion_index: Option<usize>,
    pub selected_menu_item_ids: Vec<String>,
    pub group_selections: BTreeMap<String, Option<String>>,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SendStatus {
    Sent,
    Failed,
}

/// Per-recipient outcome of a batch send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct InvitationResult {
    pub guest_email: String,
    pub guest_id: Option<String>,
    pub invitation_id: Option<String>,
    pub invitation_code: Option<String>,
    pub status: SendStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<i64>,
}
