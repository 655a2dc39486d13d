use std::collections::HashMap;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use trax_core::analytics::{self, DemographicsSummary, InvitationFunnel, ItemMeta, MenuSummary};
use trax_core::invitations::{DemographicResponse, Invitation, MenuSelectionResponse};

use crate::auth::{Caller, load_profile};
use crate::catalog::require_event;
use crate::error::AppError;
use crate::extract::AppJson;
use crate::routes::required_str;
use crate::state::AppState;
use crate::store::{DocumentReader, Filter, MAX_IDS_PER_LOOKUP, Snapshot, collections};

pub fn router() -> Router<AppState> {
    Router::new().route("/v1/getEventAnalytics", post(get_event_analytics))
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EventAnalyticsRequest {
    /// Document id or public `eventId`
    pub event_id: Option<String>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EventAnalyticsResponse {
    pub ok: bool,
    pub event_id: String,
    pub event_name: String,
    pub invitations: InvitationFunnel,
    pub demographics: DemographicsSummary,
    pub menu: MenuSummary,
}

/// Decode every snapshot, skipping (and logging) unreadable ones.
fn decode_all<T: serde::de::DeserializeOwned>(collection: &str, snapshots: &[Snapshot]) -> Vec<T> {
    snapshots
        .iter()
        .filter_map(|snapshot| match snapshot.decode() {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(collection = collection, id = %snapshot.id, error = %e, "skipping unreadable document");
                None
            }
        })
        .collect()
}

/// Current metadata of the counted items. Disabled items still report.
async fn item_meta<R>(reader: &mut R, ids: &[String]) -> Result<HashMap<String, ItemMeta>, AppError>
where
    R: DocumentReader + ?Sized,
{
    let mut meta = HashMap::new();
    for chunk in ids.chunks(MAX_IDS_PER_LOOKUP) {
        for snapshot in reader.read_many(collections::MENU_ITEMS, chunk).await? {
            let text = |key: &str| {
                snapshot
                    .data
                    .get(key)
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
            };
            let name = text("name")
                .or_else(|| text("title"))
                .unwrap_or_else(|| "Menu item".to_string());
            let category = text("category").unwrap_or_else(|| "other".to_string());
            let is_veg = snapshot.data.get("isVeg").and_then(Value::as_bool);
            meta.insert(snapshot.id.clone(), ItemMeta { name, category, is_veg });
        }
    }
    Ok(meta)
}

#[utoipa::path(
    post,
    path = "/v1/getEventAnalytics",
    request_body = EventAnalyticsRequest,
    responses(
        (status = 200, description = "Funnel, demographic and menu statistics for one event", body = EventAnalyticsResponse),
        (status = 401, description = "Not signed in", body = trax_core::error::ApiError),
        (status = 403, description = "Event belongs to another organisation", body = trax_core::error::ApiError),
        (status = 404, description = "Event not found", body = trax_core::error::ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "analytics"
)]
pub async fn get_event_analytics(
    State(state): State<AppState>,
    caller: Caller,
    AppJson(req): AppJson<EventAnalyticsRequest>,
) -> Result<Json<EventAnalyticsResponse>, AppError> {
    let requested = required_str("eventId", req.event_id.as_deref())?;

    let mut reader = state.store.as_ref();
    let found = require_event(&mut reader, &requested).await?;

    let profile = load_profile(state.store.as_ref(), &caller.uid).await?;
    let caller_org = profile.as_ref().and_then(|p| p.organisation());
    match (found.event.organisation(), caller_org) {
        (Some(event_org), Some(caller_org)) if event_org == caller_org => {}
        (event_org, caller_org) => {
            tracing::warn!(
                user_id = %caller.uid,
                event_organisation_id = ?event_org,
                caller_organisation_id = ?caller_org,
                decision = "deny",
                "analytics access denied"
            );
            return Err(AppError::denied("Not allowed"));
        }
    }

    // Invitations and responses are keyed by the public id.
    let event_id = found.public_id();
    let by_event = [Filter::eq("eventId", event_id.as_str())];

    let invitations = reader.read_query(collections::INVITATIONS, &by_event, None).await?;
    let invitations: Vec<Invitation> = decode_all(collections::INVITATIONS, &invitations);

    let demographic = reader
        .read_query(collections::DEMOGRAPHIC_RESPONSES, &by_event, None)
        .await?;
    let demographic: Vec<DemographicResponse> =
        decode_all(collections::DEMOGRAPHIC_RESPONSES, &demographic);

    let menu = reader.read_query(collections::MENU_RESPONSES, &by_event, None).await?;
    let menu: Vec<MenuSelectionResponse> = decode_all(collections::MENU_RESPONSES, &menu);
    let (menu_responses, counts) = analytics::menu_item_counts(&menu);
    let counted_ids: Vec<String> = counts.iter().map(|(id, _)| id.clone()).collect();
    let meta = item_meta(&mut reader, &counted_ids).await?;

    tracing::info!(
        user_id = %caller.uid,
        event_id = %event_id,
        invitations = invitations.len(),
        demographic_responses = demographic.len(),
        menu_responses = menu_responses,
        "event analytics computed"
    );

    Ok(Json(EventAnalyticsResponse {
        ok: true,
        event_name: found.event.display_name(),
        invitations: analytics::funnel(&invitations),
        demographics: analytics::demographics(&demographic),
        menu: analytics::menu_popularity(menu_responses, counts, &meta),
        event_id,
    }))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;

    use super::*;
    use crate::routes::testing::{post_json, sign_in};
    use crate::state::testing::{TestApp, test_app};
    use crate::store::DocumentStore;

    async fn seed(app: &TestApp) {
        let store = &app.store;
        store
            .set(
                collections::EVENTS,
                "ev-doc",
                json!({ "eventId": "ev-1", "name": "Gala", "organisationId": "org-1" }),
            )
            .await
            .unwrap();
        store
            .set(collections::MENU_ITEMS, "A", json!({ "name": "Chicken", "category": "entrees", "isVeg": false }))
            .await
            .unwrap();
        store
            .set(collections::MENU_ITEMS, "B", json!({ "title": "Salad", "isDisabled": true }))
            .await
            .unwrap();
        for (id, sent, used, menu, error) in [
            ("i1", true, true, true, None),
            ("i2", true, true, false, None),
            ("i3", false, false, false, Some("Invalid 'To' address")),
            ("i4", false, false, false, None),
        ] {
            store
                .set(
                    collections::INVITATIONS,
                    id,
                    json!({
                        "invitationId": id,
                        "eventId": "ev-1",
                        "sent": sent,
                        "used": used,
                        "menuSelectionSubmitted": menu,
                        "sendError": error,
                    }),
                )
                .await
                .unwrap();
        }
        store
            .set(
                collections::DEMOGRAPHIC_RESPONSES,
                "i1",
                json!({
                    "eventId": "ev-1",
                    "invitationId": "i1",
                    "answers": [
                        { "questionId": "diet", "questionText": "Diet", "type": "multiple_choice",
                          "answer": { "value": "Vegan" } }
                    ]
                }),
            )
            .await
            .unwrap();
        store
            .set(
                collections::DEMOGRAPHIC_RESPONSES,
                "i2",
                json!({
                    "eventId": "ev-1",
                    "invitationId": "i2",
                    "answers": [
                        { "questionId": "diet", "questionText": "Diet", "type": "multiple_choice",
                          "answer": { "value": "Other", "freeText": "Pescatarian" } }
                    ]
                }),
            )
            .await
            .unwrap();
        for (id, items) in [("i1", json!(["A", "B"])), ("i1_companion_0", json!(["A"]))] {
            store
                .set(
                    collections::MENU_RESPONSES,
                    id,
                    json!({ "eventId": "ev-1", "invitationId": "i1", "selectedMenuItemIds": items }),
                )
                .await
                .unwrap();
        }
        store
            .set(
                collections::MENU_RESPONSES,
                "other-event",
                json!({ "eventId": "ev-2", "selectedMenuItemIds": ["B"] }),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn analytics_fold_funnel_answers_and_menu_counts() {
        let app = test_app();
        seed(&app).await;
        let (_, token) = sign_in(
            &app,
            "owner@example.com",
            json!({ "role": "admin", "organisationId": "org-1" }),
        )
        .await;
        let router = router().with_state(app.state.clone());

        // Lookup by document id reports the public id.
        let (status, body) =
            post_json(router, "/v1/getEventAnalytics", Some(&token), json!({ "eventId": "ev-doc" })).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["eventId"], "ev-1");
        assert_eq!(body["eventName"], "Gala");

        let funnel = &body["invitations"];
        assert_eq!(funnel["total"], 4);
        assert_eq!(funnel["sent"], 2);
        assert_eq!(funnel["failed"], 1);
        assert_eq!(funnel["demographicsSubmitted"], 2);
        assert_eq!(funnel["menuSubmitted"], 1);

        let question = &body["demographics"]["questions"][0];
        assert_eq!(body["demographics"]["responses"], 2);
        assert_eq!(question["questionId"], "diet");
        assert_eq!(question["answeredCount"], 2);
        assert_eq!(question["optionCounts"]["Vegan"], 1);
        assert_eq!(question["freeTextCount"], 1);

        let menu = &body["menu"];
        assert_eq!(menu["responses"], 2);
        assert_eq!(menu["items"][0]["id"], "A");
        assert_eq!(menu["items"][0]["count"], 2);
        assert_eq!(menu["items"][0]["name"], "Chicken");
        assert_eq!(menu["items"][1]["name"], "Salad");
        assert_eq!(menu["items"][1]["category"], "other");
    }

    #[tokio::test]
    async fn analytics_require_the_events_organisation() {
        let app = test_app();
        seed(&app).await;
        let (_, host_token) = sign_in(
            &app,
            "host@example.com",
            json!({ "role": "host", "managedByOrgIds": ["org-1"] }),
        )
        .await;
        let (_, other_token) = sign_in(
            &app,
            "other@example.com",
            json!({ "role": "admin", "organisationId": "org-2" }),
        )
        .await;
        let router = router().with_state(app.state.clone());

        for token in [&host_token, &other_token] {
            let (status, body) = post_json(
                router.clone(),
                "/v1/getEventAnalytics",
                Some(token),
                json!({ "eventId": "ev-1" }),
            )
            .await;
            assert_eq!(status, StatusCode::FORBIDDEN);
            assert_eq!(body["error"], "permission-denied");
        }

        let (status, _) =
            post_json(router.clone(), "/v1/getEventAnalytics", None, json!({ "eventId": "ev-1" })).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) =
            post_json(router, "/v1/getEventAnalytics", Some(&other_token), json!({ "eventId": "nope" })).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
