use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::menu::RawMenuItemGroup;

/// An `events` document. Only the fields the invitation flows read are typed;
/// the event editor owns the rest.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EventRecord {
    /// Public event id. May differ from the document id for older events.
    pub event_id: Option<String>,
    pub name: Option<String>,
    pub organisation_id: Option<String>,
    pub address: Option<String>,
    pub start_date_time: Option<DateTime<Utc>>,
    pub end_date_time: Option<DateTime<Utc>>,
    pub cover_image_url: Option<String>,
    /// Individually selectable (ungrouped) menu item ids
    pub selected_menu_item_ids: Vec<String>,
    pub menu_item_groups: Vec<RawMenuItemGroup>,
}

impl EventRecord {
    pub fn display_name(&self) -> String {
        self.name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or("Event")
            .to_string()
    }

    /// The id invitations and responses are keyed by: the public id when set,
    /// otherwise the id the caller resolved the event with.
    pub fn public_id(&self, requested: &str) -> String {
        self.event_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .unwrap_or(requested)
            .to_string()
    }

    pub fn organisation(&self) -> Option<&str> {
        self.organisation_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }
}
