//! Store-backed event and menu catalog lookups.

use std::collections::HashMap;

use trax_core::events::EventRecord;
use trax_core::menu::{MenuCatalog, MenuItem, MenuItemRecord, candidate_item_ids};

use crate::error::AppError;
use crate::store::{DocumentReader, Filter, MAX_IDS_PER_LOOKUP, collections, decode};

/// An event together with the document id it was found under.
#[derive(Debug, Clone)]
pub struct FoundEvent {
    pub doc_id: String,
    pub event: EventRecord,
}

impl FoundEvent {
    /// Id invitations and responses are keyed by.
    pub fn public_id(&self) -> String {
        self.event.public_id(&self.doc_id)
    }
}

/// Look an event up by document id, then by its `eventId` field.
pub async fn find_event<R>(reader: &mut R, event_id: &str) -> Result<Option<FoundEvent>, AppError>
where
    R: DocumentReader + ?Sized,
{
    if let Some(doc) = reader.read(collections::EVENTS, event_id).await? {
        return Ok(Some(FoundEvent {
            doc_id: event_id.to_string(),
            event: decode(doc)?,
        }));
    }
    let found = reader
        .read_query(collections::EVENTS, &[Filter::eq("eventId", event_id)], Some(1))
        .await?;
    match found.into_iter().next() {
        Some(snapshot) => Ok(Some(FoundEvent {
            event: snapshot.decode()?,
            doc_id: snapshot.id,
        })),
        None => Ok(None),
    }
}

pub async fn require_event<R>(reader: &mut R, event_id: &str) -> Result<FoundEvent, AppError>
where
    R: DocumentReader + ?Sized,
{
    find_event(reader, event_id)
        .await?
        .ok_or_else(|| AppError::not_found("Event not found"))
}

/// Fetch menu items in batches of `MAX_IDS_PER_LOOKUP`. Missing and disabled
/// items are left out.
pub async fn fetch_menu_items<R>(reader: &mut R, ids: &[String]) -> Result<HashMap<String, MenuItem>, AppError>
where
    R: DocumentReader + ?Sized,
{
    let mut items = HashMap::new();
    for chunk in ids.chunks(MAX_IDS_PER_LOOKUP) {
        for snapshot in reader.read_many(collections::MENU_ITEMS, chunk).await? {
            let record: MenuItemRecord = match snapshot.decode() {
                Ok(record) => record,
                Err(e) => {
                    tracing::warn!(menu_item_id = %snapshot.id, error = %e, "skipping unreadable menu item");
                    continue;
                }
            };
            if let Some(item) = MenuItem::from_record(&snapshot.id, &record) {
                items.insert(snapshot.id.clone(), item);
            }
        }
    }
    Ok(items)
}

/// Resolve the selectable menu of an event.
pub async fn resolve_catalog<R>(reader: &mut R, event: &EventRecord) -> Result<MenuCatalog, AppError>
where
    R: DocumentReader + ?Sized,
{
    let candidates = candidate_item_ids(event);
    let items = fetch_menu_items(reader, &candidates).await?;
    Ok(MenuCatalog::resolve(event, items))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::store::{DocumentStore, MemoryStore};

    async fn seed_menu(store: &MemoryStore, count: usize) -> Vec<String> {
        let mut ids = Vec::new();
        for i in 0..count {
            let id = format!("item-{i:02}");
            store
                .set(
                    collections::MENU_ITEMS,
                    &id,
                    json!({ "name": format!("Dish {i}"), "category": "Entrees", "isDisabled": i == 3 }),
                )
                .await
                .unwrap();
            ids.push(id);
        }
        ids
    }

    #[tokio::test]
    async fn events_resolve_by_doc_id_or_event_id_field() {
        let store = MemoryStore::new();
        store
            .set(collections::EVENTS, "doc-1", json!({ "eventId": "pub-1", "name": "Gala" }))
            .await
            .unwrap();
        let handle: Arc<dyn DocumentStore> = Arc::new(store);
        let mut reader = handle.as_ref();

        let by_doc = find_event(&mut reader, "doc-1").await.unwrap().unwrap();
        assert_eq!(by_doc.public_id(), "pub-1");
        let by_field = find_event(&mut reader, "pub-1").await.unwrap().unwrap();
        assert_eq!(by_field.doc_id, "doc-1");
        assert!(find_event(&mut reader, "nope").await.unwrap().is_none());
        assert_eq!(require_event(&mut reader, "nope").await.unwrap_err().code(), "not-found");
    }

    #[tokio::test]
    async fn menu_items_are_fetched_in_chunks_without_disabled() {
        let store = MemoryStore::new();
        let mut ids = seed_menu(&store, 23).await;
        ids.push("ghost".to_string());
        let handle: Arc<dyn DocumentStore> = Arc::new(store);
        let mut reader = handle.as_ref();

        let items = fetch_menu_items(&mut reader, &ids).await.unwrap();
        assert_eq!(items.len(), 22);
        assert!(!items.contains_key("item-03"));
        assert!(!items.contains_key("ghost"));
    }

    #[tokio::test]
    async fn catalog_resolves_inside_a_transaction() {
        let store = MemoryStore::new();
        seed_menu(&store, 4).await;
        let event: EventRecord = serde_json::from_value(json!({
            "selectedMenuItemIds": ["item-00", "item-03"],
            "menuItemGroups": [
                { "groupId": "g1", "name": "Mains", "maxPick": 1, "itemIds": ["item-01", "item-02"] }
            ]
        }))
        .unwrap();

        let mut tx = store.begin().await.unwrap();
        let mut reader = tx.as_mut();
        let catalog = resolve_catalog(&mut reader, &event).await.unwrap();
        assert_eq!(catalog.ungrouped_ids, vec!["item-00".to_string()]);
        assert_eq!(catalog.groups.len(), 1);
        assert_eq!(catalog.groups[0].item_ids, vec!["item-01", "item-02"]);
    }
}
