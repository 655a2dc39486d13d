use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::events::EventRecord;

/// Upper bound on ids per batched "id in" lookup against the document store.
pub const MAX_IDS_PER_LOOKUP: usize = 10;

/// Fixed menu category enumeration. Anything unrecognised folds to `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub enum CategoryKey {
    Appetizers,
    Salads,
    Soups,
    Entrees,
    Pasta,
    Sides,
    Breads,
    Desserts,
    Beverages,
    Buffet,
    FoodStations,
    LateNightSnacks,
    KidsMenu,
    CulturalRegional,
    DietSpecific,
    Brunch,
    Bbq,
    Other,
}

impl CategoryKey {
    pub const ALL: [CategoryKey; 18] = [
        CategoryKey::Appetizers,
        CategoryKey::Salads,
        CategoryKey::Soups,
        CategoryKey::Entrees,
        CategoryKey::Pasta,
        CategoryKey::Sides,
        CategoryKey::Breads,
        CategoryKey::Desserts,
        CategoryKey::Beverages,
        CategoryKey::Buffet,
        CategoryKey::FoodStations,
        CategoryKey::LateNightSnacks,
        CategoryKey::KidsMenu,
        CategoryKey::CulturalRegional,
        CategoryKey::DietSpecific,
        CategoryKey::Brunch,
        CategoryKey::Bbq,
        CategoryKey::Other,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CategoryKey::Appetizers => "appetizers",
            CategoryKey::Salads => "salads",
            CategoryKey::Soups => "soups",
            CategoryKey::Entrees => "entrees",
            CategoryKey::Pasta => "pasta",
            CategoryKey::Sides => "sides",
            CategoryKey::Breads => "breads",
            CategoryKey::Desserts => "desserts",
            CategoryKey::Beverages => "beverages",
            CategoryKey::Buffet => "buffet",
            CategoryKey::FoodStations => "foodStations",
            CategoryKey::LateNightSnacks => "lateNightSnacks",
            CategoryKey::KidsMenu => "kidsMenu",
            CategoryKey::CulturalRegional => "culturalRegional",
            CategoryKey::DietSpecific => "dietSpecific",
            CategoryKey::Brunch => "brunch",
            CategoryKey::Bbq => "bbq",
            CategoryKey::Other => "other",
        }
    }

    /// Fold a raw category string onto the enumeration.
    ///
    /// Case, whitespace, `_` and `-` are ignored, and a handful of singular
    /// and drink aliases are accepted.
    pub fn normalize(raw: &str) -> CategoryKey {
        let compact: String = raw
            .trim()
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '_' && *c != '-')
            .flat_map(char::to_lowercase)
            .collect();
        if compact.is_empty() {
            return CategoryKey::Other;
        }

        if let Some(key) = CategoryKey::ALL
            .iter()
            .find(|key| key.as_str().to_lowercase() == compact)
        {
            return *key;
        }

        match compact.as_str() {
            "appetizer" => CategoryKey::Appetizers,
            "salad" => CategoryKey::Salads,
            "soup" => CategoryKey::Soups,
            "entree" => CategoryKey::Entrees,
            "side" => CategoryKey::Sides,
            "bread" => CategoryKey::Breads,
            "dessert" => CategoryKey::Desserts,
            "drink" | "drinks" | "beverage" => CategoryKey::Beverages,
            _ => CategoryKey::Other,
        }
    }

    /// Human-readable label. Multi-word keys are special-cased, the rest are
    /// split on camelCase humps and title-cased.
    pub fn label(self) -> String {
        match self {
            CategoryKey::FoodStations => "Food Stations".to_string(),
            CategoryKey::LateNightSnacks => "Late-Night Snacks".to_string(),
            CategoryKey::KidsMenu => "Kids Menu".to_string(),
            CategoryKey::CulturalRegional => "Cultural / Regional".to_string(),
            CategoryKey::DietSpecific => "Diet-Specific".to_string(),
            CategoryKey::Bbq => "BBQ".to_string(),
            other => title_case_camel(other.as_str()),
        }
    }
}

fn title_case_camel(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    for (i, c) in key.chars().enumerate() {
        if i == 0 {
            out.extend(c.to_uppercase());
        } else if c.is_uppercase() {
            out.push(' ');
            out.push(c);
        } else {
            out.push(c);
        }
    }
    out
}

/// Vegetarian flag: an explicit boolean wins, otherwise inferred from the
/// free-text food type. `None` means unknown.
pub fn derive_is_veg(explicit: Option<&serde_json::Value>, food_type: Option<&str>) -> Option<bool> {
    if let Some(serde_json::Value::Bool(b)) = explicit {
        return Some(*b);
    }
    let ft = food_type.unwrap_or_default().trim().to_lowercase();
    if ft.is_empty() {
        return None;
    }
    if ft.contains("non") {
        return Some(false);
    }
    if ft.contains("veg") {
        return Some(true);
    }
    None
}

/// A `menu_items` document as stored. Loosely typed on purpose: the catalog is
/// edited by several clients.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MenuItemRecord {
    pub name: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub price: Option<serde_json::Value>,
    pub image_url: Option<String>,
    pub category: Option<String>,
    pub is_veg: Option<serde_json::Value>,
    pub food_type: Option<String>,
    pub is_disabled: Option<bool>,
}

/// A menu item as presented to guests and used for validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MenuItem {
    pub id: String,
    pub name: String,
    pub description: String,
    pub price: Option<serde_json::Value>,
    pub image_url: Option<String>,
    pub category_key: CategoryKey,
    pub category_label: String,
    /// Tri-state: `None` when unknown
    pub is_veg: Option<bool>,
    pub food_type: Option<String>,
}

impl MenuItem {
    /// Build the presented item. Disabled items yield `None`.
    pub fn from_record(id: &str, record: &MenuItemRecord) -> Option<MenuItem> {
        if record.is_disabled == Some(true) {
            return None;
        }
        let category_key = CategoryKey::normalize(record.category.as_deref().unwrap_or_default());
        let name = [record.name.as_deref(), record.title.as_deref()]
            .into_iter()
            .flatten()
            .find(|n| !n.is_empty())
            .unwrap_or("Menu item")
            .to_string();
        Some(MenuItem {
            id: id.to_string(),
            name,
            description: record.description.clone().unwrap_or_default(),
            price: record.price.clone(),
            image_url: record.image_url.clone(),
            category_key,
            category_label: category_key.label(),
            is_veg: derive_is_veg(record.is_veg.as_ref(), record.food_type.as_deref()),
            food_type: record.food_type.clone(),
        })
    }
}

/// Group definition as stored on the event, before sanitization.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct RawMenuItemGroup {
    pub group_id: Option<String>,
    pub name: Option<String>,
    pub category_key: Option<String>,
    pub max_pick: Option<serde_json::Value>,
    pub item_ids: Vec<String>,
}

/// A validated exclusive-choice group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MenuItemGroup {
    pub group_id: String,
    pub name: String,
    pub category_key: CategoryKey,
    pub category_label: String,
    /// Always >= 1
    pub max_pick: u32,
    pub item_ids: Vec<String>,
}

/// Coerce a loosely-typed maxPick into an integer >= 1 (default 1).
pub fn coerce_max_pick(raw: Option<&serde_json::Value>) -> u32 {
    let parsed = match raw {
        Some(serde_json::Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64)),
        Some(serde_json::Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|f| f.is_finite())
            .map(|f| f.trunc() as i64),
        _ => None,
    };
    parsed
        .map(|n| n.clamp(1, u32::MAX as i64) as u32)
        .unwrap_or(1)
}

/// Trim, drop empties, dedupe; first occurrence wins.
pub fn normalize_ids<I, S>(ids: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for id in ids {
        let id = id.as_ref().trim();
        if id.is_empty() {
            continue;
        }
        if seen.insert(id.to_string()) {
            out.push(id.to_string());
        }
    }
    out
}

/// Every item id referenced by any raw group, in first-seen order.
pub fn collect_group_item_ids(groups: &[RawMenuItemGroup]) -> Vec<String> {
    normalize_ids(groups.iter().flat_map(|g| g.item_ids.iter()))
}

/// Ungrouped selections followed by group references, deduplicated.
pub fn candidate_item_ids(event: &EventRecord) -> Vec<String> {
    let ungrouped = normalize_ids(&event.selected_menu_item_ids);
    let grouped = collect_group_item_ids(&event.menu_item_groups);
    normalize_ids(ungrouped.iter().chain(grouped.iter()))
}

#[derive(Debug, Clone, Default)]
pub struct SanitizedGroups {
    pub groups: Vec<MenuItemGroup>,
    pub grouped_ids: HashSet<String>,
}

/// Sanitize raw groups against the allowed set.
///
/// Groups need a non-empty id and name. Item ids must be allowed, present in
/// `items` when given, and unclaimed by an earlier group. Groups left empty
/// are dropped.
pub fn sanitize_groups(
    raw_groups: &[RawMenuItemGroup],
    allowed: &HashSet<String>,
    items: Option<&HashMap<String, MenuItem>>,
) -> SanitizedGroups {
    let mut out = SanitizedGroups::default();

    for raw in raw_groups {
        let group_id = raw.group_id.as_deref().unwrap_or_default().trim();
        let name = raw.name.as_deref().unwrap_or_default().trim();
        if group_id.is_empty() || name.is_empty() {
            continue;
        }

        let mut seen = HashSet::new();
        let item_ids: Vec<String> = raw
            .item_ids
            .iter()
            .map(|id| id.trim())
            .filter(|id| !id.is_empty())
            .filter(|id| allowed.contains(*id))
            .filter(|id| items.is_none_or(|map| map.contains_key(*id)))
            .filter(|id| !out.grouped_ids.contains(*id))
            .filter(|id| seen.insert(id.to_string()))
            .map(str::to_string)
            .collect();

        if item_ids.is_empty() {
            continue;
        }
        out.grouped_ids.extend(item_ids.iter().cloned());

        let category_key = CategoryKey::normalize(raw.category_key.as_deref().unwrap_or_default());
        out.groups.push(MenuItemGroup {
            group_id: group_id.to_string(),
            name: name.to_string(),
            category_key,
            category_label: category_key.label(),
            max_pick: coerce_max_pick(raw.max_pick.as_ref()),
            item_ids,
        });
    }

    out
}

/// The resolved, sanitized menu for one event.
#[derive(Debug, Clone, Default)]
pub struct MenuCatalog {
    /// Allowed ids in first-occurrence order
    pub allowed_ids: Vec<String>,
    pub groups: Vec<MenuItemGroup>,
    /// Allowed ids not claimed by any surviving group
    pub ungrouped_ids: Vec<String>,
    pub items_by_id: HashMap<String, MenuItem>,
}

impl MenuCatalog {
    /// Resolve the catalog from the event definition and the fetched items.
    /// `items_by_id` must already exclude missing and disabled items.
    pub fn resolve(event: &EventRecord, items_by_id: HashMap<String, MenuItem>) -> MenuCatalog {
        let allowed_ids: Vec<String> = candidate_item_ids(event)
            .into_iter()
            .filter(|id| items_by_id.contains_key(id))
            .collect();
        let allowed_set: HashSet<String> = allowed_ids.iter().cloned().collect();
        let sanitized = sanitize_groups(&event.menu_item_groups, &allowed_set, Some(&items_by_id));
        let ungrouped_ids = allowed_ids
            .iter()
            .filter(|id| !sanitized.grouped_ids.contains(*id))
            .cloned()
            .collect();

        MenuCatalog {
            allowed_ids,
            groups: sanitized.groups,
            ungrouped_ids,
            items_by_id,
        }
    }

    pub fn allowed_set(&self) -> HashSet<String> {
        self.allowed_ids.iter().cloned().collect()
    }

    pub fn validate(&self, selected: &[String]) -> Result<MenuSelection, SelectionError> {
        validate_selection(selected, &self.allowed_set(), &self.groups)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SelectionError {
    #[error("Invalid menu item selected")]
    UnknownItem { item_id: String },
    #[error("You can select only {max_pick} item(s) from \"{group_name}\".")]
    GroupLimitExceeded {
        group_id: String,
        group_name: String,
        max_pick: u32,
    },
}

/// Accepted selection: normalized ids plus the first pick of every group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuSelection {
    pub selected_ids: Vec<String>,
    pub group_selections: BTreeMap<String, Option<String>>,
}

/// Check a selection against the allowed set and per-group pick limits.
/// Ungrouped items are individually unconstrained.
pub fn validate_selection(
    selected: &[String],
    allowed: &HashSet<String>,
    groups: &[MenuItemGroup],
) -> Result<MenuSelection, SelectionError> {
    let selected_ids = normalize_ids(selected);
    if let Some(unknown) = selected_ids.iter().find(|id| !allowed.contains(*id)) {
        return Err(SelectionError::UnknownItem {
            item_id: unknown.clone(),
        });
    }
    let chosen: HashSet<&str> = selected_ids.iter().map(String::as_str).collect();

    let mut group_selections = BTreeMap::new();
    for group in groups {
        let mut count = 0u32;
        let mut picked = None;
        for id in &group.item_ids {
            if !chosen.contains(id.as_str()) {
                continue;
            }
            count += 1;
            if picked.is_none() {
                picked = Some(id.clone());
            }
            if count > group.max_pick {
                return Err(SelectionError::GroupLimitExceeded {
                    group_id: group.group_id.clone(),
                    group_name: group.name.clone(),
                    max_pick: group.max_pick,
                });
            }
        }
        group_selections.insert(group.group_id.clone(), picked);
    }

    Ok(MenuSelection {
        selected_ids,
        group_selections,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw_group(id: &str, name: &str, max_pick: serde_json::Value, items: &[&str]) -> RawMenuItemGroup {
        RawMenuItemGroup {
            group_id: Some(id.to_string()),
            name: Some(name.to_string()),
            category_key: None,
            max_pick: Some(max_pick),
            item_ids: items.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn item(id: &str) -> MenuItem {
        MenuItem::from_record(
            id,
            &MenuItemRecord {
                name: Some(format!("Item {id}")),
                ..Default::default()
            },
        )
        .unwrap()
    }

    fn sample_event() -> EventRecord {
        EventRecord {
            selected_menu_item_ids: vec!["F".to_string()],
            menu_item_groups: vec![
                raw_group("entree", "Entrée", json!(1), &["A", "B"]),
                raw_group("dessert", "Dessert", json!(1), &["C", "D"]),
            ],
            ..Default::default()
        }
    }

    fn sample_catalog() -> MenuCatalog {
        let items = ["A", "B", "C", "D", "F"]
            .iter()
            .map(|id| (id.to_string(), item(id)))
            .collect();
        MenuCatalog::resolve(&sample_event(), items)
    }

    #[test]
    fn normalizes_category_spellings() {
        assert_eq!(CategoryKey::normalize("Food Stations"), CategoryKey::FoodStations);
        assert_eq!(CategoryKey::normalize("late_night-snacks"), CategoryKey::LateNightSnacks);
        assert_eq!(CategoryKey::normalize("KIDSMENU"), CategoryKey::KidsMenu);
        assert_eq!(CategoryKey::normalize("Dessert"), CategoryKey::Desserts);
        assert_eq!(CategoryKey::normalize("drinks"), CategoryKey::Beverages);
        assert_eq!(CategoryKey::normalize("Pasta"), CategoryKey::Pasta);
        assert_eq!(CategoryKey::normalize("bbq"), CategoryKey::Bbq);
        assert_eq!(CategoryKey::normalize("tapas"), CategoryKey::Other);
        assert_eq!(CategoryKey::normalize("   "), CategoryKey::Other);
    }

    #[test]
    fn labels_are_derived_from_keys() {
        assert_eq!(CategoryKey::Appetizers.label(), "Appetizers");
        assert_eq!(CategoryKey::LateNightSnacks.label(), "Late-Night Snacks");
        assert_eq!(CategoryKey::CulturalRegional.label(), "Cultural / Regional");
        assert_eq!(CategoryKey::Bbq.label(), "BBQ");
        assert_eq!(title_case_camel("someNewKey"), "Some New Key");
    }

    #[test]
    fn category_key_serializes_as_camel_case() {
        assert_eq!(serde_json::to_value(CategoryKey::FoodStations).unwrap(), json!("foodStations"));
    }

    #[test]
    fn vegetarian_flag_derivation() {
        assert_eq!(derive_is_veg(Some(&json!(false)), Some("veg")), Some(false));
        assert_eq!(derive_is_veg(None, Some("Vegetarian")), Some(true));
        assert_eq!(derive_is_veg(None, Some("non-veg")), Some(false));
        assert_eq!(derive_is_veg(None, Some("Non Vegetarian")), Some(false));
        assert_eq!(derive_is_veg(None, Some("seafood")), None);
        assert_eq!(derive_is_veg(Some(&json!("yes")), None), None);
    }

    #[test]
    fn disabled_items_are_not_presented() {
        let record = MenuItemRecord {
            title: Some("Soup".to_string()),
            is_disabled: Some(true),
            ..Default::default()
        };
        assert!(MenuItem::from_record("s", &record).is_none());

        let record = MenuItemRecord {
            title: Some("Soup".to_string()),
            category: Some("soup".to_string()),
            ..Default::default()
        };
        let item = MenuItem::from_record("s", &record).unwrap();
        assert_eq!(item.name, "Soup");
        assert_eq!(item.category_key, CategoryKey::Soups);
        assert_eq!(item.category_label, "Soups");
    }

    #[test]
    fn max_pick_is_coerced_to_at_least_one() {
        assert_eq!(coerce_max_pick(None), 1);
        assert_eq!(coerce_max_pick(Some(&json!(0))), 1);
        assert_eq!(coerce_max_pick(Some(&json!(-3))), 1);
        assert_eq!(coerce_max_pick(Some(&json!(2.9))), 2);
        assert_eq!(coerce_max_pick(Some(&json!("3"))), 3);
        assert_eq!(coerce_max_pick(Some(&json!("many"))), 1);
    }

    #[test]
    fn normalize_ids_trims_and_dedupes_in_order() {
        assert_eq!(
            normalize_ids([" b", "a", "", "b", "c "]),
            vec!["b".to_string(), "a".to_string(), "c".to_string()]
        );
    }

    #[test]
    fn item_claimed_by_two_groups_stays_with_the_first() {
        let groups = vec![
            raw_group("g1", "Mains", json!(1), &["A", "B"]),
            raw_group("g2", "Specials", json!(2), &["B", "C"]),
        ];
        let allowed: HashSet<String> = ["A", "B", "C"].iter().map(|s| s.to_string()).collect();
        let sanitized = sanitize_groups(&groups, &allowed, None);

        assert_eq!(sanitized.groups.len(), 2);
        assert_eq!(sanitized.groups[0].item_ids, vec!["A", "B"]);
        assert_eq!(sanitized.groups[1].item_ids, vec!["C"]);
    }

    #[test]
    fn invalid_or_emptied_groups_are_dropped() {
        let mut nameless = raw_group("g0", "", json!(1), &["A"]);
        nameless.name = None;
        let groups = vec![
            nameless,
            raw_group("g1", "Mains", json!(1), &["A"]),
            raw_group("g2", "Ghosts", json!(1), &["A", "Z"]),
        ];
        let allowed: HashSet<String> = ["A"].iter().map(|s| s.to_string()).collect();
        let sanitized = sanitize_groups(&groups, &allowed, None);

        assert_eq!(sanitized.groups.len(), 1);
        assert_eq!(sanitized.groups[0].group_id, "g1");
        assert!(sanitized.grouped_ids.contains("A"));
    }

    #[test]
    fn catalog_drops_missing_items_and_lists_ungrouped() {
        let mut items: HashMap<String, MenuItem> = ["A", "B", "C", "F"]
            .iter()
            .map(|id| (id.to_string(), item(id)))
            .collect();
        items.remove("B");
        let catalog = MenuCatalog::resolve(&sample_event(), items);

        assert_eq!(catalog.allowed_ids, vec!["F", "A", "C"]);
        assert_eq!(catalog.groups[0].item_ids, vec!["A"]);
        assert_eq!(catalog.groups[1].item_ids, vec!["C"]);
        assert_eq!(catalog.ungrouped_ids, vec!["F"]);
    }

    #[test]
    fn valid_selection_reports_group_representatives() {
        let catalog = sample_catalog();
        let selection = catalog
            .validate(&["A".to_string(), "C".to_string(), "F".to_string()])
            .unwrap();

        assert_eq!(selection.selected_ids, vec!["A", "C", "F"]);
        assert_eq!(selection.group_selections["entree"].as_deref(), Some("A"));
        assert_eq!(selection.group_selections["dessert"].as_deref(), Some("C"));
    }

    #[test]
    fn group_without_pick_is_recorded_as_none() {
        let catalog = sample_catalog();
        let selection = catalog.validate(&["F".to_string()]).unwrap();
        assert_eq!(selection.group_selections["entree"], None);
    }

    #[test]
    fn exceeding_group_limit_names_the_group() {
        let catalog = sample_catalog();
        let err = catalog
            .validate(&["A".to_string(), "B".to_string()])
            .unwrap_err();

        assert_eq!(
            err,
            SelectionError::GroupLimitExceeded {
                group_id: "entree".to_string(),
                group_name: "Entrée".to_string(),
                max_pick: 1,
            }
        );
        let message = err.to_string();
        assert!(message.contains("Entrée"));
        assert!(message.contains('1'));
    }

    #[test]
    fn unknown_item_is_rejected() {
        let catalog = sample_catalog();
        let err = catalog.validate(&["A".to_string(), "X".to_string()]).unwrap_err();
        assert_eq!(err, SelectionError::UnknownItem { item_id: "X".to_string() });
    }

    #[test]
    fn duplicate_ids_count_once() {
        let catalog = sample_catalog();
        let selection = catalog.validate(&["A".to_string(), "A".to_string()]).unwrap();
        assert_eq!(selection.selected_ids, vec!["A"]);
    }
}
