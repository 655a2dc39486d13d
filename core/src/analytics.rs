use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use serde_json::Value;
use utoipa::ToSchema;

use crate::invitations::{DemographicResponse, Invitation, MenuSelectionResponse};

pub const FREE_TEXT_SAMPLES_LIMIT: usize = 10;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct InvitationFunnel {
    pub total: u64,
    pub sent: u64,
    /// Not sent and carrying a send error
    pub failed: u64,
    pub demographics_submitted: u64,
    pub menu_submitted: u64,
}

pub fn funnel<'a>(invitations: impl IntoIterator<Item = &'a Invitation>) -> InvitationFunnel {
    invitations
        .into_iter()
        .fold(InvitationFunnel::default(), |mut acc, inv| {
            acc.total += 1;
            if inv.sent {
                acc.sent += 1;
            }
            if !inv.sent && inv.send_error.as_deref().is_some_and(|e| !e.is_empty()) {
                acc.failed += 1;
            }
            if inv.used {
                acc.demographics_submitted += 1;
            }
            if inv.menu_selection_submitted {
                acc.menu_submitted += 1;
            }
            acc
        })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct QuestionStats {
    pub question_id: String,
    pub question_text: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub is_required: bool,
    pub answered_count: u64,
    pub option_counts: BTreeMap<String, u64>,
    /// "Other, please specify" sub-answers on choice questions
    pub free_text_count: u64,
    pub free_text_samples: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DemographicsSummary {
    pub responses: u64,
    pub questions: Vec<QuestionStats>,
}

/// A choice answer: the picked option and an optional free-text addendum.
#[derive(Debug, PartialEq, Eq)]
struct Choice {
    value: String,
    free_text: Option<String>,
}

fn text_of(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.trim().to_string(),
        other => other.to_string().trim().to_string(),
    }
}

fn choice_of(raw: &Value) -> Option<Choice> {
    let (value, free_text) = match raw {
        Value::Null => return None,
        Value::Object(map) => (
            map.get("value").map(text_of).unwrap_or_default(),
            map.get("freeText").map(text_of).unwrap_or_default(),
        ),
        other => (text_of(other), String::new()),
    };
    (!value.is_empty()).then(|| Choice {
        value,
        free_text: (!free_text.is_empty()).then_some(free_text),
    })
}

fn choices_of(raw: &Value) -> Vec<Choice> {
    match raw {
        Value::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                Value::Object(_) => choice_of(item),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

pub fn demographics<'a>(
    responses: impl IntoIterator<Item = &'a DemographicResponse>,
) -> DemographicsSummary {
    let mut summary = DemographicsSummary::default();
    let mut order: Vec<String> = Vec::new();
    let mut by_id: HashMap<String, QuestionStats> = HashMap::new();

    for response in responses {
        summary.responses += 1;
        for answer in &response.answers {
            let question_id = answer.question_id.trim();
            if question_id.is_empty() {
                continue;
            }
            let stats = by_id.entry(question_id.to_string()).or_insert_with(|| {
                order.push(question_id.to_string());
                QuestionStats {
                    question_id: question_id.to_string(),
                    question_text: answer.question_text.as_deref().unwrap_or_default().trim().to_string(),
                    kind: answer
                        .kind
                        .as_deref()
                        .map(str::trim)
                        .filter(|k| !k.is_empty())
                        .unwrap_or("unknown")
                        .to_string(),
                    is_required: answer.is_required == Some(true),
                    answered_count: 0,
                    option_counts: BTreeMap::new(),
                    free_text_count: 0,
                    free_text_samples: Vec::new(),
                }
            });

            match stats.kind.as_str() {
                "short_answer" | "paragraph" => {
                    let text = text_of(&answer.answer);
                    if !text.is_empty() {
                        stats.answered_count += 1;
                        if stats.free_text_samples.len() < FREE_TEXT_SAMPLES_LIMIT {
                            stats.free_text_samples.push(text);
                        }
                    }
                }
                "checkboxes" => {
                    let picks = choices_of(&answer.answer);
                    if !picks.is_empty() {
                        stats.answered_count += 1;
                    }
                    for pick in picks {
                        *stats.option_counts.entry(pick.value).or_default() += 1;
                        if pick.free_text.is_some() {
                            stats.free_text_count += 1;
                        }
                    }
                }
                _ => {
                    if let Some(pick) = choice_of(&answer.answer) {
                        stats.answered_count += 1;
                        *stats.option_counts.entry(pick.value).or_default() += 1;
                        if pick.free_text.is_some() {
                            stats.free_text_count += 1;
                        }
                    }
                }
            }
        }
    }

    summary.questions = order
        .into_iter()
        .filter_map(|id| by_id.remove(&id))
        .collect();
    summary
}

/// Selection counts per item id, in first-seen order.
pub fn menu_item_counts<'a>(
    responses: impl IntoIterator<Item = &'a MenuSelectionResponse>,
) -> (u64, Vec<(String, u64)>) {
    let mut total = 0;
    let mut counts: Vec<(String, u64)> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for response in responses {
        total += 1;
        for id in &response.selected_menu_item_ids {
            let id = id.trim();
            if id.is_empty() {
                continue;
            }
            match index.get(id) {
                Some(&i) => counts[i].1 += 1,
                None => {
                    index.insert(id.to_string(), counts.len());
                    counts.push((id.to_string(), 1));
                }
            }
        }
    }
    (total, counts)
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MenuItemPopularity {
    pub id: String,
    pub name: Option<String>,
    pub category: Option<String>,
    pub is_veg: Option<bool>,
    pub count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, ToSchema)]
pub struct MenuSummary {
    pub responses: u64,
    pub items: Vec<MenuItemPopularity>,
}

/// Current item metadata joined onto the counts.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemMeta {
    pub name: String,
    pub category: String,
    pub is_veg: Option<bool>,
}

/// Join counts with item metadata and sort by count, most popular first. Ties
/// keep first-seen order.
pub fn menu_popularity(
    responses: u64,
    counts: Vec<(String, u64)>,
    meta: &HashMap<String, ItemMeta>,
) -> MenuSummary {
    let mut items: Vec<MenuItemPopularity> = counts
        .into_iter()
        .map(|(id, count)| {
            let found = meta.get(&id);
            MenuItemPopularity {
                name: found.map(|m| m.name.clone()),
                category: found.map(|m| m.category.clone()),
                is_veg: found.and_then(|m| m.is_veg),
                id,
                count,
            }
        })
        .collect();
    items.sort_by(|a, b| b.count.cmp(&a.count));
    MenuSummary { responses, items }
}
