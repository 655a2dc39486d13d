//! Transactional document storage.
//!
//! Documents are JSON objects addressed by `(collection, id)`. Every stored
//! document carries a version; transactions record the version of everything
//! they read (absent documents included) and commit only if none of those
//! versions moved.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::AppError;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgDocumentStore;

/// Largest id list accepted by `get_many`.
pub const MAX_IDS_PER_LOOKUP: usize = trax_core::menu::MAX_IDS_PER_LOOKUP;

pub mod collections {
    pub const EVENTS: &str = "events";
    pub const MENU_ITEMS: &str = "menu_items";
    pub const INVITATIONS: &str = "invitations";
    pub const INVITATION_POINTERS: &str = "invitationPointers";
    pub const DEMOGRAPHIC_RESPONSES: &str = "demographicQuestionsResponses";
    pub const MENU_RESPONSES: &str = "menuSelectedItemsResponses";
    pub const INVITATION_LOGS: &str = "invitationLogs";
    pub const USERS: &str = "users";
    pub const ROLES: &str = "roles";
    pub const ORGANISATIONS: &str = "organisations";
    pub const ORGANISATION_HOSTS: &str = "organisationHosts";
    pub const ACCOUNTS: &str = "accounts";
    pub const ACCOUNT_EMAILS: &str = "accountEmails";
    pub const ACCOUNT_TOKENS: &str = "accountTokens";
    pub const PASSWORD_RESETS: &str = "passwordResets";
    pub const GUESTS: &str = "guests";
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A document read inside the transaction changed before commit
    #[error("transaction conflict")]
    Conflict,
    #[error("storage backend error: {0}")]
    Backend(String),
    #[error("document serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A document as returned by lookups and queries.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub id: String,
    pub data: Value,
}

impl Snapshot {
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, StoreError> {
        decode(self.data.clone())
    }
}

/// Top-level field equality.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub value: Value,
}

impl Filter {
    pub fn eq(field: &str, value: impl Into<Value>) -> Self {
        Filter {
            field: field.to_string(),
            value: value.into(),
        }
    }

    pub fn matches(filters: &[Filter], data: &Value) -> bool {
        filters
            .iter()
            .all(|f| data.get(&f.field).is_some_and(|v| *v == f.value))
    }
}

pub fn decode<T: DeserializeOwned>(value: Value) -> Result<T, StoreError> {
    Ok(serde_json::from_value(value)?)
}

pub fn encode<T: Serialize>(value: &T) -> Result<Value, StoreError> {
    Ok(serde_json::to_value(value)?)
}

/// Shallow merge: top-level keys of `patch` replace those of `existing`.
pub fn merge_documents(existing: Option<Value>, patch: Value) -> Value {
    match (existing, patch) {
        (Some(Value::Object(mut base)), Value::Object(fields)) => {
            base.extend(fields);
            Value::Object(base)
        }
        (_, patch) => patch,
    }
}

fn check_lookup_size(ids: &[String]) -> Result<(), StoreError> {
    if ids.len() > MAX_IDS_PER_LOOKUP {
        return Err(StoreError::Backend(format!(
            "id lookups are limited to {MAX_IDS_PER_LOOKUP} ids, got {}",
            ids.len()
        )));
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub enum WriteOp {
    Set(Value),
    Merge(Value),
    Delete,
}

/// A write buffered until commit.
#[derive(Debug, Clone)]
pub struct PendingWrite {
    pub collection: String,
    pub id: String,
    pub op: WriteOp,
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>, StoreError>;

    /// Documents for up to `MAX_IDS_PER_LOOKUP` ids. Missing ids are skipped.
    async fn get_many(&self, collection: &str, ids: &[String]) -> Result<Vec<Snapshot>, StoreError>;

    async fn query(
        &self,
        collection: &str,
        filters: &[Filter],
        limit: Option<usize>,
    ) -> Result<Vec<Snapshot>, StoreError>;

    async fn set(&self, collection: &str, id: &str, data: Value) -> Result<(), StoreError>;

    async fn merge(&self, collection: &str, id: &str, patch: Value) -> Result<(), StoreError>;

    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError>;

    /// Cheap reachability probe for health checks.
    async fn ping(&self) -> Result<(), StoreError>;

    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError>;
}

/// Optimistic transaction. Reads hit the store directly and do not observe
/// this transaction's own buffered writes.
#[async_trait]
pub trait StoreTransaction: Send {
    async fn get(&mut self, collection: &str, id: &str) -> Result<Option<Value>, StoreError>;

    async fn get_many(&mut self, collection: &str, ids: &[String]) -> Result<Vec<Snapshot>, StoreError>;

    async fn query(
        &mut self,
        collection: &str,
        filters: &[Filter],
        limit: Option<usize>,
    ) -> Result<Vec<Snapshot>, StoreError>;

    fn set(&mut self, collection: &str, id: &str, data: Value);

    fn merge(&mut self, collection: &str, id: &str, patch: Value);

    fn delete(&mut self, collection: &str, id: &str);

    /// Apply buffered writes, or fail with `StoreError::Conflict`.
    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

/// Read access shared by plain store handles and open transactions, so lookup
/// helpers serve both paths.
#[async_trait]
pub trait DocumentReader: Send {
    async fn read(&mut self, collection: &str, id: &str) -> Result<Option<Value>, StoreError>;

    async fn read_many(&mut self, collection: &str, ids: &[String]) -> Result<Vec<Snapshot>, StoreError>;

    async fn read_query(
        &mut self,
        collection: &str,
        filters: &[Filter],
        limit: Option<usize>,
    ) -> Result<Vec<Snapshot>, StoreError>;
}

#[async_trait]
impl<'a, 'b> DocumentReader for &'a (dyn DocumentStore + 'b) {
    async fn read(&mut self, collection: &str, id: &str) -> Result<Option<Value>, StoreError> {
        self.get(collection, id).await
    }

    async fn read_many(&mut self, collection: &str, ids: &[String]) -> Result<Vec<Snapshot>, StoreError> {
        self.get_many(collection, ids).await
    }

    async fn read_query(
        &mut self,
        collection: &str,
        filters: &[Filter],
        limit: Option<usize>,
    ) -> Result<Vec<Snapshot>, StoreError> {
        self.query(collection, filters, limit).await
    }
}

#[async_trait]
impl<'a, 'b> DocumentReader for &'a mut (dyn StoreTransaction + 'b) {
    async fn read(&mut self, collection: &str, id: &str) -> Result<Option<Value>, StoreError> {
        self.get(collection, id).await
    }

    async fn read_many(&mut self, collection: &str, ids: &[String]) -> Result<Vec<Snapshot>, StoreError> {
        self.get_many(collection, ids).await
    }

    async fn read_query(
        &mut self,
        collection: &str,
        filters: &[Filter],
        limit: Option<usize>,
    ) -> Result<Vec<Snapshot>, StoreError> {
        self.query(collection, filters, limit).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_backoff: Duration::from_millis(20),
        }
    }
}

impl RetryPolicy {
    const MAX_BACKOFF: Duration = Duration::from_secs(2);

    /// Delay before retry number `attempt` (1-based), doubling each time.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.base_backoff
            .saturating_mul(factor)
            .min(Self::MAX_BACKOFF)
    }
}

pub type TxFuture<'t, T> = Pin<Box<dyn Future<Output = Result<T, AppError>> + Send + 't>>;

/// Run `body` in a fresh transaction, retrying on commit conflicts.
///
/// `body` runs once per attempt, so it must clone whatever it moves into the
/// returned future.
pub async fn run_transaction<T, F>(
    store: &dyn DocumentStore,
    policy: &RetryPolicy,
    mut body: F,
) -> Result<T, AppError>
where
    F: for<'t> FnMut(&'t mut dyn StoreTransaction) -> TxFuture<'t, T>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        let mut tx = store.begin().await?;
        let value = body(tx.as_mut()).await?;
        match tx.commit().await {
            Ok(()) => return Ok(value),
            Err(StoreError::Conflict) if attempt < max_attempts => {
                let delay = policy.backoff(attempt);
                tracing::debug!(
                    attempt = attempt,
                    delay_ms = delay.as_millis() as u64,
                    "transaction conflict, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(StoreError::Conflict) => {
                tracing::error!(attempt = attempt, "transaction retries exhausted");
                return Err(AppError::Internal {
                    message: "Transaction contention, retries exhausted".to_string(),
                    details: Some(serde_json::json!({ "attempts": attempt })),
                });
            }
            Err(other) => return Err(other.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use serde_json::json;

    use super::*;

    #[test]
    fn merge_is_shallow() {
        let merged = merge_documents(
            Some(json!({ "a": 1, "nested": { "x": 1, "y": 2 } })),
            json!({ "b": 2, "nested": { "x": 9 } }),
        );
        assert_eq!(merged, json!({ "a": 1, "b": 2, "nested": { "x": 9 } }));
        assert_eq!(merge_documents(None, json!({ "b": 2 })), json!({ "b": 2 }));
    }

    #[test]
    fn filters_match_top_level_equality() {
        let doc = json!({ "eventId": "e1", "guestId": "g1" });
        assert!(Filter::matches(&[Filter::eq("eventId", "e1")], &doc));
        assert!(!Filter::matches(
            &[Filter::eq("eventId", "e1"), Filter::eq("guestId", "g2")],
            &doc
        ));
        assert!(!Filter::matches(&[Filter::eq("missing", "x")], &doc));
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_backoff: Duration::from_millis(20),
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(20));
        assert_eq!(policy.backoff(2), Duration::from_millis(40));
        assert_eq!(policy.backoff(3), Duration::from_millis(80));
        assert_eq!(policy.backoff(30), RetryPolicy::MAX_BACKOFF);
    }

    #[tokio::test]
    async fn retries_until_commit_succeeds() {
        let store = MemoryStore::new();
        store.set("counters", "c", json!({ "n": 0 })).await.unwrap();
        let attempts = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy {
            max_attempts: 3,
            base_backoff: Duration::from_millis(1),
        };

        let result = run_transaction(&store, &policy, |tx| {
            let attempts = attempts.clone();
            let store = store.clone();
            Box::pin(async move {
                let current = tx.get("counters", "c").await?.unwrap_or_default();
                let n = current["n"].as_i64().unwrap_or_default();
                // A concurrent writer bumps the counter during the first attempt
                if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                    store.set("counters", "c", json!({ "n": n + 100 })).await?;
                }
                tx.set("counters", "c", json!({ "n": n + 1 }));
                Ok(n + 1)
            })
        })
        .await
        .unwrap();

        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(result, 101);
        assert_eq!(store.get("counters", "c").await.unwrap(), Some(json!({ "n": 101 })));
    }

    #[tokio::test]
    async fn exhaustion_surfaces_internal() {
        let store = MemoryStore::new();
        let policy = RetryPolicy {
            max_attempts: 2,
            base_backoff: Duration::from_millis(1),
        };

        let err = run_transaction(&store, &policy, |tx| {
            let store = store.clone();
            Box::pin(async move {
                tx.get("docs", "d").await?;
                store.set("docs", "d", json!({ "touched": true })).await?;
                tx.set("docs", "d", json!({ "mine": true }));
                Ok(())
            })
        })
        .await
        .unwrap_err();

        assert_eq!(err.code(), "internal");
        assert!(err.message().contains("contention"));
    }

    #[tokio::test]
    async fn body_errors_abort_without_writes() {
        let store = MemoryStore::new();
        let err = run_transaction(&store, &RetryPolicy::default(), |tx| {
            Box::pin(async move {
                tx.set("docs", "d", json!({ "x": 1 }));
                Err::<(), _>(AppError::precondition("nope"))
            })
        })
        .await
        .unwrap_err();
        assert_eq!(err.code(), "failed-precondition");
        assert_eq!(store.get("docs", "d").await.unwrap(), None);
    }
}
