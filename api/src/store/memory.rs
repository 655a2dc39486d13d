use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::Value;

use super::{
    DocumentStore, Filter, PendingWrite, Snapshot, StoreError, StoreTransaction, WriteOp,
    check_lookup_size, merge_documents,
};

type Key = (String, String);

#[derive(Default)]
struct Inner {
    /// Ordered so queries return documents in id order, like the Postgres store
    docs: BTreeMap<Key, (u64, Value)>,
    clock: u64,
}

impl Inner {
    fn version(&self, key: &Key) -> u64 {
        self.docs.get(key).map(|(v, _)| *v).unwrap_or(0)
    }

    fn apply(&mut self, write: PendingWrite) {
        self.clock += 1;
        let key = (write.collection, write.id);
        match write.op {
            WriteOp::Set(data) => {
                self.docs.insert(key, (self.clock, data));
            }
            WriteOp::Merge(patch) => {
                let existing = self.docs.remove(&key).map(|(_, data)| data);
                self.docs
                    .insert(key, (self.clock, merge_documents(existing, patch)));
            }
            WriteOp::Delete => {
                self.docs.remove(&key);
            }
        }
    }

    fn get(&self, collection: &str, id: &str) -> (u64, Option<Value>) {
        match self.docs.get(&(collection.to_string(), id.to_string())) {
            Some((version, data)) => (*version, Some(data.clone())),
            None => (0, None),
        }
    }

    fn query(&self, collection: &str, filters: &[Filter], limit: Option<usize>) -> Vec<(u64, Snapshot)> {
        self.docs
            .iter()
            .filter(|((c, _), (_, data))| c == collection && Filter::matches(filters, data))
            .take(limit.unwrap_or(usize::MAX))
            .map(|((_, id), (version, data))| {
                (
                    *version,
                    Snapshot {
                        id: id.clone(),
                        data: data.clone(),
                    },
                )
            })
            .collect()
    }
}

/// In-process store with per-document versions. Backs tests and
/// `TRAX_STORE=memory`.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of documents in a collection.
    pub fn count(&self, collection: &str) -> usize {
        self.lock()
            .docs
            .keys()
            .filter(|(c, _)| c == collection)
            .count()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.lock().get(collection, id).1)
    }

    async fn get_many(&self, collection: &str, ids: &[String]) -> Result<Vec<Snapshot>, StoreError> {
        check_lookup_size(ids)?;
        let inner = self.lock();
        Ok(ids
            .iter()
            .filter_map(|id| {
                inner.get(collection, id).1.map(|data| Snapshot {
                    id: id.clone(),
                    data,
                })
            })
            .collect())
    }

    async fn query(
        &self,
        collection: &str,
        filters: &[Filter],
        limit: Option<usize>,
    ) -> Result<Vec<Snapshot>, StoreError> {
        Ok(self
            .lock()
            .query(collection, filters, limit)
            .into_iter()
            .map(|(_, snap)| snap)
            .collect())
    }

    async fn set(&self, collection: &str, id: &str, data: Value) -> Result<(), StoreError> {
        self.lock().apply(PendingWrite {
            collection: collection.to_string(),
            id: id.to_string(),
            op: WriteOp::Set(data),
        });
        Ok(())
    }

    async fn merge(&self, collection: &str, id: &str, patch: Value) -> Result<(), StoreError> {
        self.lock().apply(PendingWrite {
            collection: collection.to_string(),
            id: id.to_string(),
            op: WriteOp::Merge(patch),
        });
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError> {
        self.lock().apply(PendingWrite {
            collection: collection.to_string(),
            id: id.to_string(),
            op: WriteOp::Delete,
        });
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        Ok(Box::new(MemoryTransaction {
            store: self.clone(),
            reads: HashMap::new(),
            writes: Vec::new(),
        }))
    }
}

pub struct MemoryTransaction {
    store: MemoryStore,
    /// First observed version per document; 0 means absent
    reads: HashMap<Key, u64>,
    writes: Vec<PendingWrite>,
}

impl MemoryTransaction {
    fn record(&mut self, collection: &str, id: &str, version: u64) {
        self.reads
            .entry((collection.to_string(), id.to_string()))
            .or_insert(version);
    }

    fn buffer(&mut self, collection: &str, id: &str, op: WriteOp) {
        self.writes.push(PendingWrite {
            collection: collection.to_string(),
            id: id.to_string(),
            op,
        });
    }
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn get(&mut self, collection: &str, id: &str) -> Result<Option<Value>, StoreError> {
        let (version, data) = self.store.lock().get(collection, id);
        self.record(collection, id, version);
        Ok(data)
    }

    async fn get_many(&mut self, collection: &str, ids: &[String]) -> Result<Vec<Snapshot>, StoreError> {
        check_lookup_size(ids)?;
        let mut out = Vec::new();
        for id in ids {
            if let Some(data) = StoreTransaction::get(self, collection, id).await? {
                out.push(Snapshot {
                    id: id.clone(),
                    data,
                });
            }
        }
        Ok(out)
    }

    async fn query(
        &mut self,
        collection: &str,
        filters: &[Filter],
        limit: Option<usize>,
    ) -> Result<Vec<Snapshot>, StoreError> {
        let rows = self.store.lock().query(collection, filters, limit);
        Ok(rows
            .into_iter()
            .map(|(version, snap)| {
                self.record(collection, &snap.id, version);
                snap
            })
            .collect())
    }

    fn set(&mut self, collection: &str, id: &str, data: Value) {
        self.buffer(collection, id, WriteOp::Set(data));
    }

    fn merge(&mut self, collection: &str, id: &str, patch: Value) {
        self.buffer(collection, id, WriteOp::Merge(patch));
    }

    fn delete(&mut self, collection: &str, id: &str) {
        self.buffer(collection, id, WriteOp::Delete);
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryTransaction { store, reads, writes } = *self;
        let mut inner = store.lock();
        if reads.iter().any(|(key, seen)| inner.version(key) != *seen) {
            return Err(StoreError::Conflict);
        }
        for write in writes {
            inner.apply(write);
        }
        Ok(())
    }
}
