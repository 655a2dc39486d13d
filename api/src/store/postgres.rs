use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;

use super::{
    DocumentStore, Filter, PendingWrite, Snapshot, StoreError, StoreTransaction, WriteOp,
    check_lookup_size,
};

const UNIQUE_VIOLATION: &str = "23505";

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(ref db_err) = err {
            if db_err.code().as_deref() == Some(UNIQUE_VIOLATION) {
                return StoreError::Conflict;
            }
        }
        StoreError::Backend(err.to_string())
    }
}

/// Equality filters as a JSONB containment document.
fn containment(filters: &[Filter]) -> Value {
    Value::Object(
        filters
            .iter()
            .map(|f| (f.field.clone(), f.value.clone()))
            .collect(),
    )
}

#[derive(sqlx::FromRow)]
struct DocumentRow {
    id: String,
    data: Value,
    version: i64,
}

/// `documents` table backed store. Versions come from one sequence so a
/// deleted and recreated document never reuses a version.
#[derive(Clone)]
pub struct PgDocumentStore {
    pool: PgPool,
}

impl PgDocumentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_one(&self, collection: &str, id: &str) -> Result<Option<DocumentRow>, StoreError> {
        Ok(sqlx::query_as::<_, DocumentRow>(
            "SELECT id, data, version FROM documents WHERE collection = $1 AND id = $2",
        )
        .bind(collection)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn fetch_many(&self, collection: &str, ids: &[String]) -> Result<Vec<DocumentRow>, StoreError> {
        check_lookup_size(ids)?;
        Ok(sqlx::query_as::<_, DocumentRow>(
            "SELECT id, data, version FROM documents WHERE collection = $1 AND id = ANY($2)",
        )
        .bind(collection)
        .bind(ids)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn fetch_query(
        &self,
        collection: &str,
        filters: &[Filter],
        limit: Option<usize>,
    ) -> Result<Vec<DocumentRow>, StoreError> {
        Ok(sqlx::query_as::<_, DocumentRow>(
            "SELECT id, data, version FROM documents \
             WHERE collection = $1 AND data @> $2 \
             ORDER BY id LIMIT $3",
        )
        .bind(collection)
        .bind(containment(filters))
        .bind(limit.map(|l| l as i64))
        .fetch_all(&self.pool)
        .await?)
    }
}

async fn upsert<'e, E>(executor: E, write: &PendingWrite, must_be_new: bool) -> Result<(), StoreError>
where
    E: sqlx::PgExecutor<'e>,
{
    let (sql, data) = match (&write.op, must_be_new) {
        (WriteOp::Delete, _) => {
            sqlx::query("DELETE FROM documents WHERE collection = $1 AND id = $2")
                .bind(&write.collection)
                .bind(&write.id)
                .execute(executor)
                .await?;
            return Ok(());
        }
        (WriteOp::Set(data) | WriteOp::Merge(data), true) => (
            "INSERT INTO documents (collection, id, data) VALUES ($1, $2, $3)",
            data,
        ),
        (WriteOp::Set(data), false) => (
            "INSERT INTO documents (collection, id, data) VALUES ($1, $2, $3) \
             ON CONFLICT (collection, id) DO UPDATE \
             SET data = EXCLUDED.data, version = nextval('documents_version_seq'), updated_at = now()",
            data,
        ),
        (WriteOp::Merge(data), false) => (
            "INSERT INTO documents (collection, id, data) VALUES ($1, $2, $3) \
             ON CONFLICT (collection, id) DO UPDATE \
             SET data = documents.data || EXCLUDED.data, version = nextval('documents_version_seq'), updated_at = now()",
            data,
        ),
    };
    sqlx::query(sql)
        .bind(&write.collection)
        .bind(&write.id)
        .bind(data)
        .execute(executor)
        .await?;
    Ok(())
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.fetch_one(collection, id).await?.map(|row| row.data))
    }

    async fn get_many(&self, collection: &str, ids: &[String]) -> Result<Vec<Snapshot>, StoreError> {
        Ok(self
            .fetch_many(collection, ids)
            .await?
            .into_iter()
            .map(|row| Snapshot {
                id: row.id,
                data: row.data,
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
            .fetch_query(collection, filters, limit)
            .await?
            .into_iter()
            .map(|row| Snapshot {
                id: row.id,
                data: row.data,
            })
            .collect())
    }

    async fn set(&self, collection: &str, id: &str, data: Value) -> Result<(), StoreError> {
        let write = PendingWrite {
            collection: collection.to_string(),
            id: id.to_string(),
            op: WriteOp::Set(data),
        };
        upsert(&self.pool, &write, false).await
    }

    async fn merge(&self, collection: &str, id: &str, patch: Value) -> Result<(), StoreError> {
        let write = PendingWrite {
            collection: collection.to_string(),
            id: id.to_string(),
            op: WriteOp::Merge(patch),
        };
        upsert(&self.pool, &write, false).await
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError> {
        let write = PendingWrite {
            collection: collection.to_string(),
            id: id.to_string(),
            op: WriteOp::Delete,
        };
        upsert(&self.pool, &write, false).await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(())
    }

    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        Ok(Box::new(PgTransaction {
            store: self.clone(),
            reads: HashMap::new(),
            writes: Vec::new(),
        }))
    }
}

pub struct PgTransaction {
    store: PgDocumentStore,
    /// First observed version per document; 0 means absent
    reads: HashMap<(String, String), i64>,
    writes: Vec<PendingWrite>,
}

impl PgTransaction {
    fn record(&mut self, collection: &str, id: &str, version: i64) {
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
impl StoreTransaction for PgTransaction {
    async fn get(&mut self, collection: &str, id: &str) -> Result<Option<Value>, StoreError> {
        let row = self.store.fetch_one(collection, id).await?;
        self.record(collection, id, row.as_ref().map(|r| r.version).unwrap_or(0));
        Ok(row.map(|r| r.data))
    }

    async fn get_many(&mut self, collection: &str, ids: &[String]) -> Result<Vec<Snapshot>, StoreError> {
        let rows = self.store.fetch_many(collection, ids).await?;
        let mut found = HashMap::new();
        for row in rows {
            self.record(collection, &row.id, row.version);
            found.insert(row.id, row.data);
        }
        for id in ids {
            if !found.contains_key(id) {
                self.record(collection, id, 0);
            }
        }
        Ok(ids
            .iter()
            .filter_map(|id| {
                found.remove(id).map(|data| Snapshot {
                    id: id.clone(),
                    data,
                })
            })
            .collect())
    }

    async fn query(
        &mut self,
        collection: &str,
        filters: &[Filter],
        limit: Option<usize>,
    ) -> Result<Vec<Snapshot>, StoreError> {
        let rows = self.store.fetch_query(collection, filters, limit).await?;
        Ok(rows
            .into_iter()
            .map(|row| {
                self.record(collection, &row.id, row.version);
                Snapshot {
                    id: row.id,
                    data: row.data,
                }
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
        let PgTransaction { store, reads, writes } = *self;
        let mut tx = store.pool.begin().await?;

        // Lock in a stable order so concurrent commits cannot deadlock
        let mut keys: Vec<_> = reads.into_iter().collect();
        keys.sort();
        let mut absent_at_read = Vec::new();
        for ((collection, id), seen) in keys {
            let current: Option<i64> = sqlx::query_scalar(
                "SELECT version FROM documents WHERE collection = $1 AND id = $2 FOR UPDATE",
            )
            .bind(&collection)
            .bind(&id)
            .fetch_optional(&mut *tx)
            .await?;
            if current.unwrap_or(0) != seen {
                return Err(StoreError::Conflict);
            }
            if seen == 0 {
                absent_at_read.push((collection, id));
            }
        }

        let mut created = Vec::new();
        for write in &writes {
            let key = (write.collection.clone(), write.id.clone());
            // A document read as absent must still be absent: a plain insert turns
            // a concurrent creation into a unique violation.
            let must_be_new = absent_at_read.contains(&key) && !created.contains(&key);
            upsert(&mut *tx, write, must_be_new).await?;
            if !matches!(write.op, WriteOp::Delete) {
                created.push(key);
            }
        }

        tx.commit().await?;
        Ok(())
    }
}
