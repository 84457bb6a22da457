use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use thiserror::Error;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("item not found")]
    NotFound,
    #[error("item already exists")]
    AlreadyExists,
    #[error("version conflict")]
    VersionConflict,
    #[error("counter limit reached")]
    LimitReached,
    #[error("store backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// One row of the partitioned store. `data` is the entity body; `version`
/// backs optimistic concurrency control.
#[derive(Debug, Clone)]
pub struct StoredItem {
    pub entity_type: String,
    pub id: String,
    pub partition_key: String,
    pub data: Value,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Equality filter over top-level fields of the stored JSON body.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    clauses: Map<String, Value>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.clauses.insert(field.to_string(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn as_json(&self) -> Value {
        Value::Object(self.clauses.clone())
    }

    pub fn matches(&self, data: &Value) -> bool {
        self.clauses
            .iter()
            .all(|(field, expected)| data.get(field) == Some(expected))
    }
}

/// Fields callers may never change through `update`; patches naming them
/// are silently stripped rather than rejected.
pub const PROTECTED_FIELDS: &[&str] = &["id", "partition_key", "entity_type", "created_at", "version"];

pub fn strip_protected(patch: &mut Value) {
    if let Value::Object(map) = patch {
        for field in PROTECTED_FIELDS {
            map.remove(*field);
        }
    }
}

/// Shallow merge: top-level fields named in `patch` replace those in
/// `data`; everything else is preserved.
pub fn merge_patch(data: &mut Value, patch: &Value) {
    if let (Value::Object(target), Value::Object(changes)) = (data, patch) {
        for (field, value) in changes {
            target.insert(field.clone(), value.clone());
        }
    }
}

/// Contract over a partitioned key-value store. The production
/// implementation talks to Postgres; tests use the in-memory double with
/// identical semantics. Every call is a suspension point and may fail
/// transiently.
#[async_trait]
pub trait ItemStore: Send + Sync + 'static {
    /// Insert a new item; fails with `AlreadyExists` if the
    /// `(entity_type, id, partition_key)` key is taken. This is the
    /// create-once primitive the workflow relies on for idempotency.
    async fn create(
        &self,
        entity_type: &str,
        id: &str,
        partition_key: &str,
        data: Value,
    ) -> StoreResult<StoredItem>;

    async fn read(
        &self,
        entity_type: &str,
        id: &str,
        partition_key: &str,
    ) -> StoreResult<Option<StoredItem>>;

    /// Merge `patch` into the stored body. Protected fields are stripped
    /// from the patch; unnamed fields keep their current value.
    async fn update(
        &self,
        entity_type: &str,
        id: &str,
        partition_key: &str,
        patch: Value,
    ) -> StoreResult<StoredItem>;

    /// Replace the body only when the stored version still matches
    /// `expected_version`; otherwise `VersionConflict`.
    async fn replace_if_version(
        &self,
        entity_type: &str,
        id: &str,
        partition_key: &str,
        data: Value,
        expected_version: i64,
    ) -> StoreResult<StoredItem>;

    async fn delete(&self, entity_type: &str, id: &str, partition_key: &str) -> StoreResult<bool>;

    async fn exists(&self, entity_type: &str, id: &str, partition_key: &str) -> StoreResult<bool>;

    /// Equality-filtered scan over one entity type, optionally limited to a
    /// partition, ordered by creation time ascending.
    async fn query(
        &self,
        entity_type: &str,
        filter: &Filter,
        partition_key: Option<&str>,
    ) -> StoreResult<Vec<StoredItem>>;

    /// Atomically add one to an integer field, refusing with
    /// `LimitReached` when `limit` would be passed. Never read-then-write
    /// from application memory.
    async fn increment_bounded(
        &self,
        entity_type: &str,
        id: &str,
        partition_key: &str,
        field: &str,
        limit: Option<i64>,
    ) -> StoreResult<i64>;
}
