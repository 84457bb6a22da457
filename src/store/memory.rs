use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::Mutex;

use super::{merge_patch, strip_protected, Filter, ItemStore, StoreError, StoreResult, StoredItem};

type ItemKey = (String, String, String);

/// In-memory store double. One mutex guards the whole map, which gives
/// the same atomicity the production store provides through conditional
/// writes.
#[derive(Default)]
pub struct MemoryStore {
    items: Mutex<HashMap<ItemKey, StoredItem>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(entity_type: &str, id: &str, partition_key: &str) -> ItemKey {
        (
            entity_type.to_string(),
            id.to_string(),
            partition_key.to_string(),
        )
    }

    #[cfg(test)]
    async fn len(&self) -> usize {
        self.items.lock().await.len()
    }
}

#[async_trait]
impl ItemStore for MemoryStore {
    async fn create(
        &self,
        entity_type: &str,
        id: &str,
        partition_key: &str,
        data: Value,
    ) -> StoreResult<StoredItem> {
        let mut guard = self.items.lock().await;
        let key = Self::key(entity_type, id, partition_key);
        if guard.contains_key(&key) {
            return Err(StoreError::AlreadyExists);
        }
        let now = Utc::now();
        let item = StoredItem {
            entity_type: entity_type.to_string(),
            id: id.to_string(),
            partition_key: partition_key.to_string(),
            data,
            version: 1,
            created_at: now,
            updated_at: now,
        };
        guard.insert(key, item.clone());
        Ok(item)
    }

    async fn read(
        &self,
        entity_type: &str,
        id: &str,
        partition_key: &str,
    ) -> StoreResult<Option<StoredItem>> {
        let guard = self.items.lock().await;
        Ok(guard
            .get(&Self::key(entity_type, id, partition_key))
            .cloned())
    }

    async fn update(
        &self,
        entity_type: &str,
        id: &str,
        partition_key: &str,
        mut patch: Value,
    ) -> StoreResult<StoredItem> {
        strip_protected(&mut patch);
        let mut guard = self.items.lock().await;
        let item = guard
            .get_mut(&Self::key(entity_type, id, partition_key))
            .ok_or(StoreError::NotFound)?;
        merge_patch(&mut item.data, &patch);
        item.version += 1;
        item.updated_at = Utc::now();
        Ok(item.clone())
    }

    async fn replace_if_version(
        &self,
        entity_type: &str,
        id: &str,
        partition_key: &str,
        data: Value,
        expected_version: i64,
    ) -> StoreResult<StoredItem> {
        let mut guard = self.items.lock().await;
        let item = guard
            .get_mut(&Self::key(entity_type, id, partition_key))
            .ok_or(StoreError::NotFound)?;
        if item.version != expected_version {
            return Err(StoreError::VersionConflict);
        }
        item.data = data;
        item.version += 1;
        item.updated_at = Utc::now();
        Ok(item.clone())
    }

    async fn delete(&self, entity_type: &str, id: &str, partition_key: &str) -> StoreResult<bool> {
        let mut guard = self.items.lock().await;
        Ok(guard
            .remove(&Self::key(entity_type, id, partition_key))
            .is_some())
    }

    async fn exists(&self, entity_type: &str, id: &str, partition_key: &str) -> StoreResult<bool> {
        let guard = self.items.lock().await;
        Ok(guard.contains_key(&Self::key(entity_type, id, partition_key)))
    }

    async fn query(
        &self,
        entity_type: &str,
        filter: &Filter,
        partition_key: Option<&str>,
    ) -> StoreResult<Vec<StoredItem>> {
        let guard = self.items.lock().await;
        let mut matched: Vec<StoredItem> = guard
            .values()
            .filter(|item| item.entity_type == entity_type)
            .filter(|item| partition_key.map_or(true, |pk| item.partition_key == pk))
            .filter(|item| filter.matches(&item.data))
            .cloned()
            .collect();
        matched.sort_by_key(|item| item.created_at);
        Ok(matched)
    }

    async fn increment_bounded(
        &self,
        entity_type: &str,
        id: &str,
        partition_key: &str,
        field: &str,
        limit: Option<i64>,
    ) -> StoreResult<i64> {
        let mut guard = self.items.lock().await;
        let item = guard
            .get_mut(&Self::key(entity_type, id, partition_key))
            .ok_or(StoreError::NotFound)?;
        let current = item
            .data
            .get(field)
            .and_then(Value::as_i64)
            .unwrap_or_default();
        if let Some(limit) = limit {
            if current >= limit {
                return Err(StoreError::LimitReached);
            }
        }
        let next = current + 1;
        if let Value::Object(map) = &mut item.data {
            map.insert(field.to_string(), Value::from(next));
        }
        item.version += 1;
        item.updated_at = Utc::now();
        Ok(next)
    }
}
