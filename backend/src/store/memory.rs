use std::collections::HashMap;

use futures::FutureExt;
use serde_json::Value;
use tokio::sync::RwLock;

use super::{
    merge_patch, record_id, ChangeEvent, ChangeHandler, ChangeKind, DataAccess, Filter,
    StoreError, StoreFuture, Subscribers, SubscriptionId,
};

/// In-process store. Used when no database is configured, and by tests.
#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Vec<Value>>>,
    subscribers: Subscribers,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DataAccess for MemoryStore {
    fn insert<'a>(&'a self, collection: &'a str, record: Value) -> StoreFuture<'a, Value> {
        async move {
            let id = record_id(&record)?;
            {
                let mut collections = self.collections.write().await;
                let records = collections.entry(collection.to_string()).or_default();
                if records.iter().any(|r| r.get("id").and_then(Value::as_str) == Some(id.as_str())) {
                    return Err(StoreError::Duplicate(id));
                }
                records.push(record.clone());
            }
            self.subscribers.notify(ChangeEvent {
                collection: collection.to_string(),
                kind: ChangeKind::Insert,
                id,
                record: record.clone(),
            });
            Ok(record)
        }
        .boxed()
    }

    fn update<'a>(&'a self, collection: &'a str, id: &'a str, patch: Value) -> StoreFuture<'a, ()> {
        async move {
            let updated = {
                let mut collections = self.collections.write().await;
                let record = collections
                    .get_mut(collection)
                    .and_then(|records| {
                        records
                            .iter_mut()
                            .find(|r| r.get("id").and_then(Value::as_str) == Some(id))
                    })
                    .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
                merge_patch(record, patch);
                // the id is the key; a patch may not move the record
                if let Value::Object(map) = record {
                    map.insert("id".to_string(), Value::String(id.to_string()));
                }
                record.clone()
            };
            self.subscribers.notify(ChangeEvent {
                collection: collection.to_string(),
                kind: ChangeKind::Update,
                id: id.to_string(),
                record: updated,
            });
            Ok(())
        }
        .boxed()
    }

    fn delete<'a>(&'a self, collection: &'a str, id: &'a str) -> StoreFuture<'a, ()> {
        async move {
            let removed = {
                let mut collections = self.collections.write().await;
                let records = collections
                    .get_mut(collection)
                    .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
                let index = records
                    .iter()
                    .position(|r| r.get("id").and_then(Value::as_str) == Some(id))
                    .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
                records.remove(index)
            };
            self.subscribers.notify(ChangeEvent {
                collection: collection.to_string(),
                kind: ChangeKind::Delete,
                id: id.to_string(),
                record: removed,
            });
            Ok(())
        }
        .boxed()
    }

    fn query<'a>(&'a self, collection: &'a str, filter: Filter) -> StoreFuture<'a, Vec<Value>> {
        async move {
            let collections = self.collections.read().await;
            Ok(collections
                .get(collection)
                .map(|records| records.iter().filter(|r| filter.matches(r)).cloned().collect())
                .unwrap_or_default())
        }
        .boxed()
    }

    fn subscribe(&self, collection: &str, on_change: ChangeHandler) -> SubscriptionId {
        self.subscribers.add(collection, on_change)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers.remove(id);
    }
}
