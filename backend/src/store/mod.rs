//! Data-access collaborator: generic record CRUD plus change subscriptions.
//!
//! Records are JSON objects carrying a string `id`. The wheel service only
//! ever talks to `dyn DataAccess`, so tests run against `MemoryStore` and
//! production against `PgStore`.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use serde::Serialize;
use serde_json::{Map, Value};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug)]
pub enum StoreError {
    Database(sqlx::Error),
    Migration(sqlx::migrate::MigrateError),
    Serialization(serde_json::Error),
    MissingId,
    Duplicate(String),
    NotFound(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Database(e) => write!(f, "Database error: {}", e),
            Self::Migration(e) => write!(f, "Migration error: {}", e),
            Self::Serialization(e) => write!(f, "Serialization error: {}", e),
            Self::MissingId => write!(f, "Record has no string id"),
            Self::Duplicate(id) => write!(f, "Record {} already exists", id),
            Self::NotFound(id) => write!(f, "Record {} not found", id),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Database(e) => Some(e),
            Self::Migration(e) => Some(e),
            Self::Serialization(e) => Some(e),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database(err)
    }
}

impl From<sqlx::migrate::MigrateError> for StoreError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        Self::Migration(err)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeEvent {
    pub collection: String,
    pub kind: ChangeKind,
    pub id: String,
    /// Record after the change; the removed record for deletes.
    pub record: Value,
}

/// Conjunction of field equalities.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<(String, Value)>,
}

impl Filter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push((field.into(), value.into()));
        self
    }

    pub fn matches(&self, record: &Value) -> bool {
        self.conditions
            .iter()
            .all(|(field, expected)| record.get(field) == Some(expected))
    }

    /// JSON object usable with Postgres `@>` containment.
    pub fn to_json(&self) -> Value {
        let map: Map<String, Value> = self.conditions.iter().cloned().collect();
        Value::Object(map)
    }
}

pub type SubscriptionId = u64;
pub type ChangeHandler = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;
pub type StoreFuture<'a, T> = BoxFuture<'a, Result<T, StoreError>>;

pub trait DataAccess: Send + Sync {
    fn insert<'a>(&'a self, collection: &'a str, record: Value) -> StoreFuture<'a, Value>;

    /// Shallow merge of `patch` into the stored object.
    fn update<'a>(&'a self, collection: &'a str, id: &'a str, patch: Value) -> StoreFuture<'a, ()>;

    fn delete<'a>(&'a self, collection: &'a str, id: &'a str) -> StoreFuture<'a, ()>;

    /// Matching records in insertion order.
    fn query<'a>(&'a self, collection: &'a str, filter: Filter) -> StoreFuture<'a, Vec<Value>>;

    fn subscribe(&self, collection: &str, on_change: ChangeHandler) -> SubscriptionId;

    fn unsubscribe(&self, id: SubscriptionId);
}

pub fn record_id(record: &Value) -> Result<String, StoreError> {
    record
        .get("id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or(StoreError::MissingId)
}

pub fn to_record<T: Serialize>(value: &T) -> Result<Value, StoreError> {
    Ok(serde_json::to_value(value)?)
}

pub(crate) fn merge_patch(target: &mut Value, patch: Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (key, value) in patch {
                target.insert(key, value);
            }
        }
        (target, patch) => *target = patch,
    }
}

/// Change listeners shared by every store implementation.
#[derive(Default)]
pub struct Subscribers {
    next_id: AtomicU64,
    handlers: Mutex<HashMap<SubscriptionId, (String, ChangeHandler)>>,
}

impl Subscribers {
    pub fn add(&self, collection: &str, handler: ChangeHandler) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.handlers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, (collection.to_string(), handler));
        id
    }

    pub fn remove(&self, id: SubscriptionId) {
        self.handlers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id);
    }

    pub fn notify(&self, event: ChangeEvent) {
        // handlers run outside the lock so they may subscribe/unsubscribe
        let matching: Vec<ChangeHandler> = self
            .handlers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|(collection, _)| *collection == event.collection)
            .map(|(_, handler)| handler.clone())
            .collect();
        for handler in matching {
            handler(&event);
        }
    }
}
