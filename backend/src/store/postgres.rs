use futures::FutureExt;
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::PgPool;
use tracing::info;

use super::{
    record_id, ChangeEvent, ChangeHandler, ChangeKind, DataAccess, Filter, StoreError,
    StoreFuture, Subscribers, SubscriptionId,
};

const UNIQUE_VIOLATION: &str = "23505";

/// Postgres-backed store: one `records` table keyed by (collection, id) with a JSONB body.
///
/// Change notifications are delivered in-process after each successful write.
pub struct PgStore {
    pool: PgPool,
    subscribers: Subscribers,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        info!("Connected to Postgres record store");
        Ok(Self::from_pool(pool))
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            subscribers: Subscribers::default(),
        }
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|e| e.code())
        .map(|code| code == UNIQUE_VIOLATION)
        .unwrap_or(false)
}

impl DataAccess for PgStore {
    fn insert<'a>(&'a self, collection: &'a str, record: Value) -> StoreFuture<'a, Value> {
        async move {
            let id = record_id(&record)?;
            sqlx::query("INSERT INTO records (collection, id, body) VALUES ($1, $2, $3)")
                .bind(collection)
                .bind(&id)
                .bind(Json(&record))
                .execute(&self.pool)
                .await
                .map_err(|e| {
                    if is_unique_violation(&e) {
                        StoreError::Duplicate(id.clone())
                    } else {
                        StoreError::Database(e)
                    }
                })?;

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
            // `||` on jsonb is a shallow merge; the id key is re-applied last
            let row: Option<(Json<Value>,)> = sqlx::query_as(
                r#"
                UPDATE records
                SET body = body || $3 || jsonb_build_object('id', id),
                    updated_at = NOW()
                WHERE collection = $1 AND id = $2
                RETURNING body
                "#,
            )
            .bind(collection)
            .bind(id)
            .bind(Json(&patch))
            .fetch_optional(&self.pool)
            .await?;

            let (Json(record),) = row.ok_or_else(|| StoreError::NotFound(id.to_string()))?;
            self.subscribers.notify(ChangeEvent {
                collection: collection.to_string(),
                kind: ChangeKind::Update,
                id: id.to_string(),
                record,
            });
            Ok(())
        }
        .boxed()
    }

    fn delete<'a>(&'a self, collection: &'a str, id: &'a str) -> StoreFuture<'a, ()> {
        async move {
            let row: Option<(Json<Value>,)> = sqlx::query_as(
                "DELETE FROM records WHERE collection = $1 AND id = $2 RETURNING body",
            )
            .bind(collection)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

            let (Json(record),) = row.ok_or_else(|| StoreError::NotFound(id.to_string()))?;
            self.subscribers.notify(ChangeEvent {
                collection: collection.to_string(),
                kind: ChangeKind::Delete,
                id: id.to_string(),
                record,
            });
            Ok(())
        }
        .boxed()
    }

    fn query<'a>(&'a self, collection: &'a str, filter: Filter) -> StoreFuture<'a, Vec<Value>> {
        async move {
            let rows: Vec<(Json<Value>,)> = sqlx::query_as(
                "SELECT body FROM records WHERE collection = $1 AND body @> $2 ORDER BY seq",
            )
            .bind(collection)
            .bind(Json(filter.to_json()))
            .fetch_all(&self.pool)
            .await?;
            Ok(rows.into_iter().map(|(Json(body),)| body).collect())
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
