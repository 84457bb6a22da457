use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel::sql_types::{BigInt, Nullable, Text};
use serde_json::Value;
use tokio::task;

use crate::db::PgPool;
use crate::schema::items;

use super::{merge_patch, strip_protected, Filter, ItemStore, StoreError, StoreResult, StoredItem};

/// Production store: one partitioned `items` table in Postgres. Diesel is
/// synchronous, so every call hops onto the blocking pool the same way the
/// request handlers do elsewhere.
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn with_conn<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut PgConnection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|err| StoreError::Backend(format!("connection pool error: {err}")))?;
            f(&mut conn)
        })
        .await
        .map_err(|err| StoreError::Backend(format!("store task panicked: {err}")))?
    }
}

impl From<DieselError> for StoreError {
    fn from(value: DieselError) -> Self {
        match value {
            DieselError::NotFound => StoreError::NotFound,
            DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
                StoreError::AlreadyExists
            }
            other => StoreError::Backend(other.to_string()),
        }
    }
}

#[derive(Debug, Queryable, Identifiable)]
#[diesel(table_name = items)]
#[diesel(primary_key(entity_type, id, partition_key))]
struct ItemRow {
    entity_type: String,
    id: String,
    partition_key: String,
    data: Value,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ItemRow> for StoredItem {
    fn from(row: ItemRow) -> Self {
        StoredItem {
            entity_type: row.entity_type,
            id: row.id,
            partition_key: row.partition_key,
            data: row.data,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = items)]
struct NewItemRow {
    entity_type: String,
    id: String,
    partition_key: String,
    data: Value,
}

#[derive(QueryableByName)]
struct CountRow {
    #[diesel(sql_type = BigInt)]
    count: i64,
}

const INCREMENT_SQL: &str = "\
UPDATE items \
SET data = jsonb_set(data, ARRAY[$4], to_jsonb(COALESCE(data->>$4, '0')::bigint + 1)), \
    version = version + 1, \
    updated_at = now() \
WHERE entity_type = $1 AND id = $2 AND partition_key = $3 \
  AND ($5::bigint IS NULL OR COALESCE(data->>$4, '0')::bigint < $5::bigint) \
RETURNING (data->>$4)::bigint AS count";

#[async_trait]
impl ItemStore for PostgresStore {
    async fn create(
        &self,
        entity_type: &str,
        id: &str,
        partition_key: &str,
        data: Value,
    ) -> StoreResult<StoredItem> {
        let row = NewItemRow {
            entity_type: entity_type.to_string(),
            id: id.to_string(),
            partition_key: partition_key.to_string(),
            data,
        };
        self.with_conn(move |conn| {
            let inserted: ItemRow = diesel::insert_into(items::table)
                .values(&row)
                .get_result(conn)?;
            Ok(inserted.into())
        })
        .await
    }

    async fn read(
        &self,
        entity_type: &str,
        id: &str,
        partition_key: &str,
    ) -> StoreResult<Option<StoredItem>> {
        let key = (
            entity_type.to_string(),
            id.to_string(),
            partition_key.to_string(),
        );
        self.with_conn(move |conn| {
            let row: Option<ItemRow> = items::table.find(key).first(conn).optional()?;
            Ok(row.map(StoredItem::from))
        })
        .await
    }

    async fn update(
        &self,
        entity_type: &str,
        id: &str,
        partition_key: &str,
        mut patch: Value,
    ) -> StoreResult<StoredItem> {
        strip_protected(&mut patch);
        let key = (
            entity_type.to_string(),
            id.to_string(),
            partition_key.to_string(),
        );
        self.with_conn(move |conn| {
            conn.transaction::<StoredItem, StoreError, _>(|conn| {
                let row: ItemRow = items::table
                    .find(key.clone())
                    .for_update()
                    .first(conn)
                    .optional()?
                    .ok_or(StoreError::NotFound)?;
                let mut data = row.data.clone();
                merge_patch(&mut data, &patch);
                let updated: ItemRow = diesel::update(items::table.find(key))
                    .set((
                        items::data.eq(data),
                        items::version.eq(row.version + 1),
                        items::updated_at.eq(Utc::now()),
                    ))
                    .get_result(conn)?;
                Ok(updated.into())
            })
        })
        .await
    }

    async fn replace_if_version(
        &self,
        entity_type: &str,
        id: &str,
        partition_key: &str,
        data: Value,
        expected_version: i64,
    ) -> StoreResult<StoredItem> {
        let key = (
            entity_type.to_string(),
            id.to_string(),
            partition_key.to_string(),
        );
        self.with_conn(move |conn| {
            let updated: Option<ItemRow> = diesel::update(
                items::table
                    .find(key.clone())
                    .filter(items::version.eq(expected_version)),
            )
            .set((
                items::data.eq(data),
                items::version.eq(expected_version + 1),
                items::updated_at.eq(Utc::now()),
            ))
            .get_result(conn)
            .optional()?;

            match updated {
                Some(row) => Ok(row.into()),
                None => {
                    let present: Option<ItemRow> =
                        items::table.find(key).first(conn).optional()?;
                    if present.is_some() {
                        Err(StoreError::VersionConflict)
                    } else {
                        Err(StoreError::NotFound)
                    }
                }
            }
        })
        .await
    }

    async fn delete(&self, entity_type: &str, id: &str, partition_key: &str) -> StoreResult<bool> {
        let key = (
            entity_type.to_string(),
            id.to_string(),
            partition_key.to_string(),
        );
        self.with_conn(move |conn| {
            let deleted = diesel::delete(items::table.find(key)).execute(conn)?;
            Ok(deleted > 0)
        })
        .await
    }

    async fn exists(&self, entity_type: &str, id: &str, partition_key: &str) -> StoreResult<bool> {
        let key = (
            entity_type.to_string(),
            id.to_string(),
            partition_key.to_string(),
        );
        self.with_conn(move |conn| {
            let present = diesel::select(diesel::dsl::exists(items::table.find(key)))
                .get_result::<bool>(conn)?;
            Ok(present)
        })
        .await
    }

    async fn query(
        &self,
        entity_type: &str,
        filter: &Filter,
        partition_key: Option<&str>,
    ) -> StoreResult<Vec<StoredItem>> {
        let entity_type = entity_type.to_string();
        let partition_key = partition_key.map(str::to_string);
        let filter = filter.clone();
        self.with_conn(move |conn| {
            let mut query = items::table
                .filter(items::entity_type.eq(entity_type))
                .order(items::created_at.asc())
                .into_boxed();
            if let Some(pk) = partition_key {
                query = query.filter(items::partition_key.eq(pk));
            }
            let rows: Vec<ItemRow> = query.load(conn)?;
            Ok(rows
                .into_iter()
                .filter(|row| filter.matches(&row.data))
                .map(StoredItem::from)
                .collect())
        })
        .await
    }

    async fn increment_bounded(
        &self,
        entity_type: &str,
        id: &str,
        partition_key: &str,
        field: &str,
        limit: Option<i64>,
    ) -> StoreResult<i64> {
        let key = (
            entity_type.to_string(),
            id.to_string(),
            partition_key.to_string(),
        );
        let field = field.to_string();
        self.with_conn(move |conn| {
            let rows: Vec<CountRow> = diesel::sql_query(INCREMENT_SQL)
                .bind::<Text, _>(&key.0)
                .bind::<Text, _>(&key.1)
                .bind::<Text, _>(&key.2)
                .bind::<Text, _>(&field)
                .bind::<Nullable<BigInt>, _>(limit)
                .load(conn)?;

            match rows.into_iter().next() {
                Some(row) => Ok(row.count),
                None => {
                    let present: Option<ItemRow> =
                        items::table.find(key).first(conn).optional()?;
                    if present.is_some() {
                        Err(StoreError::LimitReached)
                    } else {
                        Err(StoreError::NotFound)
                    }
                }
            }
        })
        .await
    }
}
