//! PostgreSQL store.
//!
//! Row locks are `SELECT ... FOR SHARE` / `FOR UPDATE`, bounded by a
//! transaction-local `lock_timeout`. Writes bind the row image as JSONB and
//! expand it with `jsonb_populate_record`, so one statement shape serves
//! every entity.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, Postgres};
use sqlx::types::Json;
use sqlx::Transaction;
use tracing::debug;
use uuid::Uuid;

use allotment_core::config::LockingConfig;
use allotment_core::error::AppError;
use allotment_core::result::AppResult;
use allotment_core::types::LockStrength;
use allotment_entity::lock::NAMED_LOCK_TABLE;
use allotment_entity::{Entity, NamedLock};

use super::{RowImage, Store, StoreTransaction};

/// Store backed by a PostgreSQL connection pool.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
    locking: LockingConfig,
}

impl PgStore {
    /// Create a new store over an existing pool.
    pub fn new(pool: PgPool, locking: LockingConfig) -> Self {
        Self { pool, locking }
    }

    /// Return a reference to the underlying sqlx pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PgStore {
    type Transaction = PgTransaction;

    async fn begin(&self) -> AppResult<PgTransaction> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::from_sqlx("Failed to begin transaction", e))?;

        // SET cannot take bind parameters; the value is an integer we own.
        sqlx::query(&format!(
            "SET LOCAL lock_timeout = '{}ms'",
            self.locking.lock_wait_timeout_ms
        ))
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::from_sqlx("Failed to set lock timeout", e))?;

        Ok(PgTransaction { tx })
    }

    fn locking(&self) -> &LockingConfig {
        &self.locking
    }
}

/// An open PostgreSQL transaction. Dropping it rolls back.
pub struct PgTransaction {
    tx: Transaction<'static, Postgres>,
}

/// Locking clause for a row read.
fn lock_clause(lock: Option<LockStrength>) -> &'static str {
    match lock {
        None => "",
        Some(LockStrength::SharedRead) => " FOR SHARE",
        Some(LockStrength::ExclusiveWrite) => " FOR UPDATE",
    }
}

fn insert_sql(row: &RowImage) -> String {
    let columns = row.columns.join(", ");
    format!(
        "INSERT INTO {table} ({columns}) \
         SELECT {columns} FROM jsonb_populate_record(NULL::{table}, $1)",
        table = row.table,
    )
}

fn update_sql(row: &RowImage) -> String {
    let columns = row.value_columns().join(", ");
    format!(
        "UPDATE {table} SET ({columns}) = \
         (SELECT {columns} FROM jsonb_populate_record(NULL::{table}, $1)) \
         WHERE id = $2",
        table = row.table,
    )
}

#[async_trait]
impl StoreTransaction for PgTransaction {
    async fn select<E: Entity>(
        &mut self,
        ids: &[Uuid],
        lock: Option<LockStrength>,
    ) -> AppResult<Vec<E>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        // ORDER BY id makes concurrent batch lockers take rows in the same
        // order.
        let sql = format!(
            "SELECT * FROM {} WHERE id = ANY($1) ORDER BY id{}",
            E::TABLE,
            lock_clause(lock)
        );

        debug!(table = E::TABLE, count = ids.len(), ?lock, "Selecting rows");

        sqlx::query_as::<_, E>(&sql)
            .bind(ids)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| AppError::from_sqlx(&format!("Failed to select from {}", E::TABLE), e))
    }

    async fn select_by<E: Entity>(
        &mut self,
        column: &'static str,
        value: Uuid,
    ) -> AppResult<Vec<E>> {
        let sql = format!("SELECT * FROM {} WHERE {column} = $1 ORDER BY id", E::TABLE);

        sqlx::query_as::<_, E>(&sql)
            .bind(value)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| AppError::from_sqlx(&format!("Failed to select from {}", E::TABLE), e))
    }

    async fn select_all<E: Entity>(&mut self) -> AppResult<Vec<E>> {
        let sql = format!("SELECT * FROM {} ORDER BY id", E::TABLE);

        sqlx::query_as::<_, E>(&sql)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| AppError::from_sqlx(&format!("Failed to list {}", E::TABLE), e))
    }

    async fn insert(&mut self, row: &RowImage) -> AppResult<()> {
        sqlx::query(&insert_sql(row))
            .bind(Json(&row.values))
            .execute(&mut *self.tx)
            .await
            .map_err(|e| AppError::from_sqlx(&format!("Failed to insert into {}", row.table), e))?;
        Ok(())
    }

    async fn update(&mut self, row: &RowImage) -> AppResult<bool> {
        let result = sqlx::query(&update_sql(row))
            .bind(Json(&row.values))
            .bind(row.id)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| AppError::from_sqlx(&format!("Failed to update {}", row.table), e))?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete(&mut self, table: &'static str, id: Uuid) -> AppResult<bool> {
        let result = sqlx::query(&format!("DELETE FROM {table} WHERE id = $1"))
            .bind(id)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| AppError::from_sqlx(&format!("Failed to delete from {table}"), e))?;
        Ok(result.rows_affected() > 0)
    }

    async fn lock_named(&mut self, name: &str, strength: LockStrength) -> AppResult<NamedLock> {
        sqlx::query(&format!(
            "INSERT INTO {NAMED_LOCK_TABLE} (name, created_at) VALUES ($1, NOW()) \
             ON CONFLICT (name) DO NOTHING"
        ))
        .bind(name)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| AppError::from_sqlx("Failed to create named lock", e))?;

        sqlx::query_as::<_, NamedLock>(&format!(
            "SELECT * FROM {NAMED_LOCK_TABLE} WHERE name = $1{}",
            lock_clause(Some(strength))
        ))
        .bind(name)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| AppError::from_sqlx("Failed to acquire named lock", e))
    }

    async fn commit(self) -> AppResult<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| AppError::from_sqlx("Failed to commit transaction", e))
    }

    async fn rollback(self) -> AppResult<()> {
        self.tx
            .rollback()
            .await
            .map_err(|e| AppError::from_sqlx("Failed to roll back transaction", e))
    }
}
