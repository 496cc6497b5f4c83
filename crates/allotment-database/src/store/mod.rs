//! Transactional store abstraction.
//!
//! A [`Store`] hands out transactions; every row lock taken through a
//! [`StoreTransaction`] is held until that transaction commits, rolls
//! back, or is dropped. All mutual exclusion between call contexts is
//! delegated to the store, so callers may live in separate processes.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use serde_json::{Map, Value};
use uuid::Uuid;

use allotment_core::config::LockingConfig;
use allotment_core::error::AppError;
use allotment_core::result::AppResult;
use allotment_core::types::LockStrength;
use allotment_entity::{Entity, NamedLock};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Source of transactions.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    /// The transaction type handed out by [`Store::begin`].
    type Transaction: StoreTransaction;

    /// Open a new transaction.
    async fn begin(&self) -> AppResult<Self::Transaction>;

    /// Lock settings every session over this store must honour.
    fn locking(&self) -> &LockingConfig;
}

/// One open transaction.
///
/// Reads see committed data plus this transaction's own writes. Writes
/// take an exclusive lock on the row they touch.
#[async_trait]
pub trait StoreTransaction: Send + 'static {
    /// Read the rows of `E` whose id is in `ids`.
    ///
    /// With a lock strength, each returned row is locked in ascending id
    /// order and its values are read after the lock is granted. Missing
    /// ids are skipped.
    async fn select<E: Entity>(
        &mut self,
        ids: &[Uuid],
        lock: Option<LockStrength>,
    ) -> AppResult<Vec<E>>;

    /// Read the rows of `E` whose `column` equals `value`, without locking.
    async fn select_by<E: Entity>(&mut self, column: &'static str, value: Uuid)
    -> AppResult<Vec<E>>;

    /// Read every row of `E`, without locking.
    async fn select_all<E: Entity>(&mut self) -> AppResult<Vec<E>>;

    /// Insert a new row. Fails with a conflict if the id is taken.
    async fn insert(&mut self, row: &RowImage) -> AppResult<()>;

    /// Overwrite an existing row. Returns `false` if it does not exist.
    async fn update(&mut self, row: &RowImage) -> AppResult<bool>;

    /// Delete a row. Returns `false` if it did not exist.
    async fn delete(&mut self, table: &'static str, id: Uuid) -> AppResult<bool>;

    /// Get-or-create the anchor row for `name` and lock it.
    async fn lock_named(&mut self, name: &str, strength: LockStrength) -> AppResult<NamedLock>;

    /// Make every write visible and release every lock.
    async fn commit(self) -> AppResult<()>;

    /// Discard every write and release every lock.
    async fn rollback(self) -> AppResult<()>;
}

/// Column values of one entity, ready to be written by any store.
#[derive(Debug, Clone, PartialEq)]
pub struct RowImage {
    /// Target table.
    pub table: &'static str,
    /// Column names, primary key first.
    pub columns: &'static [&'static str],
    /// Primary key.
    pub id: Uuid,
    /// Serialized values keyed by column.
    pub values: Map<String, Value>,
}

impl RowImage {
    /// Capture the current values of `entity`.
    pub fn of<E: Entity>(entity: &E) -> AppResult<Self> {
        let values = match serde_json::to_value(entity)? {
            Value::Object(map) => map,
            other => {
                return Err(AppError::internal(format!(
                    "{} serialized to a non-object value: {other}",
                    E::TABLE
                )));
            }
        };

        if let Some(missing) = E::COLUMNS.iter().find(|c| !values.contains_key(**c)) {
            return Err(AppError::internal(format!(
                "{} row image is missing column '{missing}'",
                E::TABLE
            )));
        }

        Ok(Self {
            table: E::TABLE,
            columns: E::COLUMNS,
            id: entity.id().into(),
            values,
        })
    }

    /// Columns other than the primary key.
    pub fn value_columns(&self) -> &'static [&'static str] {
        &self.columns[1..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use allotment_entity::ResourcePool;

    #[test]
    fn test_row_image_carries_every_column() {
        let pool = ResourcePool::new("seats", 5);
        let row = RowImage::of(&pool).unwrap();

        assert_eq!(row.table, "resource_pools");
        assert_eq!(row.id, pool.id.into_uuid());
        assert_eq!(row.values["quantity"], Value::from(5));
        assert_eq!(row.value_columns()[0], "name");
        assert!(!row.value_columns().contains(&"id"));
    }
}
