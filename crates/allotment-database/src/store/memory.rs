//! In-memory store.
//!
//! Behaves like PostgreSQL at READ COMMITTED for the operations the
//! session uses: plain reads never block and see committed rows plus the
//! reader's own writes; locked reads and writes take shared or exclusive
//! row locks that are held until the transaction ends; a lock that cannot
//! be granted within the configured wait fails with
//! [`ErrorKind::LockTimeout`](allotment_core::error::ErrorKind::LockTimeout).
//!
//! Locks are keyed by `(table, key)` and exist independently of the row,
//! so a named lock can be taken before its anchor row is created.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use allotment_core::config::LockingConfig;
use allotment_core::error::AppError;
use allotment_core::result::AppResult;
use allotment_core::types::LockStrength;
use allotment_entity::lock::NAMED_LOCK_TABLE;
use allotment_entity::{Entity, NamedLock};

use super::{RowImage, Store, StoreTransaction};

type TxId = u64;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct RowKey {
    table: &'static str,
    key: String,
}

impl RowKey {
    fn new(table: &'static str, key: impl Into<String>) -> Self {
        Self {
            table,
            key: key.into(),
        }
    }
}

/// Holders of one row lock.
#[derive(Debug, Default)]
struct RowLock {
    exclusive: Option<TxId>,
    shared: HashSet<TxId>,
}

impl RowLock {
    fn held_by(&self, tx: TxId) -> Option<LockStrength> {
        if self.exclusive == Some(tx) {
            Some(LockStrength::ExclusiveWrite)
        } else if self.shared.contains(&tx) {
            Some(LockStrength::SharedRead)
        } else {
            None
        }
    }

    /// Strongest lock held by any transaction other than `tx`.
    fn held_by_others(&self, tx: TxId) -> Option<LockStrength> {
        if self.exclusive.is_some_and(|holder| holder != tx) {
            Some(LockStrength::ExclusiveWrite)
        } else if self.shared.iter().any(|holder| *holder != tx) {
            Some(LockStrength::SharedRead)
        } else {
            None
        }
    }

    /// Grant `strength` to `tx` if no other holder conflicts.
    ///
    /// Reentrant: a holder asking again keeps the stronger of its old and
    /// new strength, so a sole shared holder may upgrade to exclusive.
    fn try_grant(&mut self, tx: TxId, strength: LockStrength) -> bool {
        if let Some(other) = self.held_by_others(tx) {
            if !other.compatible_with(strength) {
                return false;
            }
        }

        let granted = match self.held_by(tx) {
            Some(held) => held.max(strength),
            None => strength,
        };

        match granted {
            LockStrength::SharedRead => {
                self.shared.insert(tx);
            }
            LockStrength::ExclusiveWrite => {
                self.shared.remove(&tx);
                self.exclusive = Some(tx);
            }
        }
        true
    }

    fn release(&mut self, tx: TxId) {
        if self.exclusive == Some(tx) {
            self.exclusive = None;
        }
        self.shared.remove(&tx);
    }

    fn is_free(&self) -> bool {
        self.exclusive.is_none() && self.shared.is_empty()
    }
}

#[derive(Debug, Default)]
struct State {
    tables: HashMap<&'static str, BTreeMap<String, Value>>,
    locks: HashMap<RowKey, RowLock>,
}

impl State {
    fn committed(&self, key: &RowKey) -> Option<&Value> {
        self.tables.get(key.table).and_then(|rows| rows.get(&key.key))
    }
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<State>,
    released: Notify,
    next_tx: AtomicU64,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, State> {
        // Critical sections never panic mid-update, so a poisoned guard
        // still holds consistent data.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Store that keeps every table in process memory.
///
/// Clones share the same data, so one store can be handed to many
/// concurrent tasks.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    shared: Arc<Shared>,
    locking: LockingConfig,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new(locking: LockingConfig) -> Self {
        Self {
            shared: Arc::new(Shared::default()),
            locking,
        }
    }

    /// Number of row locks currently held by any transaction.
    pub fn held_lock_count(&self) -> usize {
        self.shared.state().locks.len()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(LockingConfig::default())
    }
}

#[async_trait]
impl Store for MemoryStore {
    type Transaction = MemoryTransaction;

    async fn begin(&self) -> AppResult<MemoryTransaction> {
        let id = self.shared.next_tx.fetch_add(1, Ordering::Relaxed);
        debug!(tx = id, "Beginning in-memory transaction");

        Ok(MemoryTransaction {
            id,
            shared: Arc::clone(&self.shared),
            lock_wait: self.locking.lock_wait_timeout(),
            held: HashSet::new(),
            writes: HashMap::new(),
            finished: false,
        })
    }

    fn locking(&self) -> &LockingConfig {
        &self.locking
    }
}

/// An open in-memory transaction. Dropping it rolls back.
#[derive(Debug)]
pub struct MemoryTransaction {
    id: TxId,
    shared: Arc<Shared>,
    lock_wait: Duration,
    held: HashSet<RowKey>,
    /// Uncommitted writes; `None` marks a delete.
    writes: HashMap<RowKey, Option<Value>>,
    finished: bool,
}

impl MemoryTransaction {
    /// Block until `strength` is granted on `key` or the wait expires.
    ///
    /// Returns whether the key was not held by this transaction before.
    async fn acquire(&mut self, key: &RowKey, strength: LockStrength) -> AppResult<bool> {
        let newly_held = !self.held.contains(key);
        let shared = Arc::clone(&self.shared);
        let deadline = Instant::now() + self.lock_wait;

        loop {
            // Register for wakeups before checking, so a release between
            // the check and the wait is not missed.
            let released = shared.released.notified();

            let granted = {
                let mut state = shared.state();
                state
                    .locks
                    .entry(key.clone())
                    .or_default()
                    .try_grant(self.id, strength)
            };

            if granted {
                self.held.insert(key.clone());
                return Ok(newly_held);
            }

            if tokio::time::timeout_at(deadline, released).await.is_err() {
                warn!(
                    tx = self.id,
                    table = key.table,
                    key = %key.key,
                    %strength,
                    "Lock wait timed out"
                );
                return Err(AppError::lock_timeout(format!(
                    "Timed out after {}ms waiting for {strength} lock on {} '{}'",
                    self.lock_wait.as_millis(),
                    key.table,
                    key.key
                )));
            }
        }
    }

    /// Drop this transaction's hold on `key`.
    fn release(&mut self, key: &RowKey) {
        self.held.remove(key);
        {
            let mut state = self.shared.state();
            if let Some(lock) = state.locks.get_mut(key) {
                lock.release(self.id);
                if lock.is_free() {
                    state.locks.remove(key);
                }
            }
        }
        self.shared.released.notify_waiters();
    }

    /// The row as this transaction sees it.
    fn visible(&self, key: &RowKey) -> Option<Value> {
        if let Some(pending) = self.writes.get(key) {
            return pending.clone();
        }
        self.shared.state().committed(key).cloned()
    }

    /// Every visible row of `table`, ordered by key.
    fn visible_table(&self, table: &'static str) -> BTreeMap<String, Value> {
        let mut rows = self
            .shared
            .state()
            .tables
            .get(table)
            .cloned()
            .unwrap_or_default();

        for (key, pending) in self.writes.iter().filter(|(key, _)| key.table == table) {
            match pending {
                Some(value) => {
                    rows.insert(key.key.clone(), value.clone());
                }
                None => {
                    rows.remove(&key.key);
                }
            }
        }

        rows
    }

    fn finish(&mut self, apply: bool) {
        if self.finished {
            return;
        }
        self.finished = true;

        {
            let mut state = self.shared.state();

            if apply {
                for (key, pending) in self.writes.drain() {
                    let rows = state.tables.entry(key.table).or_default();
                    match pending {
                        Some(value) => {
                            rows.insert(key.key, value);
                        }
                        None => {
                            rows.remove(&key.key);
                        }
                    }
                }
            } else {
                self.writes.clear();
            }

            for key in self.held.drain() {
                if let Some(lock) = state.locks.get_mut(&key) {
                    lock.release(self.id);
                    if lock.is_free() {
                        state.locks.remove(&key);
                    }
                }
            }
        }

        self.shared.released.notify_waiters();
        debug!(tx = self.id, committed = apply, "In-memory transaction finished");
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        self.finish(false);
    }
}

fn decode<E: Entity>(value: Value) -> AppResult<E> {
    serde_json::from_value(value).map_err(AppError::from)
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn select<E: Entity>(
        &mut self,
        ids: &[Uuid],
        lock: Option<LockStrength>,
    ) -> AppResult<Vec<E>> {
        let mut keys: Vec<RowKey> = ids
            .iter()
            .map(|id| RowKey::new(E::TABLE, id.to_string()))
            .collect();
        keys.sort();
        keys.dedup();

        let mut rows = Vec::with_capacity(keys.len());
        for key in &keys {
            let newly_held = match lock {
                Some(strength) => self.acquire(key, strength).await?,
                None => false,
            };

            match self.visible(key) {
                Some(value) => rows.push(decode::<E>(value)?),
                // Nothing to lock: like PostgreSQL, a locked read of a
                // missing row leaves no lock behind.
                None if newly_held => self.release(key),
                None => {}
            }
        }

        Ok(rows)
    }

    async fn select_by<E: Entity>(
        &mut self,
        column: &'static str,
        value: Uuid,
    ) -> AppResult<Vec<E>> {
        let wanted = Value::String(value.to_string());

        self.visible_table(E::TABLE)
            .into_values()
            .filter(|row| row.get(column) == Some(&wanted))
            .map(decode::<E>)
            .collect()
    }

    async fn select_all<E: Entity>(&mut self) -> AppResult<Vec<E>> {
        self.visible_table(E::TABLE)
            .into_values()
            .map(decode::<E>)
            .collect()
    }

    async fn insert(&mut self, row: &RowImage) -> AppResult<()> {
        let key = RowKey::new(row.table, row.id.to_string());
        self.acquire(&key, LockStrength::ExclusiveWrite).await?;

        if self.visible(&key).is_some() {
            return Err(AppError::conflict(format!(
                "Duplicate key: {} row '{}' already exists",
                row.table, row.id
            )));
        }

        self.writes
            .insert(key, Some(Value::Object(row.values.clone())));
        Ok(())
    }

    async fn update(&mut self, row: &RowImage) -> AppResult<bool> {
        let key = RowKey::new(row.table, row.id.to_string());
        let newly_held = self.acquire(&key, LockStrength::ExclusiveWrite).await?;

        if self.visible(&key).is_none() {
            if newly_held {
                self.release(&key);
            }
            return Ok(false);
        }

        self.writes
            .insert(key, Some(Value::Object(row.values.clone())));
        Ok(true)
    }

    async fn delete(&mut self, table: &'static str, id: Uuid) -> AppResult<bool> {
        let key = RowKey::new(table, id.to_string());
        let newly_held = self.acquire(&key, LockStrength::ExclusiveWrite).await?;

        if self.visible(&key).is_none() {
            if newly_held {
                self.release(&key);
            }
            return Ok(false);
        }

        self.writes.insert(key, None);
        Ok(true)
    }

    async fn lock_named(&mut self, name: &str, strength: LockStrength) -> AppResult<NamedLock> {
        let key = RowKey::new(NAMED_LOCK_TABLE, name);
        self.acquire(&key, strength).await?;

        if let Some(existing) = self.visible(&key) {
            return serde_json::from_value(existing).map_err(AppError::from);
        }

        let anchor = NamedLock::new(name);
        self.writes
            .insert(key, Some(serde_json::to_value(&anchor)?));
        Ok(anchor)
    }

    async fn commit(self) -> AppResult<()> {
        let mut tx = self;
        tx.finish(true);
        Ok(())
    }

    async fn rollback(self) -> AppResult<()> {
        let mut tx = self;
        tx.finish(false);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use allotment_core::error::ErrorKind;
    use allotment_entity::ResourcePool;

    fn quick_store() -> MemoryStore {
        MemoryStore::new(LockingConfig {
            lock_wait_timeout_ms: 50,
            ..LockingConfig::default()
        })
    }

    async fn seed(store: &MemoryStore, pool: &ResourcePool) {
        let mut tx = store.begin().await.unwrap();
        tx.insert(&RowImage::of(pool).unwrap()).await.unwrap();
        tx.commit().await.unwrap();
    }

    #[test]
    fn test_row_lock_grants() {
        let mut lock = RowLock::default();
        assert!(lock.try_grant(1, LockStrength::SharedRead));
        assert!(lock.try_grant(2, LockStrength::SharedRead));
        assert!(!lock.try_grant(1, LockStrength::ExclusiveWrite));

        lock.release(2);
        assert!(lock.try_grant(1, LockStrength::ExclusiveWrite));
        assert!(lock.try_grant(1, LockStrength::SharedRead));
        assert!(!lock.try_grant(2, LockStrength::SharedRead));

        lock.release(1);
        assert!(lock.is_free());
    }

    #[tokio::test]
    async fn test_uncommitted_writes_are_private() {
        let store = quick_store();
        let pool = ResourcePool::new("seats", 2);

        let mut writer = store.begin().await.unwrap();
        writer.insert(&RowImage::of(&pool).unwrap()).await.unwrap();

        let mut reader = store.begin().await.unwrap();
        let seen: Vec<ResourcePool> = reader.select(&[pool.id.into_uuid()], None).await.unwrap();
        assert!(seen.is_empty());

        writer.commit().await.unwrap();
        let seen: Vec<ResourcePool> = reader.select(&[pool.id.into_uuid()], None).await.unwrap();
        assert_eq!(seen, vec![pool]);
    }

    #[tokio::test]
    async fn test_rollback_discards_writes() {
        let store = quick_store();
        let pool = ResourcePool::new("seats", 2);

        let mut tx = store.begin().await.unwrap();
        tx.insert(&RowImage::of(&pool).unwrap()).await.unwrap();
        tx.rollback().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let all: Vec<ResourcePool> = tx.select_all().await.unwrap();
        assert!(all.is_empty());
        assert_eq!(store.held_lock_count(), 0);
    }

    #[tokio::test]
    async fn test_exclusive_lock_times_out_second_locker() {
        let store = quick_store();
        let pool = ResourcePool::new("seats", 2);
        seed(&store, &pool).await;
        let ids = [pool.id.into_uuid()];

        let mut first = store.begin().await.unwrap();
        let _: Vec<ResourcePool> = first
            .select(&ids, Some(LockStrength::ExclusiveWrite))
            .await
            .unwrap();

        let mut second = store.begin().await.unwrap();
        let err = second
            .select::<ResourcePool>(&ids, Some(LockStrength::SharedRead))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::LockTimeout);
        assert!(err.is_retryable());

        // Plain reads never wait.
        let plain: Vec<ResourcePool> = second.select(&ids, None).await.unwrap();
        assert_eq!(plain.len(), 1);
    }

    #[tokio::test]
    async fn test_shared_locks_coexist() {
        let store = quick_store();
        let pool = ResourcePool::new("seats", 2);
        seed(&store, &pool).await;
        let ids = [pool.id.into_uuid()];

        let mut first = store.begin().await.unwrap();
        let mut second = store.begin().await.unwrap();
        let a: Vec<ResourcePool> = first.select(&ids, Some(LockStrength::SharedRead)).await.unwrap();
        let b: Vec<ResourcePool> = second.select(&ids, Some(LockStrength::SharedRead)).await.unwrap();
        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 1);

        let err = second.update(&RowImage::of(&pool).unwrap()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::LockTimeout);
    }

    #[tokio::test]
    async fn test_waiter_proceeds_after_commit() {
        let store = MemoryStore::default();
        let pool = ResourcePool::new("seats", 2);
        seed(&store, &pool).await;
        let ids = [pool.id.into_uuid()];

        let mut holder = store.begin().await.unwrap();
        let mut locked: Vec<ResourcePool> = holder
            .select(&ids, Some(LockStrength::ExclusiveWrite))
            .await
            .unwrap();

        let waiter_store = store.clone();
        let waiter = tokio::spawn(async move {
            let mut tx = waiter_store.begin().await.unwrap();
            let rows: Vec<ResourcePool> = tx
                .select(&ids, Some(LockStrength::ExclusiveWrite))
                .await
                .unwrap();
            rows[0].consumed
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        locked[0].set_consumed(1);
        holder.update(&RowImage::of(&locked[0]).unwrap()).await.unwrap();
        holder.commit().await.unwrap();

        assert_eq!(waiter.await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_locked_read_of_missing_row_holds_nothing() {
        let store = quick_store();
        let mut tx = store.begin().await.unwrap();
        let rows: Vec<ResourcePool> = tx
            .select(&[Uuid::new_v4()], Some(LockStrength::ExclusiveWrite))
            .await
            .unwrap();
        assert!(rows.is_empty());
        assert_eq!(store.held_lock_count(), 0);
    }

    #[tokio::test]
    async fn test_dropped_transaction_releases_locks() {
        let store = quick_store();
        let pool = ResourcePool::new("seats", 2);
        seed(&store, &pool).await;

        {
            let mut tx = store.begin().await.unwrap();
            let _: Vec<ResourcePool> = tx
                .select(&[pool.id.into_uuid()], Some(LockStrength::ExclusiveWrite))
                .await
                .unwrap();
            assert_eq!(store.held_lock_count(), 1);
        }

        assert_eq!(store.held_lock_count(), 0);
    }
}
