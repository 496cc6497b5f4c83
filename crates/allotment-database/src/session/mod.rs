//! Per-transaction session with an identity map.
//!
//! A [`Session`] owns one store transaction and caches every entity it has
//! read or written, keyed by table and id. Plain reads are served from the
//! cache; [`Session::lock_and_load`] always re-reads under a row lock and
//! overwrites the cached slot, so callers never evaluate business rules
//! against a stale copy.

mod named_lock;

use std::any::Any;
use std::collections::{BTreeSet, HashMap};

use tracing::debug;
use uuid::Uuid;

use allotment_core::config::LockingConfig;
use allotment_core::error::AppError;
use allotment_core::result::AppResult;
use allotment_core::types::LockStrength;
use allotment_entity::Entity;

use crate::store::{RowImage, Store, StoreTransaction};

/// Type-erased view of a cached entity.
trait ManagedEntity: Any + Send + Sync {
    fn row_image(&self) -> AppResult<RowImage>;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<E: Entity> ManagedEntity for E {
    fn row_image(&self) -> AppResult<RowImage> {
        RowImage::of(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

type SlotKey = (&'static str, Uuid);

struct Slot {
    entity: Box<dyn ManagedEntity>,
    /// Changed in memory but not yet written to the transaction.
    dirty: bool,
}

impl Slot {
    fn clean<E: Entity>(entity: E) -> Self {
        Self {
            entity: Box::new(entity),
            dirty: false,
        }
    }
}

fn slot_key<E: Entity>(id: E::Id) -> SlotKey {
    (E::TABLE, id.into())
}

/// Unit of work over one store transaction.
///
/// Every lock taken through the session is held until [`Session::commit`]
/// or [`Session::rollback`], or until the session is dropped, which rolls
/// back.
pub struct Session<T: StoreTransaction> {
    tx: T,
    locking: LockingConfig,
    slots: HashMap<SlotKey, Slot>,
}

impl<T: StoreTransaction> Session<T> {
    /// Open a session over a new transaction of `store`.
    pub async fn begin<S>(store: &S) -> AppResult<Self>
    where
        S: Store<Transaction = T>,
    {
        let tx = store.begin().await?;
        Ok(Self {
            tx,
            locking: store.locking().clone(),
            slots: HashMap::new(),
        })
    }

    /// Lock settings this session enforces.
    pub fn locking(&self) -> &LockingConfig {
        &self.locking
    }

    /// Whether an entity is currently cached.
    pub fn contains<E: Entity>(&self, id: E::Id) -> bool {
        self.slots.contains_key(&slot_key::<E>(id))
    }

    /// Read an entity without locking.
    ///
    /// A cached copy, including any unflushed change to it, wins over the
    /// store.
    pub async fn find<E: Entity>(&mut self, id: E::Id) -> AppResult<Option<E>> {
        if !self.load_if_absent::<E>(id).await? {
            return Ok(None);
        }
        Ok(self.cached::<E>(id).cloned())
    }

    /// Mutable access to a cached (or freshly read) entity.
    ///
    /// The change stays in memory until the next [`Session::flush`].
    pub async fn get_mut<E: Entity>(&mut self, id: E::Id) -> AppResult<Option<&mut E>> {
        if !self.load_if_absent::<E>(id).await? {
            return Ok(None);
        }

        Ok(self.slots.get_mut(&slot_key::<E>(id)).and_then(|slot| {
            slot.dirty = true;
            slot.entity.as_any_mut().downcast_mut::<E>()
        }))
    }

    /// Stage `entity` as the session's copy of an existing row.
    pub fn merge<E: Entity>(&mut self, entity: E) {
        self.slots.insert(
            slot_key::<E>(entity.id()),
            Slot {
                entity: Box::new(entity),
                dirty: true,
            },
        );
    }

    /// Insert a new row and cache it.
    pub async fn persist<E: Entity>(&mut self, entity: E) -> AppResult<()> {
        self.tx.insert(&RowImage::of(&entity)?).await?;
        self.slots
            .insert(slot_key::<E>(entity.id()), Slot::clean(entity));
        Ok(())
    }

    /// Delete a row and drop it from the cache.
    ///
    /// Returns `false` if the row did not exist.
    pub async fn remove<E: Entity>(&mut self, id: E::Id) -> AppResult<bool> {
        self.slots.remove(&slot_key::<E>(id));
        self.tx.delete(E::TABLE, id.into()).await
    }

    /// Drop one entity from the cache, discarding any unflushed change.
    ///
    /// Copies already handed out are unaffected.
    pub fn evict<E: Entity>(&mut self, id: E::Id) {
        self.slots.remove(&slot_key::<E>(id));
    }

    /// Drop every cached entity, discarding unflushed changes.
    pub fn clear(&mut self) {
        self.slots.clear();
    }

    /// Read every row of `E` whose `column` equals `value`, without
    /// locking or caching.
    pub async fn find_by<E: Entity>(
        &mut self,
        column: &'static str,
        value: impl Into<Uuid>,
    ) -> AppResult<Vec<E>> {
        self.tx.select_by::<E>(column, value.into()).await
    }

    /// Read every row of `E`, without locking or caching.
    pub async fn find_all<E: Entity>(&mut self) -> AppResult<Vec<E>> {
        self.tx.select_all::<E>().await
    }

    /// Write every dirty entity to the transaction.
    ///
    /// Rows are written in table and id order. A dirty entity whose row
    /// no longer exists fails with a conflict.
    pub async fn flush(&mut self) -> AppResult<()> {
        let mut dirty: Vec<SlotKey> = self
            .slots
            .iter()
            .filter(|(_, slot)| slot.dirty)
            .map(|(key, _)| *key)
            .collect();
        dirty.sort();

        for key in dirty {
            let Some(slot) = self.slots.get(&key) else {
                continue;
            };
            let row = slot.entity.row_image()?;

            if !self.tx.update(&row).await? {
                return Err(AppError::conflict(format!(
                    "Cannot flush {} '{}': the row no longer exists",
                    key.0, key.1
                )));
            }

            if let Some(slot) = self.slots.get_mut(&key) {
                slot.dirty = false;
            }
        }

        if !self.slots.is_empty() {
            debug!(cached = self.slots.len(), "Session flushed");
        }
        Ok(())
    }

    /// Flush and commit, releasing every lock.
    pub async fn commit(mut self) -> AppResult<()> {
        self.flush().await?;
        self.tx.commit().await
    }

    /// Discard everything and release every lock.
    pub async fn rollback(self) -> AppResult<()> {
        self.tx.rollback().await
    }

    /// Lock rows of `E` without touching the cache.
    ///
    /// Rows are locked in ascending id order. Returns how many of the ids
    /// exist.
    pub async fn lock<E: Entity>(
        &mut self,
        ids: &[E::Id],
        strength: LockStrength,
    ) -> AppResult<usize> {
        let ordered = self.ordered_batch(ids)?;
        let mut locked = 0;

        for chunk in ordered.chunks(self.locking.in_block_size) {
            locked += self
                .tx
                .select::<E>(chunk, Some(strength))
                .await?
                .len();
        }
        Ok(locked)
    }

    /// Exclusively lock one row and return its authoritative values.
    ///
    /// See [`Session::lock_and_load_with`].
    pub async fn lock_and_load<E: Entity>(&mut self, id: E::Id) -> AppResult<Option<E>> {
        self.lock_and_load_with(id, LockStrength::ExclusiveWrite)
            .await
    }

    /// Lock one row and return its values as read under the lock.
    ///
    /// The cached copy is overwritten with the fresh values, discarding
    /// unflushed changes; changes already flushed in this transaction are
    /// part of what is read. Returns `None` if the row does not exist.
    pub async fn lock_and_load_with<E: Entity>(
        &mut self,
        id: E::Id,
        strength: LockStrength,
    ) -> AppResult<Option<E>> {
        let mut loaded = self
            .lock_and_load_many_with::<E>(&[id], strength)
            .await?;
        Ok(loaded.pop())
    }

    /// Exclusively lock many rows and return their authoritative values.
    ///
    /// See [`Session::lock_and_load_many_with`].
    pub async fn lock_and_load_many<E: Entity>(&mut self, ids: &[E::Id]) -> AppResult<Vec<E>> {
        self.lock_and_load_many_with(ids, LockStrength::ExclusiveWrite)
            .await
    }

    /// Lock many rows and return their values as read under the lock.
    ///
    /// Ids are de-duplicated and locked in ascending order. Ids whose row
    /// does not exist are omitted from the result and evicted from the
    /// cache. More than `locking.max_batch_ids` ids is rejected before
    /// any query runs.
    pub async fn lock_and_load_many_with<E: Entity>(
        &mut self,
        ids: &[E::Id],
        strength: LockStrength,
    ) -> AppResult<Vec<E>> {
        let ordered = self.ordered_batch(ids)?;
        if ordered.is_empty() {
            return Ok(Vec::new());
        }

        debug!(
            table = E::TABLE,
            count = ordered.len(),
            %strength,
            "Lock-and-load"
        );

        let mut loaded = Vec::with_capacity(ordered.len());
        for chunk in ordered.chunks(self.locking.in_block_size) {
            loaded.extend(self.tx.select::<E>(chunk, Some(strength)).await?);
        }

        let mut missing: BTreeSet<Uuid> = ordered.into_iter().collect();
        for entity in &loaded {
            let key = slot_key::<E>(entity.id());
            missing.remove(&key.1);
            self.slots.insert(key, Slot::clean(entity.clone()));
        }
        for id in missing {
            self.slots.remove(&(E::TABLE, id));
        }

        Ok(loaded)
    }

    /// Validate a batch and return its distinct ids in ascending order.
    fn ordered_batch<I: Into<Uuid> + Copy>(&self, ids: &[I]) -> AppResult<Vec<Uuid>> {
        if ids.len() > self.locking.max_batch_ids {
            return Err(AppError::invalid_argument(
                "ids",
                format!(
                    "{} identifiers exceeds the limit of {}",
                    ids.len(),
                    self.locking.max_batch_ids
                ),
            ));
        }

        let ordered: BTreeSet<Uuid> = ids.iter().map(|id| (*id).into()).collect();
        Ok(ordered.into_iter().collect())
    }

    fn cached<E: Entity>(&self, id: E::Id) -> Option<&E> {
        self.slots
            .get(&slot_key::<E>(id))
            .and_then(|slot| slot.entity.as_any().downcast_ref::<E>())
    }

    /// Ensure `id` is cached, reading it if needed. Returns whether it exists.
    async fn load_if_absent<E: Entity>(&mut self, id: E::Id) -> AppResult<bool> {
        if self.contains::<E>(id) {
            return Ok(true);
        }

        match self.tx.select::<E>(&[id.into()], None).await?.pop() {
            Some(entity) => {
                self.slots.insert(slot_key::<E>(id), Slot::clean(entity));
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
