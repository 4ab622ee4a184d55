use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
};

use async_trait::async_trait;
use parley_common::{Direction, MessageUnit, UnitId, message::Payload};

use crate::{
    StoreError,
    r#trait::{BackingStore, prepare_insert, with_payload},
};

#[derive(Debug, Default)]
pub(crate) struct Units {
    pub(crate) units: HashMap<UnitId, MessageUnit>,
    /// Message ids of stored outgoing units
    outgoing: HashMap<String, UnitId>,
}

/// In-memory backing store implementation
///
/// Units live in a `HashMap` behind an `RwLock`. The version check and the
/// replacement happen under the same write guard, so updates are atomic.
///
/// # Capacity Management
/// The store can be configured with a maximum number of units. When it is
/// reached, writes fail until units are deleted.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackingStore {
    pub(crate) units: Arc<RwLock<Units>>,
    /// Maximum number of units to store (None = unlimited)
    capacity: Option<usize>,
}

impl MemoryBackingStore {
    /// Create a new empty memory-backed store with unlimited capacity
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new memory-backed store with a capacity limit
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            units: Arc::default(),
            capacity: Some(capacity),
        }
    }

    /// Get the current number of stored units
    ///
    /// Recovers gracefully if the lock is poisoned by accessing the underlying data.
    #[must_use]
    pub fn len(&self) -> usize {
        self.units
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .units
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get the configured capacity (None = unlimited)
    #[must_use]
    pub const fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    pub(crate) fn clear(&self) {
        *self.units.write().unwrap_or_else(PoisonError::into_inner) = Units::default();
    }
}

#[async_trait]
impl BackingStore for MemoryBackingStore {
    async fn write(&self, unit: &mut MessageUnit) -> crate::Result<UnitId> {
        let id = UnitId::generate();
        let mut stored = self.units.write()?;

        if let Some(cap) = self.capacity
            && stored.units.len() >= cap
        {
            return Err(StoreError::Internal(format!(
                "Memory store capacity exceeded: {}/{cap} units",
                stored.units.len()
            )));
        }

        let outgoing = unit.direction() == Direction::Out;
        if outgoing && stored.outgoing.contains_key(unit.message_id()) {
            return Err(StoreError::DuplicateId(unit.message_id().to_string()));
        }

        prepare_insert(unit, id);
        if outgoing {
            stored.outgoing.insert(unit.message_id().to_string(), id);
        }
        stored.units.insert(id, unit.clone());

        Ok(id)
    }

    async fn list(&self) -> crate::Result<Vec<UnitId>> {
        let mut ids: Vec<_> = self.units.read()?.units.keys().copied().collect();

        // ULIDs are lexicographically sortable by creation time
        ids.sort();

        Ok(ids)
    }

    async fn read(&self, id: &UnitId) -> crate::Result<MessageUnit> {
        self.units
            .read()?
            .units
            .get(id)
            .cloned()
            .ok_or(StoreError::NotFound(*id))
    }

    async fn update(&self, unit: &mut MessageUnit) -> crate::Result<()> {
        let id = unit.core_id().ok_or_else(|| {
            StoreError::Internal(format!("{unit} was never written to the store"))
        })?;

        let mut stored = self.units.write()?;
        let current = stored.units.get_mut(&id).ok_or(StoreError::NotFound(id))?;

        if current.version() != unit.version() {
            return Err(StoreError::Conflict(Box::new(current.clone())));
        }

        unit.set_version(unit.version() + 1);
        *current = unit.clone();

        Ok(())
    }

    async fn delete(&self, id: &UnitId) -> crate::Result<()> {
        let mut stored = self.units.write()?;
        let unit = stored.units.remove(id).ok_or(StoreError::NotFound(*id))?;

        if stored.outgoing.get(unit.message_id()) == Some(id) {
            stored.outgoing.remove(unit.message_id());
        }

        Ok(())
    }

    async fn update_payload(&self, payload: &Payload) -> crate::Result<()> {
        let not_found = || StoreError::PayloadNotFound(payload.content_id.clone());
        let owner = payload.owner.ok_or_else(not_found)?;

        let mut stored = self.units.write()?;
        let unit = stored.units.get_mut(&owner).ok_or_else(not_found)?;
        *unit = with_payload(unit, payload).ok_or_else(not_found)?;

        Ok(())
    }
}
