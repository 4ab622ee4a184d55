use std::fmt::Debug;

use async_trait::async_trait;
use parley_common::{MessageUnit, UnitId, message::Payload};

/// Persistence contract used by the processing state store
///
/// Implementations own the `version` counter of every unit. A unit is saved
/// with [`BackingStore::update`] only if its version still matches the stored
/// one; otherwise the stored copy is returned in [`crate::StoreError::Conflict`].
#[async_trait]
pub trait BackingStore: Send + Sync + Debug {
    /// Insert a new unit
    ///
    /// Assigns the `core_id`, sets the version to 1 and the owner of every
    /// payload to the new id.
    ///
    /// # Errors
    /// [`crate::StoreError::DuplicateId`] if the unit is outgoing and another
    /// outgoing unit already uses its message id, or any storage failure
    async fn write(&self, unit: &mut MessageUnit) -> crate::Result<UnitId>;

    /// List the ids of all stored units, oldest first
    async fn list(&self) -> crate::Result<Vec<UnitId>>;

    /// Read a unit
    async fn read(&self, id: &UnitId) -> crate::Result<MessageUnit>;

    /// Save a changed unit if nobody else changed it since it was read
    ///
    /// On success the version of `unit` is advanced to the stored one.
    ///
    /// # Errors
    /// [`crate::StoreError::Conflict`] with the stored copy when the stored
    /// version differs from `unit.version()`
    async fn update(&self, unit: &mut MessageUnit) -> crate::Result<()>;

    async fn delete(&self, id: &UnitId) -> crate::Result<()>;

    /// Replace the metadata of a stored payload
    ///
    /// The payload is located by its owner and content id. Does not touch the
    /// owning unit's version.
    async fn update_payload(&self, payload: &Payload) -> crate::Result<()>;
}

/// Stamp a unit that is about to be inserted under `id`
pub(crate) fn prepare_insert(unit: &mut MessageUnit, id: UnitId) {
    unit.set_core_id(id);
    unit.set_version(1);
    if let Some(payloads) = unit.payloads_mut() {
        for payload in payloads {
            payload.owner = Some(id);
        }
    }
}

/// Stored copy of `unit` if it replaced `payload`, or `None` when `unit`
/// holds no payload with the same content id
pub(crate) fn with_payload(unit: &MessageUnit, payload: &Payload) -> Option<MessageUnit> {
    let mut unit = unit.clone();
    let slot = unit
        .payloads_mut()?
        .iter_mut()
        .find(|existing| existing.content_id == payload.content_id)?;
    *slot = payload.clone();
    Some(unit)
}
