//! Processing state store
//!
//! The single authority for changing a message unit's processing state. Every
//! change goes through the backing store's version check, so a change based on
//! a stale copy of a unit is never applied.

use std::sync::Arc;

use chrono::Utc;
use parley_common::{
    Direction, MessageUnit, ProcessingState, UnitId, UnitKind, incoming,
    message::Payload,
    outgoing,
    pmode::Label,
    tracing::{debug, error, trace},
};

use crate::{StoreError, r#trait::BackingStore};

#[derive(Debug, Clone)]
pub struct ProcessingStateStore {
    backend: Arc<dyn BackingStore>,
    /// Right-hand side of generated message ids
    host_name: Arc<str>,
}

impl ProcessingStateStore {
    #[must_use]
    pub fn new(backend: Arc<dyn BackingStore>, host_name: impl Into<Arc<str>>) -> Self {
        Self {
            backend,
            host_name: host_name.into(),
        }
    }

    pub fn backend(&self) -> &Arc<dyn BackingStore> {
        &self.backend
    }

    pub fn host_name(&self) -> &str {
        &self.host_name
    }

    /// Store a unit received from a trading partner
    ///
    /// A unit without any state starts out as `Received`.
    ///
    /// # Errors
    /// Any storage failure. Incoming units may repeat a message id, so a
    /// duplicate report from the backend is an internal error.
    pub async fn record_incoming(&self, mut unit: MessageUnit) -> crate::Result<MessageUnit> {
        unit.set_direction(Direction::In);
        if unit.current_state().is_none() {
            unit.push_state(ProcessingState::Received, None);
        }

        match self.backend.write(&mut unit).await {
            Ok(id) => {
                incoming!(level = DEBUG, "Stored {unit} as {id}");
                Ok(unit)
            }
            Err(StoreError::DuplicateId(message_id)) => {
                error!(
                    message_id = %message_id,
                    "Backing store reported a duplicate id for an incoming unit"
                );
                Err(StoreError::Internal(format!(
                    "Duplicate id reported for incoming unit {message_id}"
                )))
            }
            Err(e) => {
                error!(message_id = %unit.message_id(), error = %e, "Failed to store incoming unit");
                Err(e)
            }
        }
    }

    /// Store a unit created locally for sending
    ///
    /// User messages and pull requests start as `Submitted`, signals as
    /// `Created`. A missing message id or timestamp is generated.
    ///
    /// # Errors
    /// [`StoreError::DuplicateId`] if another outgoing unit already uses the
    /// message id, or any storage failure
    pub async fn record_outgoing(&self, mut unit: MessageUnit) -> crate::Result<MessageUnit> {
        unit.set_direction(Direction::Out);

        let initial = match unit.kind() {
            UnitKind::UserMessage(_) | UnitKind::PullRequest(_) => ProcessingState::Submitted,
            UnitKind::Receipt(_) | UnitKind::ErrorSignal(_) => ProcessingState::Created,
        };
        unit.push_state(initial, None);

        if unit.message_id().is_empty() {
            unit.set_message_id(MessageUnit::generate_message_id(&self.host_name));
        }
        if unit.timestamp().is_none() {
            unit.set_timestamp(Utc::now());
        }

        let id = self.backend.write(&mut unit).await?;
        outgoing!(level = DEBUG, "Stored {unit} as {id}");

        Ok(unit)
    }

    /// Move a unit to `state`
    ///
    /// Returns `false` when another party changed the unit's state since
    /// `unit` was read. `unit` is then refreshed to the stored copy and
    /// nothing was applied. On success `unit` holds the new state.
    ///
    /// # Errors
    /// - [`StoreError::Conflict`] when the stored copy changed but its state
    ///   did not, which means the storage layer is inconsistent
    /// - Any other storage failure
    pub async fn set_state(
        &self,
        unit: &mut MessageUnit,
        state: ProcessingState,
        description: Option<&str>,
    ) -> crate::Result<bool> {
        let before = unit.current_state();

        let mut changed = unit.clone();
        changed.push_state(state, description.map(str::to_string));

        match self.backend.update(&mut changed).await {
            Ok(()) => {
                trace!(
                    message_id = %unit.message_id(),
                    from = ?before,
                    to = %state,
                    "Processing state changed"
                );
                *unit = changed;
                Ok(true)
            }
            Err(StoreError::Conflict(stored)) => {
                *unit = *stored;
                if unit.current_state() == before {
                    error!(
                        message_id = %unit.message_id(),
                        state = ?before,
                        "Stored unit changed without a state change"
                    );
                    return Err(StoreError::Conflict(Box::new(unit.clone())));
                }

                debug!(
                    message_id = %unit.message_id(),
                    expected = ?before,
                    found = ?unit.current_state(),
                    requested = %state,
                    "Processing state was changed concurrently"
                );
                Ok(false)
            }
            Err(e) => {
                error!(
                    message_id = %unit.message_id(),
                    requested = %state,
                    error = %e,
                    "Failed to change processing state"
                );
                Err(e)
            }
        }
    }

    /// Set the P-Mode governing a unit
    ///
    /// # Errors
    /// [`StoreError::Conflict`] if the unit changed since it was read, or any
    /// storage failure
    pub async fn assign_pmode(&self, unit: &mut MessageUnit, pmode_id: &str) -> crate::Result<()> {
        let mut changed = unit.clone();
        changed.set_pmode_id(pmode_id);
        self.save(unit, changed).await
    }

    /// Set both the leg and the P-Mode of a unit
    ///
    /// Error signals can learn their leg independently of when their P-Mode
    /// is resolved.
    ///
    /// # Errors
    /// [`StoreError::Conflict`] if the unit changed since it was read, or any
    /// storage failure
    pub async fn assign_leg_and_pmode(
        &self,
        unit: &mut MessageUnit,
        pmode_id: &str,
        leg: Label,
    ) -> crate::Result<()> {
        let mut changed = unit.clone();
        changed.set_pmode_id(pmode_id);
        changed.set_leg(leg);
        self.save(unit, changed).await
    }

    async fn save(&self, unit: &mut MessageUnit, mut changed: MessageUnit) -> crate::Result<()> {
        self.backend.update(&mut changed).await?;
        *unit = changed;
        Ok(())
    }

    /// Read the stored copy of a unit
    ///
    /// # Errors
    /// [`StoreError::NotFound`] or any storage failure
    pub async fn get(&self, id: &UnitId) -> crate::Result<MessageUnit> {
        self.backend.read(id).await
    }

    /// Remove a unit from storage
    ///
    /// # Errors
    /// Any storage failure, or an internal error if the unit was never stored
    pub async fn delete(&self, unit: &MessageUnit) -> crate::Result<()> {
        let id = unit.core_id().ok_or_else(|| {
            StoreError::Internal(format!("{unit} was never written to the store"))
        })?;
        self.backend.delete(&id).await
    }

    /// Save changed payload metadata
    ///
    /// # Errors
    /// Any storage failure
    pub async fn update_payload_metadata(&self, payload: &Payload) -> crate::Result<()> {
        self.backend.update_payload(payload).await
    }
}
