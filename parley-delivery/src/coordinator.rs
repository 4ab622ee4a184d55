//! Delivery coordinator
//!
//! Decides whether a message unit must be handed to the business application,
//! hands it over with the right delivery method and records the outcome:
//!
//! 1. Check the unit has a known P-Mode and is ready for delivery
//! 2. Resolve the delivery spec ([`resolve_delivery_spec`])
//! 3. Claim the unit by moving it to `OutForDelivery`
//! 4. Get the method from the cache, or build and cache it
//! 5. Deliver inline, or dispatch and finish on a background task
//! 6. Record the outcome and raise a lifecycle event ([`OutcomeHandler`])
//!
//! Step 3 is what makes concurrent calls for the same unit safe: only one
//! caller can win the state change, every other caller gets
//! [`CoordinatorError::AlreadyInProcess`].

use std::{
    panic::{AssertUnwindSafe, catch_unwind},
    sync::Arc,
};

use parley_common::{
    MessageUnit, ProcessingState, internal,
    event::{EventProcessor, ProcessingEvent},
    pmode::{DeliverySpec, PolicySet},
    tracing::{debug, error, info, warn},
};
use parley_store::{ProcessingStateStore, StoreError};
use serde::{Deserialize, Serialize};

use crate::{
    cache::DeliveryMethodCache,
    error::{CoordinatorError, DeliveryError, SystemError, TemporaryError},
    method::{DeliveryMethod, DeliveryMethodFactory},
    policy::resolve_delivery_spec,
    registry::{FactoryRegistry, SpecRegistry},
};

const fn default_max_cached_methods() -> Option<i64> {
    Some(64)
}

/// How `deliver` decides a unit is ready
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ReadinessCheck {
    /// The current state must be `ReadyForDelivery`
    #[default]
    CurrentState,
    /// Any entry of the state history may be `ReadyForDelivery`
    History,
}

impl ReadinessCheck {
    pub fn is_ready(self, unit: &MessageUnit) -> bool {
        match self {
            Self::CurrentState => unit.current_state() == Some(ProcessingState::ReadyForDelivery),
            Self::History => unit.has_been_in(ProcessingState::ReadyForDelivery),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Maximum number of cached delivery methods; `None` or `<= 0` disables
    /// caching
    #[serde(default = "default_max_cached_methods")]
    pub max_cached_methods: Option<i64>,

    #[serde(default)]
    pub readiness: ReadinessCheck,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_cached_methods: default_max_cached_methods(),
            readiness: ReadinessCheck::default(),
        }
    }
}

/// What happened to a unit handed to [`DeliveryCoordinator::deliver`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Delivered and marked `Delivered` or `Done`
    Delivered,
    /// Marked `DeliveryFailed`, and `Failure` as well when permanent
    Failed { permanent: bool },
    /// Handed to an asynchronous method; the outcome is recorded later
    Dispatched,
    /// No delivery configured; marked `Done`
    NotRequired,
}

/// Records the outcome of a delivery attempt
///
/// Shared by the inline path and the background tasks of asynchronous
/// deliveries.
#[derive(Debug, Clone)]
pub struct OutcomeHandler {
    store: ProcessingStateStore,
    events: Arc<dyn EventProcessor>,
}

impl OutcomeHandler {
    #[must_use]
    pub fn new(store: ProcessingStateStore, events: Arc<dyn EventProcessor>) -> Self {
        Self { store, events }
    }

    /// Move `unit` to its post-delivery state and raise the matching event
    ///
    /// - Success: `Delivered` for user messages, `Done` for signals
    /// - Failure: `DeliveryFailed` with the error text, then `Failure` if the
    ///   error is permanent
    ///
    /// The event is raised even when recording the state fails.
    ///
    /// # Errors
    /// Storage failures while recording the state
    pub async fn handle(
        &self,
        unit: &mut MessageUnit,
        result: Result<(), DeliveryError>,
    ) -> Result<DeliveryOutcome, StoreError> {
        match result {
            Ok(()) => {
                let state = if unit.is_user_message() {
                    ProcessingState::Delivered
                } else {
                    ProcessingState::Done
                };

                let recorded = self.store.set_state(unit, state, None).await;
                self.raise(ProcessingEvent::delivered(unit.clone()));
                warn_if_superseded(unit, state, recorded?);

                info!(message_id = %unit.message_id(), unit = %unit.unit_type(), "Delivered to business application");
                Ok(DeliveryOutcome::Delivered)
            }
            Err(e) => {
                let permanent = e.is_permanent();
                let description = e.to_string();

                let recorded = self.record_failure(unit, &description, permanent).await;
                self.raise(ProcessingEvent::delivery_failed(unit.clone(), Arc::new(e)));
                recorded?;

                Ok(DeliveryOutcome::Failed { permanent })
            }
        }
    }

    /// Hand `event` to the event processor; a panicking processor is logged
    /// and otherwise ignored
    fn raise(&self, event: ProcessingEvent) {
        let name = event.kind.name();
        let message_id = event.unit.message_id().to_string();

        if catch_unwind(AssertUnwindSafe(|| self.events.raise(event))).is_err() {
            error!(event = name, message_id = %message_id, "Event processor panicked");
        }
    }

    async fn record_failure(
        &self,
        unit: &mut MessageUnit,
        description: &str,
        permanent: bool,
    ) -> Result<(), StoreError> {
        let moved = self
            .store
            .set_state(unit, ProcessingState::DeliveryFailed, Some(description))
            .await?;
        warn_if_superseded(unit, ProcessingState::DeliveryFailed, moved);

        if moved && permanent {
            let moved = self
                .store
                .set_state(unit, ProcessingState::Failure, None)
                .await?;
            warn_if_superseded(unit, ProcessingState::Failure, moved);
        }

        Ok(())
    }
}

fn warn_if_superseded(unit: &MessageUnit, state: ProcessingState, moved: bool) {
    if !moved {
        warn!(
            message_id = %unit.message_id(),
            requested = %state,
            found = ?unit.current_state(),
            "State changed by someone else while out for delivery"
        );
    }
}

pub struct DeliveryCoordinator {
    store: ProcessingStateStore,
    policies: Arc<dyn PolicySet>,
    cache: DeliveryMethodCache,
    specs: SpecRegistry,
    factories: FactoryRegistry,
    outcome: OutcomeHandler,
    readiness: ReadinessCheck,
}

impl std::fmt::Debug for DeliveryCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryCoordinator")
            .field("cache", &self.cache)
            .field("registered_specs", &self.specs.len())
            .field("readiness", &self.readiness)
            .finish_non_exhaustive()
    }
}

impl DeliveryCoordinator {
    /// Create a coordinator with the built-in delivery method factories
    #[must_use]
    pub fn new(
        config: &DeliveryConfig,
        store: ProcessingStateStore,
        policies: Arc<dyn PolicySet>,
        events: Arc<dyn EventProcessor>,
    ) -> Self {
        internal!(
            "Delivery coordinator: max_cached_methods={:?}, readiness={:?}",
            config.max_cached_methods,
            config.readiness
        );

        Self {
            outcome: OutcomeHandler::new(store.clone(), events),
            store,
            policies,
            cache: DeliveryMethodCache::new(config.max_cached_methods),
            specs: SpecRegistry::new(),
            factories: FactoryRegistry::with_builtin(),
            readiness: config.readiness,
        }
    }

    pub const fn cache(&self) -> &DeliveryMethodCache {
        &self.cache
    }

    pub const fn store(&self) -> &ProcessingStateStore {
        &self.store
    }

    /// Register a delivery method factory under `name`
    pub fn register_factory(&self, name: impl Into<String>, factory: Arc<dyn DeliveryMethodFactory>) {
        self.factories.register(name, factory);
    }

    /// Deliver `unit` to the business application
    ///
    /// On return `unit` reflects the stored state. For asynchronous specs the
    /// final state is recorded by a background task.
    ///
    /// # Errors
    /// - [`CoordinatorError::NoPolicy`] if the unit has no known P-Mode
    /// - [`CoordinatorError::NotReady`] if the unit is not ready for delivery
    /// - [`CoordinatorError::AlreadyInProcess`] if someone else moved the
    ///   unit on first
    /// - [`CoordinatorError::Storage`] on storage failures
    ///
    /// Delivery failures are not errors; they are reported as
    /// [`DeliveryOutcome::Failed`].
    pub async fn deliver(&self, unit: &mut MessageUnit) -> Result<DeliveryOutcome, CoordinatorError> {
        let pmode = unit
            .pmode_id()
            .and_then(|id| self.policies.get(id))
            .ok_or_else(|| CoordinatorError::NoPolicy(unit.to_string()))?;

        if !self.readiness.is_ready(unit) {
            return Err(CoordinatorError::NotReady(format!(
                "{unit} (state {:?})",
                unit.current_state()
            )));
        }

        let Some(spec) = resolve_delivery_spec(unit, &pmode, self.policies.as_ref()).cloned()
        else {
            return self.finish_without_delivery(unit).await;
        };

        if !self
            .store
            .set_state(unit, ProcessingState::OutForDelivery, None)
            .await?
        {
            return Err(CoordinatorError::AlreadyInProcess(unit.to_string()));
        }

        debug!(
            message_id = %unit.message_id(),
            spec_id = ?spec.id,
            factory = %spec.factory,
            is_async = spec.is_async,
            "Delivering unit"
        );

        let method = match self.method_for(&spec) {
            Ok(method) => method,
            Err(e) => {
                warn!(
                    message_id = %unit.message_id(),
                    factory = %spec.factory,
                    error = %e,
                    "Could not create delivery method"
                );
                return Ok(self.outcome.handle(unit, Err(e)).await?);
            }
        };

        if spec.is_async {
            return match self.dispatch(method, unit) {
                Ok(()) => Ok(DeliveryOutcome::Dispatched),
                Err(e) => Ok(self.outcome.handle(unit, Err(e)).await?),
            };
        }

        let result = deliver_inline(method, unit).await;
        Ok(self.outcome.handle(unit, result).await?)
    }

    /// Record the outcome of a delivery attempt made outside of
    /// [`DeliveryCoordinator::deliver`]
    ///
    /// # Errors
    /// Storage failures while recording the state
    pub async fn handle_result(
        &self,
        unit: &mut MessageUnit,
        result: Result<(), DeliveryError>,
    ) -> Result<DeliveryOutcome, CoordinatorError> {
        Ok(self.outcome.handle(unit, result).await?)
    }

    async fn finish_without_delivery(
        &self,
        unit: &mut MessageUnit,
    ) -> Result<DeliveryOutcome, CoordinatorError> {
        if unit.is_user_message() {
            warn!(
                message_id = %unit.message_id(),
                pmode = ?unit.pmode_id(),
                "No delivery configured for user message"
            );
        } else {
            debug!(
                message_id = %unit.message_id(),
                unit = %unit.unit_type(),
                "No delivery required"
            );
        }

        if self
            .store
            .set_state(unit, ProcessingState::Done, None)
            .await?
        {
            Ok(DeliveryOutcome::NotRequired)
        } else {
            Err(CoordinatorError::AlreadyInProcess(unit.to_string()))
        }
    }

    /// Get the method for `spec` from the cache, or build it
    ///
    /// Two callers missing the cache for the same id at once may both build a
    /// method; the one cached first is used and the other is dropped.
    fn method_for(&self, spec: &DeliverySpec) -> Result<Arc<dyn DeliveryMethod>, DeliveryError> {
        let key = spec.cache_key();

        if let Some(key) = key
            && let Some(method) = self.cache.get(key)
        {
            return Ok(method);
        }

        let registered = key.and_then(|key| self.specs.get(key));
        let settings = registered.as_ref().map_or(&spec.settings, |r| &r.settings);

        let method = match catch_unwind(AssertUnwindSafe(|| {
            self.factories.create(&spec.factory, settings)
        })) {
            Ok(result) => result?,
            Err(_) => {
                error!(factory = %spec.factory, "Delivery method factory panicked");
                return Err(SystemError::Internal(format!(
                    "factory {} panicked",
                    spec.factory
                ))
                .into());
            }
        };

        if let Some(key) = key
            && let Some(winner) = self.cache.put_if_absent(key, Arc::clone(&method))
        {
            debug!(spec_id = key, "Delivery method was cached concurrently, using cached one");
            return Ok(winner);
        }

        Ok(method)
    }

    /// Start an asynchronous delivery; its outcome is recorded by a
    /// background task
    ///
    /// A method that panics while dispatching never started the delivery and
    /// is reported back as a failure.
    fn dispatch(
        &self,
        method: Arc<dyn DeliveryMethod>,
        unit: &MessageUnit,
    ) -> Result<(), DeliveryError> {
        let ticket = catch_unwind(AssertUnwindSafe(|| method.dispatch(unit.clone()))).map_err(
            |_| {
                error!(message_id = %unit.message_id(), "Delivery method panicked while dispatching");
                DeliveryError::from(SystemError::Internal(format!(
                    "dispatch of {unit} panicked"
                )))
            },
        )?;

        let outcome = self.outcome.clone();
        let mut unit = unit.clone();

        tokio::spawn(async move {
            let result = ticket.await.unwrap_or_else(|_| {
                error!(
                    message_id = %unit.message_id(),
                    "Asynchronous delivery ended without an outcome"
                );
                Err(TemporaryError::Abandoned(unit.to_string()).into())
            });

            if let Err(e) = outcome.handle(&mut unit, result).await {
                error!(
                    message_id = %unit.message_id(),
                    error = %e,
                    "Failed to record outcome of asynchronous delivery"
                );
            }
        });

        Ok(())
    }

    /// Register a delivery spec, replacing any spec with the same id
    ///
    /// A method cached for the id is shut down so the next delivery builds
    /// one with the new settings.
    ///
    /// # Errors
    /// If the spec has no id
    pub fn register_spec(&self, spec: DeliverySpec) -> Result<(), DeliveryError> {
        let id = spec.cache_key().map(str::to_string);
        self.specs.insert(spec)?;

        if let Some(id) = id {
            self.cache.invalidate(&id);
            internal!(level = INFO, "Registered delivery spec {id}");
        }

        Ok(())
    }

    /// Remove a registered delivery spec and its cached method
    pub fn remove_spec(&self, id: &str) -> Option<DeliverySpec> {
        let removed = self.specs.remove(id);
        self.cache.invalidate(id);
        removed
    }

    pub fn is_id_in_use(&self, id: &str) -> bool {
        self.specs.contains(id)
    }

    /// All registered delivery specs, ordered by id
    pub fn registered_specs(&self) -> Vec<DeliverySpec> {
        self.specs.list()
    }

    /// Shut down every cached delivery method
    pub fn shutdown(&self) {
        internal!(level = INFO, "Shutting down {} cached delivery methods", self.cache.len());
        self.cache.clear();
    }
}

/// Run `method` to completion, turning a panic into a delivery failure
async fn deliver_inline(
    method: Arc<dyn DeliveryMethod>,
    unit: &MessageUnit,
) -> Result<(), DeliveryError> {
    let copy = unit.clone();
    match tokio::spawn(async move { method.deliver(&copy).await }).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            warn!(message_id = %unit.message_id(), error = %e, "Delivery failed");
            Err(e)
        }
        Err(e) => {
            error!(message_id = %unit.message_id(), error = %e, "Delivery method failed unexpectedly");
            Err(SystemError::Internal(format!("delivery method failed unexpectedly: {e}")).into())
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_config_defaults() {
        let config: DeliveryConfig = ron::from_str("()").unwrap();
        assert_eq!(config, DeliveryConfig::default());
        assert_eq!(config.max_cached_methods, Some(64));
        assert_eq!(config.readiness, ReadinessCheck::CurrentState);

        let config: DeliveryConfig =
            ron::from_str("(max_cached_methods: None, readiness: History)").unwrap();
        assert_eq!(config.max_cached_methods, None);
        assert_eq!(config.readiness, ReadinessCheck::History);
    }

    #[test]
    fn test_readiness_checks() {
        let mut unit = MessageUnit::receipt(parley_common::message::Receipt::default());
        unit.push_state(ProcessingState::Received, None);
        assert!(!ReadinessCheck::CurrentState.is_ready(&unit));
        assert!(!ReadinessCheck::History.is_ready(&unit));

        unit.push_state(ProcessingState::ReadyForDelivery, None);
        assert!(ReadinessCheck::CurrentState.is_ready(&unit));

        unit.push_state(ProcessingState::Warning, None);
        assert!(!ReadinessCheck::CurrentState.is_ready(&unit));
        assert!(ReadinessCheck::History.is_ready(&unit));
    }
}
