//! Runtime registries consulted when a delivery method is needed
//!
//! - [`SpecRegistry`]: delivery specs registered by extensions. A registered
//!   spec's settings take precedence over those of a P-Mode spec with the
//!   same id, which lets trusted callers supply secrets the P-Mode cannot
//!   hold.
//! - [`FactoryRegistry`]: named delivery method factories.

use std::{collections::BTreeMap, sync::Arc};

use dashmap::DashMap;
use parley_common::pmode::DeliverySpec;

use crate::{
    error::{DeliveryError, SystemError},
    method::{DeliveryMethod, DeliveryMethodFactory},
    methods::file::FileDeliveryFactory,
};

#[derive(Debug, Default)]
pub struct SpecRegistry {
    specs: DashMap<String, DeliverySpec>,
}

impl SpecRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a spec, returning the one it replaced
    ///
    /// # Errors
    /// If the spec has no id
    pub fn insert(&self, spec: DeliverySpec) -> Result<Option<DeliverySpec>, DeliveryError> {
        let id = spec
            .cache_key()
            .ok_or_else(|| {
                SystemError::Configuration(format!(
                    "Delivery spec for factory {} cannot be registered without an id",
                    spec.factory
                ))
            })?
            .to_string();

        Ok(self.specs.insert(id, spec))
    }

    pub fn get(&self, id: &str) -> Option<DeliverySpec> {
        self.specs.get(id).map(|spec| spec.value().clone())
    }

    pub fn remove(&self, id: &str) -> Option<DeliverySpec> {
        self.specs.remove(id).map(|(_, spec)| spec)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.specs.contains_key(id)
    }

    /// All registered specs, ordered by id
    pub fn list(&self) -> Vec<DeliverySpec> {
        let mut specs: Vec<_> = self.specs.iter().map(|spec| spec.value().clone()).collect();
        specs.sort_by(|a, b| a.id.cmp(&b.id));
        specs
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct FactoryRegistry {
    factories: DashMap<String, Arc<dyn DeliveryMethodFactory>>,
}

impl FactoryRegistry {
    /// An empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the built-in `file` factory
    #[must_use]
    pub fn with_builtin() -> Self {
        let registry = Self::new();
        registry.register(FileDeliveryFactory::NAME, Arc::new(FileDeliveryFactory));
        registry
    }

    /// Register a factory under `name`, returning the one it replaced
    pub fn register(
        &self,
        name: impl Into<String>,
        factory: Arc<dyn DeliveryMethodFactory>,
    ) -> Option<Arc<dyn DeliveryMethodFactory>> {
        self.factories.insert(name.into(), factory)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn DeliveryMethodFactory>> {
        self.factories.get(name).map(|factory| Arc::clone(factory.value()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Build a method with the factory registered under `name`
    ///
    /// # Errors
    /// [`SystemError::UnknownFactory`] if nothing is registered under `name`,
    /// or whatever the factory reports
    pub fn create(
        &self,
        name: &str,
        settings: &BTreeMap<String, String>,
    ) -> Result<Arc<dyn DeliveryMethod>, DeliveryError> {
        // Clone out of the map so the factory runs without holding a shard lock
        let factory = self
            .get(name)
            .ok_or_else(|| SystemError::UnknownFactory(name.to_string()))?;
        factory.create(settings)
    }
}
