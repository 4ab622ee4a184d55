//! Delivery of message units to the business application
//!
//! The [`DeliveryCoordinator`] decides whether a unit needs delivering,
//! builds or reuses the configured [`DeliveryMethod`] and records the
//! outcome in the processing state store.

pub mod cache;
pub mod coordinator;
pub mod error;
pub mod method;
pub mod methods;
pub mod policy;
pub mod registry;

pub use cache::DeliveryMethodCache;
pub use coordinator::{
    DeliveryConfig, DeliveryCoordinator, DeliveryOutcome, OutcomeHandler, ReadinessCheck,
};
pub use error::{CoordinatorError, DeliveryError, PermanentError, SystemError, TemporaryError};
pub use method::{DeliveryMethod, DeliveryMethodFactory, DeliveryTicket};
pub use policy::resolve_delivery_spec;
pub use registry::{FactoryRegistry, SpecRegistry};
