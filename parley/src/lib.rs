//! parley: message-unit lifecycle engine for B2B messaging gateways
//!
//! [`Engine`] is the configuration read at start-up; [`Engine::init`] wires
//! the processing state store, the P-Mode set, the event dispatcher and the
//! delivery coordinator into a [`Gateway`].

pub mod engine;

pub use engine::{Engine, EngineError, Gateway, find_config_file};
pub use parley_common as common;
pub use parley_delivery as delivery;
pub use parley_store as store;
