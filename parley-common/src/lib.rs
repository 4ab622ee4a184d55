//! Shared building blocks for the parley message exchange engine
//!
//! This crate holds everything the pipeline stages agree on:
//! - The message-unit model (user messages and signals)
//! - Processing states and their append-only history
//! - The P-Mode model and the policy-set lookup contract
//! - The per-exchange [`context::ExchangeContext`]
//! - Lifecycle events raised by the delivery path
//! - Logging macros and subscriber initialisation

pub mod context;
pub mod event;
pub mod logging;
pub mod message;
pub mod pmode;
pub mod status;
pub mod types;

pub use context::ExchangeContext;
pub use message::{Direction, MessageUnit, UnitKind, UnitType};
pub use status::{ProcessingState, StateEntry};
pub use tracing;
pub use types::UnitId;
