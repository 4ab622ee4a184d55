//! Message-unit persistence for parley
//!
//! [`BackingStore`] is the persistence contract, with memory, file and test
//! implementations in [`backends`]. [`ProcessingStateStore`] sits on top of it
//! and is the only way processing states should be changed.

pub mod backends;
pub mod config;
pub mod error;
pub mod state;
pub mod r#trait;

pub use backends::{FileBackingStore, MemoryBackingStore, TestBackingStore};
pub use config::StoreConfig;
pub use error::{Result, SerializationError, StoreError};
pub use state::ProcessingStateStore;
pub use r#trait::BackingStore;
