//! Backing store implementations
//!
//! - `memory`: In-memory storage for tests and transient deployments
//! - `test`: Memory storage with synchronisation and failure injection
//! - `file`: One bincode record per unit on disk

pub mod file;
pub mod memory;

pub use file::{FileBackingStore, FileBackingStoreBuilder};
pub use memory::MemoryBackingStore;
pub use test::TestBackingStore;
