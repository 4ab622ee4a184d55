//! Built-in delivery methods

pub mod file;

pub use file::{FileDeliveryFactory, FileDeliveryMethod};
