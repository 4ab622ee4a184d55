//! Error types for the parley-store crate.
//!
//! Optimistic-concurrency conflicts carry the stored copy of the unit so the
//! caller can refresh its view without another read.

use std::io;

use parley_common::{MessageUnit, UnitId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The stored copy is newer than the one being saved
    #[error("Version conflict on unit {}: stored version is {}", .0.message_id(), .0.version())]
    Conflict(Box<MessageUnit>),

    /// An outgoing unit with this message id is already stored
    #[error("Message id already in use: {0}")]
    DuplicateId(String),

    #[error("Unit not found: {0}")]
    NotFound(UnitId),

    #[error("Payload not found: {0}")]
    PayloadNotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] SerializationError),

    #[error("Invalid store configuration: {0}")]
    Configuration(String),

    /// Capacity exhausted, lock poisoning, or a storage-layer inconsistency
    #[error("Internal error: {0}")]
    Internal(String),
}

impl StoreError {
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    pub const fn is_duplicate_id(&self) -> bool {
        matches!(self, Self::DuplicateId(_))
    }

    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::PayloadNotFound(_))
    }
}

#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("Bincode encode error: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("Bincode decode error: {0}")]
    Decode(#[from] bincode::error::DecodeError),

    #[error("Corrupted unit record: {0}")]
    Corrupted(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

impl<T> From<std::sync::PoisonError<T>> for StoreError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        Self::Internal(format!("Lock poisoned: {e}"))
    }
}
