//! Typed error handling for delivery operations.
//!
//! [`DeliveryError`] is what a delivery method reports. It distinguishes:
//! - Permanent failures - the unit is moved on to `Failure`
//! - Temporary failures - the unit stays in `DeliveryFailed` for a retry
//! - System errors - construction or configuration problems, treated as
//!   temporary
//!
//! [`CoordinatorError`] is what callers of the coordinator see.

use parley_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Failure that will not go away by trying again
    #[error("Permanent failure: {0}")]
    Permanent(#[from] PermanentError),

    /// Failure that may succeed on a later attempt
    #[error("Temporary failure: {0}")]
    Temporary(#[from] TemporaryError),

    /// System-level error (I/O, configuration, internal errors)
    #[error("System error: {0}")]
    System(#[from] SystemError),
}

#[derive(Debug, Error)]
pub enum PermanentError {
    /// The business application refused the unit
    #[error("Rejected by the business application: {0}")]
    Rejected(String),

    /// The unit cannot be represented in the delivery format
    #[error("Unit cannot be delivered: {0}")]
    Undeliverable(String),
}

#[derive(Debug, Error)]
pub enum TemporaryError {
    /// The business application could not be reached
    #[error("Destination unavailable: {0}")]
    Unavailable(String),

    #[error("Delivery timed out: {0}")]
    Timeout(String),

    /// The asynchronous delivery ended without reporting an outcome
    #[error("Delivery abandoned: {0}")]
    Abandoned(String),
}

#[derive(Debug, Error)]
pub enum SystemError {
    /// Invalid delivery spec or method settings
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// No factory registered under the spec's factory name
    #[error("Unknown delivery method factory: {0}")]
    UnknownFactory(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DeliveryError {
    /// Returns `true` if this error is temporary and should be retried.
    #[must_use]
    pub const fn is_temporary(&self) -> bool {
        matches!(self, Self::Temporary(_))
    }

    /// Returns `true` if this error is permanent and should not be retried.
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent(_))
    }

    /// Returns `true` if this is a system error.
    #[must_use]
    pub const fn is_system(&self) -> bool {
        matches!(self, Self::System(_))
    }
}

/// Errors returned by [`crate::DeliveryCoordinator::deliver`]
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// The unit is not in a state from which it can be delivered
    #[error("{0} is not ready for delivery")]
    NotReady(String),

    /// The unit has no P-Mode, or its P-Mode is unknown
    #[error("No P-Mode found for {0}")]
    NoPolicy(String),

    /// Another party already moved the unit on
    #[error("{0} is already being processed")]
    AlreadyInProcess(String),

    #[error("Storage failure: {0}")]
    Storage(#[from] StoreError),
}

impl CoordinatorError {
    /// Returns `true` if the unit is being handled elsewhere, which is an
    /// expected outcome of concurrent processing rather than a fault
    #[must_use]
    pub const fn is_already_in_process(&self) -> bool {
        matches!(self, Self::AlreadyInProcess(_))
    }

    /// Returns `true` for precondition violations; no state was changed
    #[must_use]
    pub const fn is_precondition(&self) -> bool {
        matches!(self, Self::NotReady(_) | Self::NoPolicy(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let permanent: DeliveryError = PermanentError::Rejected("schema".to_string()).into();
        assert!(permanent.is_permanent());
        assert!(!permanent.is_temporary());

        let temporary: DeliveryError = TemporaryError::Timeout("30s".to_string()).into();
        assert!(temporary.is_temporary());

        let system: DeliveryError =
            SystemError::from(std::io::Error::other("disk full")).into();
        assert!(system.is_system());
        assert_eq!(system.to_string(), "System error: I/O error: disk full");
    }

    #[test]
    fn test_coordinator_error_classification() {
        assert!(CoordinatorError::NotReady("x".to_string()).is_precondition());
        assert!(CoordinatorError::NoPolicy("x".to_string()).is_precondition());
        assert!(CoordinatorError::AlreadyInProcess("x".to_string()).is_already_in_process());
        assert!(
            !CoordinatorError::Storage(StoreError::Internal("x".to_string())).is_precondition()
        );
    }
}
