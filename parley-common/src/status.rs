use core::fmt::{self, Display, Formatter};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Processing state of a message unit
///
/// The delivery path only cares about
/// `ReadyForDelivery → OutForDelivery → {Delivered | Done | DeliveryFailed → Failure}`;
/// the remaining values are set by the surrounding pipeline stages.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub enum ProcessingState {
    Created,
    Submitted,
    Processing,
    ReadyToPush,
    AwaitingPull,
    Sending,
    TransportFailure,
    AwaitingReceipt,
    Received,
    Duplicate,
    ReadyForDelivery,
    OutForDelivery,
    Delivered,
    DeliveryFailed,
    Done,
    Failure,
    Warning,
    Suspended,
}

impl ProcessingState {
    /// Protocol-level name of the state
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Submitted => "SUBMITTED",
            Self::Processing => "PROCESSING",
            Self::ReadyToPush => "READY_TO_PUSH",
            Self::AwaitingPull => "AWAITING_PULL",
            Self::Sending => "SENDING",
            Self::TransportFailure => "TRANSPORT_FAILURE",
            Self::AwaitingReceipt => "AWAITING_RECEIPT",
            Self::Received => "RECEIVED",
            Self::Duplicate => "DUPLICATE",
            Self::ReadyForDelivery => "READY_FOR_DELIVERY",
            Self::OutForDelivery => "OUT_FOR_DELIVERY",
            Self::Delivered => "DELIVERED",
            Self::DeliveryFailed => "DELIVERY_FAILED",
            Self::Done => "DONE",
            Self::Failure => "FAILURE",
            Self::Warning => "WARNING",
            Self::Suspended => "SUSPENDED",
        }
    }

    /// Checks if no further processing is expected for a unit in this state
    #[must_use]
    pub const fn is_final(self) -> bool {
        matches!(self, Self::Delivered | Self::Done | Self::Failure)
    }
}

impl Display for ProcessingState {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        fmt.write_str(self.as_str())
    }
}

/// One entry in a unit's processing-state history
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateEntry {
    pub state: ProcessingState,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub description: Option<String>,
}

impl StateEntry {
    /// Create an entry that starts now
    #[must_use]
    pub fn new(state: ProcessingState, description: Option<String>) -> Self {
        Self {
            state,
            started_at: Utc::now(),
            description,
        }
    }
}

#[cfg(test)]
mod test {
    use super::ProcessingState;

    #[test]
    fn state_names() {
        assert_eq!(ProcessingState::ReadyForDelivery.to_string(), "READY_FOR_DELIVERY");
        assert_eq!(ProcessingState::DeliveryFailed.as_str(), "DELIVERY_FAILED");
    }

    #[test]
    fn final_states() {
        assert!(ProcessingState::Delivered.is_final());
        assert!(ProcessingState::Done.is_final());
        assert!(ProcessingState::Failure.is_final());

        assert!(!ProcessingState::DeliveryFailed.is_final());
        assert!(!ProcessingState::OutForDelivery.is_final());
    }
}
