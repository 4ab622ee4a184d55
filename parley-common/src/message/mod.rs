//! Message units exchanged with trading partners
//!
//! A [`MessageUnit`] is one logical protocol message. The header fields are
//! shared by all variants, the variant-specific body lives in [`UnitKind`].

mod signal;
mod user_message;

use core::fmt::{self, Display, Formatter};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
pub use signal::{EbmsError, ErrorSignal, PullRequest, Receipt, Severity};
pub use user_message::{CollaborationInfo, Payload, UserMessage};

use crate::{
    pmode::Label,
    status::{ProcessingState, StateEntry},
    types::UnitId,
};

/// Flow direction of a message unit relative to this gateway
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default, Serialize, Deserialize)]
pub enum Direction {
    #[default]
    In,
    Out,
}

/// Discriminant of [`UnitKind`], handy for logging and filtering
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub enum UnitType {
    UserMessage,
    PullRequest,
    Receipt,
    ErrorSignal,
}

impl Display for UnitType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::UserMessage => "User Message",
            Self::PullRequest => "Pull Request",
            Self::Receipt => "Receipt",
            Self::ErrorSignal => "Error",
        })
    }
}

/// Variant-specific body of a message unit
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum UnitKind {
    UserMessage(UserMessage),
    PullRequest(PullRequest),
    Receipt(Receipt),
    ErrorSignal(ErrorSignal),
}

impl UnitKind {
    #[must_use]
    pub const fn unit_type(&self) -> UnitType {
        match self {
            Self::UserMessage(_) => UnitType::UserMessage,
            Self::PullRequest(_) => UnitType::PullRequest,
            Self::Receipt(_) => UnitType::Receipt,
            Self::ErrorSignal(_) => UnitType::ErrorSignal,
        }
    }
}

/// A single message unit and its processing history
///
/// The state history is append-only: [`MessageUnit::push_state`] is the only
/// way to change it and nothing removes entries. The `version` counter belongs
/// to the backing store, which uses it to detect stale updates.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MessageUnit {
    #[serde(default)]
    core_id: Option<UnitId>,
    #[serde(default)]
    version: u64,
    #[serde(default)]
    message_id: String,
    #[serde(default)]
    ref_to_message_id: Option<String>,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    direction: Direction,
    #[serde(default)]
    pmode_id: Option<String>,
    #[serde(default)]
    leg: Option<Label>,
    #[serde(default)]
    states: Vec<StateEntry>,
    kind: UnitKind,
}

impl MessageUnit {
    /// Create a new, unsaved unit
    #[must_use]
    pub const fn new(kind: UnitKind) -> Self {
        Self {
            core_id: None,
            version: 0,
            message_id: String::new(),
            ref_to_message_id: None,
            timestamp: None,
            direction: Direction::In,
            pmode_id: None,
            leg: None,
            states: Vec::new(),
            kind,
        }
    }

    #[must_use]
    pub const fn user_message(message: UserMessage) -> Self {
        Self::new(UnitKind::UserMessage(message))
    }

    #[must_use]
    pub const fn pull_request(request: PullRequest) -> Self {
        Self::new(UnitKind::PullRequest(request))
    }

    #[must_use]
    pub const fn receipt(receipt: Receipt) -> Self {
        Self::new(UnitKind::Receipt(receipt))
    }

    #[must_use]
    pub const fn error_signal(signal: ErrorSignal) -> Self {
        Self::new(UnitKind::ErrorSignal(signal))
    }

    #[must_use]
    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = message_id.into();
        self
    }

    #[must_use]
    pub fn with_ref_to_message_id(mut self, ref_to: impl Into<String>) -> Self {
        self.ref_to_message_id = Some(ref_to.into());
        self
    }

    #[must_use]
    pub fn with_pmode_id(mut self, pmode_id: impl Into<String>) -> Self {
        self.pmode_id = Some(pmode_id.into());
        self
    }

    #[must_use]
    pub const fn with_leg(mut self, leg: Label) -> Self {
        self.leg = Some(leg);
        self
    }

    #[must_use]
    pub const fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Generate a protocol message id of the form `<ulid>@<host>`
    #[must_use]
    pub fn generate_message_id(host: &str) -> String {
        format!("{}@{host}", ulid::Ulid::new().to_string().to_lowercase())
    }

    pub const fn core_id(&self) -> Option<UnitId> {
        self.core_id
    }

    /// Assign the storage key. Only backing stores should call this.
    pub const fn set_core_id(&mut self, core_id: UnitId) {
        self.core_id = Some(core_id);
    }

    pub const fn version(&self) -> u64 {
        self.version
    }

    /// Set the optimistic-concurrency version. Only backing stores should call this.
    pub const fn set_version(&mut self, version: u64) {
        self.version = version;
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    pub fn set_message_id(&mut self, message_id: impl Into<String>) {
        self.message_id = message_id.into();
    }

    pub fn ref_to_message_id(&self) -> Option<&str> {
        self.ref_to_message_id.as_deref()
    }

    pub const fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamp
    }

    pub const fn set_timestamp(&mut self, timestamp: DateTime<Utc>) {
        self.timestamp = Some(timestamp);
    }

    pub const fn direction(&self) -> Direction {
        self.direction
    }

    pub const fn set_direction(&mut self, direction: Direction) {
        self.direction = direction;
    }

    pub fn pmode_id(&self) -> Option<&str> {
        self.pmode_id.as_deref()
    }

    pub fn set_pmode_id(&mut self, pmode_id: impl Into<String>) {
        self.pmode_id = Some(pmode_id.into());
    }

    pub const fn leg(&self) -> Option<Label> {
        self.leg
    }

    pub const fn set_leg(&mut self, leg: Label) {
        self.leg = Some(leg);
    }

    pub const fn kind(&self) -> &UnitKind {
        &self.kind
    }

    pub const fn kind_mut(&mut self) -> &mut UnitKind {
        &mut self.kind
    }

    pub const fn unit_type(&self) -> UnitType {
        self.kind.unit_type()
    }

    pub const fn is_user_message(&self) -> bool {
        matches!(self.kind, UnitKind::UserMessage(_))
    }

    /// Payloads of a user message, empty for signals
    pub fn payloads(&self) -> &[Payload] {
        match &self.kind {
            UnitKind::UserMessage(message) => &message.payloads,
            _ => &[],
        }
    }

    pub fn payloads_mut(&mut self) -> Option<&mut Vec<Payload>> {
        match &mut self.kind {
            UnitKind::UserMessage(message) => Some(&mut message.payloads),
            _ => None,
        }
    }

    /// Full processing-state history, oldest first
    pub fn states(&self) -> &[StateEntry] {
        &self.states
    }

    pub fn current_entry(&self) -> Option<&StateEntry> {
        self.states.last()
    }

    pub fn current_state(&self) -> Option<ProcessingState> {
        self.current_entry().map(|entry| entry.state)
    }

    /// Checks whether the unit was ever in `state`
    pub fn has_been_in(&self, state: ProcessingState) -> bool {
        self.states.iter().any(|entry| entry.state == state)
    }

    /// Append a new state entry starting now
    pub fn push_state(&mut self, state: ProcessingState, description: Option<String>) {
        self.states.push(StateEntry::new(state, description));
    }
}

impl Display for MessageUnit {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} [msgId={}]", self.unit_type(), self.message_id)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_state_history_is_ordered() {
        let mut unit = MessageUnit::receipt(Receipt::default()).with_message_id("r-1");
        assert_eq!(unit.current_state(), None);

        unit.push_state(ProcessingState::Received, None);
        unit.push_state(ProcessingState::ReadyForDelivery, Some("checked".to_string()));

        assert_eq!(unit.states().len(), 2);
        assert_eq!(unit.current_state(), Some(ProcessingState::ReadyForDelivery));
        assert_eq!(
            unit.current_entry().and_then(|e| e.description.as_deref()),
            Some("checked")
        );
        assert!(unit.has_been_in(ProcessingState::Received));
        assert!(!unit.has_been_in(ProcessingState::Delivered));
    }

    #[test]
    fn test_payloads_only_on_user_messages() {
        let mut message = UserMessage::default();
        message.payloads.push(Payload::new("cid:part-1"));
        let user = MessageUnit::user_message(message);
        assert_eq!(user.payloads().len(), 1);
        assert!(user.is_user_message());

        let mut pull = MessageUnit::pull_request(PullRequest::new("urn:mpc:default"));
        assert!(pull.payloads().is_empty());
        assert!(pull.payloads_mut().is_none());
    }

    #[test]
    fn test_generated_message_id() {
        let id = MessageUnit::generate_message_id("gw.example.com");
        assert!(id.ends_with("@gw.example.com"));
        assert_ne!(id, MessageUnit::generate_message_id("gw.example.com"));
    }

    #[test]
    fn test_display() {
        let unit = MessageUnit::error_signal(ErrorSignal::default()).with_message_id("e-1");
        assert_eq!(unit.to_string(), "Error [msgId=e-1]");
    }
}
