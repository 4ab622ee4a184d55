//! Per-exchange aggregate of message units and flags
//!
//! One [`ExchangeContext`] exists for every physical request/response cycle.
//! Pipeline stages attach the units they receive or create, record the errors
//! they generate and use the flags and property bag to talk to each other.
//! Nothing here is persisted; the context is dropped when the exchange ends.

use std::{any::Any, collections::HashMap, fmt, sync::Arc};

use ahash::AHashMap;

use crate::message::{Direction, EbmsError, MessageUnit, UnitKind};

/// A property value of any shareable type
pub type Property = Arc<dyn Any + Send + Sync>;

/// Fallback source consulted for properties not set on the context itself
pub trait PropertySource: Send + Sync + fmt::Debug {
    fn property(&self, key: &str) -> Option<Property>;
}

/// Outcome of processing one part of the security header
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum SecurityTarget {
    Signature,
    Encryption,
    UsernameToken,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SecurityResult {
    pub target: SecurityTarget,
    pub succeeded: bool,
    pub detail: Option<String>,
}

/// Units of one flow direction
#[derive(Clone, Debug, Default)]
struct UnitSlots {
    user_message: Option<MessageUnit>,
    pull_request: Option<MessageUnit>,
    receipts: Vec<MessageUnit>,
    errors: Vec<MessageUnit>,
}

impl UnitSlots {
    fn attach(&mut self, unit: MessageUnit) {
        match unit.kind() {
            UnitKind::UserMessage(_) => self.user_message = Some(unit),
            UnitKind::PullRequest(_) => self.pull_request = Some(unit),
            UnitKind::Receipt(_) => self.receipts.push(unit),
            UnitKind::ErrorSignal(_) => self.errors.push(unit),
        }
    }

    fn iter(&self) -> impl Iterator<Item = &MessageUnit> {
        self.user_message
            .iter()
            .chain(self.pull_request.iter())
            .chain(self.receipts.iter())
            .chain(self.errors.iter())
    }

    fn is_empty(&self) -> bool {
        self.user_message.is_none()
            && self.pull_request.is_none()
            && self.receipts.is_empty()
            && self.errors.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct ExchangeContext {
    flow: Direction,
    received: UnitSlots,
    sending: UnitSlots,
    /// Locally generated errors keyed by the message id they refer to;
    /// `None` collects errors that refer to no message
    generated_errors: HashMap<Option<String>, Vec<EbmsError>>,
    response_needed: bool,
    duplicate_elimination: bool,
    security_results: Vec<SecurityResult>,
    properties: AHashMap<String, Property>,
    parent: Option<Arc<dyn PropertySource>>,
}

impl ExchangeContext {
    /// Create the context of an exchange currently flowing in `flow` direction
    #[must_use]
    pub fn new(flow: Direction) -> Self {
        Self {
            flow,
            ..Self::default()
        }
    }

    /// Create a context whose properties fall back to `parent`
    #[must_use]
    pub fn with_parent(flow: Direction, parent: Arc<dyn PropertySource>) -> Self {
        Self {
            flow,
            parent: Some(parent),
            ..Self::default()
        }
    }

    pub const fn flow(&self) -> Direction {
        self.flow
    }

    /// Switch the flow, e.g. when a responder starts building its response
    pub const fn set_flow(&mut self, flow: Direction) {
        self.flow = flow;
    }

    /// Attach a unit to the slot matching the current flow and its variant
    ///
    /// Receipts and errors accumulate in order; a user message or pull
    /// request replaces any previously attached one.
    pub fn attach(&mut self, unit: MessageUnit) {
        match self.flow {
            Direction::In => self.received.attach(unit),
            Direction::Out => self.sending.attach(unit),
        }
    }

    pub const fn received_user_message(&self) -> Option<&MessageUnit> {
        self.received.user_message.as_ref()
    }

    pub const fn received_pull_request(&self) -> Option<&MessageUnit> {
        self.received.pull_request.as_ref()
    }

    pub fn received_receipts(&self) -> &[MessageUnit] {
        &self.received.receipts
    }

    pub fn received_errors(&self) -> &[MessageUnit] {
        &self.received.errors
    }

    pub const fn sending_user_message(&self) -> Option<&MessageUnit> {
        self.sending.user_message.as_ref()
    }

    pub const fn sending_pull_request(&self) -> Option<&MessageUnit> {
        self.sending.pull_request.as_ref()
    }

    pub fn sending_receipts(&self) -> &[MessageUnit] {
        &self.sending.receipts
    }

    pub fn sending_errors(&self) -> &[MessageUnit] {
        &self.sending.errors
    }

    /// All received units: user message, pull request, receipts, errors
    pub fn received_units(&self) -> impl Iterator<Item = &MessageUnit> {
        self.received.iter()
    }

    /// All units to be sent: user message, pull request, receipts, errors
    pub fn sending_units(&self) -> impl Iterator<Item = &MessageUnit> {
        self.sending.iter()
    }

    /// Mutable access to every unit of the exchange, e.g. to refresh them
    /// after a state change
    pub fn units_mut(&mut self) -> impl Iterator<Item = &mut MessageUnit> {
        let received = &mut self.received;
        let sending = &mut self.sending;
        received
            .user_message
            .iter_mut()
            .chain(received.pull_request.iter_mut())
            .chain(received.receipts.iter_mut())
            .chain(received.errors.iter_mut())
            .chain(sending.user_message.iter_mut())
            .chain(sending.pull_request.iter_mut())
            .chain(sending.receipts.iter_mut())
            .chain(sending.errors.iter_mut())
    }

    /// Primary unit of the received message
    ///
    /// User message, else the first receipt, else the first error, else the
    /// pull request.
    pub fn primary_received(&self) -> Option<&MessageUnit> {
        self.received
            .user_message
            .as_ref()
            .or_else(|| self.received.receipts.first())
            .or_else(|| self.received.errors.first())
            .or(self.received.pull_request.as_ref())
    }

    /// Primary unit of the message being sent
    ///
    /// Pull request, else the user message, else the first receipt, else the
    /// first error.
    pub fn primary_sent(&self) -> Option<&MessageUnit> {
        self.sending
            .pull_request
            .as_ref()
            .or(self.sending.user_message.as_ref())
            .or_else(|| self.sending.receipts.first())
            .or_else(|| self.sending.errors.first())
    }

    /// Primary unit of the current flow
    pub fn primary(&self) -> Option<&MessageUnit> {
        match self.flow {
            Direction::In => self.primary_received(),
            Direction::Out => self.primary_sent(),
        }
    }

    /// Record an error generated while processing this exchange
    pub fn record_generated_error(&mut self, error: EbmsError) {
        self.generated_errors
            .entry(error.ref_to_message_id.clone())
            .or_default()
            .push(error);
    }

    /// Generated errors that refer to `message_id`, or that refer to no
    /// message when `message_id` is `None`
    pub fn generated_errors_for(&self, message_id: Option<&str>) -> &[EbmsError] {
        self.generated_errors
            .get(&message_id.map(str::to_string))
            .map_or(&[], Vec::as_slice)
    }

    pub const fn generated_errors(&self) -> &HashMap<Option<String>, Vec<EbmsError>> {
        &self.generated_errors
    }

    pub fn has_generated_errors(&self) -> bool {
        self.generated_errors.values().any(|errors| !errors.is_empty())
    }

    pub const fn set_response_needed(&mut self, needed: bool) {
        self.response_needed = needed;
    }

    pub const fn response_needed(&self) -> bool {
        self.response_needed
    }

    pub const fn set_duplicate_elimination(&mut self, requested: bool) {
        self.duplicate_elimination = requested;
    }

    pub const fn duplicate_elimination_requested(&self) -> bool {
        self.duplicate_elimination
    }

    pub fn add_security_result(&mut self, result: SecurityResult) {
        self.security_results.push(result);
    }

    pub fn security_results(&self) -> &[SecurityResult] {
        &self.security_results
    }

    pub fn set_property<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) {
        self.properties.insert(key.into(), Arc::new(value));
    }

    pub fn remove_property(&mut self, key: &str) -> Option<Property> {
        self.properties.remove(key)
    }

    /// Raw property lookup, falling back to the parent source
    pub fn raw_property(&self, key: &str) -> Option<Property> {
        self.properties.get(key).cloned().or_else(|| {
            self.parent
                .as_ref()
                .and_then(|parent| parent.property(key))
        })
    }

    /// Typed property lookup, falling back to the parent source
    ///
    /// Returns `None` when the property is missing or of another type.
    pub fn property<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        self.raw_property(key)
            .and_then(|value| value.downcast::<T>().ok())
    }

    /// Drop every attached message unit
    ///
    /// Flags, generated errors and properties are kept.
    pub fn reset(&mut self) {
        self.received = UnitSlots::default();
        self.sending = UnitSlots::default();
    }

    /// Checks if no unit is attached in either direction
    pub fn is_empty(&self) -> bool {
        self.received.is_empty() && self.sending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::message::{ErrorSignal, PullRequest, Receipt, Severity, UserMessage};

    fn receipt(id: &str) -> MessageUnit {
        MessageUnit::receipt(Receipt::default()).with_message_id(id)
    }

    fn error(id: &str) -> MessageUnit {
        MessageUnit::error_signal(ErrorSignal::default()).with_message_id(id)
    }

    fn user(id: &str) -> MessageUnit {
        MessageUnit::user_message(UserMessage::default()).with_message_id(id)
    }

    fn pull(id: &str) -> MessageUnit {
        MessageUnit::pull_request(PullRequest::new("urn:mpc")).with_message_id(id)
    }

    #[test]
    fn test_primary_received_prefers_first_receipt() {
        let mut context = ExchangeContext::new(Direction::In);
        context.attach(receipt("r-1"));
        context.attach(error("e-1"));
        context.attach(receipt("r-2"));

        assert_eq!(context.received_receipts().len(), 2);
        assert_eq!(
            context.primary_received().map(MessageUnit::message_id),
            Some("r-1")
        );
        assert_eq!(context.primary().map(MessageUnit::message_id), Some("r-1"));
    }

    #[test]
    fn test_primary_received_order() {
        let mut context = ExchangeContext::new(Direction::In);
        assert!(context.primary_received().is_none());

        context.attach(pull("p-1"));
        assert_eq!(context.primary_received().map(MessageUnit::message_id), Some("p-1"));

        context.attach(error("e-1"));
        assert_eq!(context.primary_received().map(MessageUnit::message_id), Some("e-1"));

        context.attach(user("u-1"));
        assert_eq!(context.primary_received().map(MessageUnit::message_id), Some("u-1"));
    }

    #[test]
    fn test_primary_sent_prefers_pull_request() {
        let mut context = ExchangeContext::new(Direction::Out);
        context.attach(user("u-1"));
        context.attach(pull("p-1"));

        assert_eq!(context.primary_sent().map(MessageUnit::message_id), Some("p-1"));
        assert_eq!(context.primary().map(MessageUnit::message_id), Some("p-1"));
        assert!(context.primary_received().is_none());
    }

    #[test]
    fn test_primary_sent_falls_back_to_signals() {
        let mut context = ExchangeContext::new(Direction::Out);
        context.attach(error("e-1"));
        assert_eq!(context.primary_sent().map(MessageUnit::message_id), Some("e-1"));

        context.attach(receipt("r-1"));
        assert_eq!(context.primary_sent().map(MessageUnit::message_id), Some("r-1"));
    }

    #[test]
    fn test_attach_follows_flow_and_last_write_wins() {
        let mut context = ExchangeContext::new(Direction::In);
        context.attach(user("u-1"));
        context.attach(user("u-2"));

        context.set_flow(Direction::Out);
        context.attach(receipt("r-1"));

        assert_eq!(
            context.received_user_message().map(MessageUnit::message_id),
            Some("u-2")
        );
        assert!(context.sending_user_message().is_none());
        assert_eq!(context.sending_receipts().len(), 1);
        assert_eq!(context.received_units().count(), 1);
        assert_eq!(context.sending_units().count(), 1);
    }

    #[test]
    fn test_generated_errors_are_bucketed() {
        let mut context = ExchangeContext::new(Direction::In);
        assert!(!context.has_generated_errors());

        context.record_generated_error(EbmsError::new("EBMS:0001", Severity::Failure).with_ref_to("m-1"));
        context.record_generated_error(EbmsError::new("EBMS:0003", Severity::Failure).with_ref_to("m-1"));
        context.record_generated_error(EbmsError::new("EBMS:0009", Severity::Failure));

        assert!(context.has_generated_errors());
        assert_eq!(context.generated_errors_for(Some("m-1")).len(), 2);
        assert_eq!(context.generated_errors_for(None).len(), 1);
        assert!(context.generated_errors_for(Some("m-2")).is_empty());
        assert_eq!(context.generated_errors().len(), 2);
    }

    #[test]
    fn test_flags() {
        let mut context = ExchangeContext::new(Direction::In);
        assert!(!context.response_needed());
        assert!(!context.duplicate_elimination_requested());

        context.set_response_needed(true);
        context.set_duplicate_elimination(true);
        assert!(context.response_needed());
        assert!(context.duplicate_elimination_requested());
    }

    #[derive(Debug)]
    struct Parent;

    impl PropertySource for Parent {
        fn property(&self, key: &str) -> Option<Property> {
            (key == "transport").then(|| Arc::new(String::from("http")) as Property)
        }
    }

    #[test]
    fn test_properties_fall_back_to_parent() {
        let mut context = ExchangeContext::with_parent(Direction::In, Arc::new(Parent));
        context.set_property("attempt", 3_u32);

        assert_eq!(context.property::<u32>("attempt").as_deref(), Some(&3));
        assert!(context.property::<String>("attempt").is_none());
        assert_eq!(
            context.property::<String>("transport").as_deref().map(String::as_str),
            Some("http")
        );
        assert!(context.property::<String>("missing").is_none());

        context.set_property("transport", String::from("local"));
        assert_eq!(
            context.property::<String>("transport").as_deref().map(String::as_str),
            Some("local")
        );
    }

    #[test]
    fn test_reset_clears_units_only() {
        let mut context = ExchangeContext::new(Direction::In);
        context.attach(user("u-1"));
        context.set_response_needed(true);
        context.record_generated_error(EbmsError::new("EBMS:0004", Severity::Failure));
        context.add_security_result(SecurityResult {
            target: SecurityTarget::Signature,
            succeeded: true,
            detail: None,
        });

        context.reset();

        assert!(context.is_empty());
        assert!(context.primary().is_none());
        assert!(context.response_needed());
        assert!(context.has_generated_errors());
        assert_eq!(context.security_results().len(), 1);
    }

    #[test]
    fn test_units_mut_visits_everything() {
        let mut context = ExchangeContext::new(Direction::In);
        context.attach(user("u-1"));
        context.set_flow(Direction::Out);
        context.attach(receipt("r-1"));
        context.attach(error("e-1"));

        for unit in context.units_mut() {
            unit.set_pmode_id("pm-1");
        }

        assert!(context
            .received_units()
            .chain(context.sending_units())
            .all(|unit| unit.pmode_id() == Some("pm-1")));
    }
}
