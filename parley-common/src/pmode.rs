//! Processing modes (P-Modes)
//!
//! A P-Mode is the declarative agreement governing how exchanges between two
//! partners are processed. Only the parts the lifecycle engine consults are
//! modelled here:
//! - Message exchange pattern binding (which leg is pulled)
//! - Per-leg default delivery
//! - Receipt and error notification to the business application
//!
//! P-Modes are usually loaded from the engine configuration:
//! ```ron
//! (
//!     id: "order-flow",
//!     mep_binding: Push,
//!     legs: [
//!         (
//!             label: Request,
//!             default_delivery: Some((id: Some("orders"), factory: "file", settings: { "directory": "/srv/in" })),
//!         ),
//!     ],
//! )
//! ```

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    sync::{Arc, PoisonError, RwLock},
};

use serde::{Deserialize, Serialize};

/// Identifies one leg of a message exchange pattern
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub enum Label {
    Request,
    Reply,
}

/// Transport channel binding of the exchange pattern
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default, Serialize, Deserialize)]
pub enum MepBinding {
    /// One-way, pushed
    #[default]
    Push,
    /// One-way, pulled
    Pull,
    /// Two-way, both legs pushed
    PushPush,
    /// Two-way, request pushed and reply pulled
    PushPull,
    /// Two-way, request pulled and reply pushed
    PullPush,
}

/// Configuration of how a message unit is handed to the business application
///
/// A spec with an `id` identifies a reusable delivery method; one without an
/// id gets a fresh method for every delivery.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliverySpec {
    #[serde(default)]
    pub id: Option<String>,
    /// Name of the factory that constructs the delivery method
    pub factory: String,
    #[serde(default)]
    pub settings: BTreeMap<String, String>,
    /// Deliver without waiting for the method to finish
    #[serde(default)]
    pub is_async: bool,
}

impl DeliverySpec {
    #[must_use]
    pub fn new(id: Option<&str>, factory: impl Into<String>) -> Self {
        Self {
            id: id.map(str::to_string),
            factory: factory.into(),
            settings: BTreeMap::new(),
            is_async: false,
        }
    }

    #[must_use]
    pub fn with_setting(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.settings.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub const fn asynchronous(mut self) -> Self {
        self.is_async = true;
        self
    }

    /// Identifier usable as a cache key: present and non-empty
    pub fn cache_key(&self) -> Option<&str> {
        self.id.as_deref().filter(|id| !id.is_empty())
    }
}

/// Receipt handling of a leg
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptConfig {
    #[serde(default)]
    pub notify_receipts_to_business_application: bool,
    /// Delivery used for receipts, defaults to the leg's default delivery
    #[serde(default)]
    pub receipt_delivery: Option<DeliverySpec>,
}

/// Error handling of a flow
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorHandling {
    #[serde(default)]
    pub notify_errors_to_business_application: bool,
    /// Delivery used for errors, defaults to the leg's default delivery
    #[serde(default)]
    pub error_delivery: Option<DeliverySpec>,
}

/// A user-message or pull-request flow within a leg
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flow {
    #[serde(default)]
    pub mpc: Option<String>,
    #[serde(default)]
    pub error_handling: Option<ErrorHandling>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Leg {
    pub label: Label,
    #[serde(default)]
    pub default_delivery: Option<DeliverySpec>,
    #[serde(default)]
    pub receipt: Option<ReceiptConfig>,
    #[serde(default)]
    pub user_message_flow: Option<Flow>,
    #[serde(default)]
    pub pull_request_flows: Vec<Flow>,
}

impl Leg {
    #[must_use]
    pub const fn new(label: Label) -> Self {
        Self {
            label,
            default_delivery: None,
            receipt: None,
            user_message_flow: None,
            pull_request_flows: Vec::new(),
        }
    }

    /// Error handling of the user-message flow
    pub fn user_message_error_handling(&self) -> Option<&ErrorHandling> {
        self.user_message_flow
            .as_ref()
            .and_then(|flow| flow.error_handling.as_ref())
    }

    /// Error handling of the (first) pull-request flow
    pub fn pull_error_handling(&self) -> Option<&ErrorHandling> {
        self.pull_request_flows
            .first()
            .and_then(|flow| flow.error_handling.as_ref())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PMode {
    pub id: String,
    #[serde(default)]
    pub mep_binding: MepBinding,
    #[serde(default)]
    pub legs: Vec<Leg>,
}

impl PMode {
    #[must_use]
    pub fn new(id: impl Into<String>, mep_binding: MepBinding) -> Self {
        Self {
            id: id.into(),
            mep_binding,
            legs: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_leg(mut self, leg: Leg) -> Self {
        self.legs.push(leg);
        self
    }

    pub fn leg(&self, label: Label) -> Option<&Leg> {
        self.legs.iter().find(|leg| leg.label == label)
    }

    /// Leg governing a unit: the labelled one, or the first leg when the unit
    /// carries no label (one-way exchanges only have one)
    pub fn leg_for(&self, label: Option<Label>) -> Option<&Leg> {
        label.map_or_else(|| self.legs.first(), |label| self.leg(label))
    }

    /// Leg whose user message is transferred by pulling, if any
    pub const fn pull_leg(&self) -> Option<Label> {
        match self.mep_binding {
            MepBinding::Pull | MepBinding::PullPush => Some(Label::Request),
            MepBinding::PushPull => Some(Label::Reply),
            MepBinding::Push | MepBinding::PushPush => None,
        }
    }
}

/// Lookup contract of the P-Mode set
pub trait PolicySet: Send + Sync + fmt::Debug {
    /// Find the P-Mode with the given id
    fn get(&self, id: &str) -> Option<Arc<PMode>>;

    /// Leg of `pmode` that uses pulling
    fn pull_leg_of(&self, pmode: &PMode) -> Option<Label> {
        pmode.pull_leg()
    }
}

/// In-memory P-Mode set
#[derive(Debug, Default)]
pub struct MemoryPolicySet {
    pmodes: RwLock<HashMap<String, Arc<PMode>>>,
}

impl MemoryPolicySet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a P-Mode, returning the one it replaced
    pub fn insert(&self, pmode: PMode) -> Option<Arc<PMode>> {
        self.pmodes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(pmode.id.clone(), Arc::new(pmode))
    }

    pub fn remove(&self, id: &str) -> Option<Arc<PMode>> {
        self.pmodes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
    }

    pub fn len(&self) -> usize {
        self.pmodes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<Vec<PMode>> for MemoryPolicySet {
    fn from(pmodes: Vec<PMode>) -> Self {
        let set = Self::new();
        for pmode in pmodes {
            set.insert(pmode);
        }
        set
    }
}

impl PolicySet for MemoryPolicySet {
    fn get(&self, id: &str) -> Option<Arc<PMode>> {
        self.pmodes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }
}
