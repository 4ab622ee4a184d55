use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::UnitId;

/// Business context of a user message
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollaborationInfo {
    #[serde(default)]
    pub service: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub conversation_id: Option<String>,
}

/// A primary business message
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserMessage {
    /// Message partition channel the message is assigned to
    #[serde(default)]
    pub mpc: Option<String>,
    #[serde(default)]
    pub collaboration: CollaborationInfo,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    #[serde(default)]
    pub payloads: Vec<Payload>,
}

/// Metadata describing one payload of a user message
///
/// The content itself is never held here; `location` points at wherever the
/// pipeline stored it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    /// Reference of the payload inside the message (e.g. `cid:...`)
    pub content_id: String,
    /// Unit that owns this payload, assigned when the unit is stored
    #[serde(default)]
    pub owner: Option<UnitId>,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl Payload {
    #[must_use]
    pub fn new(content_id: impl Into<String>) -> Self {
        Self {
            content_id: content_id.into(),
            owner: None,
            mime_type: None,
            location: None,
            properties: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    #[must_use]
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }
}
