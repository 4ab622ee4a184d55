use core::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

/// Request to pull a message from a partition channel
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    pub mpc: String,
}

impl PullRequest {
    #[must_use]
    pub fn new(mpc: impl Into<String>) -> Self {
        Self { mpc: mpc.into() }
    }
}

/// Acknowledgement of a received user message
///
/// The receipt body is kept as an opaque serialised fragment.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default, Serialize, Deserialize)]
pub enum Severity {
    #[default]
    Warning,
    Failure,
}

impl Display for Severity {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Warning => "warning",
            Self::Failure => "failure",
        })
    }
}

/// One protocol error, either received in an error signal or generated locally
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EbmsError {
    pub error_code: String,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub short_description: Option<String>,
    #[serde(default)]
    pub detail: Option<String>,
    #[serde(default)]
    pub origin: Option<String>,
    /// Message id of the unit this error is about, if any
    #[serde(default)]
    pub ref_to_message_id: Option<String>,
}

impl EbmsError {
    #[must_use]
    pub fn new(error_code: impl Into<String>, severity: Severity) -> Self {
        Self {
            error_code: error_code.into(),
            severity,
            category: None,
            short_description: None,
            detail: None,
            origin: None,
            ref_to_message_id: None,
        }
    }

    #[must_use]
    pub fn with_ref_to(mut self, message_id: impl Into<String>) -> Self {
        self.ref_to_message_id = Some(message_id.into());
        self
    }

    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

impl Display for EbmsError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.error_code, self.severity)?;
        if let Some(detail) = &self.detail {
            write!(f, ": {detail}")?;
        }
        Ok(())
    }
}

/// Signal carrying one or more protocol errors
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorSignal {
    #[serde(default)]
    pub errors: Vec<EbmsError>,
}

impl ErrorSignal {
    #[must_use]
    pub const fn new(errors: Vec<EbmsError>) -> Self {
        Self { errors }
    }

    /// Highest severity of the contained errors
    pub fn severity(&self) -> Option<Severity> {
        self.errors.iter().map(|e| e.severity).max()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_signal_severity() {
        let mut signal = ErrorSignal::default();
        assert_eq!(signal.severity(), None);

        signal.errors.push(EbmsError::new("EBMS:0006", Severity::Warning));
        assert_eq!(signal.severity(), Some(Severity::Warning));

        signal.errors.push(EbmsError::new("EBMS:0004", Severity::Failure));
        assert_eq!(signal.severity(), Some(Severity::Failure));
    }

    #[test]
    fn test_error_display() {
        let error = EbmsError::new("EBMS:0004", Severity::Failure).with_detail("bad header");
        assert_eq!(error.to_string(), "EBMS:0004 (failure): bad header");
    }
}
