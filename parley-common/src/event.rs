//! Lifecycle events raised while processing message units
//!
//! Events are fire-and-forget: whatever a handler does with an event, its
//! failure never reaches the code that raised it.

use std::{
    error::Error as StdError,
    fmt,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{Arc, PoisonError, RwLock},
};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{error, trace, warn};

use crate::message::MessageUnit;

/// What happened to the unit
#[derive(Clone, Debug)]
pub enum EventKind {
    /// The unit was handed to the business application
    Delivered,
    /// Handing the unit to the business application failed
    DeliveryFailed {
        cause: Arc<dyn StdError + Send + Sync>,
    },
}

impl EventKind {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Delivered => "Delivered",
            Self::DeliveryFailed { .. } => "DeliveryFailed",
        }
    }
}

/// A lifecycle event together with the unit it concerns
#[derive(Clone, Debug)]
pub struct ProcessingEvent {
    pub kind: EventKind,
    pub unit: MessageUnit,
    pub raised_at: DateTime<Utc>,
}

impl ProcessingEvent {
    #[must_use]
    pub fn delivered(unit: MessageUnit) -> Self {
        Self {
            kind: EventKind::Delivered,
            unit,
            raised_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn delivery_failed(unit: MessageUnit, cause: Arc<dyn StdError + Send + Sync>) -> Self {
        Self {
            kind: EventKind::DeliveryFailed { cause },
            unit,
            raised_at: Utc::now(),
        }
    }
}

/// Receiver of lifecycle events
pub trait EventProcessor: Send + Sync + fmt::Debug {
    /// Raise an event. Must not fail or panic into the caller.
    fn raise(&self, event: ProcessingEvent);
}

#[derive(Debug, Error)]
pub enum EventError {
    #[error("Event handler {handler} failed: {reason}")]
    Failed { handler: String, reason: String },
}

/// A consumer of events registered with an [`EventDispatcher`]
pub trait EventHandler: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Whether this handler wants to see `event`
    fn accepts(&self, _event: &ProcessingEvent) -> bool {
        true
    }

    /// Handle an event
    ///
    /// # Errors
    /// Any error is logged by the dispatcher and otherwise ignored
    fn handle(&self, event: &ProcessingEvent) -> Result<(), EventError>;
}

/// Fans events out to every registered handler
///
/// Handler errors and panics are logged and swallowed.
#[derive(Debug, Default)]
pub struct EventDispatcher {
    handlers: RwLock<Vec<Arc<dyn EventHandler>>>,
}

impl EventDispatcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, handler: Arc<dyn EventHandler>) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handler);
    }

    pub fn handler_count(&self) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl EventProcessor for EventDispatcher {
    fn raise(&self, event: ProcessingEvent) {
        let handlers = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        trace!(
            event = event.kind.name(),
            message_id = %event.unit.message_id(),
            handlers = handlers.len(),
            "Raising event"
        );

        for handler in handlers {
            match catch_unwind(AssertUnwindSafe(|| {
                handler.accepts(&event).then(|| handler.handle(&event))
            })) {
                Ok(None | Some(Ok(()))) => {}
                Ok(Some(Err(e))) => {
                    warn!(
                        event = event.kind.name(),
                        message_id = %event.unit.message_id(),
                        error = %e,
                        "Event handler failed"
                    );
                }
                Err(_) => {
                    error!(
                        event = event.kind.name(),
                        message_id = %event.unit.message_id(),
                        handler = handler.name(),
                        "Event handler panicked"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::message::{MessageUnit, Receipt};

    #[derive(Debug, Default)]
    struct Recorder {
        seen: Mutex<Vec<&'static str>>,
    }

    impl EventHandler for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        fn handle(&self, event: &ProcessingEvent) -> Result<(), EventError> {
            self.seen.lock().unwrap().push(event.kind.name());
            Ok(())
        }
    }

    #[derive(Debug)]
    struct OnlyFailures;

    impl EventHandler for OnlyFailures {
        fn name(&self) -> &str {
            "only-failures"
        }

        fn accepts(&self, event: &ProcessingEvent) -> bool {
            matches!(event.kind, EventKind::DeliveryFailed { .. })
        }

        fn handle(&self, _event: &ProcessingEvent) -> Result<(), EventError> {
            Err(EventError::Failed {
                handler: self.name().to_string(),
                reason: "unreachable sink".to_string(),
            })
        }
    }

    #[derive(Debug)]
    struct Panicking;

    impl EventHandler for Panicking {
        fn name(&self) -> &str {
            "panicking"
        }

        fn handle(&self, _event: &ProcessingEvent) -> Result<(), EventError> {
            panic!("handler bug");
        }
    }

    fn unit() -> MessageUnit {
        MessageUnit::receipt(Receipt::default()).with_message_id("r-1")
    }

    #[test]
    fn test_failing_handlers_do_not_stop_dispatch() {
        let dispatcher = EventDispatcher::new();
        let recorder = Arc::new(Recorder::default());

        dispatcher.register(Arc::new(Panicking));
        dispatcher.register(Arc::new(OnlyFailures));
        dispatcher.register(recorder.clone());
        assert_eq!(dispatcher.handler_count(), 3);

        dispatcher.raise(ProcessingEvent::delivered(unit()));
        dispatcher.raise(ProcessingEvent::delivery_failed(
            unit(),
            Arc::new(std::io::Error::other("disk full")),
        ));

        assert_eq!(
            *recorder.seen.lock().unwrap(),
            vec!["Delivered", "DeliveryFailed"]
        );
    }
}
