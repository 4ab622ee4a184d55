//! Delivery methods and the factories that build them

use std::{collections::BTreeMap, fmt::Debug, sync::Arc};

use async_trait::async_trait;
use parley_common::MessageUnit;
use tokio::sync::oneshot;

use crate::error::DeliveryError;

/// Completion of an asynchronous delivery
///
/// Resolves once the method has an outcome. A dropped sender means the method
/// gave up without reporting one.
pub type DeliveryTicket = oneshot::Receiver<Result<(), DeliveryError>>;

/// Hands message units to the business application
///
/// A method may hold resources (connections, open directories, credentials).
/// Cached methods are shared between deliveries and get
/// [`DeliveryMethod::shutdown`] exactly once when they leave the cache.
#[async_trait]
pub trait DeliveryMethod: Send + Sync + Debug + 'static {
    /// Deliver `unit`, returning once the outcome is known
    ///
    /// # Errors
    /// Whatever prevented delivery; permanent errors end processing of the unit
    async fn deliver(&self, unit: &MessageUnit) -> Result<(), DeliveryError>;

    /// Start delivering `unit` without waiting for the outcome
    ///
    /// The default runs [`DeliveryMethod::deliver`] on a new task. Methods
    /// with their own queueing can complete the ticket from anywhere.
    fn dispatch(self: Arc<Self>, unit: MessageUnit) -> DeliveryTicket {
        let (sender, ticket) = oneshot::channel();
        tokio::spawn(async move {
            let result = self.deliver(&unit).await;
            // The receiving side only goes away when the runtime shuts down
            let _ = sender.send(result);
        });
        ticket
    }

    /// Release held resources
    ///
    /// # Errors
    /// Cleanup failures are logged by the caller and otherwise ignored
    fn shutdown(&self) -> Result<(), DeliveryError> {
        Ok(())
    }
}

/// Builds delivery methods from the settings of a delivery spec
pub trait DeliveryMethodFactory: Send + Sync + Debug {
    /// # Errors
    /// Invalid or incomplete settings
    fn create(
        &self,
        settings: &BTreeMap<String, String>,
    ) -> Result<Arc<dyn DeliveryMethod>, DeliveryError>;
}
