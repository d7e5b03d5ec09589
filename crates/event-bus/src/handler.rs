use async_trait::async_trait;

use crate::PaymentCompleted;
use crate::error::HandlerError;

/// Capability implemented by services that react to bus events.
///
/// One method per event kind. Services override the ones they understand;
/// the defaults acknowledge without doing anything. Delivery is at least
/// once, so every implementation must tolerate seeing the same envelope
/// again. Returning an error leaves the record uncommitted and it will be
/// delivered again.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Name used in logs and metrics.
    fn name(&self) -> &'static str;

    /// Reacts to a captured payment.
    async fn handle_payment_completed(
        &self,
        event: &PaymentCompleted,
    ) -> Result<(), HandlerError> {
        tracing::debug!(handler = self.name(), payment_id = %event.payment_id, "event ignored");
        Ok(())
    }
}

#[async_trait]
impl<H: EventHandler + ?Sized> EventHandler for std::sync::Arc<H> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    async fn handle_payment_completed(
        &self,
        event: &PaymentCompleted,
    ) -> Result<(), HandlerError> {
        (**self).handle_payment_completed(event).await
    }
}
