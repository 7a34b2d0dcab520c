//! Debounced text publisher for one overlay service.

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
};

use log::debug;

use super::{DisplayField, OverlaySink};
use crate::error::{Error, Result};

/// What [`FieldPublisher::publish`] did with a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// The payload went out to the overlay service.
    Sent,
    /// Equal to the last payload sent successfully; nothing was sent.
    Unchanged,
    /// Another publish was still in flight; the payload was dropped.
    Busy,
}

/// Pushes field updates to a single overlay service.
///
/// The service is enabled once, right before the first text update. The last
/// successfully sent payload is remembered so repeated readings cost nothing;
/// a failed send leaves it untouched so the next tick retries.
pub struct FieldPublisher {
    overlay: Arc<dyn OverlaySink>,
    service_id: u32,
    last_sent: Mutex<Option<Vec<DisplayField>>>,
    enabled: AtomicBool,
    in_flight: AtomicBool,
}

struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl FieldPublisher {
    pub fn new(overlay: Arc<dyn OverlaySink>, service_id: u32) -> Self {
        Self {
            overlay,
            service_id,
            last_sent: Mutex::new(None),
            enabled: AtomicBool::new(false),
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn service_id(&self) -> u32 {
        self.service_id
    }

    pub async fn publish(&self, fields: Vec<DisplayField>) -> Result<PublishOutcome> {
        if self.is_last_sent(&fields) {
            return Ok(PublishOutcome::Unchanged);
        }

        if self.in_flight.swap(true, Ordering::AcqRel) {
            debug!("Service {}: update still in flight, dropping payload", self.service_id);
            return Ok(PublishOutcome::Busy);
        }
        let _guard = InFlight(&self.in_flight);

        if !self.enabled.load(Ordering::Acquire) {
            self.overlay.set_enabled(self.service_id, true).await?;
            self.enabled.store(true, Ordering::Release);
        }

        self.overlay.update_text(self.service_id, &fields).await?;
        *self.lock_last_sent()? = Some(fields);

        Ok(PublishOutcome::Sent)
    }

    /// Hides the service and forgets the last payload.
    pub async fn disable(&self) -> Result<()> {
        self.overlay.set_enabled(self.service_id, false).await?;
        self.enabled.store(false, Ordering::Release);
        *self.lock_last_sent()? = None;
        Ok(())
    }

    fn is_last_sent(&self, fields: &[DisplayField]) -> bool {
        self.last_sent
            .lock()
            .map(|last| last.as_deref() == Some(fields))
            .unwrap_or(false)
    }

    fn lock_last_sent(&self) -> Result<std::sync::MutexGuard<'_, Option<Vec<DisplayField>>>> {
        self.last_sent
            .lock()
            .map_err(|_| Error::Sink("publisher state poisoned".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sinks::{
        MockOverlaySink,
        fakes::{OverlayCall, RecordingOverlay},
    };
    use mockall::predicate::eq;
    use pretty_assertions::assert_eq;

    fn fields(value: &str) -> Vec<DisplayField> {
        vec![
            DisplayField::new("value", value),
            DisplayField::new("unit", "kg"),
        ]
    }

    #[tokio::test]
    async fn equal_payload_is_sent_once() {
        let mut mock = MockOverlaySink::new();
        mock.expect_set_enabled()
            .with(eq(4), eq(true))
            .times(1)
            .returning(|_, _| Ok(()));
        mock.expect_update_text().times(1).returning(|_, _| Ok(()));

        let publisher = FieldPublisher::new(Arc::new(mock), 4);
        assert_eq!(publisher.publish(fields("12.34")).await.unwrap(), PublishOutcome::Sent);
        assert_eq!(
            publisher.publish(fields("12.34")).await.unwrap(),
            PublishOutcome::Unchanged
        );
    }

    #[tokio::test]
    async fn enables_once_then_updates() {
        let overlay = Arc::new(RecordingOverlay::default());
        let publisher = FieldPublisher::new(overlay.clone(), 2);

        publisher.publish(fields("1")).await.unwrap();
        publisher.publish(fields("2")).await.unwrap();

        assert_eq!(
            overlay.calls(),
            vec![
                OverlayCall::Enabled(2, true),
                OverlayCall::Text(2, fields("1")),
                OverlayCall::Text(2, fields("2")),
            ]
        );
    }

    #[tokio::test]
    async fn failed_send_is_retried_next_time() {
        let overlay = Arc::new(RecordingOverlay::default());
        let publisher = FieldPublisher::new(overlay.clone(), 2);

        *overlay.fail_text.lock().unwrap() = true;
        assert!(matches!(
            publisher.publish(fields("5")).await,
            Err(Error::Sink(_))
        ));

        *overlay.fail_text.lock().unwrap() = false;
        assert_eq!(publisher.publish(fields("5")).await.unwrap(), PublishOutcome::Sent);
        assert_eq!(overlay.text_calls(), vec![(2, fields("5"))]);
    }

    #[tokio::test]
    async fn busy_while_in_flight() {
        let overlay = Arc::new(RecordingOverlay::default());
        let publisher = FieldPublisher::new(overlay.clone(), 2);

        publisher.in_flight.store(true, Ordering::Release);
        assert_eq!(publisher.publish(fields("7")).await.unwrap(), PublishOutcome::Busy);
        assert!(overlay.calls().is_empty());

        publisher.in_flight.store(false, Ordering::Release);
        assert_eq!(publisher.publish(fields("7")).await.unwrap(), PublishOutcome::Sent);
    }

    #[tokio::test]
    async fn disable_forgets_payload() {
        let overlay = Arc::new(RecordingOverlay::default());
        let publisher = FieldPublisher::new(overlay.clone(), 9);

        publisher.publish(fields("1")).await.unwrap();
        publisher.disable().await.unwrap();
        assert_eq!(publisher.publish(fields("1")).await.unwrap(), PublishOutcome::Sent);

        assert_eq!(
            overlay.enable_calls(),
            vec![(9, true), (9, false), (9, true)]
        );
    }
}
