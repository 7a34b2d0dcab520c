//! Timed show/hide of overlay services.

use std::{sync::Arc, time::Duration};

use dashmap::DashMap;
use log::{debug, warn};
use tokio::task::JoinHandle;

use super::OverlaySink;
use crate::error::Result;

/// At most one pending hide per service id.
///
/// Re-arming a service aborts its previous hide before the new one is
/// scheduled, so a burst of events keeps the service visible for
/// `duration` after the last one.
pub struct VisibilityTimers {
    overlay: Arc<dyn OverlaySink>,
    pending: DashMap<u32, JoinHandle<()>>,
}

impl VisibilityTimers {
    pub fn new(overlay: Arc<dyn OverlaySink>) -> Self {
        Self {
            overlay,
            pending: DashMap::new(),
        }
    }

    /// Shows `service_id` and hides it again after `duration`.
    pub async fn show_for(&self, service_id: u32, duration: Duration) -> Result<()> {
        self.overlay.set_enabled(service_id, true).await?;
        self.cancel(service_id);

        let overlay = self.overlay.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            debug!("Service {service_id}: display time elapsed");
            if let Err(e) = overlay.set_enabled(service_id, false).await {
                warn!("Service {service_id}: failed to hide: {e}");
            }
        });

        if let Some(previous) = self.pending.insert(service_id, handle) {
            previous.abort();
        }
        Ok(())
    }

    /// Shows `service_id` with no hide scheduled.
    pub async fn show(&self, service_id: u32) -> Result<()> {
        self.cancel(service_id);
        self.overlay.set_enabled(service_id, true).await
    }

    pub async fn hide_now(&self, service_id: u32) -> Result<()> {
        self.cancel(service_id);
        self.overlay.set_enabled(service_id, false).await
    }

    pub fn cancel(&self, service_id: u32) {
        if let Some((_, handle)) = self.pending.remove(&service_id) {
            handle.abort();
        }
    }

    pub fn cancel_all(&self) {
        self.pending.retain(|_, handle| {
            handle.abort();
            false
        });
    }

    /// Number of hides still waiting to fire.
    pub fn pending(&self) -> usize {
        self.pending
            .iter()
            .filter(|entry| !entry.value().is_finished())
            .count()
    }
}

impl Drop for VisibilityTimers {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
