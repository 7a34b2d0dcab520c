use anyhow::Result;
use async_trait::async_trait;
use log::{debug, info, warn};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::{
    app_context::AppState,
    config::LuxMeterCfg,
    error,
    event::EventBus,
    providers::{PACKAGE_PRIORITY, announce, best_effort, traits::ServiceProvider},
    sinks::{DisplayField, FieldPublisher, OverlaySink, PublishOutcome},
    sources::{Frames, StxLfCodec},
    task_manager::TaskManager,
    transforms::{lux::parse_lux, units::format_fixed},
};

/// Lux meter package: STX framed illuminance readings as overlay text.
///
/// # Priority and Criticality
///
/// - **Priority**: 10
/// - **Critical**: Yes
pub struct LuxMeterServiceProvider {
    state: Arc<AppState>,
    event_bus: EventBus,
    cfg: LuxMeterCfg,
}

impl LuxMeterServiceProvider {
    pub fn new(state: Arc<AppState>, event_bus: EventBus, cfg: LuxMeterCfg) -> Self {
        Self {
            state,
            event_bus,
            cfg,
        }
    }
}

#[async_trait]
impl ServiceProvider for LuxMeterServiceProvider {
    async fn start(&self, task_manager: &mut TaskManager) -> Result<()> {
        let state = self.state.clone();
        let event_bus = self.event_bus.clone();
        let cfg = self.cfg.clone();

        task_manager
            .spawn_task(self.name().to_string(), |cancel_token| async move {
                run_lux_meter_service(state, event_bus, cfg, cancel_token).await
            })
            .await
    }

    fn name(&self) -> &'static str {
        "LuxMeterService"
    }

    fn priority(&self) -> i32 {
        PACKAGE_PRIORITY
    }

    fn is_critical(&self) -> bool {
        true
    }
}

pub struct LuxMeterService {
    publisher: FieldPublisher,
    field: String,
    precision: usize,
    event_bus: EventBus,
}

impl LuxMeterService {
    pub fn new(cfg: &LuxMeterCfg, overlay: Arc<dyn OverlaySink>, event_bus: EventBus) -> Self {
        Self {
            publisher: FieldPublisher::new(overlay, cfg.service_id),
            field: cfg.field.clone(),
            precision: cfg.precision,
            event_bus,
        }
    }

    /// Publishes one frame payload rounded to the configured precision.
    /// Readings that round to the text already shown are not sent again.
    pub async fn handle_frame(&self, payload: &str) -> error::Result<Option<PublishOutcome>> {
        let Some(lux) = parse_lux(payload) else {
            debug!("Lux: skipping frame {payload:?}");
            return Ok(None);
        };

        let text = format_fixed(lux, self.precision);
        let outcome = self
            .publisher
            .publish(vec![DisplayField::new(self.field.as_str(), text.as_str())])
            .await?;
        if outcome == PublishOutcome::Sent {
            announce(&self.event_bus, self.publisher.service_id(), format!("{text} lx"));
        }
        Ok(Some(outcome))
    }

    pub async fn stop(&self) {
        best_effort("Lux: hiding overlay", self.publisher.disable()).await;
    }
}

async fn run_lux_meter_service(
    state: Arc<AppState>,
    event_bus: EventBus,
    cfg: LuxMeterCfg,
    cancel_token: CancellationToken,
) -> Result<()> {
    let stream = cfg
        .source
        .open(&state.sysfs_root, state.settings.request_timeout())
        .await?;
    let mut frames = Frames::new(cfg.source.to_string(), stream, StxLfCodec::new());
    let service = LuxMeterService::new(&cfg, state.overlay.clone(), event_bus);
    info!("Lux: reading {}", cfg.source);

    let result = pump(&service, &mut frames, &cancel_token).await;
    service.stop().await;
    Ok(result?)
}

async fn pump(
    service: &LuxMeterService,
    frames: &mut Frames<StxLfCodec>,
    cancel_token: &CancellationToken,
) -> error::Result<()> {
    while let Some(frame) = frames.next_or_cancelled(cancel_token).await? {
        if let Err(e) = service.handle_frame(&frame).await {
            warn!("Lux: {e}");
        }
    }
    Ok(())
}
