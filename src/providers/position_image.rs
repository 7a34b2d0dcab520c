use anyhow::Result;
use async_trait::async_trait;
use log::{debug, info, warn};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::{
    app_context::AppState,
    config::PositionImageCfg,
    error,
    event::EventBus,
    providers::{PACKAGE_PRIORITY, announce, best_effort, traits::ServiceProvider},
    sinks::OverlaySink,
    sources::{Frames, LineCodec},
    task_manager::TaskManager,
    transforms::{
        geo::{Area, Position, select_area, selected_services},
        nmea::{NmeaError, parse_sentence},
    },
};

/// Position image package: GPS fixes pick which overlay services are shown.
///
/// # Priority and Criticality
///
/// - **Priority**: 10
/// - **Critical**: Yes
pub struct PositionImageServiceProvider {
    state: Arc<AppState>,
    event_bus: EventBus,
    cfg: PositionImageCfg,
}

impl PositionImageServiceProvider {
    pub fn new(state: Arc<AppState>, event_bus: EventBus, cfg: PositionImageCfg) -> Self {
        Self {
            state,
            event_bus,
            cfg,
        }
    }
}

#[async_trait]
impl ServiceProvider for PositionImageServiceProvider {
    async fn start(&self, task_manager: &mut TaskManager) -> Result<()> {
        let state = self.state.clone();
        let event_bus = self.event_bus.clone();
        let cfg = self.cfg.clone();

        task_manager
            .spawn_task(self.name().to_string(), |cancel_token| async move {
                run_position_image_service(state, event_bus, cfg, cancel_token).await
            })
            .await
    }

    fn name(&self) -> &'static str {
        "PositionImageService"
    }

    fn priority(&self) -> i32 {
        PACKAGE_PRIORITY
    }

    fn is_critical(&self) -> bool {
        true
    }
}

/// Keeps the visible service set in line with the latest fix.
pub struct PositionImageService {
    overlay: Arc<dyn OverlaySink>,
    event_bus: EventBus,
    areas: Vec<Area>,
    all_ids: Vec<u32>,
    /// `None` until the first fix has been applied.
    shown: Option<Vec<u32>>,
}

impl PositionImageService {
    pub fn new(cfg: &PositionImageCfg, overlay: Arc<dyn OverlaySink>, event_bus: EventBus) -> Self {
        let mut all_ids: Vec<u32> = cfg
            .areas
            .iter()
            .flat_map(|a| a.service_ids.iter().copied())
            .collect();
        all_ids.sort_unstable();
        all_ids.dedup();

        Self {
            overlay,
            event_bus,
            areas: cfg.areas.clone(),
            all_ids,
            shown: None,
        }
    }

    pub fn shown(&self) -> Option<&[u32]> {
        self.shown.as_deref()
    }

    /// Parses one NMEA line and applies it. Lines without a usable fix are
    /// skipped.
    pub async fn handle_line(&mut self, line: &str) -> error::Result<bool> {
        match parse_sentence(line) {
            Ok(point) => self.handle_fix(point).await,
            Err(e @ NmeaError::BadChecksum { .. }) | Err(e @ NmeaError::Malformed(_)) => {
                warn!("Position: dropping sentence: {e}");
                Ok(false)
            }
            Err(e) => {
                debug!("Position: {e}");
                Ok(false)
            }
        }
    }

    /// Shows the services of the area containing `point` and hides the rest.
    /// Returns whether anything changed.
    ///
    /// The first fix also hides every configured service that is not selected,
    /// so leftovers from a previous run disappear.
    pub async fn handle_fix(&mut self, point: Position) -> error::Result<bool> {
        let selected = selected_services(&self.areas, point);
        if self.shown.as_deref() == Some(selected.as_slice()) {
            return Ok(false);
        }

        let previous = self.shown.as_deref().unwrap_or(&self.all_ids);
        let to_hide: Vec<u32> = previous
            .iter()
            .copied()
            .filter(|id| !selected.contains(id))
            .collect();
        let to_show: Vec<u32> = match &self.shown {
            Some(shown) => selected
                .iter()
                .copied()
                .filter(|id| !shown.contains(id))
                .collect(),
            None => selected.clone(),
        };

        for id in &to_hide {
            self.overlay.set_enabled(*id, false).await?;
        }
        for id in &to_show {
            self.overlay.set_enabled(*id, true).await?;
        }

        let area = select_area(&self.areas, point).map_or("-", |a| a.name.as_str());
        info!(
            "Position {:.5},{:.5}: area {area}, showing {:?}",
            point.lat, point.lon, selected
        );
        for id in &to_show {
            announce(&self.event_bus, *id, format!("area {area}"));
        }

        self.shown = Some(selected);
        Ok(true)
    }

    pub async fn stop(&self) {
        for id in self.shown.iter().flatten() {
            best_effort("Position: hiding overlay", self.overlay.set_enabled(*id, false)).await;
        }
    }
}

async fn run_position_image_service(
    state: Arc<AppState>,
    event_bus: EventBus,
    cfg: PositionImageCfg,
    cancel_token: CancellationToken,
) -> Result<()> {
    let stream = cfg
        .source
        .open(&state.sysfs_root, state.settings.request_timeout())
        .await?;
    let mut frames = Frames::new(cfg.source.to_string(), stream, LineCodec::new());
    let mut service = PositionImageService::new(&cfg, state.overlay.clone(), event_bus);
    info!("Position: reading NMEA from {}", cfg.source);

    let result = pump(&mut service, &mut frames, &cancel_token).await;
    service.stop().await;
    Ok(result?)
}

async fn pump(
    service: &mut PositionImageService,
    frames: &mut Frames<LineCodec>,
    cancel_token: &CancellationToken,
) -> error::Result<()> {
    while let Some(line) = frames.next_or_cancelled(cancel_token).await? {
        if let Err(e) = service.handle_line(&line).await {
            warn!("Position: {e}");
        }
    }
    Ok(())
}
