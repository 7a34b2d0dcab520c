//! Dependency injection providers for service management.
//!
//! One provider per camera package, plus the application state provider and
//! the settings watcher. [`package_provider`] picks the package provider that
//! matches `package.kind` of the loaded settings.

pub mod air_quality;
pub mod app_state;
pub mod event_graphics;
pub mod lux_meter;
pub mod position_image;
pub mod scale;
pub mod settings_watcher;
pub mod sheets;
pub mod temper;
pub mod traits;
pub mod weather;

use std::{future::Future, sync::Arc, time::Duration};

use log::warn;

use crate::{
    app_context::AppState,
    config::PackageCfg,
    event::{Event, EventBus},
};

// Re-export core types for convenience
pub use air_quality::AirQualityServiceProvider;
pub use app_state::AppStateProvider;
pub use event_graphics::EventGraphicsServiceProvider;
pub use lux_meter::LuxMeterServiceProvider;
pub use position_image::PositionImageServiceProvider;
pub use scale::ScaleServiceProvider;
pub use settings_watcher::SettingsWatcherServiceProvider;
pub use sheets::SheetsServiceProvider;
pub use temper::TemperServiceProvider;
pub use traits::{AsyncProvider, ServiceProvider};
pub use weather::WeatherServiceProvider;

/// Priority shared by the package services; they start before the watcher.
const PACKAGE_PRIORITY: i32 = 10;

/// Upper bound for hiding overlays when a package stops.
const CLEANUP_TIMEOUT: Duration = Duration::from_secs(3);

/// Builds the provider for the package named in the settings.
pub fn package_provider(state: Arc<AppState>, event_bus: EventBus) -> Box<dyn ServiceProvider> {
    match state.settings.package.clone() {
        PackageCfg::Scale(cfg) => Box::new(ScaleServiceProvider::new(state, event_bus, cfg)),
        PackageCfg::PositionImage(cfg) => {
            Box::new(PositionImageServiceProvider::new(state, event_bus, cfg))
        }
        PackageCfg::Weather(cfg) => Box::new(WeatherServiceProvider::new(state, event_bus, cfg)),
        PackageCfg::AirQuality(cfg) => {
            Box::new(AirQualityServiceProvider::new(state, event_bus, cfg))
        }
        PackageCfg::Sheets(cfg) => Box::new(SheetsServiceProvider::new(state, event_bus, cfg)),
        PackageCfg::Temper(cfg) => Box::new(TemperServiceProvider::new(state, event_bus, cfg)),
        PackageCfg::LuxMeter(cfg) => Box::new(LuxMeterServiceProvider::new(state, event_bus, cfg)),
        PackageCfg::EventGraphics(cfg) => {
            Box::new(EventGraphicsServiceProvider::new(state, event_bus, cfg))
        }
    }
}

/// Runs a cleanup step, logging instead of failing.
pub(crate) async fn best_effort<F>(what: &str, step: F)
where
    F: Future<Output = crate::error::Result<()>>,
{
    match tokio::time::timeout(CLEANUP_TIMEOUT, step).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("{what}: {e}"),
        Err(_) => warn!("{what}: timed out"),
    }
}

/// Tells subscribers that an overlay got new text.
pub(crate) fn announce(event_bus: &EventBus, service_id: u32, summary: String) {
    // nobody listening is fine
    let _ = event_bus.publish(Event::ReadingPublished {
        service_id,
        summary,
    });
}
