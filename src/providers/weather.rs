use anyhow::Result;
use async_trait::async_trait;
use log::info;
use serde::Deserialize;
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;

use crate::{
    app_context::AppState,
    config::WeatherCfg,
    error::{self, Error},
    event::EventBus,
    providers::{PACKAGE_PRIORITY, announce, best_effort, traits::ServiceProvider},
    runner::run_polling,
    sinks::{DisplayField, FieldPublisher, OverlaySink, PublishOutcome},
    sources::HttpSource,
    task_manager::TaskManager,
    transforms::{
        compass,
        units::{UnitSystem, format_fixed},
    },
};

/// Weather package: AccuWeather current conditions as overlay text.
///
/// # Priority and Criticality
///
/// - **Priority**: 10
/// - **Critical**: Yes
pub struct WeatherServiceProvider {
    state: Arc<AppState>,
    event_bus: EventBus,
    cfg: WeatherCfg,
}

impl WeatherServiceProvider {
    pub fn new(state: Arc<AppState>, event_bus: EventBus, cfg: WeatherCfg) -> Self {
        Self {
            state,
            event_bus,
            cfg,
        }
    }
}

#[async_trait]
impl ServiceProvider for WeatherServiceProvider {
    async fn start(&self, task_manager: &mut TaskManager) -> Result<()> {
        let state = self.state.clone();
        let event_bus = self.event_bus.clone();
        let cfg = self.cfg.clone();

        task_manager
            .spawn_task(self.name().to_string(), |cancel_token| async move {
                run_weather_service(state, event_bus, cfg, cancel_token).await
            })
            .await
    }

    fn name(&self) -> &'static str {
        "WeatherService"
    }

    fn priority(&self) -> i32 {
        PACKAGE_PRIORITY
    }

    fn is_critical(&self) -> bool {
        true
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CurrentConditions {
    weather_text: String,
    temperature: Measure,
    relative_humidity: Option<f64>,
    wind: Option<Wind>,
    pressure: Option<Measure>,
    #[serde(rename = "Precip1hr")]
    precip_1hr: Option<Measure>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Measure {
    metric: MetricValue,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct MetricValue {
    value: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Wind {
    direction: WindDirection,
    speed: Measure,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WindDirection {
    degrees: f64,
}

/// Current conditions in metric units.
#[derive(Debug, Clone, PartialEq)]
pub struct WeatherReading {
    pub temperature_c: f64,
    pub humidity: Option<f64>,
    pub wind_kmh: Option<f64>,
    pub wind_degrees: Option<f64>,
    pub pressure_mbar: Option<f64>,
    pub precipitation_mm: Option<f64>,
    pub condition: String,
}

impl From<CurrentConditions> for WeatherReading {
    fn from(c: CurrentConditions) -> Self {
        Self {
            temperature_c: c.temperature.metric.value,
            humidity: c.relative_humidity,
            wind_kmh: c.wind.as_ref().map(|w| w.speed.metric.value),
            wind_degrees: c.wind.as_ref().map(|w| w.direction.degrees),
            pressure_mbar: c.pressure.map(|p| p.metric.value),
            precipitation_mm: c.precip_1hr.map(|p| p.metric.value),
            condition: c.weather_text,
        }
    }
}

impl WeatherReading {
    /// Overlay fields in the requested unit system. Values the API left out
    /// render as empty text.
    pub fn fields(&self, units: UnitSystem) -> Vec<DisplayField> {
        let imperial = units == UnitSystem::Imperial;
        let with_suffix = |value: Option<f64>, precision: usize, suffix: &str| {
            value
                .map(|v| format!("{} {suffix}", format_fixed(v, precision)))
                .unwrap_or_default()
        };

        vec![
            DisplayField::new(
                "temperature",
                with_suffix(
                    Some(units.temperature(self.temperature_c)),
                    1,
                    units.temperature_suffix(),
                ),
            ),
            DisplayField::new("humidity", with_suffix(self.humidity, 0, "%")),
            DisplayField::new(
                "wind_speed",
                with_suffix(self.wind_kmh.map(|v| units.speed(v)), 1, units.speed_suffix()),
            ),
            DisplayField::new(
                "wind_direction",
                self.wind_degrees.map(compass::direction).unwrap_or_default(),
            ),
            DisplayField::new(
                "pressure",
                with_suffix(
                    self.pressure_mbar.map(|v| units.pressure(v)),
                    if imperial { 2 } else { 0 },
                    units.pressure_suffix(),
                ),
            ),
            DisplayField::new(
                "precipitation",
                with_suffix(
                    self.precipitation_mm.map(|v| units.precipitation(v)),
                    if imperial { 2 } else { 1 },
                    units.precipitation_suffix(),
                ),
            ),
            DisplayField::new("condition", self.condition.as_str()),
        ]
    }
}

/// Polls current conditions for one location.
pub struct WeatherService {
    http: HttpSource,
    url: String,
    api_key: String,
    units: UnitSystem,
    publisher: FieldPublisher,
    event_bus: EventBus,
}

impl WeatherService {
    pub fn new(
        cfg: &WeatherCfg,
        http: HttpSource,
        overlay: Arc<dyn OverlaySink>,
        event_bus: EventBus,
    ) -> Self {
        Self {
            http,
            url: format!(
                "{}/currentconditions/v1/{}",
                cfg.api_url.trim_end_matches('/'),
                cfg.location_key
            ),
            api_key: cfg.api_key.clone(),
            units: cfg.units,
            publisher: FieldPublisher::new(overlay, cfg.service_id),
            event_bus,
        }
    }

    pub async fn fetch(&self) -> error::Result<WeatherReading> {
        let conditions: Vec<CurrentConditions> = self
            .http
            .get_json(&self.url, &[("apikey", self.api_key.as_str()), ("details", "true")])
            .await?;
        conditions
            .into_iter()
            .next()
            .map(WeatherReading::from)
            .ok_or_else(|| Error::Network("no current conditions".into()))
    }

    pub async fn poll(&self) -> error::Result<PublishOutcome> {
        let reading = self.fetch().await?;
        let outcome = self.publisher.publish(reading.fields(self.units)).await?;
        if outcome == PublishOutcome::Sent {
            announce(
                &self.event_bus,
                self.publisher.service_id(),
                format!(
                    "{} {}, {}",
                    format_fixed(self.units.temperature(reading.temperature_c), 1),
                    self.units.temperature_suffix(),
                    reading.condition
                ),
            );
        }
        Ok(outcome)
    }

    pub async fn stop(&self) {
        best_effort("Weather: hiding overlay", self.publisher.disable()).await;
    }
}

async fn run_weather_service(
    state: Arc<AppState>,
    event_bus: EventBus,
    cfg: WeatherCfg,
    cancel_token: CancellationToken,
) -> Result<()> {
    let service = WeatherService::new(&cfg, state.http.clone(), state.overlay.clone(), event_bus);
    info!("Weather: location {}", cfg.location_key);

    let svc = &service;
    let result = run_polling(
        "Weather",
        Duration::from_secs(cfg.interval_secs),
        cancel_token,
        move || async move { svc.poll().await.map(|_| ()) },
    )
    .await;

    service.stop().await;
    Ok(result?)
}
