use anyhow::Result;
use async_trait::async_trait;
use log::info;
use serde::Deserialize;
use serde_json::Value;
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;

use crate::{
    app_context::AppState,
    config::AirQualityCfg,
    error::{self, Error},
    event::EventBus,
    providers::{PACKAGE_PRIORITY, announce, best_effort, traits::ServiceProvider},
    runner::run_polling,
    sinks::{DisplayField, FieldPublisher, OverlaySink, PublishOutcome},
    sources::HttpSource,
    task_manager::TaskManager,
    transforms::{aqi::AqiLevel, timefmt},
};

/// Air quality package: waqi.info city feed with an EPA level color.
///
/// # Priority and Criticality
///
/// - **Priority**: 10
/// - **Critical**: Yes
pub struct AirQualityServiceProvider {
    state: Arc<AppState>,
    event_bus: EventBus,
    cfg: AirQualityCfg,
}

impl AirQualityServiceProvider {
    pub fn new(state: Arc<AppState>, event_bus: EventBus, cfg: AirQualityCfg) -> Self {
        Self {
            state,
            event_bus,
            cfg,
        }
    }
}

#[async_trait]
impl ServiceProvider for AirQualityServiceProvider {
    async fn start(&self, task_manager: &mut TaskManager) -> Result<()> {
        let state = self.state.clone();
        let event_bus = self.event_bus.clone();
        let cfg = self.cfg.clone();

        task_manager
            .spawn_task(self.name().to_string(), |cancel_token| async move {
                run_air_quality_service(state, event_bus, cfg, cancel_token).await
            })
            .await
    }

    fn name(&self) -> &'static str {
        "AirQualityService"
    }

    fn priority(&self) -> i32 {
        PACKAGE_PRIORITY
    }

    fn is_critical(&self) -> bool {
        true
    }
}

#[derive(Debug, Deserialize)]
struct Feed {
    status: String,
    data: Value,
}

/// One city observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AirQuality {
    pub aqi: u32,
    pub city: String,
    /// Observation time as reported by the station.
    pub time: Option<String>,
}

impl AirQuality {
    fn from_feed(feed: Feed) -> error::Result<Self> {
        if feed.status != "ok" {
            let reason = feed.data.as_str().unwrap_or("unknown error");
            return Err(Error::Network(format!("waqi: {reason}")));
        }

        // stations without a current value report "-"
        let aqi = match &feed.data["aqi"] {
            Value::Number(n) => n
                .as_f64()
                .filter(|v| v.is_finite() && *v >= 0.0)
                .map(|v| v.round() as u32),
            Value::String(s) => s.trim().parse::<u32>().ok(),
            _ => None,
        }
        .ok_or_else(|| Error::Network("no data".into()))?;

        let city = feed.data["city"]["name"].as_str().unwrap_or_default().to_string();
        let time = feed.data["time"]["iso"]
            .as_str()
            .or_else(|| feed.data["time"]["s"].as_str())
            .map(str::to_string);

        Ok(Self { aqi, city, time })
    }

    pub fn level(&self) -> AqiLevel {
        AqiLevel::from_index(self.aqi)
    }

    pub fn fields(&self, time_format: &str) -> Vec<DisplayField> {
        let level = self.level();
        let updated = self
            .time
            .as_deref()
            .and_then(|t| timefmt::reformat(t, time_format))
            .unwrap_or_default();

        vec![
            DisplayField::new("aqi", self.aqi.to_string()),
            DisplayField::new("level", level.label()).with_color(level.color()),
            DisplayField::new("city", self.city.as_str()),
            DisplayField::new("updated", updated),
        ]
    }
}

/// Polls the waqi.info feed of one city.
pub struct AirQualityService {
    http: HttpSource,
    url: String,
    token: String,
    time_format: String,
    publisher: FieldPublisher,
    event_bus: EventBus,
}

impl AirQualityService {
    pub fn new(
        cfg: &AirQualityCfg,
        http: HttpSource,
        overlay: Arc<dyn OverlaySink>,
        event_bus: EventBus,
    ) -> Self {
        Self {
            http,
            url: format!("{}/feed/{}/", cfg.api_url.trim_end_matches('/'), cfg.city),
            token: cfg.token.clone(),
            time_format: cfg.time_format.clone(),
            publisher: FieldPublisher::new(overlay, cfg.service_id),
            event_bus,
        }
    }

    pub async fn fetch(&self) -> error::Result<AirQuality> {
        let feed: Feed = self
            .http
            .get_json(&self.url, &[("token", self.token.as_str())])
            .await?;
        AirQuality::from_feed(feed)
    }

    pub async fn poll(&self) -> error::Result<PublishOutcome> {
        let reading = self.fetch().await?;
        let outcome = self.publisher.publish(reading.fields(&self.time_format)).await?;
        if outcome == PublishOutcome::Sent {
            announce(
                &self.event_bus,
                self.publisher.service_id(),
                format!("AQI {} ({})", reading.aqi, reading.level().label()),
            );
        }
        Ok(outcome)
    }

    pub async fn stop(&self) {
        best_effort("Air quality: hiding overlay", self.publisher.disable()).await;
    }
}

async fn run_air_quality_service(
    state: Arc<AppState>,
    event_bus: EventBus,
    cfg: AirQualityCfg,
    cancel_token: CancellationToken,
) -> Result<()> {
    let service =
        AirQualityService::new(&cfg, state.http.clone(), state.overlay.clone(), event_bus);
    info!("Air quality: city {}", cfg.city);

    let svc = &service;
    let result = run_polling(
        "AirQuality",
        Duration::from_secs(cfg.interval_secs),
        cancel_token,
        move || async move { svc.poll().await.map(|_| ()) },
    )
    .await;

    service.stop().await;
    Ok(result?)
}
