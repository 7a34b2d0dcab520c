use anyhow::Result;
use async_trait::async_trait;
use log::info;
use reqwest::Url;
use serde::Deserialize;
use serde_json::Value;
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;

use crate::{
    app_context::AppState,
    config::SheetsCfg,
    error::{self, Error},
    event::EventBus,
    providers::{PACKAGE_PRIORITY, announce, best_effort, traits::ServiceProvider},
    runner::run_polling,
    sinks::{DisplayField, FieldPublisher, OverlaySink, PublishOutcome},
    sources::HttpSource,
    task_manager::TaskManager,
    transforms::sheets::{CellRef, lookup, range_origin},
};

/// Sheets package: spreadsheet cells mapped onto overlay fields.
///
/// # Priority and Criticality
///
/// - **Priority**: 10
/// - **Critical**: Yes
pub struct SheetsServiceProvider {
    state: Arc<AppState>,
    event_bus: EventBus,
    cfg: SheetsCfg,
}

impl SheetsServiceProvider {
    pub fn new(state: Arc<AppState>, event_bus: EventBus, cfg: SheetsCfg) -> Self {
        Self {
            state,
            event_bus,
            cfg,
        }
    }
}

#[async_trait]
impl ServiceProvider for SheetsServiceProvider {
    async fn start(&self, task_manager: &mut TaskManager) -> Result<()> {
        let state = self.state.clone();
        let event_bus = self.event_bus.clone();
        let cfg = self.cfg.clone();

        task_manager
            .spawn_task(self.name().to_string(), |cancel_token| async move {
                run_sheets_service(state, event_bus, cfg, cancel_token).await
            })
            .await
    }

    fn name(&self) -> &'static str {
        "SheetsService"
    }

    fn priority(&self) -> i32 {
        PACKAGE_PRIORITY
    }

    fn is_critical(&self) -> bool {
        true
    }
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

fn cell_text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// `{api_url}/v4/spreadsheets/{id}/values/{range}` with the range escaped.
fn values_url(api_url: &str, spreadsheet_id: &str, range: &str) -> error::Result<String> {
    let mut url =
        Url::parse(api_url).map_err(|e| Error::Fatal(format!("invalid api_url '{api_url}': {e}")))?;
    url.path_segments_mut()
        .map_err(|()| Error::Fatal(format!("invalid api_url '{api_url}'")))?
        .pop_if_empty()
        .extend(["v4", "spreadsheets", spreadsheet_id, "values", range]);
    Ok(url.to_string())
}

/// Polls one range and publishes the mapped cells.
pub struct SheetsService {
    http: HttpSource,
    url: String,
    api_key: String,
    origin: CellRef,
    cells: Vec<(CellRef, String)>,
    publisher: FieldPublisher,
    event_bus: EventBus,
}

impl SheetsService {
    pub fn new(
        cfg: &SheetsCfg,
        http: HttpSource,
        overlay: Arc<dyn OverlaySink>,
        event_bus: EventBus,
    ) -> error::Result<Self> {
        let origin = range_origin(&cfg.range)
            .ok_or_else(|| Error::Fatal(format!("invalid range '{}'", cfg.range)))?;
        let cells = cfg
            .cells
            .iter()
            .map(|c| {
                CellRef::parse(&c.cell)
                    .map(|cell| (cell, c.field.clone()))
                    .ok_or_else(|| Error::Fatal(format!("invalid cell '{}'", c.cell)))
            })
            .collect::<error::Result<Vec<_>>>()?;

        Ok(Self {
            http,
            url: values_url(&cfg.api_url, &cfg.spreadsheet_id, &cfg.range)?,
            api_key: cfg.api_key.clone(),
            origin,
            cells,
            publisher: FieldPublisher::new(overlay, cfg.service_id),
            event_bus,
        })
    }

    pub async fn fetch(&self) -> error::Result<Vec<Vec<String>>> {
        let range: ValueRange = self
            .http
            .get_json(&self.url, &[("key", self.api_key.as_str())])
            .await?;
        Ok(range
            .values
            .into_iter()
            .map(|row| row.into_iter().map(cell_text).collect())
            .collect())
    }

    /// Missing cells render as empty text.
    pub fn fields(&self, values: &[Vec<String>]) -> Vec<DisplayField> {
        self.cells
            .iter()
            .map(|(cell, field)| {
                DisplayField::new(
                    field.as_str(),
                    lookup(values, self.origin, *cell).unwrap_or_default(),
                )
            })
            .collect()
    }

    pub async fn poll(&self) -> error::Result<PublishOutcome> {
        let values = self.fetch().await?;
        let fields = self.fields(&values);
        let summary = fields
            .iter()
            .map(|f| f.text.as_str())
            .collect::<Vec<_>>()
            .join(" | ");

        let outcome = self.publisher.publish(fields).await?;
        if outcome == PublishOutcome::Sent {
            announce(&self.event_bus, self.publisher.service_id(), summary);
        }
        Ok(outcome)
    }

    pub async fn stop(&self) {
        best_effort("Sheets: hiding overlay", self.publisher.disable()).await;
    }
}

async fn run_sheets_service(
    state: Arc<AppState>,
    event_bus: EventBus,
    cfg: SheetsCfg,
    cancel_token: CancellationToken,
) -> Result<()> {
    let service = SheetsService::new(&cfg, state.http.clone(), state.overlay.clone(), event_bus)?;
    info!("Sheets: {} range {}", cfg.spreadsheet_id, cfg.range);

    let svc = &service;
    let result = run_polling(
        "Sheets",
        Duration::from_secs(cfg.interval_secs),
        cancel_token,
        move || async move { svc.poll().await.map(|_| ()) },
    )
    .await;

    service.stop().await;
    Ok(result?)
}
