use anyhow::Result;
use async_trait::async_trait;
use hidapi::HidApi;
use log::{info, warn};
use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::{Duration, Instant},
};
use tokio_util::sync::CancellationToken;

use crate::{
    app_context::AppState,
    config::{ConditionCfg, TemperCfg},
    drivers::temper::{TemperDevice, Thermometer},
    error::{self, Error},
    event::{Event, EventBus},
    providers::{PACKAGE_PRIORITY, announce, best_effort, traits::ServiceProvider},
    runner::run_polling,
    sinks::{DisplayField, EventDeclaration, EventSink, FieldPublisher, OverlaySink, PublishOutcome},
    task_manager::TaskManager,
    transforms::{
        condition::{ConditionEdge, ConditionTracker},
        units::{TemperatureUnit, format_fixed},
    },
};

/// TEMPer package: USB thermometer readings as overlay text, with threshold
/// conditions raised as camera events.
///
/// # Priority and Criticality
///
/// - **Priority**: 10
/// - **Critical**: Yes
pub struct TemperServiceProvider {
    state: Arc<AppState>,
    event_bus: EventBus,
    cfg: TemperCfg,
}

impl TemperServiceProvider {
    pub fn new(state: Arc<AppState>, event_bus: EventBus, cfg: TemperCfg) -> Self {
        Self {
            state,
            event_bus,
            cfg,
        }
    }
}

#[async_trait]
impl ServiceProvider for TemperServiceProvider {
    async fn start(&self, task_manager: &mut TaskManager) -> Result<()> {
        let state = self.state.clone();
        let event_bus = self.event_bus.clone();
        let cfg = self.cfg.clone();

        task_manager
            .spawn_task(self.name().to_string(), |cancel_token| async move {
                run_temper_service(state, event_bus, cfg, cancel_token).await
            })
            .await
    }

    fn name(&self) -> &'static str {
        "TemperService"
    }

    fn priority(&self) -> i32 {
        PACKAGE_PRIORITY
    }

    fn is_critical(&self) -> bool {
        true
    }
}

struct Condition {
    declaration: EventDeclaration,
    tracker: ConditionTracker,
    /// State the camera has not acknowledged yet.
    unsent: Option<bool>,
}

impl From<&ConditionCfg> for Condition {
    fn from(cfg: &ConditionCfg) -> Self {
        Self {
            declaration: EventDeclaration::new(cfg.name.as_str()),
            tracker: ConditionTracker::new(cfg.operator, cfg.value)
                .with_delay(Duration::from_secs(cfg.delay_secs))
                .with_repeat(cfg.repeat_after_secs.map(Duration::from_secs)),
            unsent: None,
        }
    }
}

/// One thermometer, its overlay field and its conditions.
pub struct TemperService {
    thermometer: Arc<dyn Thermometer>,
    unit: TemperatureUnit,
    precision: usize,
    field: String,
    publisher: FieldPublisher,
    events: Arc<dyn EventSink>,
    conditions: Mutex<Vec<Condition>>,
    event_bus: EventBus,
}

impl TemperService {
    pub fn new(
        cfg: &TemperCfg,
        thermometer: Arc<dyn Thermometer>,
        overlay: Arc<dyn OverlaySink>,
        events: Arc<dyn EventSink>,
        event_bus: EventBus,
    ) -> Self {
        Self {
            thermometer,
            unit: cfg.unit,
            precision: cfg.precision,
            field: cfg.field.clone(),
            publisher: FieldPublisher::new(overlay, cfg.service_id),
            events,
            conditions: Mutex::new(cfg.conditions.iter().map(Condition::from).collect()),
            event_bus,
        }
    }

    /// Announces every condition to the camera. Failures are logged; the
    /// event sink declares again once it reconnects.
    pub async fn declare_events(&self) {
        for declaration in self.declarations() {
            if let Err(e) = self.events.declare_event(&declaration).await {
                warn!("TEMPer: declaring '{}' failed: {e}", declaration.id);
            }
        }
    }

    fn declarations(&self) -> Vec<EventDeclaration> {
        self.conditions
            .lock()
            .map(|conditions| conditions.iter().map(|c| c.declaration.clone()).collect())
            .unwrap_or_default()
    }

    pub async fn poll(&self) -> error::Result<()> {
        let celsius = self.thermometer.read_celsius().await?;
        self.handle_reading(celsius, Instant::now()).await
    }

    /// Evaluates conditions against the reading (in the display unit), sends
    /// their edges as camera events and publishes the reading. A state the
    /// camera did not accept is sent again on the next reading until it is.
    pub async fn handle_reading(&self, celsius: f64, now: Instant) -> error::Result<()> {
        let value = self.unit.from_celsius(celsius);

        let pending: Vec<(String, bool, Option<ConditionEdge>)> = {
            let mut conditions = self.lock_conditions()?;
            conditions
                .iter_mut()
                .filter_map(|c| match c.tracker.evaluate(value, now) {
                    Some(edge) => {
                        c.unsent = Some(edge.is_active());
                        Some((c.declaration.id.clone(), edge.is_active(), Some(edge)))
                    }
                    None => c.unsent.map(|active| (c.declaration.id.clone(), active, None)),
                })
                .collect()
        };

        for (id, active, edge) in pending {
            match edge {
                Some(edge) => info!("TEMPer: condition '{id}' {edge:?} at {value:.2}"),
                None => info!("TEMPer: resending condition '{id}' active={active}"),
            }
            match self.events.send_event(&id, active).await {
                Ok(()) => {
                    let mut conditions = self.lock_conditions()?;
                    if let Some(c) = conditions.iter_mut().find(|c| c.declaration.id == id) {
                        c.unsent = None;
                    }
                }
                Err(e) => warn!("TEMPer: sending '{id}' failed: {e}"),
            }
            if edge.is_some_and(|edge| edge != ConditionEdge::Repeated) {
                let _ = self.event_bus.publish(Event::ConditionChanged { name: id, active });
            }
        }

        let text = format!(
            "{} {}",
            format_fixed(value, self.precision),
            self.unit.suffix()
        );
        let outcome = self
            .publisher
            .publish(vec![DisplayField::new(self.field.as_str(), text.as_str())])
            .await?;
        if outcome == PublishOutcome::Sent {
            announce(&self.event_bus, self.publisher.service_id(), text);
        }
        Ok(())
    }

    fn lock_conditions(&self) -> error::Result<MutexGuard<'_, Vec<Condition>>> {
        self.conditions
            .lock()
            .map_err(|_| Error::Fatal("condition state poisoned".into()))
    }

    pub async fn stop(&self) {
        best_effort("TEMPer: hiding overlay", self.publisher.disable()).await;
    }
}

async fn open_thermometer(cfg: &TemperCfg) -> Result<TemperDevice> {
    let usb = cfg.usb.clone();
    let device = tokio::task::spawn_blocking(move || -> error::Result<TemperDevice> {
        let api = HidApi::new()?;
        TemperDevice::find(&api, &usb)
    })
    .await??;

    match device.firmware().await {
        Ok(firmware) => info!("TEMPer {} firmware {firmware}", cfg.usb),
        Err(e) => warn!("TEMPer {}: firmware query failed: {e}", cfg.usb),
    }
    Ok(device)
}

async fn run_temper_service(
    state: Arc<AppState>,
    event_bus: EventBus,
    cfg: TemperCfg,
    cancel_token: CancellationToken,
) -> Result<()> {
    let thermometer = open_thermometer(&cfg).await?;
    let service = TemperService::new(
        &cfg,
        Arc::new(thermometer),
        state.overlay.clone(),
        state.events.clone(),
        event_bus,
    );
    service.declare_events().await;

    let svc = &service;
    let result = run_polling(
        "TEMPer",
        Duration::from_secs(cfg.interval_secs),
        cancel_token,
        move || async move { svc.poll().await },
    )
    .await;

    service.stop().await;
    Ok(result?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::UsbSelector,
        drivers::temper::MockThermometer,
        sinks::fakes::{RecordingEvents, RecordingOverlay},
        transforms::condition::Operator,
    };
    use pretty_assertions::assert_eq;

    fn cfg(unit: TemperatureUnit, conditions: Vec<ConditionCfg>) -> TemperCfg {
        TemperCfg {
            usb: UsbSelector {
                vid: 0x413d,
                pid: 0x2107,
                serial: None,
            },
            unit,
            precision: 1,
            service_id: 5,
            field: "temperature".into(),
            interval_secs: 10,
            conditions,
        }
    }

    fn hot(value: f64, repeat_after_secs: Option<u64>) -> ConditionCfg {
        ConditionCfg {
            name: "hot".into(),
            operator: Operator::Gt,
            value,
            delay_secs: 0,
            repeat_after_secs,
        }
    }

    struct Fixture {
        service: TemperService,
        overlay: Arc<RecordingOverlay>,
        events: Arc<RecordingEvents>,
        bus: EventBus,
    }

    fn fixture(cfg: &TemperCfg, thermometer: MockThermometer) -> Fixture {
        let overlay = Arc::new(RecordingOverlay::default());
        let events = Arc::new(RecordingEvents::default());
        let bus = EventBus::new();
        let service = TemperService::new(
            cfg,
            Arc::new(thermometer),
            overlay.clone(),
            events.clone(),
            bus.clone(),
        );
        Fixture {
            service,
            overlay,
            events,
            bus,
        }
    }

    #[tokio::test]
    async fn threshold_fires_once_and_clears() {
        let f = fixture(
            &cfg(TemperatureUnit::Celsius, vec![hot(10.0, None)]),
            MockThermometer::new(),
        );
        let mut rx = f.bus.subscribe();
        let t0 = Instant::now();

        for (i, reading) in [5.0, 15.0, 15.0, 5.0].into_iter().enumerate() {
            f.service
                .handle_reading(reading, t0 + Duration::from_secs(10 * i as u64))
                .await
                .unwrap();
        }

        assert_eq!(
            f.events.sent(),
            vec![("hot".to_string(), true), ("hot".to_string(), false)]
        );

        let mut changes = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let Event::ConditionChanged { name, active } = event {
                changes.push((name, active));
            }
        }
        assert_eq!(changes, vec![("hot".into(), true), ("hot".into(), false)]);

        let texts: Vec<String> = f
            .overlay
            .text_calls()
            .into_iter()
            .map(|(_, fields)| fields[0].text.clone())
            .collect();
        assert_eq!(texts, vec!["5.0 °C", "15.0 °C", "5.0 °C"]);
    }

    #[tokio::test]
    async fn conditions_compare_in_display_unit() {
        let f = fixture(
            &cfg(TemperatureUnit::Fahrenheit, vec![hot(80.0, None)]),
            MockThermometer::new(),
        );

        f.service.handle_reading(30.0, Instant::now()).await.unwrap();

        assert_eq!(f.events.sent(), vec![("hot".to_string(), true)]);
        assert_eq!(
            f.overlay.text_calls()[0].1,
            vec![DisplayField::new("temperature", "86.0 °F")]
        );
    }

    #[tokio::test]
    async fn active_condition_repeats() {
        let f = fixture(
            &cfg(TemperatureUnit::Celsius, vec![hot(10.0, Some(60))]),
            MockThermometer::new(),
        );
        let t0 = Instant::now();

        for secs in [0, 30, 61, 90, 125] {
            f.service
                .handle_reading(20.0, t0 + Duration::from_secs(secs))
                .await
                .unwrap();
        }

        // activation at 0, repeats at 61 and 125
        assert_eq!(f.events.sent().len(), 3);
        assert!(f.events.sent().iter().all(|(_, active)| *active));
    }

    #[tokio::test]
    async fn poll_reads_the_thermometer() {
        let mut thermometer = MockThermometer::new();
        thermometer.expect_read_celsius().times(1).returning(|| Ok(21.46));
        let f = fixture(&cfg(TemperatureUnit::Celsius, vec![]), thermometer);

        f.service.poll().await.unwrap();
        assert_eq!(
            f.overlay.text_calls()[0],
            (5, vec![DisplayField::new("temperature", "21.5 °C")])
        );
    }

    #[tokio::test]
    async fn read_timeout_is_not_fatal() {
        let mut thermometer = MockThermometer::new();
        thermometer
            .expect_read_celsius()
            .returning(|| Err(Error::Timeout("TEMPer read".into())));
        let f = fixture(&cfg(TemperatureUnit::Celsius, vec![]), thermometer);

        let err = f.service.poll().await.unwrap_err();
        assert!(!err.is_fatal());
        assert!(f.overlay.calls().is_empty());
    }

    #[tokio::test]
    async fn unsent_condition_is_retried() {
        let f = fixture(
            &cfg(TemperatureUnit::Celsius, vec![hot(10.0, None)]),
            MockThermometer::new(),
        );
        *f.events.failing_sends.lock().unwrap() = 1;
        let t0 = Instant::now();

        f.service.handle_reading(15.0, t0).await.unwrap();
        assert!(f.events.sent().is_empty());

        for secs in [10, 20] {
            f.service
                .handle_reading(15.0, t0 + Duration::from_secs(secs))
                .await
                .unwrap();
        }
        assert_eq!(f.events.sent(), vec![("hot".to_string(), true)]);
    }

    #[tokio::test]
    async fn newer_edge_replaces_unsent_state() {
        let f = fixture(
            &cfg(TemperatureUnit::Celsius, vec![hot(10.0, None)]),
            MockThermometer::new(),
        );
        *f.events.failing_sends.lock().unwrap() = 1;
        let t0 = Instant::now();

        f.service.handle_reading(15.0, t0).await.unwrap();
        f.service
            .handle_reading(5.0, t0 + Duration::from_secs(10))
            .await
            .unwrap();

        assert_eq!(f.events.sent(), vec![("hot".to_string(), false)]);
    }

    #[tokio::test]
    async fn declares_every_condition() {
        let mut cold = hot(0.0, None);
        cold.name = "cold".into();
        cold.operator = Operator::Lt;
        let f = fixture(
            &cfg(TemperatureUnit::Celsius, vec![hot(30.0, None), cold]),
            MockThermometer::new(),
        );

        f.service.declare_events().await;
        assert_eq!(
            *f.events.declared.lock().unwrap(),
            vec!["hot".to_string(), "cold".to_string()]
        );
    }
}
