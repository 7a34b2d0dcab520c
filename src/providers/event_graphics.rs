use anyhow::Result;
use async_trait::async_trait;
use log::{debug, info, warn};
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;

use crate::{
    app_context::AppState,
    config::{EventGraphicsCfg, EventRuleCfg},
    error,
    event::EventBus,
    providers::{PACKAGE_PRIORITY, announce, best_effort, traits::ServiceProvider},
    sinks::{OverlaySink, VisibilityTimers},
    sources::{VapixEvent, VapixEvents},
    task_manager::TaskManager,
};

/// Data keys that carry the state of a stateful VAPIX event.
const STATE_KEYS: [&str; 3] = ["state", "active", "value"];

/// Event graphics package: camera events show and hide overlay services.
///
/// # Priority and Criticality
///
/// - **Priority**: 10
/// - **Critical**: Yes
pub struct EventGraphicsServiceProvider {
    state: Arc<AppState>,
    event_bus: EventBus,
    cfg: EventGraphicsCfg,
}

impl EventGraphicsServiceProvider {
    pub fn new(state: Arc<AppState>, event_bus: EventBus, cfg: EventGraphicsCfg) -> Self {
        Self {
            state,
            event_bus,
            cfg,
        }
    }
}

#[async_trait]
impl ServiceProvider for EventGraphicsServiceProvider {
    async fn start(&self, task_manager: &mut TaskManager) -> Result<()> {
        let state = self.state.clone();
        let event_bus = self.event_bus.clone();
        let cfg = self.cfg.clone();

        task_manager
            .spawn_task(self.name().to_string(), |cancel_token| async move {
                run_event_graphics_service(state, event_bus, cfg, cancel_token).await
            })
            .await
    }

    fn name(&self) -> &'static str {
        "EventGraphicsService"
    }

    fn priority(&self) -> i32 {
        PACKAGE_PRIORITY
    }

    fn is_critical(&self) -> bool {
        true
    }
}

impl EventRuleCfg {
    fn matches(&self, event: &VapixEvent) -> bool {
        if event.topic != self.topic {
            return false;
        }
        match (&self.key, &self.value) {
            (Some(key), Some(value)) => event.value(key) == Some(value.as_str()),
            (Some(key), None) => event.value(key).is_some(),
            _ => true,
        }
    }
}

/// Whether a notification reports its condition as active. Events without
/// a state key are pulses and count as active.
pub fn is_active(event: &VapixEvent) -> bool {
    match STATE_KEYS.iter().find_map(|key| event.data.get(*key)) {
        Some(state) => {
            let state = state.trim();
            state == "1" || state.eq_ignore_ascii_case("true")
        }
        None => true,
    }
}

/// Applies the rules to each incoming event.
pub struct EventGraphicsService {
    overlay: Arc<dyn OverlaySink>,
    timers: VisibilityTimers,
    rules: Vec<EventRuleCfg>,
    event_bus: EventBus,
}

impl EventGraphicsService {
    pub fn new(cfg: &EventGraphicsCfg, overlay: Arc<dyn OverlaySink>, event_bus: EventBus) -> Self {
        Self {
            timers: VisibilityTimers::new(overlay.clone()),
            overlay,
            rules: cfg.rules.clone(),
            event_bus,
        }
    }

    /// Distinct topics to subscribe to.
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.rules.iter().map(|r| r.topic.clone()).collect();
        topics.sort();
        topics.dedup();
        topics
    }

    /// Returns the number of rules the event matched.
    pub async fn handle_event(&self, event: &VapixEvent) -> error::Result<usize> {
        let active = is_active(event);
        let mut matched = 0;

        for rule in self.rules.iter().filter(|r| r.matches(event)) {
            matched += 1;
            let sid = rule.service_id;
            debug!("Event {} (active={active}) -> service {sid}", event.topic);

            if rule.duration_secs > 0 {
                // inactive edges of timed rules are left to the timer
                if active {
                    self.timers
                        .show_for(sid, Duration::from_secs(rule.duration_secs))
                        .await?;
                    announce(&self.event_bus, sid, format!("shown by {}", event.topic));
                }
            } else if active {
                self.timers.show(sid).await?;
                announce(&self.event_bus, sid, format!("shown by {}", event.topic));
            } else {
                self.timers.hide_now(sid).await?;
            }
        }

        if matched == 0 {
            debug!("No rule for event {}", event.topic);
        }
        Ok(matched)
    }

    pub async fn stop(&self) {
        self.timers.cancel_all();
        let mut ids: Vec<u32> = self.rules.iter().map(|r| r.service_id).collect();
        ids.sort_unstable();
        ids.dedup();
        for sid in ids {
            best_effort("Event graphics: hiding overlay", self.overlay.set_enabled(sid, false))
                .await;
        }
    }
}

async fn run_event_graphics_service(
    state: Arc<AppState>,
    event_bus: EventBus,
    cfg: EventGraphicsCfg,
    cancel_token: CancellationToken,
) -> Result<()> {
    let service = EventGraphicsService::new(&cfg, state.overlay.clone(), event_bus);
    let camera = state.settings.event_camera();
    let mut events =
        VapixEvents::connect(camera, &service.topics(), state.settings.request_timeout()).await?;
    info!("Event graphics: {} rule(s) on {}", cfg.rules.len(), camera.ip);

    let result = pump(&service, &mut events, &cancel_token).await;
    service.stop().await;
    Ok(result?)
}

async fn pump(
    service: &EventGraphicsService,
    events: &mut VapixEvents,
    cancel_token: &CancellationToken,
) -> error::Result<()> {
    while let Some(event) = cancel_token
        .run_until_cancelled(events.next_event())
        .await
        .transpose()?
    {
        if let Err(e) = service.handle_event(&event).await {
            warn!("Event graphics: {e}");
        }
    }
    Ok(())
}
