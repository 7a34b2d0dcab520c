use anyhow::Result;
use async_trait::async_trait;
use log::{debug, info, warn};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::{
    app_context::AppState,
    config::ScaleCfg,
    error,
    event::EventBus,
    providers::{PACKAGE_PRIORITY, announce, best_effort, traits::ServiceProvider},
    sinks::{DisplayField, FieldPublisher, OverlaySink, PublishOutcome},
    sources::{Frames, LineCodec},
    task_manager::TaskManager,
    transforms::scale::parse_frame,
};

/// Scale package: weight frames from a serial or TCP scale become overlay text.
///
/// # Priority and Criticality
///
/// - **Priority**: 10
/// - **Critical**: Yes
pub struct ScaleServiceProvider {
    state: Arc<AppState>,
    event_bus: EventBus,
    cfg: ScaleCfg,
}

impl ScaleServiceProvider {
    pub fn new(state: Arc<AppState>, event_bus: EventBus, cfg: ScaleCfg) -> Self {
        Self {
            state,
            event_bus,
            cfg,
        }
    }
}

#[async_trait]
impl ServiceProvider for ScaleServiceProvider {
    async fn start(&self, task_manager: &mut TaskManager) -> Result<()> {
        let state = self.state.clone();
        let event_bus = self.event_bus.clone();
        let cfg = self.cfg.clone();

        task_manager
            .spawn_task(self.name().to_string(), |cancel_token| async move {
                run_scale_service(state, event_bus, cfg, cancel_token).await
            })
            .await
    }

    fn name(&self) -> &'static str {
        "ScaleService"
    }

    fn priority(&self) -> i32 {
        PACKAGE_PRIORITY
    }

    fn is_critical(&self) -> bool {
        true
    }
}

/// Turns scale frames into `[value, unit]` field updates.
pub struct ScaleService {
    publisher: FieldPublisher,
    value_field: String,
    unit_field: String,
    event_bus: EventBus,
}

impl ScaleService {
    pub fn new(cfg: &ScaleCfg, overlay: Arc<dyn OverlaySink>, event_bus: EventBus) -> Self {
        Self {
            publisher: FieldPublisher::new(overlay, cfg.service_id),
            value_field: cfg.value_field.clone(),
            unit_field: cfg.unit_field.clone(),
            event_bus,
        }
    }

    /// Publishes one frame. `Ok(None)` when the frame carries no weight.
    pub async fn handle_frame(&self, frame: &str) -> error::Result<Option<PublishOutcome>> {
        let Some(reading) = parse_frame(frame) else {
            debug!("Scale: skipping frame {frame:?}");
            return Ok(None);
        };

        let fields = vec![
            DisplayField::new(&self.value_field, &reading.weight),
            DisplayField::new(&self.unit_field, &reading.unit),
        ];
        let outcome = self.publisher.publish(fields).await?;
        if outcome == PublishOutcome::Sent {
            announce(
                &self.event_bus,
                self.publisher.service_id(),
                format!("{} {}", reading.weight, reading.unit),
            );
        }
        Ok(Some(outcome))
    }

    pub async fn stop(&self) {
        best_effort("Scale: hiding overlay", self.publisher.disable()).await;
    }
}

async fn run_scale_service(
    state: Arc<AppState>,
    event_bus: EventBus,
    cfg: ScaleCfg,
    cancel_token: CancellationToken,
) -> Result<()> {
    let stream = cfg
        .source
        .open(&state.sysfs_root, state.settings.request_timeout())
        .await?;
    let mut frames = Frames::new(cfg.source.to_string(), stream, LineCodec::new());
    let service = ScaleService::new(&cfg, state.overlay.clone(), event_bus);
    info!("Scale: reading {}", cfg.source);

    let result = pump(&service, &mut frames, &cancel_token).await;
    service.stop().await;
    Ok(result?)
}

async fn pump(
    service: &ScaleService,
    frames: &mut Frames<LineCodec>,
    cancel_token: &CancellationToken,
) -> error::Result<()> {
    while let Some(frame) = frames.next_or_cancelled(cancel_token).await? {
        if let Err(e) = service.handle_frame(&frame).await {
            warn!("Scale: {e}");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        app_context::testing,
        config::PackageCfg,
        event::Event,
        sinks::fakes::{OverlayCall, RecordingOverlay},
        sources::StreamEndpoint,
    };
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use tokio::{io::AsyncWriteExt, net::TcpListener, time::timeout};

    fn cfg(port: u16) -> ScaleCfg {
        ScaleCfg {
            source: StreamEndpoint::Tcp {
                ip: "127.0.0.1".into(),
                port,
            },
            service_id: 3,
            value_field: "value".into(),
            unit_field: "unit".into(),
        }
    }

    #[tokio::test]
    async fn repeated_frame_is_sent_once() {
        let overlay = Arc::new(RecordingOverlay::default());
        let service = ScaleService::new(&cfg(1), overlay.clone(), EventBus::new());

        assert_eq!(
            service.handle_frame("   12.34 kg").await.unwrap(),
            Some(PublishOutcome::Sent)
        );
        assert_eq!(
            service.handle_frame("   12.34 kg").await.unwrap(),
            Some(PublishOutcome::Unchanged)
        );

        assert_eq!(
            overlay.text_calls(),
            vec![(
                3,
                vec![
                    DisplayField::new("value", "12.34"),
                    DisplayField::new("unit", "kg")
                ]
            )]
        );
    }

    #[tokio::test]
    async fn garbage_frames_are_skipped() {
        let overlay = Arc::new(RecordingOverlay::default());
        let service = ScaleService::new(&cfg(1), overlay.clone(), EventBus::new());

        assert_eq!(service.handle_frame("ERR").await.unwrap(), None);
        assert!(overlay.calls().is_empty());
    }

    #[tokio::test]
    async fn failed_update_is_retried_on_next_frame() {
        let overlay = Arc::new(RecordingOverlay::default());
        let service = ScaleService::new(&cfg(1), overlay.clone(), EventBus::new());

        *overlay.fail_text.lock().unwrap() = true;
        assert!(service.handle_frame("1.00 kg").await.is_err());

        *overlay.fail_text.lock().unwrap() = false;
        assert_eq!(
            service.handle_frame("1.00 kg").await.unwrap(),
            Some(PublishOutcome::Sent)
        );
    }

    #[tokio::test]
    async fn sent_frames_are_announced() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let service = ScaleService::new(&cfg(1), Arc::new(RecordingOverlay::default()), bus);

        service.handle_frame("ST,GS,+00012.34kg").await.unwrap();
        assert_eq!(
            rx.recv().await.unwrap(),
            Event::ReadingPublished {
                service_id: 3,
                summary: "12.34 kg".into()
            }
        );
    }

    #[tokio::test]
    async fn closed_source_is_fatal_and_hides_overlay() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"   12.34 kg\r\n   12.34 kg\r\n").await.unwrap();
        });

        let t = testing::state(PackageCfg::Scale(cfg(port)));
        let bus = EventBus::new();
        let mut events = bus.subscribe();
        let provider = ScaleServiceProvider::new(t.state.clone(), bus.clone(), cfg(port));
        let mut task_manager = TaskManager::with_event_bus(bus);
        provider.start(&mut task_manager).await.unwrap();

        let fatal = loop {
            match timeout(Duration::from_secs(5), events.recv()).await.unwrap() {
                Ok(Event::Fatal(message)) => break message,
                Ok(_) => continue,
                Err(e) => panic!("event bus: {e}"),
            }
        };
        assert!(fatal.starts_with("ScaleService: source closed"), "{fatal}");

        assert_eq!(
            t.overlay.calls(),
            vec![
                OverlayCall::Enabled(3, true),
                OverlayCall::Text(
                    3,
                    vec![
                        DisplayField::new("value", "12.34"),
                        DisplayField::new("unit", "kg")
                    ]
                ),
                OverlayCall::Enabled(3, false),
            ]
        );
        assert!(task_manager.shutdown_all().await.is_err());
    }

    #[tokio::test]
    async fn cancellation_stops_cleanly() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (done_tx, done_rx) = tokio::sync::oneshot::channel::<()>();
        tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            let _ = done_rx.await;
        });

        let t = testing::state(PackageCfg::Scale(cfg(port)));
        let provider = ScaleServiceProvider::new(t.state.clone(), EventBus::new(), cfg(port));
        let mut task_manager = TaskManager::new();
        provider.start(&mut task_manager).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        task_manager.shutdown_all().await.unwrap();
        assert_eq!(t.overlay.enable_calls(), vec![(3, false)]);
        let _ = done_tx.send(());
    }
}
