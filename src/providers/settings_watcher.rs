use anyhow::Result;
use async_trait::async_trait;
use log::{debug, error, info, warn};
use notify::{Event, EventHandler, RecursiveMode, Watcher, recommended_watcher};
use std::sync::Arc;
use std::time::Duration;
use tokio::{sync::mpsc, time::Instant};
use tokio_util::sync::CancellationToken;

use crate::{
    app_context::AppState,
    event::{Event as AppEvent, EventBus},
    providers::traits::ServiceProvider,
    task_manager::TaskManager,
};

/// Quiet period after the last filesystem event before the file is re-read.
const DEBOUNCE: Duration = Duration::from_secs(2);

/// Settings file monitoring service provider.
///
/// Watches the directory holding the settings file (the settings CGI
/// replaces the file rather than editing it in place). Once the file has
/// been quiet for two seconds it is re-read; if it validates,
/// [`AppEvent::SettingsChanged`] is published and the coordinator restarts
/// the package. An invalid file is logged and the current run continues.
///
/// # Priority and Criticality
///
/// - **Priority**: 1
/// - **Critical**: No
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use camlinkd::providers::SettingsWatcherServiceProvider;
/// use camlinkd::event::EventBus;
/// use camlinkd::app_context::AppState;
///
/// # async fn example(state: Arc<AppState>) -> anyhow::Result<()> {
/// let event_bus = EventBus::new();
/// let provider = SettingsWatcherServiceProvider::new(state, event_bus);
/// # Ok(())
/// # }
/// ```
pub struct SettingsWatcherServiceProvider {
    state: Arc<AppState>,
    event_bus: EventBus,
}

impl SettingsWatcherServiceProvider {
    pub fn new(state: Arc<AppState>, event_bus: EventBus) -> Self {
        Self { state, event_bus }
    }
}

#[async_trait]
impl ServiceProvider for SettingsWatcherServiceProvider {
    async fn start(&self, task_manager: &mut TaskManager) -> Result<()> {
        let state = self.state.clone();
        let event_bus = self.event_bus.clone();

        task_manager
            .spawn_task(self.name().to_string(), |cancel_token| async move {
                run_settings_watcher(state, event_bus, cancel_token).await
            })
            .await
    }

    fn name(&self) -> &'static str {
        "SettingsWatcherService"
    }

    fn priority(&self) -> i32 {
        1
    }

    fn is_critical(&self) -> bool {
        false
    }
}

/// Forwards notify callbacks into the async world.
#[derive(Debug)]
struct ChannelHandler {
    sender: mpsc::UnboundedSender<notify::Result<Event>>,
}

impl EventHandler for ChannelHandler {
    fn handle_event(&mut self, event: notify::Result<Event>) {
        if let Err(e) = self.sender.send(event) {
            error!("Failed to forward filesystem event: {}", e);
        }
    }
}

async fn run_settings_watcher(
    state: Arc<AppState>,
    event_bus: EventBus,
    cancel_token: CancellationToken,
) -> Result<()> {
    let settings_path = state.config_manager().path().to_path_buf();
    let watch_path = match settings_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => settings_path.clone(),
    };

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let mut watcher = match recommended_watcher(ChannelHandler { sender: event_tx })
        .and_then(|mut w| w.watch(&watch_path, RecursiveMode::NonRecursive).map(|()| w))
    {
        Ok(watcher) => watcher,
        Err(e) => {
            // the package keeps running without hot reload
            warn!("Settings watcher disabled for {}: {e}", watch_path.display());
            return Ok(());
        }
    };
    info!("Watching {} for settings changes", settings_path.display());

    let debounce = tokio::time::sleep(DEBOUNCE);
    tokio::pin!(debounce);
    let mut pending = false;

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => break,

            event_result = event_rx.recv() => match event_result {
                Some(Ok(event)) => {
                    let touches_settings = event
                        .paths
                        .iter()
                        .any(|p| p == &settings_path || p.file_name() == settings_path.file_name());
                    let relevant = event.kind.is_modify() || event.kind.is_create();

                    if touches_settings && relevant {
                        debug!("Settings file event: {:?}", event.kind);
                        pending = true;
                        debounce.as_mut().reset(Instant::now() + DEBOUNCE);
                    }
                }
                Some(Err(e)) => warn!("Filesystem watcher error: {}", e),
                None => {
                    warn!("Filesystem event channel closed");
                    break;
                }
            },

            () = &mut debounce, if pending => {
                pending = false;

                if !settings_path.exists() {
                    warn!("Settings file {} disappeared", settings_path.display());
                    continue;
                }

                match state.config_manager().reload().await {
                    Ok(()) => {
                        info!("Settings changed, requesting restart");
                        if let Err(e) = event_bus.publish(AppEvent::SettingsChanged) {
                            error!("Failed to publish settings change: {}", e);
                        }
                    }
                    Err(e) => error!("Ignoring settings change: {e}"),
                }
            }
        }
    }

    if let Err(e) = watcher.unwatch(&watch_path) {
        warn!("Failed to unwatch {}: {}", watch_path.display(), e);
    }
    info!("Settings watcher stopped");
    Ok(())
}
