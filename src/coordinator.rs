//! System coordinator: starts the package and the settings watcher, then
//! waits for a signal or a lifecycle event.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use log::{error, info, warn};
use tokio::{
    signal::unix::{SignalKind, signal},
    sync::broadcast::{self, error::RecvError},
};

use crate::{
    app_context::AppState,
    config::ConfigManager,
    error::Error,
    event::{Event, EventBus},
    providers::{
        AppStateProvider, AsyncProvider, ServiceProvider, SettingsWatcherServiceProvider,
        package_provider,
    },
    task_manager::TaskManager,
};

/// How a run of the main loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// SIGINT, SIGTERM or [`Event::SystemShutdown`].
    Shutdown,
    /// The settings file changed and validated; load it and run again.
    Restart,
}

/// Owns the task manager and the registered providers for one run.
///
/// A package task that fails publishes [`Event::Fatal`]; the coordinator then
/// stops everything and returns [`Error::Fatal`].
pub struct SystemCoordinator {
    task_manager: TaskManager,
    event_bus: EventBus,
    event_rx: broadcast::Receiver<Event>,
    service_providers: Vec<Box<dyn ServiceProvider>>,
}

impl Default for SystemCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemCoordinator {
    pub fn new() -> Self {
        let event_bus = EventBus::new();
        // subscribe before any task can report
        let event_rx = event_bus.subscribe();

        Self {
            task_manager: TaskManager::with_event_bus(event_bus.clone()),
            event_bus,
            event_rx,
            service_providers: Vec::new(),
        }
    }

    /// Builds the shared state (camera clients, HTTP client) and registers
    /// the providers. No package I/O happens here.
    pub async fn initialize(&mut self, config_manager: ConfigManager) -> Result<()> {
        info!("Initializing SystemCoordinator...");

        let state = AppStateProvider::new(config_manager)
            .provide()
            .await
            .context("Failed to initialize application state")?;

        self.register_service_providers(state);

        info!("SystemCoordinator initialization completed");
        Ok(())
    }

    fn register_service_providers(&mut self, state: Arc<AppState>) {
        info!("Package: {}", state.settings.package.kind());

        let mut providers: Vec<Box<dyn ServiceProvider>> = vec![
            package_provider(state.clone(), self.event_bus.clone()),
            Box::new(SettingsWatcherServiceProvider::new(
                state,
                self.event_bus.clone(),
            )),
        ];

        providers.sort_by_key(|b| std::cmp::Reverse(b.priority()));
        self.service_providers = providers;

        info!(
            "Registered {} service providers in priority order",
            self.service_providers.len()
        );
    }

    /// Starts all registered services in priority order.
    ///
    /// Critical services must start successfully, while non-critical services
    /// can fail without stopping the system.
    pub async fn start_all_services(&mut self) -> Result<()> {
        info!(
            "Starting {} services in priority order...",
            self.service_providers.len()
        );

        for provider in &self.service_providers {
            let is_critical = provider.is_critical();

            match provider.start(&mut self.task_manager).await {
                Ok(()) => {
                    info!(
                        "Service '{}' started (priority: {}, critical: {})",
                        provider.name(),
                        provider.priority(),
                        is_critical
                    );
                }
                Err(e) if is_critical => {
                    // stop whatever already runs
                    if let Err(stop_err) = self.task_manager.shutdown_all().await {
                        error!("Error during task shutdown: {stop_err:#}");
                    }
                    return Err(e).with_context(|| {
                        format!("Critical service '{}' failed to start", provider.name())
                    });
                }
                Err(e) => {
                    warn!(
                        "Non-critical service '{}' failed to start: {e:#}",
                        provider.name()
                    );
                }
            }
        }

        info!("All critical services started successfully");
        Ok(())
    }

    /// Waits for a signal or a lifecycle event, then shuts the services down.
    pub async fn run_main_loop(&mut self) -> Result<RunOutcome> {
        let mut sigterm =
            signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
        info!("Starting main event loop");

        let outcome = loop {
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    if let Err(e) = result {
                        bail!("Failed to listen for shutdown signal: {e}");
                    }
                    info!("Received Ctrl+C, initiating graceful shutdown...");
                    break Ok(RunOutcome::Shutdown);
                }

                _ = sigterm.recv() => {
                    info!("Received SIGTERM, initiating graceful shutdown...");
                    break Ok(RunOutcome::Shutdown);
                }

                event = self.event_rx.recv() => {
                    if let Some(outcome) = Self::handle_event(event)? {
                        break outcome;
                    }
                }
            }
        };

        self.shutdown().await;
        info!("Main event loop terminated");
        outcome
    }

    /// `Some` when the event ends the run.
    fn handle_event(event: Result<Event, RecvError>) -> Result<Option<Result<RunOutcome>>> {
        match event {
            Ok(Event::Fatal(message)) => {
                error!("Fatal error: {message}");
                Ok(Some(Err(Error::Fatal(message).into())))
            }
            Ok(Event::SettingsChanged) => {
                info!("Settings changed, restarting services");
                Ok(Some(Ok(RunOutcome::Restart)))
            }
            Ok(Event::SystemShutdown) => {
                info!("Processing SystemShutdown event");
                Ok(Some(Ok(RunOutcome::Shutdown)))
            }
            Ok(Event::ReadingPublished {
                service_id,
                summary,
            }) => {
                info!("Service {service_id}: {summary}");
                Ok(None)
            }
            Ok(Event::ConditionChanged { name, active }) => {
                let state = if active { "active" } else { "inactive" };
                info!("Condition '{name}' is now {state}");
                Ok(None)
            }
            Err(RecvError::Closed) => {
                bail!("Event bus channel closed unexpectedly");
            }
            Err(RecvError::Lagged(n)) => {
                warn!("Event bus lagged by {n} messages");
                Ok(None)
            }
        }
    }

    /// Cancels every task; each package hides its overlays on the way out.
    async fn shutdown(&mut self) {
        info!("Initiating graceful shutdown...");

        if let Err(e) = self.task_manager.shutdown_all().await {
            error!("Error during task shutdown: {e:#}");
        }

        log::logger().flush();
        info!("Shutdown complete");
    }

    pub const fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn running_services(&self) -> Vec<&'static str> {
        self.service_providers.iter().map(|p| p.name()).collect()
    }
}
