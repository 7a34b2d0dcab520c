//! # camlinkd
//!
//! A daemon that feeds readings from scales, GPS receivers, USB thermometers,
//! lux meters, web APIs and camera events into network camera overlays.
//!
//! ## Features
//!
//! - **Packages**: one per run, chosen by `package.kind` in the settings
//!   (`scale`, `position-image`, `weather`, `air-quality`, `sheets`,
//!   `temper`, `lux-meter`, `event-graphics`)
//! - **Debounced overlays**: identical text is never pushed twice
//! - **Camera events**: threshold conditions raised through CamScripter
//! - **Hot reload**: a validated settings change restarts the package
//!
//! ## Architecture
//!
//! - [`SystemCoordinator`](coordinator::SystemCoordinator) - lifecycle of one run
//! - [`EventBus`](event::EventBus) - package tasks report to the coordinator
//! - [`AppState`](app_context::AppState) - settings and camera clients
//! - [`sources`] → [`transforms`] → [`sinks`], driven by the [`providers`]
//!
//! ## Example
//!
//! ```no_run
//! use camlinkd::{application::Application, config::ConfigManager};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config_manager = ConfigManager::load(None).await?;
//!     Application::builder()
//!         .with_config_manager(config_manager)
//!         .build()
//!         .await?
//!         .run()
//!         .await?;
//!     Ok(())
//! }
//! ```

pub mod app_context;
pub mod application;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod drivers;
pub mod error;
pub mod event;
pub mod logging;
pub mod providers;
pub mod runner;
pub mod sinks;
pub mod sources;
pub mod task_manager;
pub mod transforms;

#[cfg(test)]
mod testutil;
