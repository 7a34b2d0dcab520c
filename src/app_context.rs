//! Application state shared by the package services.

use std::{path::PathBuf, sync::Arc};

use anyhow::Context;

use crate::{
    config::{ConfigManager, Settings},
    sinks::{CamOverlayClient, CamScripterEvents, EventSink, OverlaySink},
    sources::{HttpSource, usb::SYSFS_ROOT},
};

/// Shared application state containing all runtime handles.
///
/// Settings are snapshotted once at startup. A settings change restarts the
/// whole application, so nothing here needs to be swapped at runtime.
pub struct AppState {
    /// Configuration manager for the settings file
    pub config_manager: Arc<ConfigManager>,
    /// Validated settings this run was started with
    pub settings: Arc<Settings>,
    /// Camera overlay service
    pub overlay: Arc<dyn OverlaySink>,
    /// Camera event generator
    pub events: Arc<dyn EventSink>,
    /// Client for third-party JSON APIs
    pub http: HttpSource,
    /// Where USB serial adapters are looked up
    pub sysfs_root: PathBuf,
}

impl AppState {
    /// Creates the state with the camera clients described by the settings.
    ///
    /// No request is sent here; clients connect lazily on first use.
    pub async fn new(config_manager: ConfigManager) -> anyhow::Result<Self> {
        let settings = config_manager.clone_settings().await;
        let timeout = settings.request_timeout();

        let overlay = CamOverlayClient::new(&settings.camera, timeout)
            .context("Failed to create overlay client")?;
        let events = CamScripterEvents::new(&settings.camera, timeout);
        let http = HttpSource::new(timeout).context("Failed to create HTTP client")?;

        Ok(Self {
            config_manager: Arc::new(config_manager),
            settings: Arc::new(settings),
            overlay: Arc::new(overlay),
            events: Arc::new(events),
            http,
            sysfs_root: PathBuf::from(SYSFS_ROOT),
        })
    }

    /// Builds the state around caller-provided sinks.
    pub fn with_sinks(
        config_manager: ConfigManager,
        settings: Settings,
        overlay: Arc<dyn OverlaySink>,
        events: Arc<dyn EventSink>,
    ) -> anyhow::Result<Self> {
        let http = HttpSource::new(settings.request_timeout())?;
        Ok(Self {
            config_manager: Arc::new(config_manager),
            settings: Arc::new(settings),
            overlay,
            events,
            http,
            sysfs_root: PathBuf::from(SYSFS_ROOT),
        })
    }

    /// Gets the configuration manager.
    pub fn config_manager(&self) -> &Arc<ConfigManager> {
        &self.config_manager
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PackageCfg, SheetsCfg};
    use pretty_assertions::assert_eq;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[tokio::test]
    async fn builds_from_settings_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(
            br#"{
                "camera": { "ip": "10.1.1.5", "user": "root", "pass": "pass" },
                "request_timeout_ms": 3000,
                "package": {
                    "kind": "sheets",
                    "api_key": "k",
                    "spreadsheet_id": "s",
                    "range": "A1:B2",
                    "service_id": 2,
                    "cells": [{ "cell": "A1", "field": "title" }]
                }
            }"#,
        )
        .unwrap();

        let manager = ConfigManager::load(Some(file.path().to_path_buf()))
            .await
            .unwrap();
        let state = AppState::new(manager).await.unwrap();

        assert_eq!(state.settings.camera.ip, "10.1.1.5");
        assert_eq!(state.settings.package.kind(), "sheets");
        assert_eq!(state.config_manager().path(), file.path());
        assert_eq!(state.sysfs_root, PathBuf::from("/sys"));
    }

    #[test]
    fn test_state_uses_recording_sinks() {
        let t = testing::state(PackageCfg::Sheets(SheetsCfg {
            api_key: "k".into(),
            spreadsheet_id: "s".into(),
            range: "A1".into(),
            service_id: 1,
            interval_secs: 60,
            api_url: "http://127.0.0.1".into(),
            cells: vec![],
        }));
        assert_eq!(t.state.settings.request_timeout_ms, 2_000);
        assert!(t.overlay.calls().is_empty());
    }
}
