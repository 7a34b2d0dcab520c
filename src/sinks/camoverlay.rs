//! HTTP client for the camera overlay service.

use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use serde::Deserialize;

use super::{DisplayField, OverlaySink};
use crate::{
    config::{CameraCfg, Protocol},
    error::{Error, Result},
};

const ENABLED_CGI: &str = "/local/camoverlay/api/enabled.cgi";
const SERVICES_CGI: &str = "/local/camoverlay/api/services.cgi";
const GRAPHICS_CGI: &str = "/local/camoverlay/api/customGraphics.cgi";

#[derive(Debug, Deserialize)]
struct ServiceList {
    #[serde(default)]
    services: Vec<ServiceEntry>,
}

#[derive(Debug, Deserialize)]
struct ServiceEntry {
    id: u32,
    #[serde(default)]
    enabled: serde_json::Value,
}

impl ServiceEntry {
    fn is_enabled(&self) -> bool {
        match &self.enabled {
            serde_json::Value::Bool(b) => *b,
            serde_json::Value::Number(n) => n.as_u64() == Some(1),
            serde_json::Value::String(s) => s == "1" || s.eq_ignore_ascii_case("true"),
            _ => false,
        }
    }
}

/// [`OverlaySink`] talking to the overlay CGIs with basic auth.
#[derive(Debug, Clone)]
pub struct CamOverlayClient {
    http: Client,
    base_url: String,
    user: String,
    pass: String,
}

impl CamOverlayClient {
    pub fn new(camera: &CameraCfg, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(camera.protocol == Protocol::HttpsInsecure)
            .build()?;
        Ok(Self {
            http,
            base_url: camera.base_url(),
            user: camera.user.clone(),
            pass: camera.pass.clone(),
        })
    }

    async fn get(&self, path: &str, query: &[(String, String)]) -> Result<reqwest::Response> {
        let url = format!("{}{path}", self.base_url);
        let mut request = self.http.get(&url).query(query);
        if !self.user.is_empty() {
            request = request.basic_auth(&self.user, Some(&self.pass));
        }
        let response = request.send().await.map_err(sink_error)?;
        if !response.status().is_success() {
            return Err(Error::Sink(format!(
                "{path} answered with HTTP {}",
                response.status().as_u16()
            )));
        }
        Ok(response)
    }
}

fn sink_error(e: impl std::fmt::Display) -> Error {
    Error::Sink(e.to_string())
}

#[async_trait]
impl OverlaySink for CamOverlayClient {
    async fn set_enabled(&self, service_id: u32, enabled: bool) -> Result<()> {
        debug!("Service {service_id}: enabled={enabled}");
        let value = if enabled { "1" } else { "0" };
        self.get(ENABLED_CGI, &[(format!("id_{service_id}"), value.to_string())])
            .await?;
        Ok(())
    }

    async fn is_enabled(&self, service_id: u32) -> Result<bool> {
        let response = self
            .get(SERVICES_CGI, &[("action".into(), "get".into())])
            .await?;
        let body = response.bytes().await.map_err(sink_error)?;
        let list: ServiceList = serde_json::from_slice(&body).map_err(sink_error)?;
        list.services
            .iter()
            .find(|s| s.id == service_id)
            .map(ServiceEntry::is_enabled)
            .ok_or_else(|| Error::Sink(format!("service {service_id} does not exist")))
    }

    async fn update_text(&self, service_id: u32, fields: &[DisplayField]) -> Result<()> {
        let mut query = vec![
            ("action".to_string(), "update_text".to_string()),
            ("service_id".to_string(), service_id.to_string()),
        ];
        for field in fields {
            query.push((field.field.clone(), field.text.clone()));
            if let Some(color) = field.color {
                query.push((format!("{}_color", field.field), color.to_string()));
            }
        }
        self.get(GRAPHICS_CGI, &query).await?;
        Ok(())
    }
}
