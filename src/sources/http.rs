//! Polling HTTP client for third-party JSON APIs.

use std::time::Duration;

use reqwest::{
    Client,
    header::{AUTHORIZATION, HeaderValue},
};
use serde::de::DeserializeOwned;

use crate::error::{Error, Result};

/// JSON-over-GET client with a bounded request time.
#[derive(Debug, Clone)]
pub struct HttpSource {
    client: Client,
}

impl HttpSource {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("camlinkd/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    /// GETs `url` with `query` appended and decodes the body as `T`.
    ///
    /// Non-2xx answers are [`Error::HttpStatus`]; a body that does not
    /// decode is [`Error::Json`].
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str, query: &[(&str, &str)]) -> Result<T> {
        let response = self.client.get(url).query(query).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

/// `Authorization: Basic ..` value for camera endpoints that are not reached
/// through reqwest, such as websockets.
pub fn basic_auth_header(user: &str, pass: &str) -> Option<HeaderValue> {
    Client::new()
        .get("http://localhost/")
        .basic_auth(user, Some(pass))
        .build()
        .ok()?
        .headers()
        .get(AUTHORIZATION)
        .cloned()
}
