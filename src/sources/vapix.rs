//! VAPIX event subscription over the websocket data stream.

use std::{collections::HashMap, time::Duration};

use futures::{SinkExt, StreamExt};
use log::{debug, info};
use reqwest::header::{AUTHORIZATION, HeaderValue};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{Message, client::IntoClientRequest},
};

use super::http::basic_auth_header;
use crate::{
    config::CameraCfg,
    error::{Error, Result},
};

const WS_PATH: &str = "/vapix/ws-data-stream?sources=events";

/// One `events:notify` notification.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VapixEvent {
    pub topic: String,
    pub source: HashMap<String, String>,
    pub data: HashMap<String, String>,
}

impl VapixEvent {
    /// Parses a websocket text message; `None` for anything that is not a
    /// notification.
    pub fn from_message(text: &str) -> Option<Self> {
        let message: Value = serde_json::from_str(text).ok()?;
        if message.get("method")?.as_str()? != "events:notify" {
            return None;
        }
        let notification = message.pointer("/params/notification")?;
        let topic = notification.get("topic")?.as_str()?.to_string();
        let body = notification.get("message");
        Some(Self {
            topic,
            source: flatten(body.and_then(|m| m.get("source"))),
            data: flatten(body.and_then(|m| m.get("data"))),
        })
    }

    /// Looks `key` up in data first, then in source.
    pub fn value(&self, key: &str) -> Option<&str> {
        self.data
            .get(key)
            .or_else(|| self.source.get(key))
            .map(String::as_str)
    }
}

fn flatten(object: Option<&Value>) -> HashMap<String, String> {
    object
        .and_then(Value::as_object)
        .map(|map| {
            map.iter()
                .map(|(k, v)| {
                    let text = match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    (k.clone(), text)
                })
                .collect()
        })
        .unwrap_or_default()
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Subscribed event stream.
pub struct VapixEvents {
    socket: WsStream,
}

impl VapixEvents {
    pub async fn connect(camera: &CameraCfg, topics: &[String], timeout: Duration) -> Result<Self> {
        let auth = camera
            .has_credentials()
            .then(|| basic_auth_header(&camera.user, &camera.pass))
            .flatten();
        Self::connect_url(&camera.ws_url(WS_PATH), auth, topics, timeout).await
    }

    pub async fn connect_url(
        url: &str,
        auth: Option<HeaderValue>,
        topics: &[String],
        timeout: Duration,
    ) -> Result<Self> {
        let mut request = url.into_client_request()?;
        if let Some(auth) = auth {
            request.headers_mut().insert(AUTHORIZATION, auth);
        }
        let (mut socket, _) = tokio::time::timeout(timeout, connect_async(request))
            .await
            .map_err(|_| Error::Timeout(format!("connecting to {url}")))??;

        let filters: Vec<Value> = topics
            .iter()
            .map(|topic| json!({ "topicFilter": topic }))
            .collect();
        let configure = json!({
            "apiVersion": "1.0",
            "method": "events:configure",
            "params": { "eventFilterList": filters }
        });
        socket
            .send(Message::Text(configure.to_string().into()))
            .await?;

        tokio::time::timeout(timeout, wait_for_configure(&mut socket))
            .await
            .map_err(|_| Error::Timeout("events:configure reply".into()))??;

        info!("Subscribed to {} VAPIX topic(s) at {url}", topics.len());
        Ok(Self { socket })
    }

    /// Next notification. A closed socket is [`Error::SourceClosed`].
    pub async fn next_event(&mut self) -> Result<VapixEvent> {
        while let Some(message) = self.socket.next().await {
            let message = message.map_err(|e| Error::SourceClosed(format!("vapix events: {e}")))?;
            match message {
                Message::Text(text) => match VapixEvent::from_message(text.as_str()) {
                    Some(event) => return Ok(event),
                    None => debug!("Ignoring VAPIX message: {}", text.as_str()),
                },
                Message::Close(_) => break,
                _ => {}
            }
        }
        Err(Error::SourceClosed("vapix events: socket closed".into()))
    }
}

async fn wait_for_configure(socket: &mut WsStream) -> Result<()> {
    while let Some(message) = socket.next().await {
        let Message::Text(text) = message? else {
            continue;
        };
        let reply: Value = serde_json::from_str(text.as_str())?;
        if reply.get("method").and_then(Value::as_str) != Some("events:configure") {
            continue;
        }
        return match reply.get("error") {
            Some(err) => Err(Error::Fatal(format!("events:configure rejected: {err}"))),
            None => Ok(()),
        };
    }
    Err(Error::SourceClosed("vapix events: closed during configure".into()))
}
