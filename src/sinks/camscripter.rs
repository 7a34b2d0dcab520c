//! Camera event generator over the CamScripter websocket.

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use reqwest::header::{AUTHORIZATION, HeaderValue};
use serde_json::{Value, json};
use tokio::{net::TcpStream, sync::Mutex};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{Message, client::IntoClientRequest},
};

use super::{EventDeclaration, EventSink};
use crate::{
    config::CameraCfg,
    error::{Error, Result},
    sources::http::basic_auth_header,
};

const WS_PATH: &str = "/local/camscripter/ws";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Default)]
struct Session {
    socket: Option<WsStream>,
    declared: Vec<EventDeclaration>,
}

/// [`EventSink`] speaking the `{call_id, command, data}` protocol.
///
/// Declarations are remembered. When a call fails the socket is dropped and
/// the next call opens a new one and declares every event again.
pub struct CamScripterEvents {
    url: String,
    auth: Option<HeaderValue>,
    timeout: Duration,
    call_id: AtomicU64,
    session: Mutex<Session>,
}

impl CamScripterEvents {
    pub fn new(camera: &CameraCfg, timeout: Duration) -> Self {
        let auth = camera
            .has_credentials()
            .then(|| basic_auth_header(&camera.user, &camera.pass))
            .flatten();
        Self::with_url(camera.ws_url(WS_PATH), auth, timeout)
    }

    pub fn with_url(url: String, auth: Option<HeaderValue>, timeout: Duration) -> Self {
        Self {
            url,
            auth,
            timeout,
            call_id: AtomicU64::new(0),
            session: Mutex::new(Session::default()),
        }
    }

    async fn connect(&self) -> Result<WsStream> {
        let mut request = self.url.as_str().into_client_request()?;
        if let Some(auth) = &self.auth {
            request.headers_mut().insert(AUTHORIZATION, auth.clone());
        }
        let (socket, _) = tokio::time::timeout(self.timeout, connect_async(request))
            .await
            .map_err(|_| Error::Timeout(format!("connecting to {}", self.url)))??;
        info!("Connected to {}", self.url);
        Ok(socket)
    }

    /// Opens a socket if there is none. Returns true when a new socket was
    /// opened, in which case every remembered event has been declared on it.
    async fn ensure_connected(&self, session: &mut Session) -> Result<bool> {
        if session.socket.is_some() {
            return Ok(false);
        }
        let mut socket = self.connect().await?;
        for declaration in &session.declared {
            self.call(&mut socket, "declare_event", declare_data(declaration))
                .await?;
        }
        session.socket = Some(socket);
        Ok(true)
    }

    async fn call(&self, socket: &mut WsStream, command: &str, data: Value) -> Result<()> {
        let call_id = self.call_id.fetch_add(1, Ordering::Relaxed) + 1;
        let message = json!({ "call_id": call_id, "command": command, "data": data });
        debug!("camscripter -> {message}");
        socket.send(Message::Text(message.to_string().into())).await?;

        tokio::time::timeout(self.timeout, wait_for_reply(socket, call_id))
            .await
            .map_err(|_| Error::Timeout(format!("{command} reply")))?
    }

    async fn run(&self, command: &str, data: Value, redeclares: bool) -> Result<()> {
        let mut session = self.session.lock().await;
        let result = async {
            let fresh = self.ensure_connected(&mut session).await?;
            if fresh && redeclares {
                return Ok(());
            }
            let socket = session
                .socket
                .as_mut()
                .ok_or_else(|| Error::Network("camscripter socket missing".into()))?;
            self.call(socket, command, data).await
        }
        .await;

        result.map_err(|e| {
            warn!("camscripter {command} failed, dropping connection: {e}");
            session.socket = None;
            Error::Sink(e.to_string())
        })
    }
}

async fn wait_for_reply(socket: &mut WsStream, call_id: u64) -> Result<()> {
    while let Some(message) = socket.next().await {
        match message? {
            Message::Text(text) => {
                let reply: Value = serde_json::from_str(text.as_str())?;
                if reply.get("call_id").and_then(Value::as_u64) != Some(call_id) {
                    continue;
                }
                return match reply.get("error") {
                    Some(err) if !err.is_null() => Err(Error::Sink(err.to_string())),
                    _ => Ok(()),
                };
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
    Err(Error::Network("camscripter socket closed".into()))
}

fn declare_data(declaration: &EventDeclaration) -> Value {
    json!({
        "declaration_id": declaration.id,
        "stateless": false,
        "declaration": [
            { "namespace": "tnsaxis", "key": "topic0", "value": "CameraApplicationPlatform", "value_type": "STRING" },
            { "namespace": "tnsaxis", "key": "topic1", "value": "camlinkd", "value_type": "STRING" },
            { "namespace": "tnsaxis", "key": "topic2", "value": declaration.id, "value_type": "STRING", "value_nice_name": declaration.label },
            { "type": "DATA", "namespace": "", "key": "active", "value": false, "value_type": "BOOL", "key_nice_name": "Active" }
        ]
    })
}

fn send_data(declaration_id: &str, active: bool) -> Value {
    json!({
        "declaration_id": declaration_id,
        "event_data": [
            { "namespace": "", "key": "active", "value": active, "value_type": "BOOL" }
        ]
    })
}

#[async_trait]
impl EventSink for CamScripterEvents {
    async fn declare_event(&self, declaration: &EventDeclaration) -> Result<()> {
        {
            let mut session = self.session.lock().await;
            if !session.declared.contains(declaration) {
                session.declared.push(declaration.clone());
            }
        }
        self.run("declare_event", declare_data(declaration), true)
            .await
    }

    async fn send_event(&self, declaration_id: &str, active: bool) -> Result<()> {
        self.run("send_event", send_data(declaration_id, active), false)
            .await
    }
}
