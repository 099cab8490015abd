//! WebSocket transport speaking the Pusher channels protocol (version 7).
//!
//! One [`PusherConnection`] owns one socket. A background task reads frames
//! and routes them to the registered listeners; outgoing frames go through an
//! unbounded queue so the callback-style [`Connection`] methods never block.

use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::authorizer::ConnectionAuthorizer;
use crate::channel::Event;
use crate::config::SocketConfig;
use crate::error::SocketError;
use crate::lock;
use crate::transport::{
    ChannelListener, Connection, ConnectionListener, ConnectionState, StateChange, Transport,
};

const PONG_TIMEOUT: Duration = Duration::from_secs(30);

/// Creates [`PusherConnection`]s for one app.
pub struct PusherTransport {
    url: String,
    authentication_url: Option<String>,
    activity_timeout: Duration,
    http: reqwest::Client,
}

impl PusherTransport {
    pub fn new(config: &SocketConfig) -> Result<Self, SocketError> {
        config.validate()?;
        Ok(Self {
            url: config.ws_url(),
            authentication_url: config.authentication_url.clone(),
            activity_timeout: config.activity_timeout(),
            http: reqwest::Client::new(),
        })
    }
}

impl Transport for PusherTransport {
    fn create(&self, authorizer: ConnectionAuthorizer) -> Arc<dyn Connection> {
        Arc::new(PusherConnection {
            inner: Arc::new(Inner {
                url: self.url.clone(),
                authentication_url: self.authentication_url.clone(),
                activity_timeout: Mutex::new(self.activity_timeout),
                http: self.http.clone(),
                authorizer,
                state: Mutex::new(ConnectionState::Initialized),
                socket_id: Mutex::new(None),
                listener: Mutex::new(None),
                channels: Mutex::new(HashMap::new()),
                outbound: Mutex::new(None),
                cancel: CancellationToken::new(),
            }),
        })
    }
}

pub struct PusherConnection {
    inner: Arc<Inner>,
}

struct Inner {
    url: String,
    authentication_url: Option<String>,
    activity_timeout: Mutex<Duration>,
    http: reqwest::Client,
    authorizer: ConnectionAuthorizer,
    state: Mutex<ConnectionState>,
    socket_id: Mutex<Option<String>>,
    listener: Mutex<Option<Arc<dyn ConnectionListener>>>,
    channels: Mutex<HashMap<String, Arc<dyn ChannelListener>>>,
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    cancel: CancellationToken,
}

#[derive(Debug, Deserialize)]
struct Frame {
    event: String,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    data: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ConnectionEstablished {
    socket_id: String,
    #[serde(default)]
    activity_timeout: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorData {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    code: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct AuthResponse {
    auth: String,
    #[serde(default)]
    channel_data: Option<String>,
}

/// Event payloads arrive either as a JSON-encoded string or inline JSON.
fn data_string(data: Option<Value>) -> Option<String> {
    match data? {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

/// Parse a payload that may itself be JSON encoded inside a string.
fn data_as<T: serde::de::DeserializeOwned>(data: Option<Value>) -> Option<T> {
    match data? {
        Value::String(s) => serde_json::from_str(&s).ok(),
        other => serde_json::from_value(other).ok(),
    }
}

impl Inner {
    fn set_state(&self, current: ConnectionState) {
        let previous = std::mem::replace(&mut *lock(&self.state), current);
        if previous == current {
            return;
        }
        let listener = lock(&self.listener).clone();
        if let Some(listener) = listener {
            listener.on_state_change(StateChange::new(previous, current));
        }
    }

    fn send(&self, frame: Value) {
        match lock(&self.outbound).as_ref() {
            Some(tx) => {
                let _ = tx.send(frame.to_string());
            }
            None => debug!("dropping frame, socket not open"),
        }
    }

    fn activity_timeout(&self) -> Duration {
        *lock(&self.activity_timeout)
    }

    fn channel_listener(&self, channel: &str) -> Option<Arc<dyn ChannelListener>> {
        lock(&self.channels).get(channel).cloned()
    }

    fn handle_frame(&self, text: &str) {
        let frame: Frame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "ignoring malformed frame");
                return;
            }
        };

        match frame.event.as_str() {
            "pusher:connection_established" => {
                let Some(established) = data_as::<ConnectionEstablished>(frame.data) else {
                    warn!("connection_established without socket_id");
                    return;
                };
                info!(socket_id = %established.socket_id, "pusher connection established");
                if let Some(secs) = established.activity_timeout {
                    let mut timeout = lock(&self.activity_timeout);
                    *timeout = (*timeout).min(Duration::from_secs(secs.max(1)));
                }
                *lock(&self.socket_id) = Some(established.socket_id);
                self.set_state(ConnectionState::Connected);
            }
            "pusher:error" => {
                let error = data_as::<ErrorData>(frame.data).unwrap_or_default();
                warn!(code = ?error.code, message = ?error.message, "pusher error");
                let listener = lock(&self.listener).clone();
                if let Some(listener) = listener {
                    listener.on_error(error.message, error.code.map(|c| c.to_string()));
                }
            }
            "pusher:ping" => self.send(json!({"event": "pusher:pong", "data": {}})),
            "pusher:pong" => {}
            "pusher_internal:subscription_succeeded" => {
                if let Some(channel) = frame.channel.as_deref() {
                    debug!(channel, "subscription succeeded");
                    if let Some(listener) = self.channel_listener(channel) {
                        listener.on_subscription_succeeded(Some(channel));
                    }
                }
            }
            "pusher:subscription_error" => {
                if let Some(channel) = frame.channel.as_deref() {
                    if let Some(listener) = self.channel_listener(channel) {
                        listener.on_authentication_failure(data_string(frame.data));
                    }
                }
            }
            event => match frame.channel.as_deref() {
                Some(channel) => {
                    if let Some(listener) = self.channel_listener(channel) {
                        listener.on_event(Some(channel), Some(event), data_string(frame.data));
                    }
                }
                None => debug!(event, "ignoring event without channel"),
            },
        }
    }

    /// The socket is gone: tell everyone and forget every channel.
    fn connection_lost(&self, reason: &str) {
        let was_established = lock(&self.socket_id).take().is_some();
        *lock(&self.outbound) = None;
        self.set_state(ConnectionState::Disconnected);

        if !was_established {
            let listener = lock(&self.listener).clone();
            if let Some(listener) = listener {
                listener.on_error(Some(reason.to_string()), None);
            }
            return;
        }

        info!(reason, "pusher connection lost");
        let channels: Vec<_> = lock(&self.channels).drain().collect();
        for (name, listener) in channels {
            listener.on_event(Some(&name), Some(Event::DISCONNECTED.name()), None);
            listener.on_error(Some(reason.to_string()));
        }
    }

    async fn authorize(&self, channel: &str) -> Result<AuthResponse, String> {
        let url = self
            .authentication_url
            .as_deref()
            .ok_or_else(|| "no authentication_url configured".to_string())?;
        let socket_id = lock(&self.socket_id)
            .clone()
            .ok_or_else(|| "socket is not connected".to_string())?;

        let request = self
            .http
            .post(url)
            .form(&[("socket_id", socket_id.as_str()), ("channel_name", channel)]);
        let response = self
            .authorizer
            .authorize(request)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(format!("auth endpoint returned {status}: {body}"));
        }
        response
            .json::<AuthResponse>()
            .await
            .map_err(|e| format!("invalid auth response: {e}"))
    }
}

async fn run(inner: Arc<Inner>) {
    let connect = tokio::select! {
        _ = inner.cancel.cancelled() => {
            inner.connection_lost("disconnected by client");
            return;
        }
        result = tokio_tungstenite::connect_async(inner.url.as_str()) => result,
    };
    let ws_stream = match connect {
        Ok((ws_stream, _)) => ws_stream,
        Err(e) => {
            warn!(error = %e, "websocket connect failed");
            inner.connection_lost(&e.to_string());
            return;
        }
    };

    let (mut ws_write, mut ws_read) = ws_stream.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
    *lock(&inner.outbound) = Some(out_tx);

    let idle = tokio::time::sleep(inner.activity_timeout());
    tokio::pin!(idle);
    let mut awaiting_pong = false;

    let reason = loop {
        tokio::select! {
            _ = inner.cancel.cancelled() => {
                let _ = ws_write.send(WsMessage::Close(None)).await;
                break "disconnected by client".to_string();
            }
            Some(frame) = out_rx.recv() => {
                if let Err(e) = ws_write.send(WsMessage::Text(frame.into())).await {
                    break e.to_string();
                }
            }
            msg = ws_read.next() => {
                awaiting_pong = false;
                idle.as_mut().reset(tokio::time::Instant::now() + inner.activity_timeout());
                match msg {
                    Some(Ok(WsMessage::Text(text))) => inner.handle_frame(text.as_str()),
                    Some(Ok(WsMessage::Close(_))) | None => break "connection closed".to_string(),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break e.to_string(),
                }
            }
            _ = &mut idle => {
                if awaiting_pong {
                    break "pong timeout".to_string();
                }
                awaiting_pong = true;
                inner.send(json!({"event": "pusher:ping", "data": {}}));
                idle.as_mut().reset(tokio::time::Instant::now() + PONG_TIMEOUT);
            }
        }
    };

    inner.connection_lost(&reason);
}

impl Connection for PusherConnection {
    fn connect(&self, listener: Arc<dyn ConnectionListener>) {
        *lock(&self.inner.listener) = Some(listener);
        debug!(url = %self.inner.url, "opening websocket");
        self.inner.set_state(ConnectionState::Connecting);
        tokio::spawn(run(self.inner.clone()));
    }

    fn state(&self) -> ConnectionState {
        *lock(&self.inner.state)
    }

    fn subscribe(&self, channel: &str, listener: Arc<dyn ChannelListener>) {
        lock(&self.inner.channels).insert(channel.to_string(), listener);
        self.inner.send(json!({
            "event": "pusher:subscribe",
            "data": {"channel": channel},
        }));
    }

    fn subscribe_private(&self, channel: &str, listener: Arc<dyn ChannelListener>) {
        lock(&self.inner.channels).insert(channel.to_string(), listener.clone());

        let inner = self.inner.clone();
        let channel = channel.to_string();
        tokio::spawn(async move {
            match inner.authorize(&channel).await {
                Ok(auth) => {
                    // Unsubscribed while the auth request was in flight
                    if inner.channel_listener(&channel).is_none() {
                        return;
                    }
                    let mut data = json!({"channel": channel, "auth": auth.auth});
                    if let Some(channel_data) = auth.channel_data {
                        data["channel_data"] = Value::String(channel_data);
                    }
                    inner.send(json!({"event": "pusher:subscribe", "data": data}));
                }
                Err(message) => {
                    warn!(channel = %channel, error = %message, "channel authorization failed");
                    listener.on_authentication_failure(Some(message));
                }
            }
        });
    }

    fn unsubscribe(&self, channel: &str) {
        if lock(&self.inner.channels).remove(channel).is_some() {
            self.inner.send(json!({
                "event": "pusher:unsubscribe",
                "data": {"channel": channel},
            }));
        }
    }

    fn disconnect(&self) {
        let state = *lock(&self.inner.state);
        if matches!(
            state,
            ConnectionState::Disconnected | ConnectionState::Disconnecting
        ) {
            return;
        }
        self.inner.set_state(ConnectionState::Disconnecting);
        self.inner.cancel.cancel();
    }
}

impl Drop for PusherConnection {
    fn drop(&mut self) {
        self.inner.cancel.cancel();
    }
}
