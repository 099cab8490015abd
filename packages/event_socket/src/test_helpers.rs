//! Scripted in-memory transport for exercising the socket without I/O.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;

use crate::authorizer::ConnectionAuthorizer;
use crate::channel::Message;
use crate::error::SocketError;
use crate::lock;
use crate::registry::ChannelStream;
use crate::transport::{
    ChannelListener, Connection, ConnectionListener, ConnectionState, StateChange, Transport,
};

const WAIT: Duration = Duration::from_secs(5);

/// Poll `condition` until it holds, panicking after a generous timeout.
pub async fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let result = tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "timed out waiting for {what}");
}

pub async fn next_item(stream: &mut ChannelStream) -> Option<Result<Message, SocketError>> {
    tokio::time::timeout(WAIT, stream.next())
        .await
        .expect("timed out waiting for a stream item")
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    Subscribe {
        channel: String,
        private: bool,
        /// Headers an authorization request would carry at subscribe time
        auth_headers: Option<BTreeMap<String, String>>,
    },
    Unsubscribe(String),
}

pub struct FakeTransport {
    auto_connect: AtomicBool,
    connections: Mutex<Vec<Arc<FakeConnection>>>,
}

impl FakeTransport {
    /// Every connection completes its handshake as soon as it is started.
    pub fn auto_connect() -> Arc<Self> {
        Arc::new(Self {
            auto_connect: AtomicBool::new(true),
            connections: Mutex::new(Vec::new()),
        })
    }

    /// Handshakes wait for the test to resolve them.
    pub fn manual() -> Arc<Self> {
        let transport = Self::auto_connect();
        transport.set_auto_connect(false);
        transport
    }

    pub fn set_auto_connect(&self, enabled: bool) {
        self.auto_connect.store(enabled, Ordering::SeqCst);
    }

    pub fn connections_created(&self) -> usize {
        lock(&self.connections).len()
    }

    pub fn latest(&self) -> Arc<FakeConnection> {
        lock(&self.connections)
            .last()
            .cloned()
            .expect("no connection created yet")
    }

    /// Transport subscribe calls for `channel` across every connection.
    pub fn subscribe_total(&self, channel: &str) -> usize {
        lock(&self.connections)
            .iter()
            .map(|c| c.subscribe_count(channel))
            .sum()
    }

    pub fn unsubscribe_total(&self, channel: &str) -> usize {
        lock(&self.connections)
            .iter()
            .map(|c| c.unsubscribe_count(channel))
            .sum()
    }

    pub async fn wait_for_connections(&self, count: usize) {
        wait_until("connections", || self.connections_created() >= count).await;
    }

    pub async fn wait_for_subscribe(&self, channel: &str, count: usize) {
        wait_until("transport subscribe", || self.subscribe_total(channel) >= count).await;
    }
}

impl Transport for FakeTransport {
    fn create(&self, authorizer: ConnectionAuthorizer) -> Arc<dyn Connection> {
        let conn = Arc::new(FakeConnection {
            authorizer,
            auto_connect: self.auto_connect.load(Ordering::SeqCst),
            state: Mutex::new(ConnectionState::Initialized),
            listener: Mutex::new(None),
            channels: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            unsubscribe_delay: Mutex::new(Duration::ZERO),
        });
        lock(&self.connections).push(conn.clone());
        conn
    }
}

pub struct FakeConnection {
    pub authorizer: ConnectionAuthorizer,
    auto_connect: bool,
    state: Mutex<ConnectionState>,
    listener: Mutex<Option<Arc<dyn ConnectionListener>>>,
    channels: Mutex<HashMap<String, Arc<dyn ChannelListener>>>,
    calls: Mutex<Vec<Call>>,
    unsubscribe_delay: Mutex<Duration>,
}

impl FakeConnection {
    pub fn calls(&self) -> Vec<Call> {
        lock(&self.calls).clone()
    }

    pub fn subscribe_count(&self, channel: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Subscribe { channel: ch, .. } if ch == channel))
            .count()
    }

    pub fn unsubscribe_count(&self, channel: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Unsubscribe(ch) if ch == channel))
            .count()
    }

    pub fn was_private(&self, channel: &str) -> bool {
        self.calls().iter().any(|c| {
            matches!(c, Call::Subscribe { channel: ch, private: true, .. } if ch == channel)
        })
    }

    pub fn change_state(&self, current: ConnectionState) {
        let previous = std::mem::replace(&mut *lock(&self.state), current);
        let listener = lock(&self.listener).clone();
        if let Some(listener) = listener {
            listener.on_state_change(StateChange::new(previous, current));
        }
    }

    pub fn complete_handshake(&self) {
        self.change_state(ConnectionState::Connected);
    }

    pub fn fail_handshake(&self, message: &str) {
        let listener = lock(&self.listener).clone();
        if let Some(listener) = listener {
            listener.on_error(Some(message.to_string()), Some("4001".to_string()));
        }
    }

    fn channel_listener(&self, channel: &str) -> Arc<dyn ChannelListener> {
        lock(&self.channels)
            .get(channel)
            .cloned()
            .unwrap_or_else(|| panic!("no listener for {channel}"))
    }

    /// Deliver an event through the listener registered for `channel`.
    pub fn emit(&self, channel: &str, event: &str, data: Option<&str>) {
        self.channel_listener(channel)
            .on_event(Some(channel), Some(event), data.map(str::to_string));
    }

    /// Deliver a raw triple through the listener registered for `via`.
    pub fn emit_raw(
        &self,
        via: &str,
        channel: Option<&str>,
        event: Option<&str>,
        data: Option<&str>,
    ) {
        self.channel_listener(via)
            .on_event(channel, event, data.map(str::to_string));
    }

    pub fn acknowledge(&self, channel: &str) {
        self.channel_listener(channel)
            .on_subscription_succeeded(Some(channel));
    }

    pub fn reject_auth(&self, channel: &str, message: &str) {
        self.channel_listener(channel)
            .on_authentication_failure(Some(message.to_string()));
    }

    pub fn fail_channel(&self, channel: &str, message: &str) {
        self.channel_listener(channel)
            .on_error(Some(message.to_string()));
    }

    /// Make `unsubscribe` block for `delay` between recording the call and
    /// releasing the listener.
    pub fn slow_unsubscribe(&self, delay: Duration) {
        *lock(&self.unsubscribe_delay) = delay;
    }

    /// Drop the listener without any callback, as a transport might on shutdown.
    pub fn forget_listener(&self, channel: &str) {
        lock(&self.channels).remove(channel);
    }

    fn record_subscribe(&self, channel: &str, private: bool, listener: Arc<dyn ChannelListener>) {
        let auth_headers = private.then(|| self.authorizer.headers());
        lock(&self.channels).insert(channel.to_string(), listener);
        lock(&self.calls).push(Call::Subscribe {
            channel: channel.to_string(),
            private,
            auth_headers,
        });
    }
}

impl Connection for FakeConnection {
    fn connect(&self, listener: Arc<dyn ConnectionListener>) {
        *lock(&self.listener) = Some(listener);
        self.change_state(ConnectionState::Connecting);
        if self.auto_connect {
            self.complete_handshake();
        }
    }

    fn state(&self) -> ConnectionState {
        *lock(&self.state)
    }

    fn subscribe(&self, channel: &str, listener: Arc<dyn ChannelListener>) {
        self.record_subscribe(channel, false, listener);
    }

    fn subscribe_private(&self, channel: &str, listener: Arc<dyn ChannelListener>) {
        self.record_subscribe(channel, true, listener);
    }

    fn unsubscribe(&self, channel: &str) {
        lock(&self.calls).push(Call::Unsubscribe(channel.to_string()));
        let delay = *lock(&self.unsubscribe_delay);
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        lock(&self.channels).remove(channel);
    }

    fn disconnect(&self) {
        *lock(&self.state) = ConnectionState::Disconnected;
    }
}
