//! The boundary to the realtime transport that performs socket I/O.
//!
//! The transport is callback driven: it reports connection state changes to a
//! [`ConnectionListener`] and channel events to a [`ChannelListener`]. The rest
//! of the crate converts those callbacks into streams; callers never register
//! listeners themselves.

use std::fmt;
use std::sync::Arc;

use crate::authorizer::ConnectionAuthorizer;

/// Connection state as reported by the transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Initialized,
    Connecting,
    Connected,
    Disconnecting,
    Disconnected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Initialized => "initialized",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnecting => "disconnecting",
            ConnectionState::Disconnected => "disconnected",
        };
        f.write_str(s)
    }
}

/// A transition reported by the transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StateChange {
    pub previous: ConnectionState,
    pub current: ConnectionState,
}

impl StateChange {
    pub fn new(previous: ConnectionState, current: ConnectionState) -> Self {
        Self { previous, current }
    }
}

/// Receives connection-level callbacks.
pub trait ConnectionListener: Send + Sync {
    fn on_state_change(&self, change: StateChange);
    fn on_error(&self, message: Option<String>, code: Option<String>);
}

/// Receives channel-level callbacks.
pub trait ChannelListener: Send + Sync {
    fn on_event(&self, channel: Option<&str>, event: Option<&str>, data: Option<String>);

    fn on_subscription_succeeded(&self, _channel: Option<&str>) {}

    /// Private channel authorization was rejected.
    fn on_authentication_failure(&self, message: Option<String>);

    /// The transport can no longer deliver events for this channel.
    fn on_error(&self, message: Option<String>);
}

/// One transport connection.
pub trait Connection: Send + Sync {
    /// Begin connecting; progress is reported to `listener`.
    fn connect(&self, listener: Arc<dyn ConnectionListener>);

    fn state(&self) -> ConnectionState;

    fn subscribe(&self, channel: &str, listener: Arc<dyn ChannelListener>);

    fn subscribe_private(&self, channel: &str, listener: Arc<dyn ChannelListener>);

    fn unsubscribe(&self, channel: &str);

    fn disconnect(&self);
}

/// Creates transport connections configured with an authorizer.
pub trait Transport: Send + Sync {
    fn create(&self, authorizer: ConnectionAuthorizer) -> Arc<dyn Connection>;
}
