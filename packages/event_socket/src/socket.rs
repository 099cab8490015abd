use std::collections::BTreeMap;
use std::sync::Arc;

use crate::authorizer::ConnectionAuthorizer;
use crate::channel::{Channel, Event};
use crate::config::SocketConfig;
use crate::connection::ConnectionManager;
use crate::credentials::CredentialSource;
use crate::error::SocketError;
use crate::pusher::PusherTransport;
use crate::registry::{ChannelStream, Registry};
use crate::transport::{ConnectionState, Transport};

pub const DEFAULT_MESSAGE_CAPACITY: usize = 256;

/// Multiplexes many channel subscriptions over one transport connection.
///
/// Subscribing is synchronous: the connection and the transport subscription
/// are established in the background and any failure arrives as the stream's
/// final item. Must be used from within a Tokio runtime.
pub struct EventSocket {
    connections: Arc<ConnectionManager>,
    registry: Registry,
}

impl EventSocket {
    pub fn new(
        transport: Arc<dyn Transport>,
        credentials: Arc<dyn CredentialSource>,
        additional_auth_headers: BTreeMap<String, String>,
    ) -> Self {
        let authorizer = ConnectionAuthorizer::new(credentials, additional_auth_headers);
        Self::with_capacity(transport, authorizer, DEFAULT_MESSAGE_CAPACITY)
    }

    /// `capacity` bounds how many messages a slow subscriber may fall behind
    /// before it starts skipping.
    pub fn with_capacity(
        transport: Arc<dyn Transport>,
        authorizer: ConnectionAuthorizer,
        capacity: usize,
    ) -> Self {
        let connections = Arc::new(ConnectionManager::new(transport, authorizer));
        let registry = Registry::new(connections.clone(), capacity);
        Self {
            connections,
            registry,
        }
    }

    /// Build a socket speaking the Pusher protocol as described by `config`.
    pub fn from_config(
        config: &SocketConfig,
        credentials: Arc<dyn CredentialSource>,
    ) -> Result<Self, SocketError> {
        config.validate()?;
        let transport = Arc::new(PusherTransport::new(config)?);
        let authorizer =
            ConnectionAuthorizer::new(credentials, config.additional_auth_headers.clone());
        Ok(Self::with_capacity(
            transport,
            authorizer,
            config.message_capacity,
        ))
    }

    /// Subscribe to `channel`, seeing only `events` plus the lifecycle events.
    /// An empty event list sees everything on the channel.
    ///
    /// Dropping the returned stream unsubscribes; the transport subscription
    /// is released once the channel's last stream is gone.
    pub fn subscribe<I>(&self, channel: Channel, events: I) -> ChannelStream
    where
        I: IntoIterator,
        I::Item: Into<Event>,
    {
        let events = events.into_iter().map(Into::into).collect();
        self.registry.subscribe(channel, events)
    }

    pub fn active_channels(&self) -> Vec<Channel> {
        self.registry.active_channels()
    }

    pub fn connection_state(&self) -> Option<ConnectionState> {
        self.connections.state()
    }

    /// Drop the underlying connection. Channel streams on it end with an
    /// error once the transport reports the loss.
    pub fn disconnect(&self) {
        self.connections.disconnect();
    }
}
