//! Event Socket - realtime channel-subscription multiplexer
//!
//! Turns one authenticated realtime connection into many independently
//! subscribed, reference-counted channels, each exposed as a stream of
//! [`Message`]s. The connection is established lazily on the first
//! subscription; a channel's transport subscription lives exactly as long as
//! at least one of its streams is held.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use futures::StreamExt;
//! use event_socket::{Channel, EventSocket, SocketConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), event_socket::SocketError> {
//!     let config = SocketConfig::load(None)?;
//!     let socket = EventSocket::from_config(&config, Arc::new(|| Some("token".to_string())))?;
//!
//!     let mut orders = socket.subscribe(Channel::new("private-orders"), ["order-created"]);
//!     while let Some(message) = orders.next().await {
//!         let message = message?;
//!         println!("{}: {:?}", message.event, message.payload);
//!     }
//!     Ok(())
//! }
//! ```

use std::sync::{Mutex, MutexGuard};

pub mod authorizer;
pub mod channel;
pub mod config;
pub mod connection;
pub mod credentials;
mod error;
mod filter;
pub mod pusher;
pub mod refresh;
mod registry;
mod socket;
pub mod transport;

#[cfg(test)]
mod test_helpers;

pub use authorizer::ConnectionAuthorizer;
pub use channel::{Channel, Event, Message};
pub use config::SocketConfig;
pub use credentials::{Anonymous, AuthSession, AuthToken, CredentialSource};
pub use error::SocketError;
pub use filter::EventFilter;
pub use refresh::{HttpTokenRefresh, TokenRefresh, TokenRefreshApi, refresh_session};
pub use registry::ChannelStream;
pub use socket::{DEFAULT_MESSAGE_CAPACITY, EventSocket};
pub use transport::{ConnectionState, Transport};

/// Lock a std mutex, recovering the data if a holder panicked.
///
/// The guarded state is only ever replaced wholesale, so a poisoned value is
/// still consistent.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
