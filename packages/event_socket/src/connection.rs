//! Connection Manager: owns at most one live transport connection.
//!
//! States: absent (no connection yet), connecting (handshake in flight),
//! live (handshake resolved). A failed handshake resets to absent so the next
//! readiness request starts over.

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::authorizer::ConnectionAuthorizer;
use crate::error::SocketError;
use crate::lock;
use crate::transport::{
    Connection, ConnectionListener, ConnectionState, StateChange, Transport,
};

type Handshake = Shared<BoxFuture<'static, Result<Arc<dyn Connection>, SocketError>>>;

enum Slot {
    Absent,
    Connecting { attempt: u64, handshake: Handshake },
    Live(Arc<dyn Connection>),
}

/// Lazily establishes the transport connection and hands it out once ready.
pub struct ConnectionManager {
    transport: Arc<dyn Transport>,
    authorizer: ConnectionAuthorizer,
    slot: Mutex<Slot>,
    next_attempt: AtomicU64,
}

impl ConnectionManager {
    pub fn new(transport: Arc<dyn Transport>, authorizer: ConnectionAuthorizer) -> Self {
        Self {
            transport,
            authorizer,
            slot: Mutex::new(Slot::Absent),
            next_attempt: AtomicU64::new(1),
        }
    }

    /// Resolve with the live connection, connecting first if needed.
    ///
    /// An already-connected instance resolves immediately. Concurrent callers
    /// share a single in-flight handshake.
    pub async fn await_ready(&self) -> Result<Arc<dyn Connection>, SocketError> {
        let (attempt, handshake) = {
            let mut slot = lock(&self.slot);
            let in_flight = match &*slot {
                Slot::Live(conn) if conn.state() == ConnectionState::Connected => {
                    return Ok(conn.clone());
                }
                Slot::Connecting { attempt, handshake } => Some((*attempt, handshake.clone())),
                _ => None,
            };
            match in_flight {
                Some(in_flight) => in_flight,
                None => {
                    if let Slot::Live(stale) = std::mem::replace(&mut *slot, Slot::Absent) {
                        debug!(state = %stale.state(), "replacing stale connection");
                        stale.disconnect();
                    }
                    let attempt = self.next_attempt.fetch_add(1, Ordering::SeqCst);
                    let handshake = self.begin_handshake(attempt);
                    *slot = Slot::Connecting {
                        attempt,
                        handshake: handshake.clone(),
                    };
                    (attempt, handshake)
                }
            }
        };

        let result = handshake.await;

        let mut slot = lock(&self.slot);
        if matches!(&*slot, Slot::Connecting { attempt: a, .. } if *a == attempt) {
            *slot = match &result {
                Ok(conn) => Slot::Live(conn.clone()),
                Err(_) => Slot::Absent,
            };
        }
        result
    }

    /// State of the managed connection, `None` when there is none.
    pub fn state(&self) -> Option<ConnectionState> {
        match &*lock(&self.slot) {
            Slot::Absent => None,
            Slot::Connecting { .. } => Some(ConnectionState::Connecting),
            Slot::Live(conn) => Some(conn.state()),
        }
    }

    /// Drop the managed connection. The next readiness request reconnects.
    pub fn disconnect(&self) {
        let previous = std::mem::replace(&mut *lock(&self.slot), Slot::Absent);
        if let Slot::Live(conn) = previous {
            info!("disconnecting socket connection");
            conn.disconnect();
        }
    }

    fn begin_handshake(&self, attempt: u64) -> Handshake {
        debug!(attempt, "starting connection handshake");

        let connection = self.transport.create(self.authorizer.clone());
        let (tx, rx) = oneshot::channel();
        connection.connect(Arc::new(HandshakeListener {
            attempt,
            respond_to: Mutex::new(Some(tx)),
        }));

        async move {
            match rx.await {
                Ok(Ok(())) => {
                    info!(attempt, "socket connection established");
                    Ok(connection)
                }
                Ok(Err(err)) => {
                    warn!(attempt, error = %err, "socket handshake failed");
                    connection.disconnect();
                    Err(err)
                }
                Err(_) => {
                    connection.disconnect();
                    Err(SocketError::Connection(
                        "transport dropped the handshake".to_string(),
                    ))
                }
            }
        }
        .boxed()
        .shared()
    }
}

/// Resolves a handshake on the first decisive callback from the transport.
struct HandshakeListener {
    attempt: u64,
    respond_to: Mutex<Option<oneshot::Sender<Result<(), SocketError>>>>,
}

impl HandshakeListener {
    fn resolve(&self, result: Result<(), SocketError>) {
        if let Some(tx) = lock(&self.respond_to).take() {
            let _ = tx.send(result);
        }
    }
}

impl ConnectionListener for HandshakeListener {
    fn on_state_change(&self, change: StateChange) {
        debug!(
            attempt = self.attempt,
            previous = %change.previous,
            current = %change.current,
            "connection state changed"
        );
        // Only a change that actually reaches `Connected` resolves readiness;
        // intermediate states such as `Connecting` are not enough.
        match change.current {
            ConnectionState::Connected => self.resolve(Ok(())),
            ConnectionState::Disconnected => self.resolve(Err(SocketError::Connection(
                "disconnected before the connection was established".to_string(),
            ))),
            _ => {}
        }
    }

    fn on_error(&self, message: Option<String>, code: Option<String>) {
        debug!(attempt = self.attempt, ?code, ?message, "transport error");
        self.resolve(Err(SocketError::Connection(
            message.unwrap_or_else(|| "unknown transport error".to_string()),
        )));
    }
}
