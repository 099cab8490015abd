//! Channel Subscription Registry.
//!
//! Maps each channel to a shared upstream: one transport subscription whose
//! messages are broadcast to every attached [`ChannelStream`]. The upstream
//! lives exactly as long as at least one stream holds it; dropping the last
//! stream unsubscribes from the transport and removes the entry.

use futures::FutureExt;
use futures::future::BoxFuture;
use futures::stream::{BoxStream, Stream, StreamExt};
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::task::{Context, Poll};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::channel::{Channel, Event, Message};
use crate::connection::ConnectionManager;
use crate::error::SocketError;
use crate::filter::EventFilter;
use crate::lock;
use crate::transport::{ChannelListener, Connection};

type Item = Result<Message, SocketError>;
type Entries = Arc<Mutex<HashMap<Channel, Entry>>>;

struct Entry {
    id: u64,
    shared: Weak<SharedChannel>,
    /// Outlives `shared` so a replacement can wait for the old unsubscribe
    teardown: Arc<Teardown>,
}

/// Transport-side state of one shared channel.
enum Upstream {
    /// Waiting for the connection to become ready
    Pending,
    Subscribed(Arc<dyn Connection>),
    /// Torn down; never subscribes again
    Closed,
}

/// Releases a shared channel's resources. Runs at most once in effect.
struct Teardown {
    id: u64,
    channel: Channel,
    upstream: Mutex<Upstream>,
    entries: Entries,
    released: watch::Sender<bool>,
    /// Upstream for the same channel still unsubscribing when this one was created
    previous: Option<Arc<Teardown>>,
}

impl Teardown {
    fn new(id: u64, channel: Channel, entries: Entries, previous: Option<Arc<Teardown>>) -> Self {
        Self {
            id,
            channel,
            upstream: Mutex::new(Upstream::Pending),
            entries,
            released: watch::channel(false).0,
            previous,
        }
    }

    /// Unsubscribe first, then drop the entry, then signal release. A
    /// replacement registered meanwhile waits on the signal before it
    /// subscribes, so the by-name unsubscribe cannot hit its listener.
    fn run(&self) {
        let previous = std::mem::replace(&mut *lock(&self.upstream), Upstream::Closed);
        if let Upstream::Subscribed(conn) = previous {
            debug!(channel = %self.channel, "unsubscribing from channel");
            conn.unsubscribe(self.channel.name());
        }

        {
            let mut entries = lock(&self.entries);
            if entries.get(&self.channel).is_some_and(|e| e.id == self.id) {
                entries.remove(&self.channel);
            }
        }

        self.released.send_replace(true);
    }

    fn is_released(&self) -> bool {
        *self.released.borrow()
    }

    /// Resolves once this upstream and every one it replaced are unsubscribed.
    fn wait_released(&self) -> BoxFuture<'_, ()> {
        async move {
            let mut rx = self.released.subscribe();
            let _ = rx.wait_for(|released| *released).await;
            if let Some(previous) = &self.previous {
                previous.wait_released().await;
            }
        }
        .boxed()
    }
}

struct SharedChannel {
    channel: Channel,
    sender: broadcast::Sender<Item>,
    teardown: Arc<Teardown>,
    pump: JoinHandle<()>,
}

impl Drop for SharedChannel {
    fn drop(&mut self) {
        debug!(channel = %self.channel, "last subscriber detached");
        self.pump.abort();
        self.teardown.run();
    }
}

pub(crate) struct Registry {
    entries: Entries,
    connections: Arc<ConnectionManager>,
    capacity: usize,
    next_id: AtomicU64,
}

impl Registry {
    pub fn new(connections: Arc<ConnectionManager>, capacity: usize) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            connections,
            capacity: capacity.max(1),
            next_id: AtomicU64::new(1),
        }
    }

    /// Attach to the channel's shared stream, creating it if no live one exists.
    ///
    /// The entry is registered before any connection work starts, so racing
    /// callers always end up on the same transport subscription.
    pub fn subscribe(&self, channel: Channel, events: Vec<Event>) -> ChannelStream {
        let filter = EventFilter::new(channel.clone(), events);
        let mut entries = lock(&self.entries);

        if let Some(shared) = entries.get(&channel).and_then(|e| e.shared.upgrade()) {
            // Receiver is taken under the lock so a concurrent failure cannot
            // slip its error out before we are listening.
            let rx = shared.sender.subscribe();
            drop(entries);
            debug!(channel = %channel, "attaching to existing channel stream");
            return ChannelStream::new(shared, rx, filter);
        }

        // A dead entry means its last stream is mid-teardown
        let previous = entries
            .get(&channel)
            .map(|e| e.teardown.clone())
            .filter(|t| !t.is_released());

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        debug!(channel = %channel, id, replacing = previous.is_some(), "creating channel stream");

        let (sender, rx) = broadcast::channel(self.capacity);
        let teardown = Arc::new(Teardown::new(
            id,
            channel.clone(),
            self.entries.clone(),
            previous,
        ));
        let pump = tokio::spawn(pump(
            channel.clone(),
            self.connections.clone(),
            sender.clone(),
            teardown.clone(),
        ));
        let shared = Arc::new(SharedChannel {
            channel: channel.clone(),
            sender,
            teardown: teardown.clone(),
            pump,
        });

        let _ = entries.insert(
            channel,
            Entry {
                id,
                shared: Arc::downgrade(&shared),
                teardown,
            },
        );
        drop(entries);

        ChannelStream::new(shared, rx, filter)
    }

    /// Channels that currently have at least one attached stream.
    pub fn active_channels(&self) -> Vec<Channel> {
        lock(&self.entries)
            .iter()
            .filter(|(_, entry)| entry.shared.strong_count() > 0)
            .map(|(channel, _)| channel.clone())
            .collect()
    }
}

/// Drives one transport subscription and feeds the shared broadcast.
async fn pump(
    channel: Channel,
    connections: Arc<ConnectionManager>,
    sender: broadcast::Sender<Item>,
    teardown: Arc<Teardown>,
) {
    if let Some(previous) = &teardown.previous {
        previous.wait_released().await;
    }

    let conn = match connections.await_ready().await {
        Ok(conn) => conn,
        Err(err) => return fail(&sender, &teardown, err),
    };

    let (tx, mut rx) = mpsc::unbounded_channel();
    let adapter = Arc::new(ChannelAdapter {
        channel: channel.clone(),
        tx,
    });

    {
        let mut upstream = lock(&teardown.upstream);
        if matches!(*upstream, Upstream::Closed) {
            return;
        }
        *upstream = Upstream::Subscribed(conn.clone());
        debug!(channel = %channel, private = channel.is_private(), "subscribing to channel");
        if channel.is_private() {
            conn.subscribe_private(channel.name(), adapter);
        } else {
            conn.subscribe(channel.name(), adapter);
        }
    }

    while let Some(item) = rx.recv().await {
        match item {
            Ok(message) => {
                // No receivers only means everyone is between polls
                let _ = sender.send(Ok(message));
            }
            Err(err) => return fail(&sender, &teardown, err),
        }
    }

    fail(
        &sender,
        &teardown,
        SocketError::Subscription {
            channel: channel.name().to_string(),
            message: "transport released the channel".to_string(),
        },
    );
}

/// Remove the entry first so later subscribers start fresh, then terminate
/// every current subscriber with the error.
fn fail(sender: &broadcast::Sender<Item>, teardown: &Teardown, err: SocketError) {
    warn!(channel = %teardown.channel, error = %err, "channel stream failed");
    teardown.run();
    let _ = sender.send(Err(err));
}

/// Turns transport callbacks for one subscription into stream items.
struct ChannelAdapter {
    channel: Channel,
    tx: mpsc::UnboundedSender<Item>,
}

impl ChannelListener for ChannelAdapter {
    fn on_event(&self, channel: Option<&str>, event: Option<&str>, data: Option<String>) {
        let _ = self.tx.send(Ok(Message::from_raw(channel, event, data)));
    }

    fn on_subscription_succeeded(&self, _channel: Option<&str>) {
        let _ = self
            .tx
            .send(Ok(Message::new(self.channel.clone(), Event::SUBSCRIBED, None)));
    }

    fn on_authentication_failure(&self, message: Option<String>) {
        let _ = self.tx.send(Err(SocketError::AuthFailure {
            channel: self.channel.name().to_string(),
            message: message.unwrap_or_else(|| "authorization rejected".to_string()),
        }));
    }

    fn on_error(&self, message: Option<String>) {
        let _ = self.tx.send(Err(SocketError::Subscription {
            channel: self.channel.name().to_string(),
            message: message.unwrap_or_else(|| "transport error".to_string()),
        }));
    }
}

/// One subscriber's filtered view of a channel.
///
/// Ends after yielding an error. Dropping it detaches the subscriber; the
/// last detach unsubscribes from the transport.
pub struct ChannelStream {
    inner: BoxStream<'static, Item>,
    shared: Arc<SharedChannel>,
}

impl ChannelStream {
    fn new(shared: Arc<SharedChannel>, rx: broadcast::Receiver<Item>, filter: EventFilter) -> Self {
        Self {
            inner: filtered(rx, filter),
            shared,
        }
    }

    pub fn channel(&self) -> &Channel {
        &self.shared.channel
    }
}

impl std::fmt::Debug for ChannelStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelStream")
            .field("channel", &self.shared.channel)
            .finish_non_exhaustive()
    }
}

impl Stream for ChannelStream {
    type Item = Item;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

fn filtered(rx: broadcast::Receiver<Item>, filter: EventFilter) -> BoxStream<'static, Item> {
    futures::stream::unfold(Some((rx, filter)), |state| async move {
        let (mut rx, filter) = state?;
        loop {
            match rx.recv().await {
                Ok(Ok(message)) => {
                    if filter.matches(&message) {
                        return Some((Ok(message), Some((rx, filter))));
                    }
                }
                Ok(Err(err)) => return Some((Err(err), None)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(channel = %filter.channel(), skipped, "subscriber lagged, messages dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
    .boxed()
}
