use serde::{Serialize, Serializer};
use std::borrow::Cow;
use std::fmt;
use std::hash::{Hash, Hasher};

const PRIVATE_PREFIX: &str = "private-";
const PRESENCE_PREFIX: &str = "presence-";

/// A named logical topic.
///
/// Equality and hashing consider the name only, so a channel works as a
/// registry key no matter how it was constructed.
#[derive(Clone, Debug)]
pub struct Channel {
    name: String,
    is_private: bool,
}

impl Channel {
    /// Build a channel, deriving privacy from the `private-` / `presence-`
    /// naming convention.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let is_private = name.starts_with(PRIVATE_PREFIX) || name.starts_with(PRESENCE_PREFIX);
        Self { name, is_private }
    }

    pub fn public(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_private: false,
        }
    }

    pub fn private(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_private: true,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_private(&self) -> bool {
        self.is_private
    }
}

impl PartialEq for Channel {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Channel {}

impl Hash for Channel {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl Serialize for Channel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.name)
    }
}

/// A named occurrence within a channel.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Event(Cow<'static, str>);

impl Event {
    /// The socket connection reached the connected state.
    ///
    /// Reserved and passed through whenever a transport reports it on a
    /// channel. The registry never synthesizes it, and the Pusher transport
    /// has no per-channel connected frame.
    pub const CONNECTED: Event = Event(Cow::Borrowed("connected"));
    /// The socket connection was lost
    pub const DISCONNECTED: Event = Event(Cow::Borrowed("disconnected"));
    /// The channel subscription was acknowledged
    pub const SUBSCRIBED: Event = Event(Cow::Borrowed("subscribed"));

    const LIFECYCLE: [Event; 3] = [Self::CONNECTED, Self::DISCONNECTED, Self::SUBSCRIBED];

    pub fn new(name: impl Into<String>) -> Self {
        Self(Cow::Owned(name.into()))
    }

    pub fn name(&self) -> &str {
        &self.0
    }

    /// Lifecycle events bypass every subscriber's event filter.
    pub fn is_lifecycle(&self) -> bool {
        Self::LIFECYCLE.contains(self)
    }
}

impl From<&str> for Event {
    fn from(name: &str) -> Self {
        Event::new(name)
    }
}

impl From<String> for Event {
    fn from(name: String) -> Self {
        Event::new(name)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single event delivered on a channel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Message {
    pub channel: Channel,
    pub event: Event,
    pub payload: Option<String>,
}

impl Message {
    pub fn new(channel: Channel, event: Event, payload: Option<String>) -> Self {
        Self {
            channel,
            event,
            payload,
        }
    }

    /// Build a message from what the transport hands over. Missing names
    /// become empty strings; a missing payload stays absent.
    pub fn from_raw(channel: Option<&str>, event: Option<&str>, data: Option<String>) -> Self {
        Self {
            channel: Channel::new(channel.unwrap_or_default()),
            event: Event::new(event.unwrap_or_default()),
            payload: data,
        }
    }
}
