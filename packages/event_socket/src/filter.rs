use crate::channel::{Channel, Event, Message};

/// Decides which messages of a shared channel stream one subscriber sees.
///
/// An empty event list admits every event on the channel; otherwise only the
/// listed events plus the lifecycle events pass.
#[derive(Clone, Debug)]
pub struct EventFilter {
    channel: Channel,
    events: Vec<Event>,
}

impl EventFilter {
    pub fn new(channel: Channel, events: Vec<Event>) -> Self {
        Self { channel, events }
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    pub fn matches(&self, message: &Message) -> bool {
        if message.channel != self.channel {
            return false;
        }
        self.events.is_empty()
            || message.event.is_lifecycle()
            || self.events.contains(&message.event)
    }
}
