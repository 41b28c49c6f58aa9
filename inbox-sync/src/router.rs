//! Fan-out of decoded message events to subscribers, and translation into
//! datastore push events.

use std::collections::HashSet;

use inbox_core::{Listeners, MessageMutation, PushEvent, Subscription};

use crate::protocol::{EventKind, MessageEvent};

#[derive(Clone, Default)]
pub struct MessageRouter {
    listeners: Listeners<MessageEvent>,
}

impl MessageRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Receive every event.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&MessageEvent) + Send + Sync + 'static,
    {
        self.listeners.subscribe(callback)
    }

    /// Receive only events whose kind is in `kinds`.
    pub fn subscribe_to<F>(&self, kinds: &[EventKind], callback: F) -> Subscription
    where
        F: Fn(&MessageEvent) + Send + Sync + 'static,
    {
        let kinds: HashSet<EventKind> = kinds.iter().copied().collect();
        self.listeners.subscribe(move |event: &MessageEvent| {
            if kinds.contains(&event.event) {
                callback(event);
            }
        })
    }

    pub fn dispatch(&self, event: &MessageEvent) {
        log::trace!("Dispatching {:?} to {} listeners", event.event, self.len());
        self.listeners.emit(event);
    }
}

/// Datastore push event for a server message event, or `None` when the
/// event lacks what it needs (a message id or payload) or is unknown.
pub fn to_push_event(event: &MessageEvent) -> Option<PushEvent> {
    let mutated = |mutation: MessageMutation| {
        event.message_id.clone().map(|message_id| PushEvent::Mutated {
            message_id,
            mutation,
        })
    };

    match event.event {
        EventKind::Message => event.data.clone().map(PushEvent::NewMessage),
        EventKind::Read => mutated(MessageMutation::Read),
        EventKind::Unread => mutated(MessageMutation::Unread),
        EventKind::Opened => mutated(MessageMutation::Open),
        EventKind::Unopened => mutated(MessageMutation::Unopen),
        EventKind::Archive => mutated(MessageMutation::Archive),
        EventKind::Unarchive => mutated(MessageMutation::Unarchive),
        EventKind::Clicked => event
            .message_id
            .clone()
            .map(|message_id| PushEvent::Clicked { message_id }),
        EventKind::MarkAllRead => Some(PushEvent::ReadAll),
        EventKind::ArchiveAll => Some(PushEvent::ArchiveAll),
        EventKind::ArchiveRead => Some(PushEvent::ArchiveRead),
        EventKind::Unknown => None,
    }
}
