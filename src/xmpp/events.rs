/*
** This file is a part of Iksemel (XML parser for Jabber/XMPP)
** Copyright (C) 2000-2025 Gurer Ozen
**
** Iksemel is free software: you can redistribute it and/or modify it
** under the terms of the GNU Lesser General Public License as
** published by the Free Software Foundation, either version 3 of
** the License, or (at your option) any later version.
*/

use std::collections::HashSet;
use std::fmt::Display;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use crossbeam_channel::Receiver;
use crossbeam_channel::RecvTimeoutError;
use crossbeam_channel::Sender;
use crossbeam_channel::unbounded;
use parking_lot::Mutex;

use crate::Element;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum ConnectionState {
    Closed,
    Opening,
    Open,
    Closing,
    Error,
}

impl Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionState::Closed => "closed",
            ConnectionState::Opening => "opening",
            ConnectionState::Open => "open",
            ConnectionState::Closing => "closing",
            ConnectionState::Error => "error",
        };
        f.write_str(name)
    }
}

/// Notifications published by a connection to its subscribers.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ConnectionEvent {
    /// A stanza which is not consumed by the connection itself.
    MessageReceived(Element),
    /// The server opened its stream, carries the stream id.
    StreamInitialized(String),
    /// The server closed its stream, carries the reason if known.
    StreamClosed(String),
    AuthenticationFailed(String),
    StateChanged(ConnectionState),
    TransportFailed(String),
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct SubscriptionId(u64);

/// Receiving end of a subscription to connection events.
pub struct Subscription {
    id: SubscriptionId,
    receiver: Receiver<ConnectionEvent>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn receiver(&self) -> &Receiver<ConnectionEvent> {
        &self.receiver
    }

    /// Waits for the next event. Returns None on timeout or when the
    /// subscription has been released.
    pub fn next_event(&self, timeout: Duration) -> Option<ConnectionEvent> {
        match self.receiver.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    pub fn try_next_event(&self) -> Option<ConnectionEvent> {
        self.receiver.try_recv().ok()
    }
}

/// Broadcasts events to any number of subscribers.
pub struct EventHub {
    next_id: AtomicU64,
    subscribers: Mutex<Vec<(SubscriptionId, Sender<ConnectionEvent>)>>,
}

impl EventHub {
    pub fn new() -> Self {
        EventHub {
            next_id: AtomicU64::new(1),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn subscribe(&self) -> Subscription {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (sender, receiver) = unbounded();
        self.subscribers.lock().push((id, sender));
        Subscription { id, receiver }
    }

    /// Removes a subscriber. Returns false if it was not subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.lock();
        let before = subscribers.len();
        subscribers.retain(|(sub_id, _)| *sub_id != id);
        subscribers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Sends the event to every subscriber, dropping the ones whose
    /// receiving end is gone. Never blocks.
    pub fn publish(&self, event: ConnectionEvent) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|(_, sender)| sender.send(event.clone()).is_ok());
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Ids of the sent stanzas which are waiting for a reply.
pub struct PendingMessageSet {
    ids: Mutex<HashSet<String>>,
}

impl PendingMessageSet {
    pub fn new() -> Self {
        PendingMessageSet {
            ids: Mutex::new(HashSet::new()),
        }
    }

    pub fn insert(&self, id: &str) {
        self.ids.lock().insert(id.to_string());
    }

    /// Removes the id, returns true if it was pending.
    pub fn remove(&self, id: &str) -> bool {
        self.ids.lock().remove(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.lock().contains(id)
    }

    pub fn clear(&self) {
        self.ids.lock().clear();
    }

    pub fn is_empty(&self) -> bool {
        self.ids.lock().is_empty()
    }
}

impl Default for PendingMessageSet {
    fn default() -> Self {
        Self::new()
    }
}
