/*
** This file is a part of Iksemel (XML parser for Jabber/XMPP)
** Copyright (C) 2000-2025 Gurer Ozen
**
** Iksemel is free software: you can redistribute it and/or modify it
** under the terms of the GNU Lesser General Public License as
** published by the Free Software Foundation, either version 3 of
** the License, or (at your option) any later version.
*/

use std::time::Duration;
use std::time::Instant;

use parking_lot::Condvar;
use parking_lot::Mutex;

/// Result of waiting on a [Rendezvous].
#[derive(Debug, Eq, PartialEq)]
pub enum Wait<T> {
    Value(T),
    Released,
    TimedOut,
}

struct Slot<T> {
    value: Option<T>,
    released: bool,
}

/// Single slot hand-off between the reader thread and a waiting caller.
///
/// A new value overwrites an unclaimed one instead of queueing behind it.
/// `release()` wakes the waiter without a value, and keeps the rendezvous
/// released until `reset()`.
pub struct Rendezvous<T> {
    slot: Mutex<Slot<T>>,
    ready: Condvar,
}

impl<T> Rendezvous<T> {
    pub fn new() -> Self {
        Rendezvous {
            slot: Mutex::new(Slot {
                value: None,
                released: false,
            }),
            ready: Condvar::new(),
        }
    }

    pub fn set(&self, value: T) {
        let mut slot = self.slot.lock();
        slot.value = Some(value);
        self.ready.notify_all();
    }

    pub fn release(&self) {
        let mut slot = self.slot.lock();
        slot.released = true;
        self.ready.notify_all();
    }

    /// Clears both the slot and the released flag.
    pub fn reset(&self) {
        let mut slot = self.slot.lock();
        slot.value = None;
        slot.released = false;
    }

    /// Waits until a value is set, the rendezvous is released, or the
    /// timeout expires. A value set before the release is still returned.
    pub fn wait(&self, timeout: Duration) -> Wait<T> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.slot.lock();
        loop {
            if let Some(value) = slot.value.take() {
                return Wait::Value(value);
            }
            if slot.released {
                return Wait::Released;
            }
            if self.ready.wait_until(&mut slot, deadline).timed_out() {
                return match slot.value.take() {
                    Some(value) => Wait::Value(value),
                    None => Wait::TimedOut,
                };
            }
        }
    }
}

impl<T> Default for Rendezvous<T> {
    fn default() -> Self {
        Self::new()
    }
}
