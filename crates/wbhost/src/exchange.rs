/*
    wbhost

    Copyright 2026 wbhost contributors

    Permission is hereby granted, free of charge, to any person obtaining a
    copy of this software and associated documentation files (the "Software"),
    to deal in the Software without restriction, including without limitation
    the rights to use, copy, modify, merge, publish, distribute, sublicense,
    and/or sell copies of the Software, and to permit persons to whom the
    Software is furnished to do so, subject to the following conditions:

    The above copyright notice and this permission notice shall be included in
    all copies or substantial portions of the Software.

    THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
    IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
    FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
    AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
    LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
    FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
    DEALINGS IN THE SOFTWARE.

    --------------------------------------------------------------------------

    exchange.rs

    An in-flight request paired with its eventual reply (§3), and the table
    that holds every live exchange, keyed by frame id (§4.4).

    Exchanges are short-lived and bounded by the 254 live ids; rather than a
    hash map we allocate them from a fixed slab indexed by id (see DESIGN.md).
*/

use crate::callback::ReadCallback;
use crate::error::{ComError, ComResult};
use crate::frame::Frame;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Exchanges that sit longer than this between creation and reply are
/// flagged `timed_out` once the reply lands (§6.4). This is distinct from
/// the caller-facing read timeout, which handles replies that never arrive.
pub const EXCHANGE_SLOW_REPLY: Duration = Duration::from_millis(1000);

pub struct Exchange {
    pub request: Frame,
    pub reply: Option<Frame>,
    pub callback: Option<ReadCallback>,
    pub callback_sequence_id: i32,
    pub created_at: Instant,
    pub reply_at: Option<Instant>,
}

impl Exchange {
    pub fn new(request: Frame, callback: Option<ReadCallback>, callback_sequence_id: i32) -> Self {
        Exchange {
            request,
            reply: None,
            callback,
            callback_sequence_id,
            created_at: Instant::now(),
            reply_at: None,
        }
    }

    /// Set the reply exactly once. A second call fails with `AlreadyReplied`
    /// (§3, §8 invariant 3).
    pub fn set_reply(&mut self, reply: Frame) -> ComResult<()> {
        if self.reply.is_some() {
            return Err(ComError::AlreadyReplied);
        }
        self.reply_at = Some(Instant::now());
        self.reply = Some(reply);
        Ok(())
    }

    /// True when the reply arrived more than [`EXCHANGE_SLOW_REPLY`] after
    /// creation. Only meaningful once a reply has been set; an exchange that
    /// never replies is detected by the caller's own read timeout, not here.
    pub fn timed_out(&self) -> bool {
        match self.reply_at {
            Some(reply_at) => reply_at.duration_since(self.created_at) > EXCHANGE_SLOW_REPLY,
            None => false,
        }
    }
}

const SLOT_COUNT: usize = 256;

struct Slots {
    entries: Vec<Option<Exchange>>,
}

/// Map of in-flight request ids to [`Exchange`] records, exclusively owned by
/// the `Communicator`. Mutated from the sender thread (insert) and the
/// separator thread (set-reply); synchronous readers park on the same
/// condition variable the separator signals.
pub struct ExchangeTable {
    slots: Mutex<Slots>,
    cond: Condvar,
}

impl ExchangeTable {
    pub fn new() -> Self {
        let mut entries = Vec::with_capacity(SLOT_COUNT);
        entries.resize_with(SLOT_COUNT, || None);
        ExchangeTable {
            slots: Mutex::new(Slots { entries }),
            cond: Condvar::new(),
        }
    }

    /// Insert a new exchange under `id`. Spin-retried until the slot is free:
    /// the only legitimate reason a slot is still occupied is that the
    /// previous holder of this id has not yet been removed by the handler,
    /// which the id pool discipline (§4.3) guarantees will happen shortly.
    pub fn insert(&self, id: u8, exchange: Exchange) {
        loop {
            {
                let mut slots = self.slots.lock().unwrap();
                if slots.entries[id as usize].is_none() {
                    slots.entries[id as usize] = Some(exchange);
                    return;
                }
            }
            std::thread::yield_now();
        }
    }

    /// Record a reply frame for `id`, waking any synchronous waiters.
    pub fn set_reply(&self, id: u8, reply: Frame) -> ComResult<()> {
        let mut slots = self.slots.lock().unwrap();
        match slots.entries[id as usize].as_mut() {
            Some(exchange) => {
                exchange.set_reply(reply)?;
                self.cond.notify_all();
                Ok(())
            }
            None => Err(ComError::ProtocolViolation(format!(
                "reply received for id {} with no outstanding exchange",
                id
            ))),
        }
    }

    /// Block the calling thread until `id`'s exchange has a reply or
    /// `timeout` elapses, returning a clone of the reply frame.
    pub fn wait_reply(&self, id: u8, timeout: Duration) -> ComResult<Frame> {
        let slots = self.slots.lock().unwrap();
        let (slots, result) = self
            .cond
            .wait_timeout_while(slots, timeout, |slots| match slots.entries[id as usize].as_ref() {
                Some(exchange) => exchange.reply.is_none(),
                None => false,
            })
            .unwrap();
        if result.timed_out() {
            return Err(ComError::Timeout);
        }
        match slots.entries[id as usize].as_ref() {
            Some(exchange) => exchange.reply.clone().ok_or(ComError::Timeout),
            None => Err(ComError::ProtocolViolation(format!("exchange {} vanished while waiting", id))),
        }
    }

    /// Clone the pending request frame for `id`, if any, without disturbing
    /// the exchange. Used by the `FrameSeparator` to learn the data length
    /// of a variable-length reply before it has been fully read off the wire.
    pub fn peek_request(&self, id: u8) -> Option<Frame> {
        let slots = self.slots.lock().unwrap();
        slots.entries[id as usize].as_ref().map(|ex| ex.request.clone())
    }

    /// Remove and return the exchange for `id` if its reply has been set.
    /// Used by the [`ExchangeHandler`](crate::exchange_handler::ExchangeHandler)
    /// once it has finished dispatching; removing frees the slot for reuse
    /// once the id is also released back to the [`IdPool`](crate::id_pool::IdPool).
    pub fn take_completed(&self, id: u8) -> Option<Exchange> {
        let mut slots = self.slots.lock().unwrap();
        let ready = matches!(&slots.entries[id as usize], Some(ex) if ex.reply.is_some());
        if ready {
            slots.entries[id as usize].take()
        }
        else {
            None
        }
    }

    /// Drop a live exchange outright without requiring a reply, used during
    /// shutdown once the drain deadline has passed.
    pub fn remove(&self, id: u8) -> Option<Exchange> {
        let mut slots = self.slots.lock().unwrap();
        slots.entries[id as usize].take()
    }

    /// Number of exchanges currently awaiting a reply.
    pub fn pending_count(&self) -> usize {
        let slots = self.slots.lock().unwrap();
        slots.entries.iter().filter(|e| e.is_some()).count()
    }
}

impl Default for ExchangeTable {
    fn default() -> Self {
        Self::new()
    }
}
