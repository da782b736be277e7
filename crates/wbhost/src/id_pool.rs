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

    id_pool.rs

    Thread-safe pool of frame ids in [1, 254]. Id 0 is reserved for frames that
    are never matched against an outstanding exchange (DETECT, SOC_INT, ...).
*/

use crate::error::{ComError, ComResult};
use crossbeam_channel::{Receiver, Sender, TryRecvError};
use std::sync::Mutex;

pub const RESERVED_ID: u8 = 0;
pub const MIN_ID: u8 = 1;
pub const MAX_ID: u8 = 254;

/// Concurrent queue of free frame ids, seeded with `{1, ..., 254}`, paired
/// with a liveness bitmap so a duplicate `release` of an id already back in
/// the pool can be rejected instead of silently re-inserting it and letting
/// two unrelated exchanges collide on the same slot.
pub struct IdPool {
    free_tx: Sender<u8>,
    free_rx: Receiver<u8>,
    acquired: Mutex<[bool; 256]>,
}

impl IdPool {
    pub fn new() -> Self {
        let (free_tx, free_rx) = crossbeam_channel::unbounded();
        for id in MIN_ID..=MAX_ID {
            free_tx.send(id).expect("id pool channel cannot be closed here");
        }
        IdPool { free_tx, free_rx, acquired: Mutex::new([false; 256]) }
    }

    /// Remove and return a free id, or `None` if the pool is exhausted.
    pub fn acquire(&self) -> Option<u8> {
        let id = match self.free_rx.try_recv() {
            Ok(id) => id,
            Err(TryRecvError::Empty) => return None,
            Err(TryRecvError::Disconnected) => return None,
        };
        self.acquired.lock().unwrap()[id as usize] = true;
        Some(id)
    }

    /// Return an id to the pool, re-inserting it only if it is not already
    /// present. Releasing `RESERVED_ID` (0) is rejected; releasing an id that
    /// is not currently acquired (never acquired, or already released) is a
    /// logged no-op rather than a duplicate enqueue.
    pub fn release(&self, id: u8) -> ComResult<()> {
        if id == RESERVED_ID {
            return Err(ComError::InvalidArgument("id 0 is reserved and cannot be released".into()));
        }
        let mut acquired = self.acquired.lock().unwrap();
        if !acquired[id as usize] {
            log::warn!("id_pool: ignoring duplicate release of id {}", id);
            return Ok(());
        }
        acquired[id as usize] = false;
        drop(acquired);
        self.free_tx.send(id).ok();
        Ok(())
    }

    /// Number of ids currently available.
    pub fn available(&self) -> usize {
        self.free_rx.len()
    }
}

impl Default for IdPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_drains_pool() {
        let pool = IdPool::new();
        assert_eq!(pool.available(), 254);
        let id = pool.acquire().unwrap();
        assert!((MIN_ID..=MAX_ID).contains(&id));
        assert_eq!(pool.available(), 253);
    }

    #[test]
    fn test_acquired_id_not_present_until_released() {
        let pool = IdPool::new();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..254 {
            let id = pool.acquire().expect("pool should not be empty yet");
            assert!(seen.insert(id), "id pool handed out a duplicate id");
        }
        assert!(pool.acquire().is_none());
        pool.release(seen.iter().next().copied().unwrap()).unwrap();
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn test_release_reserved_id_fails() {
        let pool = IdPool::new();
        assert!(matches!(pool.release(RESERVED_ID), Err(ComError::InvalidArgument(_))));
    }

    #[test]
    fn test_release_unacquired_id_is_not_fatal() {
        let pool = IdPool::new();
        assert!(pool.release(17).is_ok());
    }

    #[test]
    fn test_double_release_does_not_duplicate_the_id() {
        let pool = IdPool::new();
        let id = pool.acquire().unwrap();
        let before = pool.available();
        pool.release(id).unwrap();
        pool.release(id).unwrap();
        assert_eq!(pool.available(), before + 1, "a duplicate release must not re-insert the id twice");
    }
}
