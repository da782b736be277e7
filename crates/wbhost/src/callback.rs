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

    callback.rs

    Asynchronous register-read callback shapes (§4.7.2). The callback kinds
    are a closed set, so this is a tagged variant rather than a trait object
    tree (§9 "Dynamic dispatch").
*/

use std::sync::{Arc, Condvar, Mutex};

/// Shared slot array for `readRegisterAsync`. Every reply that targets the
/// same logical read fills one slot, identified by the exchange's
/// `callback_sequence_id`. Callers may `get` a single slot or block for all
/// of them to fill.
#[derive(Clone)]
pub struct SingleReadCallback {
    state: Arc<(Mutex<Vec<Option<u8>>>, Condvar)>,
}

impl SingleReadCallback {
    pub fn new(expected_reads: usize) -> Self {
        SingleReadCallback {
            state: Arc::new((Mutex::new(vec![None; expected_reads]), Condvar::new())),
        }
    }

    pub fn expected_reads(&self) -> usize {
        self.state.0.lock().unwrap().len()
    }

    /// Fill slot `index` with `value`. Called by the `ExchangeHandler`.
    pub fn fill(&self, index: usize, value: u8) {
        let (lock, cvar) = &*self.state;
        let mut slots = lock.lock().unwrap();
        if index < slots.len() {
            slots[index] = Some(value);
        }
        else {
            log::warn!("single-read callback: slot index {} out of range ({} expected)", index, slots.len());
        }
        cvar.notify_all();
    }

    /// Block until slot `index` is filled and return its value.
    pub fn get(&self, index: usize) -> u8 {
        let (lock, cvar) = &*self.state;
        let slots = lock.lock().unwrap();
        let slots = cvar.wait_while(slots, |slots| slots[index].is_none()).unwrap();
        slots[index].expect("condvar only wakes once the slot is filled")
    }

    /// Block until every slot is filled and return them in order.
    pub fn get_all(&self) -> Vec<u8> {
        let (lock, cvar) = &*self.state;
        let slots = lock.lock().unwrap();
        let slots = cvar.wait_while(slots, |slots| slots.iter().any(Option::is_none)).unwrap();
        slots.iter().map(|s| s.expect("all slots filled")).collect()
    }
}

/// Invoked once with a payload whose length matches the originating
/// request's length byte (`readRegister(addr, n)` / `readRegisterAAI`).
pub type MultiReadSink = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// The closed set of callback shapes an asynchronous read exchange may carry.
#[derive(Clone)]
pub enum ReadCallback {
    Single(SingleReadCallback),
    Multi(MultiReadSink),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_single_read_get_blocks_until_filled() {
        let cb = SingleReadCallback::new(3);
        let cb2 = cb.clone();
        let filled = Arc::new(AtomicBool::new(false));
        let filled2 = filled.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            filled2.store(true, Ordering::SeqCst);
            cb2.fill(1, 0x42);
        });
        let value = cb.get(1);
        assert_eq!(value, 0x42);
        assert!(filled.load(Ordering::SeqCst));
        handle.join().unwrap();
    }

    #[test]
    fn test_single_read_get_all_collects_every_slot() {
        let cb = SingleReadCallback::new(2);
        cb.fill(0, 1);
        cb.fill(1, 2);
        assert_eq!(cb.get_all(), vec![1, 2]);
    }

    #[test]
    fn test_multi_read_sink_invoked_with_payload() {
        let seen: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        let sink: MultiReadSink = Arc::new(move |data: &[u8]| {
            seen2.lock().unwrap().extend_from_slice(data);
        });
        let callback = ReadCallback::Multi(sink);
        if let ReadCallback::Multi(f) = callback {
            f(&[1, 2, 3]);
        }
        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
    }
}
