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

    recv_buffer.rs

    FIFO of bytes between the serial read thread and the FrameSeparator (§3).
    Single producer (the reader thread), single primary consumer (the
    separator step), but `peek`/`len` may be called from any thread.
*/

use crate::error::{ComError, ComResult};
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

pub struct ReceiveBuffer {
    queue: Mutex<VecDeque<u8>>,
    cond: Condvar,
}

impl ReceiveBuffer {
    pub fn new() -> Self {
        ReceiveBuffer {
            queue: Mutex::new(VecDeque::new()),
            cond: Condvar::new(),
        }
    }

    /// Append bytes read off the wire. Called by the serial read thread.
    pub fn push(&self, bytes: &[u8]) {
        let mut queue = self.queue.lock().unwrap();
        queue.extend(bytes.iter().copied());
        self.cond.notify_all();
    }

    pub fn len(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// First queued byte without removing it, or `None` if the buffer is empty.
    pub fn peek(&self) -> Option<u8> {
        self.queue.lock().unwrap().front().copied()
    }

    /// Block until exactly `n` bytes are available, then remove and return them.
    pub fn take(&self, n: usize) -> Vec<u8> {
        let queue = self.queue.lock().unwrap();
        let mut queue = self.cond.wait_while(queue, |q| q.len() < n).unwrap();
        queue.drain(..n).collect()
    }

    /// As [`take`](Self::take), but fails with `Timeout` if `n` bytes are not
    /// available within `timeout`.
    pub fn take_timeout(&self, n: usize, timeout: Duration) -> ComResult<Vec<u8>> {
        let deadline = Instant::now() + timeout;
        let queue = self.queue.lock().unwrap();
        let (mut queue, result) = self
            .cond
            .wait_timeout_while(queue, timeout, |q| q.len() < n)
            .unwrap();
        if result.timed_out() && queue.len() < n {
            return Err(ComError::Timeout);
        }
        // A spurious wake right at the deadline can still satisfy the
        // condition; re-check rather than trusting `timed_out` alone.
        if queue.len() < n {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ComError::Timeout);
            }
            let (q2, r2) = self.cond.wait_timeout_while(queue, remaining, |q| q.len() < n).unwrap();
            if r2.timed_out() && q2.len() < n {
                return Err(ComError::Timeout);
            }
            queue = q2;
        }
        Ok(queue.drain(..n).collect())
    }

    /// Drop every buffered byte (§4.2 `reset`).
    pub fn clear(&self) {
        self.queue.lock().unwrap().clear();
    }
}

impl Default for ReceiveBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_take_returns_pushed_bytes_in_order() {
        let buf = ReceiveBuffer::new();
        buf.push(&[1, 2, 3]);
        assert_eq!(buf.take(3), vec![1, 2, 3]);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_take_blocks_until_enough_bytes_pushed() {
        let buf = Arc::new(ReceiveBuffer::new());
        let buf2 = buf.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            buf2.push(&[9, 9]);
        });
        let bytes = buf.take(2);
        assert_eq!(bytes, vec![9, 9]);
        handle.join().unwrap();
    }

    #[test]
    fn test_take_timeout_expires_without_enough_bytes() {
        let buf = ReceiveBuffer::new();
        buf.push(&[1]);
        let err = buf.take_timeout(5, Duration::from_millis(20)).unwrap_err();
        assert!(matches!(err, ComError::Timeout));
    }

    #[test]
    fn test_clear_drops_buffered_bytes() {
        let buf = ReceiveBuffer::new();
        buf.push(&[1, 2, 3]);
        buf.clear();
        assert!(buf.is_empty());
    }
}
