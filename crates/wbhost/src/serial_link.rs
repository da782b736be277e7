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

    serial_link.rs

    Raw byte transport over a named serial port (§4.2). Opens the port at the
    line-rate settings from §6.2, runs a dedicated read thread that drains the
    port into a `ReceiveBuffer`, and lets callers send bytes or block for a
    reply on whatever thread they're already on.
*/

use crate::error::{ComError, ComResult};
use crate::recv_buffer::ReceiveBuffer;
use crate::tuning::BAUD_RATE;
use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// Read-thread poll granularity. The port's own read timeout, not a protocol
/// constant; short enough that `close`/`reset` notice the stop flag quickly.
const READER_POLL_TIMEOUT: Duration = Duration::from_millis(50);
const READER_CHUNK: usize = 4096;

pub type NotifyFn = Arc<dyn Fn() + Send + Sync>;

struct ReaderThread {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

pub struct SerialLink {
    port_name: Mutex<Option<String>>,
    writer: Mutex<Option<Box<dyn SerialPort>>>,
    buffer: Arc<ReceiveBuffer>,
    notify: Mutex<Option<NotifyFn>>,
    reader: Mutex<Option<ReaderThread>>,
}

impl SerialLink {
    pub fn new() -> Self {
        SerialLink {
            port_name: Mutex::new(None),
            writer: Mutex::new(None),
            buffer: Arc::new(ReceiveBuffer::new()),
            notify: Mutex::new(None),
            reader: Mutex::new(None),
        }
    }

    /// Install the callback invoked (on a fresh thread) whenever new bytes
    /// land in the receive buffer. Mirrors `attach_communicator` in the
    /// source design notes (§9): the link holds a plain callback, not a
    /// reference back to the communicator.
    pub fn set_notify(&self, notify: NotifyFn) {
        *self.notify.lock().unwrap() = Some(notify);
    }

    pub fn buffer(&self) -> Arc<ReceiveBuffer> {
        self.buffer.clone()
    }

    pub fn is_open(&self) -> bool {
        self.writer.lock().unwrap().is_some()
    }

    /// Open `path` at 3,000,000 baud, 8-N-1, hardware flow control (§6.2),
    /// and start the background read thread.
    pub fn open(&self, path: &str) -> ComResult<()> {
        self.close();

        let port = serialport::new(path, BAUD_RATE)
            .data_bits(DataBits::Eight)
            .stop_bits(StopBits::One)
            .parity(Parity::None)
            .flow_control(FlowControl::Hardware)
            .timeout(READER_POLL_TIMEOUT)
            .open()
            .map_err(|e| ComError::Transport(format!("opening {}: {}", path, e)))?;

        let reader_port = port
            .try_clone()
            .map_err(|e| ComError::Transport(format!("cloning handle for {}: {}", path, e)))?;

        *self.port_name.lock().unwrap() = Some(path.to_string());
        *self.writer.lock().unwrap() = Some(port);
        self.spawn_reader(reader_port);
        Ok(())
    }

    fn spawn_reader(&self, mut reader_port: Box<dyn SerialPort>) {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_for_thread = stop.clone();
        let buffer = self.buffer.clone();
        let notify = self.notify.lock().unwrap().clone();

        let handle = std::thread::spawn(move || {
            let mut chunk = vec![0u8; READER_CHUNK];
            while !stop_for_thread.load(Ordering::Acquire) {
                match reader_port.read(&mut chunk) {
                    Ok(0) => {}
                    Ok(n) => {
                        buffer.push(&chunk[..n]);
                        if let Some(notify) = notify.clone() {
                            std::thread::spawn(move || notify());
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {}
                    Err(e) => {
                        log::error!("serial_link: read thread stopping after error: {}", e);
                        break;
                    }
                }
            }
        });

        *self.reader.lock().unwrap() = Some(ReaderThread { stop, handle });
    }

    fn stop_reader(&self) {
        if let Some(reader) = self.reader.lock().unwrap().take() {
            reader.stop.store(true, Ordering::Release);
            let _ = reader.handle.join();
        }
    }

    /// Write `bytes` to the link.
    pub fn send(&self, bytes: &[u8]) -> ComResult<()> {
        let mut writer = self.writer.lock().unwrap();
        match writer.as_mut() {
            Some(port) => port
                .write_all(bytes)
                .map_err(|e| ComError::Transport(format!("write failed: {}", e))),
            None => Err(ComError::Transport("link is not open".into())),
        }
    }

    /// Block until exactly `n` bytes are available and remove them.
    pub fn receive(&self, n: usize) -> Vec<u8> {
        self.buffer.take(n)
    }

    /// As [`receive`](Self::receive), bounded by `timeout`.
    pub fn receive_timeout(&self, n: usize, timeout: Duration) -> ComResult<Vec<u8>> {
        self.buffer.take_timeout(n, timeout)
    }

    /// Remove the byte-available handler, drain OS- and locally-buffered
    /// bytes, and close/reopen the port (§4.2).
    pub fn reset(&self) -> ComResult<()> {
        let path = self
            .port_name
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| ComError::Transport("reset() called on a link that was never opened".into()))?;

        let saved_notify = self.notify.lock().unwrap().take();
        self.stop_reader();
        if let Some(mut port) = self.writer.lock().unwrap().take() {
            let _ = port.clear(ClearBuffer::All);
        }
        self.buffer.clear();
        *self.notify.lock().unwrap() = saved_notify;

        self.open(&path)
    }

    /// Idempotent close: stop the read thread and drop the port handle.
    pub fn close(&self) {
        self.stop_reader();
        self.writer.lock().unwrap().take();
    }
}

impl Default for SerialLink {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SerialLink {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_link_is_closed() {
        let link = SerialLink::new();
        assert!(!link.is_open());
    }

    #[test]
    fn test_send_without_open_is_transport_error() {
        let link = SerialLink::new();
        let err = link.send(&[1, 2, 3]).unwrap_err();
        assert!(matches!(err, ComError::Transport(_)));
    }

    #[test]
    fn test_close_is_idempotent() {
        let link = SerialLink::new();
        link.close();
        link.close();
        assert!(!link.is_open());
    }

    #[test]
    fn test_receive_timeout_on_empty_buffer() {
        let link = SerialLink::new();
        let err = link.receive_timeout(1, Duration::from_millis(10)).unwrap_err();
        assert!(matches!(err, ComError::Timeout));
    }
}
