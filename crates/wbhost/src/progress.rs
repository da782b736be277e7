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

    progress.rs

    Observer events raised during device discovery and FPGA upload so a host
    UI can show progress without polling (§4.6, §4.8).
*/

use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    /// The device at `path` reported it is still configuring; discovery will
    /// keep polling it until `CONFIGURE_TOTAL_BUDGET` elapses.
    AwaitingConfiguration { path: String },
    /// A candidate port did not respond to `DETECT` and was skipped.
    PortSkipped { path: String },
    /// The binary already held on the device matches the one being
    /// uploaded; the sector-write phase was skipped entirely.
    BinaryAlreadyPresent,
    /// One sector finished writing; `percent` is `0..=100`.
    SectorWritten { sector: u16, percent: u8 },
    /// FPGA configuration was triggered and acknowledged.
    ConfigurationComplete,
}

pub type ProgressListener = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

/// Registered progress listeners, shared by `DeviceDetector` and
/// `FpgaBinary`. Notification runs synchronously on the caller's own thread:
/// unlike interrupt dispatch, progress events are emitted from code that is
/// already on a dedicated worker (discovery/upload), not from the separator,
/// so there is no risk of blocking protocol I/O.
#[derive(Clone)]
pub struct ProgressSource {
    listeners: Arc<Mutex<Vec<ProgressListener>>>,
}

impl ProgressSource {
    pub fn new() -> Self {
        ProgressSource { listeners: Arc::new(Mutex::new(Vec::new())) }
    }

    pub fn add_listener(&self, listener: ProgressListener) {
        self.listeners.lock().unwrap().push(listener);
    }

    pub fn emit(&self, event: ProgressEvent) {
        for listener in self.listeners.lock().unwrap().iter() {
            listener(event.clone());
        }
    }
}

impl Default for ProgressSource {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_emit_reaches_every_listener() {
        let source = ProgressSource::new();
        let hits = Arc::new(AtomicUsize::new(0));
        for _ in 0..2 {
            let hits = hits.clone();
            source.add_listener(Arc::new(move |_event| {
                hits.fetch_add(1, Ordering::SeqCst);
            }));
        }
        source.emit(ProgressEvent::BinaryAlreadyPresent);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_emit_with_no_listeners_is_a_no_op() {
        let source = ProgressSource::new();
        source.emit(ProgressEvent::ConfigurationComplete);
    }
}
