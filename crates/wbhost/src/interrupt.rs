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

    interrupt.rs

    Interrupt events (§3) and their dispatch to registered listeners (§4.7.3).
    The FrameSeparator never calls a listener directly: it hands the event to
    the dispatcher, which clones the listener list under lock and then runs
    each listener on a fresh thread so a slow listener can never block the
    separator.
*/

use std::sync::{Arc, Mutex};

/// An asynchronous notification from a Wishbone core. `core` is the high
/// byte of the core's address; the low byte is always zero on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterruptEvent {
    pub core: u8,
}

/// Maps a core-index byte to a display name. The real core list (UART, SPI,
/// GPIO, ...) is a domain-specific consumer of this stack and out of scope
/// here (§1); callers that care about names supply their own directory.
pub trait CoreDirectory: Send + Sync {
    fn name_of(&self, core: u8) -> String;
}

/// Default directory used when the caller does not supply one: formats
/// `core<N>`.
pub struct UnnamedCores;

impl CoreDirectory for UnnamedCores {
    fn name_of(&self, core: u8) -> String {
        format!("core{}", core)
    }
}

pub type Listener = Arc<dyn Fn(InterruptEvent) + Send + Sync>;

/// Registered interrupt listeners plus the core directory used for logging.
pub struct InterruptDispatcher {
    listeners: Mutex<Vec<Listener>>,
    directory: Mutex<Arc<dyn CoreDirectory>>,
}

impl InterruptDispatcher {
    pub fn new() -> Self {
        InterruptDispatcher {
            listeners: Mutex::new(Vec::new()),
            directory: Mutex::new(Arc::new(UnnamedCores)),
        }
    }

    pub fn set_directory(&self, directory: Arc<dyn CoreDirectory>) {
        *self.directory.lock().unwrap() = directory;
    }

    pub fn add_listener(&self, listener: Listener) {
        self.listeners.lock().unwrap().push(listener);
    }

    pub fn clear_listeners(&self) {
        self.listeners.lock().unwrap().clear();
    }

    /// Dispatch `event` to every registered listener on a freshly spawned
    /// thread, per listener group, so the caller (the separator step) never
    /// blocks on listener code.
    pub fn dispatch(&self, event: InterruptEvent) {
        let listeners = self.listeners.lock().unwrap().clone();
        if listeners.is_empty() {
            return;
        }
        let directory = self.directory.lock().unwrap().clone();
        log::debug!("dispatching interrupt from {}", directory.name_of(event.core));
        std::thread::spawn(move || {
            for listener in listeners {
                listener(event);
            }
        });
    }
}

impl Default for InterruptDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_unnamed_cores_formats_index() {
        let dir = UnnamedCores;
        assert_eq!(dir.name_of(3), "core3");
    }

    #[test]
    fn test_dispatch_runs_every_listener() {
        let dispatcher = InterruptDispatcher::new();
        let hits = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let hits = hits.clone();
            dispatcher.add_listener(Arc::new(move |_event| {
                hits.fetch_add(1, Ordering::SeqCst);
            }));
        }
        dispatcher.dispatch(InterruptEvent { core: 2 });
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_dispatch_with_no_listeners_is_a_no_op() {
        let dispatcher = InterruptDispatcher::new();
        dispatcher.dispatch(InterruptEvent { core: 1 });
    }
}
