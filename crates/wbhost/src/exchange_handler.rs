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

    exchange_handler.rs

    Drains exchanges the `FrameSeparator` has completed: verifies the reply's
    parity trailer, fires the caller's callback (if any), interprets NACKs,
    and releases the id back to the pool. Runs on its own worker thread fed by
    the separator's completed-id channel so the separator itself never blocks
    on callback code (§4.4, §4.7.2).
*/

use crate::callback::ReadCallback;
use crate::error::{ComError, NackCode};
use crate::exchange::ExchangeTable;
use crate::frame::Frame;
use crate::id_pool::IdPool;
use crate::protocol::opcode;
use crossbeam_channel::Receiver;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// How long the worker blocks on the completed-id channel between checks of
/// its stop flag.
const POLL_TIMEOUT: Duration = Duration::from_millis(100);

pub struct ExchangeHandler {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ExchangeHandler {
    /// Spawn the worker thread. `on_nack` is called for every NACK, with the
    /// nacked exchange's original request frame so the caller can decide
    /// whether to resubmit (write-family opcodes, on a parity NACK) or
    /// simply surface the failure (reads, per §4.7.5).
    pub fn spawn(
        completed_rx: Receiver<u8>,
        table: Arc<ExchangeTable>,
        ids: Arc<IdPool>,
        on_nack: Arc<dyn Fn(NackCode, Frame) + Send + Sync>,
    ) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_for_thread = stop.clone();

        let handle = std::thread::spawn(move || {
            while !stop_for_thread.load(Ordering::Acquire) {
                match completed_rx.recv_timeout(POLL_TIMEOUT) {
                    Ok(id) => Self::process(id, &table, &ids, &on_nack),
                    Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
                    Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
                }
            }
        });

        ExchangeHandler { stop, handle: Some(handle) }
    }

    fn process(id: u8, table: &ExchangeTable, ids: &IdPool, on_nack: &Arc<dyn Fn(NackCode, Frame) + Send + Sync>) {
        let exchange = match table.take_completed(id) {
            Some(ex) => ex,
            None => {
                log::warn!("exchange_handler: id {} reported complete but no exchange was found", id);
                return;
            }
        };

        let reply = exchange.reply.as_ref().expect("take_completed only returns replied exchanges");
        if !reply.verify_parity() {
            // Asynchronous callers have no one waiting to check this frame's
            // parity themselves; there is nothing useful to hand a callback,
            // so the reply is simply dropped and logged as a protocol fault.
            log::error!("exchange_handler: reply for id {} failed parity verification", id);
            let _ = ids.release(id);
            return;
        }

        if exchange.timed_out() {
            log::warn!("exchange_handler: reply for id {} arrived after the slow-reply threshold", id);
        }

        match reply.opcode {
            opcode::ACK => {}
            opcode::NACK => {
                let code = NackCode::from(reply.payload().first().copied().unwrap_or(0));
                log::debug!("exchange_handler: id {} nacked: {}", id, code);
                on_nack(code, exchange.request.clone());
            }
            opcode::REGISTER_RDRE => {
                if let Some(ReadCallback::Single(cb)) = &exchange.callback {
                    if let Some(&byte) = reply.payload().first() {
                        cb.fill(exchange.callback_sequence_id as usize, byte);
                    }
                }
            }
            opcode::REGISTER_MRDRE | opcode::REGISTER_ARDRE => {
                if let Some(ReadCallback::Multi(sink)) = &exchange.callback {
                    sink(reply.payload());
                }
            }
            other => {
                log::warn!("exchange_handler: no dispatch rule for completed reply opcode 0x{:02X} (id {})", other, id);
            }
        }

        let _ = ids.release(id);
    }

    /// Signal the worker to stop and join it. Idempotent.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ExchangeHandler {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Convenience: decode a NACK payload's error byte into a [`ComError`]
/// suitable for surfacing to a synchronous caller.
pub fn nack_to_error(code: NackCode) -> ComError {
    ComError::Nack(code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::Exchange;
    use crate::frame::Frame;
    use crate::protocol;
    use std::sync::Mutex;
    use std::time::Duration as StdDuration;

    fn ack_frame(id: u8) -> Frame {
        Frame::new(id, vec![opcode::ACK, id, id])
    }

    #[test]
    fn test_ack_releases_id_without_callback() {
        let table = Arc::new(ExchangeTable::new());
        let ids = Arc::new(IdPool::new());
        let id = ids.acquire().unwrap();

        let request = Frame::new(id, protocol::register_wr_frame(id, 0, 0, 0));
        table.insert(id, Exchange::new(request, None, 0));
        table.set_reply(id, ack_frame(id)).unwrap();

        let (tx, rx) = crossbeam_channel::unbounded();
        tx.send(id).unwrap();
        let before = ids.available();

        let nacks: Arc<Mutex<Vec<NackCode>>> = Arc::new(Mutex::new(Vec::new()));
        let nacks2 = nacks.clone();
        let mut handler = ExchangeHandler::spawn(rx, table.clone(), ids.clone(), Arc::new(move |code, _request| {
            nacks2.lock().unwrap().push(code);
        }));

        std::thread::sleep(StdDuration::from_millis(50));
        handler.stop();

        assert_eq!(ids.available(), before + 1);
        assert!(nacks.lock().unwrap().is_empty());
    }

    #[test]
    fn test_register_rdre_fills_single_callback() {
        let table = Arc::new(ExchangeTable::new());
        let ids = Arc::new(IdPool::new());
        let id = ids.acquire().unwrap();
        let cb = crate::callback::SingleReadCallback::new(1);

        let request = Frame::new(id, protocol::register_rd_frame(id, 0, 0));
        table.insert(id, Exchange::new(request, Some(ReadCallback::Single(cb.clone())), 0));

        let reply = Frame::new(id, vec![opcode::REGISTER_RDRE, id, 0x5A, protocol::xor_parity(&[opcode::REGISTER_RDRE, id, 0x5A])]);
        table.set_reply(id, reply).unwrap();

        let (tx, rx) = crossbeam_channel::unbounded();
        tx.send(id).unwrap();
        let mut handler = ExchangeHandler::spawn(rx, table.clone(), ids.clone(), Arc::new(|_code, _request| {}));

        assert_eq!(cb.get(0), 0x5A);
        handler.stop();
    }

    #[test]
    fn test_nack_invokes_callback_with_decoded_code() {
        let table = Arc::new(ExchangeTable::new());
        let ids = Arc::new(IdPool::new());
        let id = ids.acquire().unwrap();

        let request = Frame::new(id, protocol::register_wr_frame(id, 0, 0, 0));
        table.insert(id, Exchange::new(request, None, 0));

        let body = [opcode::NACK, id, 0x33];
        let parity = protocol::xor_parity(&body);
        let reply = Frame::new(id, vec![opcode::NACK, id, 0x33, parity]);
        table.set_reply(id, reply).unwrap();

        let (tx, rx) = crossbeam_channel::unbounded();
        tx.send(id).unwrap();
        let nacks: Arc<Mutex<Vec<(NackCode, Frame)>>> = Arc::new(Mutex::new(Vec::new()));
        let nacks2 = nacks.clone();
        let mut handler = ExchangeHandler::spawn(rx, table.clone(), ids.clone(), Arc::new(move |code, request| {
            nacks2.lock().unwrap().push((code, request));
        }));

        std::thread::sleep(StdDuration::from_millis(50));
        handler.stop();

        let seen = nacks.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, NackCode::WishboneTimeout);
        assert_eq!(seen[0].1.opcode, opcode::REGISTER_WR);
    }
}
