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

    Exercises the machinery a `Communicator` wires together once the FPGA/SoC
    core is active: `IdPool`, `ExchangeTable`, `FrameSeparator` and
    `ExchangeHandler` cooperating the way they do once bytes start arriving on
    a real link, minus the serial transport itself (`SerialLink` needs a real
    port to open, so these scenarios push bytes straight into a
    `ReceiveBuffer` instead).
*/

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use wbhost::exchange::{Exchange, ExchangeTable};
use wbhost::exchange_handler::ExchangeHandler;
use wbhost::frame::Frame;
use wbhost::frame_separator::FrameSeparator;
use wbhost::id_pool::IdPool;
use wbhost::interrupt::{InterruptDispatcher, InterruptEvent};
use wbhost::protocol::{self, opcode};
use wbhost::recv_buffer::ReceiveBuffer;
use wbhost::{MultiReadSink, NackCode, ReadCallback, SingleReadCallback};

struct Pipeline {
    buffer: Arc<ReceiveBuffer>,
    table: Arc<ExchangeTable>,
    ids: Arc<IdPool>,
    separator: FrameSeparator,
    interrupts: InterruptDispatcher,
    completed_tx: crossbeam_channel::Sender<u8>,
    handler: ExchangeHandler,
}

impl Pipeline {
    fn start() -> Self {
        let buffer = Arc::new(ReceiveBuffer::new());
        let table = Arc::new(ExchangeTable::new());
        let ids = Arc::new(IdPool::new());
        let separator = FrameSeparator::new();
        separator.enable();
        let interrupts = InterruptDispatcher::new();

        let (completed_tx, completed_rx) = crossbeam_channel::unbounded();
        let handler = ExchangeHandler::spawn(completed_rx, table.clone(), ids.clone(), Arc::new(|_code, _request| {}));

        Pipeline { buffer, table, ids, separator, interrupts, completed_tx, handler }
    }

    fn deliver(&self, bytes: &[u8]) {
        self.buffer.push(bytes);
        self.separator.drain(&self.buffer, &self.table, &self.completed_tx, &self.interrupts);
    }
}

/// Drives one write (ACK-completed) exchange end to end: allocate an id,
/// register the request, push the matching ACK bytes, and let the handler
/// release the id.
#[test]
fn test_register_write_ack_releases_id_through_full_pipeline() {
    let buffer = Arc::new(ReceiveBuffer::new());
    let table = Arc::new(ExchangeTable::new());
    let ids = Arc::new(IdPool::new());
    let separator = FrameSeparator::new();
    separator.enable();
    let interrupts = InterruptDispatcher::new();
    let (completed_tx, completed_rx) = crossbeam_channel::unbounded();
    let mut handler = ExchangeHandler::spawn(completed_rx, table.clone(), ids.clone(), Arc::new(|_code, _request| {}));

    let before = ids.available();
    let id = ids.acquire().expect("fresh pool has ids available");
    let request_bytes = protocol::register_wr_frame(id, 1, 0x04, 0xAB);
    table.insert(id, Exchange::new(Frame::new(id, request_bytes), None, 0));

    let reply = ack_reply(id);
    buffer.push(&reply);
    separator.drain(&buffer, &table, &completed_tx, &interrupts);

    // give the handler worker thread a chance to drain the completed channel
    std::thread::sleep(Duration::from_millis(50));
    handler.stop();

    assert_eq!(ids.available(), before);
    assert_eq!(table.pending_count(), 0);
}

/// Drives one asynchronous register read end to end: the `SingleReadCallback`
/// slot is filled by the handler once the `REGISTER_RDRE` reply is routed.
#[test]
fn test_register_read_async_fills_callback_through_full_pipeline() {
    let buffer = Arc::new(ReceiveBuffer::new());
    let table = Arc::new(ExchangeTable::new());
    let ids = Arc::new(IdPool::new());
    let separator = FrameSeparator::new();
    separator.enable();
    let interrupts = InterruptDispatcher::new();
    let (completed_tx, completed_rx) = crossbeam_channel::unbounded();
    let mut handler = ExchangeHandler::spawn(completed_rx, table.clone(), ids.clone(), Arc::new(|_code, _request| {}));

    let id = ids.acquire().unwrap();
    let cb = SingleReadCallback::new(1);
    let request_bytes = protocol::register_rd_frame(id, 2, 0x10);
    table.insert(id, Exchange::new(Frame::new(id, request_bytes), Some(ReadCallback::Single(cb.clone())), 0));

    let body = [opcode::REGISTER_RDRE, id, 0x5A];
    let parity = protocol::xor_parity(&body);
    buffer.push(&[opcode::REGISTER_RDRE, id, 0x5A, parity]);
    separator.drain(&buffer, &table, &completed_tx, &interrupts);

    assert_eq!(cb.get(0), 0x5A);
    handler.stop();
}

/// A multi-byte read's `MultiReadSink` receives the whole payload once the
/// variable-length `REGISTER_MRDRE` reply has been fully assembled.
#[test]
fn test_register_multi_read_async_invokes_sink_through_full_pipeline() {
    let buffer = Arc::new(ReceiveBuffer::new());
    let table = Arc::new(ExchangeTable::new());
    let ids = Arc::new(IdPool::new());
    let separator = FrameSeparator::new();
    separator.enable();
    let interrupts = InterruptDispatcher::new();
    let (completed_tx, completed_rx) = crossbeam_channel::unbounded();
    let mut handler = ExchangeHandler::spawn(completed_rx, table.clone(), ids.clone(), Arc::new(|_code, _request| {}));

    let id = ids.acquire().unwrap();
    let seen: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
    let seen2 = seen.clone();
    let sink: MultiReadSink = Arc::new(move |data: &[u8]| seen2.lock().unwrap().extend_from_slice(data));

    let request_bytes = protocol::register_mrd_frame(id, 0, 0x20, 3);
    table.insert(id, Exchange::new(Frame::new(id, request_bytes), Some(ReadCallback::Multi(sink)), 0));

    let data = [1u8, 2, 3];
    let mut reply_body = vec![opcode::REGISTER_MRDRE, id];
    reply_body.extend_from_slice(&data);
    let parity = protocol::xor_parity(&reply_body);
    reply_body.push(parity);
    buffer.push(&reply_body);
    separator.drain(&buffer, &table, &completed_tx, &interrupts);

    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
    handler.stop();
}

/// A NACK reply reaches the handler's `on_nack` hook with the decoded code
/// and the original request frame, regardless of whether any caller is
/// synchronously waiting on it.
#[test]
fn test_nack_on_write_without_a_waiter_still_reaches_on_nack() {
    let buffer = Arc::new(ReceiveBuffer::new());
    let table = Arc::new(ExchangeTable::new());
    let ids = Arc::new(IdPool::new());
    let separator = FrameSeparator::new();
    separator.enable();
    let interrupts = InterruptDispatcher::new();
    let (completed_tx, completed_rx) = crossbeam_channel::unbounded();

    let seen: Arc<Mutex<Vec<NackCode>>> = Arc::new(Mutex::new(Vec::new()));
    let seen2 = seen.clone();
    let mut handler = ExchangeHandler::spawn(
        completed_rx,
        table.clone(),
        ids.clone(),
        Arc::new(move |code, _request| seen2.lock().unwrap().push(code)),
    );

    let id = ids.acquire().unwrap();
    let request_bytes = protocol::register_wr_frame(id, 0, 0, 0xFF);
    table.insert(id, Exchange::new(Frame::new(id, request_bytes), None, 0));

    let body = [opcode::NACK, id, 0x22];
    let parity = protocol::xor_parity(&body);
    buffer.push(&[opcode::NACK, id, 0x22, parity]);
    separator.drain(&buffer, &table, &completed_tx, &interrupts);

    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(*seen.lock().unwrap(), vec![NackCode::Parity]);
    handler.stop();
}

/// `SOC_INT` frames never touch the exchange table or the id pool: they are
/// routed to the interrupt dispatcher even while unrelated register
/// exchanges are pending.
#[test]
fn test_soc_int_is_dispatched_alongside_pending_register_exchange() {
    let pipeline = Pipeline::start();
    let hits = Arc::new(AtomicUsize::new(0));
    let hits2 = hits.clone();
    pipeline.interrupts.add_listener(Arc::new(move |event: InterruptEvent| {
        assert_eq!(event.core, 7);
        hits2.fetch_add(1, Ordering::SeqCst);
    }));

    let id = pipeline.ids.acquire().unwrap();
    let request_bytes = protocol::register_rd_frame(id, 0, 0);
    pipeline.table.insert(id, Exchange::new(Frame::new(id, request_bytes), None, 0));

    let body = [opcode::SOC_INT, 7];
    let parity = protocol::xor_parity(&body);
    pipeline.deliver(&[opcode::SOC_INT, 7, parity]);

    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(pipeline.table.pending_count(), 1, "the unrelated pending read is untouched");

    let mut handler = pipeline.handler;
    handler.stop();
}

fn ack_reply(id: u8) -> Vec<u8> {
    vec![opcode::ACK, id, id]
}
