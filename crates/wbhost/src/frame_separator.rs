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

    frame_separator.rs

    Consumes the receive buffer while the FPGA/SoC is the active chip,
    recognizes opcodes, assembles frames, and routes them either to the
    exchange table (by id) or to the interrupt dispatcher (§4.4).

    Only ever sees the four opcodes the SoC can emit once configured: ACK,
    NACK, REGISTER_RDRE/MRDRE/ARDRE, and SOC_INT. MCU replies (DETECT_RE,
    STATUS_RDRE, SERIAL_RDRE, ...) are read synchronously while the separator
    is disabled (§4.4), so they never reach this module.
*/

use crate::exchange::ExchangeTable;
use crate::frame::Frame;
use crate::interrupt::{InterruptDispatcher, InterruptEvent};
use crate::protocol::{len, opcode};
use crate::recv_buffer::ReceiveBuffer;
use crossbeam_channel::Sender;
use std::sync::atomic::{AtomicBool, Ordering};

/// Fixed length (opcode byte included) of every reply opcode that does not
/// need to consult an outstanding request. `None` for opcodes whose length
/// is learned from the matching request (§4.4).
fn fixed_reply_len(op: u8) -> Option<usize> {
    match op {
        opcode::ACK => Some(len::ACK),
        opcode::NACK => Some(len::NACK),
        opcode::REGISTER_RDRE => Some(len::REGISTER_RDRE),
        opcode::SOC_INT => Some(len::SOC_INT),
        _ => None,
    }
}

fn is_variable_length_reply(op: u8) -> bool {
    matches!(op, opcode::REGISTER_MRDRE | opcode::REGISTER_ARDRE)
}

pub struct FrameSeparator {
    active: AtomicBool,
}

impl FrameSeparator {
    pub fn new() -> Self {
        FrameSeparator { active: AtomicBool::new(false) }
    }

    pub fn enable(&self) {
        self.active.store(true, Ordering::Release);
    }

    pub fn disable(&self) {
        self.active.store(false, Ordering::Release);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Extract and route as many frames as the buffer currently allows.
    /// Called from the link's notify callback; takes its collaborators by
    /// reference rather than storing a backlink to the communicator (§9).
    pub fn drain(&self, buffer: &ReceiveBuffer, table: &ExchangeTable, completed_tx: &Sender<u8>, interrupts: &InterruptDispatcher) {
        if !self.is_active() {
            return;
        }
        while buffer.len() >= len::SHORTEST_SOC_REPLY {
            if !self.step(buffer, table, completed_tx, interrupts) {
                break;
            }
        }
    }

    /// Extract exactly one frame, if the buffer holds enough bytes to
    /// recognize and fully read it. Returns `false` when no progress could
    /// be made (buffer too short for the opcode currently at its head).
    fn step(&self, buffer: &ReceiveBuffer, table: &ExchangeTable, completed_tx: &Sender<u8>, interrupts: &InterruptDispatcher) -> bool {
        let op = match buffer.peek() {
            Some(b) => b,
            None => return false,
        };

        if let Some(fixed_len) = fixed_reply_len(op) {
            if buffer.len() < fixed_len {
                return false;
            }
            let bytes = buffer.take(fixed_len);
            self.route(op, bytes, table, completed_tx, interrupts);
            return true;
        }

        if is_variable_length_reply(op) {
            if buffer.len() < 2 {
                return false;
            }
            // Peek opcode+id without permanently consuming them in case the
            // matching request is not visible yet; re-reading a 2-byte peek
            // is cheap and keeps the buffer FIFO-consistent either way.
            let head = buffer.take(2);
            let id = head[1];
            // The matching REGISTER_MRD/REGISTER_ARD request carries its
            // data length as its 5th byte (index 4): [opcode, id, core, reg, n, parity].
            let n = loop {
                match table.peek_request(id) {
                    Some(request) if request.bytes.len() > 4 => break request.bytes[4],
                    _ => std::thread::yield_now(),
                }
            };
            let rest = buffer.take(n as usize + 1);
            let mut bytes = head;
            bytes.extend_from_slice(&rest);
            self.route(op, bytes, table, completed_tx, interrupts);
            return true;
        }

        log::warn!("frame_separator: discarding unrecognized opcode byte 0x{:02X}", op);
        buffer.take(1);
        true
    }

    fn route(&self, op: u8, bytes: Vec<u8>, table: &ExchangeTable, completed_tx: &Sender<u8>, interrupts: &InterruptDispatcher) {
        if op == opcode::SOC_INT {
            let core = bytes.get(1).copied().unwrap_or(0);
            interrupts.dispatch(InterruptEvent { core });
            return;
        }

        let id = bytes.get(1).copied().unwrap_or(0);
        let frame = Frame::new(id, bytes);
        match table.set_reply(id, frame) {
            Ok(()) => {
                if completed_tx.send(id).is_err() {
                    log::warn!("frame_separator: completed-exchange channel is closed");
                }
            }
            Err(e) => {
                log::warn!("frame_separator: could not route reply for id {}: {}", id, e);
            }
        }
    }
}

impl Default for FrameSeparator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::Exchange;
    use crate::protocol;

    fn setup() -> (FrameSeparator, ReceiveBuffer, ExchangeTable, InterruptDispatcher) {
        (FrameSeparator::new(), ReceiveBuffer::new(), ExchangeTable::new(), InterruptDispatcher::new())
    }

    #[test]
    fn test_inactive_separator_drains_nothing() {
        let (sep, buffer, table, interrupts) = setup();
        let (tx, _rx2) = crossbeam_channel::unbounded();
        buffer.push(&[protocol::opcode::ACK, 1, 1]);
        sep.drain(&buffer, &table, &tx, &interrupts);
        assert_eq!(buffer.len(), 3);
    }

    #[test]
    fn test_ack_routes_to_matching_exchange() {
        let (sep, buffer, table, interrupts) = setup();
        sep.enable();
        let (tx, rx) = crossbeam_channel::unbounded();

        let request = Frame::new(0x42, protocol::register_wr_frame(0x42, 1, 4, 0xAB));
        table.insert(0x42, Exchange::new(request, None, 0));

        buffer.push(&[protocol::opcode::ACK, 0x42, 0x42]);
        sep.drain(&buffer, &table, &tx, &interrupts);

        let completed_id = rx.try_recv().expect("ack should complete the exchange");
        assert_eq!(completed_id, 0x42);
        let exchange = table.take_completed(0x42).unwrap();
        assert_eq!(exchange.reply.unwrap().bytes, vec![0x00, 0x42, 0x42]);
    }

    #[test]
    fn test_soc_int_bypasses_exchange_table() {
        let (sep, buffer, table, interrupts) = setup();
        sep.enable();
        let (tx, rx) = crossbeam_channel::unbounded();
        let hits = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let hits2 = hits.clone();
        interrupts.add_listener(std::sync::Arc::new(move |event: InterruptEvent| {
            assert_eq!(event.core, 5);
            hits2.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }));

        let body = [protocol::opcode::SOC_INT, 5];
        let parity = protocol::xor_parity(&body);
        buffer.push(&[protocol::opcode::SOC_INT, 5, parity]);
        sep.drain(&buffer, &table, &tx, &interrupts);

        assert!(rx.try_recv().is_err());
        assert_eq!(table.pending_count(), 0);
        std::thread::sleep(std::time::Duration::from_millis(50));
        assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn test_variable_length_reply_uses_request_length_byte() {
        let (sep, buffer, table, interrupts) = setup();
        sep.enable();
        let (tx, rx) = crossbeam_channel::unbounded();

        let request = Frame::new(0x10, protocol::register_mrd_frame(0x10, 0, 0, 3));
        table.insert(0x10, Exchange::new(request, None, 0));

        let data = [1u8, 2, 3];
        let mut reply_body = vec![protocol::opcode::REGISTER_MRDRE, 0x10];
        reply_body.extend_from_slice(&data);
        let parity = protocol::xor_parity(&reply_body);
        reply_body.push(parity);
        buffer.push(&reply_body);

        sep.drain(&buffer, &table, &tx, &interrupts);

        let completed_id = rx.try_recv().expect("mrdre should complete the exchange");
        assert_eq!(completed_id, 0x10);
        let exchange = table.take_completed(0x10).unwrap();
        assert_eq!(exchange.reply.unwrap().bytes, reply_body);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_unrecognized_opcode_is_discarded() {
        let (sep, buffer, table, interrupts) = setup();
        sep.enable();
        let (tx, _rx2) = crossbeam_channel::unbounded();
        buffer.push(&[0x7F, protocol::opcode::ACK, 1, 1]);
        sep.drain(&buffer, &table, &tx, &interrupts);
        assert!(buffer.is_empty());
    }
}
