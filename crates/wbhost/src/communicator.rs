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

    communicator.rs

    Top-level façade (§4.7): owns the chip-selection state machine, register
    read/write operations, interrupt enable and listener registration, and
    graceful shutdown. Wires `SerialLink`, `FrameSeparator`, `ExchangeTable`,
    `IdPool`, `InterruptDispatcher`, and `ExchangeHandler` together without
    any of them holding a reference back to the `Communicator` itself (§9
    "cyclic references").
*/

use crate::callback::{MultiReadSink, ReadCallback, SingleReadCallback};
use crate::error::{ComError, ComResult, NackCode};
use crate::exchange::{Exchange, ExchangeTable};
use crate::exchange_handler::ExchangeHandler;
use crate::frame::Frame;
use crate::frame_separator::FrameSeparator;
use crate::id_pool::IdPool;
use crate::interrupt::{CoreDirectory, InterruptDispatcher, Listener};
use crate::protocol::{self, len, opcode};
use crate::serial_link::SerialLink;
use crate::tuning::{CLOSE_TIMEOUT, MCU_SELECT_TIMEOUT, PARITY_RETRY_BUDGET, REGISTER_READ_TIMEOUT, STATUS_READ_TIMEOUT};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChipState {
    McuActive,
    FpgaActive,
}

pub struct Communicator {
    link: Arc<SerialLink>,
    separator: Arc<FrameSeparator>,
    table: Arc<ExchangeTable>,
    ids: Arc<IdPool>,
    interrupts: Arc<InterruptDispatcher>,
    handler: Mutex<Option<ExchangeHandler>>,
    state: Mutex<ChipState>,
}

impl Communicator {
    /// Open `path` and wrap it in a `Communicator`, starting in `MCU_ACTIVE`
    /// (§3 lifecycles: boards boot with the MCU owning the serial line).
    pub fn open(path: &str) -> ComResult<Self> {
        let link = SerialLink::new();
        link.open(path)?;
        Ok(Self::from_link(link))
    }

    /// Wrap an already-open link. Used by callers that obtained a
    /// `DetectedDevice` from [`DeviceDetector`](crate::device_detector::DeviceDetector).
    pub fn from_link(link: SerialLink) -> Self {
        let link = Arc::new(link);
        let buffer = link.buffer();
        let separator = Arc::new(FrameSeparator::new());
        let table = Arc::new(ExchangeTable::new());
        let interrupts = Arc::new(InterruptDispatcher::new());
        let ids = Arc::new(IdPool::new());
        let (completed_tx, completed_rx) = crossbeam_channel::unbounded();

        {
            let buffer = buffer.clone();
            let table = table.clone();
            let separator = separator.clone();
            let interrupts = interrupts.clone();
            let tx = completed_tx.clone();
            link.set_notify(Arc::new(move || {
                separator.drain(&buffer, &table, &tx, &interrupts);
            }));
        }

        let resubmit_ids = ids.clone();
        let resubmit_table = table.clone();
        let resubmit_link = link.clone();
        let on_nack: Arc<dyn Fn(NackCode, Frame) + Send + Sync> = Arc::new(move |code, request| {
            let is_resubmittable_write = matches!(
                request.opcode,
                opcode::REGISTER_WR | opcode::REGISTER_MWR | opcode::REGISTER_AWR | opcode::SOC_INT_EN
            );
            if !is_resubmittable_write || !matches!(code, NackCode::Parity) {
                log::warn!("communicator: exchange nacked ({}) for opcode 0x{:02X}, not resubmitted", code, request.opcode);
                return;
            }
            match resubmit_ids.acquire() {
                Some(new_id) => {
                    let mut bytes = request.bytes.clone();
                    bytes[1] = new_id;
                    let body_end = bytes.len() - 1;
                    bytes[body_end] = protocol::xor_parity(&bytes[..body_end]);
                    resubmit_table.insert(new_id, Exchange::new(Frame::new(new_id, bytes.clone()), None, 0));
                    if let Err(e) = resubmit_link.send(&bytes) {
                        log::error!("communicator: failed to resubmit nacked write: {}", e);
                        resubmit_table.remove(new_id);
                        let _ = resubmit_ids.release(new_id);
                    }
                }
                None => log::error!("communicator: id pool exhausted, cannot resubmit nacked write"),
            }
        });

        let handler = ExchangeHandler::spawn(completed_rx, table.clone(), ids.clone(), on_nack);

        Communicator {
            link,
            separator,
            table,
            ids,
            interrupts,
            handler: Mutex::new(Some(handler)),
            state: Mutex::new(ChipState::McuActive),
        }
    }

    pub fn state(&self) -> ChipState {
        *self.state.lock().unwrap()
    }

    // ---- 4.7.1 chip-selection state machine ----------------------------

    /// `MCU_ACTIVE -> FPGA_ACTIVE`.
    pub fn activate_fpga(&self) -> ComResult<()> {
        let mut state = self.state.lock().unwrap();
        if *state == ChipState::FpgaActive {
            return Ok(());
        }
        self.link.send(&protocol::soc_sel_frame())?;
        let bytes = self.link.receive_timeout(len::ACK, MCU_SELECT_TIMEOUT)?;
        if bytes[0] != opcode::ACK {
            return Err(ComError::ProtocolViolation("SOC_SEL was not acknowledged".into()));
        }
        self.separator.enable();
        *state = ChipState::FpgaActive;
        Ok(())
    }

    /// `FPGA_ACTIVE -> MCU_ACTIVE`.
    pub fn activate_mcu(&self) -> ComResult<()> {
        let mut state = self.state.lock().unwrap();
        if *state == ChipState::McuActive {
            return Ok(());
        }
        self.separator.disable();
        loop {
            let id = self.acquire_id()?;
            self.link.send(&protocol::mcu_sel_frame(id))?;
            let outcome = self.read_ack_or_nack(MCU_SELECT_TIMEOUT);
            let _ = self.ids.release(id);
            match outcome {
                Ok(frame) if frame.opcode == opcode::ACK && frame.id == id && frame.verify_parity() => break,
                Ok(_) => continue,
                Err(e) => {
                    log::warn!("activate_mcu: MCU_SEL attempt failed: {}", e);
                    continue;
                }
            }
        }
        *state = ChipState::McuActive;
        Ok(())
    }

    /// Probe which chip currently owns the line without changing state,
    /// per §4.7.1's `isFpgaActive()`.
    pub fn is_fpga_active(&self) -> ComResult<bool> {
        for _ in 0..PARITY_RETRY_BUDGET {
            self.separator.disable();
            self.link.send(&protocol::status_rd_frame())?;
            let head = self.link.receive_timeout(4, STATUS_READ_TIMEOUT)?;
            if head[0] == opcode::NACK {
                let code = NackCode::from(head[2]);
                if matches!(code, NackCode::OpcodeUnknown) {
                    return Ok(true);
                }
            }
            else if head[0] == opcode::STATUS_RDRE {
                let _ = self.link.receive_timeout(len::STATUS_RDRE - 4, STATUS_READ_TIMEOUT)?;
                return Ok(false);
            }
            self.link.reset()?;
        }
        Err(ComError::ProtocolViolation("isFpgaActive probe did not converge".into()))
    }

    fn read_ack_or_nack(&self, timeout: Duration) -> ComResult<Frame> {
        let head = self.link.receive_timeout(1, timeout)?;
        let rest_len = match head[0] {
            opcode::ACK => len::ACK - 1,
            opcode::NACK => len::NACK - 1,
            other => return Err(ComError::ProtocolViolation(format!("expected ACK/NACK, got opcode 0x{:02X}", other))),
        };
        let rest = self.link.receive_timeout(rest_len, timeout)?;
        let mut bytes = head;
        bytes.extend(rest);
        let id = bytes.get(1).copied().unwrap_or(0);
        Ok(Frame::new(id, bytes))
    }

    // ---- 4.7.2 register operations ---------------------------------------

    pub fn write_register(&self, addr: u16, data: u8) -> ComResult<()> {
        self.require_fpga_active()?;
        let (core, reg) = split_addr(addr);
        let id = self.acquire_id()?;
        let bytes = protocol::register_wr_frame(id, core, reg, data);
        self.table.insert(id, Exchange::new(Frame::new(id, bytes.clone()), None, 0));
        self.link.send(&bytes)
    }

    pub fn write_register_multi(&self, addr: u16, data: &[u8]) -> ComResult<()> {
        self.require_fpga_active()?;
        validate_data_len(data.len())?;
        let (core, reg) = split_addr(addr);
        let id = self.acquire_id()?;
        let bytes = protocol::register_mwr_frame(id, core, reg, data);
        self.table.insert(id, Exchange::new(Frame::new(id, bytes.clone()), None, 0));
        self.link.send(&bytes)
    }

    pub fn write_register_aai(&self, start_addr: u32, data: &[u8]) -> ComResult<()> {
        self.require_fpga_active()?;
        validate_data_len(data.len())?;
        let (core, reg) = validate_addr(start_addr)?;
        let id = self.acquire_id()?;
        let bytes = protocol::register_awr_frame(id, core, reg, data);
        self.table.insert(id, Exchange::new(Frame::new(id, bytes.clone()), None, 0));
        self.link.send(&bytes)
    }

    pub fn read_register(&self, addr: u16) -> ComResult<u8> {
        self.require_fpga_active()?;
        let (core, reg) = split_addr(addr);
        let mut last_err = ComError::Timeout;
        for _ in 0..PARITY_RETRY_BUDGET {
            let id = self.acquire_id()?;
            let bytes = protocol::register_rd_frame(id, core, reg);
            self.table.insert(id, Exchange::new(Frame::new(id, bytes.clone()), None, 0));
            if let Err(e) = self.link.send(&bytes) {
                self.abandon_exchange(id);
                last_err = e;
                continue;
            }
            match self.table.wait_reply(id, REGISTER_READ_TIMEOUT) {
                Ok(reply) if reply.opcode == opcode::REGISTER_RDRE && reply.verify_parity() => {
                    return reply.payload().first().copied().ok_or(ComError::ProtocolViolation("empty REGISTER_RDRE payload".into()));
                }
                Ok(reply) if reply.opcode == opcode::NACK => {
                    last_err = ComError::Nack(NackCode::from(reply.payload().first().copied().unwrap_or(0)));
                }
                Ok(_) => {
                    last_err = ComError::ProtocolViolation("unexpected reply opcode for REGISTER_RD".into());
                }
                Err(e) => {
                    self.abandon_exchange(id);
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }

    pub fn read_register_multi(&self, addr: u16, n: u8) -> ComResult<Vec<u8>> {
        self.require_fpga_active()?;
        if n == 0 {
            return Err(ComError::InvalidArgument("n must be at least 1".into()));
        }
        let (core, reg) = split_addr(addr);
        let id = self.acquire_id()?;
        let bytes = protocol::register_mrd_frame(id, core, reg, n);
        self.table.insert(id, Exchange::new(Frame::new(id, bytes.clone()), None, 0));
        if let Err(e) = self.link.send(&bytes) {
            self.abandon_exchange(id);
            return Err(e);
        }
        let reply = match self.table.wait_reply(id, REGISTER_READ_TIMEOUT) {
            Ok(reply) => reply,
            Err(e) => {
                self.abandon_exchange(id);
                return Err(e);
            }
        };
        // A reply did arrive, so `FrameSeparator::route` already queued this
        // id on the completion channel; the `ExchangeHandler` will take the
        // slot and release the id once it drains that completion, same as
        // the fire-and-forget writes. Cleaning it up here too would race the
        // handler's own release of the same id.
        self.interpret_multi_reply(reply, opcode::REGISTER_MRDRE)
    }

    pub fn read_register_aai(&self, start_addr: u32, n: u8) -> ComResult<Vec<u8>> {
        self.require_fpga_active()?;
        if n == 0 {
            return Err(ComError::InvalidArgument("n must be at least 1".into()));
        }
        let (core, reg) = validate_addr(start_addr)?;
        let id = self.acquire_id()?;
        let bytes = protocol::register_ard_frame(id, core, reg, n);
        self.table.insert(id, Exchange::new(Frame::new(id, bytes.clone()), None, 0));
        if let Err(e) = self.link.send(&bytes) {
            self.abandon_exchange(id);
            return Err(e);
        }
        let reply = match self.table.wait_reply(id, REGISTER_READ_TIMEOUT) {
            Ok(reply) => reply,
            Err(e) => {
                self.abandon_exchange(id);
                return Err(e);
            }
        };
        self.interpret_multi_reply(reply, opcode::REGISTER_ARDRE)
    }

    /// Remove a synchronous exchange's table slot and release its id after an
    /// attempt that will never reach `FrameSeparator::route` (a send that
    /// never went out, or a wait that timed out). Once a reply has actually
    /// arrived the completion is already queued for the `ExchangeHandler`,
    /// which releases the id itself; calling this after that point would
    /// race the handler's own release of the same id (§4.3).
    fn abandon_exchange(&self, id: u8) {
        self.table.remove(id);
        let _ = self.ids.release(id);
    }

    fn interpret_multi_reply(&self, reply: Frame, expected_opcode: u8) -> ComResult<Vec<u8>> {
        if reply.opcode == expected_opcode && reply.verify_parity() {
            return Ok(reply.payload().to_vec());
        }
        if reply.opcode == opcode::NACK {
            return Err(ComError::Nack(NackCode::from(reply.payload().first().copied().unwrap_or(0))));
        }
        if !reply.verify_parity() {
            return Err(ComError::ParityMismatch);
        }
        Err(ComError::ProtocolViolation(format!("unexpected reply opcode 0x{:02X}", reply.opcode)))
    }

    /// Fire a `REGISTER_RD` whose reply fills slot `sequence_id` of `callback`
    /// once it arrives, without blocking the caller.
    pub fn read_register_async(&self, addr: u16, callback: SingleReadCallback, sequence_id: i32) -> ComResult<()> {
        self.require_fpga_active()?;
        let (core, reg) = split_addr(addr);
        let id = self.acquire_id()?;
        let bytes = protocol::register_rd_frame(id, core, reg);
        self.table.insert(id, Exchange::new(Frame::new(id, bytes.clone()), Some(ReadCallback::Single(callback)), sequence_id));
        self.link.send(&bytes)
    }

    /// Fire a `REGISTER_ARD` whose reply invokes `sink` once with its full
    /// payload, without blocking the caller.
    pub fn read_register_aai_async(&self, start_addr: u32, n: u8, sink: MultiReadSink) -> ComResult<()> {
        self.require_fpga_active()?;
        let (core, reg) = validate_addr(start_addr)?;
        let id = self.acquire_id()?;
        let bytes = protocol::register_ard_frame(id, core, reg, n);
        self.table.insert(id, Exchange::new(Frame::new(id, bytes.clone()), Some(ReadCallback::Multi(sink)), 0));
        self.link.send(&bytes)
    }

    // ---- 4.7.3 interrupts -------------------------------------------------

    pub fn enable_interrupts(&self) -> ComResult<()> {
        self.require_fpga_active()?;
        let id = self.acquire_id()?;
        let bytes = protocol::soc_int_en_frame(id);
        self.table.insert(id, Exchange::new(Frame::new(id, bytes.clone()), None, 0));
        if let Err(e) = self.link.send(&bytes) {
            self.abandon_exchange(id);
            return Err(e);
        }
        let reply = match self.table.wait_reply(id, MCU_SELECT_TIMEOUT) {
            Ok(reply) => reply,
            Err(e) => {
                self.abandon_exchange(id);
                return Err(e);
            }
        };
        if reply.opcode != opcode::ACK {
            return Err(ComError::ProtocolViolation("SOC_INT_EN was not acknowledged".into()));
        }
        Ok(())
    }

    pub fn add_interrupt_listener(&self, listener: Listener) {
        self.interrupts.add_listener(listener);
    }

    pub fn set_core_directory(&self, directory: Arc<dyn CoreDirectory>) {
        self.interrupts.set_directory(directory);
    }

    // ---- 4.7.4 graceful shutdown -------------------------------------------

    /// Wait up to [`CLOSE_TIMEOUT`] for pending exchanges to drain, stop the
    /// exchange-handler worker, force `MCU_ACTIVE` if needed, then close the
    /// link. Idempotent.
    pub fn close(&self) {
        let deadline = Instant::now() + CLOSE_TIMEOUT;
        while self.table.pending_count() > 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }

        if let Some(mut handler) = self.handler.lock().unwrap().take() {
            handler.stop();
        }

        if *self.state.lock().unwrap() == ChipState::FpgaActive {
            if let Err(e) = self.activate_mcu() {
                log::warn!("communicator: could not force MCU_ACTIVE during close: {}", e);
            }
        }

        self.link.close();
    }

    fn acquire_id(&self) -> ComResult<u8> {
        self.ids.acquire().ok_or_else(|| ComError::ProtocolViolation("id pool exhausted".into()))
    }

    fn require_fpga_active(&self) -> ComResult<()> {
        if *self.state.lock().unwrap() == ChipState::FpgaActive {
            Ok(())
        }
        else {
            Err(ComError::IllegalState("register access requires FPGA_ACTIVE".into()))
        }
    }
}

impl Drop for Communicator {
    fn drop(&mut self) {
        self.close();
    }
}

fn split_addr(addr: u16) -> (u8, u8) {
    ((addr >> 8) as u8, (addr & 0xFF) as u8)
}

fn validate_data_len(n: usize) -> ComResult<()> {
    if n == 0 || n > 0xFF {
        return Err(ComError::InvalidArgument(format!("data length {} out of range 1..=255", n)));
    }
    Ok(())
}

fn validate_addr(addr: u32) -> ComResult<(u8, u8)> {
    if addr > 0xFFFF {
        return Err(ComError::InvalidArgument(format!("address {:#X} exceeds the 16-bit core/register range", addr)));
    }
    Ok(split_addr(addr as u16))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_communicator_starts_mcu_active() {
        let link = SerialLink::new();
        let com = Communicator::from_link(link);
        assert_eq!(com.state(), ChipState::McuActive);
    }

    #[test]
    fn test_register_access_requires_fpga_active() {
        let link = SerialLink::new();
        let com = Communicator::from_link(link);
        let err = com.write_register(0x0100, 0xAB).unwrap_err();
        assert!(matches!(err, ComError::IllegalState(_)));
    }

    #[test]
    fn test_split_addr_separates_core_and_register() {
        assert_eq!(split_addr(0x0104), (0x01, 0x04));
    }

    #[test]
    fn test_validate_addr_rejects_out_of_range() {
        assert!(matches!(validate_addr(0x1_0000), Err(ComError::InvalidArgument(_))));
        assert!(validate_addr(0xFF00).is_ok());
    }

    #[test]
    fn test_validate_data_len_rejects_zero_and_oversize() {
        assert!(validate_data_len(0).is_err());
        assert!(validate_data_len(256).is_err());
        assert!(validate_data_len(1).is_ok());
        assert!(validate_data_len(255).is_ok());
    }
}
