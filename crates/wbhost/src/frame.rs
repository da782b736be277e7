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

    frame.rs

    Immutable wire frame with self-verifying parity/checksum trailer.
*/

use crate::protocol::{adler32, carries_id, opcode, xor_parity};

/// An assembled wire-level message. `id` is `0` for frames that do not carry
/// a request id (DETECT, SOC_INT, SECTOR_WR, ...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub opcode: u8,
    pub id: u8,
    pub bytes: Vec<u8>,
}

impl Frame {
    /// Wrap raw wire bytes (opcode through trailer, inclusive) into a `Frame`.
    /// `id` is the frame id if this opcode carries one, else `0`.
    pub fn new(id: u8, bytes: Vec<u8>) -> Self {
        let opcode = bytes.first().copied().unwrap_or(0);
        Frame { opcode, id, bytes }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Verify this frame's trailer against the protocol rule for its opcode
    /// (§8 invariant 1): XOR parity for every opcode except SECTOR_WR, which
    /// trails with an Adler-32 of (sector address ‖ sector data).
    pub fn verify_parity(&self) -> bool {
        if self.bytes.len() < 2 {
            return false;
        }
        if self.opcode == opcode::SECTOR_WR {
            let body_end = self.bytes.len() - 4;
            let checksum = adler32(&self.bytes[1..body_end]);
            let trailer = u32::from_le_bytes(self.bytes[body_end..].try_into().unwrap());
            checksum == trailer
        }
        else {
            let body_end = self.bytes.len() - 1;
            xor_parity(&self.bytes[..body_end]) == self.bytes[body_end]
        }
    }

    /// The frame's data payload, stripped of the opcode byte, the id byte
    /// (when this opcode carries one on the wire), and the trailer. Meaning
    /// beyond that is opcode-specific; callers index into it per §6.1.
    pub fn payload(&self) -> &[u8] {
        let end = if self.opcode == opcode::SECTOR_WR {
            self.bytes.len().saturating_sub(4)
        }
        else {
            self.bytes.len().saturating_sub(1)
        };
        let start = if carries_id(self.opcode) { 2 } else { 1 };
        &self.bytes[start.min(end)..end]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol;

    #[test]
    fn test_verify_parity_ack() {
        let frame = Frame::new(0x42, vec![0x00, 0x42, 0x42]);
        assert!(frame.verify_parity());
    }

    #[test]
    fn test_verify_parity_rejects_corrupt_frame() {
        let frame = Frame::new(0x42, vec![0x00, 0x42, 0x41]);
        assert!(!frame.verify_parity());
    }

    #[test]
    fn test_verify_parity_sector_wr_uses_adler32() {
        let data = vec![0x5Au8; protocol::SECTOR_SIZE];
        let bytes = protocol::sector_wr_frame(3, &data);
        let frame = Frame::new(0, bytes);
        assert!(frame.verify_parity());
    }
}
