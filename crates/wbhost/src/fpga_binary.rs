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

    fpga_binary.rs

    Uploads an FPGA configuration image to the board's flash while the MCU
    owns the serial line (§4.8). Every exchange here is synchronous: the
    FrameSeparator plays no part, exactly like `DeviceDetector`'s probing.
*/

use crate::error::{ComError, ComResult, NackCode};
use crate::frame::Frame;
use crate::progress::{ProgressEvent, ProgressSource};
use crate::protocol::{self, len, opcode, status_flags, SECTOR_SIZE};
use crate::serial_link::SerialLink;
use crate::tuning::{PARITY_RETRY_BUDGET, SECTOR_WRITE_TIMEOUT, SEND_DETECT_TIMEOUT, STATUS_READ_TIMEOUT};
use std::path::Path;

/// An FPGA configuration image held in memory, ready to be split into
/// [`SECTOR_SIZE`] sectors and written to the device's flash.
pub struct FpgaBinary {
    bytes: Vec<u8>,
}

impl FpgaBinary {
    pub fn load(path: &Path) -> ComResult<Self> {
        let bytes = std::fs::read(path).map_err(|e| ComError::Transport(format!("reading {}: {}", path.display(), e)))?;
        Ok(FpgaBinary { bytes })
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        FpgaBinary { bytes }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn hash(&self) -> u32 {
        protocol::adler32(&self.bytes)
    }

    pub fn sector_count(&self) -> usize {
        self.bytes.len().div_ceil(SECTOR_SIZE)
    }

    /// Sector `index`, zero-padded to [`SECTOR_SIZE`] if it runs past the end
    /// of the image.
    fn sector(&self, index: usize) -> Vec<u8> {
        let start = index * SECTOR_SIZE;
        let end = (start + SECTOR_SIZE).min(self.bytes.len());
        let mut sector = vec![0u8; SECTOR_SIZE];
        sector[..end - start].copy_from_slice(&self.bytes[start..end]);
        sector
    }

    /// Upload this binary over `link` if the device does not already hold a
    /// matching one, then trigger configuration. `link` must already be open
    /// with the MCU active.
    pub fn upload(&self, link: &SerialLink, progress: &ProgressSource) -> ComResult<()> {
        if self.sector_count() > protocol::SECTOR_COUNT {
            return Err(ComError::InvalidArgument(format!(
                "binary needs {} sectors, device only holds {}",
                self.sector_count(),
                protocol::SECTOR_COUNT
            )));
        }
        if self.device_already_matches(link)? {
            progress.emit(ProgressEvent::BinaryAlreadyPresent);
        }
        else {
            self.write_all_sectors(link, progress)?;
            self.finalize_status(link)?;
        }
        self.trigger_configuration(link)?;
        progress.emit(ProgressEvent::ConfigurationComplete);
        Ok(())
    }

    fn device_already_matches(&self, link: &SerialLink) -> ComResult<bool> {
        link.send(&protocol::status_rd_frame())?;
        let bytes = link.receive_timeout(len::STATUS_RDRE, STATUS_READ_TIMEOUT)?;
        if bytes[0] != opcode::STATUS_RDRE {
            return Err(ComError::ProtocolViolation(format!("expected STATUS_RDRE, got opcode 0x{:02X}", bytes[0])));
        }
        let frame = Frame::new(0, bytes);
        if !frame.verify_parity() {
            return Err(ComError::ParityMismatch);
        }
        let status = protocol::parse_status_payload(frame.payload())
            .ok_or_else(|| ComError::ProtocolViolation("short STATUS_RDRE payload".into()))?;
        Ok(status.soc_uploaded() && status.size == self.bytes.len() as u32 && status.hash == self.hash())
    }

    /// Write every sector, retrying the whole upload from sector zero after
    /// a link reset if any single sector's ACK times out.
    fn write_all_sectors(&self, link: &SerialLink, progress: &ProgressSource) -> ComResult<()> {
        let total = self.sector_count();
        for attempt in 0..PARITY_RETRY_BUDGET {
            match self.try_write_all_sectors(link, progress, total) {
                Ok(()) => return Ok(()),
                Err(ComError::Timeout) => {
                    log::warn!(
                        "fpga_binary: sector write stalled, resetting link and restarting upload (attempt {}/{})",
                        attempt + 1,
                        PARITY_RETRY_BUDGET
                    );
                    link.reset()?;
                }
                Err(e) => return Err(e),
            }
        }
        Err(ComError::UploadFailed("sector upload did not complete within the retry budget".into()))
    }

    fn try_write_all_sectors(&self, link: &SerialLink, progress: &ProgressSource, total: usize) -> ComResult<()> {
        for index in 0..total {
            let sector = self.sector(index);
            let frame = protocol::sector_wr_frame(index as u16, &sector);
            link.send(&frame)?;
            let reply = link.receive_timeout(len::ACK, SECTOR_WRITE_TIMEOUT)?;
            if reply[0] != opcode::ACK {
                return Err(ComError::UploadFailed(format!("sector {} was not acknowledged (opcode 0x{:02X})", index, reply[0])));
            }
            let percent = (((index + 1) * 100) / total) as u8;
            progress.emit(ProgressEvent::SectorWritten { sector: index as u16, percent });
        }
        Ok(())
    }

    /// Write the post-upload `STATUS_WR` and confirm it stuck, retrying the
    /// whole exchange (with a link reset on a stalled reply, same as
    /// [`write_all_sectors`](Self::write_all_sectors)) rather than letting a
    /// single timed-out or parity-mangled reply fail the entire upload.
    fn finalize_status(&self, link: &SerialLink) -> ComResult<()> {
        for attempt in 0..PARITY_RETRY_BUDGET {
            match self.try_finalize_status(link) {
                Ok(()) => return Ok(()),
                Err(ComError::Timeout) => {
                    log::warn!(
                        "fpga_binary: STATUS_WR stalled, resetting link and retrying (attempt {}/{})",
                        attempt + 1,
                        PARITY_RETRY_BUDGET
                    );
                    link.reset()?;
                }
                Err(ComError::ParityMismatch) => {
                    log::warn!(
                        "fpga_binary: status re-read came back with a parity mismatch, retrying (attempt {}/{})",
                        attempt + 1,
                        PARITY_RETRY_BUDGET
                    );
                }
                Err(e) => return Err(e),
            }
        }
        Err(ComError::UploadFailed("STATUS_WR did not complete within the retry budget".into()))
    }

    fn try_finalize_status(&self, link: &SerialLink) -> ComResult<()> {
        let frame = protocol::status_wr_frame(status_flags::SOC_UPLOADED, 0, self.bytes.len() as u32, self.hash());
        link.send(&frame)?;
        let reply = link.receive_timeout(len::ACK, STATUS_READ_TIMEOUT)?;
        if reply[0] != opcode::ACK {
            return Err(ComError::UploadFailed(format!("STATUS_WR was not acknowledged (opcode 0x{:02X})", reply[0])));
        }
        if !self.device_already_matches(link)? {
            return Err(ComError::UploadFailed("device status did not reflect the uploaded binary after STATUS_WR".into()));
        }
        Ok(())
    }

    fn trigger_configuration(&self, link: &SerialLink) -> ComResult<()> {
        link.send(&protocol::conf_fpga_frame())?;
        let head = link.receive_timeout(1, SEND_DETECT_TIMEOUT)?;
        match head[0] {
            opcode::ACK => {
                let _ = link.receive_timeout(len::ACK - 1, SEND_DETECT_TIMEOUT)?;
                Ok(())
            }
            opcode::NACK => {
                let rest = link.receive_timeout(len::NACK - 1, SEND_DETECT_TIMEOUT)?;
                let code = NackCode::from(rest.get(1).copied().unwrap_or(0));
                Err(ComError::ConfigurationFailed(format!("device rejected CONF_FPGA: {}", code)))
            }
            other => Err(ComError::ConfigurationFailed(format!("unexpected reply to CONF_FPGA: opcode 0x{:02X}", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_adler32_of_image_bytes() {
        let image = FpgaBinary::from_bytes(b"Wikipedia".to_vec());
        assert_eq!(image.hash(), 0x11E60398);
    }

    #[test]
    fn test_sector_count_rounds_up() {
        let image = FpgaBinary::from_bytes(vec![0u8; SECTOR_SIZE + 1]);
        assert_eq!(image.sector_count(), 2);
    }

    #[test]
    fn test_tail_sector_is_zero_padded() {
        let image = FpgaBinary::from_bytes(vec![0xABu8; SECTOR_SIZE + 10]);
        let tail = image.sector(1);
        assert_eq!(tail.len(), SECTOR_SIZE);
        assert!(tail[..10].iter().all(|&b| b == 0xAB));
        assert!(tail[10..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_upload_rejects_binary_too_large_for_the_device() {
        let link = SerialLink::new();
        let progress = ProgressSource::new();
        let image = FpgaBinary::from_bytes(vec![0u8; (protocol::SECTOR_COUNT + 1) * SECTOR_SIZE]);
        let err = image.upload(&link, &progress).unwrap_err();
        assert!(matches!(err, ComError::InvalidArgument(_)));
    }

    #[test]
    fn test_exact_multiple_has_no_partial_sector() {
        let image = FpgaBinary::from_bytes(vec![0x11u8; SECTOR_SIZE * 2]);
        assert_eq!(image.sector_count(), 2);
        assert!(image.sector(1).iter().all(|&b| b == 0x11));
    }
}
