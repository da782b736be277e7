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

    device_detector.rs

    Finds and identifies candidate evaluation boards among the host's serial
    ports (§4.6). Talks to each candidate synchronously: the FrameSeparator
    is never involved here, since detection always happens before a
    Communicator has decided which chip is active.
*/

use crate::config::LinkConfig;
use crate::error::{ComError, ComResult};
use crate::progress::{ProgressEvent, ProgressSource};
use crate::protocol::{self, detect_id, len, opcode};
use crate::serial_link::SerialLink;
use crate::tuning::{CONFIGURE_POLL_INTERVAL, CONFIGURE_TOTAL_BUDGET, DETECT_REPLY_TIMEOUT, PARITY_RETRY_BUDGET, SERIAL_READ_TIMEOUT};
use lazy_static::lazy_static;
use regex::Regex;
use std::time::Instant;

lazy_static! {
    static ref PORT_NAME_RE: Regex = Regex::new(r"(ttyUSB\d+)|(COM\d+)").unwrap();
}

/// An evaluation board that answered `DETECT` and was left in `MCU_ACTIVE`
/// mode, link open and ready for a `Communicator` to take over.
pub struct DetectedDevice {
    pub path: String,
    pub serial: u32,
    pub link: SerialLink,
}

pub struct DeviceDetector {
    progress: ProgressSource,
}

impl DeviceDetector {
    pub fn new() -> Self {
        DeviceDetector { progress: ProgressSource::new() }
    }

    pub fn progress(&self) -> ProgressSource {
        self.progress.clone()
    }

    /// List candidate serial port names on this host, filtered by the
    /// `(ttyUSB\d+)|(COM\d+)` pattern.
    pub fn candidate_ports() -> ComResult<Vec<String>> {
        let ports = serialport::available_ports().map_err(|e| ComError::Transport(e.to_string()))?;
        Ok(ports
            .into_iter()
            .map(|p| p.port_name)
            .filter(|name| PORT_NAME_RE.is_match(name))
            .collect())
    }

    /// Probe every candidate port and return the first board found, honoring
    /// `config.usb_device` if set.
    pub fn discover_any(&self, config: &LinkConfig) -> ComResult<DetectedDevice> {
        for path in self.candidates(config)? {
            match self.probe(&path) {
                Ok(device) => return Ok(device),
                Err(e) => {
                    log::debug!("device_detector: {} did not answer: {}", path, e);
                    self.progress.emit(ProgressEvent::PortSkipped { path });
                }
            }
        }
        Err(ComError::Transport("no responding device found".into()))
    }

    /// Probe every candidate port and return the one whose serial number
    /// matches `serial`.
    pub fn discover_serial(&self, config: &LinkConfig, serial: u32) -> ComResult<DetectedDevice> {
        for path in self.candidates(config)? {
            match self.probe(&path) {
                Ok(device) if device.serial == serial => return Ok(device),
                Ok(_) => {}
                Err(e) => log::debug!("device_detector: {} did not answer: {}", path, e),
            }
        }
        Err(ComError::Transport(format!("no device with serial {:08X} found", serial)))
    }

    fn candidates(&self, config: &LinkConfig) -> ComResult<Vec<String>> {
        match &config.usb_device {
            Some(path) => Ok(vec![path.clone()]),
            None => Self::candidate_ports(),
        }
    }

    /// Open `path`, send `DETECT`, and drive the board to `MCU_ACTIVE`,
    /// retrying parity failures and waiting out mid-configuration boards.
    fn probe(&self, path: &str) -> ComResult<DetectedDevice> {
        let link = SerialLink::new();
        link.open(path)?;

        let deadline = Instant::now() + CONFIGURE_TOTAL_BUDGET;
        loop {
            let ic_id = self.detect_once(&link)?;
            match ic_id {
                detect_id::MCU_ACTIVE => break,
                detect_id::FPGA_ACTIVE => {
                    self.reclaim_mcu(&link)?;
                    break;
                }
                detect_id::MCU_CONFIGURING => {
                    if Instant::now() >= deadline {
                        return Err(ComError::CurrentlyConfiguring);
                    }
                    self.progress.emit(ProgressEvent::AwaitingConfiguration { path: path.to_string() });
                    std::thread::sleep(CONFIGURE_POLL_INTERVAL);
                }
                other => return Err(ComError::ProtocolViolation(format!("unrecognized DETECT_RE id 0x{:02X}", other))),
            }
        }

        let serial = self.read_serial(&link)?;
        Ok(DetectedDevice { path: path.to_string(), serial, link })
    }

    /// Send `DETECT` and return the decoded `ic_id` byte, retrying up to
    /// [`PARITY_RETRY_BUDGET`] times on a parity mismatch.
    fn detect_once(&self, link: &SerialLink) -> ComResult<u8> {
        for attempt in 0..PARITY_RETRY_BUDGET {
            link.send(&protocol::detect_frame())?;
            let bytes = link.receive_timeout(len::DETECT_RE, DETECT_REPLY_TIMEOUT)?;
            if bytes[0] != opcode::DETECT_RE {
                return Err(ComError::ProtocolViolation(format!("expected DETECT_RE, got opcode 0x{:02X}", bytes[0])));
            }
            if protocol::xor_parity(&bytes[..bytes.len() - 1]) != bytes[bytes.len() - 1] {
                log::warn!("device_detector: DETECT_RE parity mismatch, attempt {}/{}", attempt + 1, PARITY_RETRY_BUDGET);
                continue;
            }
            return Ok(bytes[1]);
        }
        Err(ComError::ParityMismatch)
    }

    /// The board answered FPGA-active; force it back to MCU mode with a
    /// nonce id so detection can proceed uniformly.
    fn reclaim_mcu(&self, link: &SerialLink) -> ComResult<()> {
        const NONCE_ID: u8 = 0x7B;
        for attempt in 0..PARITY_RETRY_BUDGET {
            link.send(&protocol::mcu_sel_frame(NONCE_ID))?;
            let bytes = link.receive_timeout(len::ACK, DETECT_REPLY_TIMEOUT)?;
            if bytes[0] == opcode::ACK && bytes[1] == NONCE_ID && protocol::xor_parity(&bytes[..2]) == bytes[2] {
                return Ok(());
            }
            log::warn!("device_detector: MCU_SEL reclaim attempt {}/{} was not acknowledged", attempt + 1, PARITY_RETRY_BUDGET);
        }
        Err(ComError::ProtocolViolation("device did not relinquish FPGA mode".into()))
    }

    fn read_serial(&self, link: &SerialLink) -> ComResult<u32> {
        link.send(&protocol::serial_rd_frame())?;
        let bytes = link.receive_timeout(len::SERIAL_RDRE, SERIAL_READ_TIMEOUT)?;
        if bytes[0] != opcode::SERIAL_RDRE {
            return Err(ComError::ProtocolViolation(format!("expected SERIAL_RDRE, got opcode 0x{:02X}", bytes[0])));
        }
        Ok(u32::from_le_bytes(bytes[1..5].try_into().unwrap()))
    }
}

impl Default for DeviceDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_regex_matches_expected_names() {
        assert!(PORT_NAME_RE.is_match("/dev/ttyUSB0"));
        assert!(PORT_NAME_RE.is_match("COM3"));
        assert!(!PORT_NAME_RE.is_match("/dev/ttyS0"));
    }

    #[test]
    fn test_candidates_honors_pinned_usb_device() {
        let detector = DeviceDetector::new();
        let config = LinkConfig { usb_device: Some("/dev/ttyUSB7".to_string()), ..Default::default() };
        assert_eq!(detector.candidates(&config).unwrap(), vec!["/dev/ttyUSB7".to_string()]);
    }
}
