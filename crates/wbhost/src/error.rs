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

    error.rs

    Error taxonomy for the host communication stack.
*/

use core::fmt::Display;
use std::error::Error;

/// Decoded NACK error-code byte (§6.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NackCode {
    OpcodeUnknown,
    Parity,
    WishboneTimeout,
    DataLength,
    Unknown(u8),
}

impl From<u8> for NackCode {
    fn from(byte: u8) -> Self {
        match byte {
            0x11 => NackCode::OpcodeUnknown,
            0x22 => NackCode::Parity,
            0x33 => NackCode::WishboneTimeout,
            0x44 => NackCode::DataLength,
            other => NackCode::Unknown(other),
        }
    }
}

impl Display for NackCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NackCode::OpcodeUnknown => write!(f, "opcode unknown"),
            NackCode::Parity => write!(f, "parity error"),
            NackCode::WishboneTimeout => write!(f, "wishbone timeout"),
            NackCode::DataLength => write!(f, "data length error"),
            NackCode::Unknown(b) => write!(f, "unknown error code 0x{:02X}", b),
        }
    }
}

/// The sole public error type for the communication stack (§7).
#[derive(Debug)]
pub enum ComError {
    Transport(String),
    Timeout,
    ParityMismatch,
    Nack(NackCode),
    ProtocolViolation(String),
    CurrentlyConfiguring,
    InvalidArgument(String),
    IllegalState(String),
    ConfigurationFailed(String),
    UploadFailed(String),
    AlreadyReplied,
}

impl Error for ComError {}

impl Display for ComError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ComError::Transport(msg) => write!(f, "transport failure: {}", msg),
            ComError::Timeout => write!(f, "operation timed out"),
            ComError::ParityMismatch => write!(f, "reply parity mismatch"),
            ComError::Nack(code) => write!(f, "device returned NACK: {}", code),
            ComError::ProtocolViolation(msg) => write!(f, "protocol violation: {}", msg),
            ComError::CurrentlyConfiguring => write!(f, "device is currently configuring"),
            ComError::InvalidArgument(msg) => write!(f, "invalid argument: {}", msg),
            ComError::IllegalState(msg) => write!(f, "illegal state: {}", msg),
            ComError::ConfigurationFailed(msg) => write!(f, "fpga configuration failed: {}", msg),
            ComError::UploadFailed(msg) => write!(f, "upload failed: {}", msg),
            ComError::AlreadyReplied => write!(f, "exchange already has a reply"),
        }
    }
}

impl From<anyhow::Error> for ComError {
    fn from(e: anyhow::Error) -> Self {
        ComError::Transport(e.to_string())
    }
}

pub type ComResult<T> = Result<T, ComError>;
