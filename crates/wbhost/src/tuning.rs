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

    tuning.rs

    Timing constants (§6.2, §6.3). Collected in one place so the retry and
    timeout policy throughout the stack can be audited at a glance.
*/

use std::time::Duration;

pub const BAUD_RATE: u32 = 3_000_000;

pub const DETECT_REPLY_TIMEOUT: Duration = Duration::from_millis(200);
pub const SEND_DETECT_TIMEOUT: Duration = Duration::from_millis(500);
pub const MCU_SELECT_TIMEOUT: Duration = Duration::from_millis(500);
pub const STATUS_READ_TIMEOUT: Duration = Duration::from_millis(300);
pub const SECTOR_WRITE_TIMEOUT: Duration = Duration::from_millis(500);
pub const SERIAL_READ_TIMEOUT: Duration = Duration::from_millis(200);
pub const CONFIGURE_POLL_INTERVAL: Duration = Duration::from_millis(200);
pub const CONFIGURE_TOTAL_BUDGET: Duration = Duration::from_millis(10_000);
pub const REGISTER_READ_TIMEOUT: Duration = Duration::from_millis(500);
pub const CLOSE_TIMEOUT: Duration = Duration::from_millis(3_000);
pub const PARITY_RETRY_BUDGET: u32 = 5;
