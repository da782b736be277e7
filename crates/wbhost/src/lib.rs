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

    wbhost

    Host-side communication stack for USB-serial FPGA evaluation boards.

    A board exposes two chips on one serial line: an MCU that answers while
    the FPGA/SoC core is unconfigured (detection, flash upload, chip
    selection) and the FPGA/SoC core itself once configured (register
    access, interrupts). [`Communicator`] is the façade most callers want:
    it owns the chip-select state machine, matches replies to requests
    through an id-keyed exchange table, and dispatches interrupts to
    registered listeners.

    Typical use:
    ```no_run
    use wbhost::{Communicator, DeviceDetector, LinkConfig};

    let detector = DeviceDetector::new();
    let device = detector.discover_any(&LinkConfig::new())?;
    let com = Communicator::from_link(device.link);
    com.activate_fpga()?;
    com.write_register(0x0104, 0xAB)?;
    let value = com.read_register(0x0104)?;
    # Ok::<(), wbhost::ComError>(())
    ```
*/

pub mod callback;
pub mod communicator;
pub mod config;
pub mod device_detector;
pub mod error;
pub mod exchange;
pub mod exchange_handler;
pub mod fpga_binary;
pub mod frame;
pub mod frame_separator;
pub mod id_pool;
pub mod interrupt;
pub mod progress;
pub mod protocol;
pub mod recv_buffer;
pub mod serial_link;
pub mod tuning;

pub use callback::{MultiReadSink, ReadCallback, SingleReadCallback};
pub use communicator::{ChipState, Communicator};
pub use config::LinkConfig;
pub use device_detector::{DetectedDevice, DeviceDetector};
pub use error::{ComError, ComResult, NackCode};
pub use fpga_binary::FpgaBinary;
pub use interrupt::{CoreDirectory, InterruptEvent, Listener, UnnamedCores};
pub use progress::{ProgressEvent, ProgressListener, ProgressSource};
pub use serial_link::SerialLink;
