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

    config.rs

    Host-side link configuration. Only `usb_device` is consulted by this
    crate (it narrows device discovery to a single path); the remaining
    fields round-trip through `serde` so a host application can keep its
    whole configuration file in one record without this crate parsing the
    parts that belong to its own toolchain-invocation code.
*/

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[non_exhaustive]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Pin discovery to this device path (e.g. `/dev/ttyUSB0`). `None`
    /// discovers any matching device.
    pub usb_device: Option<String>,
    /// Carried opaquely; meaningful only to the host's own HDL toolchain.
    pub xilinx_dir: Option<PathBuf>,
    /// Carried opaquely; meaningful only to the host's own HDL toolchain.
    #[serde(default)]
    pub can_sources: Vec<PathBuf>,
    #[serde(default)]
    pub build_verbose: bool,
}

impl LinkConfig {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_discovers_any_device() {
        let config = LinkConfig::new();
        assert!(config.usb_device.is_none());
    }

    #[test]
    fn test_round_trips_through_json() {
        let config = LinkConfig {
            usb_device: Some("/dev/ttyUSB0".to_string()),
            xilinx_dir: Some(PathBuf::from("/opt/xilinx")),
            can_sources: vec![PathBuf::from("core.v")],
            build_verbose: true,
        };
        let json = serde_json::to_string(&config).unwrap();
        let restored: LinkConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.usb_device, config.usb_device);
        assert_eq!(restored.can_sources, config.can_sources);
    }
}
