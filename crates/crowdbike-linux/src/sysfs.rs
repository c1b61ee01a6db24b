//! Network interface information from sysfs.

use std::path::{Path, PathBuf};

use crate::{HardwareError, Result};

const NET_CLASS_DIR: &str = "/sys/class/net";

/// Read the hardware address of a network interface, e.g. `wlan0`.
///
/// # Errors
///
/// Returns an error if the interface does not exist.
pub fn mac_address(iface: &str) -> Result<String> {
    mac_address_in(Path::new(NET_CLASS_DIR), iface)
}

fn mac_address_in(root: &Path, iface: &str) -> Result<String> {
    let path: PathBuf = root.join(iface).join("address");
    std::fs::read_to_string(&path)
        .map(|s| s.trim().to_string())
        .map_err(|source| HardwareError::Read { path, source })
}
