//! Raspberry Pi boot configuration and device node checks.

use std::path::{Path, PathBuf};

/// Locations of `config.txt`, newest OS layout first.
const BOOT_CONFIG_CANDIDATES: &[&str] = &["/boot/firmware/config.txt", "/boot/config.txt"];

/// Find the boot configuration file, if any.
#[must_use]
pub fn boot_config_path() -> Option<PathBuf> {
    BOOT_CONFIG_CANDIDATES
        .iter()
        .map(PathBuf::from)
        .find(|p| p.is_file())
}

/// Check whether `config.txt` contents enable the primary UART.
///
/// Only an uncommented `enable_uart=1` counts. Section filters such as
/// `[pi4]` are ignored.
#[must_use]
pub fn uart_enabled(config_text: &str) -> bool {
    config_text
        .lines()
        .map(str::trim)
        .filter(|line| !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .any(|(key, value)| key.trim() == "enable_uart" && value.trim() == "1")
}

/// Check whether a device node exists, e.g. `/dev/serial0`.
#[must_use]
pub fn device_present(path: impl AsRef<Path>) -> bool {
    path.as_ref().exists()
}
