//! Setup checks for a logger rig.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use tokio::net::TcpStream;

use crate::config::{Config, GpsSourceKind};

/// How long the gpsd check may take.
const GPSD_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Outcome of one check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Check {
    /// What was checked.
    pub name: String,
    /// Whether it passed.
    pub ok: bool,
    /// What was found.
    pub detail: String,
    /// How to fix a failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl Check {
    fn pass(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ok: true,
            detail: detail.into(),
            hint: None,
        }
    }

    fn fail(name: impl Into<String>, detail: impl Into<String>, hint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ok: false,
            detail: detail.into(),
            hint: Some(hint.into()),
        }
    }
}

impl fmt::Display for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.ok { "ok" } else { "FAILED" };
        write!(f, "[{status:>6}] {}: {}", self.name, self.detail)?;
        if let Some(hint) = &self.hint {
            write!(f, "\n         hint: {hint}")?;
        }
        Ok(())
    }
}

/// Run every check that applies to `config`.
pub async fn run_checks(config: &Config) -> Vec<Check> {
    let mut checks = platform_checks(config);

    if config.gps.source == GpsSourceKind::Gpsd {
        checks.push(check_gpsd(&config.gpsd_address()).await);
    }
    checks.push(check_log_dir(config));

    checks
}

/// Whether a gpsd daemon accepts connections at `address`.
pub async fn check_gpsd(address: &str) -> Check {
    let name = "gpsd";
    match tokio::time::timeout(GPSD_PROBE_TIMEOUT, TcpStream::connect(address)).await {
        Ok(Ok(_)) => Check::pass(name, format!("listening on {address}")),
        Ok(Err(e)) => Check::fail(
            name,
            format!("cannot connect to {address}: {e}"),
            "install gpsd and point it at the receiver, e.g. DEVICES=\"/dev/serial0\" in /etc/default/gpsd",
        ),
        Err(_) => Check::fail(
            name,
            format!("no answer from {address} within {GPSD_PROBE_TIMEOUT:?}"),
            "check that gpsd is running: systemctl status gpsd",
        ),
    }
}

fn check_log_dir(config: &Config) -> Check {
    let name = "log directory";
    let dir = config.logfile_dir();
    match std::fs::create_dir_all(&dir) {
        Ok(()) => Check::pass(name, format!("{} is writable", dir.display())),
        Err(e) => Check::fail(
            name,
            format!("cannot create {}: {e}", dir.display()),
            "set user.logfile_path to a writable directory",
        ),
    }
}

#[cfg(target_os = "linux")]
fn platform_checks(config: &Config) -> Vec<Check> {
    use crowdbike_linux::{boot_config_path, gpio_available, mac_address, uart_enabled};

    let mut checks = Vec::new();

    checks.push(match boot_config_path() {
        Some(path) => match std::fs::read_to_string(&path) {
            Ok(text) if uart_enabled(&text) => {
                Check::pass("uart", format!("enable_uart=1 in {}", path.display()))
            }
            Ok(_) => Check::fail(
                "uart",
                format!("enable_uart=1 missing from {}", path.display()),
                "add enable_uart=1 to the boot config and reboot",
            ),
            Err(e) => Check::fail(
                "uart",
                format!("cannot read {}: {e}", path.display()),
                "run as a user that can read the boot config",
            ),
        },
        None => Check::fail(
            "uart",
            "no boot config found",
            "expected /boot/firmware/config.txt or /boot/config.txt on a Raspberry Pi",
        ),
    });

    checks.push(if gpio_available() {
        Check::pass(
            "gpio",
            format!("GPIO accessible, DHT22 on BCM {}", config.dht22.gpio_pin),
        )
    } else {
        Check::fail(
            "gpio",
            "cannot open the GPIO controller",
            "add the user to the gpio group",
        )
    });

    if config.gps.source == GpsSourceKind::Nmea {
        checks.push(device_check("gps serial", &config.gps.serial_device));
    }
    if config.pm_sensor.enabled {
        checks.push(device_check("pm sensor", &config.pm_sensor.device));
    }

    let iface = &config.user.network_interface;
    checks.push(match mac_address(iface) {
        Ok(mac) => Check::pass("mac", format!("{iface} is {mac}")),
        Err(e) => Check::fail(
            "mac",
            e.to_string(),
            "set user.network_interface to an existing interface",
        ),
    });

    checks
}

#[cfg(target_os = "linux")]
fn device_check(name: &str, device: &str) -> Check {
    if crowdbike_linux::device_present(device) {
        Check::pass(name, format!("{device} present"))
    } else {
        Check::fail(name, format!("{device} not found"), "check the cable and udev rules")
    }
}

#[cfg(not(target_os = "linux"))]
fn platform_checks(_config: &Config) -> Vec<Check> {
    vec![Check::fail(
        "platform",
        format!("{} is not supported for sensor access", std::env::consts::OS),
        "run crowdbike on a Raspberry Pi running Linux",
    )]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_display() {
        let ok = Check::pass("gpsd", "listening");
        assert_eq!(ok.to_string(), "[    ok] gpsd: listening");

        let failed = Check::fail("uart", "missing", "add it");
        let text = failed.to_string();
        assert!(text.starts_with("[FAILED] uart: missing"));
        assert!(text.contains("hint: add it"));
    }

    #[test]
    fn test_check_serialization_skips_empty_hint() {
        let json = serde_json::to_string(&Check::pass("gpio", "fine")).unwrap();
        assert!(!json.contains("hint"));
    }

    #[tokio::test]
    async fn test_check_gpsd_reachable() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let check = check_gpsd(&address).await;
        assert!(check.ok, "{check}");
    }

    #[tokio::test]
    async fn test_check_gpsd_unreachable() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let check = check_gpsd(&address).await;
        assert!(!check.ok);
        assert!(check.hint.is_some());
    }

    #[tokio::test]
    async fn test_run_checks_includes_log_dir() {
        let mut config = Config::default();
        config.user.logfile_path = Some(std::env::temp_dir().join(format!(
            "crowdbike_doctor_{}",
            std::process::id()
        )));
        config.gps.gpsd_port = 1;

        let checks = run_checks(&config).await;
        assert!(checks.iter().any(|c| c.name == "log directory" && c.ok));
        assert!(checks.iter().any(|c| c.name == "gpsd" && !c.ok));

        if let Some(dir) = &config.user.logfile_path {
            let _ = std::fs::remove_dir_all(dir);
        }
    }
}
