// ABOUTME: Finds a usable serial port, either by explicit configuration or by
// ABOUTME: scanning attached USB serial adapters against a known vendor/product allow-list

use crate::settings::SerialSettings;
use serialport::SerialPortType;
use std::time::Duration;
use tracing::{debug, warn};

/// `(vendor id, product id)` pairs recognised as Velbus USB-to-serial
/// interfaces.
const ALLOWED_USB_IDS: &[(u16, u16)] = &[
    (0x10CF, 0x0B1B),
    (0x10CF, 0x0516),
    (0x10CF, 0x0517),
    (0x10CF, 0x0518),
];

/// Picks a port to open: if autodiscovery is enabled, scans attached USB
/// serial devices for one matching the allow-list and verifies it can be
/// opened; otherwise (or as a fallback) uses the configured port string.
pub fn find_port(settings: &SerialSettings) -> Option<String> {
    if settings.autodiscover {
        if let Some(port) = autodiscover() {
            return Some(port);
        }
    }

    if settings.port.is_empty() {
        None
    } else {
        Some(settings.port.clone())
    }
}

fn autodiscover() -> Option<String> {
    let ports = match serialport::available_ports() {
        Ok(ports) => ports,
        Err(err) => {
            warn!(%err, "couldn't enumerate serial ports");
            return None;
        }
    };

    for port in ports {
        let SerialPortType::UsbPort(info) = &port.port_type else {
            continue;
        };

        if !ALLOWED_USB_IDS.contains(&(info.vid, info.pid)) {
            continue;
        }

        debug!(port = %port.port_name, vid = info.vid, pid = info.pid, "probing candidate serial port");

        // Open-and-close to verify the port is actually accessible before
        // committing to it.
        match serialport::new(&port.port_name, super::transport::BAUD_RATE)
            .timeout(Duration::from_millis(100))
            .open()
        {
            Ok(_) => return Some(port.port_name),
            Err(err) => {
                debug!(port = %port.port_name, %err, "candidate serial port not accessible");
            }
        }
    }

    None
}
