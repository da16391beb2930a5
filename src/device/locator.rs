//! Serial port discovery.

use tokio_serial::{SerialPortInfo, SerialPortType};
use tracing::debug;

use super::platform::PortCandidate;
use crate::error::ChannelError;

/// Enumerates the serial ports currently visible to the OS.
///
/// # Errors
///
/// Returns [`ChannelError::Open`] if the OS port list cannot be read.
pub fn discover_ports() -> Result<Vec<PortCandidate>, ChannelError> {
    let ports = tokio_serial::available_ports().map_err(|e| ChannelError::Open {
        port: "<enumerate>".to_owned(),
        reason: e.to_string(),
    })?;
    debug!(count = ports.len(), "enumerated serial ports");
    Ok(ports.into_iter().map(candidate_from_info).collect())
}

/// Converts an OS port record into a [`PortCandidate`].
///
/// USB ports contribute vendor/product ids and a description built from the
/// product and manufacturer strings.
#[must_use]
pub fn candidate_from_info(info: SerialPortInfo) -> PortCandidate {
    match info.port_type {
        SerialPortType::UsbPort(usb) => {
            let description = [usb.product, usb.manufacturer]
                .into_iter()
                .flatten()
                .collect::<Vec<_>>()
                .join(" - ");
            PortCandidate::new(info.port_name, description).with_usb(usb.vid, usb.pid)
        }
        SerialPortType::PciPort => PortCandidate::new(info.port_name, "PCI serial port"),
        SerialPortType::BluetoothPort => PortCandidate::new(info.port_name, "Bluetooth serial port"),
        SerialPortType::Unknown => PortCandidate::new(info.port_name, ""),
    }
}
