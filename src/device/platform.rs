//! Microcontroller platform classification.
//!
//! A discovered port is matched against a fixed vendor-id / description
//! table. The first matching row wins.

use std::fmt;

use serde::Serialize;

/// Silicon Labs CP210x bridge (most ESP32 dev boards).
pub const VID_SILABS: u16 = 0x10C4;
/// Raspberry Pi (RP2040 Pico).
pub const VID_RASPBERRY_PI: u16 = 0x2E8A;
/// Arduino LLC.
pub const VID_ARDUINO: u16 = 0x2341;
/// Arduino SRL.
pub const VID_ARDUINO_SRL: u16 = 0x2A03;
/// STMicroelectronics.
pub const VID_STMICRO: u16 = 0x0483;

/// Platform label recorded for a connected device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Platform {
    /// Espressif ESP32 behind a CP210x bridge.
    Esp32,
    /// Raspberry Pi Pico.
    Pico,
    /// Arduino boards.
    Arduino,
    /// STM32 boards.
    Stm32,
    /// Connected by explicit port name, classification bypassed.
    Manual,
    /// Not recognised; skipped by auto-detection.
    Unknown,
}

impl Platform {
    /// Returns the upper-case label used in logs and events.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Esp32 => "ESP32",
            Self::Pico => "PICO",
            Self::Arduino => "ARDUINO",
            Self::Stm32 => "STM32",
            Self::Manual => "MANUAL",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A serial port offered for connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortCandidate {
    /// OS port name (`/dev/ttyUSB0`, `COM3`).
    pub name: String,
    /// USB vendor id, when the port is USB.
    pub vid: Option<u16>,
    /// USB product id, when the port is USB.
    pub pid: Option<u16>,
    /// Human-readable description (product / manufacturer strings).
    pub description: String,
}

impl PortCandidate {
    /// Creates a candidate with no USB identity.
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            vid: None,
            pid: None,
            description: description.into(),
        }
    }

    /// Returns a copy with USB vendor and product ids.
    #[must_use]
    pub const fn with_usb(mut self, vid: u16, pid: u16) -> Self {
        self.vid = Some(vid);
        self.pid = Some(pid);
        self
    }
}

/// Classifies a port by vendor id or description substring.
///
/// | Platform | Vendor id | Description contains |
/// |----------|-----------|----------------------|
/// | `ESP32` | `0x10C4` | `CP210` |
/// | `PICO` | `0x2E8A` | `Pico` |
/// | `ARDUINO` | `0x2341`, `0x2A03` | `Arduino` |
/// | `STM32` | `0x0483` | `STM32` |
#[must_use]
pub fn classify(port: &PortCandidate) -> Platform {
    let vid = port.vid;
    let desc = port.description.as_str();

    if vid == Some(VID_SILABS) || desc.contains("CP210") {
        Platform::Esp32
    } else if vid == Some(VID_RASPBERRY_PI) || desc.contains("Pico") {
        Platform::Pico
    } else if matches!(vid, Some(VID_ARDUINO | VID_ARDUINO_SRL)) || desc.contains("Arduino") {
        Platform::Arduino
    } else if vid == Some(VID_STMICRO) || desc.contains("STM32") {
        Platform::Stm32
    } else {
        Platform::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_by_vendor_id() {
        let cases = [
            (VID_SILABS, Platform::Esp32),
            (VID_RASPBERRY_PI, Platform::Pico),
            (VID_ARDUINO, Platform::Arduino),
            (VID_ARDUINO_SRL, Platform::Arduino),
            (VID_STMICRO, Platform::Stm32),
        ];
        for (vid, expected) in cases {
            let port = PortCandidate::new("/dev/ttyACM0", "").with_usb(vid, 0x0001);
            assert_eq!(classify(&port), expected, "vid {vid:#06x}");
        }
    }

    #[test]
    fn classifies_by_description() {
        let cases = [
            ("CP2102 USB to UART Bridge Controller", Platform::Esp32),
            ("Raspberry Pi Pico", Platform::Pico),
            ("Arduino Uno", Platform::Arduino),
            ("STM32 Virtual ComPort", Platform::Stm32),
            ("USB2.0-Serial", Platform::Unknown),
        ];
        for (desc, expected) in cases {
            assert_eq!(classify(&PortCandidate::new("COM3", desc)), expected, "{desc}");
        }
    }

    #[test]
    fn description_match_is_case_sensitive() {
        assert_eq!(
            classify(&PortCandidate::new("COM3", "arduino clone")),
            Platform::Unknown
        );
    }

    #[test]
    fn first_matching_row_wins() {
        // Vendor id says Pico, description says Arduino: ESP32/Pico rows come first.
        let port = PortCandidate::new("COM4", "Arduino-compatible").with_usb(VID_RASPBERRY_PI, 1);
        assert_eq!(classify(&port), Platform::Pico);

        let port = PortCandidate::new("COM5", "CP210x").with_usb(VID_STMICRO, 1);
        assert_eq!(classify(&port), Platform::Esp32);
    }

    #[test]
    fn unknown_vendor_is_unknown() {
        let port = PortCandidate::new("/dev/ttyUSB1", "FT232R").with_usb(0x0403, 0x6001);
        assert_eq!(classify(&port), Platform::Unknown);
    }

    #[test]
    fn platform_labels() {
        assert_eq!(Platform::Esp32.to_string(), "ESP32");
        assert_eq!(Platform::Manual.to_string(), "MANUAL");
        assert_eq!(
            serde_json::to_value(Platform::Stm32).unwrap(),
            serde_json::json!("STM32")
        );
    }
}
