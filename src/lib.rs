//! `flasher` - jittered actuator-array attack cycling over a serial link
//!
//! Drives a microcontroller-controlled actuator array through randomized
//! attack patterns for camera and sensor stress testing. The device speaks
//! one JSON object per line over a serial port.

pub mod channel;
pub mod cli;
pub mod device;
pub mod error;
pub mod observability;
pub mod orchestrator;
pub mod pattern;

/// Build-time metadata generated by `built`.
#[allow(dead_code, clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}
