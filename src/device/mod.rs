//! Device discovery and session management.
//!
//! [`locator`] enumerates ports, [`platform`] classifies them, and
//! [`session`] owns the active connection on behalf of the orchestrator.

pub mod locator;
pub mod platform;
pub mod session;

pub use locator::discover_ports;
pub use platform::{Platform, PortCandidate, classify};
pub use session::{DeviceSession, LinkState, PortOpener, SerialOpener, SessionEvent, SessionHandle};
