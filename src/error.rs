//! Error types for `flasher`
//!
//! One error enum per component plus a top-level [`FlasherError`] that maps
//! every failure onto a process exit code.

use std::path::PathBuf;
use thiserror::Error;

// ============================================================================
// Exit Codes
// ============================================================================

/// Exit codes for `flasher` CLI operations.
///
/// These codes follow Unix conventions.
pub struct ExitCode;

impl ExitCode {
    /// Successful execution
    pub const SUCCESS: i32 = 0;

    /// General error
    pub const ERROR: i32 = 1;

    /// Configuration error (invalid YAML/JSON, out-of-range value)
    pub const CONFIG_ERROR: i32 = 2;

    /// I/O error (file not found, permission denied)
    pub const IO_ERROR: i32 = 3;

    /// Connection error (no device found, port could not be opened)
    pub const CONNECTION_ERROR: i32 = 4;

    /// Pattern error (unknown pattern, invalid pattern file)
    pub const PATTERN_ERROR: i32 = 5;

    /// Cycling refused by the safety gate
    pub const START_REJECTED: i32 = 6;

    /// Usage error (invalid arguments, missing required options)
    pub const USAGE_ERROR: i32 = 64;

    /// Interrupted by SIGINT (Ctrl+C)
    pub const INTERRUPTED: i32 = 130;

    /// Terminated by SIGTERM
    pub const TERMINATED: i32 = 143;
}

// ============================================================================
// Top-Level Error
// ============================================================================

/// Top-level error type for `flasher` operations.
#[derive(Debug, Error)]
pub enum FlasherError {
    /// Configuration loading or validation error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Serial channel error
    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// Device session error
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Pattern lookup or validation error
    #[error(transparent)]
    Pattern(#[from] PatternError),

    /// A start request was refused
    #[error(transparent)]
    Rejected(#[from] StartRejected),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl FlasherError {
    /// Returns the appropriate exit code for this error.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::Json(_) | Self::Yaml(_) => ExitCode::CONFIG_ERROR,
            Self::Channel(_) | Self::Session(_) => ExitCode::CONNECTION_ERROR,
            Self::Pattern(_) => ExitCode::PATTERN_ERROR,
            Self::Rejected(_) => ExitCode::START_REJECTED,
            Self::Io(_) => ExitCode::IO_ERROR,
        }
    }
}

// ============================================================================
// Configuration Errors
// ============================================================================

/// Run configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File could not be parsed
    #[error("parse error in {path}: {message}")]
    ParseError {
        /// Path to the configuration file
        path: PathBuf,
        /// Error message from the parser
        message: String,
    },

    /// Referenced configuration file not found
    #[error("file not found: {path}")]
    MissingFile {
        /// Path to the missing file
        path: PathBuf,
    },

    /// Field has an invalid value
    #[error("invalid value for '{field}': got '{value}', expected {expected}")]
    InvalidValue {
        /// Name of the field with invalid value
        field: String,
        /// The actual value provided
        value: String,
        /// Description of what was expected
        expected: String,
    },
}

impl ConfigError {
    pub(crate) fn invalid(
        field: &str,
        value: impl std::fmt::Display,
        expected: &str,
    ) -> Self {
        Self::InvalidValue {
            field: field.to_owned(),
            value: value.to_string(),
            expected: expected.to_owned(),
        }
    }
}

// ============================================================================
// Channel Errors
// ============================================================================

/// Serial command channel errors.
///
/// Only raised synchronously by `open`/`spawn`; failures after the link is
/// up are reported on the channel's event stream instead.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The port could not be opened
    #[error("failed to open {port}: {reason}")]
    Open {
        /// Port name (e.g. `/dev/ttyUSB0`, `COM3`)
        port: String,
        /// Underlying reason reported by the OS or driver
        reason: String,
    },

    /// I/O error on the serial link
    #[error("serial I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A command could not be JSON-encoded
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

// ============================================================================
// Session Errors
// ============================================================================

/// Device session errors.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Auto-detection found no usable device
    #[error("no supported device found")]
    NoDevice,

    /// Manual connection to the given port failed
    #[error("could not connect to {0}")]
    ConnectFailed(String),

    /// The link dropped while cycling
    #[error("device link lost on {0}")]
    LinkLost(String),
}

// ============================================================================
// Pattern Errors
// ============================================================================

/// Attack pattern lookup and validation errors.
#[derive(Debug, Error)]
pub enum PatternError {
    /// Requested pattern does not exist
    #[error("pattern not found: {name}{}", suggestion.as_ref().map_or_else(String::new, |s| format!(" (did you mean '{s}'?)")))]
    NotFound {
        /// Name as requested
        name: String,
        /// Closest known pattern name, if any is similar enough
        suggestion: Option<String>,
    },

    /// Pattern failed structural validation
    #[error("invalid pattern {origin}: {reason}")]
    Invalid {
        /// File path or pattern name the pattern came from
        origin: String,
        /// What was wrong
        reason: String,
    },
}

// ============================================================================
// Start Rejection
// ============================================================================

/// Reasons a request to start cycling is refused.
///
/// A rejected start never changes orchestrator state or sends a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StartRejected {
    /// No device session is connected
    #[error("device not connected")]
    NotConnected,

    /// The safety interlock is disengaged
    #[error("safety not engaged")]
    SafetyDisengaged,

    /// The configuration names no targets
    #[error("no targets configured")]
    NoTargets,

    /// A run is already in progress
    #[error("attack cycling already running")]
    AlreadyRunning,
}

// ============================================================================
// Result Type Alias
// ============================================================================

/// Result type alias for `flasher` operations.
pub type Result<T> = std::result::Result<T, FlasherError>;

// ============================================================================
// Tests
// ============================================================================
