//! Durable event log for `flasher`.
//!
//! Discrete, typed events recorded while the orchestrator, device session,
//! and serial channel run. Events are serialized as newline-delimited JSON
//! (JSONL) and carry a monotonically increasing sequence number. The log is
//! write-only: nothing in the crate reads it back.

use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

// ---------------------------------------------------------------------------
// Event variants
// ---------------------------------------------------------------------------

/// A discrete event recorded during `flasher` operation.
///
/// Each variant is tagged with `"type"` when serialized to JSON so consumers
/// can dispatch on the event kind.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum Event {
    /// The safety interlock changed state.
    SafetyChanged {
        /// When the change happened.
        timestamp: DateTime<Utc>,
        /// `"ENGAGED"` or `"DISENGAGED"`.
        state: String,
    },

    /// A partial configuration update was requested.
    ConfigUpdateRequested {
        /// When the request was made.
        timestamp: DateTime<Utc>,
        /// The update as requested.
        update: serde_json::Value,
    },

    /// A pattern change was requested.
    PatternRequested {
        /// When the request was made.
        timestamp: DateTime<Utc>,
        /// Requested pattern name.
        name: String,
    },

    /// Attack cycling started.
    CyclingStarted {
        /// When cycling started.
        timestamp: DateTime<Utc>,
        /// Identifier shared by all events of this run.
        run_id: String,
        /// Configuration in effect at start.
        config: serde_json::Value,
    },

    /// An explicit stop was requested.
    CyclingStopped {
        /// When the stop was requested.
        timestamp: DateTime<Utc>,
        /// Identifier of the run being stopped.
        run_id: String,
    },

    /// A phase command was sent to the device.
    PhaseExecuted {
        /// When the phase started.
        timestamp: DateTime<Utc>,
        /// Cycle counter before this phase completed.
        cycle: u64,
        /// Target label.
        target: String,
        /// Actuator group.
        group: u8,
        /// Intensity (0-255).
        intensity: u8,
        /// Nominal duration in milliseconds.
        duration_ms: u64,
        /// `target_patternName` label.
        label: String,
    },

    /// The orchestrator loop exited.
    OrchestratorStopped {
        /// When the loop exited.
        timestamp: DateTime<Utc>,
        /// Why it exited.
        reason: String,
        /// Phases completed during the run.
        cycles: u64,
    },

    /// A serial port was opened.
    SerialOpened {
        /// When the port was opened.
        timestamp: DateTime<Utc>,
        /// Port name.
        port: String,
    },

    /// A serial port was closed.
    SerialClosed {
        /// When the port was closed.
        timestamp: DateTime<Utc>,
        /// Port name.
        port: String,
    },

    /// A command record was written to the wire.
    SerialWrite {
        /// When the record was written.
        timestamp: DateTime<Utc>,
        /// The record as sent.
        record: serde_json::Value,
    },

    /// A response record was read from the wire.
    SerialRead {
        /// When the record arrived.
        timestamp: DateTime<Utc>,
        /// The record as received.
        record: serde_json::Value,
    },

    /// The serial link reported a decode or I/O error.
    SerialError {
        /// When the error occurred.
        timestamp: DateTime<Utc>,
        /// Error description.
        error: String,
    },

    /// A device session connected.
    Connected {
        /// When the connection was established.
        timestamp: DateTime<Utc>,
        /// Platform label (`ESP32`, `PICO`, `ARDUINO`, `STM32`, `MANUAL`).
        platform: String,
        /// Port name.
        port: String,
    },

    /// A device session disconnected.
    Disconnected {
        /// When the session disconnected.
        timestamp: DateTime<Utc>,
        /// `true` when the operator asked for it, `false` when the link dropped.
        requested: bool,
    },

    /// A named command was enqueued on the active channel.
    CommandSent {
        /// When the command was enqueued.
        timestamp: DateTime<Utc>,
        /// Command name.
        cmd: String,
        /// Command parameters.
        params: serde_json::Value,
    },

    /// A named command was dropped because no device is connected.
    CommandFailed {
        /// When the command was dropped.
        timestamp: DateTime<Utc>,
        /// Command name.
        cmd: String,
        /// Why it was dropped.
        reason: String,
    },

    /// A user pattern file was loaded.
    PatternLoaded {
        /// When the file was loaded.
        timestamp: DateTime<Utc>,
        /// Registered pattern key.
        name: String,
    },

    /// A user pattern file was rejected.
    PatternInvalid {
        /// When the file was rejected.
        timestamp: DateTime<Utc>,
        /// Offending file.
        file: String,
        /// Why it was rejected.
        error: String,
    },
}

// ---------------------------------------------------------------------------
// Envelope (adds sequence number via serde flatten)
// ---------------------------------------------------------------------------

/// Wraps an [`Event`] with a monotonically increasing sequence number.
#[derive(Debug, Serialize)]
struct EventEnvelope {
    /// Zero-based, monotonically increasing sequence counter.
    sequence: u64,
    /// The wrapped event (flattened into the same JSON object).
    #[serde(flatten)]
    event: Event,
}

// ---------------------------------------------------------------------------
// Emitter
// ---------------------------------------------------------------------------

/// Thread-safe, buffered JSONL event writer.
///
/// Each call to [`emit`](Self::emit) atomically increments the sequence
/// counter, serializes the event as a single JSON line, and flushes the
/// underlying writer. Serialization or I/O failures are silently dropped
/// so a full disk never stops the device from being switched off.
pub struct EventEmitter {
    writer: Mutex<BufWriter<Box<dyn Write + Send>>>,
    sequence: AtomicU64,
}

// Box<dyn Write> is not Debug.
impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("sequence", &self.sequence.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl EventEmitter {
    /// Creates an emitter that writes to the given writer.
    #[must_use]
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: Mutex::new(BufWriter::new(writer)),
            sequence: AtomicU64::new(0),
        }
    }

    /// Creates an emitter that writes to stderr.
    #[must_use]
    pub fn stderr() -> Self {
        Self::new(Box::new(std::io::stderr()))
    }

    /// Creates an emitter that silently discards all events.
    #[must_use]
    pub fn noop() -> Self {
        Self::new(Box::new(std::io::sink()))
    }

    /// Creates an emitter that appends to the file at `path`.
    ///
    /// The file is created if missing; existing content is preserved.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be created or opened.
    pub fn from_file(path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        Ok(Self::new(Box::new(file)))
    }

    /// Emits an event as a single JSONL line.
    pub fn emit(&self, event: Event) {
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        let envelope = EventEnvelope {
            sequence: seq,
            event,
        };

        if let Ok(mut w) = self.writer.lock() {
            if let Ok(line) = serde_json::to_string(&envelope) {
                let _ = writeln!(w, "{line}");
                let _ = w.flush();
            }
        }
    }

    /// Returns the number of events emitted so far.
    #[must_use]
    pub fn event_count(&self) -> u64 {
        self.sequence.load(Ordering::Relaxed)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
