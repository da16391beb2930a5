//! Attack patterns.
//!
//! A pattern is a named, ordered list of [`PhaseStep`]s plus a repeat count.
//! Patterns reach the orchestrator only through a [`PatternProvider`], and
//! only after passing [`AttackPattern::validate`].

mod builtin;
pub mod library;

pub use library::{LoadSummary, PatternLibrary};

use serde::{Deserialize, Serialize};

use crate::error::PatternError;

/// Duration used for a step that does not specify one.
pub const DEFAULT_STEP_DURATION_MS: u64 = 1000;

/// One timed actuation: drive `group` at `intensity` for `duration_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PhaseStep {
    /// Actuator group index.
    pub group: u8,
    /// Drive level, 0-255.
    pub intensity: u8,
    /// Nominal step duration. `None` falls back to [`DEFAULT_STEP_DURATION_MS`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl PhaseStep {
    /// Creates a step with an explicit duration.
    #[must_use]
    pub const fn new(group: u8, intensity: u8, duration_ms: u64) -> Self {
        Self {
            group,
            intensity,
            duration_ms: Some(duration_ms),
        }
    }

    /// Returns the step duration, applying the default when unset.
    #[must_use]
    pub fn effective_duration_ms(&self) -> u64 {
        self.duration_ms.unwrap_or(DEFAULT_STEP_DURATION_MS)
    }
}

/// A named attack shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttackPattern {
    /// Display name, used in queue labels.
    pub name: String,
    /// Steps in order. Never empty once validated.
    pub sequence: Vec<PhaseStep>,
    /// How many times the sequence runs per target. At least 1.
    #[serde(default = "default_repeat")]
    pub repeat: u32,
}

const fn default_repeat() -> u32 {
    1
}

impl AttackPattern {
    /// Creates a pattern. Call [`validate`](Self::validate) before use.
    #[must_use]
    pub fn new(name: impl Into<String>, sequence: Vec<PhaseStep>, repeat: u32) -> Self {
        Self {
            name: name.into(),
            sequence,
            repeat,
        }
    }

    /// Checks the structural invariants.
    ///
    /// Intensity range is enforced by the `u8` type; this checks the rest.
    ///
    /// # Errors
    ///
    /// Returns [`PatternError::Invalid`] when the sequence is empty or
    /// `repeat` is zero.
    pub fn validate(&self, origin: &str) -> Result<(), PatternError> {
        if self.sequence.is_empty() {
            return Err(invalid(origin, "sequence must contain at least one step"));
        }
        if self.repeat == 0 {
            return Err(invalid(origin, "repeat must be at least 1"));
        }
        Ok(())
    }

    /// Number of phases this pattern contributes per target.
    #[must_use]
    pub fn phases_per_target(&self) -> usize {
        self.sequence.len() * self.repeat as usize
    }

    /// Total nominal duration of one pass for a single target, in milliseconds.
    #[must_use]
    pub fn nominal_duration_ms(&self) -> u64 {
        let once: u64 = self
            .sequence
            .iter()
            .map(PhaseStep::effective_duration_ms)
            .sum();
        once.saturating_mul(u64::from(self.repeat))
    }
}

pub(crate) fn invalid(origin: &str, reason: impl Into<String>) -> PatternError {
    PatternError::Invalid {
        origin: origin.to_owned(),
        reason: reason.into(),
    }
}

/// Source of patterns for the orchestrator.
pub trait PatternProvider: Send + Sync {
    /// Looks up a pattern by name, ignoring case.
    fn get(&self, name: &str) -> Option<AttackPattern>;

    /// Returns the available pattern names in order.
    fn list(&self) -> Vec<String>;
}
