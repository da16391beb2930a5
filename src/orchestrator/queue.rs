//! Attack queue construction and phase timing.

use std::time::Duration;

use rand::Rng;
use rand::seq::SliceRandom;
use serde::Serialize;

use crate::pattern::AttackPattern;

/// Fixed pause after every phase, on top of the jittered phase sleep.
pub const INTER_PHASE_GAP: Duration = Duration::from_millis(500);

/// One phase command for one target, ready to execute.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct AttackQueueEntry {
    /// Target label.
    pub target: String,
    /// Actuator group.
    pub group: u8,
    /// Drive level.
    pub intensity: u8,
    /// Nominal duration before jitter.
    pub duration_ms: u64,
    /// `<target>_<pattern name>`.
    pub label: String,
}

/// Expands `pattern` over `targets` and shuffles the result.
///
/// Produces `targets × repeat × sequence` entries. The whole queue is
/// shuffled after expansion, so neither target nor step order is
/// predictable.
pub fn build_attack_queue<R: Rng + ?Sized>(
    pattern: &AttackPattern,
    targets: &[String],
    rng: &mut R,
) -> Vec<AttackQueueEntry> {
    let mut queue = Vec::with_capacity(targets.len() * pattern.phases_per_target());

    for target in targets {
        let label = format!("{target}_{}", pattern.name);
        for _ in 0..pattern.repeat {
            for step in &pattern.sequence {
                queue.push(AttackQueueEntry {
                    target: target.clone(),
                    group: step.group,
                    intensity: step.intensity,
                    duration_ms: step.effective_duration_ms(),
                    label: label.clone(),
                });
            }
        }
    }

    queue.shuffle(rng);
    queue
}

/// Draws a jitter multiplier uniformly from `[1 - jitter_range, 1 + jitter_range]`.
pub fn jitter_factor<R: Rng + ?Sized>(rng: &mut R, jitter_range: f64) -> f64 {
    let j = jitter_range.clamp(0.0, 1.0);
    rng.random_range((1.0 - j)..=(1.0 + j))
}

/// Jittered sleep for a phase of `duration_ms`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn phase_sleep(duration_ms: u64, factor: f64) -> Duration {
    Duration::from_secs_f64((duration_ms as f64 / 1000.0 * factor).max(0.0))
}
