//! Patterns compiled into the binary.

use super::{AttackPattern, PhaseStep};

/// Returns `(key, pattern)` for every built-in pattern.
pub(super) fn builtin_patterns() -> Vec<(&'static str, AttackPattern)> {
    vec![
        ("AGC_LOCK", agc_lock()),
        (
            "SATURATION",
            AttackPattern::new("Sensor Saturation", vec![PhaseStep::new(4, 255, 5000)], 1),
        ),
        (
            "FLICKER",
            AttackPattern::new(
                "Rolling Shutter Flicker",
                vec![PhaseStep::new(5, 200, 100)],
                3,
            ),
        ),
        (
            "DAZZLE",
            AttackPattern::new("Face Dazzle", vec![PhaseStep::new(1, 255, 3000)], 5),
        ),
        ("PTZ_JAM", ptz_jam()),
    ]
}

/// Four on/off toggles to kick the auto-gain loop, then a 5 s hold.
fn agc_lock() -> AttackPattern {
    let mut sequence: Vec<PhaseStep> = (0..4)
        .flat_map(|_| [PhaseStep::new(4, 255, 50), PhaseStep::new(4, 0, 50)])
        .collect();
    sequence.push(PhaseStep::new(4, 255, 5000));
    AttackPattern::new("AGC Lock 5-Second", sequence, 1)
}

/// Sweep groups 0-3, twenty times over.
fn ptz_jam() -> AttackPattern {
    let sweep = (0..4u8).map(|group| PhaseStep::new(group, 200, 100));
    let sequence = std::iter::repeat_n(sweep, 20).flatten().collect();
    AttackPattern::new("PTZ Tracking Jam", sequence, 1)
}
