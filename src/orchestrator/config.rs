//! Live orchestrator configuration.
//!
//! [`OrchestratorConfig`] is the full configuration; [`ConfigUpdate`] is a
//! partial one merged field by field. An invalid field in an update is
//! dropped and reported, the remaining fields still apply.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default pattern selected at startup.
pub const DEFAULT_PATTERN: &str = "AGC_LOCK";

/// Full orchestrator configuration.
///
/// A run configuration file may supply any subset of these fields; the
/// rest take their defaults. Unknown fields are rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OrchestratorConfig {
    /// Ordered target labels, without duplicates.
    pub targets: Vec<String>,
    /// Camera exposure window reported to the operator.
    pub camera_duration_ms: u64,
    /// Injection window reported to the operator.
    pub injection_duration_ms: u64,
    /// Relative jitter applied to every phase sleep, in `[0, 1)`.
    pub jitter_range: f64,
    /// Phase completions after which the run stops.
    pub max_cycles: u64,
    /// Selected pattern name.
    pub pattern_name: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            targets: Vec::new(),
            camera_duration_ms: 5000,
            injection_duration_ms: 3000,
            jitter_range: 0.2,
            max_cycles: 100,
            pattern_name: DEFAULT_PATTERN.to_owned(),
        }
    }
}

impl OrchestratorConfig {
    /// Loads a configuration file. JSON and YAML are both accepted.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingFile`] if the file does not exist,
    /// [`ConfigError::ParseError`] if it does not parse, and
    /// [`ConfigError::InvalidValue`] if a value is out of range.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::MissingFile {
                    path: path.to_path_buf(),
                }
            } else {
                ConfigError::ParseError {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                }
            }
        })?;

        // JSON is a subset of YAML.
        let mut config: Self =
            serde_yaml::from_str(&text).map_err(|e| ConfigError::ParseError {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
        config.targets = normalize_targets(config.targets);
        config.validate()?;
        Ok(config)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for the first out-of-range field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_jitter(self.jitter_range)?;
        check_max_cycles(self.max_cycles)?;
        check_pattern_name(&self.pattern_name)?;
        Ok(())
    }

    /// Merges `update` into this configuration.
    ///
    /// Returns one error per rejected field. Rejected fields leave the
    /// current value unchanged.
    pub fn merge(&mut self, update: ConfigUpdate) -> Vec<ConfigError> {
        let mut rejected = Vec::new();

        if let Some(targets) = update.targets {
            self.targets = normalize_targets(targets);
        }
        if let Some(ms) = update.camera_duration_ms {
            self.camera_duration_ms = ms;
        }
        if let Some(ms) = update.injection_duration_ms {
            self.injection_duration_ms = ms;
        }
        if let Some(jitter) = update.jitter_range {
            match check_jitter(jitter) {
                Ok(()) => self.jitter_range = jitter,
                Err(e) => rejected.push(e),
            }
        }
        if let Some(max) = update.max_cycles {
            match check_max_cycles(max) {
                Ok(()) => self.max_cycles = max,
                Err(e) => rejected.push(e),
            }
        }
        if let Some(name) = update.pattern_name {
            match check_pattern_name(&name) {
                Ok(()) => self.pattern_name = name,
                Err(e) => rejected.push(e),
            }
        }

        rejected
    }
}

/// A partial configuration. Absent fields are left unchanged on merge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigUpdate {
    /// Replacement target list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub targets: Option<Vec<String>>,
    /// New camera window.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub camera_duration_ms: Option<u64>,
    /// New injection window.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub injection_duration_ms: Option<u64>,
    /// New jitter range.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jitter_range: Option<f64>,
    /// New cycle limit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_cycles: Option<u64>,
    /// New pattern name. Not checked against the library until the next
    /// queue build.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern_name: Option<String>,
}

impl ConfigUpdate {
    /// Update that replaces the target list.
    #[must_use]
    pub fn targets<I, S>(targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            targets: Some(targets.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    /// Returns `true` if no field is set.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.targets.is_none()
            && self.camera_duration_ms.is_none()
            && self.injection_duration_ms.is_none()
            && self.jitter_range.is_none()
            && self.max_cycles.is_none()
            && self.pattern_name.is_none()
    }
}

/// Trims labels, drops empty ones and removes duplicates, keeping first
/// occurrence order.
fn normalize_targets(targets: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(targets.len());
    for target in targets {
        let target = target.trim();
        if !target.is_empty() && !out.iter().any(|t| t == target) {
            out.push(target.to_owned());
        }
    }
    out
}

fn check_jitter(jitter: f64) -> Result<(), ConfigError> {
    if jitter.is_finite() && (0.0..1.0).contains(&jitter) {
        Ok(())
    } else {
        Err(ConfigError::invalid(
            "jitter_range",
            jitter,
            "a number in [0, 1)",
        ))
    }
}

fn check_max_cycles(max: u64) -> Result<(), ConfigError> {
    if max >= 1 {
        Ok(())
    } else {
        Err(ConfigError::invalid("max_cycles", max, "a positive integer"))
    }
}

fn check_pattern_name(name: &str) -> Result<(), ConfigError> {
    if name.trim().is_empty() {
        Err(ConfigError::invalid("pattern_name", "\"\"", "a pattern name"))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults() {
        let config = OrchestratorConfig::default();
        assert!(config.targets.is_empty());
        assert_eq!(config.camera_duration_ms, 5000);
        assert_eq!(config.injection_duration_ms, 3000);
        assert!((config.jitter_range - 0.2).abs() < f64::EPSILON);
        assert_eq!(config.max_cycles, 100);
        assert_eq!(config.pattern_name, "AGC_LOCK");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn merge_applies_only_present_fields() {
        let mut config = OrchestratorConfig::default();
        let rejected = config.merge(ConfigUpdate {
            max_cycles: Some(7),
            ..ConfigUpdate::default()
        });
        assert!(rejected.is_empty());
        assert_eq!(config.max_cycles, 7);
        assert_eq!(config.pattern_name, "AGC_LOCK");
    }

    #[test]
    fn merge_drops_invalid_fields_and_keeps_valid_ones() {
        let mut config = OrchestratorConfig::default();
        let rejected = config.merge(ConfigUpdate {
            targets: Some(vec!["CAM1".into()]),
            jitter_range: Some(1.0),
            max_cycles: Some(0),
            ..ConfigUpdate::default()
        });
        assert_eq!(rejected.len(), 2);
        assert_eq!(config.targets, ["CAM1"]);
        assert!((config.jitter_range - 0.2).abs() < f64::EPSILON);
        assert_eq!(config.max_cycles, 100);
    }

    #[test]
    fn nan_jitter_is_rejected() {
        let mut config = OrchestratorConfig::default();
        let rejected = config.merge(ConfigUpdate {
            jitter_range: Some(f64::NAN),
            ..ConfigUpdate::default()
        });
        assert_eq!(rejected.len(), 1);
    }

    #[test]
    fn targets_are_deduplicated_in_order() {
        let mut config = OrchestratorConfig::default();
        config.merge(ConfigUpdate::targets(["CAM2", " CAM1 ", "CAM2", ""]));
        assert_eq!(config.targets, ["CAM2", "CAM1"]);
    }

    #[test]
    fn empty_targets_update_clears_targets() {
        let mut config = OrchestratorConfig::default();
        config.merge(ConfigUpdate::targets(["CAM1"]));
        let update: ConfigUpdate = serde_json::from_str(r#"{"targets": []}"#).unwrap();
        assert!(config.merge(update).is_empty());
        assert!(config.targets.is_empty());
    }

    #[test]
    fn update_rejects_unknown_fields() {
        let result: Result<ConfigUpdate, _> = serde_json::from_str(r#"{"target": ["x"]}"#);
        assert!(result.is_err());
        assert!(ConfigUpdate::default().is_empty());
    }

    #[test]
    fn from_file_yaml_and_json() {
        let dir = TempDir::new().unwrap();

        let yaml = dir.path().join("run.yaml");
        std::fs::write(&yaml, "targets: [CAM1, CAM2]\njitter_range: 0.1\n").unwrap();
        let config = OrchestratorConfig::from_file(&yaml).unwrap();
        assert_eq!(config.targets, ["CAM1", "CAM2"]);
        assert_eq!(config.max_cycles, 100);

        let json = dir.path().join("run.json");
        std::fs::write(&json, r#"{"max_cycles": 3, "pattern_name": "FLICKER"}"#).unwrap();
        let config = OrchestratorConfig::from_file(&json).unwrap();
        assert_eq!(config.max_cycles, 3);
        assert_eq!(config.pattern_name, "FLICKER");
    }

    #[test]
    fn from_file_errors() {
        let dir = TempDir::new().unwrap();

        let missing = OrchestratorConfig::from_file(&dir.path().join("nope.yaml"));
        assert!(matches!(missing, Err(ConfigError::MissingFile { .. })));

        let unknown = dir.path().join("unknown.yaml");
        std::fs::write(&unknown, "targetz: [CAM1]\n").unwrap();
        assert!(matches!(
            OrchestratorConfig::from_file(&unknown),
            Err(ConfigError::ParseError { .. })
        ));

        let bad = dir.path().join("bad.yaml");
        std::fs::write(&bad, "jitter_range: 1.5\n").unwrap();
        assert!(matches!(
            OrchestratorConfig::from_file(&bad),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "jitter_range"
        ));
    }
}
