//! Pattern library: built-ins plus user files.
//!
//! User patterns live as `*.json`, `*.yaml` or `*.yml` files in one
//! directory. Each file is registered under its upper-cased stem and
//! overrides a built-in with the same key. A bad file is reported and
//! skipped; it never prevents the rest of the library from loading.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::builtin::builtin_patterns;
use super::{AttackPattern, PatternProvider, PhaseStep, invalid};
use crate::error::PatternError;
use crate::observability::{Event, EventEmitter};

/// Default user pattern directory, relative to the working directory.
pub const DEFAULT_PATTERN_DIR: &str = "user_attacks";

/// Maximum edit distance for a name suggestion.
const MAX_SUGGESTION_DISTANCE: usize = 3;

/// Outcome of loading a pattern directory.
#[derive(Debug, Default)]
pub struct LoadSummary {
    /// Keys registered from files, in load order.
    pub loaded: Vec<String>,
    /// Files that were skipped and why.
    pub rejected: Vec<(PathBuf, PatternError)>,
}

/// Indexed set of validated patterns.
#[derive(Debug, Clone)]
pub struct PatternLibrary {
    patterns: BTreeMap<String, AttackPattern>,
}

impl PatternLibrary {
    /// Creates a library holding only the built-in patterns.
    #[must_use]
    pub fn builtin() -> Self {
        let patterns = builtin_patterns()
            .into_iter()
            .map(|(key, pattern)| (key.to_owned(), pattern))
            .collect();
        Self { patterns }
    }

    /// Creates a library from the built-ins plus every pattern file in `dir`.
    ///
    /// The directory is created if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the directory cannot be created or listed.
    /// Individual bad files are not errors; see [`LoadSummary::rejected`].
    pub fn load(dir: &Path, emitter: &EventEmitter) -> std::io::Result<(Self, LoadSummary)> {
        let mut library = Self::builtin();
        let summary = library.load_dir(dir, emitter)?;
        Ok((library, summary))
    }

    /// Loads every pattern file in `dir` into this library.
    ///
    /// Files are visited in name order so overrides are deterministic.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the directory cannot be created or listed.
    pub fn load_dir(&mut self, dir: &Path, emitter: &EventEmitter) -> std::io::Result<LoadSummary> {
        std::fs::create_dir_all(dir)?;

        let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && is_pattern_file(path))
            .collect();
        files.sort();

        let mut summary = LoadSummary::default();
        for path in files {
            match load_file(&path) {
                Ok((key, pattern)) => {
                    if self.patterns.contains_key(&key) {
                        debug!(key, file = %path.display(), "user pattern overrides existing entry");
                    }
                    info!(key, file = %path.display(), steps = pattern.sequence.len(), "pattern loaded");
                    emitter.emit(Event::PatternLoaded {
                        timestamp: Utc::now(),
                        name: key.clone(),
                    });
                    self.patterns.insert(key.clone(), pattern);
                    summary.loaded.push(key);
                }
                Err(e) => {
                    warn!(file = %path.display(), error = %e, "pattern file rejected");
                    emitter.emit(Event::PatternInvalid {
                        timestamp: Utc::now(),
                        file: path.display().to_string(),
                        error: e.to_string(),
                    });
                    summary.rejected.push((path, e));
                }
            }
        }
        Ok(summary)
    }

    /// Validates and registers `pattern` under the upper-cased `key`.
    ///
    /// # Errors
    ///
    /// Returns [`PatternError::Invalid`] if the pattern fails validation.
    pub fn insert(&mut self, key: &str, pattern: AttackPattern) -> Result<(), PatternError> {
        pattern.validate(key)?;
        self.patterns.insert(key.to_uppercase(), pattern);
        Ok(())
    }

    /// Looks up a pattern, reporting a suggestion when it is missing.
    ///
    /// # Errors
    ///
    /// Returns [`PatternError::NotFound`] when no pattern has that name.
    pub fn require(&self, name: &str) -> Result<&AttackPattern, PatternError> {
        self.patterns
            .get(&name.to_uppercase())
            .ok_or_else(|| PatternError::NotFound {
                name: name.to_owned(),
                suggestion: self.suggest(name),
            })
    }

    /// Suggests a known key for a mistyped name.
    #[must_use]
    pub fn suggest(&self, name: &str) -> Option<String> {
        let wanted = name.to_uppercase();
        self.patterns
            .keys()
            .map(|key| (key, strsim::damerau_levenshtein(&wanted, key)))
            .filter(|(_, dist)| *dist <= MAX_SUGGESTION_DISTANCE)
            .min_by_key(|(_, dist)| *dist)
            .map(|(key, _)| key.clone())
    }

    /// Iterates over `(key, pattern)` in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttackPattern)> {
        self.patterns.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of registered patterns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    /// Returns `true` if no patterns are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

impl Default for PatternLibrary {
    fn default() -> Self {
        Self::builtin()
    }
}

impl PatternProvider for PatternLibrary {
    fn get(&self, name: &str) -> Option<AttackPattern> {
        self.patterns.get(&name.to_uppercase()).cloned()
    }

    fn list(&self) -> Vec<String> {
        self.patterns.keys().cloned().collect()
    }
}

// ============================================================================
// File loading
// ============================================================================

fn is_pattern_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("json" | "yaml" | "yml")
    )
}

/// Parses and validates one pattern file.
///
/// Returns the registry key (upper-cased file stem) and the pattern.
///
/// # Errors
///
/// Returns [`PatternError::Invalid`] if the file cannot be read, does not
/// parse, or fails validation.
pub fn load_file(path: &Path) -> Result<(String, AttackPattern), PatternError> {
    let origin = path.display().to_string();
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| invalid(&origin, "file name is not valid UTF-8"))?;

    let text = std::fs::read_to_string(path).map_err(|e| invalid(&origin, e.to_string()))?;
    let value: Value = if path.extension().is_some_and(|e| e == "json") {
        serde_json::from_str(&text).map_err(|e| invalid(&origin, e.to_string()))?
    } else {
        serde_yaml::from_str(&text).map_err(|e| invalid(&origin, e.to_string()))?
    };

    let pattern = parse_pattern(&value, &origin, stem)?;
    Ok((stem.to_uppercase(), pattern))
}

/// Builds a pattern from an untyped document.
///
/// Every step must carry `group`, `intensity` and `duration_ms`; `repeat`
/// defaults to 1 and `name` to `default_name`.
///
/// # Errors
///
/// Returns [`PatternError::Invalid`] naming the first offending field.
pub fn parse_pattern(
    value: &Value,
    origin: &str,
    default_name: &str,
) -> Result<AttackPattern, PatternError> {
    let doc = value
        .as_object()
        .ok_or_else(|| invalid(origin, "pattern must be a mapping"))?;

    let name = match doc.get("name") {
        None | Some(Value::Null) => default_name.to_owned(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => return Err(invalid(origin, format!("name must be a string, got {other}"))),
    };

    let steps = doc
        .get("sequence")
        .ok_or_else(|| invalid(origin, "missing 'sequence'"))?
        .as_array()
        .ok_or_else(|| invalid(origin, "'sequence' must be a list"))?;

    let sequence = steps
        .iter()
        .enumerate()
        .map(|(i, step)| parse_step(step, origin, i))
        .collect::<Result<Vec<_>, _>>()?;

    let repeat = match doc.get("repeat") {
        None | Some(Value::Null) => 1,
        Some(v) => v
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .filter(|n| *n >= 1)
            .ok_or_else(|| invalid(origin, format!("repeat must be a positive integer, got {v}")))?,
    };

    let pattern = AttackPattern::new(name, sequence, repeat);
    pattern.validate(origin)?;
    Ok(pattern)
}

fn parse_step(step: &Value, origin: &str, index: usize) -> Result<PhaseStep, PatternError> {
    let fields = step
        .as_object()
        .ok_or_else(|| invalid(origin, format!("sequence[{index}] must be a mapping")))?;

    let field = |key: &str| -> Result<u64, PatternError> {
        let v = fields
            .get(key)
            .ok_or_else(|| invalid(origin, format!("sequence[{index}] is missing '{key}'")))?;
        v.as_u64().ok_or_else(|| {
            invalid(
                origin,
                format!("sequence[{index}].{key} must be a non-negative integer, got {v}"),
            )
        })
    };

    let group = field("group")?;
    let intensity = field("intensity")?;
    let duration_ms = field("duration_ms")?;

    let group = u8::try_from(group)
        .map_err(|_| invalid(origin, format!("sequence[{index}].group {group} exceeds 255")))?;
    let intensity = u8::try_from(intensity).map_err(|_| {
        invalid(
            origin,
            format!("sequence[{index}].intensity {intensity} is outside 0-255"),
        )
    })?;

    Ok(PhaseStep::new(group, intensity, duration_ms))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn reason(err: PatternError) -> String {
        match err {
            PatternError::Invalid { reason, .. } => reason,
            other => panic!("expected Invalid, got {other:?}"),
        }
    }

    #[test]
    fn builtin_keys_are_sorted() {
        let library = PatternLibrary::builtin();
        assert_eq!(
            library.list(),
            ["AGC_LOCK", "DAZZLE", "FLICKER", "PTZ_JAM", "SATURATION"]
        );
    }

    #[test]
    fn get_is_case_insensitive() {
        let library = PatternLibrary::builtin();
        let pattern = library.get("flicker").unwrap();
        assert_eq!(pattern.name, "Rolling Shutter Flicker");
        assert_eq!(pattern.repeat, 3);
        assert!(library.get("Agc_Lock").is_some());
        assert!(library.get("NOPE").is_none());
    }

    #[test]
    fn require_suggests_close_names() {
        let library = PatternLibrary::builtin();
        let err = library.require("agc_lok").unwrap_err();
        assert!(matches!(
            err,
            PatternError::NotFound { suggestion: Some(ref s), .. } if s == "AGC_LOCK"
        ));
        let err = library.require("completely_different").unwrap_err();
        assert!(matches!(err, PatternError::NotFound { suggestion: None, .. }));
    }

    #[test]
    fn parse_defaults_name_and_repeat() {
        let doc = json!({"sequence": [{"group": 1, "intensity": 9, "duration_ms": 20}]});
        let pattern = parse_pattern(&doc, "strobe.json", "strobe").unwrap();
        assert_eq!(pattern.name, "strobe");
        assert_eq!(pattern.repeat, 1);
        assert_eq!(pattern.sequence, [PhaseStep::new(1, 9, 20)]);
    }

    #[test]
    fn parse_rejects_bad_documents() {
        let cases = [
            (json!([1, 2]), "mapping"),
            (json!({"name": "x"}), "missing 'sequence'"),
            (json!({"sequence": {}}), "must be a list"),
            (json!({"sequence": []}), "at least one step"),
            (json!({"sequence": [{"group": 1, "intensity": 2}]}), "missing 'duration_ms'"),
            (
                json!({"sequence": [{"group": 1, "intensity": 300, "duration_ms": 1}]}),
                "outside 0-255",
            ),
            (
                json!({"sequence": [{"group": 1, "intensity": -4, "duration_ms": 1}]}),
                "non-negative integer",
            ),
            (
                json!({"sequence": [{"group": 1, "intensity": 4, "duration_ms": 1}], "repeat": 0}),
                "positive integer",
            ),
        ];
        for (doc, expected) in cases {
            let msg = reason(parse_pattern(&doc, "t", "t").unwrap_err());
            assert!(msg.contains(expected), "{doc}: '{msg}' lacks '{expected}'");
        }
    }

    #[test]
    fn load_dir_registers_overrides_and_skips_bad_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("saturation.json"),
            r#"{"name": "Soft Saturation", "sequence": [{"group": 4, "intensity": 128, "duration_ms": 2000}]}"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join("strobe.yaml"),
            "sequence:\n  - {group: 2, intensity: 255, duration_ms: 30}\n  - {group: 2, intensity: 0, duration_ms: 30}\nrepeat: 10\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("broken.json"), "{ not json").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let (library, summary) = PatternLibrary::load(dir.path(), &EventEmitter::noop()).unwrap();

        assert_eq!(summary.loaded, ["SATURATION", "STROBE"]);
        assert_eq!(summary.rejected.len(), 1);
        assert!(summary.rejected[0].0.ends_with("broken.json"));

        assert_eq!(library.get("saturation").unwrap().name, "Soft Saturation");
        let strobe = library.get("STROBE").unwrap();
        assert_eq!(strobe.name, "strobe");
        assert_eq!(strobe.repeat, 10);
        assert_eq!(library.len(), 6);
    }

    #[test]
    fn load_dir_creates_missing_directory() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("user_attacks");
        let (library, summary) = PatternLibrary::load(&target, &EventEmitter::noop()).unwrap();
        assert!(target.is_dir());
        assert!(summary.loaded.is_empty());
        assert_eq!(library.len(), 5);
    }

    #[test]
    fn insert_validates() {
        let mut library = PatternLibrary::builtin();
        assert!(
            library
                .insert("empty", AttackPattern::new("Empty", Vec::new(), 1))
                .is_err()
        );
        library
            .insert("pulse", AttackPattern::new("Pulse", vec![PhaseStep::new(0, 50, 10)], 2))
            .unwrap();
        assert!(library.get("PULSE").is_some());
    }
}
