//! `patterns` command handlers.
//!
//! Implements `patterns list`, `patterns show` and `patterns validate`.

use std::path::Path;

use tracing::{info, warn};

use crate::cli::args::{OutputFormat, PatternsListArgs, PatternsShowArgs, PatternsValidateArgs};
use crate::error::FlasherError;
use crate::observability::EventEmitter;
use crate::pattern::PatternLibrary;
use crate::pattern::library::load_file;

fn load_library(dir: &Path) -> Result<PatternLibrary, FlasherError> {
    let (library, summary) = PatternLibrary::load(dir, &EventEmitter::noop())?;
    for (path, err) in &summary.rejected {
        warn!(file = %path.display(), error = %err, "skipping invalid pattern file");
    }
    Ok(library)
}

/// List the built-in and user patterns.
///
/// # Errors
///
/// Returns an I/O error if the pattern directory cannot be created or read.
pub fn list(args: &PatternsListArgs) -> Result<(), FlasherError> {
    let library = load_library(&args.dir)?;

    match args.format {
        OutputFormat::Json => {
            let entries: Vec<serde_json::Value> = library
                .iter()
                .map(|(key, p)| {
                    serde_json::json!({
                        "key": key,
                        "name": p.name,
                        "steps": p.sequence.len(),
                        "repeat": p.repeat,
                        "nominal_duration_ms": p.nominal_duration_ms(),
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        OutputFormat::Human => {
            println!("Attack Patterns ({} available)\n", library.len());
            for (key, p) in library.iter() {
                let steps = format!("{} steps x{}", p.sequence.len(), p.repeat);
                #[allow(clippy::cast_precision_loss)]
                let secs = p.nominal_duration_ms() as f64 / 1000.0;
                println!("  {key:<16}{steps:<18}{secs:>8.1}s  {}", p.name);
            }
            println!();
            println!("User patterns: {}", args.dir.display());
            println!("Show a pattern: flasher patterns show <name>");
        }
    }

    Ok(())
}

/// Print one pattern as pretty JSON.
///
/// # Errors
///
/// Returns a pattern error, with a suggestion when one is close, if the
/// name does not resolve.
pub fn show(args: &PatternsShowArgs) -> Result<(), FlasherError> {
    let library = load_library(&args.dir)?;
    let pattern = library.require(&args.name)?;
    println!("{}", serde_json::to_string_pretty(pattern)?);
    Ok(())
}

/// Validate pattern files.
///
/// Every file is checked and reported; the command fails if any is invalid.
///
/// # Errors
///
/// Returns an I/O error for a missing file, or the first pattern error.
pub fn validate(args: &PatternsValidateArgs) -> Result<(), FlasherError> {
    let mut first_error = None;

    for path in &args.files {
        if !path.exists() {
            return Err(FlasherError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("file not found: {}", path.display()),
            )));
        }

        match load_file(path) {
            Ok((key, pattern)) => {
                info!(file = %path.display(), key = %key, "pattern valid");
                println!(
                    "ok       {} ({key}, {} phases per target)",
                    path.display(),
                    pattern.phases_per_target()
                );
            }
            Err(e) => {
                println!("invalid  {}: {e}", path.display());
                first_error.get_or_insert(e);
            }
        }
    }

    first_error.map_or(Ok(()), |e| Err(e.into()))
}
