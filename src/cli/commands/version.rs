//! Version information display.
//!
//! Prints version and build metadata in human or JSON format.

use crate::built_info;
use crate::cli::args::{OutputFormat, VersionArgs};
use crate::error::FlasherError;

/// Print version and build information.
///
/// # Errors
///
/// Returns a JSON error if the JSON output cannot be serialized.
pub fn run(args: &VersionArgs) -> Result<(), FlasherError> {
    let name = built_info::PKG_NAME;
    let version = built_info::PKG_VERSION;
    let commit = built_info::GIT_COMMIT_HASH_SHORT;

    match args.format {
        OutputFormat::Human => {
            match commit {
                Some(commit) => println!("{name} {version} ({commit})"),
                None => println!("{name} {version}"),
            }
            println!("built {} for {}", built_info::BUILT_TIME_UTC, built_info::TARGET);
            println!("{}", built_info::RUSTC_VERSION);
        }
        OutputFormat::Json => {
            let info = serde_json::json!({
                "name": name,
                "version": version,
                "commit": commit,
                "built": built_info::BUILT_TIME_UTC,
                "target": built_info::TARGET,
                "rustc": built_info::RUSTC_VERSION,
                "profile": built_info::PROFILE,
            });
            println!("{}", serde_json::to_string(&info)?);
        }
    }

    Ok(())
}
