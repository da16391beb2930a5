//! CLI command dispatch and handlers.
//!
//! Routes parsed CLI arguments to the appropriate command handler.

pub mod completions;
pub mod patterns;
pub mod ports;
pub mod run;
pub mod version;

use tokio_util::sync::CancellationToken;

use crate::cli::args::{Cli, Commands, PatternsSubcommand};
use crate::error::FlasherError;

/// Dispatch a parsed CLI invocation to the appropriate command handler.
///
/// `shutdown` is cancelled by the process signal handler; long-running
/// commands treat it as a request to stop gracefully.
///
/// # Errors
///
/// Returns an error if the dispatched command handler fails.
pub async fn dispatch(cli: Cli, shutdown: CancellationToken) -> Result<(), FlasherError> {
    match cli.command {
        Commands::Ports(args) => ports::run(&args),
        Commands::Patterns(cmd) => match cmd.subcommand {
            PatternsSubcommand::List(args) => patterns::list(&args),
            PatternsSubcommand::Show(args) => patterns::show(&args),
            PatternsSubcommand::Validate(args) => patterns::validate(&args),
        },
        Commands::Run(args) => run::run(&args, cli.quiet, shutdown).await,
        Commands::Completions(args) => {
            completions::run(&args);
            Ok(())
        }
        Commands::Version(args) => version::run(&args),
    }
}
