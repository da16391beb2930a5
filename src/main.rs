//! `flasher` - jittered actuator-array attack cycling over a serial link

use clap::Parser;
use tokio_util::sync::CancellationToken;

use flasher::cli::args::{Cli, OutputFormat};
use flasher::cli::commands;
use flasher::error::ExitCode;
use flasher::observability::{LogFormat, init_logging};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if !cli.quiet {
        let format = match cli.log_format {
            OutputFormat::Human => LogFormat::Human,
            OutputFormat::Json => LogFormat::Json,
        };
        init_logging(format, cli.verbose, cli.color);
    }

    // First signal stops cycling gracefully; a second one exits at once.
    let shutdown = CancellationToken::new();
    let token = shutdown.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            () = terminate() => {}
        }

        eprintln!("\nShutting down gracefully... (press Ctrl+C again to force)");
        token.cancel();

        tokio::select! {
            _ = tokio::signal::ctrl_c() => std::process::exit(ExitCode::INTERRUPTED),
            () = terminate() => std::process::exit(ExitCode::TERMINATED),
        }
    });

    let result = commands::dispatch(cli, shutdown).await;

    match result {
        Ok(()) => std::process::exit(ExitCode::SUCCESS),
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(e.exit_code());
        }
    }
}

#[cfg(unix)]
async fn terminate() {
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .expect("failed to register SIGTERM handler");
    sigterm.recv().await;
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}
