//! CLI argument definitions.
//!
//! All clap derive structs for `flasher` command-line parsing.

use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};

use crate::channel::DEFAULT_BAUD_RATE;
use crate::pattern::library::DEFAULT_PATTERN_DIR;

// ============================================================================
// Root CLI
// ============================================================================

/// Jittered actuator-array attack cycling over a serial link.
#[derive(Parser, Debug)]
#[command(name = "flasher", author, version, about)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all non-error output.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Color output control.
    #[arg(long, default_value = "auto", global = true, env = "FLASHER_COLOR")]
    pub color: ColorChoice,

    /// Log output format.
    #[arg(long, default_value = "human", global = true, env = "FLASHER_LOG_FORMAT")]
    pub log_format: OutputFormat,
}

// ============================================================================
// Top-Level Commands
// ============================================================================

/// Top-level subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List serial ports and the platform each would be detected as.
    Ports(PortsArgs),

    /// Inspect and validate attack patterns.
    Patterns(PatternsCommand),

    /// Connect to a device and run attack cycling.
    Run(RunArgs),

    /// Generate shell completion scripts.
    Completions(CompletionsArgs),

    /// Display version and build information.
    Version(VersionArgs),
}

// ============================================================================
// Ports Command
// ============================================================================

/// Arguments for `ports`.
#[derive(Args, Debug)]
pub struct PortsArgs {
    /// Output format.
    #[arg(short, long, default_value = "human")]
    pub format: OutputFormat,
}

// ============================================================================
// Patterns Command
// ============================================================================

/// Pattern inspection commands.
#[derive(Args, Debug)]
pub struct PatternsCommand {
    /// Patterns subcommand.
    #[command(subcommand)]
    pub subcommand: PatternsSubcommand,
}

/// Patterns subcommands.
#[derive(Subcommand, Debug)]
pub enum PatternsSubcommand {
    /// List available patterns.
    List(PatternsListArgs),

    /// Print one pattern as JSON.
    Show(PatternsShowArgs),

    /// Validate pattern files without loading them into a library.
    Validate(PatternsValidateArgs),
}

/// Arguments for `patterns list`.
#[derive(Args, Debug)]
pub struct PatternsListArgs {
    /// User pattern directory.
    #[arg(long, default_value = DEFAULT_PATTERN_DIR, env = "FLASHER_PATTERNS_DIR")]
    pub dir: PathBuf,

    /// Output format.
    #[arg(short, long, default_value = "human")]
    pub format: OutputFormat,
}

/// Arguments for `patterns show`.
#[derive(Args, Debug)]
pub struct PatternsShowArgs {
    /// Pattern name (case-insensitive).
    pub name: String,

    /// User pattern directory.
    #[arg(long, default_value = DEFAULT_PATTERN_DIR, env = "FLASHER_PATTERNS_DIR")]
    pub dir: PathBuf,
}

/// Arguments for `patterns validate`.
#[derive(Args, Debug)]
pub struct PatternsValidateArgs {
    /// Pattern files to validate.
    #[arg(required = true)]
    pub files: Vec<PathBuf>,
}

// ============================================================================
// Run Command
// ============================================================================

/// Arguments for `run`.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Run configuration file (YAML or JSON).
    #[arg(short, long, env = "FLASHER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Serial port to open directly. Auto-detects when omitted.
    #[arg(short, long, env = "FLASHER_PORT")]
    pub port: Option<String>,

    /// Baud rate.
    #[arg(long, default_value_t = DEFAULT_BAUD_RATE, env = "FLASHER_BAUD_RATE")]
    pub baud: u32,

    /// Delay after opening the port before it is used (e.g. `2s`, `500ms`).
    #[arg(long, default_value = "2s", value_parser = humantime::parse_duration, env = "FLASHER_SETTLE")]
    pub settle: Duration,

    /// Target label. Repeat for several targets.
    #[arg(short, long = "target", action = ArgAction::Append)]
    pub targets: Vec<String>,

    /// Pattern to cycle.
    #[arg(long, env = "FLASHER_PATTERN")]
    pub pattern: Option<String>,

    /// Relative jitter in [0, 1).
    #[arg(long)]
    pub jitter: Option<f64>,

    /// Stop after this many phases.
    #[arg(long)]
    pub max_cycles: Option<u64>,

    /// User pattern directory.
    #[arg(long, default_value = DEFAULT_PATTERN_DIR, env = "FLASHER_PATTERNS_DIR")]
    pub patterns_dir: PathBuf,

    /// Append the JSONL event log to this file.
    #[arg(long, env = "FLASHER_EVENTS_FILE")]
    pub events_file: Option<PathBuf>,

    /// Serve Prometheus metrics on 127.0.0.1:<port>.
    #[arg(long, env = "FLASHER_METRICS_PORT")]
    pub metrics_port: Option<u16>,

    /// Engage the safety interlock. Cycling is refused without it.
    #[arg(long)]
    pub arm: bool,
}

// ============================================================================
// Utility Commands
// ============================================================================

/// Arguments for `completions`.
#[derive(Args, Debug)]
pub struct CompletionsArgs {
    /// Target shell.
    pub shell: Shell,
}

/// Arguments for `version`.
#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Output format.
    #[arg(short, long, default_value = "human")]
    pub format: OutputFormat,
}

// ============================================================================
// Value Enums
// ============================================================================

/// Color output choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ColorChoice {
    /// Detect terminal support.
    Auto,
    /// Always emit ANSI colors.
    Always,
    /// Never emit ANSI colors.
    Never,
}

/// Output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text.
    Human,
    /// JSON.
    Json,
}

/// Supported shells for completion generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Shell {
    /// Bash.
    Bash,
    /// Zsh.
    Zsh,
    /// Fish.
    Fish,
    /// `PowerShell`.
    #[value(name = "powershell")]
    PowerShell,
    /// Elvish.
    Elvish,
}
