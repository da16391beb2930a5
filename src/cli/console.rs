//! Operator console.
//!
//! While `run` is active, each stdin line is one console command. Lines are
//! split with shell quoting rules, so `pattern "Face Dazzle"` names one
//! pattern and `targets "lobby cam" dock` names two targets.

use std::fmt;

use thiserror::Error;

/// Console help text, one command per line.
pub const HELP: &str = "\
commands:
  stop                  stop cycling (DISARM, then ALL_OFF)
  quit                  stop cycling and exit
  safety on|off         engage or release the safety interlock
  pattern <name>        select a pattern
  targets <t>...        replace the target list (none clears it)
  jitter <f>            set jitter range, in [0, 1)
  max-cycles <n>        set the cycle limit
  status                show orchestrator and link state
  help                  show this text";

/// A parsed console line.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    /// Stop the run.
    Stop,
    /// Stop the run and leave the console.
    Quit,
    /// Engage (`true`) or release (`false`) the interlock.
    Safety(bool),
    /// Select a pattern by name.
    Pattern(String),
    /// Replace the target list.
    Targets(Vec<String>),
    /// Set the jitter range.
    Jitter(f64),
    /// Set the cycle limit.
    MaxCycles(u64),
    /// Print state.
    Status,
    /// Print [`HELP`].
    Help,
}

/// Why a console line was not understood.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConsoleError {
    /// Unbalanced quotes or a dangling escape.
    #[error("could not split line: unbalanced quoting")]
    Syntax,

    /// First word is not a command.
    #[error("unknown command '{0}' (try 'help')")]
    Unknown(String),

    /// Right command, wrong arguments.
    #[error("usage: {0}")]
    Usage(&'static str),
}

impl fmt::Display for ConsoleCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stop => f.write_str("stop"),
            Self::Quit => f.write_str("quit"),
            Self::Safety(true) => f.write_str("safety on"),
            Self::Safety(false) => f.write_str("safety off"),
            Self::Pattern(name) => write!(f, "pattern {name}"),
            Self::Targets(targets) => write!(f, "targets {}", targets.join(" ")),
            Self::Jitter(j) => write!(f, "jitter {j}"),
            Self::MaxCycles(n) => write!(f, "max-cycles {n}"),
            Self::Status => f.write_str("status"),
            Self::Help => f.write_str("help"),
        }
    }
}

/// Parses one console line. Blank lines and `#` comments yield `None`.
///
/// # Errors
///
/// Returns a [`ConsoleError`] describing what was wrong with the line.
pub fn parse_line(line: &str) -> Result<Option<ConsoleCommand>, ConsoleError> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }

    let words = shlex::split(trimmed).ok_or(ConsoleError::Syntax)?;
    let Some((head, rest)) = words.split_first() else {
        return Ok(None);
    };

    let command = match head.to_ascii_lowercase().as_str() {
        "stop" => no_args(rest, ConsoleCommand::Stop, "stop")?,
        "quit" | "exit" => no_args(rest, ConsoleCommand::Quit, "quit")?,
        "status" => no_args(rest, ConsoleCommand::Status, "status")?,
        "help" | "?" => ConsoleCommand::Help,
        "safety" => match rest {
            [arg] if arg.eq_ignore_ascii_case("on") => ConsoleCommand::Safety(true),
            [arg] if arg.eq_ignore_ascii_case("off") => ConsoleCommand::Safety(false),
            _ => return Err(ConsoleError::Usage("safety on|off")),
        },
        "pattern" => match rest {
            [name] => ConsoleCommand::Pattern(name.clone()),
            _ => return Err(ConsoleError::Usage("pattern <name>")),
        },
        "targets" => ConsoleCommand::Targets(rest.to_vec()),
        "jitter" => match rest {
            [value] => value
                .parse()
                .map(ConsoleCommand::Jitter)
                .map_err(|_| ConsoleError::Usage("jitter <number>"))?,
            _ => return Err(ConsoleError::Usage("jitter <number>")),
        },
        "max-cycles" | "max_cycles" => match rest {
            [value] => value
                .parse()
                .map(ConsoleCommand::MaxCycles)
                .map_err(|_| ConsoleError::Usage("max-cycles <n>"))?,
            _ => return Err(ConsoleError::Usage("max-cycles <n>")),
        },
        other => return Err(ConsoleError::Unknown(other.to_owned())),
    };

    Ok(Some(command))
}

fn no_args(
    rest: &[String],
    command: ConsoleCommand,
    usage: &'static str,
) -> Result<ConsoleCommand, ConsoleError> {
    if rest.is_empty() {
        Ok(command)
    } else {
        Err(ConsoleError::Usage(usage))
    }
}
