//! `run` command: connect, arm, cycle, and take operator commands.
//!
//! The command owns the orchestrator for its whole lifetime. Operator
//! console lines, orchestrator events, session events, and the shutdown
//! signal are multiplexed in one loop, so every orchestrator call happens
//! from this task.

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::channel::ChannelConfig;
use crate::cli::args::RunArgs;
use crate::cli::console::{self, ConsoleCommand, HELP};
use crate::device::{DeviceSession, LinkState, SerialOpener, SessionEvent, SessionHandle, discover_ports};
use crate::error::{FlasherError, SessionError};
use crate::observability::{EventEmitter, init_metrics};
use crate::orchestrator::{ConfigUpdate, Orchestrator, OrchestratorConfig, OrchestratorEvent};
use crate::pattern::PatternLibrary;

/// Run attack cycling against a connected device until it stops.
///
/// # Errors
///
/// Returns a configuration, pattern, or connection error if setup fails, a
/// start rejection if a gate refuses the run, or
/// [`SessionError::LinkLost`] if the device drops mid-run.
pub async fn run(
    args: &RunArgs,
    quiet: bool,
    shutdown: CancellationToken,
) -> Result<(), FlasherError> {
    let config = build_config(args)?;
    init_metrics(args.metrics_port)?;

    let emitter = Arc::new(match &args.events_file {
        Some(path) => EventEmitter::from_file(path)?,
        None => EventEmitter::noop(),
    });

    let (library, summary) = PatternLibrary::load(&args.patterns_dir, &emitter)?;
    for (path, err) in &summary.rejected {
        warn!(file = %path.display(), error = %err, "skipping invalid pattern file");
    }
    info!(
        patterns = library.len(),
        user = summary.loaded.len(),
        dir = %args.patterns_dir.display(),
        "pattern library loaded"
    );
    library.require(&config.pattern_name)?;

    let channel_config = ChannelConfig {
        settle_delay: args.settle,
        ..ChannelConfig::from_env()
    }
    .with_baud_rate(args.baud);
    let opener = Arc::new(SerialOpener::new(channel_config, Arc::clone(&emitter)));
    let session = DeviceSession::spawn(opener, Arc::clone(&emitter));

    let link = connect(&session, args).await?;
    if !quiet {
        println!("Connected: {} on {}", link.platform, link.port);
    }

    let mut orchestrator = Orchestrator::new(
        Arc::new(session.clone()),
        Arc::new(library),
        config,
        emitter,
    );
    let result = drive(&mut orchestrator, &session, &link, args.arm, quiet, &shutdown).await;

    session.disconnect().await;
    result
}

/// Builds the run configuration: file (or defaults) overlaid with flags.
fn build_config(args: &RunArgs) -> Result<OrchestratorConfig, FlasherError> {
    let mut config = match &args.config {
        Some(path) => OrchestratorConfig::from_file(path)?,
        None => OrchestratorConfig::default(),
    };

    let overrides = ConfigUpdate {
        targets: (!args.targets.is_empty()).then(|| args.targets.clone()),
        jitter_range: args.jitter,
        max_cycles: args.max_cycles,
        pattern_name: args.pattern.clone(),
        ..ConfigUpdate::default()
    };
    if let Some(rejected) = config.merge(overrides).into_iter().next() {
        return Err(rejected.into());
    }
    Ok(config)
}

async fn connect(session: &SessionHandle, args: &RunArgs) -> Result<LinkState, FlasherError> {
    let connected = if let Some(port) = &args.port {
        info!(port = %port, baud = args.baud, "connecting to named port");
        if !session.connect_manual(port.clone(), args.baud).await {
            return Err(SessionError::ConnectFailed(port.clone()).into());
        }
        session.link()
    } else {
        let candidates = discover_ports()?;
        info!(candidates = candidates.len(), "auto-detecting device");
        if !session.detect_and_connect(candidates, args.baud).await {
            return Err(SessionError::NoDevice.into());
        }
        session.link()
    };
    connected.ok_or_else(|| SessionError::NoDevice.into())
}

enum Flow {
    Continue,
    Quit,
}

async fn drive(
    orchestrator: &mut Orchestrator,
    session: &SessionHandle,
    link: &LinkState,
    arm: bool,
    quiet: bool,
    shutdown: &CancellationToken,
) -> Result<(), FlasherError> {
    let mut events = orchestrator.subscribe();
    let mut device_events = session.subscribe();

    if arm {
        orchestrator.engage_safety();
    } else {
        warn!("safety interlock not engaged; pass --arm to allow cycling");
    }
    orchestrator.start()?;

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            () = shutdown.cancelled() => {
                info!("shutdown requested, stopping cycling");
                orchestrator.stop().await;
                return Ok(());
            }
            line = stdin.next_line(), if stdin_open => match line {
                Ok(Some(line)) => {
                    if matches!(handle_line(orchestrator, session, &line).await, Flow::Quit) {
                        return Ok(());
                    }
                }
                Ok(None) => {
                    debug!("console input closed");
                    stdin_open = false;
                }
                Err(e) => {
                    warn!(error = %e, "console read failed, ignoring further input");
                    stdin_open = false;
                }
            },
            Some(event) = events.next() => match event {
                Ok(OrchestratorEvent::Stopped { reason, cycles }) => {
                    if !quiet {
                        println!("Stopped ({reason}) after {cycles} cycles");
                    }
                    return Ok(());
                }
                Ok(event) => render(&event, quiet),
                Err(BroadcastStreamRecvError::Lagged(n)) => {
                    warn!(skipped = n, "console fell behind orchestrator events");
                }
            },
            Some(event) = device_events.next() => match event {
                Ok(SessionEvent::Disconnected { requested: false }) => {
                    eprintln!("! device link lost on {}", link.port);
                    orchestrator.stop().await;
                    return Err(SessionError::LinkLost(link.port.clone()).into());
                }
                Ok(SessionEvent::Response(response)) => {
                    if !quiet {
                        println!("< {}", serde_json::Value::Object(response));
                    }
                }
                Ok(SessionEvent::DecodeError(reason)) => {
                    warn!(%reason, "undecodable line from device");
                }
                Ok(SessionEvent::Connected(_) | SessionEvent::Disconnected { requested: true }) => {}
                Err(BroadcastStreamRecvError::Lagged(n)) => {
                    warn!(skipped = n, "console fell behind device events");
                }
            },
        }
    }
}

async fn handle_line(orchestrator: &mut Orchestrator, session: &SessionHandle, line: &str) -> Flow {
    let command = match console::parse_line(line) {
        Ok(Some(command)) => command,
        Ok(None) => return Flow::Continue,
        Err(e) => {
            eprintln!("! {e}");
            return Flow::Continue;
        }
    };
    debug!(%command, "console command");

    match command {
        ConsoleCommand::Stop => {
            orchestrator.stop().await;
        }
        ConsoleCommand::Quit => {
            orchestrator.stop().await;
            return Flow::Quit;
        }
        ConsoleCommand::Safety(true) => orchestrator.engage_safety(),
        ConsoleCommand::Safety(false) => orchestrator.disengage_safety(),
        ConsoleCommand::Pattern(name) => orchestrator.select_pattern(&name),
        ConsoleCommand::Targets(targets) => orchestrator.update_config(ConfigUpdate::targets(targets)),
        ConsoleCommand::Jitter(jitter) => orchestrator.update_config(ConfigUpdate {
            jitter_range: Some(jitter),
            ..ConfigUpdate::default()
        }),
        ConsoleCommand::MaxCycles(max) => orchestrator.update_config(ConfigUpdate {
            max_cycles: Some(max),
            ..ConfigUpdate::default()
        }),
        ConsoleCommand::Status => print_status(orchestrator, session),
        ConsoleCommand::Help => println!("{HELP}"),
    }
    Flow::Continue
}

fn print_status(orchestrator: &mut Orchestrator, session: &SessionHandle) {
    let link = session
        .link()
        .map_or_else(|| "disconnected".to_owned(), |l| format!("{} on {}", l.platform, l.port));
    println!("state:  {:?}", orchestrator.state());
    println!("safety: {}", orchestrator.safety().as_str());
    println!("device: {link}");
    if let Some(reason) = orchestrator.last_stop() {
        println!("last stop: {reason}");
    }
}

fn render(event: &OrchestratorEvent, quiet: bool) {
    match event {
        OrchestratorEvent::Status(text) => {
            if !quiet {
                println!("{text}");
            }
        }
        OrchestratorEvent::Error(notice) => eprintln!("! {notice}"),
        OrchestratorEvent::Cycle(n) => debug!(cycle = n, "phase completed"),
        OrchestratorEvent::PhaseStarted(_) | OrchestratorEvent::Stopped { .. } => {}
    }
}

