//! Attack cycle orchestrator.
//!
//! Expands the selected pattern over the configured targets into a shuffled
//! queue and plays it against the device, phase by phase, until the cycle
//! limit is reached, the operator stops it, or the safety interlock is
//! released.
//!
//! # States
//!
//! `Idle` and `Running`. `start` moves to `Running` only when the device is
//! connected, safety is engaged, and at least one target is configured.
//! Every exit from `Running` sends `ALL_OFF` exactly once and publishes
//! [`OrchestratorEvent::Stopped`].
//!
//! # Timing
//!
//! Safety is rechecked once per queue pass, not per phase. Releasing the
//! interlock mid-pass is therefore observed only when the pass finishes,
//! at most one full queue duration later. A stop request is observed before
//! the next phase, at most one jittered phase plus the inter-phase gap later.

pub mod config;
pub mod queue;
mod runner;

pub use config::{ConfigUpdate, OrchestratorConfig};
pub use queue::{AttackQueueEntry, build_attack_queue, jitter_factor, phase_sleep};

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use self::runner::{RunOutcome, Runner};
use crate::channel::{Command, Params};
use crate::error::StartRejected;
use crate::observability::metrics;
use crate::observability::{Event, EventEmitter};
use crate::pattern::PatternProvider;

/// Capacity of the orchestrator event broadcast.
const EVENT_CAPACITY: usize = 1024;

// ============================================================================
// Seams
// ============================================================================

/// The device as seen by the orchestrator.
///
/// `send` must not block; delivery failures surface on the device's own
/// event stream.
pub trait DeviceLink: Send + Sync + 'static {
    /// Whether a device is currently connected.
    fn is_connected(&self) -> bool;

    /// Sends a named command.
    fn send(&self, command: &str, params: Params);
}

// ============================================================================
// States and events
// ============================================================================

/// Safety interlock position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SafetyState {
    /// Cycling may run.
    Engaged,
    /// Cycling must not run.
    #[default]
    Disengaged,
}

impl SafetyState {
    /// Returns the upper-case label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Engaged => "ENGAGED",
            Self::Disengaged => "DISENGAGED",
        }
    }
}

/// Orchestrator run state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// No run in progress.
    Idle,
    /// A run loop is executing.
    Running,
}

/// Why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The cycle counter reached `max_cycles`.
    MaxCycles,
    /// The operator asked to stop.
    Requested,
    /// Safety was disengaged while running.
    SafetyBreach,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::MaxCycles => "max_cycles",
            Self::Requested => "requested",
            Self::SafetyBreach => "safety_breach",
        })
    }
}

/// Error notifications. None of these throw; they are reported and the
/// orchestrator carries on or stops as described on each variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// A start request was refused. State is unchanged.
    Rejected(StartRejected),
    /// A pattern name did not resolve. The previous queue stays in effect.
    PatternNotFound(String),
    /// A configuration field was rejected. Other fields still applied.
    InvalidConfig(String),
    /// Safety was disengaged while running. The run aborts.
    SafetyBreach,
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rejected(reason) => write!(f, "Start rejected: {reason}"),
            Self::PatternNotFound(name) => write!(f, "Pattern not found: {name}"),
            Self::InvalidConfig(detail) => write!(f, "Invalid config: {detail}"),
            Self::SafetyBreach => f.write_str("SAFETY BREACH - ABORTING"),
        }
    }
}

/// Observable orchestrator output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrchestratorEvent {
    /// Human-readable status line.
    Status(String),
    /// Completed phase count for the current run.
    Cycle(u64),
    /// A phase is about to be commanded.
    PhaseStarted(AttackQueueEntry),
    /// Something went wrong.
    Error(Notice),
    /// A run ended. Published after `ALL_OFF` has been sent.
    Stopped {
        /// Why the run ended.
        reason: StopReason,
        /// Phases completed.
        cycles: u64,
    },
}

/// Messages from the control surface to a running loop.
#[derive(Debug)]
enum Control {
    UpdateConfig(ConfigUpdate),
    SelectPattern(String),
}

// ============================================================================
// Orchestrator
// ============================================================================

struct ActiveRun {
    id: Uuid,
    control: mpsc::UnboundedSender<Control>,
    cancel: CancellationToken,
    outcome: oneshot::Receiver<RunOutcome>,
    /// Config at start, restored if the loop dies without reporting.
    started_with: OrchestratorConfig,
}

/// Control surface for attack cycling.
///
/// While idle the orchestrator holds the configuration and applies updates
/// directly. While running the configuration lives in the run loop and
/// updates are queued to it.
pub struct Orchestrator {
    device: Arc<dyn DeviceLink>,
    patterns: Arc<dyn PatternProvider>,
    emitter: Arc<EventEmitter>,
    events: broadcast::Sender<OrchestratorEvent>,
    safety: watch::Sender<SafetyState>,
    config: Option<OrchestratorConfig>,
    run: Option<ActiveRun>,
    last_stop: Option<StopReason>,
    seed: Option<u64>,
    /// Control messages sent after the loop dropped its queue.
    held: Vec<Control>,
}

impl Orchestrator {
    /// Creates an idle orchestrator with safety disengaged.
    #[must_use]
    pub fn new(
        device: Arc<dyn DeviceLink>,
        patterns: Arc<dyn PatternProvider>,
        config: OrchestratorConfig,
        emitter: Arc<EventEmitter>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (safety, _) = watch::channel(SafetyState::Disengaged);
        Self {
            device,
            patterns,
            emitter,
            events,
            safety,
            config: Some(config),
            run: None,
            last_stop: None,
            seed: None,
            held: Vec::new(),
        }
    }

    /// Uses a fixed RNG seed for shuffling and jitter.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Subscribes to orchestrator events published from now on.
    #[must_use]
    pub fn subscribe(&self) -> BroadcastStream<OrchestratorEvent> {
        BroadcastStream::new(self.events.subscribe())
    }

    /// Returns the current run state.
    pub fn state(&mut self) -> RunState {
        self.reap();
        if self.run.is_some() {
            RunState::Running
        } else {
            RunState::Idle
        }
    }

    /// Returns the interlock position.
    #[must_use]
    pub fn safety(&self) -> SafetyState {
        *self.safety.borrow()
    }

    /// Returns the configuration while idle; `None` while running.
    pub fn config(&mut self) -> Option<&OrchestratorConfig> {
        self.reap();
        self.config.as_ref()
    }

    /// Returns why the most recent run ended.
    #[must_use]
    pub const fn last_stop(&self) -> Option<StopReason> {
        self.last_stop
    }

    /// Engages the safety interlock.
    pub fn engage_safety(&self) {
        self.set_safety(SafetyState::Engaged);
    }

    /// Disengages the safety interlock.
    ///
    /// A running loop aborts with [`StopReason::SafetyBreach`] at the end of
    /// its current pass.
    pub fn disengage_safety(&self) {
        self.set_safety(SafetyState::Disengaged);
    }

    fn set_safety(&self, state: SafetyState) {
        self.safety.send_replace(state);
        info!(safety = state.as_str(), "safety interlock changed");
        self.emitter.emit(Event::SafetyChanged {
            timestamp: Utc::now(),
            state: state.as_str().to_owned(),
        });
        self.status(format!("SAFETY {}", state.as_str()));
    }

    /// Merges a partial configuration.
    ///
    /// Applied immediately while idle. While running it is applied at the
    /// start of the next pass, or once the run is collected if it ends first.
    pub fn update_config(&mut self, update: ConfigUpdate) {
        self.emitter.emit(Event::ConfigUpdateRequested {
            timestamp: Utc::now(),
            update: serde_json::to_value(&update).unwrap_or_default(),
        });
        self.dispatch(Control::UpdateConfig(update));
    }

    /// Selects the pattern to cycle.
    ///
    /// The name must resolve in the pattern provider; otherwise a
    /// [`Notice::PatternNotFound`] is published and the selection is ignored.
    pub fn select_pattern(&mut self, name: &str) {
        self.emitter.emit(Event::PatternRequested {
            timestamp: Utc::now(),
            name: name.to_owned(),
        });
        self.dispatch(Control::SelectPattern(name.to_owned()));
    }

    /// Queues `message` for the running loop, or applies it now when idle.
    ///
    /// Messages the loop does not drain before it exits come back with its
    /// outcome and are applied when the run is collected.
    fn dispatch(&mut self, message: Control) {
        self.reap();
        let Some(run) = &self.run else {
            self.apply(message);
            return;
        };
        if let Err(mpsc::error::SendError(message)) = run.control.send(message) {
            debug!("run loop gone, holding control message until it is collected");
            self.held.push(message);
        }
    }

    fn apply(&mut self, message: Control) {
        match message {
            Control::UpdateConfig(update) => self.apply_update(update),
            Control::SelectPattern(name) => self.apply_pattern(&name),
        }
    }

    fn apply_update(&mut self, update: ConfigUpdate) {
        let Some(config) = self.config.as_mut() else {
            return;
        };
        let rejected = config.merge(update);
        for err in rejected {
            warn!(error = %err, "config update field rejected");
            let _ = self
                .events
                .send(OrchestratorEvent::Error(Notice::InvalidConfig(err.to_string())));
        }
        self.status("Config updated");
    }

    fn apply_pattern(&mut self, name: &str) {
        if self.patterns.get(name).is_none() {
            warn!(pattern = name, "requested pattern not found");
            let _ = self
                .events
                .send(OrchestratorEvent::Error(Notice::PatternNotFound(name.to_owned())));
            return;
        }
        if let Some(config) = self.config.as_mut() {
            name.clone_into(&mut config.pattern_name);
        }
        self.status(format!("Pattern: {name}"));
    }

    /// Starts cycling.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns the first failing gate, checked in this order: already
    /// running, device not connected, safety disengaged, no targets. A
    /// rejected start sends nothing and changes nothing.
    pub fn start(&mut self) -> Result<(), StartRejected> {
        if let Err(reason) = self.check_start() {
            warn!(%reason, "start rejected");
            metrics::record_error("start_rejected");
            let _ = self
                .events
                .send(OrchestratorEvent::Error(Notice::Rejected(reason)));
            return Err(reason);
        }
        let Some(config) = self.config.take() else {
            return Err(StartRejected::AlreadyRunning);
        };

        let id = Uuid::new_v4();
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (outcome_tx, outcome_rx) = oneshot::channel();
        let cancel = CancellationToken::new();
        let seed = self.seed.unwrap_or_else(rand::random);

        info!(run_id = %id, targets = config.targets.len(), pattern = %config.pattern_name, "attack cycling started");
        self.emitter.emit(Event::CyclingStarted {
            timestamp: Utc::now(),
            run_id: id.to_string(),
            config: serde_json::to_value(&config).unwrap_or_default(),
        });
        metrics::set_running(true);
        self.status("ATTACK CYCLING STARTED");

        let runner = Runner {
            run_id: id,
            config: config.clone(),
            device: Arc::clone(&self.device),
            patterns: Arc::clone(&self.patterns),
            events: self.events.clone(),
            emitter: Arc::clone(&self.emitter),
            safety: self.safety.subscribe(),
            control: control_rx,
            cancel: cancel.clone(),
            rng: StdRng::seed_from_u64(seed),
            queue: Vec::new(),
            cycles: 0,
            announced: None,
            missing: None,
        };
        tokio::spawn(runner.run(outcome_tx));

        self.run = Some(ActiveRun {
            id,
            control: control_tx,
            cancel,
            outcome: outcome_rx,
            started_with: config,
        });
        Ok(())
    }

    fn check_start(&mut self) -> Result<(), StartRejected> {
        if self.state() == RunState::Running {
            return Err(StartRejected::AlreadyRunning);
        }
        if !self.device.is_connected() {
            return Err(StartRejected::NotConnected);
        }
        if self.safety() != SafetyState::Engaged {
            return Err(StartRejected::SafetyDisengaged);
        }
        if self.config.as_ref().is_none_or(|c| c.targets.is_empty()) {
            return Err(StartRejected::NoTargets);
        }
        Ok(())
    }

    /// Stops a running loop and waits for it to exit.
    ///
    /// Sends `DISARM` immediately, then signals the loop, which finishes its
    /// current phase and sends `ALL_OFF`. Returns `None` if nothing was
    /// running.
    pub async fn stop(&mut self) -> Option<StopReason> {
        self.reap();
        let Some(run) = &self.run else {
            debug!("stop requested while idle");
            return None;
        };

        self.device.send(Command::DISARM, Params::new());
        self.status("ATTACK CYCLING STOPPED");
        self.emitter.emit(Event::CyclingStopped {
            timestamp: Utc::now(),
            run_id: run.id.to_string(),
        });
        run.cancel.cancel();

        self.wait().await
    }

    /// Waits for the current run to end and returns why it ended.
    ///
    /// Returns the previous run's reason immediately when idle.
    pub async fn wait(&mut self) -> Option<StopReason> {
        if let Some(mut run) = self.run.take() {
            let outcome = (&mut run.outcome).await;
            self.finish(run, outcome.ok());
        }
        self.last_stop
    }

    /// Collects a finished run without blocking.
    fn reap(&mut self) {
        let Some(run) = self.run.as_mut() else {
            return;
        };
        let outcome = match run.outcome.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(oneshot::error::TryRecvError::Empty) => return,
            Err(oneshot::error::TryRecvError::Closed) => None,
        };
        if let Some(run) = self.run.take() {
            self.finish(run, outcome);
        }
    }

    /// Takes back the config from a finished run, then applies control
    /// messages the loop never drained, in the order they were sent.
    fn finish(&mut self, run: ActiveRun, outcome: Option<RunOutcome>) {
        let mut pending = Vec::new();
        if let Some(mut outcome) = outcome {
            debug!(run_id = %run.id, reason = %outcome.reason, cycles = outcome.cycles, "run collected");
            self.config = Some(outcome.config);
            self.last_stop = Some(outcome.reason);
            while let Ok(message) = outcome.control.try_recv() {
                pending.push(message);
            }
        } else {
            error!(run_id = %run.id, "run loop exited without reporting, restoring start config");
            metrics::set_running(false);
            self.config = Some(run.started_with);
        }
        pending.append(&mut self.held);

        if !pending.is_empty() {
            debug!(run_id = %run.id, messages = pending.len(), "applying control messages left by the run");
        }
        for message in pending {
            self.apply(message);
        }
    }

    fn status(&self, text: impl Into<String>) {
        let _ = self.events.send(OrchestratorEvent::Status(text.into()));
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        if let Some(run) = &self.run {
            run.cancel.cancel();
        }
    }
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("running", &self.run.is_some())
            .field("safety", &self.safety())
            .field("last_stop", &self.last_stop)
            .finish_non_exhaustive()
    }
}
