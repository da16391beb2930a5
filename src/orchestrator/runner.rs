//! Cycling run loop.
//!
//! Owns the live configuration for the duration of one run and hands it
//! back when the run ends, together with the control queue so that messages
//! still queued at exit are applied by the orchestrator instead of lost.
//! Control messages are drained at the top of every pass; safety is checked
//! once per pass, after the drain. The stop flag is checked before every
//! phase. Phase sleeps are never interrupted. An empty pass waits
//! [`IDLE_WAIT`] and then rebuilds like any other pass.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::rngs::StdRng;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::queue::{AttackQueueEntry, INTER_PHASE_GAP, build_attack_queue, jitter_factor, phase_sleep};
use super::{
    Control, DeviceLink, Notice, OrchestratorConfig, OrchestratorEvent, SafetyState, StopReason,
};
use crate::channel::{Command, Params};
use crate::observability::metrics;
use crate::observability::{Event, EventEmitter};
use crate::pattern::PatternProvider;

/// Wait applied when a pass has nothing to execute.
pub const IDLE_WAIT: Duration = Duration::from_millis(100);

/// What a finished run hands back to the orchestrator.
#[derive(Debug)]
pub(super) struct RunOutcome {
    pub(super) config: OrchestratorConfig,
    pub(super) reason: StopReason,
    pub(super) cycles: u64,
    /// Control messages the loop did not get to.
    pub(super) control: mpsc::UnboundedReceiver<Control>,
}

pub(super) struct Runner {
    pub(super) run_id: Uuid,
    pub(super) config: OrchestratorConfig,
    pub(super) device: Arc<dyn DeviceLink>,
    pub(super) patterns: Arc<dyn PatternProvider>,
    pub(super) events: broadcast::Sender<OrchestratorEvent>,
    pub(super) emitter: Arc<EventEmitter>,
    pub(super) safety: watch::Receiver<SafetyState>,
    pub(super) control: mpsc::UnboundedReceiver<Control>,
    pub(super) cancel: CancellationToken,
    pub(super) rng: StdRng,
    pub(super) queue: Vec<AttackQueueEntry>,
    pub(super) cycles: u64,
    /// Size of the last announced queue.
    pub(super) announced: Option<usize>,
    /// Pattern name whose absence was last reported.
    pub(super) missing: Option<String>,
}

impl Runner {
    pub(super) async fn run(mut self, outcome: oneshot::Sender<RunOutcome>) {
        info!(run_id = %self.run_id, "cycling loop started");
        self.rebuild_queue();

        let reason = loop {
            if self.cancel.is_cancelled() {
                break StopReason::Requested;
            }

            self.drain_control();

            let safety = *self.safety.borrow();
            if safety == SafetyState::Disengaged {
                error!(run_id = %self.run_id, cycles = self.cycles, "safety disengaged while running, aborting");
                metrics::record_error("safety_breach");
                self.notify(OrchestratorEvent::Error(Notice::SafetyBreach));
                break StopReason::SafetyBreach;
            }

            if self.queue.is_empty() {
                tokio::select! {
                    () = self.cancel.cancelled() => break StopReason::Requested,
                    () = tokio::time::sleep(IDLE_WAIT) => {}
                }
                self.rebuild_queue();
                continue;
            }

            if let Some(reason) = self.execute_pass().await {
                break reason;
            }
            self.rebuild_queue();
        };

        self.shutdown(reason, outcome);
    }

    /// Applies queued control messages in receipt order.
    fn drain_control(&mut self) {
        while let Ok(message) = self.control.try_recv() {
            match message {
                Control::UpdateConfig(update) => {
                    for rejected in self.config.merge(update) {
                        warn!(error = %rejected, "config update field rejected");
                        self.notify(OrchestratorEvent::Error(Notice::InvalidConfig(
                            rejected.to_string(),
                        )));
                    }
                    self.rebuild_queue();
                    self.status("Config updated");
                }
                Control::SelectPattern(name) => {
                    if self.patterns.get(&name).is_some() {
                        self.config.pattern_name = name;
                        self.rebuild_queue();
                        self.status(format!("Pattern: {}", self.config.pattern_name));
                    } else {
                        warn!(pattern = %name, "requested pattern not found, keeping current");
                        self.notify(OrchestratorEvent::Error(Notice::PatternNotFound(name)));
                    }
                }
            }
        }
    }

    /// Rebuilds the queue from the current config. A missing pattern leaves
    /// the previous queue in place.
    ///
    /// Queue size and missing-pattern notices are published only when they
    /// change, so idle passes stay quiet.
    fn rebuild_queue(&mut self) {
        let Some(pattern) = self.patterns.get(&self.config.pattern_name) else {
            if self.missing.as_ref() != Some(&self.config.pattern_name) {
                warn!(pattern = %self.config.pattern_name, "pattern not found, queue unchanged");
                metrics::record_error("pattern_not_found");
                self.missing = Some(self.config.pattern_name.clone());
                self.notify(OrchestratorEvent::Error(Notice::PatternNotFound(
                    self.config.pattern_name.clone(),
                )));
            }
            return;
        };
        self.missing = None;

        self.queue = build_attack_queue(&pattern, &self.config.targets, &mut self.rng);
        debug!(entries = self.queue.len(), pattern = %pattern.name, "attack queue built");
        if self.announced != Some(self.queue.len()) {
            self.announced = Some(self.queue.len());
            self.status(format!("Queue: {} attacks", self.queue.len()));
        }
    }

    /// Runs every entry of the current queue. Returns a stop reason if the
    /// run ended during the pass.
    async fn execute_pass(&mut self) -> Option<StopReason> {
        let queue = std::mem::take(&mut self.queue);

        for entry in &queue {
            if self.cancel.is_cancelled() {
                self.queue = queue;
                return Some(StopReason::Requested);
            }

            self.execute_phase(entry);

            let factor = jitter_factor(&mut self.rng, self.config.jitter_range);
            let sleep = phase_sleep(entry.duration_ms, factor);
            metrics::record_phase(sleep);
            tokio::time::sleep(sleep).await;
            tokio::time::sleep(INTER_PHASE_GAP).await;

            self.cycles += 1;
            self.notify(OrchestratorEvent::Cycle(self.cycles));

            if self.cycles >= self.config.max_cycles {
                info!(cycles = self.cycles, "max cycles reached");
                self.status("MAX CYCLES REACHED");
                self.queue = queue;
                return Some(StopReason::MaxCycles);
            }
        }

        self.queue = queue;
        None
    }

    fn execute_phase(&self, entry: &AttackQueueEntry) {
        debug!(
            cycle = self.cycles,
            target = %entry.target,
            group = entry.group,
            intensity = entry.intensity,
            duration_ms = entry.duration_ms,
            "phase started"
        );
        self.notify(OrchestratorEvent::PhaseStarted(entry.clone()));
        self.status(format!("[C{}] {}", self.cycles, entry.label));
        self.emitter.emit(Event::PhaseExecuted {
            timestamp: Utc::now(),
            cycle: self.cycles,
            target: entry.target.clone(),
            group: entry.group,
            intensity: entry.intensity,
            duration_ms: entry.duration_ms,
            label: entry.label.clone(),
        });

        let mut params = Params::new();
        params.insert("group".to_owned(), entry.group.into());
        params.insert("intensity".to_owned(), entry.intensity.into());
        self.device.send(Command::SET_GROUP, params);
    }

    fn shutdown(self, reason: StopReason, outcome: oneshot::Sender<RunOutcome>) {
        self.device.send(Command::ALL_OFF, Params::new());
        metrics::set_running(false);

        info!(run_id = %self.run_id, %reason, cycles = self.cycles, "orchestrator stopped");
        self.status("ORCHESTRATOR STOPPED");
        self.emitter.emit(Event::OrchestratorStopped {
            timestamp: Utc::now(),
            reason: reason.to_string(),
            cycles: self.cycles,
        });

        let cycles = self.cycles;
        let events = self.events.clone();
        // The config goes back before `Stopped` is published, so a subscriber
        // reacting to `Stopped` already sees the orchestrator as idle.
        let _ = outcome.send(RunOutcome {
            config: self.config,
            reason,
            cycles,
            control: self.control,
        });
        let _ = events.send(OrchestratorEvent::Stopped { reason, cycles });
    }

    fn status(&self, text: impl Into<String>) {
        self.notify(OrchestratorEvent::Status(text.into()));
    }

    fn notify(&self, event: OrchestratorEvent) {
        let _ = self.events.send(event);
    }
}
