//! Metrics collection for `flasher`.
//!
//! Prometheus-compatible counters and gauges for commands, phases, and
//! link health, with label cardinality protection on command names.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::channel::Command;
use crate::error::FlasherError;

/// Guard to prevent double-initialization of the metrics recorder.
static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Command names that may appear as metric labels.
///
/// Anything else is bucketed as `"__unknown__"` so operator-typed command
/// names cannot grow the label set without bound.
const KNOWN_COMMANDS: [&str; 4] = [
    Command::IDENTIFY,
    Command::SET_GROUP,
    Command::DISARM,
    Command::ALL_OFF,
];

/// Sanitizes a command name for use as a metrics label.
#[must_use]
pub fn sanitize_command_label(cmd: &str) -> &str {
    if KNOWN_COMMANDS.contains(&cmd) {
        cmd
    } else {
        "__unknown__"
    }
}

/// Initializes the global metrics recorder.
///
/// When `port` is `Some`, a Prometheus HTTP listener is started on
/// `127.0.0.1:<port>`. When `None`, the recorder is installed without
/// an HTTP endpoint.
///
/// # Errors
///
/// Returns `FlasherError::Io` if the recorder or HTTP listener cannot be
/// installed (e.g. port already in use).
pub fn init_metrics(port: Option<u16>) -> Result<(), FlasherError> {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        tracing::debug!("metrics already initialized, skipping");
        return Ok(());
    }
    port.map_or_else(
        || PrometheusBuilder::new().install_recorder().map(|_| ()),
        |p| {
            PrometheusBuilder::new()
                .with_http_listener(([127, 0, 0, 1], p))
                .install()
        },
    )
    .map_err(|e| FlasherError::Io(std::io::Error::other(e.to_string())))?;

    describe_metrics();
    Ok(())
}

fn describe_metrics() {
    describe_counter!(
        "flasher_commands_total",
        "Commands enqueued to the device, by command name"
    );
    describe_counter!("flasher_phases_total", "Attack phases executed");
    describe_counter!(
        "flasher_decode_errors_total",
        "Inbound serial lines that failed to decode"
    );
    describe_counter!(
        "flasher_errors_total",
        "Total number of errors by category"
    );
    describe_histogram!(
        "flasher_phase_sleep_ms",
        "Jittered phase sleep in milliseconds"
    );
    describe_gauge!("flasher_running", "1 while attack cycling is running");
    describe_gauge!("flasher_connected", "1 while a device session is connected");
}

/// Records a command enqueued to the device.
pub fn record_command(cmd: &str) {
    let label = sanitize_command_label(cmd);
    counter!("flasher_commands_total", "cmd" => label.to_owned()).increment(1);
}

/// Records one executed phase and its jittered sleep.
pub fn record_phase(sleep: Duration) {
    counter!("flasher_phases_total").increment(1);
    histogram!("flasher_phase_sleep_ms").record(sleep.as_secs_f64() * 1000.0);
}

/// Records an inbound line that could not be decoded.
pub fn record_decode_error() {
    counter!("flasher_decode_errors_total").increment(1);
}

/// Records an error by category.
pub fn record_error(category: &'static str) {
    counter!("flasher_errors_total", "category" => category).increment(1);
}

/// Sets the running gauge.
pub fn set_running(running: bool) {
    gauge!("flasher_running").set(if running { 1.0 } else { 0.0 });
}

/// Sets the connected gauge.
pub fn set_connected(connected: bool) {
    gauge!("flasher_connected").set(if connected { 1.0 } else { 0.0 });
}
