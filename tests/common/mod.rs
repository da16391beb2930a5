//! Shared integration-test harness: running the `flasher` binary, and an
//! in-memory device that speaks the line-JSON protocol over a duplex pipe.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::{Command as ProcessCommand, Output, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{
    AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines, ReadHalf, WriteHalf,
};

use flasher::channel::{ChannelConfig, Command, SerialChannel};
use flasher::device::PortOpener;
use flasher::error::ChannelError;
use flasher::observability::EventEmitter;

/// Default timeout for reading a single command from the host.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Path to a file under `tests/fixtures`.
#[must_use]
pub fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

// ============================================================================
// CLI process
// ============================================================================

/// Runs the `flasher` binary to completion.
pub struct FlasherProcess;

impl FlasherProcess {
    /// Runs `flasher <args>` with stdin closed and returns its output.
    #[allow(clippy::missing_panics_doc)]
    #[must_use]
    pub fn spawn_command(args: &[&str]) -> Output {
        Self::spawn_command_with_env(args, &[])
    }

    /// Like [`spawn_command`](Self::spawn_command) with extra environment.
    #[allow(clippy::missing_panics_doc)]
    #[must_use]
    pub fn spawn_command_with_env(args: &[&str], env: &[(&str, &str)]) -> Output {
        let bin = env!("CARGO_BIN_EXE_flasher");
        let mut cmd = ProcessCommand::new(bin);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .env_remove("FLASHER_LOG_LEVEL")
            .env_remove("FLASHER_PATTERNS_DIR")
            .env_remove("FLASHER_PORT")
            .env_remove("FLASHER_CONFIG");
        for (key, value) in env {
            cmd.env(key, value);
        }
        cmd.output().expect("failed to run flasher")
    }
}

/// Returns stdout as a string.
#[must_use]
pub fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

/// Returns stderr as a string.
#[must_use]
pub fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

// ============================================================================
// In-memory device
// ============================================================================

/// Device end of an in-memory link.
pub struct FakeDevice {
    lines: Lines<BufReader<ReadHalf<DuplexStream>>>,
    writer: WriteHalf<DuplexStream>,
}

impl FakeDevice {
    /// Reads the next command the host wrote.
    ///
    /// Panics on EOF, bad JSON, or if nothing arrives within `timeout`.
    #[allow(clippy::missing_panics_doc)]
    pub async fn next_command_timeout(&mut self, timeout: Duration) -> Command {
        let line = tokio::time::timeout(timeout, self.lines.next_line())
            .await
            .expect("timed out waiting for command from host")
            .expect("read_line I/O error")
            .expect("host closed the link");
        serde_json::from_str(&line)
            .unwrap_or_else(|e| panic!("invalid command from host: {e}\nline: {line}"))
    }

    /// Reads the next command with [`DEFAULT_TIMEOUT`].
    pub async fn next_command(&mut self) -> Command {
        self.next_command_timeout(DEFAULT_TIMEOUT).await
    }

    /// Reads commands until the host closes the link.
    pub async fn drain(&mut self) -> Vec<Command> {
        let mut commands = Vec::new();
        while let Ok(Ok(Some(line))) =
            tokio::time::timeout(DEFAULT_TIMEOUT, self.lines.next_line()).await
        {
            if let Ok(command) = serde_json::from_str(&line) {
                commands.push(command);
            }
        }
        commands
    }

    /// Writes one record to the host.
    #[allow(clippy::missing_panics_doc)]
    pub async fn reply(&mut self, record: &Value) {
        let mut line = serde_json::to_string(record).expect("serialize record");
        line.push('\n');
        self.writer
            .write_all(line.as_bytes())
            .await
            .expect("write to host");
    }

    /// Writes a raw line to the host.
    #[allow(clippy::missing_panics_doc)]
    pub async fn reply_raw(&mut self, line: &str) {
        self.writer
            .write_all(format!("{line}\n").as_bytes())
            .await
            .expect("write to host");
    }
}

/// Opens in-memory links for the listed ports and refuses every other one.
#[derive(Default)]
pub struct MemoryOpener {
    accept: Vec<String>,
    devices: Mutex<HashMap<String, FakeDevice>>,
}

impl MemoryOpener {
    /// Creates an opener that accepts exactly `ports`.
    #[must_use]
    pub fn accepting(ports: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            accept: ports.iter().map(|p| (*p).to_owned()).collect(),
            ..Self::default()
        })
    }

    /// Takes the device end for `port`. Panics if it was never opened.
    #[allow(clippy::missing_panics_doc)]
    #[must_use]
    pub fn device(&self, port: &str) -> FakeDevice {
        self.devices
            .lock()
            .unwrap()
            .remove(port)
            .expect("port never opened")
    }
}

#[async_trait]
impl PortOpener for MemoryOpener {
    async fn open(&self, port: &str, _baud_rate: u32) -> Result<SerialChannel, ChannelError> {
        if !self.accept.iter().any(|p| p == port) {
            return Err(ChannelError::Open {
                port: port.to_owned(),
                reason: "no such device".to_owned(),
            });
        }
        let (host, device) = tokio::io::duplex(64 * 1024);
        let (read, writer) = tokio::io::split(device);
        self.devices.lock().unwrap().insert(
            port.to_owned(),
            FakeDevice {
                lines: BufReader::new(read).lines(),
                writer,
            },
        );
        Ok(SerialChannel::spawn(
            port,
            host,
            ChannelConfig::default(),
            Arc::new(EventEmitter::noop()),
        ))
    }
}
