//! Serial channel run loop.
//!
//! A [`SerialChannel`] owns one connection. Its loop drains the outbound
//! queue completely (FIFO, one newline-terminated record per command), then
//! forwards decoded inbound lines as [`ChannelEvent`]s. Link failure ends the
//! loop; reconnection belongs to the device session.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_serial::SerialPortBuilderExt;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    ChannelEvent, Command, DEFAULT_BAUD_RATE, DEFAULT_MAX_LINE_LENGTH, DEFAULT_SETTLE_DELAY,
    Inbound, JsonLineCodec,
};
use crate::error::ChannelError;
use crate::observability::metrics;
use crate::observability::{Event, EventEmitter};

/// Upper bound on writing queued commands while closing.
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_millis(500);

/// Serial link parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelConfig {
    /// Baud rate.
    pub baud_rate: u32,
    /// Delay after opening before the link is used.
    pub settle_delay: Duration,
    /// Longest accepted inbound line in bytes.
    pub max_line_length: usize,
}

impl ChannelConfig {
    /// Loads configuration from environment variables with defaults.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `FLASHER_BAUD_RATE` | 115200 |
    /// | `FLASHER_SETTLE_MS` | 2000 |
    /// | `FLASHER_MAX_LINE_LENGTH` | 64 KB |
    #[must_use]
    pub fn from_env() -> Self {
        let settle_ms = env_or(
            "FLASHER_SETTLE_MS",
            u64::try_from(DEFAULT_SETTLE_DELAY.as_millis()).unwrap_or(u64::MAX),
        );
        Self {
            baud_rate: env_or("FLASHER_BAUD_RATE", DEFAULT_BAUD_RATE),
            settle_delay: Duration::from_millis(settle_ms),
            max_line_length: env_or("FLASHER_MAX_LINE_LENGTH", DEFAULT_MAX_LINE_LENGTH),
        }
    }

    /// Returns a copy with a different baud rate.
    #[must_use]
    pub const fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            settle_delay: DEFAULT_SETTLE_DELAY,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
        }
    }
}

/// One open serial connection and its background read/write loop.
///
/// Dropping the channel stops the loop.
pub struct SerialChannel {
    port: String,
    outbound: mpsc::UnboundedSender<Command>,
    events: Option<mpsc::UnboundedReceiver<ChannelEvent>>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl SerialChannel {
    /// Opens `port` and starts the run loop once the settle delay has passed.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Open`] if the OS refuses the port.
    pub async fn open(
        port: &str,
        config: ChannelConfig,
        emitter: Arc<EventEmitter>,
    ) -> Result<Self, ChannelError> {
        let stream = tokio_serial::new(port, config.baud_rate)
            .open_native_async()
            .map_err(|e| ChannelError::Open {
                port: port.to_owned(),
                reason: e.to_string(),
            })?;

        debug!(port, settle_ms = ?config.settle_delay, "port open, waiting for device reset");
        tokio::time::sleep(config.settle_delay).await;

        Ok(Self::spawn(port, stream, config, emitter))
    }

    /// Starts the run loop over an already-connected byte stream.
    ///
    /// The settle delay is not applied. Used by [`open`](Self::open) and by
    /// callers that bring their own transport (e.g. an in-memory duplex).
    #[must_use]
    pub fn spawn<S>(
        port: impl Into<String>,
        io: S,
        config: ChannelConfig,
        emitter: Arc<EventEmitter>,
    ) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let port = port.into();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let worker = Worker {
            port: port.clone(),
            outbound: outbound_rx,
            events: events_tx,
            cancel: cancel.clone(),
            emitter,
        };
        let task = tokio::spawn(worker.run(io, config.max_line_length));

        info!(port = %port, baud = config.baud_rate, "serial channel ready");

        Self {
            port,
            outbound: outbound_tx,
            events: Some(events_rx),
            cancel,
            task: Some(task),
        }
    }

    /// Returns the port name this channel was opened on.
    #[must_use]
    pub fn port(&self) -> &str {
        &self.port
    }

    /// Appends a command to the outbound queue.
    ///
    /// Never blocks. Commands enqueued after the link has failed are dropped;
    /// the failure is visible on the event stream.
    pub fn enqueue(&self, command: Command) {
        if self.outbound.send(command).is_err() {
            debug!(port = %self.port, "channel loop gone, command dropped");
        }
    }

    /// Takes the event stream. Returns `None` after the first call.
    pub fn take_events(&mut self) -> Option<UnboundedReceiverStream<ChannelEvent>> {
        self.events.take().map(UnboundedReceiverStream::new)
    }

    /// Returns `true` once the run loop has exited.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.task.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Stops the run loop and releases the port. Safe to call repeatedly.
    pub async fn close(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(port = %self.port, error = %e, "serial loop ended abnormally");
            }
        }
    }
}

impl Drop for SerialChannel {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for SerialChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialChannel")
            .field("port", &self.port)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// State owned by the background loop.
struct Worker {
    port: String,
    outbound: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<ChannelEvent>,
    cancel: CancellationToken,
    emitter: Arc<EventEmitter>,
}

impl Worker {
    async fn run<S>(mut self, io: S, max_line_length: usize)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(io);
        let mut reader = FramedRead::new(reader, JsonLineCodec::with_max_length(max_line_length));
        let mut writer = FramedWrite::new(writer, JsonLineCodec::with_max_length(max_line_length));

        self.emitter.emit(Event::SerialOpened {
            timestamp: Utc::now(),
            port: self.port.clone(),
        });

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    self.flush_pending(&mut writer).await;
                    break;
                }
                Some(first) = self.outbound.recv() => {
                    if let Err(e) = self.drain_outbound(first, &mut writer).await {
                        self.link_error(e.to_string());
                        break;
                    }
                }
                frame = reader.next() => match frame {
                    Some(Ok(Inbound::Record(response))) => {
                        debug!(port = %self.port, ?response, "serial read");
                        self.emitter.emit(Event::SerialRead {
                            timestamp: Utc::now(),
                            record: serde_json::Value::Object(response.clone()),
                        });
                        self.publish(ChannelEvent::Received(response));
                    }
                    Some(Ok(Inbound::Malformed(reason))) => {
                        warn!(port = %self.port, %reason, "undecodable line from device");
                        metrics::record_decode_error();
                        self.emitter.emit(Event::SerialError {
                            timestamp: Utc::now(),
                            error: format!("parse error: {reason}"),
                        });
                        self.publish(ChannelEvent::DecodeError(reason));
                    }
                    Some(Err(e)) => {
                        self.link_error(e.to_string());
                        break;
                    }
                    None => {
                        info!(port = %self.port, "device closed the link");
                        self.publish(ChannelEvent::Disconnected);
                        break;
                    }
                },
            }
        }

        self.emitter.emit(Event::SerialClosed {
            timestamp: Utc::now(),
            port: self.port.clone(),
        });
        debug!(port = %self.port, "serial loop exited");
    }

    /// Writes `first` and everything queued behind it, then flushes once.
    async fn drain_outbound<W>(
        &mut self,
        first: Command,
        writer: &mut FramedWrite<W, JsonLineCodec>,
    ) -> Result<(), ChannelError>
    where
        W: AsyncWrite + Unpin,
    {
        let mut next = Some(first);
        while let Some(command) = next {
            debug!(port = %self.port, %command, "serial write");
            self.emitter.emit(Event::SerialWrite {
                timestamp: Utc::now(),
                record: command.to_value(),
            });
            writer.feed(command).await?;
            next = self.outbound.try_recv().ok();
        }
        writer.flush().await
    }

    /// Writes whatever is still queued when the channel is closed, so a
    /// final `ALL_OFF` enqueued just before `close` still reaches the wire.
    async fn flush_pending<W>(&mut self, writer: &mut FramedWrite<W, JsonLineCodec>)
    where
        W: AsyncWrite + Unpin,
    {
        let Ok(first) = self.outbound.try_recv() else {
            return;
        };
        match tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, self.drain_outbound(first, writer)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(port = %self.port, error = %e, "flush on close failed"),
            Err(_) => debug!(port = %self.port, "flush on close timed out"),
        }
    }

    fn link_error(&self, reason: String) {
        warn!(port = %self.port, %reason, "serial link error");
        metrics::record_error("link");
        self.emitter.emit(Event::SerialError {
            timestamp: Utc::now(),
            error: format!("serial error: {reason}"),
        });
        self.publish(ChannelEvent::LinkError(reason));
    }

    fn publish(&self, event: ChannelEvent) {
        // Receiver dropped means nobody is listening any more.
        let _ = self.events.send(event);
    }
}

/// Reads an environment variable, parsing it to type `T`, or returns the default.
///
/// Logs a warning if the variable is set but cannot be parsed.
fn env_or<T: FromStr>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(v) => v.parse().unwrap_or_else(|_| {
            warn!(name, value = %v, "invalid env var value, using default");
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(2);

    fn channel() -> (SerialChannel, DuplexStream) {
        let (host, device) = tokio::io::duplex(4096);
        let channel = SerialChannel::spawn(
            "test0",
            host,
            ChannelConfig::default(),
            Arc::new(EventEmitter::noop()),
        );
        (channel, device)
    }

    #[test]
    fn config_default() {
        let config = ChannelConfig::default();
        assert_eq!(config.baud_rate, 115_200);
        assert_eq!(config.settle_delay, Duration::from_secs(2));
        assert_eq!(config.max_line_length, DEFAULT_MAX_LINE_LENGTH);
        assert_eq!(config.with_baud_rate(9600).baud_rate, 9600);
    }

    #[test]
    fn env_or_default() {
        let result: usize = env_or("FLASHER_TEST_NONEXISTENT_VAR_12345", 42);
        assert_eq!(result, 42);
    }

    #[tokio::test]
    async fn commands_are_written_in_enqueue_order() {
        let (channel, device) = channel();
        channel.enqueue(Command::new(Command::IDENTIFY));
        channel.enqueue(Command::set_group(2, 128));
        channel.enqueue(Command::new(Command::ALL_OFF));

        let mut lines = BufReader::new(device).lines();
        let mut names = Vec::new();
        for _ in 0..3 {
            let line = timeout(WAIT, lines.next_line()).await.unwrap().unwrap().unwrap();
            let record: serde_json::Value = serde_json::from_str(&line).unwrap();
            names.push(record["cmd"].as_str().unwrap().to_owned());
        }
        assert_eq!(names, ["IDENTIFY", "SET_GROUP", "ALL_OFF"]);
    }

    #[tokio::test]
    async fn inbound_records_are_forwarded() {
        let (mut channel, mut device) = channel();
        let mut events = channel.take_events().unwrap();
        assert!(channel.take_events().is_none());

        device.write_all(b"{\"platform\":\"PICO\"}\n").await.unwrap();
        let event = timeout(WAIT, events.next()).await.unwrap().unwrap();
        match event {
            ChannelEvent::Received(map) => assert_eq!(map["platform"], "PICO"),
            other => panic!("expected Received, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn decode_error_keeps_channel_open() {
        let (mut channel, mut device) = channel();
        let mut events = channel.take_events().unwrap();

        device.write_all(b"{broken\n{\"ok\":1}\n").await.unwrap();

        let first = timeout(WAIT, events.next()).await.unwrap().unwrap();
        assert!(matches!(first, ChannelEvent::DecodeError(_)), "got {first:?}");
        let second = timeout(WAIT, events.next()).await.unwrap().unwrap();
        assert!(matches!(second, ChannelEvent::Received(_)), "got {second:?}");
        assert!(!channel.is_closed());
    }

    #[tokio::test]
    async fn device_hangup_emits_disconnected_and_ends_stream() {
        let (mut channel, device) = channel();
        let mut events = channel.take_events().unwrap();
        drop(device);

        let event = timeout(WAIT, events.next()).await.unwrap().unwrap();
        assert_eq!(event, ChannelEvent::Disconnected);
        assert!(timeout(WAIT, events.next()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn scripted_identify_exchange() {
        let io = tokio_test::io::Builder::new()
            .write(b"{\"cmd\":\"IDENTIFY\",\"params\":{}}\n")
            .read(b"{\"platform\":\"ESP32\"}\n")
            .build();
        let mut channel = SerialChannel::spawn(
            "mock0",
            io,
            ChannelConfig::default(),
            Arc::new(EventEmitter::noop()),
        );
        let mut events = channel.take_events().unwrap();
        channel.enqueue(Command::new(Command::IDENTIFY));

        let reply = timeout(WAIT, events.next()).await.unwrap().unwrap();
        match reply {
            ChannelEvent::Received(map) => assert_eq!(map["platform"], "ESP32"),
            other => panic!("expected Received, got {other:?}"),
        }
        // Script exhausted: the mock reports EOF.
        let last = timeout(WAIT, events.next()).await.unwrap().unwrap();
        assert_eq!(last, ChannelEvent::Disconnected);
    }

    #[tokio::test]
    async fn read_failure_is_a_link_error_and_ends_stream() {
        let io = tokio_test::io::Builder::new()
            .read_error(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "cable pulled"))
            .build();
        let mut channel = SerialChannel::spawn(
            "mock1",
            io,
            ChannelConfig::default(),
            Arc::new(EventEmitter::noop()),
        );
        let mut events = channel.take_events().unwrap();

        let event = timeout(WAIT, events.next()).await.unwrap().unwrap();
        match event {
            ChannelEvent::LinkError(reason) => assert!(reason.contains("cable pulled"), "{reason}"),
            other => panic!("expected LinkError, got {other:?}"),
        }
        assert!(timeout(WAIT, events.next()).await.unwrap().is_none());
        channel.close().await;
        assert!(channel.is_closed());
    }

    #[tokio::test]
    async fn close_is_idempotent_and_enqueue_after_close_is_silent() {
        let (mut channel, _device) = channel();
        channel.close().await;
        assert!(channel.is_closed());
        channel.close().await;
        channel.enqueue(Command::new(Command::ALL_OFF));
    }

    #[tokio::test]
    async fn close_flushes_queued_commands() {
        let (mut channel, device) = channel();
        channel.enqueue(Command::new(Command::ALL_OFF));
        channel.close().await;

        let mut lines = BufReader::new(device).lines();
        let line = timeout(WAIT, lines.next_line()).await.unwrap().unwrap().unwrap();
        assert_eq!(line, r#"{"cmd":"ALL_OFF","params":{}}"#);
    }

    #[tokio::test]
    async fn close_ends_event_stream() {
        let (mut channel, _device) = channel();
        let mut events = channel.take_events().unwrap();
        channel.close().await;
        assert!(timeout(WAIT, events.next()).await.unwrap().is_none());
    }
}
