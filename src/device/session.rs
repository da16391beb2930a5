//! Device session actor.
//!
//! The session owns the active [`SerialChannel`], the platform identity, and
//! the connected flag. It runs as its own task; callers talk to it through a
//! clonable [`SessionHandle`]. Requests are processed in the order they were
//! sent, so commands keep their relative order on the wire.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures_util::StreamExt;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_stream::wrappers::{BroadcastStream, UnboundedReceiverStream};
use tracing::{debug, info, warn};

use super::platform::{Platform, PortCandidate, classify};
use crate::channel::{ChannelConfig, ChannelEvent, Command, Params, Response, SerialChannel};
use crate::error::ChannelError;
use crate::observability::metrics;
use crate::observability::{Event, EventEmitter};
use crate::orchestrator::DeviceLink;

/// Capacity of the session event broadcast.
const EVENT_CAPACITY: usize = 256;

/// Opens a channel on a named port.
///
/// The production implementation is [`SerialOpener`]; tests substitute
/// in-memory links.
#[async_trait]
pub trait PortOpener: Send + Sync + 'static {
    /// Opens `port` at `baud_rate` and returns a running channel.
    async fn open(&self, port: &str, baud_rate: u32) -> Result<SerialChannel, ChannelError>;
}

/// Opens real serial ports through `tokio-serial`.
#[derive(Debug)]
pub struct SerialOpener {
    config: ChannelConfig,
    emitter: Arc<EventEmitter>,
}

impl SerialOpener {
    /// Creates an opener using `config` for every port it opens.
    #[must_use]
    pub const fn new(config: ChannelConfig, emitter: Arc<EventEmitter>) -> Self {
        Self { config, emitter }
    }
}

#[async_trait]
impl PortOpener for SerialOpener {
    async fn open(&self, port: &str, baud_rate: u32) -> Result<SerialChannel, ChannelError> {
        SerialChannel::open(
            port,
            self.config.with_baud_rate(baud_rate),
            Arc::clone(&self.emitter),
        )
        .await
    }
}

/// Identity of the active connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkState {
    /// Classified platform, or `MANUAL`.
    pub platform: Platform,
    /// Port name.
    pub port: String,
}

/// Notifications published by the session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A channel was opened.
    Connected(LinkState),
    /// The device sent a record.
    Response(Response),
    /// The device sent an undecodable line; the link is still up.
    DecodeError(String),
    /// The link is gone. `requested` is `false` when it dropped on its own.
    Disconnected {
        /// Whether the operator asked for the disconnect.
        requested: bool,
    },
}

enum Request {
    DetectAndConnect {
        candidates: Vec<PortCandidate>,
        baud_rate: u32,
        reply: oneshot::Sender<bool>,
    },
    ConnectManual {
        port: String,
        baud_rate: u32,
        reply: oneshot::Sender<bool>,
    },
    Send(Command),
    Disconnect {
        reply: oneshot::Sender<()>,
    },
}

/// Clonable handle to a running [`DeviceSession`].
///
/// The session task stops once every handle is dropped.
#[derive(Clone)]
pub struct SessionHandle {
    requests: mpsc::UnboundedSender<Request>,
    state: watch::Receiver<Option<LinkState>>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionHandle {
    /// Returns the active link, if connected.
    #[must_use]
    pub fn link(&self) -> Option<LinkState> {
        self.state.borrow().clone()
    }

    /// Returns a receiver that observes connect/disconnect transitions.
    #[must_use]
    pub fn watch_link(&self) -> watch::Receiver<Option<LinkState>> {
        self.state.clone()
    }

    /// Subscribes to session events published from now on.
    #[must_use]
    pub fn subscribe(&self) -> BroadcastStream<SessionEvent> {
        BroadcastStream::new(self.events.subscribe())
    }

    /// Connects to the first candidate that classifies and opens.
    ///
    /// Candidates classified `UNKNOWN` are skipped. On success the platform
    /// is recorded and `IDENTIFY` is sent. Returns `false` when nothing
    /// connected.
    pub async fn detect_and_connect(&self, candidates: Vec<PortCandidate>, baud_rate: u32) -> bool {
        let (reply, rx) = oneshot::channel();
        self.call(
            Request::DetectAndConnect {
                candidates,
                baud_rate,
                reply,
            },
            rx,
        )
        .await
        .unwrap_or(false)
    }

    /// Connects to `port` without classification; the platform is `MANUAL`.
    pub async fn connect_manual(&self, port: impl Into<String>, baud_rate: u32) -> bool {
        let (reply, rx) = oneshot::channel();
        self.call(
            Request::ConnectManual {
                port: port.into(),
                baud_rate,
                reply,
            },
            rx,
        )
        .await
        .unwrap_or(false)
    }

    /// Closes the active channel. Safe to call when already disconnected.
    pub async fn disconnect(&self) {
        let (reply, rx) = oneshot::channel();
        let _ = self.call(Request::Disconnect { reply }, rx).await;
    }

    async fn call<T>(&self, request: Request, rx: oneshot::Receiver<T>) -> Option<T> {
        if self.requests.send(request).is_err() {
            warn!("device session has shut down");
            return None;
        }
        rx.await.ok()
    }
}

impl DeviceLink for SessionHandle {
    fn is_connected(&self) -> bool {
        self.state.borrow().is_some()
    }

    fn send(&self, command: &str, params: Params) {
        if self
            .requests
            .send(Request::Send(Command::with_params(command, params)))
            .is_err()
        {
            warn!(cmd = command, "device session has shut down, command dropped");
        }
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("link", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

/// The session task.
pub struct DeviceSession {
    opener: Arc<dyn PortOpener>,
    emitter: Arc<EventEmitter>,
    requests: mpsc::UnboundedReceiver<Request>,
    state: watch::Sender<Option<LinkState>>,
    events: broadcast::Sender<SessionEvent>,
    channel: Option<SerialChannel>,
    channel_events: Option<UnboundedReceiverStream<ChannelEvent>>,
}

impl DeviceSession {
    /// Spawns a disconnected session and returns its handle.
    #[must_use]
    pub fn spawn(opener: Arc<dyn PortOpener>, emitter: Arc<EventEmitter>) -> SessionHandle {
        let (requests_tx, requests_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(None);
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);

        let session = Self {
            opener,
            emitter,
            requests: requests_rx,
            state: state_tx,
            events: events_tx.clone(),
            channel: None,
            channel_events: None,
        };
        tokio::spawn(session.run());

        SessionHandle {
            requests: requests_tx,
            state: state_rx,
            events: events_tx,
        }
    }

    async fn run(mut self) {
        loop {
            tokio::select! {
                request = self.requests.recv() => match request {
                    Some(request) => self.handle(request).await,
                    None => break,
                },
                event = next_channel_event(self.channel_events.as_mut()) => {
                    self.on_channel_event(event).await;
                }
            }
        }
        self.close_channel(true).await;
        debug!("device session stopped");
    }

    async fn handle(&mut self, request: Request) {
        match request {
            Request::DetectAndConnect {
                candidates,
                baud_rate,
                reply,
            } => {
                let ok = self.detect_and_connect(candidates, baud_rate).await;
                let _ = reply.send(ok);
            }
            Request::ConnectManual {
                port,
                baud_rate,
                reply,
            } => {
                let ok = self.connect_manual(&port, baud_rate).await;
                let _ = reply.send(ok);
            }
            Request::Send(command) => self.send(command),
            Request::Disconnect { reply } => {
                self.close_channel(true).await;
                let _ = reply.send(());
            }
        }
    }

    async fn detect_and_connect(&mut self, candidates: Vec<PortCandidate>, baud_rate: u32) -> bool {
        info!(candidates = candidates.len(), "auto-connect started");
        if candidates.is_empty() {
            info!("no serial ports found");
            return false;
        }

        for candidate in candidates {
            let platform = classify(&candidate);
            if platform == Platform::Unknown {
                debug!(port = %candidate.name, description = %candidate.description, "skipping unrecognised port");
                continue;
            }

            match self.opener.open(&candidate.name, baud_rate).await {
                Ok(channel) => {
                    self.attach(channel, platform).await;
                    self.send(Command::new(Command::IDENTIFY));
                    return true;
                }
                Err(e) => {
                    warn!(port = %candidate.name, %platform, error = %e, "connection failed");
                }
            }
        }

        info!("no candidate port could be connected");
        false
    }

    async fn connect_manual(&mut self, port: &str, baud_rate: u32) -> bool {
        match self.opener.open(port, baud_rate).await {
            Ok(channel) => {
                self.attach(channel, Platform::Manual).await;
                true
            }
            Err(e) => {
                warn!(port, baud_rate, error = %e, "manual connection failed");
                false
            }
        }
    }

    async fn attach(&mut self, mut channel: SerialChannel, platform: Platform) {
        // Replacing a live link closes the old one first.
        self.close_channel(true).await;

        let link = LinkState {
            platform,
            port: channel.port().to_owned(),
        };
        self.channel_events = channel.take_events();
        self.channel = Some(channel);
        self.state.send_replace(Some(link.clone()));
        metrics::set_connected(true);

        info!(platform = %link.platform, port = %link.port, "device connected");
        self.emitter.emit(Event::Connected {
            timestamp: Utc::now(),
            platform: link.platform.to_string(),
            port: link.port.clone(),
        });
        let _ = self.events.send(SessionEvent::Connected(link));
    }

    fn send(&self, command: Command) {
        if let Some(channel) = &self.channel {
            debug!(%command, "command sent");
            metrics::record_command(&command.cmd);
            self.emitter.emit(Event::CommandSent {
                timestamp: Utc::now(),
                cmd: command.cmd.clone(),
                params: serde_json::Value::Object(command.params.clone()),
            });
            channel.enqueue(command);
        } else {
            warn!(cmd = %command.cmd, "command dropped: not connected");
            self.emitter.emit(Event::CommandFailed {
                timestamp: Utc::now(),
                cmd: command.cmd,
                reason: "not_connected".to_owned(),
            });
        }
    }

    async fn on_channel_event(&mut self, event: Option<ChannelEvent>) {
        match event {
            Some(ChannelEvent::Received(response)) => {
                let _ = self.events.send(SessionEvent::Response(response));
            }
            Some(ChannelEvent::DecodeError(reason)) => {
                debug!(%reason, "device sent an undecodable line");
                let _ = self.events.send(SessionEvent::DecodeError(reason));
            }
            Some(ChannelEvent::LinkError(reason)) => {
                warn!(%reason, "serial link failed");
                self.close_channel(false).await;
            }
            Some(ChannelEvent::Disconnected) | None => {
                self.close_channel(false).await;
            }
        }
    }

    /// Drops the active channel, if any, and publishes the disconnect.
    async fn close_channel(&mut self, requested: bool) {
        self.channel_events = None;
        let Some(mut channel) = self.channel.take() else {
            if requested {
                debug!("disconnect requested while not connected");
            }
            return;
        };

        channel.close().await;
        self.state.send_replace(None);
        metrics::set_connected(false);

        info!(port = %channel.port(), requested, "device disconnected");
        self.emitter.emit(Event::Disconnected {
            timestamp: Utc::now(),
            requested,
        });
        let _ = self.events.send(SessionEvent::Disconnected { requested });
    }
}

/// Waits for the next event of the active channel; pending forever when there
/// is none. `None` means the channel's stream ended.
async fn next_channel_event(
    stream: Option<&mut UnboundedReceiverStream<ChannelEvent>>,
) -> Option<ChannelEvent> {
    match stream {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}
