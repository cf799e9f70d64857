//! Client sessions.
//!
//! A session owns one [`Connection`] and runs two duties on separate tasks:
//!
//! - the inbound duty reads bytes, splits them into JSON lines and publishes a
//!   [`SessionEvent`] per line;
//! - the outbound duty emits commands according to an [`OutboundPlan`].
//!
//! The duties share nothing but the connection, a few counters and an atomic
//! state cell. Whichever duty first sees the connection fail moves the session
//! to `Terminating`, closes the connection (waking the other duty) and records
//! the reason. Sessions are single-use.

use crate::connection::{Connection, ConnectionConfig};
use crate::error::ClientError;
use jnova_protocol::{Command, Encoder, Inbound, LineBuffer};
use parking_lot::Mutex;
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::Instrument;
use uuid::Uuid;

/// Default interval between keep-alive pings.
pub const DEFAULT_KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(10);

/// Default capacity for the session event channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// What the outbound duty sends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundPlan {
    /// One `PING` every `interval` until the session ends.
    KeepAlive { interval: Duration },
    /// `count` `PING`s with `interval` between them, then nothing.
    Burst { count: u64, interval: Duration },
    /// One `BROADCAST`, then keep-alive pings every `keep_alive`.
    Broadcast {
        sender: String,
        content: String,
        keep_alive: Duration,
    },
    /// No outbound traffic.
    Idle,
}

impl Default for OutboundPlan {
    fn default() -> Self {
        OutboundPlan::KeepAlive {
            interval: DEFAULT_KEEP_ALIVE_INTERVAL,
        }
    }
}

/// Session configuration.
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    pub connection: ConnectionConfig,
    pub outbound: OutboundPlan,
    /// Capacity of the event channel; slow subscribers lag past this.
    pub event_capacity: Option<usize>,
}

impl SessionConfig {
    pub fn new(connection: ConnectionConfig) -> Self {
        Self {
            connection,
            outbound: OutboundPlan::default(),
            event_capacity: None,
        }
    }

    pub fn with_outbound(mut self, outbound: OutboundPlan) -> Self {
        self.outbound = outbound;
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = Some(capacity.max(1));
        self
    }
}

/// Session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Disconnected = 0,
    Connected = 1,
    Terminating = 2,
    Closed = 3,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::Disconnected,
            1 => SessionState::Connected,
            2 => SessionState::Terminating,
            _ => SessionState::Closed,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Disconnected => write!(f, "disconnected"),
            SessionState::Connected => write!(f, "connected"),
            SessionState::Terminating => write!(f, "terminating"),
            SessionState::Closed => write!(f, "closed"),
        }
    }
}

/// Atomic holder for a [`SessionState`].
struct StateCell(AtomicU8);

impl StateCell {
    fn new() -> Self {
        Self(AtomicU8::new(SessionState::Disconnected as u8))
    }

    fn load(&self) -> SessionState {
        SessionState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn store(&self, state: SessionState) {
        self.0.store(state as u8, Ordering::Release);
    }

    /// Moves from `from` to `to`; false if the cell held another state.
    fn transition(&self, from: SessionState, to: SessionState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Why a session stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationReason {
    /// The server closed the connection.
    PeerClosed,
    /// Reading from the connection failed.
    ReceiveFailed(String),
    /// Writing to the connection failed.
    SendFailed(String),
    /// The owner closed the session.
    Requested,
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationReason::PeerClosed => write!(f, "server closed connection"),
            TerminationReason::ReceiveFailed(e) => write!(f, "receive error: {}", e),
            TerminationReason::SendFailed(e) => write!(f, "send error: {}", e),
            TerminationReason::Requested => write!(f, "closed by client"),
        }
    }
}

/// Events published by a running session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A JSON frame from the server.
    Message(Value),
    /// A frame that did not parse; the session keeps running.
    InvalidMessage { line: String, reason: String },
    /// A burst finished sending.
    OutboundFinished { sent: u64 },
    /// The session stopped.
    Terminated(TerminationReason),
}

/// Counters and outcome of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub id: Uuid,
    /// Commands fully written to the connection.
    pub sent: u64,
    /// Commands whose write failed.
    pub send_failures: u64,
    /// Frames that parsed as JSON.
    pub received: u64,
    /// Frames that did not.
    pub invalid: u64,
    pub reason: Option<TerminationReason>,
}

#[derive(Default)]
struct Counters {
    sent: AtomicU64,
    send_failures: AtomicU64,
    received: AtomicU64,
    invalid: AtomicU64,
}

/// State shared by the session handle and both duties.
struct Shared {
    id: Uuid,
    state: StateCell,
    connection: Connection,
    events: broadcast::Sender<SessionEvent>,
    counters: Counters,
    reason: Mutex<Option<TerminationReason>>,
}

impl Shared {
    fn is_running(&self) -> bool {
        self.state.load() == SessionState::Connected
    }

    fn publish(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Moves the session to `Terminating`, closes the connection, then marks
    /// it `Closed`. Only the first caller does anything.
    async fn terminate(&self, reason: TerminationReason) {
        if !self
            .state
            .transition(SessionState::Connected, SessionState::Terminating)
        {
            return;
        }

        match &reason {
            TerminationReason::PeerClosed | TerminationReason::Requested => {
                tracing::info!("Session terminating: {}", reason)
            }
            _ => tracing::warn!("Session terminating: {}", reason),
        }
        *self.reason.lock() = Some(reason.clone());

        self.connection.close().await;
        self.state.store(SessionState::Closed);
        self.publish(SessionEvent::Terminated(reason));
    }

    async fn send(&self, command: &Command) -> Result<(), ClientError> {
        if !self.is_running() {
            return Err(ClientError::NotConnected);
        }

        let line = Encoder::encode_command(command)?;
        match self.connection.send_all(&line).await {
            Ok(()) => {
                self.counters.sent.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Sent {}", command);
                Ok(())
            }
            Err(e) => {
                if self.is_running() {
                    self.counters.send_failures.fetch_add(1, Ordering::Relaxed);
                    self.terminate(TerminationReason::SendFailed(e.to_string()))
                        .await;
                }
                Err(e)
            }
        }
    }

    /// Waits for `interval`; false if the session stopped meanwhile.
    async fn pause(&self, interval: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(interval) => self.is_running(),
            _ = self.connection.closed() => false,
        }
    }

    fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id,
            sent: self.counters.sent.load(Ordering::Relaxed),
            send_failures: self.counters.send_failures.load(Ordering::Relaxed),
            received: self.counters.received.load(Ordering::Relaxed),
            invalid: self.counters.invalid.load(Ordering::Relaxed),
            reason: self.reason.lock().clone(),
        }
    }
}

/// A single-use client session.
pub struct Session {
    outbound: OutboundPlan,
    shared: Arc<Shared>,
    started: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Session {
    /// Creates a new session (not yet connected).
    pub fn new(config: SessionConfig) -> Self {
        // broadcast::channel panics on zero
        let capacity = config
            .event_capacity
            .unwrap_or(EVENT_CHANNEL_CAPACITY)
            .max(1);
        let (events, _) = broadcast::channel(capacity);
        Self {
            outbound: config.outbound,
            shared: Arc::new(Shared {
                id: Uuid::new_v4(),
                state: StateCell::new(),
                connection: Connection::new(config.connection),
                events,
                counters: Counters::default(),
                reason: Mutex::new(None),
            }),
            started: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    pub fn state(&self) -> SessionState {
        self.shared.state.load()
    }

    /// Returns whether both duties are still allowed to run.
    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    /// Subscribes to session events.
    ///
    /// Subscribe before [`start`](Self::start) to see every event.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events.subscribe()
    }

    /// Connects and starts the inbound and outbound duties.
    pub async fn start(&self) -> Result<(), ClientError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(ClientError::AlreadyStarted);
        }

        let span = tracing::info_span!("session", id = %self.shared.id);
        self.shared
            .connection
            .connect()
            .instrument(span.clone())
            .await?;

        if !self
            .shared
            .state
            .transition(SessionState::Disconnected, SessionState::Connected)
        {
            // Closed while connecting
            self.shared.connection.close().await;
            return Err(ClientError::ConnectionClosed);
        }
        span.in_scope(|| {
            tracing::info!(
                "Connected to {}",
                self.shared.connection.config().addr()
            )
        });

        let inbound = tokio::spawn(run_inbound(self.shared.clone()).instrument(span.clone()));
        let outbound =
            tokio::spawn(run_outbound(self.shared.clone(), self.outbound.clone()).instrument(span));
        self.tasks.lock().extend([inbound, outbound]);

        Ok(())
    }

    /// Sends one command outside the outbound plan.
    pub async fn send(&self, command: &Command) -> Result<(), ClientError> {
        self.shared.send(command).await
    }

    /// Closes the session. Both duties stop at their next I/O wait.
    pub async fn close(&self) {
        if self.shared.state.load() == SessionState::Disconnected {
            // Never connected; make a racing start fail instead
            self.shared.state.store(SessionState::Closed);
            return;
        }
        self.shared.terminate(TerminationReason::Requested).await;
    }

    /// Waits for both duties to finish and returns the summary.
    ///
    /// The inbound duty runs until the session terminates, so this returns
    /// only after the server closes, an I/O error, or [`close`](Self::close).
    pub async fn wait(&self) -> SessionSummary {
        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                tracing::error!("Session duty panicked: {}", e);
            }
        }
        self.shared.summary()
    }

    /// Returns the current counters without waiting.
    pub fn summary(&self) -> SessionSummary {
        self.shared.summary()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
    }
}

async fn run_inbound(shared: Arc<Shared>) {
    let mut buf = vec![0u8; shared.connection.config().read_buffer_size];
    let mut lines = LineBuffer::new();

    while shared.is_running() {
        let n = match shared.connection.receive(&mut buf).await {
            Ok(n) => n,
            Err(e) if e.is_orderly_close() => {
                shared.terminate(TerminationReason::PeerClosed).await;
                break;
            }
            Err(e) => {
                shared
                    .terminate(TerminationReason::ReceiveFailed(e.to_string()))
                    .await;
                break;
            }
        };

        lines.extend(&buf[..n]);
        loop {
            match lines.next_message() {
                Ok(Some(Inbound::Message(value))) => {
                    shared.counters.received.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!("Received: {}", value);
                    shared.publish(SessionEvent::Message(value));
                }
                Ok(Some(Inbound::Invalid { line, reason })) => {
                    shared.counters.invalid.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!("Invalid JSON received: {} ({})", line, reason);
                    shared.publish(SessionEvent::InvalidMessage { line, reason });
                }
                Ok(None) => break,
                Err(e) => {
                    shared
                        .terminate(TerminationReason::ReceiveFailed(e.to_string()))
                        .await;
                    return;
                }
            }
        }
    }

    tracing::debug!("Inbound duty stopped");
}

async fn run_outbound(shared: Arc<Shared>, plan: OutboundPlan) {
    match plan {
        OutboundPlan::KeepAlive { interval } => keep_alive(&shared, interval).await,
        OutboundPlan::Burst { count, interval } => {
            tracing::info!("Sending {} PING commands every {:?}", count, interval);
            let mut sent = 0;
            for i in 0..count {
                if i > 0 && !shared.pause(interval).await {
                    break;
                }
                if shared.send(&Command::ping()).await.is_err() {
                    break;
                }
                sent += 1;
            }
            tracing::info!("Finished sending {} of {} pings", sent, count);
            shared.publish(SessionEvent::OutboundFinished { sent });
        }
        OutboundPlan::Broadcast {
            sender,
            content,
            keep_alive: interval,
        } => {
            if shared
                .send(&Command::broadcast(sender, content))
                .await
                .is_ok()
                && shared.pause(interval).await
            {
                keep_alive(&shared, interval).await;
            }
        }
        OutboundPlan::Idle => {}
    }

    tracing::debug!("Outbound duty stopped");
}

async fn keep_alive(shared: &Shared, interval: Duration) {
    loop {
        if shared.send(&Command::ping()).await.is_err() {
            break;
        }
        if !shared.pause(interval).await {
            break;
        }
    }
}
