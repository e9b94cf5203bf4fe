//! Stream subscription manager.
//!
//! Owns one multiplexed streaming connection: tracks desired vs active
//! subscriptions, reconnects with exponential backoff, re-subscribes in
//! chunks on reconnect, and enforces a liveness deadline so silently dead
//! connections are torn down even when the transport reports itself open.

pub mod protocol;
pub mod transport;

use crate::{
    backoff::ExponentialBackoff,
    error::{EngineError, StreamError},
    market::BarUpdate,
    subscription::{DesiredSubscriptions, StreamKey},
};
use protocol::{ControlFrame, InboundFrame, Method, parse_frame};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use transport::{InboundMessage, StreamSink, StreamSource, StreamTransport};
use tracing::{debug, error, info, warn};

/// Connection lifecycle state, surfaced to the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    /// Terminal: reconnect attempts exhausted. Not retried further.
    Failed,
}

/// Commands accepted by the manager.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamCommand {
    /// Register interest; newly desired keys are subscribed immediately.
    Subscribe(Vec<StreamKey>),
    /// Release interest. Lazy: no UNSUBSCRIBE frame is sent - the key just
    /// leaves the desired set and is not re-subscribed after a reconnect.
    Unsubscribe(Vec<StreamKey>),
    /// Forced reconciliation: replace the desired set, sending UNSUBSCRIBE
    /// for stale keys and SUBSCRIBE for the full new set.
    Resync { desired: Vec<StreamKey> },
    Shutdown,
}

/// Events emitted to the engine's processing loop.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Bar(BarUpdate),
    State(ConnectionState),
}

/// Stream manager tuning.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Ping cadence; the liveness deadline is twice this.
    pub heartbeat_interval: Duration,
    pub reconnect_backoff: ExponentialBackoff,
    pub max_reconnect_attempts: u32,
    /// Stream keys per SUBSCRIBE frame, so a large desired set does not
    /// flood the connection in one message.
    pub subscribe_chunk_size: usize,
    pub subscribe_chunk_delay: Duration,
    pub event_buffer: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            reconnect_backoff: ExponentialBackoff::new(
                Duration::from_secs(1),
                Duration::from_secs(30),
            ),
            max_reconnect_attempts: 10,
            subscribe_chunk_size: 50,
            subscribe_chunk_delay: Duration::from_millis(100),
            event_buffer: 2048,
        }
    }
}

impl StreamConfig {
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_reconnect_backoff(mut self, backoff: ExponentialBackoff) -> Self {
        self.reconnect_backoff = backoff;
        self
    }

    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    pub fn with_subscribe_chunk_size(mut self, size: usize) -> Self {
        self.subscribe_chunk_size = size;
        self
    }

    fn liveness_deadline(&self) -> Duration {
        self.heartbeat_interval * 2
    }
}

/// Command-side handle to a spawned manager task.
#[derive(Debug, Clone)]
pub struct StreamManagerHandle {
    cmd_tx: mpsc::Sender<StreamCommand>,
}

impl StreamManagerHandle {
    pub async fn subscribe(&self, keys: Vec<StreamKey>) -> Result<(), EngineError> {
        self.send(StreamCommand::Subscribe(keys)).await
    }

    pub async fn unsubscribe(&self, keys: Vec<StreamKey>) -> Result<(), EngineError> {
        self.send(StreamCommand::Unsubscribe(keys)).await
    }

    pub async fn resync(&self, desired: Vec<StreamKey>) -> Result<(), EngineError> {
        self.send(StreamCommand::Resync { desired }).await
    }

    pub async fn shutdown(&self) -> Result<(), EngineError> {
        self.send(StreamCommand::Shutdown).await
    }

    async fn send(&self, command: StreamCommand) -> Result<(), EngineError> {
        self.cmd_tx
            .send(command)
            .await
            .map_err(|_| EngineError::Terminated)
    }
}

/// Spawn the manager task. Events arrive on the returned receiver; the
/// manager stays disconnected until something is subscribed.
pub fn spawn(
    transport: Box<dyn StreamTransport>,
    config: StreamConfig,
) -> (StreamManagerHandle, mpsc::Receiver<StreamEvent>) {
    let (cmd_tx, cmd_rx) = mpsc::channel(64);
    let (event_tx, event_rx) = mpsc::channel(config.event_buffer.max(1));

    tokio::spawn(run_stream_manager(transport, config, cmd_rx, event_tx));

    (StreamManagerHandle { cmd_tx }, event_rx)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Disconnected,
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CommandOutcome {
    Continue,
    Shutdown,
}

async fn run_stream_manager(
    mut transport: Box<dyn StreamTransport>,
    config: StreamConfig,
    mut cmd_rx: mpsc::Receiver<StreamCommand>,
    event_tx: mpsc::Sender<StreamEvent>,
) {
    let mut desired = DesiredSubscriptions::default();
    let mut frame_id: u64 = 0;
    let mut attempt: u32 = 0;

    loop {
        // Nothing desired: idle offline until told otherwise.
        while desired.is_empty() {
            attempt = 0;
            match cmd_rx.recv().await {
                Some(command) => {
                    if apply_offline(command, &mut desired) == CommandOutcome::Shutdown {
                        return;
                    }
                }
                None => return,
            }
        }

        let connecting = if attempt == 0 {
            ConnectionState::Connecting
        } else {
            ConnectionState::Reconnecting
        };
        if !set_state(&event_tx, connecting).await {
            return;
        }

        match transport.connect().await {
            Ok((mut sink, mut source)) => {
                if !set_state(&event_tx, ConnectionState::Connected).await {
                    return;
                }
                attempt = 0;

                let keys = desired.keys();
                info!(subscriptions = keys.len(), "stream connected, re-subscribing");
                let flow = match send_control_chunks(
                    sink.as_mut(),
                    Method::Subscribe,
                    &keys,
                    &config,
                    &mut frame_id,
                )
                .await
                {
                    Ok(()) => {
                        read_loop(
                            &config,
                            sink.as_mut(),
                            source.as_mut(),
                            &mut cmd_rx,
                            &mut desired,
                            &event_tx,
                            &mut frame_id,
                        )
                        .await
                    }
                    Err(error) => {
                        warn!(%error, "re-subscription failed");
                        Flow::Disconnected
                    }
                };

                if flow == Flow::Shutdown {
                    let _ = set_state(&event_tx, ConnectionState::Disconnected).await;
                    return;
                }
            }
            Err(error) => warn!(%error, "stream connect failed"),
        }

        if desired.is_empty() {
            // Everything was released while the connection was down; no
            // reason to reconnect.
            let _ = set_state(&event_tx, ConnectionState::Disconnected).await;
            continue;
        }

        attempt += 1;
        if attempt > config.max_reconnect_attempts {
            error!(
                attempts = attempt - 1,
                "reconnect attempts exhausted, stream failed"
            );
            let _ = set_state(&event_tx, ConnectionState::Failed).await;
            return;
        }

        let delay = config.reconnect_backoff.delay(attempt);
        info!(attempt, ?delay, "scheduling stream reconnect");
        if wait_for_reconnect(delay, &mut cmd_rx, &mut desired).await == CommandOutcome::Shutdown {
            return;
        }
    }
}

/// Read/write session over one live connection.
async fn read_loop(
    config: &StreamConfig,
    sink: &mut dyn StreamSink,
    source: &mut dyn StreamSource,
    cmd_rx: &mut mpsc::Receiver<StreamCommand>,
    desired: &mut DesiredSubscriptions,
    event_tx: &mpsc::Sender<StreamEvent>,
    frame_id: &mut u64,
) -> Flow {
    let liveness = config.liveness_deadline();
    let mut ping_timer = tokio::time::interval_at(
        Instant::now() + config.heartbeat_interval,
        config.heartbeat_interval,
    );
    let deadline = tokio::time::sleep(liveness);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            message = source.next_message() => match message {
                Some(Ok(message)) => {
                    // Any inbound traffic proves the connection is alive.
                    deadline.as_mut().reset(Instant::now() + liveness);
                    if !handle_message(message, event_tx).await {
                        return Flow::Shutdown;
                    }
                }
                Some(Err(error)) => {
                    if error.is_disconnect() {
                        warn!(%error, "stream connection lost");
                    } else {
                        warn!(%error, "stream protocol error, forcing reconnect");
                    }
                    return Flow::Disconnected;
                }
                None => {
                    warn!("stream ended");
                    return Flow::Disconnected;
                }
            },
            () = deadline.as_mut() => {
                // The transport may still report itself open; treat silence
                // as a dead connection.
                warn!(
                    silent_for = ?liveness,
                    "liveness deadline exceeded, forcing reconnect"
                );
                return Flow::Disconnected;
            }
            _ = ping_timer.tick() => {
                if let Err(error) = sink.send_ping().await {
                    warn!(%error, "ping failed");
                    return Flow::Disconnected;
                }
            }
            command = cmd_rx.recv() => match command {
                Some(command) => {
                    match apply_online(command, desired, sink, config, frame_id).await {
                        Ok(CommandOutcome::Continue) => {}
                        Ok(CommandOutcome::Shutdown) => return Flow::Shutdown,
                        Err(error) => {
                            warn!(%error, "command send failed");
                            return Flow::Disconnected;
                        }
                    }
                }
                None => return Flow::Shutdown,
            }
        }
    }
}

/// Apply a command while disconnected: only the desired set changes.
fn apply_offline(command: StreamCommand, desired: &mut DesiredSubscriptions) -> CommandOutcome {
    match command {
        StreamCommand::Subscribe(keys) => {
            for key in keys {
                desired.subscribe(key);
            }
            CommandOutcome::Continue
        }
        StreamCommand::Unsubscribe(keys) => {
            for key in keys {
                desired.unsubscribe(&key);
            }
            CommandOutcome::Continue
        }
        StreamCommand::Resync { desired: next } => {
            desired.replace(next);
            CommandOutcome::Continue
        }
        StreamCommand::Shutdown => CommandOutcome::Shutdown,
    }
}

/// Apply a command on a live connection.
async fn apply_online(
    command: StreamCommand,
    desired: &mut DesiredSubscriptions,
    sink: &mut dyn StreamSink,
    config: &StreamConfig,
    frame_id: &mut u64,
) -> Result<CommandOutcome, StreamError> {
    match command {
        StreamCommand::Subscribe(keys) => {
            let fresh: Vec<StreamKey> = keys
                .into_iter()
                .filter(|key| desired.subscribe(key.clone()))
                .collect();
            send_control_chunks(sink, Method::Subscribe, &fresh, config, frame_id).await?;
            Ok(CommandOutcome::Continue)
        }
        StreamCommand::Unsubscribe(keys) => {
            // Lazy reconciliation: unsubscribe frames are only sent when
            // forced, to minimise churn during routine visible-set changes.
            for key in keys {
                desired.unsubscribe(&key);
            }
            Ok(CommandOutcome::Continue)
        }
        StreamCommand::Resync { desired: next } => {
            let stale = desired.replace(next);
            send_control_chunks(sink, Method::Unsubscribe, &stale, config, frame_id).await?;
            send_control_chunks(sink, Method::Subscribe, &desired.keys(), config, frame_id)
                .await?;
            Ok(CommandOutcome::Continue)
        }
        StreamCommand::Shutdown => Ok(CommandOutcome::Shutdown),
    }
}

/// Send one control method for a key set, chunked to bound frame size.
async fn send_control_chunks(
    sink: &mut dyn StreamSink,
    method: Method,
    keys: &[StreamKey],
    config: &StreamConfig,
    frame_id: &mut u64,
) -> Result<(), StreamError> {
    for (index, chunk) in keys.chunks(config.subscribe_chunk_size.max(1)).enumerate() {
        if index > 0 && !config.subscribe_chunk_delay.is_zero() {
            tokio::time::sleep(config.subscribe_chunk_delay).await;
        }
        *frame_id += 1;
        let frame = ControlFrame::new(method, chunk, *frame_id);
        let text = serde_json::to_string(&frame)
            .map_err(|error| StreamError::Protocol(error.to_string()))?;
        sink.send_text(text).await?;
    }
    Ok(())
}

/// Parse and fan out one inbound message. Returns false when the engine
/// side is gone and the manager should shut down.
async fn handle_message(message: InboundMessage, event_tx: &mpsc::Sender<StreamEvent>) -> bool {
    match message {
        InboundMessage::Text(text) => match parse_frame(&text) {
            Ok(InboundFrame::Bar(event)) => {
                if event_tx.send(StreamEvent::Bar(event.into_update())).await.is_err() {
                    warn!("event receiver dropped, stopping stream manager");
                    return false;
                }
            }
            Ok(InboundFrame::Ack(ack)) => {
                debug!(id = ack.id, "subscription acknowledged");
            }
            Ok(InboundFrame::Unknown) => {
                debug!("ignoring unrecognised frame");
            }
            Err(error) => {
                // Malformed events are dropped; they must never kill the
                // pipeline.
                debug!(%error, raw = &text[..text.len().min(120)], "dropping unparseable frame");
            }
        },
        InboundMessage::Ping | InboundMessage::Pong | InboundMessage::Other => {}
    }
    true
}

async fn set_state(event_tx: &mpsc::Sender<StreamEvent>, state: ConnectionState) -> bool {
    event_tx.send(StreamEvent::State(state)).await.is_ok()
}

async fn wait_for_reconnect(
    delay: Duration,
    cmd_rx: &mut mpsc::Receiver<StreamCommand>,
    desired: &mut DesiredSubscriptions,
) -> CommandOutcome {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            () = &mut sleep => return CommandOutcome::Continue,
            command = cmd_rx.recv() => match command {
                Some(command) => {
                    if apply_offline(command, desired) == CommandOutcome::Shutdown {
                        return CommandOutcome::Shutdown;
                    }
                }
                None => return CommandOutcome::Shutdown,
            }
        }
    }
}
