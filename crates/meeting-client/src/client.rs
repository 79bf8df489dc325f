//! Reconnecting client: an owned handle to a background actor.
//!
//! The actor owns the [`ReconnectMachine`], the open channel, the in-flight
//! connect attempt and both timers. The handle talks to it over a command
//! channel; observers receive [`ClientEvent`]s through a broadcast channel.
//! Dropping the handle runs the disconnect path and stops the actor.

use crate::connector::{ChannelHandle, Connector, InboundEvent, WebSocketConnector};
use crate::errors::ClientError;
use crate::machine::{Effect, FailureReason, Input, ReconnectMachine, RetryPolicy, SessionState};
use common::wire::{BroadcastMessage, ServerFrame};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default time allowed for a channel to open.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

const COMMAND_BUFFER: usize = 32;
const EVENT_BUFFER: usize = 256;

/// Client settings.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Push-channel endpoint, e.g. `ws://host:8080/ws`.
    pub url: String,
    pub connect_timeout: Duration,
    pub retry: RetryPolicy,
}

impl ClientConfig {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            retry: RetryPolicy::default(),
        }
    }
}

/// What subscribers see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// The server registered this session.
    Registered { connection_id: String },
    /// A message broadcast to the meeting.
    Message(BroadcastMessage),
    Error(ClientError),
    StateChanged(SessionState),
}

enum Command {
    Connect {
        meeting_id: String,
        participant_id: String,
    },
    Disconnect,
    Send {
        payload: String,
        reply: oneshot::Sender<Result<(), ClientError>>,
    },
    State {
        reply: oneshot::Sender<SessionState>,
    },
}

/// Handle to a reconnecting push-channel session.
///
/// Must be created inside a Tokio runtime.
pub struct ReconnectingClient {
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<ClientEvent>,
    cancel_token: CancellationToken,
}

impl ReconnectingClient {
    /// Client over WebSocket.
    ///
    /// # Errors
    ///
    /// `ClientError::InvalidUrl` if `config.url` is not a `ws`/`wss` URL.
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let connector = WebSocketConnector::new(&config.url)?;
        Ok(Self::with_connector(config, Arc::new(connector)))
    }

    /// Client over any [`Connector`].
    #[must_use]
    pub fn with_connector(config: ClientConfig, connector: Arc<dyn Connector>) -> Self {
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);
        let (events_tx, _) = broadcast::channel(EVENT_BUFFER);
        let cancel_token = CancellationToken::new();

        let actor = SessionActor::new(&config, connector, events_tx.clone());
        tokio::spawn(actor.run(commands_rx, cancel_token.clone()));

        Self {
            commands: commands_tx,
            events: events_tx,
            cancel_token,
        }
    }

    /// Receive every event emitted after this call.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    /// Start connecting. No-op while connecting or open.
    ///
    /// # Errors
    ///
    /// `ClientError::Closed` if the actor has stopped.
    pub async fn connect(
        &self,
        meeting_id: impl Into<String>,
        participant_id: impl Into<String>,
    ) -> Result<(), ClientError> {
        self.command(Command::Connect {
            meeting_id: meeting_id.into(),
            participant_id: participant_id.into(),
        })
        .await
    }

    /// Close the channel and cancel any pending retry.
    ///
    /// # Errors
    ///
    /// `ClientError::Closed` if the actor has stopped.
    pub async fn disconnect(&self) -> Result<(), ClientError> {
        self.command(Command::Disconnect).await
    }

    /// Send a text payload. Nothing is buffered across reconnects.
    ///
    /// # Errors
    ///
    /// `ClientError::NotOpen` unless the channel is open.
    pub async fn send(&self, payload: impl Into<String>) -> Result<(), ClientError> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::Send {
            payload: payload.into(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| ClientError::Closed)?
    }

    /// Current session state.
    ///
    /// # Errors
    ///
    /// `ClientError::Closed` if the actor has stopped.
    pub async fn state(&self) -> Result<SessionState, ClientError> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::State { reply }).await?;
        rx.await.map_err(|_| ClientError::Closed)
    }

    async fn command(&self, command: Command) -> Result<(), ClientError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| ClientError::Closed)
    }
}

impl Drop for ReconnectingClient {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

/// Background actor owning the session.
struct SessionActor {
    machine: ReconnectMachine,
    connector: Arc<dyn Connector>,
    events: broadcast::Sender<ClientEvent>,
    channel: Option<ChannelHandle>,
    attempt: Option<JoinHandle<()>>,
    /// Bumped on every new attempt; results from older attempts are dropped.
    generation: u64,
    attempt_tx: mpsc::Sender<(u64, Result<ChannelHandle, ClientError>)>,
    attempt_rx: mpsc::Receiver<(u64, Result<ChannelHandle, ClientError>)>,
    connect_deadline: Option<Instant>,
    retry_at: Option<Instant>,
}

impl SessionActor {
    fn new(
        config: &ClientConfig,
        connector: Arc<dyn Connector>,
        events: broadcast::Sender<ClientEvent>,
    ) -> Self {
        let (attempt_tx, attempt_rx) = mpsc::channel(4);
        Self {
            machine: ReconnectMachine::new(config.retry, config.connect_timeout),
            connector,
            events,
            channel: None,
            attempt: None,
            generation: 0,
            attempt_tx,
            attempt_rx,
            connect_deadline: None,
            retry_at: None,
        }
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Command>, cancel_token: CancellationToken) {
        loop {
            tokio::select! {
                () = cancel_token.cancelled() => {
                    self.apply(Input::Disconnect);
                    break;
                }
                command = commands.recv() => match command {
                    Some(command) => self.on_command(command).await,
                    None => {
                        self.apply(Input::Disconnect);
                        break;
                    }
                },
                Some((generation, result)) = self.attempt_rx.recv() => {
                    self.on_attempt_result(generation, result);
                }
                () = sleep_until(self.connect_deadline) => {
                    self.connect_deadline = None;
                    self.apply(Input::ConnectTimedOut);
                    if self.machine.state() == SessionState::Failed(FailureReason::Timeout) {
                        // The abandoned attempt counts as an abnormal close.
                        self.apply(Input::Closed { code: None });
                    }
                }
                () = sleep_until(self.retry_at) => {
                    self.retry_at = None;
                    self.apply(Input::RetryTimerFired);
                }
                inbound = recv_inbound(self.channel.as_mut()) => self.on_inbound(inbound),
            }
        }

        debug!(target: "client.session", "Session actor stopped");
    }

    async fn on_command(&mut self, command: Command) {
        match command {
            Command::Connect {
                meeting_id,
                participant_id,
            } => self.apply(Input::Connect {
                meeting_id,
                participant_id,
            }),
            Command::Disconnect => self.apply(Input::Disconnect),
            Command::Send { payload, reply } => {
                let result = match (&self.channel, self.machine.state()) {
                    (Some(channel), SessionState::Open) => channel
                        .outbound
                        .send(payload)
                        .await
                        .map_err(|_| ClientError::NotOpen),
                    _ => Err(ClientError::NotOpen),
                };
                let _ = reply.send(result);
            }
            Command::State { reply } => {
                let _ = reply.send(self.machine.state());
            }
        }
    }

    fn on_attempt_result(&mut self, generation: u64, result: Result<ChannelHandle, ClientError>) {
        if generation != self.generation {
            // Stale attempt; dropping the handle closes it.
            return;
        }
        self.attempt = None;
        match result {
            Ok(channel) => {
                self.channel = Some(channel);
                self.apply(Input::Opened);
            }
            Err(e) => self.apply(Input::ConnectFailed(e.to_string())),
        }
    }

    fn on_inbound(&mut self, inbound: Option<InboundEvent>) {
        match inbound {
            Some(InboundEvent::Frame(text)) => match ServerFrame::decode(&text) {
                Ok(ServerFrame::Message(message)) => self.emit(ClientEvent::Message(message)),
                Ok(ServerFrame::Connected { connection_id }) => {
                    info!(
                        target: "client.session",
                        connection_id = %connection_id,
                        "Registered with server"
                    );
                    self.emit(ClientEvent::Registered { connection_id });
                }
                Err(e) => {
                    warn!(target: "client.session", error = %e, "Dropping undecodable frame");
                    self.emit(ClientEvent::Error(ClientError::Decode(e.to_string())));
                }
            },
            Some(InboundEvent::Closed { code }) => {
                self.channel = None;
                self.apply(Input::Closed { code });
            }
            None => {
                self.channel = None;
                self.apply(Input::Closed { code: None });
            }
        }
    }

    fn apply(&mut self, input: Input) {
        for effect in self.machine.handle(input) {
            self.execute(effect);
        }
    }

    fn execute(&mut self, effect: Effect) {
        match effect {
            Effect::OpenChannel {
                meeting_id,
                participant_id,
            } => self.start_attempt(meeting_id, participant_id),
            Effect::StartConnectTimer(timeout) => {
                self.connect_deadline = Some(Instant::now() + timeout);
            }
            Effect::CancelConnectTimer => self.connect_deadline = None,
            Effect::ScheduleRetry(delay) => {
                debug!(
                    target: "client.session",
                    delay_ms = delay.as_millis(),
                    attempt = self.machine.attempt(),
                    "Scheduling reconnect"
                );
                self.retry_at = Some(Instant::now() + delay);
            }
            Effect::CancelRetry => self.retry_at = None,
            Effect::CloseChannel => {
                self.abort_attempt();
                self.channel = None;
            }
            Effect::EmitError(error) => self.emit(ClientEvent::Error(error)),
            Effect::StateChanged(state) => {
                debug!(target: "client.session", state = ?state, "State changed");
                self.emit(ClientEvent::StateChanged(state));
            }
        }
    }

    fn start_attempt(&mut self, meeting_id: String, participant_id: String) {
        self.abort_attempt();
        self.channel = None;

        let generation = self.generation;
        let connector = Arc::clone(&self.connector);
        let results = self.attempt_tx.clone();
        self.attempt = Some(tokio::spawn(async move {
            let result = connector.open(&meeting_id, &participant_id).await;
            let _ = results.send((generation, result)).await;
        }));
    }

    /// Discard the in-flight attempt without waiting for it.
    fn abort_attempt(&mut self) {
        self.generation += 1;
        if let Some(attempt) = self.attempt.take() {
            attempt.abort();
        }
    }

    fn emit(&self, event: ClientEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

async fn recv_inbound(channel: Option<&mut ChannelHandle>) -> Option<InboundEvent> {
    match channel {
        Some(channel) => channel.inbound.recv().await,
        None => std::future::pending().await,
    }
}
