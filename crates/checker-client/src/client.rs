//! WebSocket telemetry client.
//!
//! A single task owns the [`Supervisor`], the WebSocket and every timer. It is
//! the only writer of the connection state, which it publishes through a
//! `watch` channel. Application code talks to it through a cloneable
//! [`TelemetryHandle`]:
//! - `report_door_change` - send a door frame if the link is active
//! - `provisioned` - credentials were just stored
//! - `factory_reset` / `shutdown` - stop the transport before returning

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, timeout, Instant};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use checker_core::{
    resolve_server_url, valid_credentials, ConnectionState, CredentialStore, DeviceIdentity,
    DeviceStateSource, DoorState,
};
use checker_protocol::{encode_door_state, encode_welcome, Frame};

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::supervisor::{Action, Event, Supervisor, TransportErrorKind};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type ConnectFuture = BoxFuture<'static, Result<WsStream, TransportErrorKind>>;

/// Door changes beyond this many in flight are dropped.
const COMMAND_QUEUE: usize = 32;

/// Requests from the application to the client task.
enum Command {
    DoorChanged(DoorState),
    Provisioned,
    FactoryReset(oneshot::Sender<()>),
    Shutdown(oneshot::Sender<()>),
}

/// A configured, not yet running, telemetry client.
pub struct TelemetryClient {
    config: ClientConfig,
    identity: DeviceIdentity,
    url: String,
    provisioned: bool,
    store: Arc<dyn CredentialStore>,
    source: Arc<dyn DeviceStateSource>,
}

impl TelemetryClient {
    /// Read identity, server URL and credentials from the store.
    ///
    /// Fails when the device identity is missing or empty: without it the
    /// welcome frame cannot be built, so the device must not connect at all.
    pub fn new(
        config: ClientConfig,
        store: Arc<dyn CredentialStore>,
        source: Arc<dyn DeviceStateSource>,
    ) -> Result<Self, ClientError> {
        let identity = DeviceIdentity::new(store.device_id()?.unwrap_or_default())?;
        let url = resolve_server_url(store.as_ref())?;
        let provisioned = valid_credentials(store.as_ref())?.is_some();

        Ok(Self {
            config,
            identity,
            url,
            provisioned,
            store,
            source,
        })
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn server_url(&self) -> &str {
        &self.url
    }

    pub fn is_provisioned(&self) -> bool {
        self.provisioned
    }

    /// Start the client task.
    pub fn spawn(self) -> (TelemetryHandle, JoinHandle<()>) {
        let supervisor = Supervisor::new(self.identity, self.provisioned, self.config.reconnect);
        let (state_tx, state_rx) = watch::channel(supervisor.state());
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE);

        if !self.provisioned {
            info!("No valid WiFi credentials stored, waiting for provisioning");
        }

        let driver = Driver {
            supervisor,
            config: self.config,
            url: self.url,
            store: self.store,
            source: self.source,
            state_tx,
            socket: None,
            connecting: None,
            retry_at: None,
            ack_deadline: None,
            next_ping: None,
            pong_deadline: None,
        };
        let task = tokio::spawn(driver.run(command_rx));

        (
            TelemetryHandle {
                commands: command_tx,
                state: state_rx,
            },
            task,
        )
    }
}

/// Cloneable handle to a running telemetry client.
#[derive(Clone)]
pub struct TelemetryHandle {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<ConnectionState>,
}

impl TelemetryHandle {
    /// Snapshot of the connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Receiver that observes every published state change.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Wait until the connection reaches `target`.
    pub async fn wait_for_state(&self, target: ConnectionState) -> Result<(), ClientError> {
        let mut state = self.state.clone();
        state
            .wait_for(|current| *current == target)
            .await
            .map(|_| ())
            .map_err(|_| ClientError::Stopped)
    }

    /// Report a door transition.
    ///
    /// Sent only while the connection is active. Otherwise the change is
    /// dropped: telemetry is best effort and never queued across reconnects.
    pub fn report_door_change(&self, door: DoorState) {
        if !self.state().is_active() {
            debug!(open = door.open, "Door change dropped, connection not active");
            return;
        }
        match self.commands.try_send(Command::DoorChanged(door)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Telemetry queue full, door change dropped");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Telemetry client stopped, door change dropped");
            }
        }
    }

    /// Tell the client that credentials were stored.
    pub async fn provisioned(&self) -> Result<(), ClientError> {
        self.commands
            .send(Command::Provisioned)
            .await
            .map_err(|_| ClientError::Stopped)
    }

    /// Close the transport, wipe credentials and return to `Unprovisioned`.
    pub async fn factory_reset(&self) -> Result<(), ClientError> {
        let (done_tx, done_rx) = oneshot::channel();
        self.commands
            .send(Command::FactoryReset(done_tx))
            .await
            .map_err(|_| ClientError::Stopped)?;
        done_rx.await.map_err(|_| ClientError::Stopped)
    }

    /// Close the transport and stop the client task.
    pub async fn shutdown(&self) -> Result<(), ClientError> {
        let (done_tx, done_rx) = oneshot::channel();
        self.commands
            .send(Command::Shutdown(done_tx))
            .await
            .map_err(|_| ClientError::Stopped)?;
        done_rx.await.map_err(|_| ClientError::Stopped)
    }
}

enum Wake {
    Command(Option<Command>),
    Event(Option<Event>),
}

enum SocketWake {
    Message(Option<Result<Message, tungstenite::Error>>),
    AckTimeout,
    PongTimeout,
    PingDue,
}

/// The client task.
struct Driver {
    supervisor: Supervisor,
    config: ClientConfig,
    url: String,
    store: Arc<dyn CredentialStore>,
    source: Arc<dyn DeviceStateSource>,
    state_tx: watch::Sender<ConnectionState>,
    socket: Option<WsStream>,
    connecting: Option<ConnectFuture>,
    retry_at: Option<Instant>,
    ack_deadline: Option<Instant>,
    next_ping: Option<Instant>,
    pong_deadline: Option<Instant>,
}

impl Driver {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        let actions = self.supervisor.start();
        self.publish();
        self.execute(actions).await;

        loop {
            let wake = tokio::select! {
                biased;
                command = commands.recv() => Wake::Command(command),
                event = self.next_event() => Wake::Event(event),
            };

            match wake {
                Wake::Command(Some(Command::DoorChanged(door))) => {
                    self.dispatch(Event::DoorChanged(door)).await;
                }
                Wake::Command(Some(Command::Provisioned)) => {
                    match valid_credentials(self.store.as_ref()) {
                        Ok(Some(_)) => self.dispatch(Event::Provisioned).await,
                        Ok(None) => warn!("Provisioning reported but stored credentials are invalid"),
                        Err(e) => error!(error = %e, "Failed to read credentials"),
                    }
                }
                Wake::Command(Some(Command::FactoryReset(done))) => {
                    self.dispatch(Event::FactoryReset).await;
                    let _ = done.send(());
                }
                Wake::Command(Some(Command::Shutdown(done))) => {
                    self.close_transport().await;
                    info!("Telemetry client stopped");
                    let _ = done.send(());
                    return;
                }
                Wake::Command(None) => {
                    self.close_transport().await;
                    debug!("All telemetry handles dropped, stopping");
                    return;
                }
                Wake::Event(Some(event)) => self.dispatch(event).await,
                Wake::Event(None) => {}
            }
        }
    }

    /// Wait for the next transport or timer event relevant to the current state.
    async fn next_event(&mut self) -> Option<Event> {
        match self.supervisor.state() {
            ConnectionState::Unprovisioned => std::future::pending().await,
            ConnectionState::Disconnected => {
                sleep_until(self.retry_at.unwrap_or_else(Instant::now)).await;
                self.retry_at = None;
                Some(Event::RetryDue)
            }
            ConnectionState::Connecting => {
                let (url, limit) = (&self.url, self.config.connect_timeout);
                let attempt = self
                    .connecting
                    .get_or_insert_with(|| connect(url.clone(), limit));
                let result = attempt.await;
                self.connecting = None;
                match result {
                    Ok(socket) => {
                        info!(url = %self.url, "Connected to server");
                        self.socket = Some(socket);
                        Some(Event::Opened)
                    }
                    Err(kind) => Some(Event::TransportError(kind)),
                }
            }
            ConnectionState::AwaitingAck | ConnectionState::Active => {
                self.next_socket_event().await
            }
        }
    }

    async fn next_socket_event(&mut self) -> Option<Event> {
        let ack_deadline = match self.supervisor.state() {
            ConnectionState::AwaitingAck => self.ack_deadline,
            _ => None,
        };
        let (pong_deadline, next_ping) = (self.pong_deadline, self.next_ping);
        let Some(socket) = self.socket.as_mut() else {
            return Some(Event::TransportError(TransportErrorKind::Io));
        };

        let wake = tokio::select! {
            message = socket.next() => SocketWake::Message(message),
            _ = sleep_until_opt(ack_deadline) => SocketWake::AckTimeout,
            _ = sleep_until_opt(pong_deadline) => SocketWake::PongTimeout,
            _ = sleep_until_opt(next_ping) => SocketWake::PingDue,
        };

        match wake {
            SocketWake::Message(Some(Ok(Message::Text(text)))) => Some(Event::AckReceived(text)),
            SocketWake::Message(Some(Ok(Message::Pong(_)))) => {
                self.pong_deadline = None;
                None
            }
            SocketWake::Message(Some(Ok(Message::Close(frame)))) => {
                info!(frame = ?frame, "Server closed connection");
                Some(Event::Closed)
            }
            // Pings are answered by tungstenite itself; binary frames carry nothing for us
            SocketWake::Message(Some(Ok(_))) => None,
            SocketWake::Message(Some(Err(e))) => {
                warn!(error = %e, "WebSocket error");
                Some(Event::TransportError(TransportErrorKind::Io))
            }
            SocketWake::Message(None) => Some(Event::Closed),
            SocketWake::AckTimeout => {
                self.ack_deadline = None;
                Some(Event::AckTimeout)
            }
            SocketWake::PongTimeout => {
                self.pong_deadline = None;
                Some(Event::TransportError(TransportErrorKind::PongTimeout))
            }
            SocketWake::PingDue => {
                let now = Instant::now();
                self.next_ping = Some(now + self.config.ping_interval);
                if self.pong_deadline.is_none() {
                    self.pong_deadline = Some(now + self.config.pong_timeout);
                }
                self.send(Message::Ping(Vec::new()))
                    .await
                    .err()
                    .map(Event::TransportError)
            }
        }
    }

    async fn dispatch(&mut self, event: Event) {
        let actions = self.supervisor.handle(event);
        self.publish();
        self.execute(actions).await;
    }

    /// Perform actions in order. A failed action feeds its event back into the
    /// supervisor and the remaining actions are replaced by the new ones.
    async fn execute(&mut self, actions: Vec<Action>) {
        let mut pending = VecDeque::from(actions);
        while let Some(action) = pending.pop_front() {
            if let Some(event) = self.perform(action).await {
                pending = VecDeque::from(self.supervisor.handle(event));
                self.publish();
            }
        }
    }

    async fn perform(&mut self, action: Action) -> Option<Event> {
        match action {
            Action::Connect => {
                info!(url = %self.url, "Connecting to server");
                self.connecting = Some(connect(self.url.clone(), self.config.connect_timeout));
                None
            }
            Action::SendWelcome => {
                let now = Instant::now();
                self.ack_deadline = Some(now + self.config.ack_timeout);
                self.next_ping = Some(now + self.config.ping_interval);
                self.pong_deadline = None;

                let battery = self.source.battery_level().value();
                let frame =
                    encode_welcome(self.supervisor.identity(), self.config.device_type, battery);
                match self.send_frame(frame).await {
                    Ok(()) => {
                        info!("Sent welcome message");
                        None
                    }
                    Err(kind) => Some(Event::TransportError(kind)),
                }
            }
            Action::SendCurrentDoorState => {
                self.ack_deadline = None;
                let door = self.source.door_state();
                self.send_door_state(door).await
            }
            Action::SendDoorState(door) => self.send_door_state(door).await,
            Action::CloseTransport => {
                self.close_transport().await;
                None
            }
            Action::ScheduleRetry(delay) => {
                debug!(
                    delay_ms = delay.as_millis() as u64,
                    failures = self.supervisor.failures(),
                    "Scheduling reconnect"
                );
                self.retry_at = Some(Instant::now() + delay);
                None
            }
            Action::ClearCredentials => {
                if let Err(e) = self.store.clear_credentials() {
                    error!(error = %e, "Failed to clear credentials");
                }
                None
            }
        }
    }

    async fn send_door_state(&mut self, door: DoorState) -> Option<Event> {
        let elapsed_ms = door.elapsed_ms(std::time::Instant::now());
        let battery = self.source.battery_level().value();
        let frame = encode_door_state(door.open, battery, elapsed_ms);
        match self.send_frame(frame).await {
            Ok(()) => {
                debug!(open = door.open, battery, elapsed_ms, "Sent door state");
                None
            }
            Err(kind) => Some(Event::TransportError(kind)),
        }
    }

    async fn send_frame(&mut self, frame: Frame) -> Result<(), TransportErrorKind> {
        self.send(Message::Binary(frame.into_bytes())).await
    }

    async fn send(&mut self, message: Message) -> Result<(), TransportErrorKind> {
        let limit = self.config.send_timeout;
        let Some(socket) = self.socket.as_mut() else {
            return Err(TransportErrorKind::Io);
        };
        match timeout(limit, socket.send(message)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                warn!(error = %e, "Failed to send frame");
                Err(TransportErrorKind::Io)
            }
            Err(_) => {
                warn!(timeout_ms = limit.as_millis() as u64, "Timed out sending frame");
                Err(TransportErrorKind::SendTimeout)
            }
        }
    }

    /// Release the socket and any pending attempt. Safe to call repeatedly.
    async fn close_transport(&mut self) {
        self.connecting = None;
        self.ack_deadline = None;
        self.next_ping = None;
        self.pong_deadline = None;

        if let Some(mut socket) = self.socket.take() {
            match timeout(self.config.send_timeout, socket.close(None)).await {
                Ok(Ok(())) => debug!("WebSocket closed"),
                Ok(Err(e)) => debug!(error = %e, "WebSocket close failed"),
                Err(_) => debug!("WebSocket close timed out"),
            }
        }
    }

    fn publish(&self) {
        let state = self.supervisor.state();
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            *current = state;
            true
        });
    }
}

/// Open the WebSocket, classifying failures for the supervisor.
fn connect(url: String, limit: Duration) -> ConnectFuture {
    Box::pin(async move {
        match timeout(limit, connect_async(url.as_str())).await {
            Ok(Ok((socket, _response))) => Ok(socket),
            Ok(Err(e)) => {
                let kind = classify(&e);
                warn!(url = %url, kind = %kind, error = %e, "Connection attempt failed");
                Err(kind)
            }
            Err(_) => {
                warn!(url = %url, "Connection attempt timed out");
                Err(TransportErrorKind::Connect)
            }
        }
    })
}

fn classify(err: &tungstenite::Error) -> TransportErrorKind {
    match err {
        tungstenite::Error::Io(_) => TransportErrorKind::Connect,
        _ => TransportErrorKind::Handshake,
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
