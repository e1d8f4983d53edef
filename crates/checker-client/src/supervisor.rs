//! Connection lifecycle state machine.
//!
//! The supervisor is the only writer of [`ConnectionState`]. It consumes typed
//! [`Event`]s (transport notifications, timers, application requests) and
//! answers with the [`Action`]s the driver must carry out. It performs no I/O
//! itself, so every transition can be exercised without a socket.
//!
//! ```text
//! Unprovisioned --Provisioned--> Connecting --Opened--> AwaitingAck --Ack(id)--> Active
//!                                   ^   |                  |                      |
//!                         RetryDue  |   | failure          | timeout/failure      | failure
//!                                   |   v                  v                      v
//!                                 Disconnected <-----------+----------------------+
//! ```

use std::fmt;
use std::time::Duration;

use checker_core::{ConnectionState, DeviceIdentity, DoorState};
use checker_protocol::{decode_ack, AckOutcome};
use tracing::{debug, error, info, warn};

use crate::config::ReconnectPolicy;

/// Why the transport was lost.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// TCP connection could not be established.
    Connect,
    /// The WebSocket upgrade was refused.
    Handshake,
    /// Read or write failure on an open socket.
    Io,
    /// No pong arrived within the liveness window.
    PongTimeout,
    /// A frame write did not complete in time.
    SendTimeout,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportErrorKind::Connect => "connect",
            TransportErrorKind::Handshake => "handshake",
            TransportErrorKind::Io => "io",
            TransportErrorKind::PongTimeout => "pong timeout",
            TransportErrorKind::SendTimeout => "send timeout",
        };
        f.write_str(name)
    }
}

/// Inputs to the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Valid WiFi credentials were stored.
    Provisioned,
    /// The reconnect delay elapsed.
    RetryDue,
    /// The transport reports the connection open.
    Opened,
    /// A text message arrived from the server.
    AckReceived(String),
    /// The server did not acknowledge the welcome frame in time.
    AckTimeout,
    /// The transport was closed by the peer.
    Closed,
    /// The transport failed.
    TransportError(TransportErrorKind),
    /// The application observed a door transition.
    DoorChanged(DoorState),
    /// Credentials are being wiped.
    FactoryReset,
}

/// Work the driver must perform after a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Start a connection attempt.
    Connect,
    /// Send the welcome frame.
    SendWelcome,
    /// Read the door state from the source and send it.
    SendCurrentDoorState,
    /// Send the given door snapshot.
    SendDoorState(DoorState),
    /// Close and release the transport handle, if any.
    CloseTransport,
    /// Wait, then deliver [`Event::RetryDue`].
    ScheduleRetry(Duration),
    /// Remove stored WiFi credentials.
    ClearCredentials,
}

/// Owner of the connection state.
#[derive(Debug)]
pub struct Supervisor {
    state: ConnectionState,
    identity: DeviceIdentity,
    policy: ReconnectPolicy,
    failures: u32,
}

impl Supervisor {
    /// Create a supervisor.
    ///
    /// Starts `Disconnected` when the device is provisioned, `Unprovisioned`
    /// otherwise. A provisioned supervisor should be kicked with
    /// [`Supervisor::start`].
    pub fn new(identity: DeviceIdentity, provisioned: bool, policy: ReconnectPolicy) -> Self {
        let state = if provisioned {
            ConnectionState::Disconnected
        } else {
            ConnectionState::Unprovisioned
        };
        Self {
            state,
            identity,
            policy,
            failures: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    /// Consecutive failed attempts since the last successful handshake.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Initial actions: connect right away when already provisioned.
    pub fn start(&mut self) -> Vec<Action> {
        match self.state {
            ConnectionState::Disconnected => self.handle(Event::RetryDue),
            _ => Vec::new(),
        }
    }

    /// Apply an event and return the actions it requires.
    pub fn handle(&mut self, event: Event) -> Vec<Action> {
        use ConnectionState::*;

        match (self.state, event) {
            (_, Event::FactoryReset) => {
                info!("Factory reset, clearing credentials");
                self.failures = 0;
                self.transition(Unprovisioned);
                vec![Action::CloseTransport, Action::ClearCredentials]
            }

            (Unprovisioned, Event::Provisioned) | (Disconnected, Event::RetryDue) => {
                self.transition(Connecting);
                vec![Action::Connect]
            }

            (Connecting, Event::Opened) => {
                self.transition(AwaitingAck);
                vec![Action::SendWelcome]
            }

            (AwaitingAck, Event::AckReceived(payload)) => {
                match decode_ack(&payload, &self.identity) {
                    AckOutcome::Accepted => {
                        info!("Server acknowledged device {}", self.identity);
                        self.failures = 0;
                        self.transition(Active);
                        // The server's view may be stale after a reconnect
                        vec![Action::SendCurrentDoorState]
                    }
                    AckOutcome::Mismatch { received } => {
                        warn!(
                            device = %self.identity,
                            received = %received,
                            len = received.len(),
                            "Acknowledgment does not match device identity"
                        );
                        Vec::new()
                    }
                }
            }

            (AwaitingAck, Event::AckTimeout) => {
                warn!("Server did not acknowledge welcome in time");
                self.fail()
            }

            (Connecting | AwaitingAck | Active, Event::Closed) => {
                if self.state == Active {
                    info!("Disconnected from server");
                }
                self.fail()
            }

            (Connecting | AwaitingAck | Active, Event::TransportError(kind)) => {
                warn!(kind = %kind, state = %self.state, "Transport error");
                self.fail()
            }

            (Active, Event::DoorChanged(door)) => vec![Action::SendDoorState(door)],

            (state, Event::DoorChanged(_)) => {
                debug!(state = %state, "Door change not sent, connection not active");
                Vec::new()
            }

            (state, event) => {
                debug!(state = %state, event = ?event, "Event ignored");
                Vec::new()
            }
        }
    }

    fn fail(&mut self) -> Vec<Action> {
        self.failures = self.failures.saturating_add(1);
        if self.policy.should_warn(self.failures) {
            error!(
                failures = self.failures,
                "Still unable to reach server, will keep retrying"
            );
        }
        let delay = self.policy.delay(self.failures);
        self.transition(ConnectionState::Disconnected);
        vec![Action::CloseTransport, Action::ScheduleRetry(delay)]
    }

    fn transition(&mut self, next: ConnectionState) {
        if self.state != next {
            debug!(from = %self.state, to = %next, "Connection state change");
            self.state = next;
        }
    }
}
