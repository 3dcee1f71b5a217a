//! Finite State Machine for the push channel connection

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::errors::ConsoleError;
use crate::utils::{calc_exp_backoff, CooldownOptions};

/// Longest wait between two reconnection attempts
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(60 * 60);

/// Reconnection settings
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Delay before the first retry; doubles with every further failure
    pub base_delay: Duration,

    /// Consecutive failures after which no retry is scheduled automatically
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1000),
            max_attempts: 5,
        }
    }
}

impl ReconnectPolicy {
    /// `base * 2^(attempt - 1)`, capped at [`MAX_RETRY_DELAY`]
    pub fn delay(&self, attempt: u32) -> Duration {
        let options = CooldownOptions {
            base_delay: self.base_delay,
            max_delay: MAX_RETRY_DELAY,
            multiplier: 2.0,
        };
        calc_exp_backoff(&options, attempt)
    }
}

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    /// Not connected and not trying to
    Disconnected,

    /// Handshake in progress
    Connecting,

    /// Connected and subscribed
    Connected,

    /// Waiting for the backoff delay before the next attempt
    Reconnecting,
}

/// Connection health as shown to the render layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionHealth {
    Connected,
    Disconnected,
    Reconnecting,
}

impl ConnectionHealth {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionHealth::Connected => "CONNECTED",
            ConnectionHealth::Disconnected => "DISCONNECTED",
            ConnectionHealth::Reconnecting => "RECONNECTING",
        }
    }
}

impl From<ConnectionState> for ConnectionHealth {
    fn from(state: ConnectionState) -> Self {
        match state {
            ConnectionState::Connected => ConnectionHealth::Connected,
            ConnectionState::Disconnected => ConnectionHealth::Disconnected,
            ConnectionState::Connecting | ConnectionState::Reconnecting => {
                ConnectionHealth::Reconnecting
            }
        }
    }
}

/// Connection event
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// Start connecting
    Connect,

    /// Handshake completed
    Connected,

    /// Handshake or subscription failed
    ConnectionFailed(String),

    /// An established connection dropped
    ConnectionLost(String),

    /// Backoff delay elapsed
    RetryDue,

    /// Manual retry, resets the failure count
    ForceReconnect,

    /// Explicit shutdown of the channel
    Disconnect,
}

/// What the driver must do after a transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionAction {
    /// Open a new session
    OpenSession,

    /// Subscribe to the deployment topic on the new session
    Subscribe,

    /// Wait, then deliver `RetryDue`
    ScheduleRetry(Duration),

    /// Stop retrying; polling carries on alone
    GiveUp,

    /// Close the current session, if any
    CloseSession,

    /// Nothing to do
    None,
}

/// Push connection FSM
#[derive(Debug, Clone)]
pub struct ConnectionFsm {
    state: ConnectionState,
    policy: ReconnectPolicy,
    failures: u32,
    exhausted: bool,
    last_error: Option<String>,
}

impl ConnectionFsm {
    /// Create a new FSM in disconnected state
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            policy,
            failures: 0,
            exhausted: false,
            last_error: None,
        }
    }

    /// Get current state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Consecutive failures since the last successful connection
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Whether automatic retries have been used up
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Get the last connection error, if any
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: ConnectionEvent) -> Result<ConnectionAction, ConsoleError> {
        let (new_state, action) = match (self.state, event) {
            // From Disconnected
            (ConnectionState::Disconnected, ConnectionEvent::Connect) => {
                if self.exhausted {
                    return Err(ConsoleError::InvalidTransition(
                        "retries exhausted, use ForceReconnect".to_string(),
                    ));
                }
                (ConnectionState::Connecting, ConnectionAction::OpenSession)
            }
            (ConnectionState::Disconnected, ConnectionEvent::ForceReconnect) => {
                self.reset();
                (ConnectionState::Connecting, ConnectionAction::OpenSession)
            }
            (ConnectionState::Disconnected, ConnectionEvent::Disconnect) => {
                (ConnectionState::Disconnected, ConnectionAction::None)
            }

            // From Connecting
            (ConnectionState::Connecting, ConnectionEvent::Connected) => {
                self.reset();
                (ConnectionState::Connected, ConnectionAction::Subscribe)
            }
            (ConnectionState::Connecting, ConnectionEvent::ConnectionFailed(err)) => {
                self.record_failure(err)
            }
            (ConnectionState::Connecting, ConnectionEvent::ForceReconnect) => {
                self.failures = 0;
                (ConnectionState::Connecting, ConnectionAction::None)
            }
            (ConnectionState::Connecting, ConnectionEvent::Disconnect) => {
                (ConnectionState::Disconnected, ConnectionAction::CloseSession)
            }

            // From Connected
            (ConnectionState::Connected, ConnectionEvent::ConnectionLost(err)) => {
                self.record_failure(err)
            }
            (ConnectionState::Connected, ConnectionEvent::ConnectionFailed(err)) => {
                self.record_failure(err)
            }
            (ConnectionState::Connected, ConnectionEvent::ForceReconnect) => {
                self.reset();
                (ConnectionState::Connecting, ConnectionAction::OpenSession)
            }
            (ConnectionState::Connected, ConnectionEvent::Disconnect) => {
                (ConnectionState::Disconnected, ConnectionAction::CloseSession)
            }

            // From Reconnecting
            (ConnectionState::Reconnecting, ConnectionEvent::RetryDue) => {
                (ConnectionState::Connecting, ConnectionAction::OpenSession)
            }
            (ConnectionState::Reconnecting, ConnectionEvent::ForceReconnect) => {
                self.reset();
                (ConnectionState::Connecting, ConnectionAction::OpenSession)
            }
            (ConnectionState::Reconnecting, ConnectionEvent::Disconnect) => {
                (ConnectionState::Disconnected, ConnectionAction::None)
            }

            // Invalid transitions
            (state, event) => {
                return Err(ConsoleError::InvalidTransition(format!(
                    "{:?} -> {:?}",
                    state, event
                )));
            }
        };

        self.state = new_state;
        Ok(action)
    }

    fn reset(&mut self) {
        self.failures = 0;
        self.exhausted = false;
        self.last_error = None;
    }

    fn record_failure(&mut self, err: String) -> (ConnectionState, ConnectionAction) {
        self.failures += 1;
        self.last_error = Some(err);

        if self.failures >= self.policy.max_attempts {
            self.exhausted = true;
            (ConnectionState::Disconnected, ConnectionAction::GiveUp)
        } else {
            (
                ConnectionState::Reconnecting,
                ConnectionAction::ScheduleRetry(self.policy.delay(self.failures)),
            )
        }
    }
}

impl Default for ConnectionFsm {
    fn default() -> Self {
        Self::new(ReconnectPolicy::default())
    }
}
