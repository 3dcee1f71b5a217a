//! Push channel client
//!
//! Drives the connection FSM against a [`PushConnector`] and hands decoded
//! deployment records to a [`PushSink`].

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::errors::ConsoleError;
use crate::models::deployment::DeploymentRecord;
use crate::push::fsm::{
    ConnectionAction, ConnectionEvent, ConnectionFsm, ConnectionHealth, ConnectionState,
    ReconnectPolicy,
};
use crate::push::message;
use crate::push::topics::Topics;
use crate::push::transport::{PushConnector, PushFrame, PushSession};

/// Snapshot of the connection for observers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushStatus {
    pub state: ConnectionState,
    pub failures: u32,
    pub exhausted: bool,
    pub last_error: Option<String>,
}

impl PushStatus {
    pub fn health(&self) -> ConnectionHealth {
        ConnectionHealth::from(self.state)
    }

    fn from_fsm(fsm: &ConnectionFsm) -> Self {
        Self {
            state: fsm.state(),
            failures: fsm.failures(),
            exhausted: fsm.is_exhausted(),
            last_error: fsm.last_error().map(str::to_string),
        }
    }
}

/// Requests accepted by a running client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushCommand {
    ForceReconnect,
    Disconnect,
}

/// Cloneable control handle for a [`PushChannelClient`]
#[derive(Debug, Clone)]
pub struct PushHandle {
    commands: mpsc::UnboundedSender<PushCommand>,
    status: watch::Receiver<PushStatus>,
}

impl PushHandle {
    /// Retry now, resetting the failure count
    pub fn force_reconnect(&self) -> Result<(), ConsoleError> {
        self.commands
            .send(PushCommand::ForceReconnect)
            .map_err(|_| ConsoleError::PushError("push client is not running".to_string()))
    }

    /// Close the session and stop receiving until the next forced reconnect
    pub fn disconnect(&self) -> Result<(), ConsoleError> {
        self.commands
            .send(PushCommand::Disconnect)
            .map_err(|_| ConsoleError::PushError("push client is not running".to_string()))
    }

    pub fn status(&self) -> PushStatus {
        self.status.borrow().clone()
    }

    pub fn health(&self) -> ConnectionHealth {
        self.status.borrow().health()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<PushStatus> {
        self.status.clone()
    }
}

/// Receiver of normalized push records
#[async_trait]
pub trait PushSink: Send + Sync {
    async fn deliver(&self, record: DeploymentRecord);
}

/// An active subscription on a live session.
///
/// Once invalidated the session is closed and dropped; nothing can be read from
/// it again.
struct Subscription {
    session: Option<Box<dyn PushSession>>,
}

impl Subscription {
    async fn activate(mut session: Box<dyn PushSession>, topic: &str) -> Result<Self, (Box<dyn PushSession>, ConsoleError)> {
        match session.subscribe(topic).await {
            Ok(()) => Ok(Self {
                session: Some(session),
            }),
            Err(e) => Err((session, e)),
        }
    }

    async fn next(&mut self) -> Result<Option<PushFrame>, ConsoleError> {
        match self.session.as_mut() {
            Some(session) => session.next_frame().await,
            None => Err(ConsoleError::PushError("subscription invalidated".to_string())),
        }
    }

    async fn invalidate(mut self) {
        if let Some(mut session) = self.session.take() {
            session.close().await;
        }
    }
}

enum SessionEvent {
    Frame(PushFrame),
    Idle,
    Lost(String),
}

/// Push channel client
pub struct PushChannelClient {
    connector: Arc<dyn PushConnector>,
    topic: String,
    fsm: ConnectionFsm,
    commands_rx: mpsc::UnboundedReceiver<PushCommand>,
    // keeps the command stream open even when every handle is dropped
    _commands_tx: mpsc::UnboundedSender<PushCommand>,
    status_tx: watch::Sender<PushStatus>,
    retry_delay: Duration,
}

impl PushChannelClient {
    pub fn new(
        connector: Arc<dyn PushConnector>,
        topic: &str,
        policy: ReconnectPolicy,
    ) -> (Self, PushHandle) {
        let fsm = ConnectionFsm::new(policy);
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(PushStatus::from_fsm(&fsm));

        let handle = PushHandle {
            commands: commands_tx.clone(),
            status: status_rx,
        };
        let client = Self {
            connector,
            topic: topic.to_string(),
            fsm,
            commands_rx,
            _commands_tx: commands_tx,
            status_tx,
            retry_delay: Duration::ZERO,
        };
        (client, handle)
    }

    /// Run until shutdown. Connects immediately, then follows the FSM.
    pub async fn run<S, F>(
        mut self,
        sink: &dyn PushSink,
        sleep_fn: S,
        mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
    ) where
        S: Fn(Duration) -> F,
        F: Future<Output = ()>,
    {
        info!("Push channel client starting on topic {}...", self.topic);

        let mut subscription: Option<Subscription> = None;
        self.apply(ConnectionEvent::Connect, &mut subscription, None).await;

        loop {
            match self.fsm.state() {
                ConnectionState::Connecting => {
                    let outcome = tokio::select! {
                        _ = &mut shutdown_signal => break,
                        cmd = self.commands_rx.recv() => Err(cmd),
                        result = self.connector.connect() => Ok(result),
                    };
                    match outcome {
                        Ok(Ok(session)) => {
                            self.apply(ConnectionEvent::Connected, &mut subscription, Some(session))
                                .await;
                        }
                        Ok(Err(e)) => {
                            warn!("Push channel connection failed: {}", e);
                            self.apply(
                                ConnectionEvent::ConnectionFailed(e.to_string()),
                                &mut subscription,
                                None,
                            )
                            .await;
                        }
                        Err(cmd) => self.on_command(cmd, &mut subscription).await,
                    }
                }
                ConnectionState::Connected => {
                    if subscription.is_none() {
                        self.apply(
                            ConnectionEvent::ConnectionLost("no active subscription".to_string()),
                            &mut subscription,
                            None,
                        )
                        .await;
                        continue;
                    }
                    let Some(active) = subscription.as_mut() else {
                        continue;
                    };

                    let outcome = tokio::select! {
                        _ = &mut shutdown_signal => break,
                        cmd = self.commands_rx.recv() => Err(cmd),
                        result = active.next() => Ok(match result {
                            Ok(Some(frame)) => SessionEvent::Frame(frame),
                            Ok(None) => SessionEvent::Idle,
                            Err(e) => SessionEvent::Lost(e.to_string()),
                        }),
                    };
                    match outcome {
                        Ok(SessionEvent::Frame(frame)) => self.dispatch(frame, sink).await,
                        Ok(SessionEvent::Idle) => {}
                        Ok(SessionEvent::Lost(reason)) => {
                            warn!("Push channel connection lost: {}", reason);
                            self.apply(
                                ConnectionEvent::ConnectionLost(reason),
                                &mut subscription,
                                None,
                            )
                            .await;
                        }
                        Err(cmd) => self.on_command(cmd, &mut subscription).await,
                    }
                }
                ConnectionState::Reconnecting => {
                    let delay = self.retry_delay;
                    debug!("Push channel retry in {:?}", delay);
                    let outcome = tokio::select! {
                        _ = &mut shutdown_signal => break,
                        cmd = self.commands_rx.recv() => Err(cmd),
                        _ = sleep_fn(delay) => Ok(()),
                    };
                    match outcome {
                        Ok(()) => {
                            self.apply(ConnectionEvent::RetryDue, &mut subscription, None).await;
                        }
                        Err(cmd) => self.on_command(cmd, &mut subscription).await,
                    }
                }
                ConnectionState::Disconnected => {
                    let cmd = tokio::select! {
                        _ = &mut shutdown_signal => break,
                        cmd = self.commands_rx.recv() => cmd,
                    };
                    self.on_command(cmd, &mut subscription).await;
                }
            }
        }

        if self.fsm.state() != ConnectionState::Disconnected {
            self.apply(ConnectionEvent::Disconnect, &mut subscription, None).await;
        }
        if let Some(active) = subscription.take() {
            active.invalidate().await;
        }
        info!("Push channel client shutting down...");
    }

    async fn on_command(&mut self, cmd: Option<PushCommand>, subscription: &mut Option<Subscription>) {
        let event = match cmd {
            Some(PushCommand::ForceReconnect) => {
                info!("Manual push channel reconnect requested");
                ConnectionEvent::ForceReconnect
            }
            Some(PushCommand::Disconnect) | None => ConnectionEvent::Disconnect,
        };
        self.apply(event, subscription, None).await;
    }

    /// Feed an event to the FSM and carry out the resulting action
    async fn apply(
        &mut self,
        event: ConnectionEvent,
        subscription: &mut Option<Subscription>,
        mut session: Option<Box<dyn PushSession>>,
    ) {
        let mut next = Some(event);

        while let Some(event) = next.take() {
            let action = match self.fsm.process(event) {
                Ok(action) => action,
                Err(e) => {
                    debug!("Ignoring push channel event: {}", e);
                    return;
                }
            };

            if action != ConnectionAction::None {
                if let Some(stale) = subscription.take() {
                    stale.invalidate().await;
                }
            }

            match action {
                ConnectionAction::Subscribe => {
                    if let Some(session) = session.take() {
                        match Subscription::activate(session, &self.topic).await {
                            Ok(active) => {
                                info!("Push channel connected");
                                *subscription = Some(active);
                            }
                            Err((mut session, e)) => {
                                error!("Failed to subscribe to {}: {}", self.topic, e);
                                session.close().await;
                                next = Some(ConnectionEvent::ConnectionFailed(e.to_string()));
                            }
                        }
                    }
                }
                ConnectionAction::ScheduleRetry(delay) => {
                    self.retry_delay = delay;
                }
                ConnectionAction::GiveUp => {
                    warn!(
                        "Push channel gave up after {} attempts; relying on polling until a manual reconnect",
                        self.fsm.failures()
                    );
                }
                ConnectionAction::OpenSession
                | ConnectionAction::CloseSession
                | ConnectionAction::None => {}
            }

            self.publish_status();
        }
    }

    async fn dispatch(&self, frame: PushFrame, sink: &dyn PushSink) {
        if !Topics::is_deployment_topic(&frame.topic) {
            debug!("Ignoring push message on unrelated topic {}", frame.topic);
            return;
        }
        match message::decode(&frame.payload, Utc::now()) {
            Ok(Some(record)) => sink.deliver(record).await,
            Ok(None) => debug!("Ignoring push message of unknown type on {}", frame.topic),
            Err(e) => warn!("Ignoring undecodable push message on {}: {}", frame.topic, e),
        }
    }

    fn publish_status(&self) {
        self.status_tx.send_replace(PushStatus::from_fsm(&self.fsm));
    }
}
