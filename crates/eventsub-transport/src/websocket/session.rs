//! Session manager.
//!
//! Drives one logical EventSub session through
//! `Disconnected → Connecting → AwaitingWelcome → Subscribing → Active`,
//! reconnecting on failure until it is explicitly closed. A background task
//! owns the connection; callers get a [`SessionHandle`] for control and a
//! [`SessionStream`] of [`Event`]s delivered in arrival order.

use std::{
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};

use futures_util::Stream;
use tokio::{
    sync::{mpsc, watch},
    time::{Instant, sleep, sleep_until, timeout_at},
};
use tracing::{debug, error, info, warn};

use super::{
    config::SessionConfig,
    frame::{Frame, Notification, SessionInfo, SubscriptionInfo},
    subscription::{SubmitReport, SubscriptionRegistry},
    transport::WsTransport,
};
use crate::{
    error::{TransportError, TransportResult},
    helix::EventSubApi,
    reconnect::ReconnectPolicy,
};

/// Counts successfully established sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionEpoch(pub u64);

/// Session state machine states.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Not started.
    Disconnected,
    /// Opening the transport.
    Connecting,
    /// Transport open, waiting for the welcome frame.
    AwaitingWelcome,
    /// Replaying the subscription registry against the new session.
    Subscribing,
    /// Steady-state notification processing.
    Active,
    /// Waiting before the next connection attempt.
    Reconnecting {
        /// Number of consecutive failed attempts.
        attempt: u32,
    },
    /// Shut down; will not reconnect.
    Closed,
}

impl SessionState {
    /// Check if the session is processing notifications.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }

    /// Check if the session is closed (terminal state).
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

#[derive(Debug, Clone)]
pub enum ControlCommand {
    Close,
}

/// Events emitted by the session task.
#[derive(Debug, Clone)]
pub enum Event {
    /// A session was welcomed and its subscriptions submitted.
    Connected {
        epoch: ConnectionEpoch,
        session_id: String,
        subscriptions: SubmitReport,
    },
    /// The session ended and a new one will be attempted.
    Disconnected {
        epoch: ConnectionEpoch,
        reason: String,
    },
    /// A subscribed event.
    Notification(Notification),
    /// The server revoked a subscription; the session stays up.
    Revocation(SubscriptionInfo),
    /// Unrecoverable failure; the session has stopped.
    Fatal { reason: String },
}

/// Control side of a running session.
#[derive(Clone, Debug)]
pub struct SessionHandle {
    ctrl_tx: mpsc::Sender<ControlCommand>,
    state_rx: watch::Receiver<SessionState>,
}

impl SessionHandle {
    /// Ask the session to close its connection and stop.
    pub async fn close(&self) -> TransportResult<()> {
        self.ctrl_tx.send(ControlCommand::Close).await.map_err(|_| {
            TransportError::connection_closed(Some("Session task shut down".to_string()))
        })
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state_rx.borrow().clone()
    }

    /// Wait until the state satisfies `predicate`.
    pub async fn wait_for_state(&self, predicate: impl FnMut(&SessionState) -> bool) -> SessionState {
        let mut rx = self.state_rx.clone();
        match rx.wait_for(predicate).await {
            Ok(state) => state.clone(),
            // The task is gone, which only happens once it reached `Closed`.
            Err(_) => SessionState::Closed,
        }
    }

    /// Wait until the session task has closed its connection.
    pub async fn closed(&self) {
        self.wait_for_state(SessionState::is_closed).await;
    }

    pub fn is_running(&self) -> bool {
        !self.ctrl_tx.is_closed()
    }
}

/// Ordered stream of session events.
#[derive(Debug)]
pub struct SessionStream {
    rx: mpsc::Receiver<Event>,
}

impl SessionStream {
    pub fn new(rx: mpsc::Receiver<Event>) -> Self {
        Self { rx }
    }

    pub async fn next(&mut self) -> Option<Event> {
        self.rx.recv().await
    }
}

impl Stream for SessionStream {
    type Item = Event;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        Pin::new(&mut this.rx).poll_recv(cx)
    }
}

/// Entry point for starting a session.
pub struct Session;

impl Session {
    /// Validate `config` and spawn the session task.
    pub fn start<A, P>(
        config: SessionConfig,
        api: Arc<A>,
        registry: SubscriptionRegistry,
        policy: P,
    ) -> TransportResult<(SessionHandle, SessionStream)>
    where
        A: EventSubApi + ?Sized,
        P: ReconnectPolicy,
    {
        config.validate().map_err(TransportError::config)?;

        let (ctrl_tx, ctrl_rx) = mpsc::channel(config.command_channel_capacity);
        let (event_tx, event_rx) = mpsc::channel(config.event_channel_capacity);
        let (state_tx, state_rx) = watch::channel(SessionState::Disconnected);

        let driver = SessionDriver {
            config,
            api,
            registry,
            policy,
            ctrl_rx,
            event_tx,
            state_tx,
        };
        tokio::spawn(driver.run());

        Ok((
            SessionHandle { ctrl_tx, state_rx },
            SessionStream::new(event_rx),
        ))
    }
}

/// How establishing a session can fail.
enum EstablishError {
    /// Transient; back off and retry.
    Transient(TransportError),
    /// Retrying cannot help.
    Fatal(TransportError),
    /// The server redirected us before welcoming.
    Redirect(String),
}

/// How an active session ended.
enum ActiveOutcome {
    Shutdown,
    Redirect(String),
    Failed(TransportError),
}

struct Established {
    transport: WsTransport,
    session: SessionInfo,
    report: SubmitReport,
}

struct SessionDriver<A: ?Sized, P> {
    config: SessionConfig,
    api: Arc<A>,
    registry: SubscriptionRegistry,
    policy: P,
    ctrl_rx: mpsc::Receiver<ControlCommand>,
    event_tx: mpsc::Sender<Event>,
    state_tx: watch::Sender<SessionState>,
}

impl<A, P> SessionDriver<A, P>
where
    A: EventSubApi + ?Sized,
    P: ReconnectPolicy,
{
    async fn run(mut self) -> TransportResult<()> {
        let result = self.drive().await;
        if let Err(err) = &result {
            error!(error = %err, "Session stopped");
        }
        self.ctrl_rx.close();
        self.state_tx.send_replace(SessionState::Closed);
        result
    }

    fn set_state(&self, state: SessionState) {
        debug!(?state, "Session state");
        self.state_tx.send_replace(state);
    }

    async fn drive(&mut self) -> TransportResult<()> {
        let mut epoch = ConnectionEpoch(0);
        let mut attempt: u32 = 0;
        let mut target = self.config.url.clone();
        // Redirects received before a welcome since the last established
        // session. Only the first one is followed without a delay.
        let mut early_redirects: u32 = 0;
        // The connection being replaced after a server-directed reconnect.
        // Kept open, but no longer read, until the new session is welcomed.
        let mut previous: Option<WsTransport> = None;

        loop {
            self.set_state(SessionState::Connecting);

            let Some(outcome) = self.establish(&target).await.transpose() else {
                if let Some(previous) = previous.take() {
                    previous.close().await;
                }
                return Ok(());
            };

            let Established {
                mut transport,
                session,
                report,
            } = match outcome {
                Ok(established) => established,
                Err(EstablishError::Fatal(err)) => {
                    self.emit(Event::Fatal {
                        reason: err.to_string(),
                    })
                    .await;
                    if let Some(previous) = previous.take() {
                        previous.close().await;
                    }
                    return Err(err);
                }
                Err(EstablishError::Redirect(url)) => {
                    info!(%url, "Redirected before welcome");
                    target = url;
                    early_redirects = early_redirects.saturating_add(1);
                    if early_redirects > 1 && !self.back_off(&mut attempt).await {
                        if let Some(previous) = previous.take() {
                            previous.close().await;
                        }
                        return Ok(());
                    }
                    continue;
                }
                Err(EstablishError::Transient(err)) => {
                    warn!(error = %err, url = %target, "Failed to establish session");
                    previous = None;
                    target = self.config.url.clone();
                    if !self.emit(Event::Disconnected {
                        epoch,
                        reason: err.to_string(),
                    })
                    .await
                    {
                        return Ok(());
                    }
                    if !self.back_off(&mut attempt).await {
                        return Ok(());
                    }
                    continue;
                }
            };

            if let Some(previous) = previous.take() {
                debug!(url = %previous.url(), "Closing replaced connection");
                previous.close().await;
            }
            attempt = 0;
            early_redirects = 0;
            target = self.config.url.clone();
            epoch.0 += 1;

            info!(
                session_id = %session.id,
                keepalive = ?session.keepalive_timeout_seconds,
                created = report.created,
                rejected = report.rejected,
                "Session active"
            );
            if !self
                .emit(Event::Connected {
                    epoch,
                    session_id: session.id.clone(),
                    subscriptions: report,
                })
                .await
            {
                transport.close().await;
                return Ok(());
            }
            self.set_state(SessionState::Active);

            let keepalive = session.keepalive_timeout_seconds.map(Duration::from_secs);
            match self.run_active(&mut transport, keepalive).await {
                ActiveOutcome::Shutdown => {
                    transport.close().await;
                    return Ok(());
                }
                ActiveOutcome::Redirect(url) => {
                    info!(%url, "Server requested reconnect");
                    previous = Some(transport);
                    target = url;
                    self.set_state(SessionState::Reconnecting { attempt });
                    if !self
                        .emit(Event::Disconnected {
                            epoch,
                            reason: "server requested reconnect".to_string(),
                        })
                        .await
                    {
                        if let Some(previous) = previous.take() {
                            previous.close().await;
                        }
                        return Ok(());
                    }
                }
                ActiveOutcome::Failed(err) => {
                    warn!(error = %err, session_id = %session.id, "Session lost, reconnecting");
                    drop(transport);
                    if !self
                        .emit(Event::Disconnected {
                            epoch,
                            reason: err.to_string(),
                        })
                        .await
                    {
                        return Ok(());
                    }
                    if !self.back_off(&mut attempt).await {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Connect to `url`, wait for the welcome and submit the registry.
    ///
    /// Returns `Ok(None)` if the session is closed meanwhile; an open
    /// connection is closed with a Close frame first.
    async fn establish(&mut self, url: &str) -> Result<Option<Established>, EstablishError> {
        let connect =
            WsTransport::connect(url, self.config.connect_timeout, self.config.max_message_size);
        let connected = tokio::select! {
            biased;
            _ = self.ctrl_rx.recv() => return Ok(None),
            connected = connect => connected,
        };
        let mut transport = connected.map_err(EstablishError::Transient)?;

        self.set_state(SessionState::AwaitingWelcome);
        let welcome_timeout = self.config.welcome_timeout;
        let welcome = tokio::select! {
            biased;
            _ = self.ctrl_rx.recv() => None,
            welcome = await_welcome(&mut transport, welcome_timeout) => Some(welcome),
        };
        let session = match welcome {
            None => {
                transport.close().await;
                return Ok(None);
            }
            Some(Ok(session)) => session,
            Some(Err(EstablishError::Redirect(url))) => {
                transport.close().await;
                return Err(EstablishError::Redirect(url));
            }
            Some(Err(err)) => return Err(err),
        };

        self.set_state(SessionState::Subscribing);
        info!(session_id = %session.id, count = self.registry.len(), "Welcome received, subscribing");
        let submitted = tokio::select! {
            biased;
            _ = self.ctrl_rx.recv() => None,
            submitted = self.registry.submit_all(&*self.api, &session.id) => Some(submitted),
        };
        let report = match submitted {
            None => {
                transport.close().await;
                return Ok(None);
            }
            Some(Ok(report)) => report,
            Some(Err(err)) if err.is_unauthorized() => {
                transport.close().await;
                return Err(EstablishError::Fatal(err));
            }
            Some(Err(err)) => return Err(EstablishError::Transient(err)),
        };

        Ok(Some(Established {
            transport,
            session,
            report,
        }))
    }

    /// Sleep for the policy's delay. Returns `false` if closed meanwhile.
    async fn back_off(&mut self, attempt: &mut u32) -> bool {
        let delay = self.policy.delay(*attempt);
        *attempt = attempt.saturating_add(1);
        self.set_state(SessionState::Reconnecting { attempt: *attempt });
        debug!(?delay, attempt = *attempt, "Waiting before reconnect");

        tokio::select! {
            biased;
            _ = self.ctrl_rx.recv() => false,
            _ = sleep(delay) => true,
        }
    }

    /// Deliver an event, giving up if the session is closed meanwhile or the
    /// consumer went away. Returns `false` in that case.
    async fn emit(&mut self, event: Event) -> bool {
        tokio::select! {
            biased;
            _ = self.ctrl_rx.recv() => false,
            sent = self.event_tx.send(event) => sent.is_ok(),
        }
    }

    async fn run_active(
        &mut self,
        transport: &mut WsTransport,
        keepalive: Option<Duration>,
    ) -> ActiveOutcome {
        let watchdog = keepalive
            .filter(|_| self.config.keepalive_watchdog)
            .map(|keepalive| keepalive + self.config.keepalive_grace);
        let mut deadline = watchdog.map(|window| Instant::now() + window);

        loop {
            let silence = async move {
                match deadline {
                    Some(deadline) => sleep_until(deadline).await,
                    None => std::future::pending().await,
                }
            };

            let text = tokio::select! {
                biased;
                _ = self.ctrl_rx.recv() => return ActiveOutcome::Shutdown,
                next = transport.next_text() => next,
                _ = silence => {
                    let window = watchdog.unwrap_or_default();
                    return ActiveOutcome::Failed(TransportError::timeout(window));
                }
            };

            if let Some(window) = watchdog {
                deadline = Some(Instant::now() + window);
            }

            let text = match text {
                Some(Ok(text)) => text,
                Some(Err(err)) => return ActiveOutcome::Failed(err),
                None => return ActiveOutcome::Failed(TransportError::connection_closed(None)),
            };

            let frame = match Frame::parse(&text) {
                Ok(frame) => frame,
                Err(err) => {
                    let preview: String = text.chars().take(80).collect();
                    warn!(error = %err, frame = %preview, "Dropping malformed frame");
                    continue;
                }
            };

            match frame {
                Frame::Keepalive => {}
                Frame::Notification(notification) => {
                    if !self.emit(Event::Notification(notification)).await {
                        return ActiveOutcome::Shutdown;
                    }
                }
                Frame::Reconnect(session) => match session.reconnect_url {
                    Some(url) => return ActiveOutcome::Redirect(url),
                    None => warn!("Reconnect frame without reconnect_url, ignoring"),
                },
                Frame::Revocation(subscription) => {
                    warn!(
                        kind = %subscription.kind,
                        status = ?subscription.status,
                        condition = ?subscription.condition,
                        "Subscription revoked"
                    );
                    if !self.emit(Event::Revocation(subscription)).await {
                        return ActiveOutcome::Shutdown;
                    }
                }
                Frame::Welcome(session) => {
                    warn!(session_id = %session.id, "Unexpected welcome on active session, ignoring");
                }
                Frame::Unknown { message_type } => {
                    debug!(?message_type, "Ignoring unknown frame");
                }
            }
        }
    }
}

async fn await_welcome(
    transport: &mut WsTransport,
    welcome_timeout: Duration,
) -> Result<SessionInfo, EstablishError> {
    let deadline = Instant::now() + welcome_timeout;

    loop {
        let text = match timeout_at(deadline, transport.next_text()).await {
            Ok(Some(Ok(text))) => text,
            Ok(Some(Err(err))) => return Err(EstablishError::Transient(err)),
            Ok(None) => {
                return Err(EstablishError::Transient(
                    TransportError::connection_closed(None),
                ));
            }
            Err(_) => {
                return Err(EstablishError::Transient(TransportError::timeout(
                    welcome_timeout,
                )));
            }
        };

        match Frame::parse(&text) {
            Ok(Frame::Welcome(session)) => return Ok(session),
            Ok(Frame::Reconnect(SessionInfo {
                reconnect_url: Some(url),
                ..
            })) => return Err(EstablishError::Redirect(url)),
            Ok(frame) => debug!(frame = frame.name(), "Ignoring frame before welcome"),
            Err(err) => warn!(error = %err, "Dropping malformed frame before welcome"),
        }
    }
}
