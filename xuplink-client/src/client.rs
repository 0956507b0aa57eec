//! Public client handle
//!
//! `UplinkClient` is a cheap handle onto the supervisor task. It is
//! cloneable; all clones share the same uplink, registry and event stream.
//!
//! # Lifecycle
//!
//! 1. **Open**: validate endpoints, spawn the supervisor, start dialing in
//!    the background
//! 2. **Use**: `send` calls (they queue until the uplink is online),
//!    consume `events()`, poll `state()`
//! 3. **Close**: `close()` rejects everything outstanding; a second close
//!    is a precondition failure

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot, watch};

use xuplink_core::{Error, Result};

use crate::config::{ClientConfig, DEFAULT_ENDPOINT};
use crate::endpoints::EndpointSet;
use crate::events::Event;
use crate::health::ConnectionState;
use crate::registry::SendOptions;
use crate::supervisor::{Command, Supervisor};

/// Handle to one resilient uplink.
#[derive(Clone, Debug)]
pub struct UplinkClient {
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<Event>,
    state: watch::Receiver<ConnectionState>,
    closed: Arc<AtomicBool>,
}

impl UplinkClient {
    /// Open a client against one or more candidate endpoints. Connection
    /// establishment happens in the background: `send` may be called
    /// immediately and queues until the uplink is online.
    ///
    /// When several endpoints are given and no attempt cap is configured,
    /// the cap is forced to 3 so rotation can occur.
    pub fn open<I, S>(endpoints: I, mut config: ClientConfig) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let endpoints = EndpointSet::new(endpoints)?;
        if endpoints.len() > 1 && config.max_connection_attempts.is_none() {
            config.max_connection_attempts = Some(3);
        }
        let (command_tx, command_rx) = mpsc::channel(64);
        let (event_tx, _) = broadcast::channel(256);
        let (state_tx, state_rx) = watch::channel(ConnectionState::default());
        let supervisor = Supervisor::new(endpoints, config, event_tx.clone(), state_tx, command_rx);
        tokio::spawn(supervisor.run());
        Ok(Self {
            commands: command_tx,
            events: event_tx,
            state: state_rx,
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Connect to the public cluster with default settings.
    pub fn default_cluster() -> Result<Self> {
        Self::open([DEFAULT_ENDPOINT], ClientConfig::default())
    }

    /// Submit a call and await its reply. For subscriptions the reply is
    /// the acknowledgement; stream updates arrive on [`Self::events`].
    pub async fn send(&self, request: Value) -> Result<Value> {
        self.send_with(request, SendOptions::default()).await
    }

    /// [`Self::send`] with explicit [`SendOptions`].
    pub async fn send_with(&self, request: Value, options: SendOptions) -> Result<Value> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::HardClose);
        }
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(Command::Send {
                request,
                options,
                reply: reply_tx,
            })
            .await
            .map_err(|_| Error::HardClose)?;
        reply_rx.await.map_err(|_| Error::HardClose)?
    }

    /// Resolve once the uplink is demonstrably healthy: online, contact
    /// within the last ten seconds and a known last ledger. Otherwise the
    /// next ledger event settles it.
    pub async fn ready(&self) -> Result<()> {
        // subscribe first so no ledger event can slip between the snapshot
        // and the wait
        let mut events = self.events.subscribe();
        let state = self.state().await;
        if state.online
            && state.sec_last_contact.is_some_and(|sec| sec < 10.0)
            && state.ledger.last.is_some()
        {
            return Ok(());
        }
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(Event::Ledger(_)) => return Ok(()),
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => return Err(Error::HardClose),
                },
                _ = self.commands.closed() => return Err(Error::HardClose),
            }
        }
    }

    /// Read-only snapshot of the uplink.
    pub async fn state(&self) -> ConnectionState {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .commands
            .send(Command::GetState { reply: reply_tx })
            .await
            .is_ok()
        {
            if let Ok(snapshot) = reply_rx.await {
                return snapshot;
            }
        }
        // supervisor already gone: serve the last published snapshot
        self.state.borrow().clone()
    }

    /// Nudge the liveness watchdog without waiting for a ledger event.
    pub async fn alive(&self) {
        let _ = self.commands.send(Command::Alive).await;
    }

    /// Subscribe to the live event stream.
    pub fn events(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// Hard-close the uplink: every outstanding call and subscription is
    /// rejected and the client is unusable afterwards.
    pub async fn close(&self) -> Result<()> {
        self.close_with(None).await
    }

    /// [`Self::close`] with a cause that is surfaced as an `error` event.
    ///
    /// Precondition: the client is not already closed, otherwise
    /// [`Error::AlreadyClosed`] is returned.
    pub async fn close_with(&self, cause: Option<String>) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyClosed);
        }
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .commands
            .send(Command::Close {
                cause,
                reply: reply_tx,
            })
            .await
            .is_ok()
        {
            let _ = reply_rx.await;
        }
        Ok(())
    }
}

/// Fluent construction, mirroring [`ClientConfig`] one option at a time.
pub struct UplinkBuilder {
    endpoints: Vec<String>,
    config: ClientConfig,
}

impl UplinkBuilder {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoints: vec![endpoint.into()],
            config: ClientConfig::default(),
        }
    }

    /// Add a fallback endpoint to rotate to when the current one exhausts
    /// its connect attempts.
    pub fn fallback_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoints.push(endpoint.into());
        self
    }

    pub fn connect_attempt_timeout(mut self, budget: Duration) -> Self {
        self.config.connect_attempt_timeout = budget;
        self
    }

    pub fn assume_offline_after(mut self, window: Duration) -> Self {
        self.config.assume_offline_after = window;
        self
    }

    pub fn max_connection_attempts(mut self, attempts: u32) -> Self {
        self.config.max_connection_attempts = Some(attempts);
        self
    }

    pub fn open(self) -> Result<UplinkClient> {
        UplinkClient::open(self.endpoints, self.config)
    }
}
