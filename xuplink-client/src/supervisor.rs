//! Connection supervisor
//!
//! One task owns everything mutable: the endpoint cursor, the call
//! registry, the health rings and every timer. Auxiliary tasks (the
//! connect attempt, the socket reader, per-call deadline sleeps) only post
//! [`Flow`] messages back, tagged with a connection generation, so events
//! from a torn-down transport can never touch its successor. This gives
//! the single-threaded cooperative model without a single lock.
//!
//! Lifecycle per connect cycle: tear down any lingering transport, count
//! the attempt, rotate or give up when the per-endpoint budget is spent,
//! then dial with `connect_attempt_timeout` as the dead-connect budget.
//! Once the socket is open two probes go out (the internal ledger-stream
//! subscription and a `server_info`); whichever answers first takes the
//! client online, at which point the registry is flushed: queued one-shots
//! first, then every subscription.

use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{sleep_until, timeout, Instant};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use xuplink_core::{codec, envelope, CallId, Error, Result};

use crate::config::ClientConfig;
use crate::endpoints::EndpointSet;
use crate::events::Event;
use crate::health::{unix_ms, ConnectionState, ServerState};
use crate::registry::{Call, CallRegistry, SendOptions};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

/// Requests from the public handle.
pub(crate) enum Command {
    Send {
        request: Value,
        options: SendOptions,
        reply: oneshot::Sender<Result<Value>>,
    },
    GetState {
        reply: oneshot::Sender<ConnectionState>,
    },
    Alive,
    Close {
        cause: Option<String>,
        reply: oneshot::Sender<()>,
    },
}

/// Messages posted back by auxiliary tasks.
enum Flow {
    Connected {
        generation: u64,
        stream: Box<WsStream>,
    },
    ConnectFailed {
        generation: u64,
        error: String,
    },
    Frame {
        generation: u64,
        text: String,
    },
    TransportGone {
        generation: u64,
        reason: Option<String>,
    },
    CallDeadline {
        internal_id: u64,
        seconds: f64,
    },
}

pub(crate) struct Supervisor {
    config: ClientConfig,
    endpoints: EndpointSet,
    registry: CallRegistry,
    server_state: ServerState,
    events: broadcast::Sender<Event>,
    state_tx: watch::Sender<ConnectionState>,
    commands: mpsc::Receiver<Command>,
    flow_tx: mpsc::Sender<Flow>,
    flows: mpsc::Receiver<Flow>,
    sink: Option<WsSink>,
    reader: Option<tokio::task::JoinHandle<()>>,
    connector: Option<tokio::task::JoinHandle<()>>,
    /// Bumped on every transport teardown; stale flows are dropped.
    generation: u64,
    online: bool,
    closed: bool,
    last_contact: Option<std::time::Instant>,
    watchdog_at: Option<Instant>,
    retry_at: Option<Instant>,
}

impl Supervisor {
    pub(crate) fn new(
        endpoints: EndpointSet,
        config: ClientConfig,
        events: broadcast::Sender<Event>,
        state_tx: watch::Sender<ConnectionState>,
        commands: mpsc::Receiver<Command>,
    ) -> Self {
        let (flow_tx, flows) = mpsc::channel(256);
        Self {
            config,
            endpoints,
            registry: CallRegistry::new(),
            server_state: ServerState::new(),
            events,
            state_tx,
            commands,
            flow_tx,
            flows,
            sink: None,
            reader: None,
            connector: None,
            generation: 0,
            online: false,
            closed: false,
            last_contact: None,
            watchdog_at: None,
            retry_at: None,
        }
    }

    pub(crate) async fn run(mut self) {
        self.begin_cycle().await;
        while !self.closed {
            // select! evaluates every branch expression before polling, so
            // disabled timer branches still need a placeholder deadline
            let watchdog_at = armed_or_distant(self.watchdog_at);
            let retry_at = armed_or_distant(self.retry_at);
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.on_command(command).await,
                    // every handle dropped: same teardown as a hard close
                    None => self.shutdown(None).await,
                },
                Some(flow) = self.flows.recv() => self.on_flow(flow).await,
                _ = sleep_until(watchdog_at), if self.watchdog_at.is_some() => {
                    self.on_watchdog().await;
                }
                _ = sleep_until(retry_at), if self.retry_at.is_some() => {
                    self.retry_at = None;
                    self.begin_cycle().await;
                }
            }
        }
    }

    async fn on_command(&mut self, command: Command) {
        match command {
            Command::Send {
                request,
                options,
                reply,
            } => self.on_send(request, options, reply).await,
            Command::GetState { reply } => {
                let _ = reply.send(self.snapshot());
            }
            Command::Alive => self.kick_watchdog(),
            Command::Close { cause, reply } => {
                self.shutdown(cause).await;
                let _ = reply.send(());
            }
        }
    }

    async fn on_send(
        &mut self,
        request: Value,
        options: SendOptions,
        reply: oneshot::Sender<Result<Value>>,
    ) {
        if self.closed {
            let _ = reply.send(Err(Error::HardClose));
            return;
        }
        let mut call = match self.registry.admit(request, options) {
            Ok(call) => call,
            Err(error) => {
                let _ = reply.send(Err(error));
                return;
            }
        };
        call.reply = Some(reply);
        if !call.options.timeout_starts_when_online {
            Self::arm_deadline(&self.flow_tx, &mut call);
        }
        let transmit = self.online || call.options.send_if_not_ready;
        let internal_id = call.internal_id;
        self.registry.insert(call);
        if transmit {
            self.transmit(internal_id).await;
        } else {
            tracing::debug!(internal_id, "uplink not ready, call queued for flush");
        }
    }

    /// Arm the per-call deadline exactly once. The sleep is fire-and-forget:
    /// a deadline arriving after resolution finds no registry entry and is
    /// a no-op.
    fn arm_deadline(flow_tx: &mpsc::Sender<Flow>, call: &mut Call) {
        if call.deadline_armed {
            return;
        }
        let Some(seconds) = call.options.timeout_seconds else {
            return;
        };
        if !(seconds.is_finite() && seconds > 0.0) {
            return;
        }
        call.deadline_armed = true;
        let flow_tx = flow_tx.clone();
        let internal_id = call.internal_id;
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs_f64(seconds)).await;
            let _ = flow_tx
                .send(Flow::CallDeadline {
                    internal_id,
                    seconds,
                })
                .await;
        });
    }

    async fn transmit(&mut self, internal_id: u64) {
        let text = match self.registry.call_mut(internal_id) {
            Some(call) => {
                if call.options.timeout_starts_when_online {
                    Self::arm_deadline(&self.flow_tx, call);
                }
                match codec::encode(&call.request) {
                    Ok(text) => text,
                    Err(error) => {
                        tracing::warn!(%error, internal_id, "failed to encode call");
                        return;
                    }
                }
            }
            None => return,
        };
        self.write_frame(text).await;
    }

    async fn write_frame(&mut self, text: String) {
        let Some(sink) = self.sink.as_mut() else {
            return;
        };
        if let Err(error) = sink.send(Message::Text(text)).await {
            // the reader observes the loss; recovery happens there
            tracing::warn!(%error, "transport write failed");
        }
    }

    /// One connect cycle: teardown, attempt accounting, rotation or
    /// exhaustion, then the dial itself.
    async fn begin_cycle(&mut self) {
        if self.closed {
            return;
        }
        self.teardown_transport();
        self.server_state.connect_attempts += 1;

        if let Some(max) = self.config.max_connection_attempts {
            if self.server_state.connect_attempts >= max as i32 {
                if self.endpoints.len() > 1 {
                    if self.endpoints.advance() {
                        self.emit(Event::Round);
                    }
                    let endpoint = self.endpoints.current().to_string();
                    tracing::info!(%endpoint, "connect attempts exhausted, rotating");
                    self.emit(Event::NodeSwitch(endpoint));
                    self.server_state.connect_attempts = 0;
                } else {
                    tracing::error!("connect attempts exhausted, no endpoint left");
                    self.emit(Event::Error(Error::ConnectionExhausted.to_string()));
                    self.enter_closed(Error::ConnectionExhausted);
                    return;
                }
            }
        }

        let generation = self.generation;
        let endpoint = self.endpoints.current().to_string();
        let budget = self.config.connect_attempt_timeout;
        let flow_tx = self.flow_tx.clone();
        tracing::info!(
            %endpoint,
            attempt = self.server_state.connect_attempts,
            "connecting"
        );
        self.connector = Some(tokio::spawn(async move {
            let flow = match timeout(budget, connect_async(endpoint.as_str())).await {
                Ok(Ok((stream, _response))) => Flow::Connected {
                    generation,
                    stream: Box::new(stream),
                },
                Ok(Err(error)) => Flow::ConnectFailed {
                    generation,
                    error: error.to_string(),
                },
                Err(_) => Flow::ConnectFailed {
                    generation,
                    error: "connect attempt timed out".to_string(),
                },
            };
            let _ = flow_tx.send(flow).await;
        }));
    }

    async fn on_flow(&mut self, flow: Flow) {
        match flow {
            Flow::Connected { generation, stream } => {
                if generation != self.generation || self.closed {
                    return;
                }
                self.connector = None;
                self.attach_transport(*stream).await;
            }
            Flow::ConnectFailed { generation, error } => {
                if generation != self.generation || self.closed {
                    return;
                }
                self.connector = None;
                tracing::warn!(
                    error = %error,
                    endpoint = self.endpoints.current(),
                    "connect attempt failed"
                );
                self.transport_down().await;
            }
            Flow::Frame { generation, text } => {
                if generation != self.generation || self.closed {
                    return;
                }
                self.route_frame(&text).await;
            }
            Flow::TransportGone { generation, reason } => {
                if generation != self.generation || self.closed {
                    return;
                }
                if let Some(reason) = reason {
                    tracing::warn!(%reason, "transport lost");
                }
                self.transport_down().await;
            }
            Flow::CallDeadline {
                internal_id,
                seconds,
            } => self.on_deadline(internal_id, seconds),
        }
    }

    async fn attach_transport(&mut self, stream: WsStream) {
        let (sink, reader_half) = stream.split();
        self.sink = Some(sink);
        let generation = self.generation;
        let flow_tx = self.flow_tx.clone();
        self.reader = Some(tokio::spawn(read_loop(reader_half, generation, flow_tx)));
        tracing::debug!(endpoint = self.endpoints.current(), "transport open, probing");
        self.send_subscription_probe().await;
        self.send_server_info_probe().await;
    }

    async fn send_subscription_probe(&mut self) {
        let request = json!({
            "id": CallId::SubscriptionProbe.to_wire(),
            "command": "subscribe",
            "streams": ["ledger"],
        });
        if let Ok(text) = codec::encode(&request) {
            self.write_frame(text).await;
        }
    }

    async fn send_server_info_probe(&mut self) {
        let id = CallId::ServerInfoProbe {
            sent_at_ms: unix_ms(),
        };
        let request = json!({ "id": id.to_wire(), "command": "server_info" });
        if let Ok(text) = codec::encode(&request) {
            self.write_frame(text).await;
        }
    }

    /// The transport-loss path, shared by failed dials, reader loss and the
    /// liveness watchdog: `close` and `state` always, `offline` when we had
    /// been online, then `retry` with the next cycle scheduled.
    async fn transport_down(&mut self) {
        self.teardown_transport();
        self.server_state.clear_server_info();
        self.emit(Event::Close);
        self.push_state();
        self.emit(Event::State(self.snapshot()));
        if self.online {
            self.online = false;
            self.emit(Event::Offline);
        }
        if self.closed {
            return;
        }
        let delay = self.config.reconnect_delay(self.server_state.connect_attempts);
        tracing::info!(delay_secs = delay.as_secs_f64(), "reconnect scheduled");
        self.emit(Event::Retry);
        self.retry_at = Some(Instant::now() + delay);
    }

    async fn go_online(&mut self) {
        if self.online || self.closed {
            return;
        }
        self.online = true;
        self.server_state.connect_attempts = 0;
        let flush = self.registry.flush_ids();
        if !flush.is_empty() {
            tracing::info!(calls = flush.len(), "flushing queued calls and subscriptions");
        }
        for internal_id in flush {
            self.transmit(internal_id).await;
        }
        self.emit(Event::Online);
        self.push_state();
        self.emit(Event::State(self.snapshot()));
        self.kick_watchdog();
    }

    /// (Re)arm the liveness watchdog; arming replaces the previous timer.
    fn kick_watchdog(&mut self) {
        self.watchdog_at = Some(Instant::now() + self.config.assume_offline_after);
    }

    async fn on_watchdog(&mut self) {
        self.watchdog_at = None;
        if !self.online {
            // startup grace: never recycle a transport that was not up yet
            return;
        }
        tracing::warn!(
            silence_secs = self.config.assume_offline_after.as_secs_f64(),
            "no ledger activity, assuming uplink dead"
        );
        self.transport_down().await;
    }

    fn on_deadline(&mut self, internal_id: u64, seconds: f64) {
        if let Some(mut call) = self.registry.take_pending(internal_id) {
            if let Some(reply) = call.reply.take() {
                tracing::debug!(internal_id, seconds, "call deadline expired");
                let _ = reply.send(Err(Error::CallTimeout(seconds)));
            }
        } else if let Some(call) = self.registry.subscription_mut(internal_id) {
            if let Some(reply) = call.reply.take() {
                tracing::debug!(internal_id, seconds, "subscription ack deadline expired");
                let _ = reply.send(Err(Error::CallTimeout(seconds)));
            }
        }
    }

    async fn route_frame(&mut self, text: &str) {
        let mut message = match codec::decode(text) {
            Ok(value) => value,
            Err(error) => {
                tracing::warn!(%error, "dropping unparseable frame");
                return;
            }
        };
        self.last_contact = Some(std::time::Instant::now());

        match message.get("id").and_then(CallId::from_wire) {
            Some(CallId::ServerInfoProbe { sent_at_ms }) => {
                self.server_state.apply_server_info(sent_at_ms, &message);
                self.push_state();
                if !self.online {
                    self.go_online().await;
                }
            }
            Some(CallId::SubscriptionProbe) => {
                // internal ledger-stream plumbing, never surfaced
            }
            Some(CallId::Call { internal, user }) => {
                if self.registry.is_subscription(internal) {
                    self.on_subscription_message(internal, message).await;
                } else if let Some(mut call) = self.registry.take_pending(internal) {
                    envelope::restore_id(&mut message, call.user_id.as_ref());
                    let outcome = message
                        .get("result")
                        .cloned()
                        .unwrap_or_else(|| message.clone());
                    if let Some(reply) = call.reply.take() {
                        let _ = reply.send(Ok(outcome));
                    }
                } else {
                    envelope::restore_id(&mut message, user.as_ref());
                    self.dispatch_async(message, None).await;
                }
            }
            None => self.dispatch_async(message, None).await,
        }
    }

    /// A message correlated to a live subscription: the first one resolves
    /// the `send` future (the ack), every one of them goes through the
    /// async event dispatch. An acknowledged `unsubscribe` has served its
    /// purpose and leaves the map.
    async fn on_subscription_message(&mut self, internal: u64, mut message: Value) {
        let mut acked_unsubscribe = false;
        if let Some(call) = self.registry.subscription_mut(internal) {
            envelope::restore_id(&mut message, call.user_id.as_ref());
            if let Some(reply) = call.reply.take() {
                let _ = reply.send(Ok(message.clone()));
            }
            acked_unsubscribe = call.command == "unsubscribe";
        }
        if acked_unsubscribe {
            self.registry.remove_subscription(internal);
        }
        self.dispatch_async(message, Some(internal)).await;
    }

    /// Async/stream dispatch: `message` for everything, then the typed
    /// events, then the stored-request fallback for typeless follow-ups.
    async fn dispatch_async(&mut self, message: Value, subscription: Option<u64>) {
        self.emit(Event::Message(message.clone()));

        let message_type = message
            .get("type")
            .and_then(Value::as_str)
            .map(str::to_owned);
        match message_type.as_deref() {
            Some("ledgerClosed") => {
                self.server_state.apply_ledger_closed(&message);
                self.push_state();
                self.emit(Event::Ledger(message));
                self.kick_watchdog();
                if !self.online {
                    self.go_online().await;
                }
                // sample the server on every heartbeat
                self.send_server_info_probe().await;
            }
            Some("path_find") => self.emit(Event::Path(message)),
            Some("transaction") => self.emit(Event::Transaction(message)),
            _ => {
                if message.get("validation_public_key").is_some() {
                    self.emit(Event::Validation(message));
                } else if let Some(internal) = subscription {
                    self.dispatch_by_request(internal, message);
                }
            }
        }
    }

    /// Route a typeless follow-up by the request that owns the
    /// subscription: `path_find` maps to `path`; a `subscribe` whose
    /// streams include `"ledger"` maps to `ledger` regardless of other
    /// streams in the same request.
    fn dispatch_by_request(&self, internal: u64, message: Value) {
        let Some(call) = self.registry.subscription(internal) else {
            return;
        };
        match call.command.as_str() {
            "path_find" => self.emit(Event::Path(message)),
            "subscribe" => {
                let has_ledger = call
                    .request
                    .get("streams")
                    .and_then(Value::as_array)
                    .is_some_and(|streams| {
                        streams.iter().any(|stream| stream.as_str() == Some("ledger"))
                    });
                if has_ledger {
                    self.emit(Event::Ledger(message));
                }
            }
            _ => {}
        }
    }

    async fn shutdown(&mut self, cause: Option<String>) {
        if self.closed {
            return;
        }
        tracing::info!(cause = cause.as_deref().unwrap_or("requested"), "hard close");
        self.online = false;
        self.enter_closed(Error::HardClose);
        if let Some(cause) = cause {
            self.emit(Event::Error(cause));
        }
    }

    /// Terminal state: no transport, no timers, every outstanding future
    /// rejected with the given reason.
    fn enter_closed(&mut self, error: Error) {
        self.closed = true;
        self.online = false;
        self.retry_at = None;
        self.teardown_transport();
        self.registry.reject_all(error);
        self.push_state();
    }

    fn teardown_transport(&mut self) {
        self.generation += 1;
        if let Some(connector) = self.connector.take() {
            connector.abort();
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        if let Some(mut sink) = self.sink.take() {
            // best-effort close handshake off the supervisor task
            tokio::spawn(async move {
                let _ = sink.close().await;
            });
        }
        self.watchdog_at = None;
    }

    fn snapshot(&self) -> ConnectionState {
        let online = self.online && !self.closed && self.sink.is_some();
        self.server_state
            .snapshot(online, self.endpoints.current(), self.last_contact)
    }

    fn push_state(&self) {
        let _ = self.state_tx.send(self.snapshot());
    }

    fn emit(&self, event: Event) {
        let _ = self.events.send(event);
    }
}

/// Placeholder for a disabled timer branch; never polled while disarmed.
fn armed_or_distant(at: Option<Instant>) -> Instant {
    at.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600))
}

async fn read_loop(mut stream: SplitStream<WsStream>, generation: u64, flow_tx: mpsc::Sender<Flow>) {
    while let Some(item) = stream.next().await {
        match item {
            Ok(Message::Text(text)) => {
                if flow_tx.send(Flow::Frame { generation, text }).await.is_err() {
                    return;
                }
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(error) => {
                let _ = flow_tx
                    .send(Flow::TransportGone {
                        generation,
                        reason: Some(error.to_string()),
                    })
                    .await;
                return;
            }
        }
    }
    let _ = flow_tx
        .send(Flow::TransportGone {
            generation,
            reason: None,
        })
        .await;
}
