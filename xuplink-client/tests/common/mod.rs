//! Common test utilities for xuplink-client integration tests
//!
//! Provides an in-process WebSocket server that answers like a rippled
//! node: it acks `server_info` and the stream commands, can push stream
//! frames to every connected client, drop connections on demand and
//! records every request it receives together with the connection it
//! arrived on.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

use xuplink_client::Event;

#[derive(Clone, Debug)]
enum ServerCmd {
    Send(String),
    Kick,
}

/// Mock rippled-style WebSocket server.
pub struct MockRippled {
    addr: SocketAddr,
    cmd_tx: broadcast::Sender<ServerCmd>,
    requests_rx: mpsc::Receiver<(usize, Value)>,
    connections: Arc<AtomicUsize>,
    shutdown_tx: mpsc::Sender<()>,
}

impl MockRippled {
    /// Start a server with the default handler: probe-friendly acks for
    /// `server_info`, `subscribe`, `unsubscribe` and `path_find`.
    pub async fn start() -> Self {
        Self::with_handler(default_handler).await
    }

    /// Start a server with a custom request handler. The handler receives
    /// each parsed request and may return a reply frame.
    pub async fn with_handler<F>(handler: F) -> Self
    where
        F: Fn(&Value) -> Option<Value> + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (cmd_tx, _) = broadcast::channel::<ServerCmd>(64);
        let (request_tx, requests_rx) = mpsc::channel::<(usize, Value)>(256);
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let connections = Arc::new(AtomicUsize::new(0));

        let handler = Arc::new(handler);
        let accept_cmd_tx = cmd_tx.clone();
        let accept_connections = connections.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    accepted = listener.accept() => {
                        let Ok((stream, _)) = accepted else { break };
                        let index = accept_connections.fetch_add(1, Ordering::SeqCst);
                        let handler = handler.clone();
                        let request_tx = request_tx.clone();
                        let mut cmd_rx = accept_cmd_tx.subscribe();

                        tokio::spawn(async move {
                            let Ok(ws) = accept_async(stream).await else { return };
                            let (mut write, mut read) = ws.split();
                            loop {
                                tokio::select! {
                                    cmd = cmd_rx.recv() => match cmd {
                                        Ok(ServerCmd::Send(text)) => {
                                            if write.send(Message::Text(text)).await.is_err() {
                                                return;
                                            }
                                        }
                                        Ok(ServerCmd::Kick) => {
                                            let _ = write.close().await;
                                            return;
                                        }
                                        Err(_) => return,
                                    },
                                    frame = read.next() => {
                                        let Some(Ok(Message::Text(text))) = frame else { return };
                                        let Ok(request) = serde_json::from_str::<Value>(&text) else {
                                            continue;
                                        };
                                        let _ = request_tx.send((index, request.clone())).await;
                                        if let Some(reply) = handler(&request) {
                                            if write
                                                .send(Message::Text(reply.to_string()))
                                                .await
                                                .is_err()
                                            {
                                                return;
                                            }
                                        }
                                        // a ledger-stream subscription gets a prompt
                                        // heartbeat, the way a live node would
                                        if subscribes_to_ledger(&request) {
                                            let heartbeat = ledger_closed_frame(6595042);
                                            if write
                                                .send(Message::Text(heartbeat.to_string()))
                                                .await
                                                .is_err()
                                            {
                                                return;
                                            }
                                        }
                                    }
                                }
                            }
                        });
                    }
                }
            }
        });

        // give the accept loop a moment to come up
        tokio::time::sleep(Duration::from_millis(20)).await;

        Self {
            addr,
            cmd_tx,
            requests_rx,
            connections,
            shutdown_tx,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Number of TCP connections accepted so far.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Push a frame to every live connection.
    pub fn push(&self, frame: Value) {
        let _ = self.cmd_tx.send(ServerCmd::Send(frame.to_string()));
    }

    /// Close every live connection server-side.
    pub fn kick(&self) {
        let _ = self.cmd_tx.send(ServerCmd::Kick);
    }

    /// Next request the server received, with its connection index.
    pub async fn next_request(&mut self) -> Option<(usize, Value)> {
        tokio::time::timeout(Duration::from_secs(5), self.requests_rx.recv())
            .await
            .ok()
            .flatten()
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

fn subscribes_to_ledger(request: &Value) -> bool {
    request["command"] == "subscribe"
        && request["streams"]
            .as_array()
            .is_some_and(|streams| streams.iter().any(|stream| stream == "ledger"))
}

/// Default request handler: ack probes and stream commands the way a
/// rippled node would, ignore everything else.
pub fn default_handler(request: &Value) -> Option<Value> {
    let id = request.get("id").cloned().unwrap_or(Value::Null);
    match request.get("command").and_then(Value::as_str) {
        Some("server_info") => Some(server_info_reply(id)),
        Some("subscribe") | Some("unsubscribe") | Some("path_find") => Some(json!({
            "id": id,
            "status": "success",
            "type": "response",
            "result": {}
        })),
        _ => None,
    }
}

/// Canned `server_info` reply mirroring the given id.
pub fn server_info_reply(id: Value) -> Value {
    json!({
        "id": id,
        "status": "success",
        "type": "response",
        "result": { "info": {
            "build_version": "1.9.4",
            "pubkey_node": "n9KKBZvwPZ95rQi4BP3an1MRctTyavYkZiLpQDasDAkZBzNWdNwM",
            "complete_ledgers": "32570-6595042",
            "uptime": 413,
            "load_factor": 1.0,
            "validated_ledger": { "base_fee_xrp": 0.00001 }
        } }
    })
}

/// A `ledgerClosed` stream frame for the given index.
pub fn ledger_closed_frame(index: u64) -> Value {
    json!({
        "type": "ledgerClosed",
        "ledger_index": index,
        "ledger_hash": "F7ED94E30C349F4A6A0A0AEA0B34BB6741B29A2E63DDE4FFD29E0FA77BC70A17",
        "validated_ledgers": format!("32570-{index}"),
        "reserve_base": 10000000,
        "reserve_inc": 2000000,
        "fee_base": 10,
        "txn_count": 3,
    })
}

/// Await the first event satisfying the predicate, skipping everything
/// else; panics after ten seconds.
pub async fn wait_for_event<F>(
    events: &mut tokio::sync::broadcast::Receiver<Event>,
    mut predicate: F,
) -> Event
where
    F: FnMut(&Event) -> bool,
{
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            match events.recv().await {
                Ok(event) if predicate(&event) => return event,
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                Err(_) => panic!("event stream closed while waiting"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}
