//! Public event surface
//!
//! Everything the uplink observes fans out on a broadcast stream obtained
//! via [`UplinkClient::events`](crate::UplinkClient::events). Events are
//! emitted synchronously from the supervisor task in the documented order
//! (a call's future resolves before the same message's side-effect events
//! appear), so listeners always see state consistent with resolved calls.

use crate::health::ConnectionState;
use serde_json::Value;

/// Events published by the client.
#[derive(Debug, Clone)]
pub enum Event {
    /// The uplink came up: probes answered, queued traffic flushed.
    Online,
    /// The uplink was lost after having been online.
    Offline,
    /// A fresh read-only state snapshot.
    State(ConnectionState),
    /// A ledger closed on the server (the cluster heartbeat).
    Ledger(Value),
    /// A transaction stream message.
    Transaction(Value),
    /// A path-finding update.
    Path(Value),
    /// A validation stream message (carries `validation_public_key`).
    Validation(Value),
    /// Every non-internal inbound message, before type dispatch.
    Message(Value),
    /// A reconnect has been scheduled.
    Retry,
    /// Rotated to another endpoint after exhausting connect attempts.
    NodeSwitch(String),
    /// The endpoint cursor wrapped around the whole list.
    Round,
    /// The transport closed.
    Close,
    /// Systemic failure: exhausted connection attempts, or the cause given
    /// to a hard close.
    Error(String),
}
