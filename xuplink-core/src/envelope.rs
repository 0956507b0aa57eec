//! Call-id envelope
//!
//! The client never trusts caller-chosen request ids for correlation.
//! Every outgoing call has its `id` replaced by the envelope
//! `{ "internal": <u64>, "user": <original id> }`; the server mirrors the
//! id back verbatim, the router correlates on `internal` and the caller's
//! original id is restored before anything becomes visible again.
//!
//! Internally initiated probe traffic (the ledger-stream subscription and
//! the `server_info` health probe) uses reserved string ids. In process
//! these are variants of the [`CallId`] sum type; the strings exist only at
//! the wire boundary, because that is what the server reflects.
//!
//! # Reserved id prefixes
//!
//! Callers must not use ids starting with `_WsClient_Internal_`. The
//! router filters such replies out before they can reach user code, so an
//! id collision would make a call unanswerable.

use serde_json::{json, Map, Value};

/// Wire id of the internal ledger-stream subscription probe.
pub const SUBSCRIPTION_PROBE_ID: &str = "_WsClient_Internal_Subscription";

/// Wire id prefix of internal `server_info` probes. The full id carries the
/// emission timestamp: `_WsClient_Internal_ServerInfo@<ms>`.
pub const SERVER_INFO_PROBE_PREFIX: &str = "_WsClient_Internal_ServerInfo";

/// Identity of an outgoing call, as the router sees it on the return path.
#[derive(Debug, Clone, PartialEq)]
pub enum CallId {
    /// A user call: the internal counter value plus the caller's original
    /// id, if the caller supplied one.
    Call {
        internal: u64,
        user: Option<Value>,
    },
    /// The internal ledger-stream subscription probe.
    SubscriptionProbe,
    /// An internal `server_info` probe, tagged with its emission time in
    /// Unix milliseconds so the reply yields a round-trip latency sample.
    ServerInfoProbe { sent_at_ms: u64 },
}

impl CallId {
    /// Render the id the way it goes onto the wire.
    pub fn to_wire(&self) -> Value {
        match self {
            CallId::Call { internal, user } => match user {
                Some(user) => json!({ "internal": internal, "user": user }),
                None => json!({ "internal": internal }),
            },
            CallId::SubscriptionProbe => Value::String(SUBSCRIPTION_PROBE_ID.to_string()),
            CallId::ServerInfoProbe { sent_at_ms } => {
                Value::String(format!("{SERVER_INFO_PROBE_PREFIX}@{sent_at_ms}"))
            }
        }
    }

    /// Parse an id mirrored back by the server. Returns `None` for ids this
    /// client never produced (foreign or absent ids fall through to the
    /// async dispatch path).
    pub fn from_wire(id: &Value) -> Option<CallId> {
        match id {
            Value::Object(map) => {
                let internal = map.get("internal")?.as_u64()?;
                Some(CallId::Call {
                    internal,
                    user: map.get("user").cloned(),
                })
            }
            Value::String(s) if s == SUBSCRIPTION_PROBE_ID => Some(CallId::SubscriptionProbe),
            Value::String(s) => {
                let rest = s.strip_prefix(SERVER_INFO_PROBE_PREFIX)?;
                let sent_at_ms = rest.strip_prefix('@')?.parse().ok()?;
                Some(CallId::ServerInfoProbe { sent_at_ms })
            }
            _ => None,
        }
    }
}

/// Replace the outgoing `id` with the internal envelope, returning the
/// caller's original id for later restoration.
pub fn rewrite_id(request: &mut Map<String, Value>, internal: u64) -> Option<Value> {
    let user = request.remove("id");
    let envelope = CallId::Call {
        internal,
        user: user.clone(),
    };
    request.insert("id".to_string(), envelope.to_wire());
    user
}

/// Put the caller's id back onto an inbound message, or drop the `id` key
/// entirely when the caller sent none.
pub fn restore_id(message: &mut Value, user: Option<&Value>) {
    if let Some(map) = message.as_object_mut() {
        match user {
            Some(id) => {
                map.insert("id".to_string(), id.clone());
            }
            None => {
                map.remove("id");
            }
        }
    }
}
