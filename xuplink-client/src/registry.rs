//! Call bookkeeping: internal ids, pending one-shots, live subscriptions
//!
//! Every admitted call gets a monotonically increasing internal id and
//! lands in exactly one of two maps. `pending` holds one-shot calls until
//! their reply (or deadline) removes them; `subscriptions` holds long-lived
//! calls that are replayed after every reconnect and only leave the map on
//! an acknowledged `unsubscribe` or a hard close.

use serde_json::{Map, Value};
use std::collections::HashMap;
use tokio::sync::oneshot;
use xuplink_core::{envelope, Error, Result};

/// Commands whose calls outlive their first reply.
const SUBSCRIPTION_COMMANDS: [&str; 3] = ["subscribe", "unsubscribe", "path_find"];

/// Options accepted by [`UplinkClient::send_with`](crate::UplinkClient::send_with).
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    /// Transmit immediately even while the uplink is not online.
    pub send_if_not_ready: bool,
    /// Never classify as a subscription and never re-fire on flush.
    pub no_replay_after_reconnect: bool,
    /// Per-call deadline in seconds. No deadline when unset.
    pub timeout_seconds: Option<f64>,
    /// Arm the deadline at transmission time instead of at submission.
    pub timeout_starts_when_online: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CallKind {
    OneShot,
    Subscription,
}

#[derive(Debug)]
pub(crate) struct Call {
    pub internal_id: u64,
    /// The rewritten request, ready for the wire (and for replay).
    pub request: Value,
    pub user_id: Option<Value>,
    pub command: String,
    pub kind: CallKind,
    pub options: SendOptions,
    pub reply: Option<oneshot::Sender<Result<Value>>>,
    pub deadline_armed: bool,
}

pub(crate) struct CallRegistry {
    counter: u64,
    pending: HashMap<u64, Call>,
    subscriptions: HashMap<u64, Call>,
}

impl CallRegistry {
    pub(crate) fn new() -> Self {
        Self {
            counter: 0,
            pending: HashMap::new(),
            subscriptions: HashMap::new(),
        }
    }

    /// Validate and normalise a user request into a [`Call`]: command
    /// lowercased and trimmed, id wrapped into the internal envelope, kind
    /// classified. Rejections carry the messages callers match on.
    pub(crate) fn admit(&mut self, request: Value, options: SendOptions) -> Result<Call> {
        let mut map = match request {
            Value::Object(map) => map,
            _ => {
                return Err(Error::CallRejected(
                    "Call must be a JSON object".to_string(),
                ))
            }
        };
        let command = map
            .get("command")
            .and_then(Value::as_str)
            .map(|command| command.trim().to_ascii_lowercase())
            .filter(|command| !command.is_empty())
            .ok_or_else(|| Error::CallRejected("Call requires a string command".to_string()))?;
        map.insert("command".to_string(), Value::String(command.clone()));

        if command == "unsubscribe" {
            strip_ledger_stream(&mut map)?;
        }

        self.counter += 1;
        let internal_id = self.counter;
        let user_id = envelope::rewrite_id(&mut map, internal_id);

        let kind = if SUBSCRIPTION_COMMANDS.contains(&command.as_str())
            && !options.no_replay_after_reconnect
        {
            CallKind::Subscription
        } else {
            CallKind::OneShot
        };

        Ok(Call {
            internal_id,
            request: Value::Object(map),
            user_id,
            command,
            kind,
            options,
            reply: None,
            deadline_armed: false,
        })
    }

    pub(crate) fn insert(&mut self, call: Call) {
        match call.kind {
            CallKind::OneShot => self.pending.insert(call.internal_id, call),
            CallKind::Subscription => self.subscriptions.insert(call.internal_id, call),
        };
    }

    pub(crate) fn take_pending(&mut self, internal_id: u64) -> Option<Call> {
        self.pending.remove(&internal_id)
    }

    pub(crate) fn is_subscription(&self, internal_id: u64) -> bool {
        self.subscriptions.contains_key(&internal_id)
    }

    pub(crate) fn subscription(&self, internal_id: u64) -> Option<&Call> {
        self.subscriptions.get(&internal_id)
    }

    pub(crate) fn subscription_mut(&mut self, internal_id: u64) -> Option<&mut Call> {
        self.subscriptions.get_mut(&internal_id)
    }

    pub(crate) fn remove_subscription(&mut self, internal_id: u64) -> Option<Call> {
        self.subscriptions.remove(&internal_id)
    }

    /// Look a call up in whichever map holds it.
    pub(crate) fn call_mut(&mut self, internal_id: u64) -> Option<&mut Call> {
        match self.pending.get_mut(&internal_id) {
            Some(call) => Some(call),
            None => self.subscriptions.get_mut(&internal_id),
        }
    }

    /// Transmission order for a flush: pending one-shots first (minus the
    /// replay opt-outs), then every subscription, ids ascending within
    /// each group.
    pub(crate) fn flush_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self
            .pending
            .values()
            .filter(|call| !call.options.no_replay_after_reconnect)
            .map(|call| call.internal_id)
            .collect();
        ids.sort_unstable();
        let mut subscriptions: Vec<u64> = self.subscriptions.keys().copied().collect();
        subscriptions.sort_unstable();
        ids.extend(subscriptions);
        ids
    }

    /// Reject every outstanding future and clear both maps.
    pub(crate) fn reject_all(&mut self, error: Error) {
        for (_, mut call) in self.pending.drain().chain(self.subscriptions.drain()) {
            if let Some(reply) = call.reply.take() {
                let _ = reply.send(Err(error.clone()));
            }
        }
    }
}

/// The ledger stream cannot be dropped: it is the client's liveness
/// signal. Strip it from the unsubscribe; reject when nothing else would
/// remain of the request.
fn strip_ledger_stream(map: &mut Map<String, Value>) -> Result<()> {
    let Some(streams) = map.get_mut("streams").and_then(Value::as_array_mut) else {
        return Ok(());
    };
    if !streams.iter().any(|stream| stream.as_str() == Some("ledger")) {
        return Ok(());
    }
    streams.retain(|stream| stream.as_str() != Some("ledger"));
    if streams.is_empty()
        && map
            .keys()
            .all(|key| matches!(key.as_str(), "id" | "command" | "streams"))
    {
        return Err(Error::CallRejected(
            "Unsubscribing from (just) the ledger stream is not allowed".to_string(),
        ));
    }
    Ok(())
}
