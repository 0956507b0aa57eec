//! Error types for xuplink
//!
//! One cloneable error enum serves the whole workspace. Propagation rules
//! follow the connection core's contract:
//!
//! - **Per-call failures** (semantic rejection, deadline expiry, hard
//!   close) surface on the call's future
//! - **Systemic failures** (connection attempts exhausted) surface on the
//!   event stream
//! - **Routine transport trouble** (write failures, unparseable frames) is
//!   logged and absorbed by the reconnect path, never thrown at callers
//!
//! The `Display` strings on the rejection variants are part of the public
//! contract: callers match on them, so they must not drift.

use thiserror::Error;

/// Result type for xuplink operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for everything the client can fail at
///
/// The enum is `Clone` because a single failure can fan out to many
/// outstanding call futures (for example a hard close rejecting every
/// pending call and subscription at once).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// Construction found no usable `ws://` / `wss://` endpoint.
    #[error("No valid WebSocket endpoint(s) specified")]
    NoValidEndpoints,

    /// The call was rejected before it reached the wire (malformed, or a
    /// forbidden operation such as unsubscribing from just the ledger
    /// stream).
    #[error("{0}")]
    CallRejected(String),

    /// The per-call deadline fired before a response arrived.
    #[error("Call timeout after {0} seconds")]
    CallTimeout(f64),

    /// The client was hard-closed while the call was outstanding.
    #[error("Class (connection) hard close requested")]
    HardClose,

    /// Every allowed connection attempt failed and there was no endpoint
    /// left to rotate to.
    #[error("Max. connection attempts exceeded")]
    ConnectionExhausted,

    /// `close()` was called on an already closed client.
    #[error("Client already closed")]
    AlreadyClosed,

    /// WebSocket transport error. Log-only in practice: recovery is the
    /// connection supervisor's job, not the caller's.
    #[error("WebSocket error: {0}")]
    Transport(String),

    /// JSON (de)serialization failure.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_messages_are_verbatim() {
        assert_eq!(
            Error::NoValidEndpoints.to_string(),
            "No valid WebSocket endpoint(s) specified"
        );
        assert_eq!(
            Error::HardClose.to_string(),
            "Class (connection) hard close requested"
        );
        assert_eq!(
            Error::ConnectionExhausted.to_string(),
            "Max. connection attempts exceeded"
        );
    }

    #[test]
    fn call_timeout_renders_seconds() {
        assert_eq!(
            Error::CallTimeout(10.0).to_string(),
            "Call timeout after 10 seconds"
        );
        assert_eq!(
            Error::CallTimeout(0.5).to_string(),
            "Call timeout after 0.5 seconds"
        );
    }

    #[test]
    fn call_rejected_passes_message_through() {
        let error = Error::CallRejected("nope".to_string());
        assert_eq!(error.to_string(), "nope");
    }
}
