//! Core wire types for the xuplink client
//!
//! This crate provides the pieces shared by anything that speaks the
//! XRPL-style JSON-RPC-over-WebSocket dialect:
//!
//! - **Envelope**: the call-id envelope that lets the client rewrite user
//!   request ids into internally correlated ones, and recognise its own
//!   probe traffic on the way back
//! - **Codec**: text-frame encode/decode helpers over `serde_json`
//! - **Error handling**: one cloneable error enum for the whole workspace
//!
//! # Overview
//!
//! Command payloads are deliberately opaque: everything travels as
//! `serde_json::Value` and only the handful of fields the connection core
//! must inspect (`id`, `command`, `streams`, probe reply bodies) are ever
//! looked at. The `xuplink-client` crate builds the actual connection
//! supervisor on top of this foundation.

pub mod codec;
pub mod envelope;
pub mod error;

pub use envelope::{
    restore_id, rewrite_id, CallId, SERVER_INFO_PROBE_PREFIX, SUBSCRIPTION_PROBE_ID,
};
pub use error::{Error, Result};
