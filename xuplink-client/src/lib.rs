//! Resilient JSON-RPC-over-WebSocket client for XRPL-style server clusters
//!
//! This crate maintains a single live uplink to one of several candidate
//! endpoints, multiplexes request/response calls over it, re-arms
//! subscriptions transparently across reconnects and publishes a live view
//! of server health (ledger range, latency, fee, reserves).
//!
//! # Core behaviour
//!
//! - **One uplink**: endpoints rotate only after the per-endpoint connect
//!   budget is spent; the reconnect cadence is a mild linear ramp with a
//!   1.5 s floor
//! - **Correlation**: outgoing `id`s are wrapped into an internal envelope
//!   and restored on the way back, so caller ids round-trip untouched
//! - **Liveness**: the client keeps an internal ledger-stream subscription;
//!   ledger silence beyond the configured window recycles the transport
//! - **Health**: every ledger close piggy-backs a `server_info` probe that
//!   feeds latency and fee rings
//!
//! # Quick start
//!
//! ```rust,no_run
//! use xuplink_client::{UplinkClient, Event};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> xuplink_core::Result<()> {
//!     let client = UplinkClient::default_cluster()?;
//!     let mut events = client.events();
//!
//!     client.ready().await?;
//!     let ledger = client.send(json!({ "command": "ledger_current" })).await?;
//!     println!("current ledger: {ledger}");
//!
//!     while let Ok(event) = events.recv().await {
//!         if let Event::Ledger(update) = event {
//!             println!("ledger closed: {update}");
//!         }
//!     }
//!     Ok(())
//! }
//! ```

mod client;
mod config;
mod endpoints;
mod events;
mod health;
mod registry;
mod supervisor;

pub use client::{UplinkBuilder, UplinkClient};
pub use config::{ClientConfig, DEFAULT_ENDPOINT};
pub use events::Event;
pub use health::{ConnectionState, LedgerStatus, ReserveStatus, SampleStat, ServerDetails};
pub use registry::SendOptions;
pub use xuplink_core::{Error, Result};
