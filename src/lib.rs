//! xuplink - resilient JSON-RPC-over-WebSocket client for XRPL-style
//! server clusters
//!
//! This is the convenience crate that re-exports the xuplink sub-crates.
//! Depend on it if you want a single dependency; depend on the members
//! directly if you only need the wire types.
//!
//! # Architecture
//!
//! - **xuplink-core**: call-id envelope, frame codec, error handling
//! - **xuplink-client**: the connection-and-call multiplexer (endpoint
//!   rotation, reconnect policy, liveness watchdog, call registry,
//!   health aggregation, event surface)
//!
//! # Quick start
//!
//! ```rust,no_run
//! use xuplink::UplinkClient;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> xuplink::Result<()> {
//!     let client = UplinkClient::default_cluster()?;
//!     client.ready().await?;
//!
//!     let info = client.send(json!({ "command": "server_info" })).await?;
//!     println!("{info}");
//!
//!     client.close().await?;
//!     Ok(())
//! }
//! ```

pub use xuplink_client as client;
pub use xuplink_core as core;

pub use xuplink_client::{
    ClientConfig, ConnectionState, Event, SendOptions, UplinkBuilder, UplinkClient,
};
pub use xuplink_core::{Error, Result};
