//! Server-health aggregation
//!
//! The supervisor feeds two sources into this module: `ledgerClosed`
//! stream events (ledger range, reserves) and replies to the piggy-backed
//! `server_info` probe (round-trip latency, fee basis, server identity).
//! Consumers only ever see the derived [`ConnectionState`] snapshot.

use serde_json::Value;
use std::collections::VecDeque;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Latency samples kept (most recent last).
pub(crate) const LATENCY_SAMPLES: usize = 10;
/// Fee samples kept (most recent last).
pub(crate) const FEE_SAMPLES: usize = 5;
/// Safety margin applied to the fee derived from `server_info`.
const FEE_CUSHION: f64 = 1.2;

/// Unix time in milliseconds, used to tag probe ids.
pub(crate) fn unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_millis() as u64)
}

/// Fixed-capacity drop-oldest buffer.
#[derive(Debug, Clone)]
pub(crate) struct Ring<T> {
    buffer: VecDeque<T>,
    capacity: usize,
}

impl<T> Ring<T> {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            buffer: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub(crate) fn push(&mut self, item: T) {
        if self.capacity == 0 {
            return;
        }
        if self.buffer.len() == self.capacity {
            self.buffer.pop_front();
        }
        self.buffer.push_back(item);
    }

    pub(crate) fn len(&self) -> usize {
        self.buffer.len()
    }

    pub(crate) fn back(&self) -> Option<&T> {
        self.buffer.back()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &T> {
        self.buffer.iter()
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Sample {
    pub at: Instant,
    pub value: f64,
}

/// Mutable server health, owned exclusively by the supervisor task.
#[derive(Debug, Clone)]
pub(crate) struct ServerState {
    pub validated_ledgers: String,
    pub reserve_base: Option<f64>,
    pub reserve_inc: Option<f64>,
    /// Round-trip latency in milliseconds.
    pub latency: Ring<Sample>,
    /// Fee basis in drops.
    pub fee: Ring<Sample>,
    /// Connect attempts in the current cycle; -1 until the first connect.
    pub connect_attempts: i32,
    pub build_version: String,
    pub pubkey_node: String,
    pub uptime: u64,
}

impl ServerState {
    pub(crate) fn new() -> Self {
        Self {
            validated_ledgers: String::new(),
            reserve_base: None,
            reserve_inc: None,
            latency: Ring::new(LATENCY_SAMPLES),
            fee: Ring::new(FEE_SAMPLES),
            connect_attempts: -1,
            build_version: String::new(),
            pubkey_node: String::new(),
            uptime: 0,
        }
    }

    /// Ingest a `server_info` probe reply. The probe id carries its
    /// emission timestamp, so latency is simply now minus that.
    pub(crate) fn apply_server_info(&mut self, sent_at_ms: u64, message: &Value) {
        let rtt = unix_ms().saturating_sub(sent_at_ms) as f64;
        self.latency.push(Sample {
            at: Instant::now(),
            value: rtt,
        });

        let info = &message["result"]["info"];
        if let Some(version) = info["build_version"].as_str() {
            self.build_version = version.to_string();
        }
        if let Some(pubkey) = info["pubkey_node"].as_str() {
            self.pubkey_node = pubkey.to_string();
        }
        if let Some(uptime) = info["uptime"].as_u64() {
            self.uptime = uptime;
        }
        if let Some(range) = info["complete_ledgers"].as_str() {
            self.validated_ledgers = range.to_string();
        }

        let load_factor = info["load_factor"].as_f64().unwrap_or(0.0);
        let base_fee_xrp = info["validated_ledger"]["base_fee_xrp"]
            .as_f64()
            .unwrap_or(0.0);
        let drops = load_factor * base_fee_xrp * 1e6 * FEE_CUSHION;
        if drops.is_finite() && drops > 0.0 {
            self.fee.push(Sample {
                at: Instant::now(),
                value: drops,
            });
        }
    }

    /// Ingest a `ledgerClosed` stream event.
    pub(crate) fn apply_ledger_closed(&mut self, message: &Value) {
        if let Some(range) = message["validated_ledgers"].as_str() {
            self.validated_ledgers = range.to_string();
        }
        if let Some(reserve) = message["reserve_base"].as_f64() {
            self.reserve_base = Some(reserve / 1e6);
        }
        if let Some(reserve) = message["reserve_inc"].as_f64() {
            self.reserve_inc = Some(reserve / 1e6);
        }
    }

    /// Forget the identity of the server we were talking to. Called on
    /// transport loss: the next endpoint may be a different node.
    pub(crate) fn clear_server_info(&mut self) {
        self.build_version.clear();
        self.pubkey_node.clear();
        self.uptime = 0;
    }

    pub(crate) fn snapshot(
        &self,
        online: bool,
        uri: &str,
        last_contact: Option<Instant>,
    ) -> ConnectionState {
        let (last, count) = ledger_range_stats(&self.validated_ledgers);
        ConnectionState {
            online,
            latency: stat_of(&self.latency),
            server: ServerDetails {
                version: self.build_version.clone(),
                uptime: self.uptime,
                public_key: self.pubkey_node.clone(),
                uri: uri.to_string(),
            },
            ledger: LedgerStatus {
                last,
                validated: self.validated_ledgers.clone(),
                count,
            },
            fee: stat_of(&self.fee),
            reserve: ReserveStatus {
                base: self.reserve_base,
                owner: self.reserve_inc,
            },
            sec_last_contact: last_contact.map(|at| at.elapsed().as_secs_f64()),
        }
    }
}

fn stat_of(ring: &Ring<Sample>) -> SampleStat {
    let newest = ring.back();
    let avg = if ring.len() == 0 {
        None
    } else {
        Some(ring.iter().map(|sample| sample.value).sum::<f64>() / ring.len() as f64)
    };
    SampleStat {
        last: newest.map(|sample| sample.value),
        avg,
        sec_ago: newest.map(|sample| sample.at.elapsed().as_secs_f64()),
    }
}

/// Parse a validated-ledgers range list (`"32570-6595042,6595044"`) into
/// the highest known index and the range size, where a span `a-b` counts
/// `b - a` and a single value counts one.
pub(crate) fn ledger_range_stats(validated: &str) -> (Option<u64>, u64) {
    let mut last: Option<u64> = None;
    let mut count = 0u64;
    for part in validated.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        if let Some((low, high)) = part.split_once('-') {
            if let (Ok(low), Ok(high)) = (low.trim().parse::<u64>(), high.trim().parse::<u64>()) {
                count += high.saturating_sub(low);
                last = Some(last.map_or(high, |known| known.max(high)));
            }
        } else if let Ok(single) = part.parse::<u64>() {
            count += 1;
            last = Some(last.map_or(single, |known| known.max(single)));
        }
    }
    (last, count)
}

/// Rolling statistic over one of the sample rings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleStat {
    /// Most recent sample value.
    pub last: Option<f64>,
    /// Mean over the retained window.
    pub avg: Option<f64>,
    /// Age of the most recent sample, in seconds.
    pub sec_ago: Option<f64>,
}

/// Identity of the server currently (or last) connected to.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerDetails {
    pub version: String,
    pub uptime: u64,
    pub public_key: String,
    pub uri: String,
}

/// Ledger range as reported by the server.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LedgerStatus {
    /// Highest known validated ledger index.
    pub last: Option<u64>,
    /// Raw validated-ledgers range string.
    pub validated: String,
    /// Size of the advertised range.
    pub count: u64,
}

/// Reserve requirements in XRP.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReserveStatus {
    pub base: Option<f64>,
    pub owner: Option<f64>,
}

/// Read-only snapshot of the uplink, as returned by
/// [`UplinkClient::state`](crate::UplinkClient::state).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectionState {
    pub online: bool,
    pub latency: SampleStat,
    pub server: ServerDetails,
    pub ledger: LedgerStatus,
    pub fee: SampleStat,
    pub reserve: ReserveStatus,
    /// Seconds since the last successfully parsed frame.
    pub sec_last_contact: Option<f64>,
}
