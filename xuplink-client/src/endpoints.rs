//! Endpoint set: the ordered, deduplicated list of candidate servers
//!
//! The supervisor talks to exactly one endpoint at a time; this type owns
//! the rotation cursor. Candidates are trimmed and filtered to WebSocket
//! schemes at construction, and an empty result is a construction error,
//! not something discovered at connect time.

use xuplink_core::{Error, Result};

#[derive(Debug, Clone)]
pub(crate) struct EndpointSet {
    endpoints: Vec<String>,
    cursor: usize,
}

impl EndpointSet {
    pub(crate) fn new<I, S>(candidates: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut endpoints: Vec<String> = Vec::new();
        for candidate in candidates {
            let trimmed = candidate.as_ref().trim();
            if !(trimmed.starts_with("ws://") || trimmed.starts_with("wss://")) {
                continue;
            }
            if !endpoints.iter().any(|known| known == trimmed) {
                endpoints.push(trimmed.to_string());
            }
        }
        if endpoints.is_empty() {
            return Err(Error::NoValidEndpoints);
        }
        Ok(Self {
            endpoints,
            cursor: 0,
        })
    }

    pub(crate) fn current(&self) -> &str {
        &self.endpoints[self.cursor]
    }

    pub(crate) fn len(&self) -> usize {
        self.endpoints.len()
    }

    /// Advance the cursor to the next endpoint. Returns `true` when the
    /// cursor wrapped back to the start of the list.
    pub(crate) fn advance(&mut self) -> bool {
        self.cursor = (self.cursor + 1) % self.endpoints.len();
        self.cursor == 0
    }
}
