//! dedup.rs
//! Continuity filter in front of the slot clock and the decoder.
//! The source bus re-emits periodic frames; forwarding those repeats would
//! oscillate the event engine and bloat the log. Two separate states:
//! - per-id: a frame whose payload equals the last one seen for that id is dropped
//! - heartbeat: back-to-back identical heartbeat payloads are dropped so a
//!   stalled bus cannot advance the slot clock

use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct DedupFilter {
    last_payload_by_id: HashMap<u16, Vec<u8>>,
    last_heartbeat_payload: Option<Vec<u8>>,
}

impl DedupFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the frame should be forwarded to the decoder.
    /// Comparison is on raw payload bytes, before decoding.
    pub fn accept(&mut self, id: u16, payload: &[u8]) -> bool {
        match self.last_payload_by_id.get(&id) {
            Some(last) if last == payload => false,
            _ => {
                self.last_payload_by_id.insert(id, payload.to_vec());
                true
            }
        }
    }

    /// Returns true if this heartbeat should advance the slot clock.
    /// The heartbeat payload is never consulted for content beyond this
    /// repeat check.
    pub fn accept_heartbeat(&mut self, payload: &[u8]) -> bool {
        if self.last_heartbeat_payload.as_deref() == Some(payload) {
            return false;
        }
        self.last_heartbeat_payload = Some(payload.to_vec());
        true
    }
}
