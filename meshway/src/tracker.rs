//! Receipt tracking and dead-router detection.
//!
//! Every forwarded message that carries `ReceiptRequest` and a message ID
//! is tracked until its receipt arrives or its time-to-die passes. Expiry
//! is advisory: the router prunes the peer's routes and notifies the
//! application, nothing is resent or cancelled here.
//!
//! Track entries share the router-scoped lock with the dispatcher, so a
//! receipt clears its entry atomically with respect to the expiry scan.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, trace};
use uuid::Uuid;

use meshway_core::config::RouterSettings;
use meshway_core::endpoint::Endpoint;
use meshway_core::flags;
use meshway_core::message::Msg;

use crate::dispatch::RouterShared;

/// Floor for the background scan period.
const MIN_SCAN_PERIOD: Duration = Duration::from_millis(10);

/// One outstanding forwarded message awaiting its receipt.
#[derive(Debug, Clone)]
pub struct MsgTrack {
    pub router_ep: Endpoint,
    pub logical_endpoint_set_id: Uuid,
    pub ttd: Instant,
}

/// Tracks receipts and reports peers that stop acknowledging.
pub struct ReceiptTracker {
    shared: Arc<Mutex<RouterShared>>,
    enabled: bool,
    ttl: Duration,
}

impl ReceiptTracker {
    pub(crate) fn new(shared: Arc<Mutex<RouterShared>>, settings: &RouterSettings) -> Self {
        Self {
            shared,
            enabled: settings.dead_router_enabled(),
            ttl: settings.dead_router_ttl,
        }
    }

    /// Whether tracking is armed at all.
    #[must_use]
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Background scan period derived from the TTL.
    pub(crate) fn scan_period(&self) -> Duration {
        (self.ttl / 2).max(MIN_SCAN_PERIOD)
    }

    /// Arm tracking for a message being forwarded to `peer_ep`.
    ///
    /// No-op unless detection is enabled and the message carries
    /// `ReceiptRequest` plus a non-nil message ID.
    pub fn track(&self, peer_ep: &Endpoint, set_id: Uuid, msg: &Msg) {
        if !self.enabled {
            return;
        }
        if !msg.has_flag(flags::RECEIPT_REQUEST) || msg.msg_id().is_nil() {
            return;
        }

        let track = MsgTrack {
            router_ep: peer_ep.clone(),
            logical_endpoint_set_id: set_id,
            ttd: Instant::now() + self.ttl,
        };
        trace!(msg_id = %msg.msg_id(), peer = %peer_ep, "tracking forwarded message");
        self.shared.lock().tracks.insert(msg.msg_id(), track);
    }

    /// Clear the entry for a received receipt. Returns the cleared track,
    /// if the message was still outstanding.
    pub fn on_receipt(&self, for_msg_id: Uuid) -> Option<MsgTrack> {
        let track = self.shared.lock().tracks.remove(&for_msg_id);
        if track.is_some() {
            trace!(msg_id = %for_msg_id, "receipt cleared outstanding message");
        }
        track
    }

    /// Remove and return every entry whose time-to-die has passed.
    ///
    /// Called periodically from the router's scan thread; each returned
    /// `(router_ep, set_id)` pair triggers one dead-router callback.
    pub fn detect_dead(&self, now: Instant) -> Vec<(Endpoint, Uuid)> {
        let mut shared = self.shared.lock();
        let expired: Vec<Uuid> = shared
            .tracks
            .iter()
            .filter(|(_, track)| track.ttd < now)
            .map(|(id, _)| *id)
            .collect();

        let mut dead = Vec::with_capacity(expired.len());
        for id in expired {
            if let Some(track) = shared.tracks.remove(&id) {
                debug!(msg_id = %id, peer = %track.router_ep, "receipt expired");
                dead.push((track.router_ep, track.logical_endpoint_set_id));
            }
        }
        dead
    }

    /// Number of outstanding tracked messages.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.shared.lock().tracks.len()
    }

    /// Forget everything.
    pub fn clear(&self) {
        self.shared.lock().tracks.clear();
    }
}
