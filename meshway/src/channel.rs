//! Abstract message channels.
//!
//! A channel carries encoded frames between this router and one peer.
//! Transports implement [`MsgChannel`]; the router pulls inbound frames
//! from the channel's flume receiver and pushes outbound frames through
//! `send_frame`, which blocks when the peer's queue is full.
//!
//! Only the in-process pair ships here. TCP/UDP channels live outside the
//! core and plug into the same trait.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use flume::{Receiver, Sender};
use parking_lot::RwLock;
use thiserror::Error;

use meshway_core::endpoint::Endpoint;

/// Outbound queue depth for in-process channels.
const INPROC_DEPTH: usize = 1024;

/// Channel failures.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("channel `{0}` is closed")]
    Closed(String),
}

/// A frame conduit to one peer router.
pub trait MsgChannel: Send + Sync {
    /// Local identifier for this channel, unique per router.
    fn name(&self) -> &str;

    /// The peer's router endpoint, once learned from its advertisement.
    fn peer_ep(&self) -> Option<Endpoint>;

    /// Record the peer's router endpoint.
    fn set_peer_ep(&self, ep: Endpoint);

    /// Receiver of fully framed inbound bytes. The router spawns a pump
    /// that decodes and routes everything arriving here.
    fn inbound(&self) -> Receiver<Bytes>;

    /// Queue a frame to the peer. Blocks while the outbound queue is
    /// full; errors once the channel is closed.
    fn send_frame(&self, frame: Bytes) -> Result<(), ChannelError>;

    /// Stop accepting frames in either direction.
    fn close(&self);
}

static NEXT_PAIR: AtomicU64 = AtomicU64::new(1);

/// In-process channel: one half of a linked pair.
pub struct InprocChannel {
    name: String,
    peer: RwLock<Option<Endpoint>>,
    tx: Sender<Bytes>,
    rx: Receiver<Bytes>,
    closed: AtomicBool,
}

impl InprocChannel {
    /// Create a linked pair. Frames sent on one half arrive on the
    /// other's inbound receiver.
    #[must_use]
    pub fn pair() -> (Arc<Self>, Arc<Self>) {
        let id = NEXT_PAIR.fetch_add(1, Ordering::Relaxed);
        let (a_tx, b_rx) = flume::bounded(INPROC_DEPTH);
        let (b_tx, a_rx) = flume::bounded(INPROC_DEPTH);

        let a = Arc::new(Self {
            name: format!("inproc-{id}a"),
            peer: RwLock::new(None),
            tx: a_tx,
            rx: a_rx,
            closed: AtomicBool::new(false),
        });
        let b = Arc::new(Self {
            name: format!("inproc-{id}b"),
            peer: RwLock::new(None),
            tx: b_tx,
            rx: b_rx,
            closed: AtomicBool::new(false),
        });
        (a, b)
    }
}

impl MsgChannel for InprocChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn peer_ep(&self) -> Option<Endpoint> {
        self.peer.read().clone()
    }

    fn set_peer_ep(&self, ep: Endpoint) {
        *self.peer.write() = Some(ep);
    }

    fn inbound(&self) -> Receiver<Bytes> {
        self.rx.clone()
    }

    fn send_frame(&self, frame: Bytes) -> Result<(), ChannelError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ChannelError::Closed(self.name.clone()));
        }
        self.tx
            .send(frame)
            .map_err(|_| ChannelError::Closed(self.name.clone()))
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_exchanges_frames() {
        let (a, b) = InprocChannel::pair();

        a.send_frame(Bytes::from_static(b"ping")).unwrap();
        assert_eq!(b.inbound().recv().unwrap().as_ref(), b"ping");

        b.send_frame(Bytes::from_static(b"pong")).unwrap();
        assert_eq!(a.inbound().recv().unwrap().as_ref(), b"pong");
    }

    #[test]
    fn close_stops_sends() {
        let (a, _b) = InprocChannel::pair();
        a.close();
        assert!(matches!(
            a.send_frame(Bytes::new()),
            Err(ChannelError::Closed(_))
        ));
    }

    #[test]
    fn peer_endpoint_is_learned() {
        let (a, _b) = InprocChannel::pair();
        assert!(a.peer_ep().is_none());
        a.set_peer_ep(Endpoint::parse("physical://root/hub").unwrap());
        assert!(a.peer_ep().unwrap().is_physical());
    }
}
