//! # Meshway
//!
//! A hierarchical peer-to-peer message router.
//!
//! Endpoints name either a physical node in a router hierarchy
//! (`physical://root:9100/hub/leaf`) or a logical service identity with
//! wildcards (`logical://apps/billing/*`). A [`MsgRouter`] accepts typed
//! messages, resolves the target through its route table, and either
//! invokes in-process handlers on a worker pool or forwards frames over
//! channels to peer routers. Forwarded messages can request receipts;
//! peers that stop acknowledging are reported through the dead-router
//! hook.
//!
//! ## Example
//!
//! ```rust
//! use meshway::prelude::*;
//! use std::time::Duration;
//!
//! let router = MsgRouter::new("physical://localhost/leaf", RouterSettings::default())?;
//! router.start();
//!
//! let (got_tx, got_rx) = flume::unbounded();
//! router.handle::<PlainMsg>("logical://demo/echo", move |msg, _ctx| {
//!     let _ = got_tx.send(msg.wire_type().to_string());
//! })?;
//!
//! let mut msg = Msg::plain();
//! msg.set_to(Some(Endpoint::parse("logical://demo/echo")?));
//! router.send(msg)?;
//!
//! let seen = got_rx.recv_timeout(Duration::from_secs(1)).unwrap();
//! assert_eq!(seen, PlainMsg::WIRE_TYPE);
//! router.stop();
//! # Ok::<(), meshway::RouterError>(())
//! ```
//!
//! ## Features
//!
//! - **Endpoint algebra**: hierarchy predicates and wildcard matching
//! - **Sans-IO framing**: envelope passthrough for unknown message types
//! - **Two-band dispatch**: priority messages jump the worker queue
//! - **Sessions**: blocking `query`, keep-alives, idempotent retries
//! - **Dead-router detection**: receipt tracking with a pruning callback

// Allow some pedantic lints
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::uninlined_format_args)]

pub mod channel;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod handler;
pub mod router;
pub mod session;
pub mod tracker;

mod worker;

pub use channel::{ChannelError, InprocChannel, MsgChannel};
pub use context::{HandlerCtx, RequestContext};
pub use dispatch::Dispatcher;
pub use error::{Result, RouterError};
pub use handler::{
    EndpointMunger, Handler, HandlerSet, InstanceMunger, SessionHandlerInfo, TargetId,
};
pub use router::MsgRouter;
pub use session::{SessionManager, SessionMetrics};
pub use tracker::{MsgTrack, ReceiptTracker};

// Re-export the kernel and wire layers users interact with.
pub use meshway_core::config::RouterSettings;
pub use meshway_core::endpoint::{AbstractMap, Endpoint, EndpointError};
pub use meshway_core::message::{
    ExtHeader, Msg, MsgBody, MsgPayload, PlainMsg, StaticPayload,
};
pub use meshway_core::{flags, routes};
pub use meshway_wire::{
    decode_msg, encode_msg, AdvertiseMsg, FrameDecoder, FrameError, KeepAliveMsg, PropertyMsg,
    ReceiptMsg, SessionCancelMsg, TextMsg, TypeRegistry,
};

/// Prelude module for convenient imports
///
/// ```rust
/// use meshway::prelude::*;
/// ```
pub mod prelude {
    pub use crate::channel::{InprocChannel, MsgChannel};
    pub use crate::context::{HandlerCtx, RequestContext};
    pub use crate::error::RouterError;
    pub use crate::handler::{Handler, HandlerSet, SessionHandlerInfo};
    pub use crate::router::MsgRouter;
    pub use meshway_core::config::RouterSettings;
    pub use meshway_core::endpoint::Endpoint;
    pub use meshway_core::message::{Msg, PlainMsg, StaticPayload};
    pub use bytes::Bytes;
}
