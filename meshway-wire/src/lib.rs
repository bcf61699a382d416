//! # Meshway Wire
//!
//! **Internal wire-protocol crate for Meshway.**
//!
//! ⚠️ **This is an internal implementation detail. Use the `meshway` crate for the public API.**
//!
//! This crate provides the sans-IO frame codec, the message-type registry,
//! and the built-in system message payloads. Frames from any transport are
//! fed to [`FrameDecoder`]; complete frames convert to and from
//! [`Msg`](meshway_core::message::Msg) values through
//! [`decode_msg`]/[`encode_msg`]. Type IDs with no local registration
//! decode into envelope messages that re-encode byte-identically, so
//! intermediate routers forward frames they cannot interpret.

// Allow some pedantic lints
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]

pub mod frame;
pub mod registry;
pub mod system;

pub use frame::{decode_msg, encode_msg, FrameDecoder, FrameError, DEFAULT_MAX_FRAME, MAGIC};
pub use registry::TypeRegistry;
pub use system::{AdvertiseMsg, KeepAliveMsg, PropertyMsg, ReceiptMsg, SessionCancelMsg, TextMsg};

/// Prelude module for convenient imports
///
/// ```rust
/// use meshway_wire::prelude::*;
/// ```
pub mod prelude {
    pub use crate::frame::{decode_msg, encode_msg, FrameDecoder, FrameError};
    pub use crate::registry::TypeRegistry;
    pub use crate::system::{AdvertiseMsg, KeepAliveMsg, PropertyMsg, ReceiptMsg, SessionCancelMsg, TextMsg};
    pub use bytes::Bytes;
}
