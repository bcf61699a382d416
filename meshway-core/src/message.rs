//! The message record and its polymorphic payload.
//!
//! A [`Msg`] couples a routing header (endpoints, flags, IDs, extension
//! headers) with a typed payload. Payload types implement [`MsgPayload`]
//! for encoding and [`StaticPayload`] for registry-driven decoding.
//! Frames whose type ID is unknown locally decode into
//! [`MsgBody::Envelope`], which re-encodes byte-identically and is never
//! dispatched to local handlers.

use std::any::Any;
use std::fmt;

use bytes::{Bytes, BytesMut};
use thiserror::Error;
use uuid::Uuid;

use crate::endpoint::Endpoint;
use crate::error::PayloadError;
use crate::flags;

/// Current message header version.
pub const MSG_VERSION: u8 = 1;

/// Default hop budget for freshly created messages.
pub const DEFAULT_TTL: u8 = 5;

/// Maximum number of extension headers per message.
pub const MAX_EXT_HEADERS: usize = 255;

/// Maximum content size of a single extension header.
pub const MAX_EXT_CONTENT: usize = 65_535;

/// A typed message payload: knows its wire type ID and how to encode
/// itself.
pub trait MsgPayload: Any + Send + Sync + fmt::Debug {
    /// The wire type ID this payload serializes under.
    fn wire_type(&self) -> &str;

    /// Append the payload bytes to `buf`.
    fn encode_payload(&self, buf: &mut BytesMut);

    /// Clone into a fresh box. Broadcast dispatch hands every selected
    /// handler its own copy of the message.
    fn clone_payload(&self) -> Box<dyn MsgPayload>;

    /// Downcast support for typed handlers.
    fn as_any(&self) -> &dyn Any;
}

/// A payload type the registry can construct from raw bytes.
pub trait StaticPayload: MsgPayload + Sized {
    /// The wire type ID registered by default for this type.
    const WIRE_TYPE: &'static str;

    /// Decode a payload from frame bytes.
    fn decode_payload(payload: &[u8]) -> Result<Self, PayloadError>;
}

/// Bare message with no payload bytes. Useful for signals where the
/// header carries all the information.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PlainMsg;

impl MsgPayload for PlainMsg {
    fn wire_type(&self) -> &str {
        Self::WIRE_TYPE
    }

    fn encode_payload(&self, _buf: &mut BytesMut) {}

    fn clone_payload(&self) -> Box<dyn MsgPayload> {
        Box::new(*self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl StaticPayload for PlainMsg {
    const WIRE_TYPE: &'static str = "mw.msg";

    fn decode_payload(_payload: &[u8]) -> Result<Self, PayloadError> {
        Ok(Self)
    }
}

/// One extension header record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtHeader {
    pub id: u8,
    pub content: Bytes,
}

/// Message payload storage.
#[derive(Debug)]
pub enum MsgBody {
    /// A locally known payload type.
    Typed(Box<dyn MsgPayload>),

    /// Opaque passthrough for a type ID with no local registration.
    Envelope { type_id: String, payload: Bytes },
}

impl Clone for MsgBody {
    fn clone(&self) -> Self {
        match self {
            Self::Typed(p) => Self::Typed(p.clone_payload()),
            Self::Envelope { type_id, payload } => Self::Envelope {
                type_id: type_id.clone(),
                payload: payload.clone(),
            },
        }
    }
}

/// Errors raised by header mutation.
#[derive(Debug, Error)]
pub enum HeaderError {
    #[error("extension header content exceeds {MAX_EXT_CONTENT} bytes")]
    ContentTooLarge,

    #[error("too many extension headers (max {MAX_EXT_HEADERS})")]
    TooManyHeaders,
}

/// A routable message: header plus typed payload.
#[derive(Debug)]
pub struct Msg {
    version: u8,
    ttl: u8,
    flags: u32,
    to_ep: Option<Endpoint>,
    from_ep: Option<Endpoint>,
    receipt_ep: Option<Endpoint>,
    msg_id: Uuid,
    session_id: Uuid,
    security_token: Option<Bytes>,
    ext_headers: Vec<ExtHeader>,
    body: MsgBody,

    // Non-persistent state: never serialized.
    cached_frame: Option<Bytes>,
    recv_channel: Option<String>,
    in_use: bool,
}

impl Msg {
    /// Create a message around `body`.
    #[must_use]
    pub fn new(body: MsgBody) -> Self {
        Self {
            version: MSG_VERSION,
            ttl: DEFAULT_TTL,
            flags: 0,
            to_ep: None,
            from_ep: None,
            receipt_ep: None,
            msg_id: Uuid::nil(),
            session_id: Uuid::nil(),
            security_token: None,
            ext_headers: Vec::new(),
            body,
            cached_frame: None,
            recv_channel: None,
            in_use: false,
        }
    }

    /// Create a message from a typed payload.
    #[must_use]
    pub fn from_payload(payload: impl MsgPayload + 'static) -> Self {
        Self::new(MsgBody::Typed(Box::new(payload)))
    }

    /// A bare header-only message.
    #[must_use]
    pub fn plain() -> Self {
        Self::from_payload(PlainMsg)
    }

    /// An envelope message preserving an opaque frame payload.
    #[must_use]
    pub fn envelope(type_id: impl Into<String>, payload: Bytes) -> Self {
        Self::new(MsgBody::Envelope {
            type_id: type_id.into(),
            payload,
        })
    }

    // --- header accessors -------------------------------------------------

    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn ttl(&self) -> u8 {
        self.ttl
    }

    pub fn flags(&self) -> u32 {
        self.flags
    }

    pub fn to_ep(&self) -> Option<&Endpoint> {
        self.to_ep.as_ref()
    }

    pub fn from_ep(&self) -> Option<&Endpoint> {
        self.from_ep.as_ref()
    }

    pub fn receipt_ep(&self) -> Option<&Endpoint> {
        self.receipt_ep.as_ref()
    }

    pub fn msg_id(&self) -> Uuid {
        self.msg_id
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn security_token(&self) -> Option<&Bytes> {
        self.security_token.as_ref()
    }

    pub fn ext_headers(&self) -> &[ExtHeader] {
        &self.ext_headers
    }

    pub fn body(&self) -> &MsgBody {
        &self.body
    }

    /// The wire type ID of the payload.
    pub fn wire_type(&self) -> &str {
        match &self.body {
            MsgBody::Typed(p) => p.wire_type(),
            MsgBody::Envelope { type_id, .. } => type_id,
        }
    }

    /// Whether the payload is an opaque envelope.
    pub fn is_envelope(&self) -> bool {
        matches!(self.body, MsgBody::Envelope { .. })
    }

    /// Downcast the payload to a concrete type.
    pub fn payload<P: MsgPayload + 'static>(&self) -> Option<&P> {
        match &self.body {
            MsgBody::Typed(p) => p.as_any().downcast_ref(),
            MsgBody::Envelope { .. } => None,
        }
    }

    // --- header mutation --------------------------------------------------

    fn touch(&mut self) {
        self.cached_frame = None;
    }

    pub fn set_version(&mut self, version: u8) {
        self.touch();
        self.version = version;
    }

    pub fn set_ttl(&mut self, ttl: u8) {
        self.touch();
        self.ttl = ttl;
    }

    /// Spend one hop of the TTL budget. Returns `false` when the budget is
    /// exhausted and the message must be dropped instead of forwarded.
    pub fn consume_hop(&mut self) -> bool {
        if self.ttl == 0 {
            return false;
        }
        self.touch();
        self.ttl -= 1;
        true
    }

    pub fn set_to(&mut self, ep: Option<Endpoint>) {
        self.touch();
        self.to_ep = ep;
    }

    pub fn set_from(&mut self, ep: Option<Endpoint>) {
        self.touch();
        self.from_ep = ep;
    }

    pub fn set_receipt(&mut self, ep: Option<Endpoint>) {
        self.touch();
        self.receipt_ep = ep;
    }

    pub fn set_msg_id(&mut self, id: Uuid) {
        self.touch();
        self.msg_id = id;
    }

    pub fn set_session_id(&mut self, id: Uuid) {
        self.touch();
        self.session_id = id;
    }

    pub fn set_security_token(&mut self, token: Option<Bytes>) {
        self.touch();
        self.security_token = token;
    }

    pub fn has_flag(&self, flag: u32) -> bool {
        self.flags & flag != 0
    }

    pub fn set_flag(&mut self, flag: u32) {
        self.touch();
        self.flags |= flag;
    }

    pub fn clear_flag(&mut self, flag: u32) {
        self.touch();
        self.flags &= !flag;
    }

    /// Recompute the presence bits from field state. Called by the frame
    /// encoder so the header invariants hold on the wire.
    pub fn sync_presence_flags(&mut self) {
        let mut f = self.flags & !flags::PRESENCE_MASK;
        if !self.msg_id.is_nil() {
            f |= flags::MSG_ID;
        }
        if !self.session_id.is_nil() {
            f |= flags::SESSION_ID;
        }
        if self.security_token.is_some() {
            f |= flags::SECURITY_TOKEN;
        }
        if !self.ext_headers.is_empty() {
            f |= flags::EXTENSION_HEADERS;
        }
        self.flags = f;
    }

    /// Set or replace the extension header with the given id.
    pub fn set_ext_header(&mut self, id: u8, content: Bytes) -> Result<(), HeaderError> {
        if content.len() > MAX_EXT_CONTENT {
            return Err(HeaderError::ContentTooLarge);
        }
        self.touch();
        if let Some(existing) = self.ext_headers.iter_mut().find(|h| h.id == id) {
            existing.content = content;
            return Ok(());
        }
        if self.ext_headers.len() >= MAX_EXT_HEADERS {
            return Err(HeaderError::TooManyHeaders);
        }
        self.ext_headers.push(ExtHeader { id, content });
        Ok(())
    }

    /// Fetch the extension header content for `id`.
    pub fn ext_header(&self, id: u8) -> Option<&Bytes> {
        self.ext_headers
            .iter()
            .find(|h| h.id == id)
            .map(|h| &h.content)
    }

    /// Remove the extension header with `id`; returns true if present.
    pub fn remove_ext_header(&mut self, id: u8) -> bool {
        let before = self.ext_headers.len();
        self.touch();
        self.ext_headers.retain(|h| h.id != id);
        self.ext_headers.len() != before
    }

    /// Replace the full extension header set (decoder path).
    pub fn set_ext_headers(&mut self, headers: Vec<ExtHeader>) {
        self.touch();
        self.ext_headers = headers;
    }

    /// Overwrite the raw flag word (decoder path).
    pub fn set_flags_raw(&mut self, flags: u32) {
        self.touch();
        self.flags = flags;
    }

    // --- non-persistent state ---------------------------------------------

    /// The cached wire frame, valid only while the header is unmodified.
    pub fn cached_frame(&self) -> Option<&Bytes> {
        self.cached_frame.as_ref()
    }

    /// Record the frame this message was decoded from or encoded to.
    pub fn set_cached_frame(&mut self, frame: Bytes) {
        self.cached_frame = Some(frame);
    }

    /// Name of the channel this message arrived on, if any.
    pub fn recv_channel(&self) -> Option<&str> {
        self.recv_channel.as_deref()
    }

    pub fn set_recv_channel(&mut self, name: Option<String>) {
        self.recv_channel = name;
    }

    /// Mark the message as owned by the messaging layer. Debug builds
    /// assert single ownership.
    pub fn acquire(&mut self) {
        debug_assert!(!self.in_use, "message is already owned by the router");
        self.in_use = true;
    }

    /// Release ownership back to the application.
    pub fn release(&mut self) {
        self.in_use = false;
    }

    pub fn is_in_use(&self) -> bool {
        self.in_use
    }
}

impl Clone for Msg {
    /// Deep copy for fan-out. The clone starts unowned (`in_use` clear) so
    /// each dispatch task can take ownership independently.
    fn clone(&self) -> Self {
        Self {
            version: self.version,
            ttl: self.ttl,
            flags: self.flags,
            to_ep: self.to_ep.clone(),
            from_ep: self.from_ep.clone(),
            receipt_ep: self.receipt_ep.clone(),
            msg_id: self.msg_id,
            session_id: self.session_id,
            security_token: self.security_token.clone(),
            ext_headers: self.ext_headers.clone(),
            body: self.body.clone(),
            cached_frame: self.cached_frame.clone(),
            recv_channel: self.recv_channel.clone(),
            in_use: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presence_flags_track_fields() {
        let mut msg = Msg::plain();
        msg.sync_presence_flags();
        assert_eq!(msg.flags() & flags::PRESENCE_MASK, 0);

        msg.set_msg_id(Uuid::new_v4());
        msg.set_session_id(Uuid::new_v4());
        msg.set_security_token(Some(Bytes::from_static(b"tok")));
        msg.set_ext_header(7, Bytes::from_static(b"x")).unwrap();
        msg.sync_presence_flags();
        assert_eq!(msg.flags() & flags::PRESENCE_MASK, flags::PRESENCE_MASK);

        msg.set_msg_id(Uuid::nil());
        msg.sync_presence_flags();
        assert!(!msg.has_flag(flags::MSG_ID));
        assert!(msg.has_flag(flags::SESSION_ID));
    }

    #[test]
    fn ext_header_replaces_same_id() {
        let mut msg = Msg::plain();
        msg.set_ext_header(1, Bytes::from_static(b"a")).unwrap();
        msg.set_ext_header(1, Bytes::from_static(b"b")).unwrap();
        assert_eq!(msg.ext_headers().len(), 1);
        assert_eq!(msg.ext_header(1).unwrap().as_ref(), b"b");
        assert!(msg.remove_ext_header(1));
        assert!(!msg.remove_ext_header(1));
    }

    #[test]
    fn ext_header_limits() {
        let mut msg = Msg::plain();
        let big = Bytes::from(vec![0u8; MAX_EXT_CONTENT + 1]);
        assert!(matches!(
            msg.set_ext_header(0, big),
            Err(HeaderError::ContentTooLarge)
        ));
        for id in 0..=254u8 {
            msg.set_ext_header(id, Bytes::from_static(b"x")).unwrap();
        }
        assert!(matches!(
            msg.set_ext_header(255, Bytes::from_static(b"x")),
            Err(HeaderError::TooManyHeaders)
        ));
    }

    #[test]
    fn ttl_consumes_to_zero() {
        let mut msg = Msg::plain();
        msg.set_ttl(2);
        assert!(msg.consume_hop());
        assert!(msg.consume_hop());
        assert_eq!(msg.ttl(), 0);
        assert!(!msg.consume_hop());
    }

    #[test]
    fn header_mutation_drops_cached_frame() {
        let mut msg = Msg::plain();
        msg.set_cached_frame(Bytes::from_static(b"frame"));
        assert!(msg.cached_frame().is_some());
        msg.set_ttl(3);
        assert!(msg.cached_frame().is_none());
    }

    #[test]
    fn payload_downcast() {
        let msg = Msg::plain();
        assert!(msg.payload::<PlainMsg>().is_some());
        assert_eq!(msg.wire_type(), PlainMsg::WIRE_TYPE);

        let env = Msg::envelope("x.unknown", Bytes::from_static(b"abc"));
        assert!(env.is_envelope());
        assert!(env.payload::<PlainMsg>().is_none());
        assert_eq!(env.wire_type(), "x.unknown");
    }
}
