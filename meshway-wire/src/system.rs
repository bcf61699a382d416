//! Built-in system message payloads.
//!
//! These types are pre-registered in every [`TypeRegistry`](crate::TypeRegistry)
//! so routers can always exchange receipts, keep-alives, cancellations,
//! and peer advertisements regardless of application registrations.

use std::any::Any;
use std::time::Duration;

use bytes::{BufMut, BytesMut};
use uuid::Uuid;

use meshway_core::error::PayloadError;
use meshway_core::message::{MsgPayload, StaticPayload};

/// Advertisement property: wire protocol version.
pub const PROP_PROTOCOL_VER: &str = "protocol-ver";
/// Advertisement property: sender build version.
pub const PROP_BUILD_VER: &str = "build-ver";
/// Advertisement property: peer-to-peer forwarding enabled.
pub const PROP_P2P_ENABLE: &str = "p2p-enable";
/// Advertisement property: sender emits receipts.
pub const PROP_RECEIPT_SEND: &str = "receipt-send";
/// Advertisement property: sender runs dead-router detection.
pub const PROP_DEAD_ROUTER_DETECT: &str = "dead-router-detect";
/// Advertisement property: sender machine name.
pub const PROP_MACHINE_NAME: &str = "machine-name";

/// Acknowledges that a forwarded message was accepted for dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiptMsg {
    /// `msg_id` of the message being acknowledged.
    pub for_msg_id: Uuid,
}

impl MsgPayload for ReceiptMsg {
    fn wire_type(&self) -> &str {
        Self::WIRE_TYPE
    }

    fn encode_payload(&self, buf: &mut BytesMut) {
        buf.extend_from_slice(self.for_msg_id.as_bytes());
    }

    fn clone_payload(&self) -> Box<dyn MsgPayload> {
        Box::new(*self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl StaticPayload for ReceiptMsg {
    const WIRE_TYPE: &'static str = "mw.receipt";

    fn decode_payload(payload: &[u8]) -> Result<Self, PayloadError> {
        Ok(Self {
            for_msg_id: read_uuid(payload, 0, "ReceiptMsg")?,
        })
    }
}

/// Keeps a session alive and refreshes the peer's timeout window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepAliveMsg {
    /// How much longer the sender intends to keep the session open.
    pub session_ttl: Duration,
}

impl MsgPayload for KeepAliveMsg {
    fn wire_type(&self) -> &str {
        Self::WIRE_TYPE
    }

    fn encode_payload(&self, buf: &mut BytesMut) {
        buf.put_u64(self.session_ttl.as_millis() as u64);
    }

    fn clone_payload(&self) -> Box<dyn MsgPayload> {
        Box::new(*self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl StaticPayload for KeepAliveMsg {
    const WIRE_TYPE: &'static str = "mw.keepalive";

    fn decode_payload(payload: &[u8]) -> Result<Self, PayloadError> {
        let millis = read_u64(payload, 0, "KeepAliveMsg")?;
        Ok(Self {
            session_ttl: Duration::from_millis(millis),
        })
    }
}

/// Cancels a session. Delivered on explicit cancellation and when a
/// request context is dropped unanswered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCancelMsg {
    pub reason: String,
}

impl SessionCancelMsg {
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl MsgPayload for SessionCancelMsg {
    fn wire_type(&self) -> &str {
        Self::WIRE_TYPE
    }

    fn encode_payload(&self, buf: &mut BytesMut) {
        buf.extend_from_slice(self.reason.as_bytes());
    }

    fn clone_payload(&self) -> Box<dyn MsgPayload> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl StaticPayload for SessionCancelMsg {
    const WIRE_TYPE: &'static str = "mw.cancel";

    fn decode_payload(payload: &[u8]) -> Result<Self, PayloadError> {
        let reason = std::str::from_utf8(payload)
            .map_err(|_| PayloadError::malformed("SessionCancelMsg reason is not UTF-8"))?;
        Ok(Self::new(reason))
    }
}

/// General-purpose UTF-8 text payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextMsg {
    pub text: String,
}

impl TextMsg {
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

impl MsgPayload for TextMsg {
    fn wire_type(&self) -> &str {
        Self::WIRE_TYPE
    }

    fn encode_payload(&self, buf: &mut BytesMut) {
        buf.extend_from_slice(self.text.as_bytes());
    }

    fn clone_payload(&self) -> Box<dyn MsgPayload> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl StaticPayload for TextMsg {
    const WIRE_TYPE: &'static str = "mw.text";

    fn decode_payload(payload: &[u8]) -> Result<Self, PayloadError> {
        let text = std::str::from_utf8(payload)
            .map_err(|_| PayloadError::malformed("TextMsg is not UTF-8"))?;
        Ok(Self::new(text))
    }
}

/// General-purpose key/value payload for structured exchanges that don't
/// warrant their own message type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertyMsg {
    props: Vec<(String, String)>,
}

impl PropertyMsg {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a property, replacing any previous value for the key.
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        if let Some(entry) = self.props.iter_mut().find(|(k, _)| k == key) {
            entry.1 = value;
        } else {
            self.props.push((key.to_string(), value));
        }
    }

    /// Look up a property value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.props
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// All properties in insertion order.
    #[must_use]
    pub fn props(&self) -> &[(String, String)] {
        &self.props
    }
}

impl MsgPayload for PropertyMsg {
    fn wire_type(&self) -> &str {
        Self::WIRE_TYPE
    }

    fn encode_payload(&self, buf: &mut BytesMut) {
        buf.put_u16(self.props.len() as u16);
        for (key, value) in &self.props {
            put_str(buf, key);
            put_str(buf, value);
        }
    }

    fn clone_payload(&self) -> Box<dyn MsgPayload> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl StaticPayload for PropertyMsg {
    const WIRE_TYPE: &'static str = "mw.props";

    fn decode_payload(payload: &[u8]) -> Result<Self, PayloadError> {
        let count = read_u16(payload, 0, "PropertyMsg")?;
        let mut pos = 2;
        let mut props = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let (key, next) = read_str(payload, pos, "PropertyMsg")?;
            let (value, next) = read_str(payload, next, "PropertyMsg")?;
            props.push((key, value));
            pos = next;
        }
        Ok(Self { props })
    }
}

/// Peer advertisement: endpoint-set GUID plus capability properties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertiseMsg {
    pub set_id: Uuid,
    props: Vec<(String, String)>,
}

impl AdvertiseMsg {
    #[must_use]
    pub fn new(set_id: Uuid) -> Self {
        Self {
            set_id,
            props: Vec::new(),
        }
    }

    /// Set a property, replacing any previous value for the key.
    pub fn set_prop(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        if let Some(entry) = self.props.iter_mut().find(|(k, _)| k == key) {
            entry.1 = value;
        } else {
            self.props.push((key.to_string(), value));
        }
    }

    /// Look up a property value.
    #[must_use]
    pub fn prop(&self, key: &str) -> Option<&str> {
        self.props
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// All properties in insertion order.
    #[must_use]
    pub fn props(&self) -> &[(String, String)] {
        &self.props
    }
}

impl MsgPayload for AdvertiseMsg {
    fn wire_type(&self) -> &str {
        Self::WIRE_TYPE
    }

    fn encode_payload(&self, buf: &mut BytesMut) {
        buf.extend_from_slice(self.set_id.as_bytes());
        buf.put_u16(self.props.len() as u16);
        for (key, value) in &self.props {
            put_str(buf, key);
            put_str(buf, value);
        }
    }

    fn clone_payload(&self) -> Box<dyn MsgPayload> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl StaticPayload for AdvertiseMsg {
    const WIRE_TYPE: &'static str = "mw.advertise";

    fn decode_payload(payload: &[u8]) -> Result<Self, PayloadError> {
        let set_id = read_uuid(payload, 0, "AdvertiseMsg")?;
        let count = read_u16(payload, 16, "AdvertiseMsg")?;
        let mut pos = 18;
        let mut props = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let (key, next) = read_str(payload, pos, "AdvertiseMsg")?;
            let (value, next) = read_str(payload, next, "AdvertiseMsg")?;
            props.push((key, value));
            pos = next;
        }
        Ok(Self { set_id, props })
    }
}

// --- payload read/write helpers -----------------------------------------

fn put_str(buf: &mut BytesMut, s: &str) {
    buf.put_u16(s.len() as u16);
    buf.extend_from_slice(s.as_bytes());
}

fn read_uuid(payload: &[u8], pos: usize, what: &'static str) -> Result<Uuid, PayloadError> {
    let bytes: [u8; 16] = payload
        .get(pos..pos + 16)
        .and_then(|s| s.try_into().ok())
        .ok_or(PayloadError::Truncated(what))?;
    Ok(Uuid::from_bytes(bytes))
}

fn read_u16(payload: &[u8], pos: usize, what: &'static str) -> Result<u16, PayloadError> {
    let bytes: [u8; 2] = payload
        .get(pos..pos + 2)
        .and_then(|s| s.try_into().ok())
        .ok_or(PayloadError::Truncated(what))?;
    Ok(u16::from_be_bytes(bytes))
}

fn read_u64(payload: &[u8], pos: usize, what: &'static str) -> Result<u64, PayloadError> {
    let bytes: [u8; 8] = payload
        .get(pos..pos + 8)
        .and_then(|s| s.try_into().ok())
        .ok_or(PayloadError::Truncated(what))?;
    Ok(u64::from_be_bytes(bytes))
}

fn read_str(
    payload: &[u8],
    pos: usize,
    what: &'static str,
) -> Result<(String, usize), PayloadError> {
    let len = read_u16(payload, pos, what)? as usize;
    let start = pos + 2;
    let bytes = payload
        .get(start..start + len)
        .ok_or(PayloadError::Truncated(what))?;
    let s = std::str::from_utf8(bytes)
        .map_err(|_| PayloadError::malformed(format!("{what} string is not UTF-8")))?;
    Ok((s.to_string(), start + len))
}
