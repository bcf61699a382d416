//! Wire frame codec.
//!
//! Frame layout (all integers big-endian):
//!
//! | field | encoding |
//! |---|---|
//! | magic | u8 = `0x88` |
//! | format version | u8 = `0` |
//! | total length | u32, includes this preamble |
//! | type ID | u16 length + UTF-8 bytes |
//! | version, ttl | u8 each |
//! | flags | u32 |
//! | to / from / receipt EP | u16 length + UTF-8, `0xFFFF` = null |
//! | msg ID, session ID | 16 raw bytes each, present per flags |
//! | security token | u16 length + bytes, present per flags |
//! | extension block | u8 count, then (u8 id, u16 length, bytes), per flags |
//! | payload | remainder |
//!
//! [`FrameDecoder`] is a stateful sans-IO splitter: feed it bytes from any
//! transport and pull complete frames out. [`decode_msg`]/[`encode_msg`]
//! convert between frames and [`Msg`] values.

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

use meshway_core::endpoint::{AbstractMap, Endpoint, EndpointError};
use meshway_core::error::PayloadError;
use meshway_core::flags;
use meshway_core::message::{ExtHeader, Msg, MsgBody};

use crate::registry::TypeRegistry;

/// First byte of every frame.
pub const MAGIC: u8 = 0x88;

/// Only recognized frame format.
pub const FORMAT_VERSION: u8 = 0;

/// Magic + format + total length.
pub const PREAMBLE_LEN: usize = 6;

/// Length-prefix sentinel for a null string.
const NULL_LEN: u16 = 0xFFFF;

/// Longest encodable string (0xFFFF is reserved for null).
const MAX_STR_LEN: usize = 0xFFFE;

/// Smallest possible frame: preamble, empty type ID, version, ttl, flags,
/// three null endpoint strings.
const MIN_FRAME_LEN: usize = PREAMBLE_LEN + 2 + 1 + 1 + 4 + 3 * 2;

/// Default upper bound on a single frame.
pub const DEFAULT_MAX_FRAME: usize = 16 * 1024 * 1024;

/// Frame codec errors.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("bad magic byte 0x{0:02x}")]
    BadMagic(u8),

    #[error("unknown frame format {0}")]
    UnknownFormat(u8),

    #[error("truncated frame")]
    Truncated,

    #[error("frame length {len} out of bounds (max {max})")]
    BadLength { len: usize, max: usize },

    #[error("string of {0} bytes exceeds the wire limit")]
    StringTooLong(usize),

    #[error("invalid UTF-8 in frame string")]
    BadString,

    #[error("message type `{0}` is not registered")]
    UnregisteredType(String),

    #[error(transparent)]
    Payload(#[from] PayloadError),

    #[error("invalid endpoint in frame: {0}")]
    Endpoint(#[from] EndpointError),
}

/// Stateful frame splitter.
///
/// Fast path: a whole frame in the buffer comes out as a zero-copy slice.
/// Partial reads accumulate until the declared total length is available.
pub struct FrameDecoder {
    buf: BytesMut,
    max_frame: usize,
}

impl FrameDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_frame(DEFAULT_MAX_FRAME)
    }

    /// A decoder with a custom frame size limit.
    #[must_use]
    pub fn with_max_frame(max_frame: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(4096),
            max_frame,
        }
    }

    /// Append transport bytes to the staging buffer.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Bytes currently staged.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Pull the next complete frame.
    ///
    /// Returns:
    /// - `Ok(Some(frame))` → a complete frame
    /// - `Ok(None)` → need more data
    /// - `Err` → protocol violation; the stream is unrecoverable
    pub fn next_frame(&mut self) -> Result<Option<Bytes>, FrameError> {
        if self.buf.len() < PREAMBLE_LEN {
            return Ok(None);
        }

        if self.buf[0] != MAGIC {
            return Err(FrameError::BadMagic(self.buf[0]));
        }
        if self.buf[1] != FORMAT_VERSION {
            return Err(FrameError::UnknownFormat(self.buf[1]));
        }

        let total = u32::from_be_bytes([self.buf[2], self.buf[3], self.buf[4], self.buf[5]]) as usize;
        if total < MIN_FRAME_LEN || total > self.max_frame {
            return Err(FrameError::BadLength {
                len: total,
                max: self.max_frame,
            });
        }

        if self.buf.len() < total {
            return Ok(None);
        }

        Ok(Some(self.buf.split_to(total).freeze()))
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Encode a message into a frame.
///
/// Returns the cached frame when the header has not been touched since the
/// last encode/decode, which keeps envelope forwarding byte-identical.
/// Presence flags are recomputed and the endpoints are sealed.
///
/// # Errors
///
/// [`FrameError::UnregisteredType`] when a typed payload's wire ID is not
/// in `registry` (send-side lookup miss), plus the usual size errors.
pub fn encode_msg(msg: &mut Msg, registry: &TypeRegistry) -> Result<Bytes, FrameError> {
    if let Some(frame) = msg.cached_frame() {
        return Ok(frame.clone());
    }

    if !msg.is_envelope() && !registry.contains(msg.wire_type()) {
        return Err(FrameError::UnregisteredType(msg.wire_type().to_string()));
    }

    msg.sync_presence_flags();

    let mut buf = BytesMut::with_capacity(256);
    buf.put_u8(MAGIC);
    buf.put_u8(FORMAT_VERSION);
    buf.put_u32(0); // total length, patched below

    put_str(&mut buf, msg.wire_type())?;
    buf.put_u8(msg.version());
    buf.put_u8(msg.ttl());
    buf.put_u32(msg.flags());

    put_opt_ep(&mut buf, msg.to_ep())?;
    put_opt_ep(&mut buf, msg.from_ep())?;
    put_opt_ep(&mut buf, msg.receipt_ep())?;

    if msg.has_flag(flags::MSG_ID) {
        buf.extend_from_slice(msg.msg_id().as_bytes());
    }
    if msg.has_flag(flags::SESSION_ID) {
        buf.extend_from_slice(msg.session_id().as_bytes());
    }
    if let Some(token) = msg.security_token() {
        if token.len() > MAX_STR_LEN {
            return Err(FrameError::StringTooLong(token.len()));
        }
        buf.put_u16(token.len() as u16);
        buf.extend_from_slice(token);
    }
    if msg.has_flag(flags::EXTENSION_HEADERS) {
        buf.put_u8(msg.ext_headers().len() as u8);
        for header in msg.ext_headers() {
            buf.put_u8(header.id);
            buf.put_u16(header.content.len() as u16);
            buf.extend_from_slice(&header.content);
        }
    }

    match msg.body() {
        MsgBody::Typed(payload) => payload.encode_payload(&mut buf),
        MsgBody::Envelope { payload, .. } => buf.extend_from_slice(payload),
    }

    let total = buf.len();
    if total > DEFAULT_MAX_FRAME {
        return Err(FrameError::BadLength {
            len: total,
            max: DEFAULT_MAX_FRAME,
        });
    }
    buf[2..PREAMBLE_LEN].copy_from_slice(&(total as u32).to_be_bytes());

    let frame = buf.freeze();
    msg.set_cached_frame(frame.clone());
    Ok(frame)
}

/// Decode a complete frame into a message.
///
/// Unknown type IDs yield an envelope body; the original frame is cached
/// on the message so an untouched re-encode is byte-identical.
pub fn decode_msg(frame: Bytes, registry: &TypeRegistry) -> Result<Msg, FrameError> {
    let mut r = Reader::new(&frame);

    let magic = r.u8()?;
    if magic != MAGIC {
        return Err(FrameError::BadMagic(magic));
    }
    let format = r.u8()?;
    if format != FORMAT_VERSION {
        return Err(FrameError::UnknownFormat(format));
    }
    let total = r.u32()? as usize;
    if total != frame.len() {
        return Err(FrameError::BadLength {
            len: total,
            max: frame.len(),
        });
    }

    let type_id = r.str()?.ok_or(FrameError::BadString)?;
    let version = r.u8()?;
    let ttl = r.u8()?;
    let raw_flags = r.u32()?;

    let to_ep = r.opt_endpoint()?;
    let from_ep = r.opt_endpoint()?;
    let receipt_ep = r.opt_endpoint()?;

    let msg_id = if raw_flags & flags::MSG_ID != 0 {
        r.uuid()?
    } else {
        uuid::Uuid::nil()
    };
    let session_id = if raw_flags & flags::SESSION_ID != 0 {
        r.uuid()?
    } else {
        uuid::Uuid::nil()
    };
    let token = if raw_flags & flags::SECURITY_TOKEN != 0 {
        let len = r.u16()?;
        if len == NULL_LEN {
            None
        } else {
            Some(Bytes::copy_from_slice(r.take(len as usize)?))
        }
    } else {
        None
    };

    let mut ext_headers = Vec::new();
    if raw_flags & flags::EXTENSION_HEADERS != 0 {
        let count = r.u8()?;
        for _ in 0..count {
            let id = r.u8()?;
            let len = r.u16()? as usize;
            let content = Bytes::copy_from_slice(r.take(len)?);
            ext_headers.push(ExtHeader { id, content });
        }
    }

    let payload = frame.slice(r.pos..);

    let body = match registry.decode(&type_id, &payload) {
        Some(decoded) => MsgBody::Typed(decoded?),
        None => MsgBody::Envelope {
            type_id,
            payload: payload.clone(),
        },
    };

    let mut msg = Msg::new(body);
    msg.set_version(version);
    msg.set_ttl(ttl);
    msg.set_to(to_ep);
    msg.set_from(from_ep);
    msg.set_receipt(receipt_ep);
    msg.set_msg_id(msg_id);
    msg.set_session_id(session_id);
    msg.set_security_token(token);
    msg.set_ext_headers(ext_headers);
    msg.set_flags_raw(raw_flags);
    msg.set_cached_frame(frame);
    Ok(msg)
}

fn put_str(buf: &mut BytesMut, s: &str) -> Result<(), FrameError> {
    if s.len() > MAX_STR_LEN {
        return Err(FrameError::StringTooLong(s.len()));
    }
    buf.put_u16(s.len() as u16);
    buf.extend_from_slice(s.as_bytes());
    Ok(())
}

fn put_opt_ep(buf: &mut BytesMut, ep: Option<&Endpoint>) -> Result<(), FrameError> {
    match ep {
        Some(ep) => {
            put_str(buf, ep.canonical())?;
            ep.seal();
            Ok(())
        }
        None => {
            buf.put_u16(NULL_LEN);
            Ok(())
        }
    }
}

/// Bounds-checked cursor over a frame.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], FrameError> {
        let slice = self
            .buf
            .get(self.pos..self.pos + n)
            .ok_or(FrameError::Truncated)?;
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, FrameError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, FrameError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, FrameError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn uuid(&mut self) -> Result<uuid::Uuid, FrameError> {
        let b = self.take(16)?;
        let bytes: [u8; 16] = b.try_into().map_err(|_| FrameError::Truncated)?;
        Ok(uuid::Uuid::from_bytes(bytes))
    }

    fn str(&mut self) -> Result<Option<String>, FrameError> {
        let len = self.u16()?;
        if len == NULL_LEN {
            return Ok(None);
        }
        let bytes = self.take(len as usize)?;
        let s = std::str::from_utf8(bytes).map_err(|_| FrameError::BadString)?;
        Ok(Some(s.to_string()))
    }

    fn opt_endpoint(&mut self) -> Result<Option<Endpoint>, FrameError> {
        match self.str()? {
            Some(s) => {
                // Depth limits are enforced where endpoints originate;
                // the wire accepts whatever a peer's configuration allows.
                // Frames carry canonical physical/logical forms only, so
                // abstract resolution never applies here.
                let ep = Endpoint::parse_with(&s, usize::MAX, &AbstractMap::new())?;
                ep.seal();
                Ok(Some(ep))
            }
            None => Ok(None),
        }
    }
}
