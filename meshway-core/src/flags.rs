//! Message header flag bits.
//!
//! The values are wire-visible and must never be renumbered; peers built
//! from other snapshots rely on them.

/// `msg_id` field is present in the frame.
pub const MSG_ID: u32 = 0x0000_0001;
/// `session_id` field is present in the frame.
pub const SESSION_ID: u32 = 0x0000_0002;
/// Deliver to every matching logical route instead of one.
pub const BROADCAST: u32 = 0x0000_0004;
/// First message of a server-side session.
pub const OPEN_SESSION: u32 = 0x0000_0008;
/// Message originates from the server side of a session.
pub const SERVER_SESSION: u32 = 0x0000_0010;
/// Sender wants a receipt once the message is accepted for dispatch.
pub const RECEIPT_REQUEST: u32 = 0x0000_0020;
/// Dispatch on the priority worker band.
pub const PRIORITY: u32 = 0x0000_0040;
/// Extension header block is present in the frame.
pub const EXTENSION_HEADERS: u32 = 0x0000_0080;
/// Prefer local routes; do not forward when a local route matches.
pub const CLOSEST_ROUTE: u32 = 0x0000_0100;
/// `security_token` field is present in the frame.
pub const SECURITY_TOKEN: u32 = 0x0000_0200;
/// Replies retain the request's session ID.
pub const KEEP_SESSION_ID: u32 = 0x0800_0000;
/// Reserved bits for routing scope selection.
pub const ROUTING_SCOPE_MASK: u32 = 0x7000_0000;

/// Flags that track field presence and are recomputed at encode time.
pub const PRESENCE_MASK: u32 = MSG_ID | SESSION_ID | SECURITY_TOKEN | EXTENSION_HEADERS;
