//! Endpoint addressing for the router hierarchy.
//!
//! An endpoint names either a *physical* node in the router hierarchy
//! (`physical://root:port/hub/leaf`) or a *logical* service identity
//! (`logical://apps/billing/*`). Abstract endpoints (`abstract://name`)
//! exist only at parse time and resolve through the [`AbstractMap`].
//!
//! Endpoints are case-insensitive values with a canonical lowercased
//! string form. The canonical form is computed lazily and cached; once an
//! endpoint has been written into a wire frame it is sealed and further
//! mutation is an error.

mod abstract_map;
mod parse;

pub use abstract_map::{install as install_abstract_map, AbstractMap};

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};

use once_cell::sync::OnceCell;

/// The wildcard segment. Only valid as the entire final segment of a
/// logical endpoint.
pub const WILDCARD: &str = "*";

/// First segment of the discard endpoint (`logical://null/...`).
pub const NULL_SEGMENT: &str = "null";

/// Root host naming a detached hierarchy.
pub const DETACHED_HOST: &str = "detached";

/// Baseline physical hierarchy depth (root / hub / leaf).
pub const DEFAULT_MAX_PHYSICAL_DEPTH: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Kind {
    Physical {
        root_host: String,
        root_port: u16,
        object_id: Option<String>,
        channel_hint: Option<String>,
    },
    Logical,
}

/// A routable address: physical node or logical service identity.
#[derive(Debug)]
pub struct Endpoint {
    pub(crate) kind: Kind,
    pub(crate) segments: Vec<String>,
    pub(crate) broadcast: bool,
    pub(crate) cached: OnceCell<String>,
    pub(crate) sealed: AtomicBool,
}

/// Errors raised by endpoint parsing and misuse.
#[derive(Debug, thiserror::Error)]
pub enum EndpointError {
    #[error("invalid endpoint `{uri}`: {reason}")]
    InvalidEndpoint { uri: String, reason: String },

    #[error("endpoint already serialized; mutation is not allowed")]
    AlreadyInitialized,

    #[error("operation requires a physical endpoint")]
    NotPhysical,

    #[error("operation requires a logical endpoint")]
    NotLogical,
}

impl EndpointError {
    pub(crate) fn invalid(uri: &str, reason: impl Into<String>) -> Self {
        Self::InvalidEndpoint {
            uri: uri.to_string(),
            reason: reason.into(),
        }
    }
}

impl Endpoint {
    /// Parse an endpoint with the default depth limit, resolving
    /// `abstract://` names through the installed process-wide map.
    ///
    /// Routers resolve against their own configured map instead (see
    /// [`Endpoint::parse_with`]); the installed map is a convenience for
    /// single-router processes and defaults to empty, in which case
    /// abstract names fall back to `logical://<name>`.
    ///
    /// # Examples
    ///
    /// ```
    /// use meshway_core::endpoint::Endpoint;
    ///
    /// let ep = Endpoint::parse("physical://root:9100/hub/leaf").unwrap();
    /// assert!(ep.is_physical());
    ///
    /// let ep = Endpoint::parse("logical://apps/billing/*").unwrap();
    /// assert!(ep.is_logical() && ep.has_wildcard());
    /// ```
    pub fn parse(uri: &str) -> Result<Self, EndpointError> {
        abstract_map::with_installed(|map| parse::parse(uri, DEFAULT_MAX_PHYSICAL_DEPTH, map))
    }

    /// Parse with an explicit abstract map and depth limit. This is the
    /// full form the other parse constructors delegate to.
    pub fn parse_with(
        uri: &str,
        max_depth: usize,
        map: &AbstractMap,
    ) -> Result<Self, EndpointError> {
        parse::parse(uri, max_depth, map)
    }

    /// Parse with an explicit abstract map instead of the installed one.
    pub fn parse_with_map(uri: &str, map: &AbstractMap) -> Result<Self, EndpointError> {
        parse::parse(uri, DEFAULT_MAX_PHYSICAL_DEPTH, map)
    }

    /// Parse with a non-default physical depth limit.
    pub fn parse_with_depth(uri: &str, max_depth: usize) -> Result<Self, EndpointError> {
        abstract_map::with_installed(|map| parse::parse(uri, max_depth, map))
    }

    /// Build a physical endpoint from structural fields.
    pub fn physical<I, S>(host: &str, port: u16, segments: I) -> Result<Self, EndpointError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut uri = format!("physical://{}", host.to_ascii_lowercase());
        if port != 0 {
            uri.push_str(&format!(":{port}"));
        }
        for seg in segments {
            uri.push('/');
            uri.push_str(seg.as_ref());
        }
        Self::parse(&uri)
    }

    /// Build a logical endpoint from segments.
    pub fn logical<I, S>(segments: I) -> Result<Self, EndpointError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let joined = segments
            .into_iter()
            .map(|s| s.as_ref().to_string())
            .collect::<Vec<_>>()
            .join("/");
        Self::parse(&format!("logical://{joined}"))
    }

    /// Build a channel endpoint: no root, no segments, only a transport
    /// hint for the channel layer.
    pub fn channel(hint: &str) -> Result<Self, EndpointError> {
        Self::parse(&format!("physical://?c={hint}"))
    }

    /// Compose a child endpoint one level below `self`.
    pub fn child(&self, segment: &str) -> Result<Self, EndpointError> {
        self.child_with_depth(segment, DEFAULT_MAX_PHYSICAL_DEPTH)
    }

    /// Compose a child endpoint with an explicit depth limit.
    pub fn child_with_depth(&self, segment: &str, max_depth: usize) -> Result<Self, EndpointError> {
        let seg = segment.trim().to_ascii_lowercase();
        parse::validate_segment(&seg, &seg)?;
        if seg.is_empty() {
            return Err(EndpointError::invalid(&seg, "empty path segment"));
        }
        if self.has_wildcard() {
            return Err(EndpointError::invalid(
                self.canonical(),
                "cannot extend past a wildcard segment",
            ));
        }
        if self.is_physical() && self.segments.len() + 1 > max_depth {
            return Err(EndpointError::invalid(
                self.canonical(),
                format!("physical hierarchy deeper than {max_depth} levels"),
            ));
        }

        let mut child = self.clone();
        child.segments.push(seg);
        child.cached = OnceCell::new();
        child.sealed = AtomicBool::new(false);
        Ok(child)
    }

    // --- canonical form -------------------------------------------------

    /// The canonical URI string. Computed once and cached.
    pub fn canonical(&self) -> &str {
        self.cached.get_or_init(|| self.format_uri())
    }

    fn format_uri(&self) -> String {
        match &self.kind {
            Kind::Physical {
                root_host,
                root_port,
                object_id,
                channel_hint,
            } => {
                let mut s = format!("physical://{root_host}");
                if *root_port != 0 {
                    s.push_str(&format!(":{root_port}"));
                }
                for seg in &self.segments {
                    s.push('/');
                    s.push_str(seg);
                }
                let mut query = Vec::new();
                if let Some(o) = object_id {
                    query.push(format!("o={o}"));
                }
                if let Some(c) = channel_hint {
                    query.push(format!("c={c}"));
                }
                if self.broadcast {
                    query.push("broadcast".to_string());
                }
                if !query.is_empty() {
                    s.push('?');
                    s.push_str(&query.join("&"));
                }
                s
            }
            Kind::Logical => {
                let mut s = format!("logical://{}", self.segments.join("/"));
                if self.broadcast {
                    s.push_str("?broadcast");
                }
                s
            }
        }
    }

    /// Mark the endpoint as serialized. Mutation afterwards errors with
    /// [`EndpointError::AlreadyInitialized`].
    pub fn seal(&self) {
        self.sealed.store(true, AtomicOrdering::Release);
    }

    /// Whether the endpoint has been serialized at least once.
    pub fn is_sealed(&self) -> bool {
        self.sealed.load(AtomicOrdering::Acquire)
    }

    fn touch(&mut self) -> Result<(), EndpointError> {
        if self.is_sealed() {
            return Err(EndpointError::AlreadyInitialized);
        }
        self.cached = OnceCell::new();
        Ok(())
    }

    // --- accessors ------------------------------------------------------

    /// Path segments below the hierarchy root.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Root host for physical endpoints; empty for channel endpoints.
    pub fn root_host(&self) -> Option<&str> {
        match &self.kind {
            Kind::Physical { root_host, .. } => Some(root_host),
            Kind::Logical => None,
        }
    }

    /// Root port for physical endpoints (0 = unspecified).
    pub fn root_port(&self) -> Option<u16> {
        match &self.kind {
            Kind::Physical { root_port, .. } => Some(*root_port),
            Kind::Logical => None,
        }
    }

    /// Object ID query value, if any.
    pub fn object_id(&self) -> Option<&str> {
        match &self.kind {
            Kind::Physical { object_id, .. } => object_id.as_deref(),
            Kind::Logical => None,
        }
    }

    /// Channel hint query value, if any.
    pub fn channel_hint(&self) -> Option<&str> {
        match &self.kind {
            Kind::Physical { channel_hint, .. } => channel_hint.as_deref(),
            Kind::Logical => None,
        }
    }

    /// Broadcast flag.
    pub fn broadcast(&self) -> bool {
        self.broadcast
    }

    // --- mutators (invalid once sealed) ----------------------------------

    /// Set or clear the broadcast flag.
    pub fn set_broadcast(&mut self, on: bool) -> Result<(), EndpointError> {
        self.touch()?;
        self.broadcast = on;
        Ok(())
    }

    /// Set the object ID of a physical endpoint.
    pub fn set_object_id(&mut self, id: Option<&str>) -> Result<(), EndpointError> {
        self.touch()?;
        match &mut self.kind {
            Kind::Physical { object_id, .. } => {
                *object_id = id.map(|s| s.trim().to_ascii_lowercase());
                Ok(())
            }
            Kind::Logical => Err(EndpointError::NotPhysical),
        }
    }

    /// Set the channel hint of a physical endpoint.
    pub fn set_channel_hint(&mut self, hint: Option<&str>) -> Result<(), EndpointError> {
        self.touch()?;
        match &mut self.kind {
            Kind::Physical { channel_hint, .. } => {
                *channel_hint = hint.map(|s| s.trim().to_ascii_lowercase());
                Ok(())
            }
            Kind::Logical => Err(EndpointError::NotPhysical),
        }
    }

    // --- kind predicates --------------------------------------------------

    /// Returns true for physical endpoints.
    pub fn is_physical(&self) -> bool {
        matches!(self.kind, Kind::Physical { .. })
    }

    /// Returns true for logical endpoints.
    pub fn is_logical(&self) -> bool {
        matches!(self.kind, Kind::Logical)
    }

    /// The discard endpoint: logical with `null` as the first segment.
    /// Messages targeting it are silently dropped.
    pub fn is_null(&self) -> bool {
        self.is_logical() && self.segments.first().map(String::as_str) == Some(NULL_SEGMENT)
    }

    /// A channel endpoint: physical with no root and no segments, only a
    /// channel hint.
    pub fn is_channel(&self) -> bool {
        match &self.kind {
            Kind::Physical {
                root_host,
                channel_hint,
                ..
            } => root_host.is_empty() && self.segments.is_empty() && channel_hint.is_some(),
            Kind::Logical => false,
        }
    }

    /// Root of a detached hierarchy (`physical://detached`).
    pub fn is_detached_root(&self) -> bool {
        match &self.kind {
            Kind::Physical { root_host, .. } => {
                root_host == DETACHED_HOST && self.segments.is_empty()
            }
            Kind::Logical => false,
        }
    }

    /// A physical endpoint at the top of its hierarchy.
    pub fn is_physical_root(&self) -> bool {
        self.is_physical() && self.segments.is_empty() && !self.is_channel()
    }

    /// Whether the final segment is the wildcard.
    pub fn has_wildcard(&self) -> bool {
        self.is_logical() && self.segments.last().map(String::as_str) == Some(WILDCARD)
    }

    // --- hierarchy relations ----------------------------------------------

    fn same_root(&self, other: &Self) -> bool {
        match (&self.kind, &other.kind) {
            (
                Kind::Physical {
                    root_host: h1,
                    root_port: p1,
                    ..
                },
                Kind::Physical {
                    root_host: h2,
                    root_port: p2,
                    ..
                },
            ) => h1 == h2 && p1 == p2,
            _ => false,
        }
    }

    /// True when `self` sits strictly below `other` in the same hierarchy.
    pub fn is_physical_descendant(&self, other: &Self) -> bool {
        self.same_root(other)
            && self.segments.len() > other.segments.len()
            && self.segments[..other.segments.len()] == other.segments[..]
    }

    /// True when `self` and `other` are siblings: same hierarchy root and
    /// the same parent. An endpoint is its own peer.
    pub fn is_physical_peer(&self, other: &Self) -> bool {
        self.same_root(other)
            && self.segments.len() == other.segments.len()
            && match self.segments.len() {
                0 => true,
                n => self.segments[..n - 1] == other.segments[..n - 1],
            }
    }

    /// Structural equality ignoring the broadcast flag and query parts.
    pub fn is_physical_match(&self, other: &Self) -> bool {
        self.same_root(other) && self.segments == other.segments
    }

    /// The endpoint one level up, or `None` at the root.
    pub fn parent(&self) -> Option<Self> {
        if self.segments.is_empty() {
            return None;
        }
        let mut parent = self.clone();
        parent.segments.pop();
        parent.cached = OnceCell::new();
        parent.sealed = AtomicBool::new(false);
        Some(parent)
    }

    // --- logical matching ---------------------------------------------------

    /// Wildcard-aware matching between logical endpoints.
    ///
    /// Symmetric. The null endpoint never matches. A trailing `*` stands
    /// for zero or more segments.
    pub fn logical_match(&self, other: &Self) -> bool {
        if !self.is_logical() || !other.is_logical() {
            return false;
        }
        if self.is_null() || other.is_null() {
            return false;
        }

        let a = &self.segments;
        let b = &other.segments;
        match (self.has_wildcard(), other.has_wildcard()) {
            (false, false) => a == b,
            (true, false) => wildcard_match(a, b),
            (false, true) => wildcard_match(b, a),
            (true, true) => {
                let pa = &a[..a.len() - 1];
                let pb = &b[..b.len() - 1];
                let n = pa.len().min(pb.len());
                pa[..n] == pb[..n]
            }
        }
    }

    // --- copies ---------------------------------------------------------

    /// Clone, optionally clearing the broadcast flag.
    pub fn clone_ep(&self, reset_broadcast: bool) -> Self {
        let mut ep = self.clone();
        if reset_broadcast {
            ep.broadcast = false;
            ep.cached = OnceCell::new();
        }
        ep
    }

    /// A copy with the broadcast flag cleared.
    pub fn no_broadcast(&self) -> Self {
        self.clone_ep(true)
    }

    /// A copy keeping at most the first `n` segments.
    pub fn copy_max_segments(&self, n: usize) -> Self {
        let mut ep = self.clone();
        ep.segments.truncate(n);
        ep.cached = OnceCell::new();
        ep.sealed = AtomicBool::new(false);
        ep
    }
}

/// `wild` has a trailing `*`; does it cover `plain`?
fn wildcard_match(wild: &[String], plain: &[String]) -> bool {
    let prefix = &wild[..wild.len() - 1];
    prefix.len() <= plain.len() && plain[..prefix.len()] == prefix[..]
}

impl Clone for Endpoint {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind.clone(),
            segments: self.segments.clone(),
            broadcast: self.broadcast,
            cached: self.cached.clone(),
            sealed: AtomicBool::new(false),
        }
    }
}

impl PartialEq for Endpoint {
    fn eq(&self, other: &Self) -> bool {
        self.canonical() == other.canonical()
    }
}

impl Eq for Endpoint {}

impl PartialOrd for Endpoint {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Endpoint {
    fn cmp(&self, other: &Self) -> Ordering {
        self.canonical().cmp(other.canonical())
    }
}

impl Hash for Endpoint {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.canonical().hash(state);
    }
}

impl FromStr for Endpoint {
    type Err = EndpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.canonical())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ep(uri: &str) -> Endpoint {
        Endpoint::parse(uri).unwrap()
    }

    #[test]
    fn parse_physical_roundtrip() {
        let e = ep("physical://Root.Example:9100/Hub/Leaf");
        assert!(e.is_physical());
        assert_eq!(e.to_string(), "physical://root.example:9100/hub/leaf");
        assert_eq!(ep(e.canonical()), e);
    }

    #[test]
    fn parse_strips_trailing_slash() {
        assert_eq!(ep("logical://apps/billing/"), ep("logical://apps/billing"));
        assert_eq!(ep("physical://host/hub/"), ep("physical://host/hub"));
    }

    #[test]
    fn parse_physical_query() {
        let e = ep("physical://host:80/hub?o=Obj1&c=tcp&broadcast");
        assert_eq!(e.object_id(), Some("obj1"));
        assert_eq!(e.channel_hint(), Some("tcp"));
        assert!(e.broadcast());
        assert_eq!(e.to_string(), "physical://host:80/hub?o=obj1&c=tcp&broadcast");
    }

    #[test]
    fn parse_channel_endpoint() {
        let e = ep("physical://?c=tcp");
        assert!(e.is_channel());
        assert!(!e.is_physical_root());
    }

    #[test]
    fn parse_rejects_bare_physical() {
        assert!(Endpoint::parse("physical://").is_err());
    }

    #[test]
    fn parse_rejects_depth_overflow() {
        assert!(Endpoint::parse("physical://host/a/b/c/d").is_err());
        assert!(Endpoint::parse_with_depth("physical://host/a/b/c/d", 4).is_ok());
    }

    #[test]
    fn parse_rejects_misplaced_wildcard() {
        assert!(Endpoint::parse("logical://apps/*/billing").is_err());
        assert!(Endpoint::parse("logical://apps/bil*ing").is_err());
        assert!(Endpoint::parse("physical://host/*").is_err());
        assert!(Endpoint::parse("logical://apps/*").is_ok());
    }

    #[test]
    fn parse_rejects_empty_segments() {
        assert!(Endpoint::parse("logical://apps//billing").is_err());
        assert!(Endpoint::parse("logical://").is_err());
    }

    #[test]
    fn null_endpoint() {
        assert!(ep("logical://null").is_null());
        assert!(ep("logical://null/whatever").is_null());
        assert!(!ep("logical://apps/null").is_null());
    }

    #[test]
    fn detached_root() {
        assert!(ep("physical://detached").is_detached_root());
        assert!(!ep("physical://detached/hub").is_detached_root());
        assert!(!ep("physical://host").is_detached_root());
    }

    #[test]
    fn hierarchy_predicates() {
        let a = ep("physical://host:80/hub");
        let b = ep("physical://host:80/hub/leaf");

        assert!(!a.is_physical_descendant(&b));
        assert!(b.is_physical_descendant(&a));
        assert!(!b.is_physical_descendant(&b));
        assert_eq!(b.parent().unwrap(), a);
        assert_eq!(a.parent().unwrap(), ep("physical://host:80"));
        assert!(a.parent().unwrap().parent().is_none());
    }

    #[test]
    fn peers_share_a_parent() {
        let a = ep("physical://host/hub/a");
        let b = ep("physical://host/hub/b");
        let c = ep("physical://host/other/c");

        assert!(a.is_physical_peer(&b));
        assert!(a.is_physical_peer(&a));
        assert!(!a.is_physical_peer(&c));
        assert!(!a.is_physical_peer(&ep("physical://host/hub")));
    }

    #[test]
    fn physical_match_ignores_query_and_broadcast() {
        let a = ep("physical://host:80/hub?o=x&broadcast");
        let b = ep("physical://host:80/hub?c=udp");
        assert!(a.is_physical_match(&b));
        assert_ne!(a, b);
    }

    #[test]
    fn compare_includes_broadcast() {
        let plain = ep("logical://svc/worker");
        let bcast = ep("logical://svc/worker?broadcast");
        assert_ne!(plain, bcast);
        assert!(plain < bcast);
        assert_eq!(bcast.no_broadcast(), plain);
    }

    #[test]
    fn logical_match_exact() {
        assert!(ep("logical://apps/foo").logical_match(&ep("logical://APPS/foo")));
        assert!(!ep("logical://apps/foo").logical_match(&ep("logical://apps/bar")));
        assert!(!ep("logical://apps").logical_match(&ep("logical://apps/foo")));
    }

    #[test]
    fn logical_match_single_wildcard() {
        let wild = ep("logical://apps/foo/*");
        assert!(wild.logical_match(&ep("logical://apps/foo/bar")));
        assert!(wild.logical_match(&ep("logical://apps/foo/bar/baz")));
        assert!(wild.logical_match(&ep("logical://apps/foo")));
        assert!(!wild.logical_match(&ep("logical://apps/other")));
        assert!(!wild.logical_match(&ep("logical://apps")));
    }

    #[test]
    fn logical_match_is_symmetric() {
        let cases = [
            ("logical://apps/foo/*", "logical://apps/foo/bar"),
            ("logical://apps/*", "logical://apps/foo/bar/baz"),
            ("logical://a/*", "logical://a/b/*"),
            ("logical://apps/foo", "logical://apps/foo"),
        ];
        for (x, y) in cases {
            let (x, y) = (ep(x), ep(y));
            assert_eq!(x.logical_match(&y), y.logical_match(&x), "{x} vs {y}");
            assert!(x.logical_match(&y), "{x} vs {y}");
        }
    }

    #[test]
    fn logical_match_both_wildcards() {
        assert!(ep("logical://a/b/*").logical_match(&ep("logical://a/*")));
        assert!(!ep("logical://a/b/*").logical_match(&ep("logical://a/c/*")));
        assert!(ep("logical://*").logical_match(&ep("logical://x/y/*")));
    }

    #[test]
    fn null_never_matches() {
        assert!(!ep("logical://null").logical_match(&ep("logical://null")));
        assert!(!ep("logical://*").logical_match(&ep("logical://null")));
    }

    #[test]
    fn physical_never_logical_matches() {
        assert!(!ep("physical://host/hub").logical_match(&ep("logical://hub")));
    }

    #[test]
    fn mutation_after_seal_fails() {
        let mut e = ep("logical://svc/worker");
        e.set_broadcast(true).unwrap();
        assert!(e.broadcast());

        e.seal();
        assert!(matches!(
            e.set_broadcast(false),
            Err(EndpointError::AlreadyInitialized)
        ));

        // Clones of a sealed endpoint are freshly mutable.
        let mut clone = e.clone();
        clone.set_broadcast(false).unwrap();
    }

    #[test]
    fn mutation_invalidates_cached_form() {
        let mut e = ep("logical://svc/worker");
        assert_eq!(e.to_string(), "logical://svc/worker");
        e.set_broadcast(true).unwrap();
        assert_eq!(e.to_string(), "logical://svc/worker?broadcast");
    }

    #[test]
    fn object_id_requires_physical() {
        let mut e = ep("logical://svc/worker");
        assert!(matches!(
            e.set_object_id(Some("x")),
            Err(EndpointError::NotPhysical)
        ));
    }

    #[test]
    fn copy_max_segments_truncates() {
        let e = ep("physical://host:80/hub/leaf");
        assert_eq!(e.copy_max_segments(1), ep("physical://host:80/hub"));
        assert_eq!(e.copy_max_segments(0), ep("physical://host:80"));
        assert_eq!(e.copy_max_segments(9), e);
    }

    #[test]
    fn child_composition() {
        let root = ep("physical://host:80");
        let hub = root.child("Hub").unwrap();
        assert_eq!(hub, ep("physical://host:80/hub"));
        let leaf = hub.child("leaf").unwrap();
        assert!(leaf.child("toodeep").is_err());

        let logical = ep("logical://svc/workers").child("w3").unwrap();
        assert_eq!(logical, ep("logical://svc/workers/w3"));
        assert!(ep("logical://svc/*").child("w3").is_err());
    }

    #[test]
    fn match_locality_under_extension() {
        // Extending one side preserves a match iff the other side ends in
        // a wildcard.
        let wild = ep("logical://apps/foo/*");
        let plain = ep("logical://apps/foo");
        assert!(wild.logical_match(&plain));
        assert!(wild.logical_match(&plain.child("deeper").unwrap()));

        let exact = ep("logical://apps/foo");
        assert!(exact.logical_match(&plain));
        assert!(!exact.logical_match(&plain.child("deeper").unwrap()));
    }
}
