//! Router configuration.
//!
//! This module provides the recognized configuration surface for a router
//! instance. Handler-level session settings can override the session
//! defaults per handler.

use std::time::Duration;

use crate::message::DEFAULT_TTL;

/// Router configuration options.
///
/// # Examples
///
/// ```
/// use meshway_core::config::RouterSettings;
/// use std::time::Duration;
///
/// let settings = RouterSettings::default()
///     .with_dead_router_ttl(Duration::from_secs(30))
///     .with_session_keep_alive(Duration::from_secs(5));
/// ```
#[derive(Debug, Clone)]
pub struct RouterSettings {
    /// `abstract://` name → logical URI bindings, loaded at startup.
    ///
    /// Invalid entries are logged and skipped.
    pub abstract_map: Vec<(String, String)>,

    /// How long a forwarded message may await its receipt before the peer
    /// is reported dead.
    /// - `Duration::ZERO`: dead-router detection disabled (default)
    pub dead_router_ttl: Duration,

    /// Master switch for dead-router detection. Both this and a non-zero
    /// `dead_router_ttl` must be set for the tracker to arm.
    pub dead_router_detection: bool,

    /// Default keep-alive interval for server sessions whose handler does
    /// not specify one.
    pub session_keep_alive: Duration,

    /// Default session timeout. Sessions with no traffic or keep-alive
    /// for this long are terminated.
    pub session_timeout: Duration,

    /// Hard ceiling on async session lifetime.
    /// - `None`: unbounded (default)
    pub session_max_async_keep_alive: Option<Duration>,

    /// Maximum physical hierarchy depth accepted by the parser.
    /// - Default: 3 (root / hub / leaf)
    pub max_physical_depth: usize,

    /// Dispatch worker threads.
    /// - 0: one per CPU core (default)
    pub worker_threads: usize,

    /// Hop budget stamped on messages that do not set one.
    pub default_ttl: u8,

    /// Send receipts for dispatched messages that request them.
    pub send_receipts: bool,

    /// Participate in peer-to-peer forwarding (broadcast fan-out to
    /// attached peer channels).
    pub p2p_enable: bool,

    /// Machine name advertised to peers. Empty = advertise the router
    /// endpoint's root host.
    pub machine_name: String,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            abstract_map: Vec::new(),
            dead_router_ttl: Duration::ZERO,
            dead_router_detection: false,
            session_keep_alive: Duration::from_secs(5),
            session_timeout: Duration::from_secs(10),
            session_max_async_keep_alive: None,
            max_physical_depth: crate::endpoint::DEFAULT_MAX_PHYSICAL_DEPTH,
            worker_threads: 0,
            default_ttl: DEFAULT_TTL,
            send_receipts: true,
            p2p_enable: true,
            machine_name: String::new(),
        }
    }
}

impl RouterSettings {
    /// Create settings with all defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an abstract-map binding.
    #[must_use]
    pub fn with_abstract_binding(mut self, name: &str, uri: &str) -> Self {
        self.abstract_map.push((name.to_string(), uri.to_string()));
        self
    }

    /// Enable dead-router detection with the given receipt TTL.
    #[must_use]
    pub fn with_dead_router_ttl(mut self, ttl: Duration) -> Self {
        self.dead_router_ttl = ttl;
        self.dead_router_detection = !ttl.is_zero();
        self
    }

    /// Set the default session keep-alive interval. The session timeout
    /// follows at twice the keep-alive unless set explicitly afterwards.
    #[must_use]
    pub fn with_session_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.session_keep_alive = keep_alive;
        self.session_timeout = keep_alive * 2;
        self
    }

    /// Set the default session timeout.
    #[must_use]
    pub fn with_session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = timeout;
        self
    }

    /// Set the async session lifetime ceiling.
    #[must_use]
    pub fn with_max_async_keep_alive(mut self, ceiling: Option<Duration>) -> Self {
        self.session_max_async_keep_alive = ceiling;
        self
    }

    /// Set the physical hierarchy depth limit.
    #[must_use]
    pub fn with_max_physical_depth(mut self, depth: usize) -> Self {
        self.max_physical_depth = depth;
        self
    }

    /// Set the worker thread count (0 = one per core).
    #[must_use]
    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads;
        self
    }

    /// Set the default message TTL.
    #[must_use]
    pub fn with_default_ttl(mut self, ttl: u8) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Enable or disable receipt sending.
    #[must_use]
    pub fn with_send_receipts(mut self, on: bool) -> Self {
        self.send_receipts = on;
        self
    }

    /// Enable or disable peer-to-peer forwarding.
    #[must_use]
    pub fn with_p2p(mut self, on: bool) -> Self {
        self.p2p_enable = on;
        self
    }

    /// Set the advertised machine name.
    #[must_use]
    pub fn with_machine_name(mut self, name: &str) -> Self {
        self.machine_name = name.to_string();
        self
    }

    /// Whether the receipt tracker should arm for forwarded messages.
    #[must_use]
    pub fn dead_router_enabled(&self) -> bool {
        self.dead_router_detection && !self.dead_router_ttl.is_zero()
    }
}
