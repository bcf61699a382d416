//! Session management.
//!
//! Sessions correlate multi-message exchanges by session ID. The manager
//! implements the lifecycle contract: server-side sessions run handlers
//! with keep-alive emission, timeout enforcement, and an optional
//! idempotence cache; client-side query sessions block the caller until a
//! reply, cancellation, or timeout. Concrete session flavors (duplex,
//! reliable transfer) plug in above this layer.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use flume::{RecvTimeoutError, Sender};
use once_cell::sync::OnceCell;
use tracing::{debug, trace};
use uuid::Uuid;

use meshway_core::config::RouterSettings;
use meshway_core::endpoint::Endpoint;
use meshway_core::flags;
use meshway_core::message::{Msg, MsgPayload};
use meshway_wire::{KeepAliveMsg, SessionCancelMsg};

use crate::context::{HandlerCtx, RequestContext};
use crate::error::RouterError;
use crate::handler::{Handler, SessionHandlerInfo};
use crate::router::{MsgRouter, RouterInner};

/// Floor for the keep-alive scan period.
const MIN_SCAN_PERIOD: Duration = Duration::from_millis(25);

/// Atomic counters exposed for monitoring.
#[derive(Debug, Default)]
pub struct SessionMetrics {
    retries: AtomicU64,
    timeouts: AtomicU64,
}

impl SessionMetrics {
    /// Retried session opens observed (duplicate `OpenSession` messages).
    pub fn retries(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }

    /// Sessions terminated by timeout, on either side.
    pub fn timeouts(&self) -> u64 {
        self.timeouts.load(Ordering::Relaxed)
    }
}

enum SessionSignal {
    Reply(Msg),
    Cancel(String),
    KeepAlive(Duration),
}

struct ClientSession {
    tx: Sender<SessionSignal>,
}

struct ServerSession {
    info: SessionHandlerInfo,
    from_ep: Option<Endpoint>,
    opened: Instant,
    last_traffic: Instant,
    last_keep_alive: Instant,
    completed: Arc<AtomicBool>,
    cached_reply: Option<Msg>,
}

enum ScanAction {
    Evict(Uuid),
    Timeout { id: Uuid, to: Option<Endpoint> },
    KeepAlive { id: Uuid, to: Option<Endpoint>, ttl: Duration },
}

/// Correlates sessions by ID and drives their lifecycles.
///
/// Client and server halves live in separate maps so a loopback query
/// (both ends on one router) can share a session ID; inbound traffic is
/// routed to the right side by the `SERVER_SESSION` flag.
pub struct SessionManager {
    clients: DashMap<Uuid, ClientSession>,
    servers: DashMap<Uuid, ServerSession>,
    metrics: SessionMetrics,
    defaults: SessionHandlerInfo,
    router: OnceCell<Weak<RouterInner>>,
}

impl SessionManager {
    pub(crate) fn new(settings: &RouterSettings) -> Self {
        let keep_alive = if settings.session_keep_alive.is_zero() {
            Duration::from_secs(5)
        } else {
            settings.session_keep_alive
        };
        let defaults = SessionHandlerInfo {
            idempotent: false,
            keep_alive,
            session_timeout: settings.session_timeout.max(keep_alive),
            is_async: false,
            max_async_keep_alive: settings.session_max_async_keep_alive,
            session_type: "query".to_string(),
            custom_params: None,
        };
        Self {
            clients: DashMap::new(),
            servers: DashMap::new(),
            metrics: SessionMetrics::default(),
            defaults,
            router: OnceCell::new(),
        }
    }

    pub(crate) fn bind_router(&self, router: Weak<RouterInner>) {
        let _ = self.router.set(router);
    }

    fn router_weak(&self) -> Weak<RouterInner> {
        self.router.get().cloned().unwrap_or_default()
    }

    fn router_inner(&self) -> Option<Arc<RouterInner>> {
        self.router.get().and_then(Weak::upgrade)
    }

    /// Monitoring counters.
    pub fn metrics(&self) -> &SessionMetrics {
        &self.metrics
    }

    /// Sessions currently alive (both sides).
    pub fn active_sessions(&self) -> usize {
        self.clients.len() + self.servers.len()
    }

    pub(crate) fn scan_period(&self) -> Duration {
        (self.defaults.keep_alive / 2).max(MIN_SCAN_PERIOD)
    }

    // --- client side ------------------------------------------------------

    /// Send `msg` as a query and block until the reply, a cancellation,
    /// or the timeout. Server keep-alives extend the deadline.
    pub(crate) fn query(&self, mut msg: Msg, timeout: Duration) -> Result<Msg, RouterError> {
        let inner = self.router_inner().ok_or(RouterError::NotRunning)?;

        let session_id = Uuid::new_v4();
        msg.set_session_id(session_id);
        msg.set_flag(flags::OPEN_SESSION);
        if msg.msg_id().is_nil() {
            msg.set_msg_id(Uuid::new_v4());
        }

        let (tx, rx) = flume::unbounded();
        self.clients.insert(session_id, ClientSession { tx });

        if let Err(err) = inner.send_internal(msg) {
            self.clients.remove(&session_id);
            return Err(err);
        }

        let mut deadline = Instant::now() + timeout;
        loop {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            match rx.recv_timeout(deadline - now) {
                Ok(SessionSignal::Reply(reply)) => {
                    self.clients.remove(&session_id);
                    return Ok(reply);
                }
                Ok(SessionSignal::Cancel(reason)) => {
                    self.clients.remove(&session_id);
                    return Err(RouterError::Cancelled(reason));
                }
                Ok(SessionSignal::KeepAlive(ttl)) => {
                    deadline = Instant::now() + ttl;
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    self.clients.remove(&session_id);
                    return Err(RouterError::Cancelled("session channel closed".to_string()));
                }
            }
        }

        self.clients.remove(&session_id);
        self.metrics.timeouts.fetch_add(1, Ordering::Relaxed);
        Err(RouterError::SessionTimeout)
    }

    // --- inbound session traffic ------------------------------------------

    /// Route an in-session message to its session.
    pub(crate) fn deliver(&self, msg: Msg) {
        let session_id = msg.session_id();
        if session_id.is_nil() {
            return;
        }

        enum Kind {
            Cancel(String),
            KeepAlive(Duration),
            Other,
        }
        let kind = if let Some(cancel) = msg.payload::<SessionCancelMsg>() {
            Kind::Cancel(cancel.reason.clone())
        } else if let Some(ka) = msg.payload::<KeepAliveMsg>() {
            Kind::KeepAlive(ka.session_ttl)
        } else {
            Kind::Other
        };

        if msg.has_flag(flags::SERVER_SESSION) {
            // Traffic from the serving side lands on the client half.
            let Some(client) = self.clients.get(&session_id) else {
                debug!(%session_id, wire_type = msg.wire_type(), "message for unknown client session dropped");
                return;
            };
            let signal = match kind {
                Kind::Cancel(reason) => SessionSignal::Cancel(reason),
                Kind::KeepAlive(ttl) => SessionSignal::KeepAlive(ttl),
                Kind::Other => SessionSignal::Reply(msg),
            };
            let _ = client.tx.send(signal);
            return;
        }

        let mut evict = false;
        match self.servers.get_mut(&session_id) {
            None => {
                debug!(%session_id, wire_type = msg.wire_type(), "message for unknown server session dropped");
                return;
            }
            Some(mut server) => {
                server.last_traffic = Instant::now();
                match kind {
                    Kind::Cancel(_) => {
                        server.completed.store(true, Ordering::Release);
                        evict = true;
                    }
                    Kind::KeepAlive(_) => {}
                    Kind::Other => {
                        trace!(%session_id, "in-session message ignored by base session manager");
                    }
                }
            }
        }
        if evict {
            self.servers.remove(&session_id);
        }
    }

    // --- server side ------------------------------------------------------

    /// Open a server-side session for `msg` and run the handler inside
    /// its lifecycle. Duplicate opens count as retries and replay the
    /// cached reply for idempotent handlers.
    pub(crate) fn open_server(&self, handler: Handler, msg: Msg, router: MsgRouter) {
        let session_id = msg.session_id();
        if session_id.is_nil() {
            (handler.func)(msg, HandlerCtx::new(router, None));
            return;
        }

        let info = handler
            .session
            .clone()
            .unwrap_or_else(|| self.defaults.clone());

        let completed = Arc::new(AtomicBool::new(false));
        let now = Instant::now();
        // The entry view makes open-vs-retry atomic: a duplicate open
        // never runs the handler a second time.
        match self.servers.entry(session_id) {
            Entry::Occupied(entry) => {
                let cached = if entry.get().info.idempotent {
                    entry.get().cached_reply.clone()
                } else {
                    None
                };
                drop(entry);
                self.metrics.retries.fetch_add(1, Ordering::Relaxed);
                if let Some(reply) = cached {
                    trace!(%session_id, "replaying cached reply for retried idempotent session");
                    if let Some(inner) = self.router_inner() {
                        if let Err(err) = inner.send_internal(reply) {
                            debug!(%err, "failed to replay cached reply");
                        }
                    }
                }
                return;
            }
            Entry::Vacant(slot) => {
                slot.insert(ServerSession {
                    info,
                    from_ep: msg.from_ep().cloned(),
                    opened: now,
                    last_traffic: now,
                    last_keep_alive: now,
                    completed: completed.clone(),
                    cached_reply: None,
                });
            }
        }

        let ctx = RequestContext::new(
            self.router_weak(),
            msg.from_ep().cloned(),
            session_id,
            msg.ext_headers().to_vec(),
            completed,
        );
        (handler.func)(msg, HandlerCtx::new(router, Some(ctx)));
    }

    /// Mark a server session completed, caching the reply for idempotent
    /// handlers. The entry lingers until its timeout window passes so
    /// retries can be recognized.
    pub(crate) fn complete_server(&self, session_id: Uuid, reply: Option<Msg>) {
        if let Some(mut server) = self.servers.get_mut(&session_id) {
            server.completed.store(true, Ordering::Release);
            server.last_traffic = Instant::now();
            if server.info.idempotent {
                server.cached_reply = reply;
            }
        }
    }

    /// Drop a server session immediately.
    pub(crate) fn retire(&self, session_id: Uuid) {
        self.servers.remove(&session_id);
    }

    // --- background scan --------------------------------------------------

    /// Periodic lifecycle pass: emit keep-alives, enforce timeouts and the
    /// async ceiling, evict expired idempotence cache entries.
    pub(crate) fn scan(&self, now: Instant) {
        let mut actions = Vec::new();

        for mut entry in self.servers.iter_mut() {
            let id = *entry.key();
            let server = entry.value_mut();
            let timeout = server.info.session_timeout;

            if server.completed.load(Ordering::Acquire) {
                // Completed entries serve only as the idempotence cache.
                if now.duration_since(server.last_traffic) > timeout {
                    actions.push(ScanAction::Evict(id));
                }
                continue;
            }

            let over_ceiling = server.info.is_async
                && server
                    .info
                    .max_async_keep_alive
                    .is_some_and(|ceiling| now.duration_since(server.opened) > ceiling);
            if over_ceiling || now.duration_since(server.last_traffic) > timeout {
                server.completed.store(true, Ordering::Release);
                actions.push(ScanAction::Timeout {
                    id,
                    to: server.from_ep.clone(),
                });
                continue;
            }

            if now.duration_since(server.last_keep_alive) >= server.info.keep_alive {
                server.last_keep_alive = now;
                actions.push(ScanAction::KeepAlive {
                    id,
                    to: server.from_ep.clone(),
                    ttl: timeout,
                });
            }
        }

        for action in actions {
            match action {
                ScanAction::Evict(id) => {
                    self.servers.remove(&id);
                }
                ScanAction::Timeout { id, to } => {
                    self.servers.remove(&id);
                    self.metrics.timeouts.fetch_add(1, Ordering::Relaxed);
                    debug!(session_id = %id, "server session timed out");
                    self.send_session_msg(to, id, SessionCancelMsg::new("session timed out"));
                }
                ScanAction::KeepAlive { id, to, ttl } => {
                    self.send_session_msg(to, id, KeepAliveMsg { session_ttl: ttl });
                }
            }
        }
    }

    fn send_session_msg(
        &self,
        to: Option<Endpoint>,
        session_id: Uuid,
        payload: impl MsgPayload + 'static,
    ) {
        let Some(inner) = self.router_inner() else {
            return;
        };
        let mut msg = Msg::from_payload(payload);
        msg.set_to(to);
        msg.set_session_id(session_id);
        msg.set_flag(flags::SERVER_SESSION);
        if let Err(err) = inner.send_internal(msg) {
            debug!(%err, "failed to send session control message");
        }
    }
}
