//! The dispatcher: message type × target endpoint → handler tasks.
//!
//! One router-scoped lock guards the physical handler maps, the route
//! table, and the receipt tracker's entries ([`RouterShared`]). Handler
//! lookups happen under the lock; handler invocation happens on the
//! worker pool, outside it.
//!
//! Dispatch semantics:
//! 1. Null or physical target: envelopes drop; exact-type handler, else
//!    the default physical handler, else session routing by ID, else drop.
//! 2. Logical broadcast: one task per matching `(route, handler)` pair.
//! 3. Logical unicast: one uniformly random route among the matches.

use std::sync::{Arc, Weak};

use hashbrown::HashMap;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use rand::Rng;
use smallvec::SmallVec;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use meshway_core::endpoint::Endpoint;
use meshway_core::flags;
use meshway_core::message::Msg;
use meshway_core::routes::{RouteTable, DEFAULT_KEY};

use crate::context::HandlerCtx;
use crate::error::RouterError;
use crate::handler::{EndpointMunger, Handler, HandlerSet, TargetEntry, TargetId};
use crate::router::{MsgRouter, RouterEvent, RouterInner};
use crate::session::SessionManager;
use crate::tracker::MsgTrack;
use crate::worker::{Job, WorkerPool};

/// State behind the single router-scoped lock.
pub(crate) struct RouterShared {
    /// Physical handlers by message wire type.
    pub(crate) physical: HashMap<String, Handler>,
    /// Fallback physical handler.
    pub(crate) default_physical: Option<Handler>,
    /// Peer routes and the logical route index.
    pub(crate) routes: RouteTable<Handler>,
    /// Regenerated on every logical-route mutation; advertised to peers.
    pub(crate) set_id: Uuid,
    /// Outstanding forwarded messages awaiting receipts.
    pub(crate) tracks: HashMap<Uuid, MsgTrack>,
}

impl RouterShared {
    pub(crate) fn new() -> Self {
        Self {
            physical: HashMap::new(),
            default_physical: None,
            routes: RouteTable::new(),
            set_id: Uuid::new_v4(),
            tracks: HashMap::new(),
        }
    }
}

/// What happened to a dispatched message.
pub(crate) enum DispatchOutcome {
    /// Tasks were enqueued (or the message was routed to a session).
    Delivered(usize),
    /// No local route or handler; the caller may forward the message.
    NoRoute(Msg),
    /// Definitively dropped (null target, envelope, type mismatch).
    Dropped,
}

/// Maps messages to handlers and enqueues dispatch tasks.
pub struct Dispatcher {
    shared: Arc<Mutex<RouterShared>>,
    sessions: Arc<SessionManager>,
    pool: Arc<WorkerPool>,
    router: OnceCell<Weak<RouterInner>>,
    events: flume::Sender<RouterEvent>,
}

impl Dispatcher {
    pub(crate) fn new(
        shared: Arc<Mutex<RouterShared>>,
        sessions: Arc<SessionManager>,
        pool: Arc<WorkerPool>,
        events: flume::Sender<RouterEvent>,
    ) -> Self {
        Self {
            shared,
            sessions,
            pool,
            router: OnceCell::new(),
            events,
        }
    }

    pub(crate) fn bind_router(&self, router: Weak<RouterInner>) {
        let _ = self.router.set(router);
    }

    fn router_handle(&self) -> Option<MsgRouter> {
        self.router
            .get()
            .and_then(Weak::upgrade)
            .map(MsgRouter::from_inner)
    }

    /// The current logical-endpoint-set GUID.
    #[must_use]
    pub fn logical_endpoint_set_id(&self) -> Uuid {
        self.shared.lock().set_id
    }

    // --- registration -----------------------------------------------------

    /// Register a physical handler, keyed by the message type it accepts
    /// (or the default sentinel).
    ///
    /// # Errors
    ///
    /// `DuplicateHandler` when a different target already claims the type.
    /// Re-adding the same `(target, name)` is idempotent.
    pub fn add_physical(&self, handler: Handler) -> Result<(), RouterError> {
        let mut shared = self.shared.lock();
        if handler.accepts == DEFAULT_KEY {
            if let Some(existing) = &shared.default_physical {
                if existing.target != handler.target || existing.name != handler.name {
                    return Err(duplicate("physical", DEFAULT_KEY));
                }
            }
            shared.default_physical = Some(handler);
        } else {
            if let Some(existing) = shared.physical.get(&handler.accepts) {
                if existing.target != handler.target || existing.name != handler.name {
                    return Err(duplicate("physical", &handler.accepts));
                }
            }
            shared.physical.insert(handler.accepts.clone(), handler);
        }
        Ok(())
    }

    /// Register a logical handler at `endpoint`.
    ///
    /// `is_default` keys the route on the default sentinel so the handler
    /// catches every type the route's typed handlers don't claim.
    pub fn add_logical(
        &self,
        handler: Handler,
        endpoint: Endpoint,
        is_default: bool,
        suppress_advertise: bool,
        target_group: Option<Uuid>,
    ) -> Result<(), RouterError> {
        let set_id = self.add_logical_locked(handler, endpoint, is_default, target_group)?;
        if !suppress_advertise {
            let _ = self.events.send(RouterEvent::SetChanged(set_id));
        }
        Ok(())
    }

    fn add_logical_locked(
        &self,
        mut handler: Handler,
        endpoint: Endpoint,
        is_default: bool,
        target_group: Option<Uuid>,
    ) -> Result<Uuid, RouterError> {
        let key = if is_default {
            handler.accepts = DEFAULT_KEY.to_string();
            DEFAULT_KEY.to_string()
        } else {
            handler.accepts.clone()
        };
        let mut shared = self.shared.lock();
        if shared
            .routes
            .add_logical(endpoint, &key, handler, target_group)?
        {
            shared.set_id = Uuid::new_v4();
        }
        Ok(shared.set_id)
    }

    /// Register every handler of a target set, applying endpoint mungers
    /// to scoped handlers. Handlers whose scope has no munger are skipped.
    ///
    /// On error the set's partial registrations are rolled back.
    pub fn add_target(
        &self,
        set: HandlerSet,
        mungers: &[&dyn EndpointMunger],
    ) -> Result<(), RouterError> {
        let target = set.target;
        match self.add_target_inner(set, mungers) {
            Ok(()) => Ok(()),
            Err(err) => {
                self.remove_target(target);
                Err(err)
            }
        }
    }

    fn add_target_inner(
        &self,
        set: HandlerSet,
        mungers: &[&dyn EndpointMunger],
    ) -> Result<(), RouterError> {
        let group = set.group;
        let mut routes_changed = false;
        let mut set_id = None;

        for entry in set.entries {
            match entry {
                TargetEntry::Physical(handler) => self.add_physical(handler)?,
                TargetEntry::Logical {
                    endpoint,
                    is_default,
                    handler,
                } => {
                    let effective = match &handler.scope {
                        Some(scope) => {
                            match mungers.iter().find(|m| m.scope() == scope.as_str()) {
                                Some(munger) => munger.munge(&endpoint, &handler)?,
                                None => {
                                    debug!(scope = %scope, "no munger for scope; skipping handler");
                                    continue;
                                }
                            }
                        }
                        None => endpoint,
                    };
                    set_id =
                        Some(self.add_logical_locked(handler, effective, is_default, group)?);
                    routes_changed = true;
                }
            }
        }

        if routes_changed {
            if let Some(set_id) = set_id {
                let _ = self.events.send(RouterEvent::SetChanged(set_id));
            }
        }
        Ok(())
    }

    /// Remove every handler owned by `target`. Returns `true` when
    /// anything changed.
    pub fn remove_target(&self, target: TargetId) -> bool {
        let (changed, routes_changed, set_id) = {
            let mut shared = self.shared.lock();
            let mut changed = false;

            let before = shared.physical.len();
            shared.physical.retain(|_, h| h.target != target);
            changed |= shared.physical.len() != before;

            if shared
                .default_physical
                .as_ref()
                .is_some_and(|h| h.target == target)
            {
                shared.default_physical = None;
                changed = true;
            }

            let routes_changed = shared.routes.remove_where(|h| h.target == target);
            if routes_changed {
                shared.set_id = Uuid::new_v4();
            }
            (changed || routes_changed, routes_changed, shared.set_id)
        };

        if routes_changed {
            let _ = self.events.send(RouterEvent::SetChanged(set_id));
        }
        changed
    }

    /// Drop every handler registration and re-advertise.
    pub fn clear(&self) {
        let set_id = {
            let mut shared = self.shared.lock();
            shared.physical.clear();
            shared.default_physical = None;
            shared.routes.clear_logical();
            shared.set_id = Uuid::new_v4();
            shared.set_id
        };
        let _ = self.events.send(RouterEvent::SetChanged(set_id));
    }

    /// Force a fresh endpoint-set GUID and re-advertisement without a
    /// route change.
    pub fn refresh_advertise(&self) {
        let set_id = {
            let mut shared = self.shared.lock();
            shared.set_id = Uuid::new_v4();
            shared.set_id
        };
        let _ = self.events.send(RouterEvent::SetChanged(set_id));
    }

    // --- dispatch ---------------------------------------------------------

    /// Dispatch a message to local handlers. Returns `true` when at least
    /// one task was enqueued or the message reached a session.
    pub fn dispatch(&self, msg: Msg) -> bool {
        matches!(self.dispatch_outcome(msg), DispatchOutcome::Delivered(_))
    }

    pub(crate) fn dispatch_outcome(&self, msg: Msg) -> DispatchOutcome {
        // Envelopes are forward-only; their types are unknown here by
        // definition. NoRoute lets the router forward them onward.
        if msg.is_envelope() {
            trace!(wire_type = msg.wire_type(), "envelope is not dispatchable locally");
            return DispatchOutcome::NoRoute(msg);
        }

        let wire_type = msg.wire_type().to_string();
        match msg.to_ep().cloned() {
            Some(ep) if ep.is_logical() => {
                if ep.is_null() {
                    trace!("message to the null endpoint discarded");
                    return DispatchOutcome::Dropped;
                }
                if msg.has_flag(flags::BROADCAST) {
                    self.dispatch_broadcast(&ep, &wire_type, msg)
                } else {
                    self.dispatch_unicast(&ep, &wire_type, msg)
                }
            }
            _ => self.dispatch_physical(&wire_type, msg),
        }
    }

    fn dispatch_physical(&self, wire_type: &str, msg: Msg) -> DispatchOutcome {
        let handler = {
            let shared = self.shared.lock();
            shared
                .physical
                .get(wire_type)
                .or(shared.default_physical.as_ref())
                .cloned()
        };
        match handler {
            Some(handler) => {
                if self.enqueue(handler, msg) {
                    DispatchOutcome::Delivered(1)
                } else {
                    DispatchOutcome::Dropped
                }
            }
            None if !msg.session_id().is_nil() => {
                self.enqueue_session(msg);
                DispatchOutcome::Delivered(1)
            }
            None => {
                debug!(wire_type, "no physical handler");
                DispatchOutcome::NoRoute(msg)
            }
        }
    }

    fn dispatch_broadcast(&self, ep: &Endpoint, wire_type: &str, msg: Msg) -> DispatchOutcome {
        // One task per (route, handler) pair.
        let selected: SmallVec<[Handler; 4]> = {
            let shared = self.shared.lock();
            let handlers: SmallVec<[Handler; 4]> = shared
                .routes
                .get_routes(ep)
                .iter()
                .flat_map(|route| route.handlers_for(wire_type).iter().cloned())
                .collect();
            handlers
        };

        if selected.is_empty() {
            return DispatchOutcome::NoRoute(msg);
        }

        let count = selected.len();
        let mut original = Some(msg);
        let mut tasks = 0;
        for (i, handler) in selected.into_iter().enumerate() {
            let copy = if i + 1 == count {
                original.take()
            } else {
                original.clone()
            };
            let Some(copy) = copy else { break };
            if self.enqueue(handler, copy) {
                tasks += 1;
            }
        }

        if tasks == 0 {
            DispatchOutcome::Dropped
        } else {
            DispatchOutcome::Delivered(tasks)
        }
    }

    fn dispatch_unicast(&self, ep: &Endpoint, wire_type: &str, msg: Msg) -> DispatchOutcome {
        let selection = {
            let shared = self.shared.lock();
            let routes = shared.routes.get_routes(ep);
            if routes.is_empty() {
                None
            } else {
                let pick = if routes.len() == 1 {
                    0
                } else {
                    rand::thread_rng().gen_range(0..routes.len())
                };
                Some(routes[pick].handler_for(wire_type).cloned())
            }
        };

        match selection {
            None => DispatchOutcome::NoRoute(msg),
            Some(Some(handler)) => {
                if self.enqueue(handler, msg) {
                    DispatchOutcome::Delivered(1)
                } else {
                    DispatchOutcome::Dropped
                }
            }
            Some(None) if !msg.session_id().is_nil() => {
                self.enqueue_session(msg);
                DispatchOutcome::Delivered(1)
            }
            Some(None) => {
                debug!(wire_type, to = %ep, "matched route has no handler for type");
                DispatchOutcome::Dropped
            }
        }
    }

    /// Enqueue one `(handler, msg)` task, verifying the handler's declared
    /// type accepts the runtime message type.
    fn enqueue(&self, handler: Handler, mut msg: Msg) -> bool {
        if !handler.accepts_msg(msg.wire_type()) {
            warn!(
                handler = %handler.name,
                wire_type = msg.wire_type(),
                "handler type mismatch; dropping message"
            );
            return false;
        }
        let Some(router) = self.router_handle() else {
            return false;
        };

        let priority = msg.has_flag(flags::PRIORITY);
        let sessions = Arc::clone(&self.sessions);
        let job: Job = Box::new(move || {
            msg.release();
            if msg.session_id().is_nil() {
                (handler.func)(msg, HandlerCtx::new(router, None));
            } else if msg.has_flag(flags::OPEN_SESSION) {
                sessions.open_server(handler, msg, router);
            } else {
                sessions.deliver(msg);
            }
        });
        self.pool.spawn(priority, job)
    }

    fn enqueue_session(&self, mut msg: Msg) {
        let priority = msg.has_flag(flags::PRIORITY);
        let sessions = Arc::clone(&self.sessions);
        self.pool.spawn(
            priority,
            Box::new(move || {
                msg.release();
                sessions.deliver(msg);
            }),
        );
    }
}

fn duplicate(endpoint: &str, key: &str) -> RouterError {
    meshway_core::error::RouteError::DuplicateHandler {
        endpoint: endpoint.to_string(),
        key: key.to_string(),
    }
    .into()
}
