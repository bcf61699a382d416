//! The router core.
//!
//! A [`MsgRouter`] owns the dispatcher, the worker pool, the session
//! manager, the receipt tracker, and a set of channels to peer routers.
//! Outbound messages are stamped, resolved against the route table, and
//! either dispatched locally or framed and forwarded; inbound frames from
//! channel pumps enter the same pipeline. Background threads drive
//! advertisement, session lifecycles, and dead-router detection.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use flume::{Receiver, RecvTimeoutError, Sender};
use hashbrown::HashMap;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace, warn};
use uuid::Uuid;

use meshway_core::config::RouterSettings;
use meshway_core::endpoint::{AbstractMap, Endpoint, EndpointError};
use meshway_core::flags;
use meshway_core::message::{Msg, StaticPayload, DEFAULT_TTL};
use meshway_core::routes::PhysicalRoute;
use meshway_wire::system::{
    PROP_BUILD_VER, PROP_DEAD_ROUTER_DETECT, PROP_MACHINE_NAME, PROP_P2P_ENABLE,
    PROP_PROTOCOL_VER, PROP_RECEIPT_SEND,
};
use meshway_wire::{decode_msg, encode_msg, AdvertiseMsg, ReceiptMsg, TypeRegistry};

use crate::channel::MsgChannel;
use crate::context::{HandlerCtx, RequestContext};
use crate::dispatch::{DispatchOutcome, Dispatcher, RouterShared};
use crate::error::RouterError;
use crate::handler::{EndpointMunger, Handler, HandlerSet, TargetId};
use crate::session::{SessionManager, SessionMetrics};
use crate::tracker::ReceiptTracker;
use crate::worker::WorkerPool;

/// Wire protocol version advertised to peers.
const PROTOCOL_VER: &str = "1";

/// How often channel pumps check for shutdown.
const PUMP_POLL: Duration = Duration::from_millis(100);

/// Events flowing from the dispatcher back to the router. The dispatcher
/// holds only this channel, never the router itself.
pub(crate) enum RouterEvent {
    /// The logical handler set changed; peers must be re-advertised.
    SetChanged(Uuid),
}

struct ChannelEntry {
    chan: Arc<dyn MsgChannel>,
    uplink: bool,
}

type DeadRouterHook = Box<dyn Fn(&Endpoint, Uuid) + Send + Sync>;
type SetChangeHook = Box<dyn Fn(Uuid) + Send + Sync>;

/// A hierarchical peer-to-peer message router.
///
/// Cheap to clone; clones share the same router instance.
pub struct MsgRouter {
    pub(crate) inner: Arc<RouterInner>,
}

impl Clone for MsgRouter {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

pub(crate) struct RouterInner {
    router_ep: Endpoint,
    settings: RouterSettings,
    abstract_map: AbstractMap,
    registry: Arc<TypeRegistry>,
    dispatcher: Dispatcher,
    pub(crate) sessions: Arc<SessionManager>,
    tracker: ReceiptTracker,
    pool: Arc<WorkerPool>,
    shared: Arc<Mutex<RouterShared>>,
    channels: RwLock<HashMap<String, ChannelEntry>>,
    uplink: RwLock<Option<String>>,
    on_dead_router: RwLock<Option<DeadRouterHook>>,
    on_set_change: RwLock<Option<SetChangeHook>>,
    events_rx: Mutex<Option<Receiver<RouterEvent>>>,
    shutdown_tx: Mutex<Option<Sender<()>>>,
    shutdown_rx: Receiver<()>,
    running: AtomicBool,
    stopped: AtomicBool,
    bg: Mutex<Vec<JoinHandle<()>>>,
}

impl MsgRouter {
    /// Create a router at the given physical endpoint.
    ///
    /// The configured abstract map is private to this router; other
    /// routers in the same process keep their own bindings. Resolve URIs
    /// against it with [`MsgRouter::parse_endpoint`].
    pub fn new(router_uri: &str, settings: RouterSettings) -> Result<Self, RouterError> {
        let abstract_map = AbstractMap::load(
            settings
                .abstract_map
                .iter()
                .map(|(name, uri)| (name.as_str(), uri.as_str())),
        );

        let router_ep =
            Endpoint::parse_with(router_uri, settings.max_physical_depth, &abstract_map)?;
        if !router_ep.is_physical() {
            return Err(EndpointError::NotPhysical.into());
        }

        let shared = Arc::new(Mutex::new(RouterShared::new()));
        let pool = Arc::new(WorkerPool::new(settings.worker_threads));
        let sessions = Arc::new(SessionManager::new(&settings));
        let (event_tx, event_rx) = flume::unbounded();
        let (shutdown_tx, shutdown_rx) = flume::unbounded();

        let dispatcher = Dispatcher::new(
            Arc::clone(&shared),
            Arc::clone(&sessions),
            Arc::clone(&pool),
            event_tx,
        );
        let tracker = ReceiptTracker::new(Arc::clone(&shared), &settings);

        let inner = Arc::new(RouterInner {
            router_ep,
            settings,
            abstract_map,
            registry: Arc::new(TypeRegistry::new()),
            dispatcher,
            sessions,
            tracker,
            pool,
            shared,
            channels: RwLock::new(HashMap::new()),
            uplink: RwLock::new(None),
            on_dead_router: RwLock::new(None),
            on_set_change: RwLock::new(None),
            events_rx: Mutex::new(Some(event_rx)),
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            shutdown_rx,
            running: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            bg: Mutex::new(Vec::new()),
        });

        inner.dispatcher.bind_router(Arc::downgrade(&inner));
        inner.sessions.bind_router(Arc::downgrade(&inner));

        Ok(Self { inner })
    }

    pub(crate) fn from_inner(inner: Arc<RouterInner>) -> Self {
        Self { inner }
    }

    // --- lifecycle --------------------------------------------------------

    /// Start background processing. Advertises to every attached channel.
    pub fn start(&self) {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.spawn_event_loop();
        self.inner.spawn_session_scan();
        if self.inner.tracker.enabled() {
            self.inner.spawn_dead_router_scan();
        }
        self.inner.advertise_all();
    }

    /// Stop the router: close channels, drain workers, join background
    /// threads. Terminal; a stopped router cannot be restarted.
    ///
    /// Must not be called from inside a message handler.
    pub fn stop(&self) {
        let inner = &self.inner;
        if !inner.running.swap(false, Ordering::SeqCst) {
            return;
        }
        inner.stopped.store(true, Ordering::SeqCst);
        *inner.shutdown_tx.lock() = None;

        let channels: Vec<Arc<dyn MsgChannel>> = inner
            .channels
            .write()
            .drain()
            .map(|(_, entry)| entry.chan)
            .collect();
        for chan in &channels {
            chan.close();
        }

        let handles: Vec<JoinHandle<()>> = inner.bg.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.join();
        }

        inner.pool.shutdown();
        inner.tracker.clear();
    }

    /// Whether `start` has been called and `stop` has not.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    // --- channels ---------------------------------------------------------

    /// Attach a channel to a peer router and start pumping its inbound
    /// frames. `uplink` marks the channel toward this router's hub; unicast
    /// messages with no local route are forwarded there.
    pub fn attach_channel(&self, chan: Arc<dyn MsgChannel>, uplink: bool) {
        let name = chan.name().to_string();
        self.inner.channels.write().insert(
            name.clone(),
            ChannelEntry {
                chan: Arc::clone(&chan),
                uplink,
            },
        );
        if uplink {
            *self.inner.uplink.write() = Some(name.clone());
        }

        let weak = Arc::downgrade(&self.inner);
        let rx = chan.inbound();
        let handle = std::thread::Builder::new()
            .name(format!("mw-pump-{name}"))
            .spawn(move || loop {
                let Some(inner) = weak.upgrade() else { break };
                if inner.stopped.load(Ordering::Acquire) {
                    break;
                }
                match rx.recv_timeout(PUMP_POLL) {
                    Ok(frame) => {
                        if !inner.running.load(Ordering::Acquire) {
                            trace!(channel = %name, "frame dropped; router not running");
                            continue;
                        }
                        match decode_msg(frame, &inner.registry) {
                            Ok(mut msg) => {
                                msg.set_recv_channel(Some(name.clone()));
                                inner.receive(msg);
                            }
                            Err(err) => {
                                warn!(%err, channel = %name, "dropping undecodable frame");
                            }
                        }
                    }
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            })
            .expect("failed to spawn channel pump");
        self.inner.bg.lock().push(handle);

        if self.is_running() {
            if let Err(err) = self.inner.advertise_on(&chan) {
                debug!(%err, "failed to advertise on new channel");
            }
        }
    }

    /// Detach and close a channel. Returns `true` if it was attached.
    pub fn detach_channel(&self, name: &str) -> bool {
        let removed = self.inner.channels.write().remove(name);
        if let Some(entry) = &removed {
            entry.chan.close();
            let mut uplink = self.inner.uplink.write();
            if uplink.as_deref() == Some(name) {
                *uplink = None;
            }
        }
        removed.is_some()
    }

    // --- messaging --------------------------------------------------------

    /// Send a message toward its target endpoint.
    pub fn send(&self, msg: Msg) -> Result<(), RouterError> {
        self.inner.send_internal(msg)
    }

    /// Broadcast to every handler matching the logical target.
    pub fn broadcast(&self, mut msg: Msg) -> Result<(), RouterError> {
        if !msg.to_ep().is_some_and(Endpoint::is_logical) {
            return Err(EndpointError::NotLogical.into());
        }
        msg.set_flag(flags::BROADCAST);
        self.inner.send_internal(msg)
    }

    /// Send a request and block until the reply or the timeout.
    pub fn query(&self, msg: Msg, timeout: Duration) -> Result<Msg, RouterError> {
        self.inner.sessions.query(msg, timeout)
    }

    /// Complete a request context with `reply`.
    pub fn reply_to(&self, ctx: RequestContext, reply: Msg) -> Result<(), RouterError> {
        ctx.reply(reply)
    }

    // --- registration -----------------------------------------------------

    /// The dispatcher, for handler registration and direct dispatch.
    #[must_use]
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    /// Parse an endpoint URI against this router's abstract map and
    /// configured physical depth limit.
    pub fn parse_endpoint(&self, uri: &str) -> Result<Endpoint, RouterError> {
        Ok(Endpoint::parse_with(
            uri,
            self.inner.settings.max_physical_depth,
            &self.inner.abstract_map,
        )?)
    }

    /// Register a logical handler for payload type `P` at `endpoint`.
    /// Returns the target ID for later removal.
    pub fn handle<P: StaticPayload + 'static>(
        &self,
        endpoint: &str,
        f: impl Fn(Msg, HandlerCtx) + Send + Sync + 'static,
    ) -> Result<TargetId, RouterError> {
        let ep = self.parse_endpoint(endpoint)?;
        let handler = Handler::for_type::<P>(f);
        let target = handler.target_id();
        self.inner
            .dispatcher
            .add_logical(handler, ep, false, false, None)?;
        Ok(target)
    }

    /// Register a target set with optional endpoint mungers.
    pub fn add_target(
        &self,
        set: HandlerSet,
        mungers: &[&dyn EndpointMunger],
    ) -> Result<(), RouterError> {
        self.inner.dispatcher.add_target(set, mungers)
    }

    /// Remove every handler owned by `target`.
    pub fn remove_target(&self, target: TargetId) -> bool {
        self.inner.dispatcher.remove_target(target)
    }

    // --- advertisement and hooks ------------------------------------------

    /// Advertise the current endpoint set to every attached channel.
    pub fn advertise(&self) {
        self.inner.advertise_all();
    }

    /// Regenerate the endpoint-set GUID and re-advertise.
    pub fn refresh_advertise(&self) {
        self.inner.dispatcher.refresh_advertise();
    }

    /// Hook invoked when a tracked peer stops acknowledging forwarded
    /// messages.
    pub fn on_dead_router(&self, hook: impl Fn(&Endpoint, Uuid) + Send + Sync + 'static) {
        *self.inner.on_dead_router.write() = Some(Box::new(hook));
    }

    /// Hook invoked when a peer advertises a changed endpoint-set GUID.
    pub fn on_endpoint_set_change(&self, hook: impl Fn(Uuid) + Send + Sync + 'static) {
        *self.inner.on_set_change.write() = Some(Box::new(hook));
    }

    // --- introspection ----------------------------------------------------

    /// This router's physical endpoint.
    #[must_use]
    pub fn router_ep(&self) -> &Endpoint {
        &self.inner.router_ep
    }

    /// The message type registry for this router.
    #[must_use]
    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.inner.registry
    }

    /// Session counters.
    #[must_use]
    pub fn metrics(&self) -> &SessionMetrics {
        self.inner.sessions.metrics()
    }

    /// Snapshot of the known peer routes.
    #[must_use]
    pub fn physical_routes(&self) -> Vec<PhysicalRoute> {
        self.inner
            .shared
            .lock()
            .routes
            .physical_routes()
            .cloned()
            .collect()
    }

    /// Forwarded messages still awaiting receipts.
    #[must_use]
    pub fn outstanding_receipts(&self) -> usize {
        self.inner.tracker.outstanding()
    }

    /// This router's abstract-endpoint bindings.
    #[must_use]
    pub fn abstract_map(&self) -> &AbstractMap {
        &self.inner.abstract_map
    }

    /// The effective configuration.
    #[must_use]
    pub fn settings(&self) -> &RouterSettings {
        &self.inner.settings
    }
}

impl RouterInner {
    // --- outbound ---------------------------------------------------------

    /// Stamp headers and hand the message to the routing pipeline.
    pub(crate) fn send_internal(&self, mut msg: Msg) -> Result<(), RouterError> {
        if !self.running.load(Ordering::Acquire) {
            return Err(RouterError::NotRunning);
        }
        msg.acquire();

        if msg.from_ep().is_none() {
            msg.set_from(Some(self.router_ep.clone()));
        }
        // A message still carrying the built-in hop budget picks up the
        // configured default instead.
        if msg.ttl() == DEFAULT_TTL && self.settings.default_ttl != DEFAULT_TTL {
            msg.set_ttl(self.settings.default_ttl);
        }
        let to_broadcast = msg
            .to_ep()
            .is_some_and(|ep| ep.is_logical() && ep.broadcast());
        if to_broadcast {
            msg.set_flag(flags::BROADCAST);
        }
        if msg.has_flag(flags::RECEIPT_REQUEST) {
            if msg.msg_id().is_nil() {
                msg.set_msg_id(Uuid::new_v4());
            }
            if msg.receipt_ep().is_none() {
                msg.set_receipt(Some(self.router_ep.clone()));
            }
        }

        self.route(msg).map(|_| ())
    }

    /// Resolve the target and dispatch locally or forward. Returns whether
    /// the message was accepted for local dispatch.
    fn route(&self, msg: Msg) -> Result<bool, RouterError> {
        let Some(to) = msg.to_ep().cloned() else {
            // No target: local physical dispatch only.
            return Ok(self.dispatcher.dispatch(msg));
        };

        if to.is_logical() {
            if to.is_null() {
                trace!("message to the null endpoint discarded");
                return Ok(false);
            }
            if msg.has_flag(flags::BROADCAST) {
                return self.route_broadcast(msg);
            }
            return self.route_unicast(msg);
        }

        // Physical target.
        if to.is_channel() {
            // A channel endpoint names one hop: send side picks the
            // channel by hint, receive side delivers locally.
            if msg.recv_channel().is_some() {
                return Ok(self.dispatch_local_physical(msg));
            }
            let hint = to.channel_hint().unwrap_or_default().to_string();
            return self.forward_named(&hint, msg).map(|()| false);
        }
        if to.is_physical_match(&self.router_ep) {
            return Ok(self.dispatch_local_physical(msg));
        }
        self.forward_physical(&to, msg).map(|()| false)
    }

    fn dispatch_local_physical(&self, msg: Msg) -> bool {
        match self.dispatcher.dispatch_outcome(msg) {
            DispatchOutcome::Delivered(_) => true,
            DispatchOutcome::Dropped => false,
            DispatchOutcome::NoRoute(msg) => {
                debug!(wire_type = msg.wire_type(), "no handler for physical message");
                false
            }
        }
    }

    fn route_broadcast(&self, msg: Msg) -> Result<bool, RouterError> {
        let from_channel = msg.recv_channel().map(str::to_string);
        let closest = msg.has_flag(flags::CLOSEST_ROUTE);
        let forward_copy = if self.settings.p2p_enable {
            Some(msg.clone())
        } else {
            None
        };

        let delivered = self.dispatcher.dispatch(msg);

        if let Some(copy) = forward_copy {
            if !(closest && delivered) {
                self.forward_broadcast(copy, from_channel.as_deref());
            }
        }
        Ok(delivered)
    }

    fn route_unicast(&self, msg: Msg) -> Result<bool, RouterError> {
        match self.dispatcher.dispatch_outcome(msg) {
            DispatchOutcome::Delivered(_) => Ok(true),
            DispatchOutcome::Dropped => Ok(false),
            DispatchOutcome::NoRoute(msg) => {
                // Not served here; try the hub.
                self.forward_uplink(msg)?;
                Ok(false)
            }
        }
    }

    // --- forwarding -------------------------------------------------------

    fn forward_broadcast(&self, msg: Msg, except_channel: Option<&str>) {
        let targets: Vec<Arc<dyn MsgChannel>> = {
            let channels = self.channels.read();
            channels
                .values()
                .filter(|entry| Some(entry.chan.name()) != except_channel)
                .filter(|entry| entry.chan.peer_ep().is_some())
                .map(|entry| Arc::clone(&entry.chan))
                .collect()
        };

        for chan in targets {
            if let Err(err) = self.forward_via(&chan, msg.clone()) {
                debug!(%err, channel = chan.name(), "broadcast forward failed");
            }
        }
    }

    fn forward_uplink(&self, msg: Msg) -> Result<(), RouterError> {
        let chan = {
            let uplink = self.uplink.read();
            uplink
                .as_deref()
                .and_then(|name| self.channels.read().get(name).map(|e| Arc::clone(&e.chan)))
        };
        match chan {
            // Never bounce a message back where it came from.
            Some(chan) if msg.recv_channel() == Some(chan.name()) => {
                debug!(
                    to = msg.to_ep().map(Endpoint::canonical).unwrap_or("<none>"),
                    "unroutable message arrived on the uplink; dropped"
                );
                Ok(())
            }
            Some(chan) => self.forward_via(&chan, msg),
            None => {
                debug!(
                    to = msg.to_ep().map(Endpoint::canonical).unwrap_or("<none>"),
                    "no local route and no uplink; message dropped"
                );
                Ok(())
            }
        }
    }

    fn forward_named(&self, name: &str, msg: Msg) -> Result<(), RouterError> {
        let chan = self.channels.read().get(name).map(|e| Arc::clone(&e.chan));
        match chan {
            Some(chan) => self.forward_via(&chan, msg),
            None => {
                debug!(channel = name, "no channel with that hint; message dropped");
                Ok(())
            }
        }
    }

    fn forward_physical(&self, to: &Endpoint, msg: Msg) -> Result<(), RouterError> {
        let chan = {
            let channels = self.channels.read();
            channels
                .values()
                .find(|entry| {
                    entry.chan.peer_ep().is_some_and(|peer| {
                        peer.is_physical_match(to) || to.is_physical_descendant(&peer)
                    })
                })
                .map(|entry| Arc::clone(&entry.chan))
        };
        match chan {
            Some(chan) => self.forward_via(&chan, msg),
            None => self.forward_uplink(msg),
        }
    }

    /// Spend a hop, frame the message, arm the tracker, and hand the frame
    /// to the channel.
    fn forward_via(
        &self,
        chan: &Arc<dyn MsgChannel>,
        mut msg: Msg,
    ) -> Result<(), RouterError> {
        if !msg.consume_hop() {
            debug!(wire_type = msg.wire_type(), "ttl exhausted; message dropped");
            return Ok(());
        }

        let frame = encode_msg(&mut msg, &self.registry)?;

        if let Some(peer) = chan.peer_ep() {
            let set_id = self
                .shared
                .lock()
                .routes
                .physical_route(&peer)
                .map(|route| route.logical_endpoint_set_id)
                .unwrap_or_else(Uuid::nil);
            self.tracker.track(&peer, set_id, &msg);
        }

        chan.send_frame(frame)
            .map_err(|_| RouterError::ChannelClosed(chan.name().to_string()))
    }

    // --- inbound ----------------------------------------------------------

    /// Entry point for messages decoded by channel pumps.
    pub(crate) fn receive(&self, msg: Msg) {
        if !self.running.load(Ordering::Acquire) {
            return;
        }

        if let Some(receipt) = msg.payload::<ReceiptMsg>() {
            self.tracker.on_receipt(receipt.for_msg_id);
            return;
        }
        if msg.payload::<AdvertiseMsg>().is_some() {
            self.handle_advertise(msg);
            return;
        }

        let wants_receipt = msg.has_flag(flags::RECEIPT_REQUEST)
            && !msg.msg_id().is_nil()
            && self.settings.send_receipts;
        let receipt_to = msg.receipt_ep().cloned();
        let msg_id = msg.msg_id();

        match self.route(msg) {
            Ok(true) => {
                if wants_receipt {
                    if let Some(to) = receipt_to {
                        self.send_receipt(to, msg_id);
                    }
                }
            }
            Ok(false) => {}
            Err(err) => debug!(%err, "failed to route inbound message"),
        }
    }

    fn send_receipt(&self, to: Endpoint, for_msg_id: Uuid) {
        let mut receipt = Msg::from_payload(ReceiptMsg { for_msg_id });
        receipt.set_to(Some(to.no_broadcast()));
        if let Err(err) = self.send_internal(receipt) {
            debug!(%err, "failed to send receipt");
        }
    }

    fn handle_advertise(&self, msg: Msg) {
        let Some(adv) = msg.payload::<AdvertiseMsg>() else {
            return;
        };
        let set_id = adv.set_id;
        let Some(from) = msg.from_ep() else {
            debug!("advertisement without a source endpoint dropped");
            return;
        };
        let peer = from.no_broadcast();

        let (is_new, changed) = {
            let mut shared = self.shared.lock();
            let known = shared.routes.physical_route(&peer).is_some();
            let changed = shared.routes.upsert_physical(peer.clone(), set_id);
            (!known, changed)
        };
        trace!(peer = %peer, %set_id, is_new, "peer advertisement");

        if let Some(chan_name) = msg.recv_channel() {
            let chan = self
                .channels
                .read()
                .get(chan_name)
                .map(|entry| Arc::clone(&entry.chan));
            if let Some(chan) = chan {
                if chan.peer_ep().is_none() {
                    chan.set_peer_ep(peer.clone());
                }
                // Answer new peers so both sides learn each other.
                if is_new {
                    if let Err(err) = self.advertise_on(&chan) {
                        debug!(%err, "failed to answer advertisement");
                    }
                }
            }
        }

        if changed {
            if let Some(hook) = &*self.on_set_change.read() {
                hook(set_id);
            }
        }
    }

    // --- advertisement ----------------------------------------------------

    fn build_advertise(&self) -> Msg {
        let set_id = self.shared.lock().set_id;
        let mut adv = AdvertiseMsg::new(set_id);
        adv.set_prop(PROP_PROTOCOL_VER, PROTOCOL_VER);
        adv.set_prop(PROP_BUILD_VER, env!("CARGO_PKG_VERSION"));
        adv.set_prop(PROP_P2P_ENABLE, bool_prop(self.settings.p2p_enable));
        adv.set_prop(PROP_RECEIPT_SEND, bool_prop(self.settings.send_receipts));
        adv.set_prop(PROP_DEAD_ROUTER_DETECT, bool_prop(self.tracker.enabled()));
        let machine = if self.settings.machine_name.is_empty() {
            self.router_ep.root_host().unwrap_or_default().to_string()
        } else {
            self.settings.machine_name.clone()
        };
        adv.set_prop(PROP_MACHINE_NAME, machine);

        let mut msg = Msg::from_payload(adv);
        msg.set_from(Some(self.router_ep.clone()));
        msg.set_ttl(1);
        msg
    }

    fn advertise_on(&self, chan: &Arc<dyn MsgChannel>) -> Result<(), RouterError> {
        let mut msg = self.build_advertise();
        let frame = encode_msg(&mut msg, &self.registry)?;
        chan.send_frame(frame)
            .map_err(|_| RouterError::ChannelClosed(chan.name().to_string()))
    }

    fn advertise_all(&self) {
        let targets: Vec<Arc<dyn MsgChannel>> = self
            .channels
            .read()
            .values()
            .map(|entry| Arc::clone(&entry.chan))
            .collect();
        for chan in targets {
            if let Err(err) = self.advertise_on(&chan) {
                debug!(%err, channel = chan.name(), "advertisement failed");
            }
        }
    }

    // --- background threads -----------------------------------------------

    fn spawn_event_loop(self: &Arc<Self>) {
        let Some(events_rx) = self.events_rx.lock().take() else {
            return;
        };
        let weak = Arc::downgrade(self);
        let handle = std::thread::Builder::new()
            .name("mw-events".to_string())
            .spawn(move || loop {
                match events_rx.recv_timeout(PUMP_POLL) {
                    Ok(RouterEvent::SetChanged(set_id)) => {
                        let Some(inner) = weak.upgrade() else { break };
                        if inner.stopped.load(Ordering::Acquire) {
                            break;
                        }
                        trace!(%set_id, "logical endpoint set changed; re-advertising");
                        inner.advertise_all();
                    }
                    Err(RecvTimeoutError::Timeout) => {
                        let Some(inner) = weak.upgrade() else { break };
                        if inner.stopped.load(Ordering::Acquire) {
                            break;
                        }
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            })
            .expect("failed to spawn router event loop");
        self.bg.lock().push(handle);
    }

    fn spawn_session_scan(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let shutdown_rx = self.shutdown_rx.clone();
        let period = self.sessions.scan_period();
        let handle = std::thread::Builder::new()
            .name("mw-sessions".to_string())
            .spawn(move || loop {
                match shutdown_rx.recv_timeout(period) {
                    Err(RecvTimeoutError::Timeout) => {
                        let Some(inner) = weak.upgrade() else { break };
                        if inner.stopped.load(Ordering::Acquire) {
                            break;
                        }
                        inner.sessions.scan(std::time::Instant::now());
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })
            .expect("failed to spawn session scan");
        self.bg.lock().push(handle);
    }

    fn spawn_dead_router_scan(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let shutdown_rx = self.shutdown_rx.clone();
        let period = self.tracker.scan_period();
        let handle = std::thread::Builder::new()
            .name("mw-deadscan".to_string())
            .spawn(move || loop {
                match shutdown_rx.recv_timeout(period) {
                    Err(RecvTimeoutError::Timeout) => {
                        let Some(inner) = weak.upgrade() else { break };
                        if inner.stopped.load(Ordering::Acquire) {
                            break;
                        }
                        for (ep, set_id) in inner.tracker.detect_dead(std::time::Instant::now())
                        {
                            inner.on_dead_detected(&ep, set_id);
                        }
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })
            .expect("failed to spawn dead-router scan");
        self.bg.lock().push(handle);
    }

    fn on_dead_detected(&self, ep: &Endpoint, set_id: Uuid) {
        self.shared.lock().routes.remove_physical(ep);
        warn!(peer = %ep, "dead router detected");
        if let Some(hook) = &*self.on_dead_router.read() {
            hook(ep, set_id);
        }
    }
}

fn bool_prop(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}
