//! Route table: physical peer routes and the logical-route index.
//!
//! Logical routes map an endpoint to handlers keyed by message wire type
//! (or the `*default*` sentinel). The table is handler-agnostic; the
//! dispatcher instantiates it with its own handler record type.
//!
//! Matching (`get_routes`) is a forward scan with wildcard-aware endpoint
//! comparison; tables are small (tens of routes) and mutation regenerates
//! the owner's endpoint-set GUID, so no secondary index is kept.

use std::time::Instant;

use hashbrown::HashMap;
use smallvec::SmallVec;
use uuid::Uuid;

use crate::endpoint::Endpoint;
use crate::error::RouteError;

/// Route key sentinel: the handler accepts any message type the route's
/// typed handlers don't claim.
pub const DEFAULT_KEY: &str = "*default*";

/// A known peer router.
#[derive(Debug, Clone)]
pub struct PhysicalRoute {
    pub router_ep: Endpoint,
    pub logical_endpoint_set_id: Uuid,
    pub last_seen: Instant,
}

/// One logical endpoint with its handler map.
#[derive(Debug)]
pub struct LogicalRoute<H> {
    endpoint: Endpoint,
    target_group: Option<Uuid>,
    handlers: HashMap<String, SmallVec<[H; 1]>>,
}

impl<H> LogicalRoute<H> {
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn target_group(&self) -> Option<Uuid> {
        self.target_group
    }

    /// Select the handler for a message type: exact key first, then the
    /// default key. Routes with neither yield `None`. Grouped routes may
    /// hold several handlers per key; unicast takes the first.
    pub fn handler_for(&self, wire_type: &str) -> Option<&H> {
        self.handlers_for(wire_type).first()
    }

    /// All handlers selected for a message type: the exact key's handlers,
    /// else the default key's. Broadcast enqueues one task per handler.
    pub fn handlers_for(&self, wire_type: &str) -> &[H] {
        self.handlers
            .get(wire_type)
            .or_else(|| self.handlers.get(DEFAULT_KEY))
            .map(|list| list.as_slice())
            .unwrap_or(&[])
    }

    /// Whether the route has a handler under `key`.
    pub fn has_key(&self, key: &str) -> bool {
        self.handlers.contains_key(key)
    }

    fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// The route table.
#[derive(Debug, Default)]
pub struct RouteTable<H> {
    logical: Vec<LogicalRoute<H>>,
    physical: HashMap<String, PhysicalRoute>,
}

impl<H> RouteTable<H> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            logical: Vec::new(),
            physical: HashMap::new(),
        }
    }

    // --- logical routes ---------------------------------------------------

    /// Add a handler under `(endpoint, key)`.
    ///
    /// Duplicate `(endpoint, key)` pairs are rejected unless the existing
    /// route carries the same target group, in which case the handler is
    /// appended. Returns `true` when the table changed.
    pub fn add_logical(
        &mut self,
        endpoint: Endpoint,
        key: &str,
        handler: H,
        target_group: Option<Uuid>,
    ) -> Result<bool, RouteError> {
        // Duplicate check across every route for this endpoint.
        for route in self.logical.iter_mut().filter(|r| r.endpoint == endpoint) {
            let group_matches = target_group.is_some() && route.target_group == target_group;
            if let Some(list) = route.handlers.get_mut(key) {
                if group_matches {
                    list.push(handler);
                    return Ok(true);
                }
                return Err(RouteError::DuplicateHandler {
                    endpoint: endpoint.to_string(),
                    key: key.to_string(),
                });
            }
        }

        // Grouped targets share one route; everything else gets its own.
        if let Some(route) = self.logical.iter_mut().find(|r| {
            r.endpoint == endpoint && target_group.is_some() && r.target_group == target_group
        }) {
            route
                .handlers
                .entry(key.to_string())
                .or_default()
                .push(handler);
            return Ok(true);
        }

        let mut handlers: HashMap<String, SmallVec<[H; 1]>> = HashMap::new();
        handlers.entry(key.to_string()).or_default().push(handler);
        self.logical.push(LogicalRoute {
            endpoint,
            target_group,
            handlers,
        });
        Ok(true)
    }

    /// Remove every handler matching `pred`, pruning routes left empty.
    /// Returns `true` when anything was removed.
    pub fn remove_where(&mut self, mut pred: impl FnMut(&H) -> bool) -> bool {
        let mut changed = false;
        for route in &mut self.logical {
            route.handlers.retain(|_, list| {
                let before = list.len();
                list.retain(|h| !pred(h));
                changed |= list.len() != before;
                !list.is_empty()
            });
        }
        self.logical.retain(|r| !r.is_empty());
        changed
    }

    /// All logical routes whose endpoint matches `target`.
    pub fn get_routes(&self, target: &Endpoint) -> SmallVec<[&LogicalRoute<H>; 4]> {
        self.logical
            .iter()
            .filter(|r| r.endpoint.logical_match(target))
            .collect()
    }

    /// Number of logical routes.
    #[must_use]
    pub fn logical_len(&self) -> usize {
        self.logical.len()
    }

    /// Iterate all logical routes.
    pub fn logical_routes(&self) -> impl Iterator<Item = &LogicalRoute<H>> {
        self.logical.iter()
    }

    // --- physical routes --------------------------------------------------

    /// Record or refresh a peer router. Returns `true` when the peer is
    /// new or advertised a different endpoint-set GUID.
    pub fn upsert_physical(&mut self, router_ep: Endpoint, set_id: Uuid) -> bool {
        let key = router_ep.canonical().to_string();
        match self.physical.get_mut(&key) {
            Some(route) => {
                route.last_seen = Instant::now();
                if route.logical_endpoint_set_id != set_id {
                    route.logical_endpoint_set_id = set_id;
                    true
                } else {
                    false
                }
            }
            None => {
                self.physical.insert(
                    key,
                    PhysicalRoute {
                        router_ep,
                        logical_endpoint_set_id: set_id,
                        last_seen: Instant::now(),
                    },
                );
                true
            }
        }
    }

    /// Drop a peer router. Returns `true` if it was known.
    pub fn remove_physical(&mut self, router_ep: &Endpoint) -> bool {
        self.physical.remove(router_ep.canonical()).is_some()
    }

    /// Look up a peer route.
    pub fn physical_route(&self, router_ep: &Endpoint) -> Option<&PhysicalRoute> {
        self.physical.get(router_ep.canonical())
    }

    /// Iterate all peer routes.
    pub fn physical_routes(&self) -> impl Iterator<Item = &PhysicalRoute> {
        self.physical.values()
    }

    /// Number of peer routes.
    #[must_use]
    pub fn physical_len(&self) -> usize {
        self.physical.len()
    }

    /// Drop all logical routes, keeping peer routes.
    pub fn clear_logical(&mut self) {
        self.logical.clear();
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.logical.clear();
        self.physical.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ep(uri: &str) -> Endpoint {
        Endpoint::parse(uri).unwrap()
    }

    #[test]
    fn duplicate_key_rejected_without_group() {
        let mut table: RouteTable<u32> = RouteTable::new();
        table
            .add_logical(ep("logical://svc/worker"), "t.a", 1, None)
            .unwrap();
        let err = table
            .add_logical(ep("logical://svc/worker"), "t.a", 2, None)
            .unwrap_err();
        assert!(matches!(err, RouteError::DuplicateHandler { .. }));

        // Different key on the same endpoint is fine.
        table
            .add_logical(ep("logical://svc/worker"), "t.b", 3, None)
            .unwrap();
        assert_eq!(table.logical_len(), 2);
    }

    #[test]
    fn matching_group_appends() {
        let group = Uuid::new_v4();
        let mut table: RouteTable<u32> = RouteTable::new();
        table
            .add_logical(ep("logical://svc/worker"), "t.a", 1, Some(group))
            .unwrap();
        table
            .add_logical(ep("logical://svc/worker"), "t.a", 2, Some(group))
            .unwrap();
        table
            .add_logical(ep("logical://svc/worker"), "t.b", 3, Some(group))
            .unwrap();

        assert_eq!(table.logical_len(), 1);

        // A different group still conflicts on the same key.
        let err = table
            .add_logical(ep("logical://svc/worker"), "t.a", 4, Some(Uuid::new_v4()))
            .unwrap_err();
        assert!(matches!(err, RouteError::DuplicateHandler { .. }));
    }

    #[test]
    fn get_routes_uses_logical_match() {
        let mut table: RouteTable<u32> = RouteTable::new();
        table
            .add_logical(ep("logical://apps/foo/*"), "t.a", 1, None)
            .unwrap();
        table
            .add_logical(ep("logical://apps/bar"), "t.a", 2, None)
            .unwrap();

        let hits = table.get_routes(&ep("logical://apps/foo/baz"));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].handler_for("t.a"), Some(&1));

        assert!(table.get_routes(&ep("logical://apps/nope")).is_empty());
        assert!(table.get_routes(&ep("logical://null")).is_empty());
    }

    #[test]
    fn handler_selection_falls_back_to_default() {
        let mut table: RouteTable<u32> = RouteTable::new();
        table
            .add_logical(ep("logical://svc"), "t.a", 1, None)
            .unwrap();
        table
            .add_logical(ep("logical://svc"), DEFAULT_KEY, 9, None)
            .unwrap();

        let hits = table.get_routes(&ep("logical://svc"));
        // Both routes match; per route the typed key wins over default.
        let selected: Vec<_> = hits.iter().filter_map(|r| r.handler_for("t.a")).collect();
        assert!(selected.contains(&&1));
        assert!(selected.contains(&&9));
        assert_eq!(hits[0].handler_for("t.zzz").or(hits[1].handler_for("t.zzz")), Some(&9));
    }

    #[test]
    fn remove_where_prunes_empty_routes() {
        let mut table: RouteTable<u32> = RouteTable::new();
        table
            .add_logical(ep("logical://a"), "t.a", 1, None)
            .unwrap();
        table
            .add_logical(ep("logical://b"), "t.a", 2, None)
            .unwrap();

        assert!(table.remove_where(|h| *h == 1));
        assert_eq!(table.logical_len(), 1);
        assert!(!table.remove_where(|h| *h == 1));
    }

    #[test]
    fn physical_upsert_tracks_set_id() {
        let mut table: RouteTable<u32> = RouteTable::new();
        let peer = ep("physical://root/hub");
        let set1 = Uuid::new_v4();
        let set2 = Uuid::new_v4();

        assert!(table.upsert_physical(peer.clone(), set1));
        assert!(!table.upsert_physical(peer.clone(), set1));
        assert!(table.upsert_physical(peer.clone(), set2));
        assert_eq!(table.physical_len(), 1);
        assert!(table.remove_physical(&peer));
        assert!(!table.remove_physical(&peer));
    }
}
