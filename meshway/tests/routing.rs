//! Local dispatch semantics: wildcard matching, the null endpoint,
//! broadcast fan-out, unicast route selection, and handler bookkeeping.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use meshway::prelude::*;
use meshway::{flags, Handler};

const WAIT: Duration = Duration::from_secs(2);

fn test_router() -> MsgRouter {
    let router = MsgRouter::new(
        "physical://localhost/test",
        RouterSettings::default().with_worker_threads(2),
    )
    .unwrap();
    router.start();
    router
}

fn to(msg: &mut Msg, uri: &str) {
    msg.set_to(Some(Endpoint::parse(uri).unwrap()));
}

#[test]
fn wildcard_handler_invoked_exactly_once() {
    let router = test_router();
    let hits = Arc::new(AtomicUsize::new(0));
    let (done_tx, done_rx) = flume::unbounded();

    let hits2 = hits.clone();
    router
        .handle::<PlainMsg>("logical://apps/foo/*", move |_msg, _ctx| {
            hits2.fetch_add(1, Ordering::SeqCst);
            let _ = done_tx.send(());
        })
        .unwrap();

    let mut msg = Msg::plain();
    to(&mut msg, "logical://apps/foo/bar");
    router.send(msg).unwrap();

    done_rx.recv_timeout(WAIT).unwrap();
    // Give a second dispatch time to show up if one was wrongly enqueued.
    assert!(done_rx.recv_timeout(Duration::from_millis(100)).is_err());
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    router.stop();
}

#[test]
fn null_endpoint_is_discarded() {
    let router = test_router();
    let hits = Arc::new(AtomicUsize::new(0));

    let hits2 = hits.clone();
    let handler = Handler::default_handler(move |_msg, _ctx| {
        hits2.fetch_add(1, Ordering::SeqCst);
    });
    router
        .dispatcher()
        .add_logical(
            handler,
            Endpoint::parse("logical://*").unwrap(),
            true,
            false,
            None,
        )
        .unwrap();

    let mut msg = Msg::plain();
    to(&mut msg, "logical://null");
    assert!(!router.dispatcher().dispatch(msg));

    let mut msg = Msg::plain();
    to(&mut msg, "logical://null/sub");
    router.send(msg).unwrap();

    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(hits.load(Ordering::SeqCst), 0);
    router.stop();
}

#[test]
fn broadcast_reaches_every_matching_handler() {
    let router = test_router();
    let (done_tx, done_rx) = flume::unbounded();

    // Three targets sharing one route via a target group.
    let group = uuid::Uuid::new_v4();
    for worker in 0..3usize {
        let done_tx = done_tx.clone();
        let handler = Handler::for_type::<PlainMsg>(move |_msg, _ctx| {
            let _ = done_tx.send(worker);
        });
        let set = HandlerSet::new()
            .group(group)
            .logical(Endpoint::parse("logical://svc/worker").unwrap(), handler);
        router.add_target(set, &[]).unwrap();
    }

    let mut msg = Msg::plain();
    to(&mut msg, "logical://svc/worker");
    router.broadcast(msg).unwrap();

    let mut seen = [0usize; 3];
    for _ in 0..3 {
        seen[done_rx.recv_timeout(WAIT).unwrap()] += 1;
    }
    assert_eq!(seen, [1, 1, 1]);
    // No extra deliveries.
    assert!(done_rx.recv_timeout(Duration::from_millis(100)).is_err());
    router.stop();
}

#[test]
fn unicast_selects_routes_uniformly() {
    let router = test_router();
    let (seen_tx, seen_rx) = flume::unbounded();

    // Two distinct routes that both match the target.
    for (idx, ep) in ["logical://svc/worker", "logical://svc/*"].iter().enumerate() {
        let seen_tx = seen_tx.clone();
        router
            .handle::<PlainMsg>(ep, move |_msg, _ctx| {
                let _ = seen_tx.send(idx);
            })
            .unwrap();
    }

    const SENDS: usize = 400;
    for _ in 0..SENDS {
        let mut msg = Msg::plain();
        to(&mut msg, "logical://svc/worker");
        router.send(msg).unwrap();
    }

    let mut counts = [0usize; 2];
    for _ in 0..SENDS {
        let idx = seen_rx.recv_timeout(WAIT).unwrap();
        counts[idx] += 1;
    }

    // Uniform selection: ~200 each; 4-sigma bounds keep this stable.
    assert_eq!(counts[0] + counts[1], SENDS);
    assert!(
        (140..=260).contains(&counts[0]),
        "selection badly skewed: {counts:?}"
    );
    router.stop();
}

#[test]
fn physical_dispatch_prefers_typed_handler() {
    let router = test_router();
    let (seen_tx, seen_rx) = flume::unbounded();

    let typed_tx = seen_tx.clone();
    router
        .dispatcher()
        .add_physical(Handler::for_type::<PlainMsg>(move |_msg, _ctx| {
            let _ = typed_tx.send("typed");
        }))
        .unwrap();
    router
        .dispatcher()
        .add_physical(Handler::default_handler(move |_msg, _ctx| {
            let _ = seen_tx.send("default");
        }))
        .unwrap();

    // No target endpoint: local physical dispatch.
    router.send(Msg::plain()).unwrap();
    assert_eq!(seen_rx.recv_timeout(WAIT).unwrap(), "typed");
    router.stop();
}

#[test]
fn duplicate_physical_handler_rejected() {
    let router = test_router();
    router
        .dispatcher()
        .add_physical(Handler::for_type::<PlainMsg>(|_msg, _ctx| {}))
        .unwrap();

    let err = router
        .dispatcher()
        .add_physical(Handler::for_type::<PlainMsg>(|_msg, _ctx| {}))
        .unwrap_err();
    assert!(matches!(err, RouterError::Route(_)));
    router.stop();
}

#[test]
fn remove_target_stops_dispatch() {
    let router = test_router();
    let hits = Arc::new(AtomicUsize::new(0));
    let (done_tx, done_rx) = flume::unbounded();

    let hits2 = hits.clone();
    let target = router
        .handle::<PlainMsg>("logical://svc/gone", move |_msg, _ctx| {
            hits2.fetch_add(1, Ordering::SeqCst);
            let _ = done_tx.send(());
        })
        .unwrap();

    let mut msg = Msg::plain();
    to(&mut msg, "logical://svc/gone");
    router.send(msg).unwrap();
    done_rx.recv_timeout(WAIT).unwrap();

    assert!(router.remove_target(target));
    assert!(!router.remove_target(target));

    let mut msg = Msg::plain();
    to(&mut msg, "logical://svc/gone");
    assert!(!router.dispatcher().dispatch(msg));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    router.stop();
}

#[test]
fn scoped_handlers_are_munged_or_skipped() {
    use meshway::InstanceMunger;

    let router = test_router();
    let (seen_tx, seen_rx) = flume::unbounded();

    let munged_tx = seen_tx.clone();
    let set = HandlerSet::new()
        .logical(
            Endpoint::parse("logical://svc/workers").unwrap(),
            Handler::for_type::<PlainMsg>(move |_msg, _ctx| {
                let _ = munged_tx.send("munged");
            })
            .with_scope("instance"),
        )
        .logical(
            Endpoint::parse("logical://svc/orphan").unwrap(),
            Handler::for_type::<PlainMsg>(move |_msg, _ctx| {
                let _ = seen_tx.send("skipped");
            })
            .with_scope("nobody-serves-this"),
        );

    let munger = InstanceMunger::new("instance", "w3");
    router
        .add_target(set, &[&munger as &dyn meshway::EndpointMunger])
        .unwrap();

    // The munged handler answers at the rewritten endpoint only.
    let mut msg = Msg::plain();
    to(&mut msg, "logical://svc/workers/w3");
    router.send(msg).unwrap();
    assert_eq!(seen_rx.recv_timeout(WAIT).unwrap(), "munged");

    let mut msg = Msg::plain();
    to(&mut msg, "logical://svc/workers");
    assert!(!router.dispatcher().dispatch(msg));

    // The handler whose scope had no munger was never registered.
    let mut msg = Msg::plain();
    to(&mut msg, "logical://svc/orphan");
    assert!(!router.dispatcher().dispatch(msg));
    assert!(seen_rx.recv_timeout(Duration::from_millis(100)).is_err());

    router.stop();
}

#[test]
fn abstract_endpoints_resolve_through_the_router_map() {
    let settings = RouterSettings::default()
        .with_worker_threads(2)
        .with_abstract_binding("billing", "logical://svc/billing");
    let router = MsgRouter::new("physical://localhost/test", settings).unwrap();
    router.start();

    let (seen_tx, seen_rx) = flume::unbounded();
    router
        .handle::<PlainMsg>("abstract://billing", move |_msg, _ctx| {
            let _ = seen_tx.send(());
        })
        .unwrap();

    let mut msg = Msg::plain();
    msg.set_to(Some(router.parse_endpoint("abstract://billing").unwrap()));
    router.send(msg).unwrap();
    seen_rx.recv_timeout(WAIT).unwrap();

    // The binding resolved to the configured logical endpoint.
    assert_eq!(
        router.parse_endpoint("abstract://billing").unwrap().to_string(),
        "logical://svc/billing"
    );

    // Unmapped abstract names degrade to plain logical endpoints, both on
    // the router and for bare parses (no map installed here).
    assert_eq!(
        router.parse_endpoint("abstract://unmapped").unwrap().to_string(),
        "logical://unmapped"
    );
    assert_eq!(
        Endpoint::parse("abstract://unmapped").unwrap().to_string(),
        "logical://unmapped"
    );

    router.stop();
}

#[test]
fn abstract_maps_are_private_per_router() {
    let first = MsgRouter::new(
        "physical://localhost/first",
        RouterSettings::default()
            .with_abstract_binding("billing", "logical://svc/billing"),
    )
    .unwrap();
    let second = MsgRouter::new(
        "physical://localhost/second",
        RouterSettings::default()
            .with_abstract_binding("billing", "logical://svc/billing-shadow"),
    )
    .unwrap();

    // Neither router's bindings leak into the other.
    assert_eq!(
        first.parse_endpoint("abstract://billing").unwrap().to_string(),
        "logical://svc/billing"
    );
    assert_eq!(
        second.parse_endpoint("abstract://billing").unwrap().to_string(),
        "logical://svc/billing-shadow"
    );
    assert_eq!(first.abstract_map().len(), 1);
}

#[test]
fn handler_endpoints_respect_the_configured_depth() {
    let router = MsgRouter::new(
        "physical://localhost/a",
        RouterSettings::default().with_max_physical_depth(2),
    )
    .unwrap();
    router.start();

    // Deeper than the router's own limit, though the default limit would
    // have accepted it.
    assert!(Endpoint::parse("physical://localhost/a/b/c").is_ok());
    assert!(router.parse_endpoint("physical://localhost/a/b/c").is_err());
    assert!(router
        .handle::<PlainMsg>("physical://localhost/a/b/c", |_msg, _ctx| {})
        .is_err());

    assert!(router.parse_endpoint("physical://localhost/a/b").is_ok());

    router.stop();
}

#[test]
fn clear_drops_every_registration() {
    let router = test_router();
    router
        .handle::<PlainMsg>("logical://svc/a", |_msg, _ctx| {})
        .unwrap();
    router
        .dispatcher()
        .add_physical(Handler::for_type::<PlainMsg>(|_msg, _ctx| {}))
        .unwrap();

    let before = router.dispatcher().logical_endpoint_set_id();
    router.dispatcher().clear();
    assert_ne!(router.dispatcher().logical_endpoint_set_id(), before);

    let mut msg = Msg::plain();
    to(&mut msg, "logical://svc/a");
    assert!(!router.dispatcher().dispatch(msg));
    assert!(!router.dispatcher().dispatch(Msg::plain()));

    router.stop();
}

#[test]
fn priority_messages_are_dispatched() {
    let router = test_router();
    let (done_tx, done_rx) = flume::unbounded();

    router
        .handle::<PlainMsg>("logical://svc/prio", move |msg, _ctx| {
            let _ = done_tx.send(msg.has_flag(flags::PRIORITY));
        })
        .unwrap();

    let mut msg = Msg::plain();
    to(&mut msg, "logical://svc/prio");
    msg.set_flag(flags::PRIORITY);
    router.send(msg).unwrap();

    assert!(done_rx.recv_timeout(WAIT).unwrap());
    router.stop();
}
