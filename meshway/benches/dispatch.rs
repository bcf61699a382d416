//! Dispatch hot-path benchmarks: route matching and task fan-out.

use std::time::Duration;

use criterion::{criterion_group, criterion_main, Criterion};

use meshway::prelude::*;
use meshway::flags;

fn bench_router(routes: usize) -> MsgRouter {
    let router = MsgRouter::new(
        "physical://localhost/bench",
        RouterSettings::default().with_worker_threads(2),
    )
    .unwrap();
    router.start();

    for i in 0..routes {
        router
            .handle::<PlainMsg>(&format!("logical://bench/svc{i}/*"), |_msg, _ctx| {})
            .unwrap();
    }
    router
}

fn unicast_dispatch(c: &mut Criterion) {
    let router = bench_router(16);
    let target = Endpoint::parse("logical://bench/svc7/job").unwrap();

    c.bench_function("unicast_dispatch_16_routes", |b| {
        b.iter(|| {
            let mut msg = Msg::plain();
            msg.set_to(Some(target.clone()));
            router.dispatcher().dispatch(msg)
        });
    });
    router.stop();
}

fn broadcast_dispatch(c: &mut Criterion) {
    let router = bench_router(16);
    let target = Endpoint::parse("logical://bench/svc3/job").unwrap();

    c.bench_function("broadcast_dispatch", |b| {
        b.iter(|| {
            let mut msg = Msg::plain();
            msg.set_to(Some(target.clone()));
            msg.set_flag(flags::BROADCAST);
            router.dispatcher().dispatch(msg)
        });
    });
    router.stop();
}

fn endpoint_matching(c: &mut Criterion) {
    let wild = Endpoint::parse("logical://apps/billing/*").unwrap();
    let target = Endpoint::parse("logical://apps/billing/eu/invoices").unwrap();

    c.bench_function("logical_match", |b| {
        b.iter(|| wild.logical_match(&target));
    });

    c.bench_function("endpoint_parse", |b| {
        b.iter(|| Endpoint::parse("physical://root.example:9100/hub/leaf?c=tcp").unwrap());
    });
}

fn criterion_config() -> Criterion {
    Criterion::default()
        .measurement_time(Duration::from_secs(3))
        .warm_up_time(Duration::from_millis(500))
}

criterion_group! {
    name = benches;
    config = criterion_config();
    targets = unicast_dispatch, broadcast_dispatch, endpoint_matching
}
criterion_main!(benches);
