//! Two routers linked in-process: a leaf forwards to its hub, the hub
//! dispatches and returns a receipt.
//!
//! Run with: `cargo run --example two_routers`

use std::time::Duration;

use meshway::flags;
use meshway::prelude::*;

fn main() -> Result<(), RouterError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let hub = MsgRouter::new("physical://demo", RouterSettings::default())?;
    let leaf = MsgRouter::new(
        "physical://demo/leaf",
        RouterSettings::default().with_dead_router_ttl(Duration::from_secs(2)),
    )?;
    hub.start();
    leaf.start();

    leaf.on_dead_router(|ep, _set_id| {
        eprintln!("peer went silent: {ep}");
    });

    let (hub_half, leaf_half) = InprocChannel::pair();
    hub.attach_channel(hub_half, false);
    leaf.attach_channel(leaf_half, true);

    let (seen_tx, seen_rx) = flume::unbounded();
    hub.handle::<PlainMsg>("logical://demo/work", move |msg, _ctx| {
        let _ = seen_tx.send(msg.msg_id());
    })?;

    // Give the advertisement handshake a moment.
    std::thread::sleep(Duration::from_millis(100));
    println!("leaf knows {} peer route(s)", leaf.physical_routes().len());

    let mut msg = Msg::plain();
    msg.set_to(Some(Endpoint::parse("logical://demo/work")?));
    msg.set_flag(flags::RECEIPT_REQUEST);
    leaf.send(msg)?;

    let msg_id = seen_rx
        .recv_timeout(Duration::from_secs(1))
        .expect("hub never dispatched");
    println!("hub dispatched message {msg_id}");

    // The hub's receipt clears the leaf's tracker.
    while leaf.outstanding_receipts() != 0 {
        std::thread::sleep(Duration::from_millis(10));
    }
    println!("receipt received; nothing outstanding");

    leaf.stop();
    hub.stop();
    Ok(())
}
