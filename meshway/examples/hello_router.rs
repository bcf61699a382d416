//! Minimal router demo: register a wildcard handler and send to it.
//!
//! Run with: `cargo run --example hello_router`

use std::time::Duration;

use meshway::prelude::*;

fn main() -> Result<(), RouterError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let router = MsgRouter::new("physical://localhost/demo", RouterSettings::default())?;
    router.start();

    let (seen_tx, seen_rx) = flume::unbounded();
    router.handle::<PlainMsg>("logical://demo/greetings/*", move |msg, _ctx| {
        let to = msg.to_ep().map(ToString::to_string).unwrap_or_default();
        let _ = seen_tx.send(to);
    })?;

    for name in ["alice", "bob", "carol"] {
        let mut msg = Msg::plain();
        msg.set_to(Some(Endpoint::parse(&format!(
            "logical://demo/greetings/{name}"
        ))?));
        router.send(msg)?;
    }

    for _ in 0..3 {
        let to = seen_rx
            .recv_timeout(Duration::from_secs(1))
            .expect("handler did not run");
        println!("delivered: {to}");
    }

    router.stop();
    Ok(())
}
