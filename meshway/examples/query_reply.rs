//! Request/reply over a session: the handler answers through its request
//! context, the caller blocks on `query`.
//!
//! Run with: `cargo run --example query_reply`

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use meshway::prelude::*;
use meshway::TextMsg;

fn main() -> Result<(), RouterError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let router = MsgRouter::new("physical://localhost/demo", RouterSettings::default())?;
    router.start();

    router.handle::<TextMsg>("logical://demo/time", |_msg, mut ctx| {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        if let Err(err) = ctx.reply(Msg::from_payload(TextMsg::new(format!("epoch={now}")))) {
            eprintln!("reply failed: {err}");
        }
    })?;

    let mut request = Msg::from_payload(TextMsg::new("what time is it?"));
    request.set_to(Some(Endpoint::parse("logical://demo/time")?));

    let reply = router.query(request, Duration::from_secs(2))?;
    let answer = reply
        .payload::<TextMsg>()
        .map(|t| t.text.as_str())
        .unwrap_or("<not text>");
    println!("got reply: {answer} (session={})", reply.session_id());

    router.stop();
    Ok(())
}
