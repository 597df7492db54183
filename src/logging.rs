//! Tracing setup: `RUST_LOG`-driven env filter, defaulting to `info` for
//! this crate and `warn` for dependencies, with structured JSON output
//! under debug mode so events stay greppable in a log aggregator instead of
//! the human-oriented default formatter.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub fn init(debug: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if debug { "tokentap=debug,warn" } else { "tokentap=info,warn" })
    });

    let registry = tracing_subscriber::registry().with(filter);

    if debug {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(false).compact())
            .init();
    }
}
