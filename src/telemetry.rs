//! Tracing initialisation for embedders of the release engine.
//!
//! The engine itself only emits `tracing` events; hosts decide where they
//! go. [`init_tracing`] installs a global subscriber with an `EnvFilter`
//! (honouring `RUST_LOG`) and an optional JSON layer for log pipelines.
//! Calling it more than once is harmless — only the first call takes effect.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global tracing subscriber.
///
/// `default_filter` applies when `RUST_LOG` is unset (e.g. `"slipway=debug"`).
/// With `json` set, events are emitted as newline-delimited JSON.
pub fn init_tracing(default_filter: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter.to_string()));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .try_init()
            .ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_tracing_is_idempotent() {
        init_tracing("info", false);
        // Second call must not panic even though the global subscriber is set.
        init_tracing("debug", true);
    }
}
