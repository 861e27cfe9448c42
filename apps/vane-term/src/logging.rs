//! Tracing/logging bootstrap for the terminal client.

use std::{env, io};

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "warn,vane_term=info,vane_http=info";

/// Initialize the global tracing subscriber, writing to stderr.
///
/// Precedence:
/// 1) `RUST_LOG`
/// 2) `VANE_TERM_LOG`
/// 3) `VANE_LOG`
/// 4) internal default filter
pub fn init() {
    let env_filter = filter_from_env();
    let _ = tracing_subscriber::fmt()
        .with_target(true)
        .with_writer(io::stderr)
        .with_env_filter(env_filter)
        .try_init();
}

fn filter_from_env() -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }

    for key in ["VANE_TERM_LOG", "VANE_LOG"] {
        if let Some(value) = env::var(key).ok().filter(|v| !v.trim().is_empty())
            && let Ok(filter) = EnvFilter::try_new(value)
        {
            return filter;
        }
    }

    EnvFilter::new(DEFAULT_FILTER)
}
