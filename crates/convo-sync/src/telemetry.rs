use tracing_subscriber::{fmt, EnvFilter};

/// Crate logs at info, dependencies (reqwest, r2d2) at warn.
const DEFAULT_FILTER: &str = "convo_sync=info,warn";

/// Installs the global fmt subscriber, filtered by `RUST_LOG` when it parses.
///
/// Returns false when a subscriber was already installed, e.g. by an
/// embedding application, and leaves that one in place.
pub fn init_tracing() -> bool {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .with_target(true)
        .with_level(true)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber).is_ok()
}
