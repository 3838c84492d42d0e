use tracing_subscriber::{EnvFilter, prelude::*};

/// Logs go to stderr, so `parse-proxy --json` output stays clean.
pub(crate) fn init_tracing_registry() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_writer(std::io::stderr),
        )
        .with(EnvFilter::from_default_env())
        .try_init();
}
