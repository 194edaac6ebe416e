pub mod config;
pub mod taxonomy;
pub mod pipeline;

use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber.
/// `RUST_LOG` wins; otherwise falls back to `config::default_log_filter()`.
/// Only the binary calls this, the library never installs a subscriber itself.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();

    tracing::info!("{} starting v{}", config::APP_NAME, config::APP_VERSION);
}
