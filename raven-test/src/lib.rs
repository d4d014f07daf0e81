//! Shared test setup for the raven-spv workspace.

use std::sync::Once;

use tracing_error::ErrorLayer;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT: Once = Once::new();

/// Initialize a test: install a `tracing` subscriber honoring `RUST_LOG` and
/// the `color-eyre` panic and error report hooks.
///
/// Safe to call from every test; only the first call has any effect.
pub fn init() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_test_writer())
            .with(ErrorLayer::default())
            .init();

        color_eyre::install().expect("color-eyre installation is only attempted once");
    });
}
