//! Tracing initialization for embedding binaries.
//!
//! The engine itself only emits `tracing` events; installing a subscriber
//! is the host's choice. [`init`] wires up the conventional setup used by
//! the bundled CLI: fmt output with an env-filter, overridable through
//! `RUST_LOG`.

use tracing_subscriber::EnvFilter;

/// Default filter directive when `RUST_LOG` is not set.
pub const DEFAULT_FILTER: &str = "seqloom=info";

/// Install the global fmt subscriber.
///
/// With `disabled` set, no subscriber is installed and all engine events
/// are dropped. Calling this twice is harmless; the second installation
/// attempt is ignored.
pub fn init(disabled: bool) {
    if disabled {
        return;
    }
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
