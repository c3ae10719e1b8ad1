//! Logging setup
//!
//! Every Convene process logs through `tracing` with structured fields
//! (`invitation_id`, `guest_id`, `topic`, ...). [`init_logging`] installs the
//! subscriber once at startup.
//!
//! `LOG_FORMAT=json` switches to flattened JSON lines for log shipping; the
//! default is compact text. `RUST_LOG` filters as usual and defaults to
//! `info`, e.g. `RUST_LOG=cv_coordinator=debug,cv_log=info`.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize logging for the named service.
///
/// Safe to call more than once; only the first call installs a subscriber.
pub fn init_logging(service_name: &str) {
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // Exactly one of the two layers is present
    let json_layer = json.then(|| {
        fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_file(true)
            .with_line_number(true)
    });
    let text_layer = (!json).then(|| fmt::layer().with_target(true).with_thread_ids(false));

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .try_init()
        .is_ok();

    if installed {
        tracing::debug!(service = %service_name, json, "Logging initialized");
    }
}
