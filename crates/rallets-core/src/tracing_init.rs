//! Shared tracing/logging initialization.

use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

/// Crates whose log level follows the `--verbose` flag.
const LOG_TARGETS: &[&str] = &["rallets", "rallets_cli", "rallets_core", "rallets_crypto"];

/// Build the default `RUST_LOG` directive for the given verbosity.
pub fn default_filter(verbose: bool) -> String {
    let level = if verbose { "debug" } else { "warn" };
    LOG_TARGETS
        .iter()
        .map(|target| format!("{target}={level}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Build the filter: `RUST_LOG` when set and valid, otherwise `default_filter`.
fn env_filter(default_filter: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter))
}

/// Initialise the global tracing subscriber.
///
/// `default_filter` is normally [`default_filter`]`(verbose)`; `RUST_LOG`
/// overrides it. With `log_json` every event is one JSON object per line.
/// Events go to stderr, leaving stdout to roster listings and notices.
pub fn init_tracing(default_filter: &str, log_json: bool) {
    let fmt_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
    let fmt_layer = if log_json {
        fmt_layer.json().boxed()
    } else {
        fmt_layer.boxed()
    };
    tracing_subscriber::registry()
        .with(env_filter(default_filter))
        .with(fmt_layer)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_filters_are_valid_directives() {
        for verbose in [false, true] {
            let filter = default_filter(verbose);
            assert!(EnvFilter::try_new(&filter).is_ok(), "{filter}");
        }
    }

    #[test]
    fn quiet_filter_is_warn() {
        let filter = default_filter(false);
        assert!(filter.contains("rallets_cli=warn"));
        assert!(!filter.contains("debug"));
    }

    #[test]
    fn verbose_filter_is_debug_for_every_crate() {
        let filter = default_filter(true);
        for target in LOG_TARGETS {
            assert!(filter.contains(&format!("{target}=debug")), "{filter}");
        }
    }
}
