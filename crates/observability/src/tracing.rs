//! Tracing/logging initialization.

use tracing_subscriber::EnvFilter;

/// Default filter when `RUST_LOG` is unset or unparsable.
pub const DEFAULT_FILTER: &str = "info";

/// Filter from a raw `RUST_LOG` value, falling back to [`DEFAULT_FILTER`].
fn filter_from(raw: Option<&str>) -> EnvFilter {
    raw.map(str::trim)
        .filter(|r| !r.is_empty())
        .and_then(|r| EnvFilter::try_new(r).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
}

/// JSON lines with system-time timestamps, filtered by `RUST_LOG`.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init() {
    let raw = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let filter = filter_from(raw.as_deref());
    let effective = filter.to_string();

    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false)
        .with_current_span(true)
        .try_init()
        .is_ok();

    if installed {
        ::tracing::info!(filter = %effective, "tracing initialised");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_twice_is_harmless() {
        init();
        init();
    }

    #[test]
    fn effective_filter_reflects_rust_log() {
        let from_env = filter_from(Some("warn,einvoice_infra=debug")).to_string();
        assert!(from_env.contains("einvoice_infra=debug"), "{from_env}");
        assert!(from_env.contains("warn"), "{from_env}");

        let fallback = EnvFilter::new(DEFAULT_FILTER).to_string();
        assert_eq!(filter_from(None).to_string(), fallback);
        assert_eq!(filter_from(Some("  ")).to_string(), fallback);
        assert_eq!(filter_from(Some("einvoice=notalevel")).to_string(), fallback);
    }
}
