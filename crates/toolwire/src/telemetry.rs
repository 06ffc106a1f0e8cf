//! Process-wide tracing setup.

use tracing::Span;
use tracing_subscriber::EnvFilter;

/// Directive used when `RUST_LOG` is unset or invalid.
const DEFAULT_FILTER: &str = "warn";

/// Installs the global subscriber, writing to stderr and filtered by
/// `RUST_LOG`.
///
/// Only the first call has an effect; there is nothing to tear down.
pub fn init() {
    let result = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(std::io::stderr)
        .try_init();
    if result.is_err() {
        debug!("tracing subscriber already installed");
    }
}

/// Builds the filter from `RUST_LOG` as currently set.
pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Returns the root span of one workflow run.
pub fn workflow_span(app_name: &str) -> Span {
    info_span!("workflow", app = %app_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init();
        init();
        let span = workflow_span("Weather-Agent");
        let _enter = span.enter();
        info!("inside the workflow span");
    }
}
