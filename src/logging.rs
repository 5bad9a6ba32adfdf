//! Stderr logging for the CLI binaries.

use std::io::{self, IsTerminal};

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

pub const LOG_ENV: &str = "GEMLAB_LOG";
const DEFAULT_FILTER: &str = "warn";
const VERBOSE_FILTER: &str = "gemlab=debug,info";

/// Filter directive for the given flags; `None` means logging stays off.
pub fn filter_directive(verbose: bool, quiet: bool) -> Option<String> {
    if quiet {
        return None;
    }
    if verbose {
        return Some(VERBOSE_FILTER.to_string());
    }
    Some(
        std::env::var(LOG_ENV)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_FILTER.to_string()),
    )
}

/// Installs the global subscriber. Calling it twice is a no-op.
pub fn init(verbose: bool, quiet: bool) {
    let Some(directive) = filter_directive(verbose, quiet) else {
        return;
    };
    let filter = EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(io::stderr)
                .with_ansi(io::stderr().is_terminal())
                .with_target(false),
        )
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quiet_wins_over_verbose() {
        assert_eq!(filter_directive(true, true), None);
    }

    #[test]
    fn verbose_enables_crate_debug() {
        assert_eq!(filter_directive(true, false).as_deref(), Some(VERBOSE_FILTER));
    }
}
