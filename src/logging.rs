//! Tracing subscriber setup for the CLI

use tracing_subscriber::{fmt, EnvFilter};

/// Filter directives are read from this variable, e.g. `cst_runner=debug`
pub const LOG_ENV: &str = "CST_RUNNER_LOG";

/// Directive used when `CST_RUNNER_LOG` is unset or unparseable.
pub fn default_directive(verbose: bool) -> &'static str {
    if verbose {
        "cst_runner=debug,info"
    } else {
        "info"
    }
}

pub fn build_filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)))
}

/// Install the global subscriber. Logs go to stderr so stdout can carry the
/// JSON summary. Calling this twice is harmless.
pub fn init(verbose: bool) {
    let _ = fmt()
        .with_env_filter(build_filter(verbose))
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
