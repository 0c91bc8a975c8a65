//! Logging setup for the command-line tools

use std::io::IsTerminal;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber, writing to stderr so stdout carries only model output.
///
/// `RUST_LOG` wins when set; otherwise `info`, or `debug` for this crate when `verbose`.
pub fn init(verbose: bool) {
    let default_filter = if verbose {
        "info,decoplan_llm=debug"
    } else {
        "info"
    };

    // A second call (e.g. from tests) keeps the first subscriber.
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_ansi(std::io::stderr().is_terminal())
        .try_init();
}
