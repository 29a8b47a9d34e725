//! Subscriber setup driven by the `logging` config section.

use parley_core::config::LoggingConfig;
use tracing_subscriber::EnvFilter;

/// Build the filter: `RUST_LOG` wins, then the configured level and
/// per-crate filters, then `info` (or `debug` with `-v`).
pub fn build_filter(config: &LoggingConfig, verbose: bool) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }

    let level = match (&config.level, verbose) {
        (_, true) => "debug",
        (Some(level), false) => level.as_str(),
        (None, false) => "info",
    };

    let mut directives = vec![level.to_string()];
    directives.extend(config.filters.iter().cloned());

    EnvFilter::try_new(directives.join(",")).unwrap_or_else(|_| EnvFilter::new(level))
}

pub fn init(config: &LoggingConfig, verbose: bool) {
    let filter = build_filter(config, verbose);
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match (config.format.as_str(), config.output.as_str()) {
        ("json", "stdout") => builder.json().with_writer(std::io::stdout).init(),
        ("json", _) => builder.json().with_writer(std::io::stderr).init(),
        (_, "stdout") => builder.with_writer(std::io::stdout).init(),
        _ => builder.with_writer(std::io::stderr).init(),
    }
}
