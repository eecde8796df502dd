use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

fn default_directive(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "civic_ingest=info",
        1 => "civic_ingest=debug",
        _ => "civic_ingest=trace",
    }
}

/// Logs go to stderr; stdout carries only the command report. `RUST_LOG`
/// overrides the `-v` level.
pub fn init(verbosity: u8) {
    let _ = tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_directive(verbosity))),
        )
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .try_init();
}
