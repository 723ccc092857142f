use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize logging to stderr; stdout is reserved for command output.
///
/// `RUST_LOG` wins when set. Otherwise the level follows `verbosity`:
/// 0 = warn, 1 = debug for this crate, 2+ = trace for this crate.
pub fn init(verbosity: u8, json: bool) {
    let default_filter = match verbosity {
        0 => "warn",
        1 => "warn,zai_cli=debug,zai=debug",
        _ => "info,zai_cli=trace,zai=trace",
    };
    let filter_layer =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let registry = tracing_subscriber::registry().with(filter_layer);
    if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_line_number(verbosity > 1)
                    .with_writer(std::io::stderr)
                    .compact(),
            )
            .init();
    }
}
