use tracing_subscriber::EnvFilter;

/// Install the process-wide subscriber. `verbose` raises the default level to
/// debug and `debug` to trace; a `RUST_LOG` filter overrides both. Events go
/// to stderr so stdout stays clean for command output.
pub fn init(verbose: bool, debug: bool) {
    let default = if debug {
        "trace"
    } else if verbose {
        "debug"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
