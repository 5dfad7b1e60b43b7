use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "SHOPLIST_LOG";

/// Filter directive for a `-v` count when `SHOPLIST_LOG` is unset.
pub fn default_directive(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    }
}

fn env_filter(verbose: u8) -> EnvFilter {
    match std::env::var(LOG_ENV) {
        Ok(raw) if !raw.trim().is_empty() => EnvFilter::try_new(raw.trim())
            .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose))),
        _ => EnvFilter::new(default_directive(verbose)),
    }
}

/// Installs the stderr subscriber. Safe to call more than once; later calls
/// keep the first subscriber.
pub fn init(verbose: u8) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter(verbose))
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
