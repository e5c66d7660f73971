//! Subscriber bootstrap for binaries embedding lectern.

use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Environment variable overriding the verbosity-derived filter, using
/// `EnvFilter` directives (`LECTERN_LOG=download=debug,info`).
pub const LOG_ENV: &str = "LECTERN_LOG";

pub fn level(verbosity: u8) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

/// Install a formatting subscriber. Returns `false` if one was already
/// installed.
pub fn init(verbosity: u8) -> bool {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::builder().with_default_directive(level(verbosity).into()).with_env_var(LOG_ENV).from_env_lossy())
        .try_init()
        .is_ok()
}
