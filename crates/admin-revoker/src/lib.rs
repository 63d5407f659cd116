//! The Admin Revoker: an operator tool for one-off and batch certificate
//! revocation and private-key blocking.

pub mod cli;
pub mod config;
pub mod drivers;

pub use cli::run;

/// Installs the `tracing` subscriber this binary logs through, reading
/// the filter from `RUST_LOG` (default `info`).
pub fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
