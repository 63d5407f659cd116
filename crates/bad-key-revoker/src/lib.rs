//! The Bad-Key Revoker: a continuously running worker that revokes every
//! certificate sharing a newly-blocked private key and notifies the
//! owners.

pub mod backoff;
pub mod config;
pub mod worker;

use anyhow::Context;
use revoker_ra::GrpcRegistrationAuthorityClient;
use revoker_storage::MySqlStorageGateway;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use worker::{Metrics, Tick};

pub fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Runs the main loop until `cancel` fires: repeatedly process one
/// blocked-key row, backing off between idle ticks and resetting the
/// backoff after real work.
///
/// This loop never exits on its own. Every error, transient or not, is
/// logged, counted, and retried on the next tick after backing off — an
/// `Internal` index-inconsistency error still leaves the offending row
/// unchecked for a human to investigate, but does not take the whole
/// worker down.
///
/// # Errors
/// Only returns an error if `cancel` is cancelled mid-shutdown; otherwise
/// runs until cancelled.
pub async fn run(config: config::Config, cancel: CancellationToken) -> anyhow::Result<()> {
    let storage = MySqlStorageGateway::connect(
        &config.database_url,
        config.database_max_connections,
        std::time::Duration::from_secs(30),
    )
    .await
    .context("connecting to storage")?;

    let channel = tonic::transport::Channel::from_shared(config.ra_address.clone())
        .context("invalid RA address")?
        .connect()
        .await
        .context("connecting to Registration Authority")?;
    let ra = GrpcRegistrationAuthorityClient::new(channel);

    let smtp_config = revoker_notify::SmtpConfig {
        host: config.smtp.host.clone(),
        port: config.smtp.port,
        username: config.smtp.username.clone(),
        password: config.smtp_password()?,
        from_address: config.smtp.from_address.clone(),
    };
    let notifier = revoker_notify::NotificationDispatcher::new(&smtp_config, config.max_serials_listed)?;

    let metrics = Metrics::default();
    let mut backoff = config.backoff();

    loop {
        if cancel.is_cancelled() {
            info!("shutting down");
            return Ok(());
        }

        let tick = worker::process_one_blocked_key(
            &storage,
            &ra,
            &notifier,
            &metrics,
            config.max_revocations,
            config.batch_size,
            &cancel,
        )
        .await;

        match tick {
            Ok(Tick::Processed) => backoff.reset(),
            Ok(Tick::Idle) => {
                tokio::time::sleep(backoff.next_delay()).await;
            }
            Err(e) => {
                metrics.revoke_errors.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                error!(error = %e, "tick failed, backing off");
                tokio::time::sleep(backoff.next_delay()).await;
            }
        }
    }
}
