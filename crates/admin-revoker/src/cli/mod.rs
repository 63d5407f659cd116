pub mod args;

use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use revoker_core::{RevocationReason, Serial};
use revoker_ra::GrpcRegistrationAuthorityClient;
use revoker_storage::MySqlStorageGateway;
use tonic::transport::Channel;

use crate::config::Config;
use crate::drivers;
use args::{Cli, Commands};

/// Parses argv, loads config, and dispatches to the right driver.
///
/// # Errors
/// Returns an error on a bad config file, a collaborator that can't be
/// reached, or a driver failure.
pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    if matches!(cli.command, Commands::ListReasons) {
        print_reasons();
        return Ok(());
    }

    let config = Config::load(&cli.config)?;
    let storage = connect_storage(&config).await?;
    let ra = connect_ra(&config).await?;
    let operator = revoker_engine::operator_identity();

    match cli.command {
        Commands::ListReasons => unreachable!("handled above"),
        Commands::SerialRevoke(args) => {
            let serial = Serial::parse(args.serial)?;
            let reason = reason_from_code(args.reason)?;
            drivers::revoke_by_serial(&ra, &storage, serial, reason, false, cli.dry_run).await?;
            println!("revoked");
        }
        Commands::BatchedSerialRevoke(args) => {
            let reason = reason_from_code(args.reason)?;
            let serials = read_serials_file(&args.serials_file)?;
            let outcome = drivers::revoke_batch(
                &ra,
                &storage,
                serials,
                reason,
                false,
                args.parallelism,
                cli.dry_run,
            )
            .await;
            println!("succeeded: {}, failed: {}", outcome.succeeded, outcome.failed);
        }
        Commands::IncidentTableRevoke(args) => {
            let reason = reason_from_code(args.reason)?;
            let outcome = drivers::revoke_incident_table(
                &ra,
                &storage,
                args.incident_table,
                reason,
                false,
                args.parallelism,
                cli.dry_run,
            )
            .await?;
            println!("succeeded: {}, failed: {}", outcome.succeeded, outcome.failed);
        }
        Commands::RegRevoke(args) => {
            let reason = reason_from_code(args.reason)?;
            let outcome =
                drivers::revoke_by_registration(&ra, &storage, args.reg_id, reason, false, cli.dry_run)
                    .await?;
            println!("succeeded: {}, failed: {}", outcome.succeeded, outcome.failed);
        }
        Commands::PrivateKeyBlock(args) => {
            let fp = drivers::block_by_private_key(
                &storage,
                &args.key,
                &operator,
                &args.comment,
                cli.dry_run,
            )
            .await?;
            println!("blocked key {fp}");
        }
        Commands::PrivateKeyRevoke(args) => {
            let (outcome, fp) = drivers::revoke_by_private_key(
                &ra,
                &storage,
                &args.key,
                args.max_revocations,
                cli.dry_run,
            )
            .await?;
            println!(
                "key {fp}: revoked {}, already revoked {}. key is NOT blocked; run private-key-block to block it",
                outcome.revoked, outcome.already_revoked
            );
        }
        Commands::MalformedRevoke(args) => {
            let serial = Serial::parse(args.serial)?;
            let reason = reason_from_code(args.reason)?;
            drivers::revoke_malformed(&ra, serial, reason, cli.dry_run).await?;
            println!("revoked");
        }
    }

    Ok(())
}

fn print_reasons() {
    for reason in RevocationReason::ALL {
        println!("{:>2}  {reason}", reason.code());
    }
}

fn reason_from_code(code: i64) -> Result<RevocationReason> {
    RevocationReason::try_from(code).map_err(Into::into)
}

fn read_serials_file(path: &Path) -> Result<Vec<Serial>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("reading serials file {}", path.display()))?;
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| Serial::parse(line).map_err(Into::into))
        .collect()
}

async fn connect_storage(config: &Config) -> Result<MySqlStorageGateway> {
    MySqlStorageGateway::connect(
        &config.database_url,
        config.database_max_connections,
        std::time::Duration::from_secs(30),
    )
    .await
    .map_err(Into::into)
}

async fn connect_ra(config: &Config) -> Result<GrpcRegistrationAuthorityClient> {
    let channel = Channel::from_shared(config.ra_address.clone())
        .context("invalid RA address")?
        .connect()
        .await
        .context("connecting to Registration Authority")?;
    Ok(GrpcRegistrationAuthorityClient::new(channel))
}
