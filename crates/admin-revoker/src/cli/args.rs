//! Command-line argument definitions.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Operator tool for certificate revocation and private-key blocking.
#[derive(Parser, Debug)]
#[command(name = "admin-revoker")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the TOML config file. Required: there is no default.
    #[arg(short, long)]
    pub config: PathBuf,

    /// Print what would happen without making any change. Defaults to
    /// true: an operator must opt into the real, irreversible action
    /// rather than opt out of a preview.
    #[arg(long, global = true, default_value_t = true, action = clap::ArgAction::Set)]
    pub dry_run: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List every revocation reason code this tool accepts.
    ListReasons,

    /// Revoke a single certificate by serial.
    SerialRevoke(SerialRevokeArgs),

    /// Revoke every serial listed in a file, one per line.
    BatchedSerialRevoke(BatchedSerialRevokeArgs),

    /// Revoke every serial in a dynamically-named incident table.
    IncidentTableRevoke(IncidentTableRevokeArgs),

    /// Revoke every unexpired certificate owned by a registration.
    RegRevoke(RegRevokeArgs),

    /// Block a private key without revoking anything yet.
    PrivateKeyBlock(PrivateKeyArgs),

    /// Revoke every certificate matching a private key. Does not block the
    /// key — follow up with `private-key-block`.
    PrivateKeyRevoke(PrivateKeyRevokeArgs),

    /// Revoke a certificate that is too malformed for the RA to parse.
    MalformedRevoke(MalformedRevokeArgs),
}

#[derive(Args, Debug)]
pub struct SerialRevokeArgs {
    /// 36-character lowercase hex serial.
    pub serial: String,

    /// Revocation reason code (see `list-reasons`).
    pub reason: i64,
}

#[derive(Args, Debug)]
pub struct BatchedSerialRevokeArgs {
    /// Path to a file of one serial per line.
    pub serials_file: PathBuf,

    pub reason: i64,

    /// How many revocations to run concurrently. Must be at least 1.
    #[arg(value_parser = clap::value_parser!(usize).range(1..))]
    pub parallelism: usize,
}

#[derive(Args, Debug)]
pub struct IncidentTableRevokeArgs {
    /// Name of the `incident_*` table to drain.
    pub incident_table: String,

    pub reason: i64,

    /// How many revocations to run concurrently. Must be at least 1.
    #[arg(value_parser = clap::value_parser!(usize).range(1..))]
    pub parallelism: usize,
}

#[derive(Args, Debug)]
pub struct RegRevokeArgs {
    pub reg_id: i64,

    pub reason: i64,
}

#[derive(Args, Debug)]
pub struct PrivateKeyArgs {
    /// Path to the PEM-encoded private key.
    #[arg(long)]
    pub key: PathBuf,

    /// Free-text reason recorded on the blocked-key row.
    #[arg(long)]
    pub comment: String,
}

#[derive(Args, Debug)]
pub struct PrivateKeyRevokeArgs {
    #[arg(long)]
    pub key: PathBuf,

    /// Revoke at most this many certificates, then refuse to continue.
    /// Protects against pointing this at the wrong key and revoking the
    /// whole fleet by accident.
    #[arg(long, default_value_t = 10_000)]
    pub max_revocations: i64,
}

#[derive(Args, Debug)]
pub struct MalformedRevokeArgs {
    pub serial: String,

    #[arg(long)]
    pub reason: i64,

    /// Historical compatibility argument, kept but unused by this driver.
    #[arg(default_value = "")]
    pub reg_id_hint: String,
}
