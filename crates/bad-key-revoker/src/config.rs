//! Configuration for the bad-key-revoker binary.

use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,

    #[serde(default = "default_db_max_connections")]
    pub database_max_connections: u32,

    /// `http://host:port` endpoint of the Registration Authority.
    pub ra_address: String,

    /// Revocations from a single blocked key beyond this count cause the
    /// process to exit loudly instead of proceeding — a key this widely
    /// shared is almost certainly a sign something upstream is wrong.
    #[serde(default = "default_max_revocations")]
    pub max_revocations: i64,

    /// Page size used when streaming serials matching a blocked key.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    pub smtp: SmtpSection,

    #[serde(default = "default_max_serials_listed")]
    pub max_serials_listed: usize,

    #[serde(default = "default_backoff_base_millis")]
    pub backoff_base_millis: u64,

    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,

    #[serde(default = "default_backoff_max_secs")]
    pub backoff_max_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmtpSection {
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
    pub from_address: String,
}

const fn default_db_max_connections() -> u32 {
    10
}

const fn default_max_revocations() -> i64 {
    10_000
}

const fn default_batch_size() -> u32 {
    1000
}

const fn default_max_serials_listed() -> usize {
    revoker_notify::DEFAULT_MAX_SERIALS_LISTED
}

const fn default_backoff_base_millis() -> u64 {
    500
}

const fn default_backoff_factor() -> f64 {
    2.0
}

const fn default_backoff_max_secs() -> u64 {
    60
}

const fn default_smtp_port() -> u16 {
    587
}

impl Config {
    /// # Errors
    /// Returns an error if the file can't be read or doesn't parse.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("reading config file {}: {e}", path.display()))?;
        let config: Self = toml::from_str(&contents)
            .map_err(|e| anyhow::anyhow!("parsing config file {}: {e}", path.display()))?;
        Ok(config)
    }

    #[must_use]
    pub fn backoff(&self) -> crate::backoff::Backoff {
        crate::backoff::Backoff::new(
            Duration::from_millis(self.backoff_base_millis),
            self.backoff_factor,
            Duration::from_secs(self.backoff_max_secs),
        )
    }

    /// Resolves the SMTP password, falling back to `SMTP_PASSWORD`.
    pub fn smtp_password(&self) -> anyhow::Result<String> {
        self.smtp
            .password
            .clone()
            .or_else(|| std::env::var("SMTP_PASSWORD").ok())
            .ok_or_else(|| anyhow::anyhow!("no SMTP password in config or SMTP_PASSWORD"))
    }
}
