//! SMTP transport wrapper.

use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use crate::error::NotifyError;

/// SMTP connection settings. `password` is expected to already be loaded
/// from the environment or a secrets store by the caller, never read
/// from a config file on disk.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from_address: String,
}

/// Sends rendered notification emails over SMTP with STARTTLS.
pub struct Mailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl Mailer {
    /// # Errors
    /// Returns [`NotifyError::Address`] if `config.from_address` doesn't
    /// parse, or [`NotifyError::Transport`] if the transport can't be
    /// built.
    pub fn new(config: &SmtpConfig) -> Result<Self, NotifyError> {
        let from: Mailbox =
            config.from_address.parse().map_err(|source| NotifyError::Address {
                address: config.from_address.clone(),
                source,
            })?;
        let creds = Credentials::new(config.username.clone(), config.password.clone());
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)?
            .port(config.port)
            .credentials(creds)
            .build();
        Ok(Self { transport, from })
    }

    /// Sends `body` as a plaintext message with `subject` to `to`.
    ///
    /// # Errors
    /// Returns [`NotifyError::Address`] if `to` doesn't parse,
    /// [`NotifyError::Message`] if the message can't be built, or
    /// [`NotifyError::Transport`] if sending fails.
    pub async fn send(&self, to: &str, subject: &str, body: String) -> Result<(), NotifyError> {
        let to_mailbox: Mailbox =
            to.parse().map_err(|source| NotifyError::Address { address: to.to_string(), source })?;
        let message = Message::builder()
            .from(self.from.clone())
            .to(to_mailbox)
            .subject(subject)
            .body(body)?;
        self.transport.send(message).await?;
        Ok(())
    }
}
