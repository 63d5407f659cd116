//! The Notification Dispatcher: tells subscribers when their certificates
//! were revoked for key compromise.

mod error;
mod mailer;
mod template;

pub use error::NotifyError;
pub use mailer::{Mailer, SmtpConfig};
pub use template::DEFAULT_MAX_SERIALS_LISTED;

use revoker_core::Serial;
use tera::Tera;
use tracing::instrument;

const KEY_COMPROMISE_SUBJECT: &str = "Certificate revocation notice";

/// Combines the mailer and the template engine into the one entry point
/// the rest of the workspace calls.
pub struct NotificationDispatcher {
    mailer: Mailer,
    tera: Tera,
    max_serials_listed: usize,
}

impl NotificationDispatcher {
    /// # Errors
    /// Returns [`NotifyError`] if the mailer can't be constructed or the
    /// bundled templates fail to parse.
    pub fn new(config: &SmtpConfig, max_serials_listed: usize) -> Result<Self, NotifyError> {
        Ok(Self {
            mailer: Mailer::new(config)?,
            tera: template::build_tera()?,
            max_serials_listed,
        })
    }

    /// Notifies `to` that `serials` were revoked for key compromise.
    /// `comment` carries incident context, if any, into the email body.
    ///
    /// # Errors
    /// Returns [`NotifyError`] on a render or send failure. The caller
    /// decides whether that's fatal to the surrounding unit of work — the
    /// bad-key-revoker worker, for instance, counts it and moves on.
    #[instrument(skip(self, serials), fields(to, serial_count = serials.len()))]
    pub async fn notify_key_compromise(
        &self,
        to: &str,
        serials: &[Serial],
        comment: &str,
    ) -> Result<(), NotifyError> {
        let body = template::render_key_compromise(&self.tera, serials, comment, self.max_serials_listed)?;
        self.mailer.send(to, KEY_COMPROMISE_SUBJECT, body).await
    }
}
