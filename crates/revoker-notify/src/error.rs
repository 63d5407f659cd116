use thiserror::Error;

/// Errors from rendering or sending a notification.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("template render error: {0}")]
    Template(#[from] tera::Error),

    #[error("smtp transport error: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),

    #[error("malformed message: {0}")]
    Message(#[from] lettre::error::Error),

    #[error("invalid address {address}: {source}")]
    Address {
        address: String,
        #[source]
        source: lettre::address::AddressError,
    },
}

impl From<NotifyError> for revoker_core::RevokerError {
    fn from(e: NotifyError) -> Self {
        match &e {
            NotifyError::Transport(_) => revoker_core::RevokerError::Transient(e.to_string()),
            _ => revoker_core::RevokerError::Internal(e.to_string()),
        }
    }
}
