use thiserror::Error;

/// Result type alias for revoker operations.
pub type Result<T> = std::result::Result<T, RevokerError>;

/// Errors that can occur anywhere in the revocation core.
///
/// Every variant here corresponds to a row in the error taxonomy: the
/// propagation policy (surfaced vs. swallowed vs. fatal-to-the-unit-of-work)
/// lives with each caller, not with the error type itself.
#[derive(Debug, Error)]
pub enum RevokerError {
    /// A queried row was absent.
    #[error("not found: {0}")]
    NotFound(String),

    /// A guarded revoke matched zero rows because the certificate was
    /// already revoked.
    #[error("already revoked: {0}")]
    AlreadyRevoked(String),

    /// `privateKeyBlock`'s pre-check found the fingerprint already blocked.
    #[error("key already blocked: {0}")]
    AlreadyBlocked(String),

    /// A unique-constraint violation on the blocked-keys insert. Swallowed
    /// by the gateway; exposed here only so tests can assert on the
    /// underlying behaviour.
    #[error("duplicate row: {0}")]
    Duplicate(String),

    /// An invalid identifier, invalid external reason code, or invalid
    /// incident-table name.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// A private key failed verification (couldn't be parsed, or its
    /// public half doesn't match what was asserted).
    #[error("bad key: {0}")]
    BadKey(String),

    /// A store integrity violation, or a guard mismatch in `reRevokeStatus`.
    /// Fatal to the current unit of work.
    #[error("internal: {0}")]
    Internal(String),

    /// The cancellation handle fired.
    #[error("cancelled")]
    Cancelled,

    /// A network/timeout error from a downstream service.
    #[error("transient: {0}")]
    Transient(String),

    /// A rollback itself failed; both errors are preserved, the original
    /// as the primary cause.
    #[error("transaction rolled back after error ({source}); rollback also failed: {rollback_source}")]
    Rollback {
        #[source]
        source: Box<RevokerError>,
        rollback_source: Box<RevokerError>,
    },

    /// Wrapped storage-layer error, for callers that don't want to inspect
    /// `sqlx::Error` directly.
    #[error("storage error: {0}")]
    Storage(String),

    /// Wrapped gRPC transport/status error from an RA or SA call.
    #[error("rpc error: {0}")]
    Rpc(String),
}

impl RevokerError {
    /// True if a retrying caller should back off and try again later,
    /// rather than treat this as a permanent failure.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Cancelled)
    }
}

#[cfg(feature = "sqlx")]
impl From<sqlx::Error> for RevokerError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => Self::NotFound(e.to_string()),
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                Self::Duplicate(e.to_string())
            }
            other => Self::Storage(other.to_string()),
        }
    }
}

#[cfg(feature = "tonic")]
impl From<tonic::Status> for RevokerError {
    fn from(status: tonic::Status) -> Self {
        use tonic::Code;
        match status.code() {
            Code::NotFound => Self::NotFound(status.message().to_string()),
            Code::InvalidArgument => Self::BadRequest(status.message().to_string()),
            Code::DeadlineExceeded | Code::Unavailable | Code::ResourceExhausted => {
                Self::Transient(status.message().to_string())
            }
            Code::Cancelled => Self::Cancelled,
            _ => Self::Rpc(status.message().to_string()),
        }
    }
}
