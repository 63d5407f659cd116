//! The single-certificate revocation engine.
//!
//! This is deliberately thin: it validates the reason code, tags the
//! request with the operator's identity, and forwards to the Registration
//! Authority. All the interesting state-machine behaviour lives in the
//! Storage Gateway's guarded writes and in the drivers that call this
//! engine repeatedly.

use revoker_core::RevocationReason;
use revoker_ra::{CertRef, RegistrationAuthorityClient};
use tracing::instrument;

/// Revokes a single certificate through the Registration Authority.
///
/// `skip_block_key` instructs the RA not to add the certificate's key to
/// the block-list as a side effect of this revocation — used by the
/// compromised-private-key flow, which intentionally revokes first and
/// blocks second (see the ordering obligation in the private-key driver).
///
/// # Panics
/// Panics if `reason` somehow encodes an invalid code — by construction
/// [`RevocationReason`] cannot hold one, so this is unreachable outside a
/// programming error in a caller that bypasses the type.
#[instrument(skip(ra), fields(reason = %reason))]
pub async fn revoke_certificate(
    ra: &dyn RegistrationAuthorityClient,
    cert_ref: CertRef,
    reason: RevocationReason,
    skip_block_key: bool,
) -> revoker_core::Result<()> {
    let admin_name = operator_identity();
    tracing::info!(target: "audit", admin = %admin_name, skip_block_key, "administratively revoking certificate");
    ra.administratively_revoke(cert_ref, reason, &admin_name, skip_block_key)
        .await
}

/// The identity tagged onto every revocation this process performs: the
/// OS user running the admin tool, or `"unknown"` if it can't be
/// determined (e.g. running as a service with no controlling user).
#[must_use]
pub fn operator_identity() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use revoker_core::RevokerError;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeRa {
        calls: Mutex<Vec<(CertRefKind, RevocationReason, bool)>>,
        fail: bool,
    }

    #[derive(Debug, PartialEq, Eq, Clone)]
    enum CertRefKind {
        Der,
        Serial(String),
    }

    #[async_trait]
    impl RegistrationAuthorityClient for FakeRa {
        async fn administratively_revoke(
            &self,
            cert_ref: CertRef,
            reason: RevocationReason,
            _admin_name: &str,
            skip_block_key: bool,
        ) -> Result<(), RevokerError> {
            if self.fail {
                return Err(RevokerError::Transient("down".into()));
            }
            let kind = match cert_ref {
                CertRef::Der(_) => CertRefKind::Der,
                CertRef::Serial(s) => CertRefKind::Serial(s.as_str().to_string()),
            };
            self.calls.lock().unwrap().push((kind, reason, skip_block_key));
            Ok(())
        }
    }

    #[tokio::test]
    async fn forwards_reason_and_skip_flag() {
        let ra = FakeRa::default();
        let serial = revoker_core::Serial::parse("0".repeat(36)).unwrap();
        revoke_certificate(&ra, CertRef::Serial(serial), RevocationReason::KeyCompromise, true)
            .await
            .unwrap();

        let calls = ra.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1, RevocationReason::KeyCompromise);
        assert!(calls[0].2);
    }

    #[tokio::test]
    async fn surfaces_ra_errors_unchanged() {
        let ra = FakeRa { fail: true, ..Default::default() };
        let serial = revoker_core::Serial::parse("0".repeat(36)).unwrap();
        let err = revoke_certificate(&ra, CertRef::Serial(serial), RevocationReason::Unspecified, false)
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }
}
