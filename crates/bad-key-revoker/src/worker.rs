//! The core loop: pick one unchecked blocked key, revoke every
//! certificate that shares it, notify the owners, and mark it checked.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};

use futures_util::{StreamExt, TryStreamExt};
use revoker_core::{KeyFingerprint, RevocationReason, RevokerError, Serial};
use revoker_ra::{CertRef, RegistrationAuthorityClient};
use revoker_notify::NotificationDispatcher;
use revoker_storage::StorageGateway;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

/// Process-lifetime counters, logged at `target: "metrics"` rather than
/// exported through a separate metrics crate.
#[derive(Default)]
pub struct Metrics {
    pub rows_to_process: AtomicI64,
    pub certs_revoked: AtomicI64,
    pub revoke_errors: AtomicI64,
    pub mail_errors: AtomicI64,
}

impl Metrics {
    fn log(&self) {
        info!(
            target: "metrics",
            rows_to_process = self.rows_to_process.load(Ordering::Relaxed),
            certs_revoked = self.certs_revoked.load(Ordering::Relaxed),
            revoke_errors = self.revoke_errors.load(Ordering::Relaxed),
            mail_errors = self.mail_errors.load(Ordering::Relaxed),
            "bad-key-revoker counters"
        );
    }
}

/// What happened on one iteration, used by the caller to decide whether
/// to reset or advance the backoff.
pub enum Tick {
    /// No unchecked blocked key was queued; nothing to do.
    Idle,
    /// A row was processed (possibly with some per-certificate failures).
    Processed,
}

/// Processes exactly one unchecked blocked-key row, per the Bad-Key
/// Revoker's contract:
///
/// 1. Export the queue-depth gauge.
/// 2. Claim the next unchecked row, or report idle.
/// 3. Stream every certificate sharing the key's fingerprint.
/// 4. Refuse outright if the match count exceeds `max_revocations` — a
///    key this widely shared is a sign something upstream is broken, and
///    revoking blindly would be worse than stopping.
/// 5. Resolve each match's owning registration and invert into
///    email -> serials.
/// 6. Revoke every match through the Registration Authority, tolerating
///    (and counting, not failing on) a match that's already revoked.
/// 7. Notify each distinct owner once, with the set of serials revoked
///    for them.
/// 8. Mark the row checked so it isn't picked up again.
///
/// # Errors
/// Returns [`RevokerError`] if claiming the row, streaming matches, or
/// marking it checked fails. Per-certificate revoke/notify failures are
/// counted in `metrics` instead of aborting the row.
#[instrument(skip(gateway, ra, notifier, metrics, cancel))]
pub async fn process_one_blocked_key(
    gateway: &dyn StorageGateway,
    ra: &dyn RegistrationAuthorityClient,
    notifier: &NotificationDispatcher,
    metrics: &Metrics,
    max_revocations: i64,
    batch_size: u32,
    cancel: &CancellationToken,
) -> revoker_core::Result<Tick> {
    let queue_depth = gateway.count_unchecked_blocked_keys(cancel, 10_000).await?;
    metrics.rows_to_process.store(queue_depth, Ordering::Relaxed);
    metrics.log();

    let Some(row) = gateway.next_unchecked_blocked_key(cancel).await? else {
        return Ok(Tick::Idle);
    };
    let fp = row.fingerprint;

    let matches: Vec<Serial> = gateway
        .serials_matching_fingerprint(cancel.clone(), fp, batch_size)
        .map_ok(|row| row.serial)
        .try_collect()
        .await?;

    if matches.len() as i64 > max_revocations {
        return Err(RevokerError::Internal(format!(
            "key {fp} matches {} certificates, exceeding the configured cap of {max_revocations}; refusing to process automatically",
            matches.len()
        )));
    }

    let by_owner = group_by_owner(gateway, cancel, &matches).await?;

    for (email, serials) in &by_owner {
        let mut revoked_for_owner = Vec::with_capacity(serials.len());
        for serial in serials {
            match revoke_one(ra, serial.clone()).await {
                Ok(()) => {
                    metrics.certs_revoked.fetch_add(1, Ordering::Relaxed);
                    revoked_for_owner.push(serial.clone());
                }
                Err(e) => {
                    warn!(%serial, error = %e, "failed to revoke certificate matching blocked key");
                    metrics.revoke_errors.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        if email.is_empty() || revoked_for_owner.is_empty() {
            continue;
        }
        if let Err(e) = notifier.notify_key_compromise(email, &revoked_for_owner, &row.comment).await {
            warn!(%email, error = %e, "failed to send key-compromise notification");
            metrics.mail_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    gateway.mark_blocked_row_checked(cancel, &fp).await?;
    Ok(Tick::Processed)
}

async fn revoke_one(ra: &dyn RegistrationAuthorityClient, serial: Serial) -> revoker_core::Result<()> {
    let result =
        revoker_engine::revoke_certificate(ra, CertRef::Serial(serial), RevocationReason::KeyCompromise, true)
            .await;
    match result {
        Ok(()) | Err(RevokerError::AlreadyRevoked(_)) => Ok(()),
        Err(e) => Err(e),
    }
}

/// Resolves each matching serial's owning registration and groups serials
/// by contact email. A registration with no contacts groups under the
/// empty string, which `process_one_blocked_key` skips when notifying.
///
/// A key-hash index entry with no backing certificate row is a store
/// integrity violation, not an ordinary not-found: it means
/// `keyHashToSerial` points at a serial `certificates` doesn't know
/// about. That's escalated to `Internal` rather than left as `NotFound`,
/// since a human needs to investigate rather than the caller treating it
/// as a routine missing-row case.
async fn group_by_owner(
    gateway: &dyn StorageGateway,
    cancel: &CancellationToken,
    serials: &[Serial],
) -> revoker_core::Result<BTreeMap<String, Vec<Serial>>> {
    let mut by_owner: BTreeMap<String, Vec<Serial>> = BTreeMap::new();
    for serial in serials {
        let cert = gateway.get_certificate_by_serial(cancel, serial).await.map_err(|e| match e {
            RevokerError::NotFound(msg) => {
                RevokerError::Internal(format!("key-hash index points at unknown certificate {serial}: {msg}"))
            }
            other => other,
        })?;
        let registration = gateway.get_registration(cancel, cert.registration_id).await?;
        for email in registration.email_addresses() {
            by_owner.entry(email).or_default().push(serial.clone());
        }
    }
    Ok(by_owner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use revoker_core::{BlockedKeySource, CertificateRecord, CertificateStatus, NewBlockedKey, Registration};
    use revoker_storage::FakeStorageGateway;
    use std::sync::Mutex;

    fn serial(n: u8) -> Serial {
        Serial::parse(format!("{n:036x}")).unwrap()
    }

    #[derive(Default)]
    struct FakeRa {
        revoked: Mutex<Vec<Serial>>,
    }

    #[async_trait]
    impl RegistrationAuthorityClient for FakeRa {
        async fn administratively_revoke(
            &self,
            cert_ref: CertRef,
            _reason: RevocationReason,
            _admin_name: &str,
            _skip_block_key: bool,
        ) -> revoker_core::Result<()> {
            let CertRef::Serial(serial) = cert_ref else { unreachable!() };
            self.revoked.lock().unwrap().push(serial);
            Ok(())
        }
    }

    #[tokio::test]
    async fn idle_when_no_unchecked_rows() {
        let gw = FakeStorageGateway::new();
        let ra = FakeRa::default();
        let metrics = Metrics::default();
        let cancel = CancellationToken::new();
        let notifier_config = revoker_notify::SmtpConfig {
            host: "localhost".into(),
            port: 2525,
            username: "u".into(),
            password: "p".into(),
            from_address: "ca@example.com".into(),
        };
        let notifier = NotificationDispatcher::new(&notifier_config, 100).unwrap();
        let tick = process_one_blocked_key(&gw, &ra, &notifier, &metrics, 10_000, 1000, &cancel)
            .await
            .unwrap();
        assert!(matches!(tick, Tick::Idle));
    }

    #[tokio::test]
    async fn refuses_when_match_count_exceeds_cap() {
        let gw = FakeStorageGateway::new();
        let ra = FakeRa::default();
        let fp = KeyFingerprint::new([3; 32]);
        for n in [1u8, 2] {
            gw.seed_certificate(
                CertificateRecord {
                    serial: serial(n),
                    registration_id: 1,
                    der: vec![],
                    issued_at: Utc::now(),
                    expires_at: Utc::now(),
                    issuer_id: 1,
                },
                CertificateStatus {
                    serial: serial(n),
                    is_revoked: false,
                    revoked_reason: None,
                    revoked_at: None,
                    ocsp_last_updated_at: None,
                    ocsp_response: vec![],
                    not_after: Utc::now(),
                    is_expired: false,
                    issuer_id: 1,
                },
            );
            gw.seed_key_index(fp, serial(n), Utc::now());
        }
        gw.insert_blocked_key(
            &CancellationToken::new(),
            NewBlockedKey {
                fingerprint: fp,
                added_at: Utc::now(),
                source: BlockedKeySource::Api,
                comment: String::new(),
                revoked_by: 1,
            },
        )
        .await
        .unwrap();
        let metrics = Metrics::default();
        let notifier_config = revoker_notify::SmtpConfig {
            host: "localhost".into(),
            port: 2525,
            username: "u".into(),
            password: "p".into(),
            from_address: "ca@example.com".into(),
        };
        let notifier = NotificationDispatcher::new(&notifier_config, 100).unwrap();
        let err = process_one_blocked_key(&gw, &ra, &notifier, &metrics, 1, 1000, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RevokerError::Internal(_)));
    }

    #[tokio::test]
    async fn revokes_matches_and_marks_row_checked() {
        let gw = FakeStorageGateway::new();
        let ra = FakeRa::default();
        let fp = KeyFingerprint::new([5; 32]);
        let cancel = CancellationToken::new();

        gw.seed_registration(Registration { id: 1, contacts: vec!["mailto:a@example.com".into()] });
        gw.seed_certificate(
            CertificateRecord {
                serial: serial(9),
                registration_id: 1,
                der: vec![],
                issued_at: Utc::now(),
                expires_at: Utc::now(),
                issuer_id: 1,
            },
            CertificateStatus {
                serial: serial(9),
                is_revoked: false,
                revoked_reason: None,
                revoked_at: None,
                ocsp_last_updated_at: None,
                ocsp_response: vec![],
                not_after: Utc::now(),
                is_expired: false,
                issuer_id: 1,
            },
        );
        gw.seed_key_index(fp, serial(9), Utc::now());
        gw.insert_blocked_key(
            &cancel,
            NewBlockedKey {
                fingerprint: fp,
                added_at: Utc::now(),
                source: BlockedKeySource::Api,
                comment: "incident".into(),
                revoked_by: 1,
            },
        )
        .await
        .unwrap();

        let metrics = Metrics::default();
        let notifier_config = revoker_notify::SmtpConfig {
            host: "localhost".into(),
            port: 2525,
            username: "u".into(),
            password: "p".into(),
            from_address: "ca@example.com".into(),
        };
        let notifier = NotificationDispatcher::new(&notifier_config, 100).unwrap();

        let tick = process_one_blocked_key(&gw, &ra, &notifier, &metrics, 10_000, 1000, &cancel).await.unwrap();
        assert!(matches!(tick, Tick::Processed));
        assert_eq!(ra.revoked.lock().unwrap().as_slice(), &[serial(9)]);
        assert_eq!(metrics.certs_revoked.load(Ordering::Relaxed), 1);

        let row = gw.get_blocked_key(&cancel, &fp).await.unwrap();
        assert!(row.extant_certificates_checked);
    }

    #[tokio::test]
    async fn group_by_owner_coalesces_multiple_certs_under_one_contact() {
        let gw = FakeStorageGateway::new();
        let cancel = CancellationToken::new();

        gw.seed_registration(Registration { id: 1, contacts: vec!["mailto:shared@example.com".into()] });
        gw.seed_registration(Registration { id: 2, contacts: vec!["mailto:shared@example.com".into()] });
        for (n, reg_id) in [(1u8, 1i64), (2, 1), (3, 2)] {
            gw.seed_certificate(
                CertificateRecord {
                    serial: serial(n),
                    registration_id: reg_id,
                    der: vec![],
                    issued_at: Utc::now(),
                    expires_at: Utc::now(),
                    issuer_id: 1,
                },
                CertificateStatus {
                    serial: serial(n),
                    is_revoked: false,
                    revoked_reason: None,
                    revoked_at: None,
                    ocsp_last_updated_at: None,
                    ocsp_response: vec![],
                    not_after: Utc::now(),
                    is_expired: false,
                    issuer_id: 1,
                },
            );
        }

        let by_owner =
            group_by_owner(&gw, &cancel, &[serial(1), serial(2), serial(3)]).await.unwrap();

        // Two registrations share one contact address, so every matching
        // certificate coalesces under a single notification recipient
        // rather than one email per registration.
        assert_eq!(by_owner.len(), 1);
        assert_eq!(by_owner["shared@example.com"], vec![serial(1), serial(2), serial(3)]);
    }

    #[tokio::test]
    async fn fatal_when_key_index_points_at_a_missing_certificate() {
        let gw = FakeStorageGateway::new();
        let ra = FakeRa::default();
        let fp = KeyFingerprint::new([7; 32]);
        let cancel = CancellationToken::new();

        // The key index references a serial with no corresponding
        // certificate row: a store integrity violation that must abort
        // the whole row rather than being silently skipped.
        gw.seed_key_index(fp, serial(99), Utc::now());
        gw.insert_blocked_key(
            &cancel,
            NewBlockedKey {
                fingerprint: fp,
                added_at: Utc::now(),
                source: BlockedKeySource::Api,
                comment: "incident".into(),
                revoked_by: 1,
            },
        )
        .await
        .unwrap();

        let metrics = Metrics::default();
        let notifier_config = revoker_notify::SmtpConfig {
            host: "localhost".into(),
            port: 2525,
            username: "u".into(),
            password: "p".into(),
            from_address: "ca@example.com".into(),
        };
        let notifier = NotificationDispatcher::new(&notifier_config, 100).unwrap();

        let err = process_one_blocked_key(&gw, &ra, &notifier, &metrics, 10_000, 1000, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, RevokerError::Internal(_)));

        // The row must remain unchecked so a fixed store gets retried.
        let row = gw.get_blocked_key(&cancel, &fp).await.unwrap();
        assert!(!row.extant_certificates_checked);
    }
}
