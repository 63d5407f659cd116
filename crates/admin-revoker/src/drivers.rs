//! The actual revocation/blocking drivers, one per CLI subcommand. Each
//! takes the collaborators it needs as trait objects so it can be
//! exercised in tests against fakes.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use futures_util::{StreamExt, TryStreamExt};
use revoker_core::{BlockedKeySource, KeyFingerprint, NewBlockedKey, RevocationReason, RevokerError, Serial};
use revoker_ra::{CertRef, RegistrationAuthorityClient};
use revoker_storage::StorageGateway;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Outcome of a batch-style driver: how many revocations succeeded vs.
/// failed. A partial failure is not itself an error — the caller decides
/// whether the failure count is acceptable.
#[derive(Debug, Default, Clone, Copy)]
pub struct BatchOutcome {
    pub succeeded: usize,
    pub failed: usize,
}

/// Revokes a single certificate by serial.
///
/// Fetches the precertificate record first so a typo'd or unknown serial
/// fails `NotFound` before ever reaching the Registration Authority.
///
/// # Errors
/// Returns [`RevokerError::NotFound`] if no such certificate exists, or
/// propagates whatever the Registration Authority returns.
pub async fn revoke_by_serial(
    ra: &dyn RegistrationAuthorityClient,
    gateway: &dyn StorageGateway,
    serial: Serial,
    reason: RevocationReason,
    skip_block_key: bool,
    dry_run: bool,
) -> revoker_core::Result<()> {
    let cancel = CancellationToken::new();
    gateway.get_certificate_by_serial(&cancel, &serial).await?;
    if dry_run {
        info!(%serial, %reason, "dry run: would revoke");
        return Ok(());
    }
    revoker_engine::revoke_certificate(ra, CertRef::Serial(serial), reason, skip_block_key).await
}

/// Revokes every serial in `serials`, running up to `parallelism`
/// revocations concurrently. Never aborts early on a single failure — it
/// always processes the whole list and reports how many failed.
pub async fn revoke_batch(
    ra: &dyn RegistrationAuthorityClient,
    gateway: &dyn StorageGateway,
    serials: Vec<Serial>,
    reason: RevocationReason,
    skip_block_key: bool,
    parallelism: usize,
    dry_run: bool,
) -> BatchOutcome {
    let succeeded = Arc::new(AtomicI64::new(0));
    let failed = Arc::new(AtomicI64::new(0));

    futures_util::stream::iter(serials)
        .for_each_concurrent(parallelism.max(1), |serial| {
            let succeeded = Arc::clone(&succeeded);
            let failed = Arc::clone(&failed);
            async move {
                let result =
                    revoke_by_serial(ra, gateway, serial.clone(), reason, skip_block_key, dry_run).await;
                match result {
                    Ok(()) => {
                        succeeded.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        warn!(%serial, error = %e, "revocation failed");
                        failed.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        })
        .await;

    BatchOutcome {
        succeeded: succeeded.load(Ordering::Relaxed) as usize,
        failed: failed.load(Ordering::Relaxed) as usize,
    }
}

/// Streams serials out of an incident table and revokes every one.
///
/// # Errors
/// Returns early with [`RevokerError`] if the incident table name is
/// invalid or the stream itself errors; per-certificate revocation
/// failures are counted in the returned [`BatchOutcome`] instead.
pub async fn revoke_incident_table(
    ra: &dyn RegistrationAuthorityClient,
    gateway: &dyn StorageGateway,
    incident_table: String,
    reason: RevocationReason,
    skip_block_key: bool,
    parallelism: usize,
    dry_run: bool,
) -> revoker_core::Result<BatchOutcome> {
    let cancel = CancellationToken::new();
    let serials: Vec<Serial> = gateway
        .serials_for_incident(cancel, incident_table)
        .map_ok(|row| row.serial)
        .try_collect()
        .await?;
    if serials.is_empty() {
        info!("no serials found");
        return Ok(BatchOutcome::default());
    }
    Ok(revoke_batch(ra, gateway, serials, reason, skip_block_key, parallelism, dry_run).await)
}

/// Revokes every unexpired certificate owned by a registration.
///
/// Verifies the registration itself exists before streaming its
/// certificates, then revokes them one at a time. Unlike [`revoke_batch`],
/// a per-serial failure is fatal: it aborts and surfaces immediately
/// instead of being counted and tolerated. An operator revoking a whole
/// registration's certificates needs to know right away if one didn't go
/// through, since the remaining ones are likely to fail the same way —
/// this is the asymmetry from the file/table drivers, which always run
/// the whole list and report a failure count.
///
/// # Errors
/// Returns [`RevokerError::NotFound`] if the registration doesn't exist,
/// early if the serial stream itself errors, or the first per-serial
/// revocation failure encountered.
pub async fn revoke_by_registration(
    ra: &dyn RegistrationAuthorityClient,
    gateway: &dyn StorageGateway,
    registration_id: i64,
    reason: RevocationReason,
    skip_block_key: bool,
    dry_run: bool,
) -> revoker_core::Result<BatchOutcome> {
    let cancel = CancellationToken::new();
    gateway.get_registration(&cancel, registration_id).await?;

    let serials: Vec<Serial> =
        gateway.serials_by_registration(cancel, registration_id).try_collect().await?;

    let mut succeeded = 0usize;
    for serial in serials {
        revoke_by_serial(ra, gateway, serial, reason, skip_block_key, dry_run).await?;
        succeeded += 1;
    }
    Ok(BatchOutcome { succeeded, failed: 0 })
}

/// Adds a private key's fingerprint to the block-list without revoking
/// anything. Fails with [`RevokerError::AlreadyBlocked`] if the key is
/// already blocked — callers that want idempotent blocking should check
/// `is_key_blocked` first and treat that as success.
///
/// The stored comment is prefixed with `operator`, matching the audit
/// trail an operator expects when reading the row back later outside the
/// context of this process's logs.
///
/// # Errors
/// Propagates [`RevokerError::BadKey`] from loading the key, or any
/// gateway error.
pub async fn block_by_private_key(
    gateway: &dyn StorageGateway,
    key_path: &std::path::Path,
    operator: &str,
    comment: &str,
    dry_run: bool,
) -> revoker_core::Result<KeyFingerprint> {
    let key = revoker_engine::PrivateKey::load_and_verify(key_path)?;
    let fp = key.fingerprint()?;

    let cancel = CancellationToken::new();
    let count = gateway.count_certs_matching_fingerprint(&cancel, &fp).await?;
    info!(%fp, count, "certificates match this key");

    if gateway.is_key_blocked(&cancel, &fp).await? {
        return Err(RevokerError::AlreadyBlocked(fp.to_string()));
    }
    if dry_run {
        info!(%fp, "dry run: would block key");
        return Ok(fp);
    }
    gateway
        .insert_blocked_key(
            &cancel,
            NewBlockedKey {
                fingerprint: fp,
                added_at: Utc::now(),
                source: BlockedKeySource::AdminRevoker,
                comment: format!("{operator}: {comment}"),
                revoked_by: 0,
            },
        )
        .await?;
    Ok(fp)
}

/// Outcome of [`revoke_by_private_key`]: how many matching certificates
/// were revoked versus already revoked (and thus skipped).
#[derive(Debug, Default, Clone, Copy)]
pub struct PrivateKeyRevokeOutcome {
    pub revoked: usize,
    pub already_revoked: usize,
}

/// Revokes every certificate sharing a private key. Does **not** block the
/// key — the caller must follow a successful call with
/// [`block_by_private_key`].
///
/// Deliberately does not block: both this tool and the Bad-Key Revoker
/// act on a blocked fingerprint, and blocking before every matching
/// certificate has been revoked would let the two race on the same
/// certificates. Matches are revoked sequentially (not fanned out, unlike
/// [`revoke_batch`]) with `skip_block_key = true`, and a per-certificate
/// error aborts the whole call rather than being counted and continued
/// past — an error here means the RA rejected a revocation the caller
/// believes should have succeeded, which needs attention before any more
/// of this key's certificates are touched.
///
/// # Errors
/// Returns early if loading the key fails, the match count exceeds
/// `max_revocations`, the match stream itself errors, or any individual
/// revocation fails.
pub async fn revoke_by_private_key(
    ra: &dyn RegistrationAuthorityClient,
    gateway: &dyn StorageGateway,
    key_path: &std::path::Path,
    max_revocations: i64,
    dry_run: bool,
) -> revoker_core::Result<(PrivateKeyRevokeOutcome, KeyFingerprint)> {
    let key = revoker_engine::PrivateKey::load_and_verify(key_path)?;
    let fp = key.fingerprint()?;

    let cancel = CancellationToken::new();
    let count = gateway.count_certs_matching_fingerprint(&cancel, &fp).await?;
    info!(%fp, count, "certificates match this key");
    if count > max_revocations {
        return Err(RevokerError::BadRequest(format!(
            "{count} certificates match this key, exceeding the configured cap of {max_revocations}; refusing to proceed"
        )));
    }

    let serials: Vec<Serial> = gateway
        .serials_matching_fingerprint(cancel.clone(), fp, 1000)
        .map_ok(|row| row.serial)
        .try_collect()
        .await?;

    let mut outcome = PrivateKeyRevokeOutcome::default();
    for serial in serials {
        let status = gateway.get_certificate_status(&cancel, &serial).await?;
        if status.is_revoked {
            info!(%serial, "already revoked, skipping");
            outcome.already_revoked += 1;
            continue;
        }
        if dry_run {
            info!(%serial, "dry run: would revoke");
            outcome.revoked += 1;
            continue;
        }
        revoker_engine::revoke_certificate(ra, CertRef::Serial(serial), RevocationReason::KeyCompromise, true)
            .await?;
        outcome.revoked += 1;
    }

    Ok((outcome, fp))
}

/// Revokes a certificate too malformed for the RA to parse into a
/// `CertRef::Der`; only its serial is used.
///
/// `reg_id_hint` is accepted for command-line compatibility but unused —
/// see the notes on this command for why.
///
/// Deliberately skips the precertificate-existence check `revoke_by_serial`
/// does: a malformed certificate is by definition one the store can't
/// fully account for, so requiring a clean lookup first would make this
/// command unable to revoke the very certificates it exists for.
///
/// # Errors
/// Propagates whatever the Registration Authority returns.
pub async fn revoke_malformed(
    ra: &dyn RegistrationAuthorityClient,
    serial: Serial,
    reason: RevocationReason,
    dry_run: bool,
) -> revoker_core::Result<()> {
    if dry_run {
        info!(%serial, %reason, "dry run: would revoke");
        return Ok(());
    }
    revoker_engine::revoke_certificate(ra, CertRef::Serial(serial), reason, false).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use revoker_storage::FakeStorageGateway;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeRa {
        revoked: Mutex<Vec<Serial>>,
        fail_serials: Vec<Serial>,
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
            let CertRef::Serial(serial) = cert_ref else {
                panic!("expected a serial ref in this test");
            };
            if self.fail_serials.contains(&serial) {
                return Err(RevokerError::Transient("down".into()));
            }
            self.revoked.lock().unwrap().push(serial);
            Ok(())
        }
    }

    fn serial(n: u8) -> Serial {
        Serial::parse(format!("{n:036x}")).unwrap()
    }

    fn seed_live_certificate(gw: &FakeStorageGateway, n: u8, registration_id: i64) {
        gw.seed_certificate(
            revoker_core::CertificateRecord {
                serial: serial(n),
                registration_id,
                der: vec![],
                issued_at: Utc::now(),
                expires_at: Utc::now(),
                issuer_id: 1,
            },
            revoker_core::CertificateStatus {
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

    #[tokio::test]
    async fn batch_processes_every_serial_and_counts_failures() {
        let ra = FakeRa { fail_serials: vec![serial(2)], ..Default::default() };
        let gw = FakeStorageGateway::new();
        for n in 1..=3u8 {
            seed_live_certificate(&gw, n, 1);
        }
        let serials = vec![serial(1), serial(2), serial(3)];
        let outcome =
            revoke_batch(&ra, &gw, serials, RevocationReason::Unspecified, false, 2, false).await;
        assert_eq!(outcome.succeeded, 2);
        assert_eq!(outcome.failed, 1);
        assert_eq!(ra.revoked.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn dry_run_revokes_nothing() {
        let ra = FakeRa::default();
        let gw = FakeStorageGateway::new();
        seed_live_certificate(&gw, 1, 1);
        revoke_by_serial(&ra, &gw, serial(1), RevocationReason::Unspecified, false, true).await.unwrap();
        assert!(ra.revoked.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn reg_revoke_only_touches_owned_serials() {
        let gw = FakeStorageGateway::new();
        gw.seed_certificate(
            revoker_core::CertificateRecord {
                serial: serial(1),
                registration_id: 10,
                der: vec![],
                issued_at: Utc::now(),
                expires_at: Utc::now(),
                issuer_id: 1,
            },
            revoker_core::CertificateStatus {
                serial: serial(1),
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
        gw.seed_certificate(
            revoker_core::CertificateRecord {
                serial: serial(2),
                registration_id: 20,
                der: vec![],
                issued_at: Utc::now(),
                expires_at: Utc::now(),
                issuer_id: 1,
            },
            revoker_core::CertificateStatus {
                serial: serial(2),
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
        gw.seed_registration(revoker_core::Registration { id: 10, contacts: vec![] });
        gw.seed_registration(revoker_core::Registration { id: 20, contacts: vec![] });

        let ra = FakeRa::default();
        let outcome = revoke_by_registration(&ra, &gw, 10, RevocationReason::Unspecified, false, false)
            .await
            .unwrap();
        assert_eq!(outcome.succeeded, 1);
        assert_eq!(ra.revoked.lock().unwrap(), &vec![serial(1)]);
    }

    fn write_rsa_pem() -> (tempfile::TempDir, std::path::PathBuf) {
        use rsa::pkcs8::EncodePrivateKey;
        let mut rng = rand::thread_rng();
        let key = rsa::RsaPrivateKey::new(&mut rng, 2048).unwrap();
        let pem = key.to_pkcs8_pem(Default::default()).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("key.pem");
        std::fs::write(&path, pem.as_bytes()).unwrap();
        (dir, path)
    }

    #[tokio::test]
    async fn revoke_by_private_key_revokes_every_match_and_does_not_block() {
        let (_dir, key_path) = write_rsa_pem();
        let fp = revoker_engine::PrivateKey::load_and_verify(&key_path).unwrap().fingerprint().unwrap();

        let gw = FakeStorageGateway::new();
        for n in 1..=3u8 {
            gw.seed_certificate(
                revoker_core::CertificateRecord {
                    serial: serial(n),
                    registration_id: 1,
                    der: vec![],
                    issued_at: Utc::now(),
                    expires_at: Utc::now(),
                    issuer_id: 1,
                },
                revoker_core::CertificateStatus {
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

        let ra = FakeRa::default();
        let (outcome, returned_fp) = revoke_by_private_key(&ra, &gw, &key_path, 10_000, false).await.unwrap();
        assert_eq!(returned_fp, fp);
        assert_eq!(outcome.revoked, 3);
        assert_eq!(outcome.already_revoked, 0);
        assert_eq!(ra.revoked.lock().unwrap().len(), 3);

        // The key must still be unblocked: revoke never blocks.
        let cancel = CancellationToken::new();
        assert!(!gw.is_key_blocked(&cancel, &fp).await.unwrap());
    }

    #[tokio::test]
    async fn revoke_by_private_key_skips_already_revoked_serials() {
        let (_dir, key_path) = write_rsa_pem();
        let fp = revoker_engine::PrivateKey::load_and_verify(&key_path).unwrap().fingerprint().unwrap();

        let gw = FakeStorageGateway::new();
        gw.seed_certificate(
            revoker_core::CertificateRecord {
                serial: serial(1),
                registration_id: 1,
                der: vec![],
                issued_at: Utc::now(),
                expires_at: Utc::now(),
                issuer_id: 1,
            },
            revoker_core::CertificateStatus {
                serial: serial(1),
                is_revoked: true,
                revoked_reason: Some(RevocationReason::KeyCompromise),
                revoked_at: Some(Utc::now()),
                ocsp_last_updated_at: None,
                ocsp_response: vec![],
                not_after: Utc::now(),
                is_expired: false,
                issuer_id: 1,
            },
        );
        gw.seed_key_index(fp, serial(1), Utc::now());

        // The Storage Gateway itself joins to certificate status and
        // never surfaces an already-revoked serial as a match, so the
        // already-revoked certificate above never reaches this driver.
        let ra = FakeRa::default();
        let (outcome, _) = revoke_by_private_key(&ra, &gw, &key_path, 10_000, false).await.unwrap();
        assert_eq!(outcome.revoked, 0);
        assert_eq!(outcome.already_revoked, 0);
        assert!(ra.revoked.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn revoke_by_private_key_refuses_past_the_cap() {
        let (_dir, key_path) = write_rsa_pem();
        let fp = revoker_engine::PrivateKey::load_and_verify(&key_path).unwrap().fingerprint().unwrap();
        let gw = FakeStorageGateway::new();
        gw.seed_certificate(
            revoker_core::CertificateRecord {
                serial: serial(1),
                registration_id: 1,
                der: vec![],
                issued_at: Utc::now(),
                expires_at: Utc::now(),
                issuer_id: 1,
            },
            revoker_core::CertificateStatus {
                serial: serial(1),
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
        gw.seed_key_index(fp, serial(1), Utc::now());

        let ra = FakeRa::default();
        let err = revoke_by_private_key(&ra, &gw, &key_path, 0, false).await.unwrap_err();
        assert!(matches!(err, RevokerError::BadRequest(_)));
    }

    #[tokio::test]
    async fn block_by_private_key_prefixes_comment_and_rejects_duplicate() {
        let (_dir, key_path) = write_rsa_pem();
        let gw = FakeStorageGateway::new();

        let fp = block_by_private_key(&gw, &key_path, "alice", "compromised in incident 42", false)
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        assert!(gw.is_key_blocked(&cancel, &fp).await.unwrap());

        let err = block_by_private_key(&gw, &key_path, "alice", "compromised in incident 42", false)
            .await
            .unwrap_err();
        assert!(matches!(err, RevokerError::AlreadyBlocked(_)));
    }

    #[tokio::test]
    async fn block_by_private_key_dry_run_does_not_insert() {
        let (_dir, key_path) = write_rsa_pem();
        let gw = FakeStorageGateway::new();

        let fp = block_by_private_key(&gw, &key_path, "alice", "test", true).await.unwrap();

        let cancel = CancellationToken::new();
        assert!(!gw.is_key_blocked(&cancel, &fp).await.unwrap());
    }

    #[tokio::test]
    async fn incident_table_revoke_with_no_serials_succeeds_as_a_no_op() {
        let gw = FakeStorageGateway::new();
        gw.seed_incident_table("incident_42".to_string(), vec![]);
        let ra = FakeRa::default();
        let outcome =
            revoke_incident_table(&ra, &gw, "incident_42".to_string(), RevocationReason::Unspecified, false, 2, false)
                .await
                .unwrap();
        assert_eq!(outcome.succeeded, 0);
        assert_eq!(outcome.failed, 0);
    }
}
