//! An in-memory [`StorageGateway`] for tests that don't want a real
//! MySQL instance. Guards the same invariants the MySQL implementation
//! does (no double-revoke, idempotent blocked-key insert) so a test
//! written against the fake behaves the same against the real thing.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_core::stream::BoxStream;
use futures_util::stream;
use revoker_core::{
    BlockedKeyRow, CertificateRecord, CertificateStatus, IncidentSerial, KeyFingerprint,
    NewBlockedKey, Registration, RevocationReason, Result, RevokedCertRow, RevokerError, Serial,
    SerialNotAfter,
};
use tokio_util::sync::CancellationToken;

use crate::gateway::StorageGateway;

#[derive(Default)]
struct State {
    certificates: BTreeMap<String, CertificateRecord>,
    statuses: BTreeMap<String, CertificateStatus>,
    registrations: BTreeMap<i64, Registration>,
    key_index: Vec<(KeyFingerprint, SerialNotAfter)>,
    blocked: BTreeMap<[u8; 32], BlockedKeyRow>,
    incidents: BTreeMap<String, Vec<IncidentSerial>>,
}

/// An in-memory `StorageGateway`. Seed it via the `insert_*`/`seed_*`
/// helpers before handing it to code under test as a `&dyn
/// StorageGateway`.
#[derive(Default)]
pub struct FakeStorageGateway {
    state: Mutex<State>,
}

impl FakeStorageGateway {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_certificate(&self, record: CertificateRecord, status: CertificateStatus) {
        let mut state = self.state.lock().unwrap();
        state.statuses.insert(record.serial.to_string(), status);
        state.certificates.insert(record.serial.to_string(), record);
    }

    pub fn seed_registration(&self, registration: Registration) {
        self.state.lock().unwrap().registrations.insert(registration.id, registration.clone());
    }

    pub fn seed_key_index(&self, fp: KeyFingerprint, serial: Serial, not_after: DateTime<Utc>) {
        self.state.lock().unwrap().key_index.push((fp, SerialNotAfter { serial, not_after }));
    }

    pub fn seed_incident_table(&self, table_name: String, rows: Vec<IncidentSerial>) {
        self.state.lock().unwrap().incidents.insert(table_name, rows);
    }
}

#[async_trait]
impl StorageGateway for FakeStorageGateway {
    async fn get_certificate_by_serial(
        &self,
        _cancel: &CancellationToken,
        serial: &Serial,
    ) -> Result<CertificateRecord> {
        self.state
            .lock()
            .unwrap()
            .certificates
            .get(serial.as_str())
            .cloned()
            .ok_or_else(|| RevokerError::NotFound(serial.to_string()))
    }

    async fn get_certificate_status(
        &self,
        _cancel: &CancellationToken,
        serial: &Serial,
    ) -> Result<CertificateStatus> {
        self.state
            .lock()
            .unwrap()
            .statuses
            .get(serial.as_str())
            .cloned()
            .ok_or_else(|| RevokerError::NotFound(serial.to_string()))
    }

    async fn get_registration(&self, _cancel: &CancellationToken, id: i64) -> Result<Registration> {
        self.state
            .lock()
            .unwrap()
            .registrations
            .get(&id)
            .cloned()
            .ok_or_else(|| RevokerError::NotFound(id.to_string()))
    }

    async fn count_certs_matching_fingerprint(
        &self,
        _cancel: &CancellationToken,
        fp: &KeyFingerprint,
    ) -> Result<i64> {
        Ok(self.state.lock().unwrap().key_index.iter().filter(|(k, _)| k == fp).count() as i64)
    }

    async fn is_key_blocked(&self, _cancel: &CancellationToken, fp: &KeyFingerprint) -> Result<bool> {
        Ok(self.state.lock().unwrap().blocked.contains_key(fp.as_bytes()))
    }

    fn serials_matching_fingerprint(
        &self,
        _cancel: CancellationToken,
        fp: KeyFingerprint,
        _batch_size: u32,
    ) -> BoxStream<'static, Result<SerialNotAfter>> {
        let state = self.state.lock().unwrap();
        // An index entry with no matching status row is an orphan, not a
        // filtered-out match: it must still surface so the caller can
        // notice the inconsistency, mirroring the MySQL gateway's LEFT
        // JOIN (as opposed to excluding a confirmed revoked/expired row).
        let matches: Vec<Result<SerialNotAfter>> = state
            .key_index
            .iter()
            .filter(|(k, _)| *k == fp)
            .filter(|(_, v)| {
                state
                    .statuses
                    .get(v.serial.as_str())
                    .map_or(true, |status| !status.is_revoked && !status.is_expired)
            })
            .map(|(_, v)| Ok(v.clone()))
            .collect();
        Box::pin(stream::iter(matches))
    }

    fn serials_for_incident(
        &self,
        _cancel: CancellationToken,
        table_name: String,
    ) -> BoxStream<'static, Result<IncidentSerial>> {
        if let Err(e) = revoker_core::validate_incident_table_name(&table_name) {
            return Box::pin(stream::once(async move { Err(e) }));
        }
        let rows: Vec<Result<IncidentSerial>> = self
            .state
            .lock()
            .unwrap()
            .incidents
            .get(&table_name)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .map(Ok)
            .collect();
        Box::pin(stream::iter(rows))
    }

    fn serials_by_registration(
        &self,
        _cancel: CancellationToken,
        registration_id: i64,
    ) -> BoxStream<'static, Result<Serial>> {
        let serials: Vec<Result<Serial>> = self
            .state
            .lock()
            .unwrap()
            .certificates
            .values()
            .filter(|record| record.registration_id == registration_id)
            .map(|record| Ok(record.serial.clone()))
            .collect();
        Box::pin(stream::iter(serials))
    }

    fn revoked_certs_in_window(
        &self,
        _cancel: CancellationToken,
        issuer_id: i64,
        not_after_from: DateTime<Utc>,
        not_after_to: DateTime<Utc>,
        revoked_before: DateTime<Utc>,
    ) -> BoxStream<'static, Result<RevokedCertRow>> {
        let rows: Vec<Result<RevokedCertRow>> = self
            .state
            .lock()
            .unwrap()
            .statuses
            .values()
            .filter(|status| {
                status.issuer_id == issuer_id
                    && status.is_revoked
                    && status.not_after >= not_after_from
                    && status.not_after < not_after_to
                    && status.revoked_at.is_some_and(|r| r < revoked_before)
            })
            .map(|status| {
                Ok(RevokedCertRow {
                    serial: status.serial.clone(),
                    reason: status.revoked_reason.unwrap_or(RevocationReason::Unspecified),
                    revoked_at: status.revoked_at.unwrap(),
                })
            })
            .collect();
        Box::pin(stream::iter(rows))
    }

    async fn mark_blocked_row_checked(&self, _cancel: &CancellationToken, fp: &KeyFingerprint) -> Result<()> {
        if let Some(row) = self.state.lock().unwrap().blocked.get_mut(fp.as_bytes()) {
            row.extant_certificates_checked = true;
        }
        Ok(())
    }

    async fn insert_blocked_key(&self, _cancel: &CancellationToken, row: NewBlockedKey) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.blocked.entry(*row.fingerprint.as_bytes()).or_insert(BlockedKeyRow {
            fingerprint: row.fingerprint,
            added_at: row.added_at,
            source: row.source,
            comment: row.comment,
            revoked_by: row.revoked_by,
            extant_certificates_checked: false,
        });
        Ok(())
    }

    async fn revoke_status(
        &self,
        _cancel: &CancellationToken,
        serial: &Serial,
        reason: RevocationReason,
        revoked_at: DateTime<Utc>,
        ocsp: &[u8],
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let status = state
            .statuses
            .get_mut(serial.as_str())
            .ok_or_else(|| RevokerError::NotFound(serial.to_string()))?;
        if status.is_revoked {
            return Err(RevokerError::AlreadyRevoked(serial.to_string()));
        }
        status.is_revoked = true;
        status.revoked_reason = Some(reason);
        status.revoked_at = Some(revoked_at);
        status.ocsp_last_updated_at = Some(revoked_at);
        status.ocsp_response = ocsp.to_vec();
        Ok(())
    }

    async fn re_revoke_status(
        &self,
        _cancel: &CancellationToken,
        serial: &Serial,
        this_update: DateTime<Utc>,
        ocsp: &[u8],
        expected_old_revoked_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let status = state
            .statuses
            .get_mut(serial.as_str())
            .ok_or_else(|| RevokerError::NotFound(serial.to_string()))?;
        let guard_ok = status.is_revoked
            && status.revoked_reason != Some(RevocationReason::KeyCompromise)
            && status.revoked_at == Some(expected_old_revoked_at);
        if !guard_ok {
            return Err(RevokerError::Internal(format!(
                "re-revoke guard matched no row for serial {serial}"
            )));
        }
        status.revoked_reason = Some(RevocationReason::KeyCompromise);
        status.ocsp_last_updated_at = Some(this_update);
        status.ocsp_response = ocsp.to_vec();
        Ok(())
    }

    async fn get_blocked_key(&self, _cancel: &CancellationToken, fp: &KeyFingerprint) -> Result<BlockedKeyRow> {
        self.state
            .lock()
            .unwrap()
            .blocked
            .get(fp.as_bytes())
            .cloned()
            .ok_or_else(|| RevokerError::NotFound(fp.to_string()))
    }

    async fn next_unchecked_blocked_key(&self, _cancel: &CancellationToken) -> Result<Option<BlockedKeyRow>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .blocked
            .values()
            .find(|row| !row.extant_certificates_checked)
            .cloned())
    }

    async fn count_unchecked_blocked_keys(&self, _cancel: &CancellationToken, limit: i64) -> Result<i64> {
        let count = self
            .state
            .lock()
            .unwrap()
            .blocked
            .values()
            .filter(|row| !row.extant_certificates_checked)
            .count() as i64;
        Ok(count.min(limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn serial(n: u8) -> Serial {
        Serial::parse(format!("{n:036x}")).unwrap()
    }

    #[tokio::test]
    async fn revoke_status_rejects_double_revoke() {
        let gw = FakeStorageGateway::new();
        let s = serial(1);
        gw.seed_certificate(
            CertificateRecord {
                serial: s.clone(),
                registration_id: 1,
                der: vec![],
                issued_at: Utc::now(),
                expires_at: Utc::now(),
                issuer_id: 1,
            },
            CertificateStatus {
                serial: s.clone(),
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
        let cancel = CancellationToken::new();
        gw.revoke_status(&cancel, &s, RevocationReason::KeyCompromise, Utc::now(), &[])
            .await
            .unwrap();
        let err = gw
            .revoke_status(&cancel, &s, RevocationReason::Superseded, Utc::now(), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, RevokerError::AlreadyRevoked(_)));
    }

    #[tokio::test]
    async fn insert_blocked_key_is_idempotent() {
        let gw = FakeStorageGateway::new();
        let cancel = CancellationToken::new();
        let fp = KeyFingerprint::new([7; 32]);
        let row = NewBlockedKey {
            fingerprint: fp,
            added_at: Utc::now(),
            source: revoker_core::BlockedKeySource::AdminRevoker,
            comment: "first".into(),
            revoked_by: 1,
        };
        gw.insert_blocked_key(&cancel, row.clone()).await.unwrap();
        gw.insert_blocked_key(&cancel, row).await.unwrap();
        assert!(gw.is_key_blocked(&cancel, &fp).await.unwrap());
    }
}
