use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_core::stream::BoxStream;
use revoker_core::{
    BlockedKeyRow, CertificateRecord, CertificateStatus, IncidentSerial, KeyFingerprint, NewBlockedKey,
    Registration, RevocationReason, Result, RevokedCertRow, Serial, SerialNotAfter,
};
use tokio_util::sync::CancellationToken;

/// A typed, narrow interface over the relational store. Every other
/// component mutates persisted state only by calling operations on this
/// trait — it is the single owner of all write paths.
#[async_trait]
pub trait StorageGateway: Send + Sync {
    // -- row-level reads --------------------------------------------------

    /// Fails with `NotFound` if no such certificate exists, `Internal` on
    /// a store error.
    async fn get_certificate_by_serial(
        &self,
        cancel: &CancellationToken,
        serial: &Serial,
    ) -> Result<CertificateRecord>;

    async fn get_certificate_status(
        &self,
        cancel: &CancellationToken,
        serial: &Serial,
    ) -> Result<CertificateStatus>;

    async fn get_registration(&self, cancel: &CancellationToken, id: i64) -> Result<Registration>;

    async fn count_certs_matching_fingerprint(
        &self,
        cancel: &CancellationToken,
        fp: &KeyFingerprint,
    ) -> Result<i64>;

    async fn is_key_blocked(&self, cancel: &CancellationToken, fp: &KeyFingerprint) -> Result<bool>;

    // -- streaming reads ----------------------------------------------------
    //
    // Each returns a finite, forward-only, non-restartable sequence. The
    // implementation must not hold a single transaction open across all
    // pages of a stream.

    /// Serials sharing `fp`, paginated by internal id, joined against
    /// certificate status and filtered to certificates that are neither
    /// revoked nor expired. An index entry with no matching status row
    /// (a store integrity violation) is still returned rather than
    /// silently dropped, so the caller discovers it.
    fn serials_matching_fingerprint(
        &self,
        cancel: CancellationToken,
        fp: KeyFingerprint,
        batch_size: u32,
    ) -> BoxStream<'static, Result<SerialNotAfter>>;

    /// Streams rows from the named incident table. `table_name` is
    /// validated against the incident-table naming rule before use;
    /// callers never need to validate it themselves.
    fn serials_for_incident(
        &self,
        cancel: CancellationToken,
        table_name: String,
    ) -> BoxStream<'static, Result<IncidentSerial>>;

    /// Every unexpired, unrevoked serial owned by `registration_id`.
    fn serials_by_registration(
        &self,
        cancel: CancellationToken,
        registration_id: i64,
    ) -> BoxStream<'static, Result<Serial>>;

    /// Revoked rows whose not-after falls in `[not_after_from,
    /// not_after_to)` and whose revocation predates `revoked_before`.
    fn revoked_certs_in_window(
        &self,
        cancel: CancellationToken,
        issuer_id: i64,
        not_after_from: DateTime<Utc>,
        not_after_to: DateTime<Utc>,
        revoked_before: DateTime<Utc>,
    ) -> BoxStream<'static, Result<RevokedCertRow>>;

    // -- guarded writes -----------------------------------------------------

    async fn mark_blocked_row_checked(&self, cancel: &CancellationToken, fp: &KeyFingerprint) -> Result<()>;

    /// Idempotent on duplicate fingerprint: a duplicate insert is a no-op,
    /// not an error.
    async fn insert_blocked_key(&self, cancel: &CancellationToken, row: NewBlockedKey) -> Result<()>;

    /// Atomic compare-and-set: updates status to revoked only if the
    /// current status is not already revoked. Returns
    /// [`revoker_core::RevokerError::AlreadyRevoked`] when the guard
    /// matches zero rows.
    async fn revoke_status(
        &self,
        cancel: &CancellationToken,
        serial: &Serial,
        reason: RevocationReason,
        revoked_at: DateTime<Utc>,
        ocsp: &[u8],
    ) -> Result<()>;

    /// Upgrades an already-revoked row's reason to `KeyCompromise`, only
    /// if the row is revoked, its current reason isn't already
    /// `KeyCompromise`, and its stored revocation timestamp equals
    /// `expected_old_revoked_at`. Any guard failing is `Internal`.
    async fn re_revoke_status(
        &self,
        cancel: &CancellationToken,
        serial: &Serial,
        this_update: DateTime<Utc>,
        ocsp: &[u8],
        expected_old_revoked_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Reads the full blocked-key row, for drivers that need to inspect
    /// `revokedBy`/`source`/`comment` rather than just existence.
    async fn get_blocked_key(&self, cancel: &CancellationToken, fp: &KeyFingerprint) -> Result<BlockedKeyRow>;

    /// The next unchecked blocked-key row, if any — step 2 of
    /// `processOneBlockedKey`.
    async fn next_unchecked_blocked_key(&self, cancel: &CancellationToken) -> Result<Option<BlockedKeyRow>>;

    /// Count of unchecked blocked-key rows, capped at `limit` — used to
    /// export the "rows to process" gauge without scanning the whole
    /// table.
    async fn count_unchecked_blocked_keys(&self, cancel: &CancellationToken, limit: i64) -> Result<i64>;
}
