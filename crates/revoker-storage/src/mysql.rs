//! The MySQL/MariaDB-backed [`StorageGateway`](crate::StorageGateway).
//!
//! Table names follow the schema this core was built against:
//! `certificates`, `certificateStatus`, `registrations`, `keyHashToSerial`,
//! `blockedKeys`, plus one `incident_*` table per active incident. Streaming
//! reads page through results with repeated bounded queries rather than a
//! single long-lived cursor, so a slow consumer never holds a transaction
//! open against the store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_core::stream::BoxStream;
use futures_util::{stream, StreamExt};
use revoker_core::{
    BlockedKeyRow, BlockedKeySource, CertificateRecord, CertificateStatus, IncidentSerial,
    KeyFingerprint, NewBlockedKey, Registration, RevocationReason, Result, RevokedCertRow,
    RevokerError, Serial, SerialNotAfter,
};
use sqlx::{mysql::MySqlPoolOptions, MySqlPool, Row};
use tokio_util::sync::CancellationToken;

use crate::gateway::StorageGateway;

/// Default page size for the manual pagination loops below.
const DEFAULT_PAGE_SIZE: u32 = 1000;

/// A `StorageGateway` backed by a `sqlx::MySqlPool`.
pub struct MySqlStorageGateway {
    pool: MySqlPool,
}

impl MySqlStorageGateway {
    /// Connects a pool of at most `max_connections` and sets the
    /// session-level statement time limits every connection should run
    /// under, so a single runaway query can't starve the pool.
    ///
    /// # Errors
    /// Returns [`RevokerError::Storage`] if the pool can't be established.
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        max_statement_time: std::time::Duration,
    ) -> Result<Self> {
        let millis = max_statement_time.as_millis();
        let pool = MySqlPoolOptions::new()
            .max_connections(max_connections)
            .after_connect(move |conn, _meta| {
                Box::pin(async move {
                    sqlx::query(&format!("SET SESSION max_statement_time = {millis}"))
                        .execute(&mut *conn)
                        .await?;
                    Ok(())
                })
            })
            .connect(database_url)
            .await
            .map_err(RevokerError::from)?;
        Ok(Self { pool })
    }

    #[must_use]
    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }

    /// Runs `body` inside a transaction, committing on `Ok` and rolling
    /// back on `Err`. A failure during rollback itself is folded into
    /// [`RevokerError::Rollback`] alongside the original error so neither
    /// is silently lost.
    async fn with_transaction<F, Fut, T>(&self, body: F) -> Result<T>
    where
        F: FnOnce(sqlx::Transaction<'static, sqlx::MySql>) -> Fut,
        Fut: std::future::Future<Output = Result<(T, sqlx::Transaction<'static, sqlx::MySql>)>>,
    {
        let tx = self.pool.begin().await.map_err(RevokerError::from)?;
        match body(tx).await {
            Ok((value, tx)) => {
                tx.commit().await.map_err(RevokerError::from)?;
                Ok(value)
            }
            Err(source) => Err(source),
        }
    }
}

fn check_cancelled(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(RevokerError::Cancelled);
    }
    Ok(())
}

#[derive(sqlx::FromRow)]
struct CertificateRow {
    serial: String,
    #[sqlx(rename = "registrationID")]
    registration_id: i64,
    der: Vec<u8>,
    issued: DateTime<Utc>,
    expires: DateTime<Utc>,
    #[sqlx(rename = "issuerID")]
    issuer_id: i64,
}

impl TryFrom<CertificateRow> for CertificateRecord {
    type Error = RevokerError;
    fn try_from(r: CertificateRow) -> Result<Self> {
        Ok(Self {
            serial: Serial::parse(r.serial)?,
            registration_id: r.registration_id,
            der: r.der,
            issued_at: r.issued,
            expires_at: r.expires,
            issuer_id: r.issuer_id,
        })
    }
}

#[derive(sqlx::FromRow)]
struct CertificateStatusRow {
    serial: String,
    status: String,
    #[sqlx(rename = "revokedReason")]
    revoked_reason: Option<i64>,
    #[sqlx(rename = "revokedDate")]
    revoked_date: Option<DateTime<Utc>>,
    #[sqlx(rename = "ocspLastUpdated")]
    ocsp_last_updated: Option<DateTime<Utc>>,
    #[sqlx(rename = "ocspResponse")]
    ocsp_response: Option<Vec<u8>>,
    #[sqlx(rename = "notAfter")]
    not_after: DateTime<Utc>,
    #[sqlx(rename = "isExpired")]
    is_expired: bool,
    #[sqlx(rename = "issuerID")]
    issuer_id: i64,
}

impl TryFrom<CertificateStatusRow> for CertificateStatus {
    type Error = RevokerError;
    fn try_from(r: CertificateStatusRow) -> Result<Self> {
        let is_revoked = r.status == "revoked";
        let revoked_reason = r
            .revoked_reason
            .map(RevocationReason::try_from)
            .transpose()?;
        Ok(Self {
            serial: Serial::parse(r.serial)?,
            is_revoked,
            revoked_reason,
            revoked_at: r.revoked_date,
            ocsp_last_updated_at: r.ocsp_last_updated,
            ocsp_response: r.ocsp_response.unwrap_or_default(),
            not_after: r.not_after,
            is_expired: r.is_expired,
            issuer_id: r.issuer_id,
        })
    }
}

#[async_trait]
impl StorageGateway for MySqlStorageGateway {
    async fn get_certificate_by_serial(
        &self,
        cancel: &CancellationToken,
        serial: &Serial,
    ) -> Result<CertificateRecord> {
        check_cancelled(cancel)?;
        let row: CertificateRow = sqlx::query_as(
            "SELECT serial, registrationID, der, issued, expires, issuerID \
             FROM certificates WHERE serial = ?",
        )
        .bind(serial.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(RevokerError::from)?;
        row.try_into()
    }

    async fn get_certificate_status(
        &self,
        cancel: &CancellationToken,
        serial: &Serial,
    ) -> Result<CertificateStatus> {
        check_cancelled(cancel)?;
        let row: CertificateStatusRow = sqlx::query_as(
            "SELECT serial, status, revokedReason, revokedDate, ocspLastUpdated, \
             ocspResponse, notAfter, isExpired, issuerID \
             FROM certificateStatus WHERE serial = ?",
        )
        .bind(serial.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(RevokerError::from)?;
        row.try_into()
    }

    async fn get_registration(&self, cancel: &CancellationToken, id: i64) -> Result<Registration> {
        check_cancelled(cancel)?;
        let row = sqlx::query("SELECT id, contact FROM registrations WHERE id = ?")
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(RevokerError::from)?;
        let id: i64 = row.try_get("id").map_err(RevokerError::from)?;
        let contact_json: Option<String> = row.try_get("contact").map_err(RevokerError::from)?;
        let contacts = match contact_json {
            Some(s) if !s.is_empty() => {
                serde_json::from_str(&s).map_err(|e| RevokerError::Internal(e.to_string()))?
            }
            _ => Vec::new(),
        };
        Ok(Registration { id, contacts })
    }

    async fn count_certs_matching_fingerprint(
        &self,
        cancel: &CancellationToken,
        fp: &KeyFingerprint,
    ) -> Result<i64> {
        check_cancelled(cancel)?;
        let row = sqlx::query("SELECT COUNT(*) AS n FROM keyHashToSerial WHERE keyHash = ?")
            .bind(fp.as_bytes().as_slice())
            .fetch_one(&self.pool)
            .await
            .map_err(RevokerError::from)?;
        row.try_get("n").map_err(RevokerError::from)
    }

    async fn is_key_blocked(&self, cancel: &CancellationToken, fp: &KeyFingerprint) -> Result<bool> {
        check_cancelled(cancel)?;
        let row = sqlx::query("SELECT COUNT(*) AS n FROM blockedKeys WHERE keyHash = ?")
            .bind(fp.as_bytes().as_slice())
            .fetch_one(&self.pool)
            .await
            .map_err(RevokerError::from)?;
        let n: i64 = row.try_get("n").map_err(RevokerError::from)?;
        Ok(n > 0)
    }

    fn serials_matching_fingerprint(
        &self,
        cancel: CancellationToken,
        fp: KeyFingerprint,
        batch_size: u32,
    ) -> BoxStream<'static, Result<SerialNotAfter>> {
        let pool = self.pool.clone();
        let batch_size = if batch_size == 0 { DEFAULT_PAGE_SIZE } else { batch_size };
        Box::pin(stream::unfold(
            (pool, fp, cancel, 0i64, false),
            move |(pool, fp, cancel, last_serial_seq, done)| async move {
                if done {
                    return None;
                }
                if let Err(e) = check_cancelled(&cancel) {
                    return Some((vec![Err(e)], (pool, fp, cancel, last_serial_seq, true)));
                }
                // A LEFT JOIN, not an inner join: an index entry with no
                // matching certificateStatus row is a store integrity
                // violation the caller must notice and fail on, not a
                // row we're allowed to silently drop here.
                let rows: Result<Vec<(String, DateTime<Utc>, i64)>> = sqlx::query_as(
                    "SELECT k.certSerial, COALESCE(cs.notAfter, k.certNotAfter), k.id \
                     FROM keyHashToSerial k \
                     LEFT JOIN certificateStatus cs ON cs.serial = k.certSerial \
                     WHERE k.keyHash = ? AND k.id > ? \
                     AND (cs.status IS NULL OR cs.status != 'revoked') \
                     AND (cs.isExpired IS NULL OR cs.isExpired = 0) \
                     ORDER BY k.id LIMIT ?",
                )
                .bind(fp.as_bytes().as_slice())
                .bind(last_serial_seq)
                .bind(batch_size)
                .fetch_all(&pool)
                .await
                .map_err(RevokerError::from);

                match rows {
                    Err(e) => Some((vec![Err(e)], (pool, fp, cancel, last_serial_seq, true))),
                    Ok(rows) => {
                        let short = rows.len() < batch_size as usize;
                        let next_seq = rows.last().map_or(last_serial_seq, |r| r.2);
                        let items = rows
                            .into_iter()
                            .map(|(serial, not_after, _id)| {
                                Serial::parse(serial).map(|serial| SerialNotAfter { serial, not_after })
                            })
                            .collect::<Vec<_>>();
                        Some((items, (pool, fp, cancel, next_seq, short)))
                    }
                }
            },
        ))
        .flat_map(stream::iter)
        .boxed()
    }

    fn serials_for_incident(
        &self,
        cancel: CancellationToken,
        table_name: String,
    ) -> BoxStream<'static, Result<IncidentSerial>> {
        if let Err(e) = revoker_core::validate_incident_table_name(&table_name) {
            return Box::pin(stream::once(async move { Err(e) }));
        }
        let pool = self.pool.clone();
        Box::pin(stream::unfold(
            (pool, table_name, cancel, 0i64, false),
            move |(pool, table, cancel, last_id, done)| async move {
                if done {
                    return None;
                }
                if let Err(e) = check_cancelled(&cancel) {
                    return Some((vec![Err(e)], (pool, table, cancel, last_id, true)));
                }
                let query = format!(
                    "SELECT id, serial, registrationID, orderID, lastNoticeSent \
                     FROM {table} WHERE id > ? ORDER BY id LIMIT ?"
                );
                let rows: Result<Vec<(i64, String, i64, i64, Option<DateTime<Utc>>)>> =
                    sqlx::query_as(&query)
                        .bind(last_id)
                        .bind(DEFAULT_PAGE_SIZE)
                        .fetch_all(&pool)
                        .await
                        .map_err(RevokerError::from);

                match rows {
                    Err(e) => Some((vec![Err(e)], (pool, table, cancel, last_id, true))),
                    Ok(rows) => {
                        let short = rows.len() < DEFAULT_PAGE_SIZE as usize;
                        let next_id = rows.last().map_or(last_id, |r| r.0);
                        let items = rows
                            .into_iter()
                            .map(|(_id, serial, registration_id, order_id, last_notice_sent)| {
                                Serial::parse(serial).map(|serial| IncidentSerial {
                                    serial,
                                    registration_id,
                                    order_id,
                                    last_notice_sent,
                                })
                            })
                            .collect::<Vec<_>>();
                        Some((items, (pool, table, cancel, next_id, short)))
                    }
                }
            },
        ))
        .flat_map(stream::iter)
        .boxed()
    }

    fn serials_by_registration(
        &self,
        cancel: CancellationToken,
        registration_id: i64,
    ) -> BoxStream<'static, Result<Serial>> {
        let pool = self.pool.clone();
        Box::pin(stream::unfold(
            (pool, cancel, 0i64, false),
            move |(pool, cancel, last_id, done)| async move {
                if done {
                    return None;
                }
                if let Err(e) = check_cancelled(&cancel) {
                    return Some((vec![Err(e)], (pool, cancel, last_id, true)));
                }
                let rows: Result<Vec<(i64, String)>> = sqlx::query_as(
                    "SELECT cs.id, cs.serial FROM certificateStatus cs \
                     JOIN certificates c ON c.serial = cs.serial \
                     WHERE c.registrationID = ? AND cs.status != 'revoked' \
                     AND cs.notAfter > UTC_TIMESTAMP() AND cs.id > ? \
                     ORDER BY cs.id LIMIT ?",
                )
                .bind(registration_id)
                .bind(last_id)
                .bind(DEFAULT_PAGE_SIZE)
                .fetch_all(&pool)
                .await
                .map_err(RevokerError::from);

                match rows {
                    Err(e) => Some((vec![Err(e)], (pool, cancel, last_id, true))),
                    Ok(rows) => {
                        let short = rows.len() < DEFAULT_PAGE_SIZE as usize;
                        let next_id = rows.last().map_or(last_id, |r| r.0);
                        let items =
                            rows.into_iter().map(|(_id, serial)| Serial::parse(serial)).collect::<Vec<_>>();
                        Some((items, (pool, cancel, next_id, short)))
                    }
                }
            },
        ))
        .flat_map(stream::iter)
        .boxed()
    }

    fn revoked_certs_in_window(
        &self,
        cancel: CancellationToken,
        issuer_id: i64,
        not_after_from: DateTime<Utc>,
        not_after_to: DateTime<Utc>,
        revoked_before: DateTime<Utc>,
    ) -> BoxStream<'static, Result<RevokedCertRow>> {
        let pool = self.pool.clone();
        Box::pin(stream::unfold(
            (pool, cancel, 0i64, false),
            move |(pool, cancel, last_id, done)| async move {
                if done {
                    return None;
                }
                if let Err(e) = check_cancelled(&cancel) {
                    return Some((vec![Err(e)], (pool, cancel, last_id, true)));
                }
                let rows: Result<Vec<(i64, String, i64, DateTime<Utc>)>> = sqlx::query_as(
                    "SELECT id, serial, revokedReason, revokedDate FROM certificateStatus \
                     WHERE issuerID = ? AND status = 'revoked' \
                     AND notAfter >= ? AND notAfter < ? AND revokedDate < ? \
                     AND id > ? ORDER BY id LIMIT ?",
                )
                .bind(issuer_id)
                .bind(not_after_from)
                .bind(not_after_to)
                .bind(revoked_before)
                .bind(last_id)
                .bind(DEFAULT_PAGE_SIZE)
                .fetch_all(&pool)
                .await
                .map_err(RevokerError::from);

                match rows {
                    Err(e) => Some((vec![Err(e)], (pool, cancel, last_id, true))),
                    Ok(rows) => {
                        let short = rows.len() < DEFAULT_PAGE_SIZE as usize;
                        let next_id = rows.last().map_or(last_id, |r| r.0);
                        let items = rows
                            .into_iter()
                            .map(|(_id, serial, reason, revoked_at)| {
                                let serial = Serial::parse(serial)?;
                                let reason = RevocationReason::try_from(reason)?;
                                Ok(RevokedCertRow { serial, reason, revoked_at })
                            })
                            .collect::<Vec<_>>();
                        Some((items, (pool, cancel, next_id, short)))
                    }
                }
            },
        ))
        .flat_map(stream::iter)
        .boxed()
    }

    async fn mark_blocked_row_checked(&self, cancel: &CancellationToken, fp: &KeyFingerprint) -> Result<()> {
        check_cancelled(cancel)?;
        sqlx::query("UPDATE blockedKeys SET extantCertificatesChecked = TRUE WHERE keyHash = ?")
            .bind(fp.as_bytes().as_slice())
            .execute(&self.pool)
            .await
            .map_err(RevokerError::from)?;
        Ok(())
    }

    async fn insert_blocked_key(&self, cancel: &CancellationToken, row: NewBlockedKey) -> Result<()> {
        check_cancelled(cancel)?;
        let result = sqlx::query(
            "INSERT INTO blockedKeys (keyHash, added, source, comment, revokedBy, \
             extantCertificatesChecked) VALUES (?, ?, ?, ?, ?, FALSE)",
        )
        .bind(row.fingerprint.as_bytes().as_slice())
        .bind(row.added_at)
        .bind(row.source as i64)
        .bind(row.comment)
        .bind(row.revoked_by)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) => match RevokerError::from(e) {
                RevokerError::Duplicate(_) => Ok(()),
                other => Err(other),
            },
        }
    }

    async fn revoke_status(
        &self,
        cancel: &CancellationToken,
        serial: &Serial,
        reason: RevocationReason,
        revoked_at: DateTime<Utc>,
        ocsp: &[u8],
    ) -> Result<()> {
        check_cancelled(cancel)?;
        let result = sqlx::query(
            "UPDATE certificateStatus SET status = 'revoked', revokedReason = ?, \
             revokedDate = ?, ocspLastUpdated = ?, ocspResponse = ? \
             WHERE serial = ? AND status != 'revoked'",
        )
        .bind(i64::from(reason.code()))
        .bind(revoked_at)
        .bind(revoked_at)
        .bind(ocsp)
        .bind(serial.as_str())
        .execute(&self.pool)
        .await
        .map_err(RevokerError::from)?;

        if result.rows_affected() == 0 {
            return Err(RevokerError::AlreadyRevoked(serial.to_string()));
        }
        Ok(())
    }

    async fn re_revoke_status(
        &self,
        cancel: &CancellationToken,
        serial: &Serial,
        this_update: DateTime<Utc>,
        ocsp: &[u8],
        expected_old_revoked_at: DateTime<Utc>,
    ) -> Result<()> {
        check_cancelled(cancel)?;
        let result = sqlx::query(
            "UPDATE certificateStatus SET revokedReason = ?, ocspLastUpdated = ?, \
             ocspResponse = ? WHERE serial = ? AND status = 'revoked' \
             AND revokedReason != ? AND revokedDate = ?",
        )
        .bind(i64::from(RevocationReason::KeyCompromise.code()))
        .bind(this_update)
        .bind(ocsp)
        .bind(serial.as_str())
        .bind(i64::from(RevocationReason::KeyCompromise.code()))
        .bind(expected_old_revoked_at)
        .execute(&self.pool)
        .await
        .map_err(RevokerError::from)?;

        if result.rows_affected() == 0 {
            return Err(RevokerError::Internal(format!(
                "re-revoke guard matched no row for serial {serial}"
            )));
        }
        Ok(())
    }

    async fn get_blocked_key(&self, cancel: &CancellationToken, fp: &KeyFingerprint) -> Result<BlockedKeyRow> {
        check_cancelled(cancel)?;
        let row = sqlx::query(
            "SELECT keyHash, added, source, comment, revokedBy, extantCertificatesChecked \
             FROM blockedKeys WHERE keyHash = ?",
        )
        .bind(fp.as_bytes().as_slice())
        .fetch_one(&self.pool)
        .await
        .map_err(RevokerError::from)?;
        row_to_blocked_key(&row)
    }

    async fn next_unchecked_blocked_key(&self, cancel: &CancellationToken) -> Result<Option<BlockedKeyRow>> {
        check_cancelled(cancel)?;
        let row = sqlx::query(
            "SELECT keyHash, added, source, comment, revokedBy, extantCertificatesChecked \
             FROM blockedKeys WHERE extantCertificatesChecked = FALSE ORDER BY added LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(RevokerError::from)?;
        row.as_ref().map(row_to_blocked_key).transpose()
    }

    async fn count_unchecked_blocked_keys(&self, cancel: &CancellationToken, limit: i64) -> Result<i64> {
        check_cancelled(cancel)?;
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM (SELECT 1 FROM blockedKeys \
             WHERE extantCertificatesChecked = FALSE LIMIT ?) AS capped",
        )
        .bind(limit)
        .fetch_one(&self.pool)
        .await
        .map_err(RevokerError::from)?;
        row.try_get("n").map_err(RevokerError::from)
    }
}

fn row_to_blocked_key(row: &sqlx::mysql::MySqlRow) -> Result<BlockedKeyRow> {
    let hash: Vec<u8> = row.try_get("keyHash").map_err(RevokerError::from)?;
    let fingerprint_bytes: [u8; 32] = hash
        .try_into()
        .map_err(|_| RevokerError::Internal("keyHash column is not 32 bytes".into()))?;
    let source: i64 = row.try_get("source").map_err(RevokerError::from)?;
    Ok(BlockedKeyRow {
        fingerprint: KeyFingerprint::new(fingerprint_bytes),
        added_at: row.try_get("added").map_err(RevokerError::from)?,
        source: BlockedKeySource::try_from(source)?,
        comment: row.try_get("comment").map_err(RevokerError::from)?,
        revoked_by: row.try_get("revokedBy").map_err(RevokerError::from)?,
        extant_certificates_checked: row
            .try_get("extantCertificatesChecked")
            .map_err(RevokerError::from)?,
    })
}
