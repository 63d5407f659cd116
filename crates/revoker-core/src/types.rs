//! Core data model: the types every other crate in the workspace shares.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RevokerError;

/// The canonical 36-hex-character lowercase string form of a certificate's
/// integer serial. Every external identifier of a certificate uses this
/// form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Serial(String);

impl Serial {
    /// Parse and validate a serial string.
    ///
    /// # Errors
    /// Returns [`RevokerError::BadRequest`] if `s` is not exactly 36
    /// lowercase hex characters.
    pub fn parse(s: impl Into<String>) -> Result<Self, RevokerError> {
        let s = s.into();
        if s.len() != 36 || !s.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()) {
            return Err(RevokerError::BadRequest(format!(
                "invalid serial (want 36 lowercase hex chars): {s}"
            )));
        }
        Ok(Self(s))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Serial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(feature = "sqlx")]
impl sqlx::Type<sqlx::MySql> for Serial {
    fn type_info() -> <sqlx::MySql as sqlx::Database>::TypeInfo {
        <String as sqlx::Type<sqlx::MySql>>::type_info()
    }
}

#[cfg(feature = "sqlx")]
impl<'r> sqlx::Decode<'r, sqlx::MySql> for Serial {
    fn decode(
        value: <sqlx::MySql as sqlx::Database>::ValueRef<'r>,
    ) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let s = <String as sqlx::Decode<sqlx::MySql>>::decode(value)?;
        Ok(Self(s))
    }
}

#[cfg(feature = "sqlx")]
impl<'q> sqlx::Encode<'q, sqlx::MySql> for Serial {
    fn encode_by_ref(
        &self,
        buf: &mut <sqlx::MySql as sqlx::Database>::ArgumentBuffer<'q>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <String as sqlx::Encode<sqlx::MySql>>::encode_by_ref(&self.0, buf)
    }
}

/// A 32-byte digest of the DER-encoded SubjectPublicKeyInfo of a public
/// key (SHA-256). Two certificates share a fingerprint iff they share a
/// public key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyFingerprint(#[serde(with = "hex_bytes_32")] pub [u8; 32]);

impl KeyFingerprint {
    #[must_use]
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for KeyFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

mod hex_bytes_32 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 32], s: S) -> Result<S::Ok, S::Error> {
        let mut out = String::with_capacity(64);
        for b in bytes {
            out.push_str(&format!("{b:02x}"));
        }
        s.serialize_str(&out)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 32], D::Error> {
        let s = String::deserialize(d)?;
        if s.len() != 64 {
            return Err(serde::de::Error::custom("fingerprint must be 64 hex chars"));
        }
        let mut out = [0u8; 32];
        for (i, chunk) in s.as_bytes().chunks(2).enumerate() {
            let hex = std::str::from_utf8(chunk).map_err(serde::de::Error::custom)?;
            out[i] = u8::from_str_radix(hex, 16).map_err(serde::de::Error::custom)?;
        }
        Ok(out)
    }
}

/// Revocation reason code, restricted to the closed set the CA/Browser
/// Forum Baseline Requirements permit. Code 7 and negative codes are
/// invalid; this type cannot represent them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum RevocationReason {
    Unspecified = 0,
    KeyCompromise = 1,
    AffiliationChanged = 3,
    Superseded = 4,
    CessationOfOperation = 5,
    CertificateHold = 6,
    RemoveFromCrl = 8,
    PrivilegeWithdrawn = 9,
    AaCompromise = 10,
}

impl RevocationReason {
    /// All reasons the core accepts, in ascending numeric order.
    pub const ALL: [RevocationReason; 9] = [
        Self::Unspecified,
        Self::KeyCompromise,
        Self::AffiliationChanged,
        Self::Superseded,
        Self::CessationOfOperation,
        Self::CertificateHold,
        Self::RemoveFromCrl,
        Self::PrivilegeWithdrawn,
        Self::AaCompromise,
    ];

    #[must_use]
    pub const fn code(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for RevocationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unspecified => "unspecified",
            Self::KeyCompromise => "keyCompromise",
            Self::AffiliationChanged => "affiliationChanged",
            Self::Superseded => "superseded",
            Self::CessationOfOperation => "cessationOfOperation",
            Self::CertificateHold => "certificateHold",
            Self::RemoveFromCrl => "removeFromCRL",
            Self::PrivilegeWithdrawn => "privilegeWithdrawn",
            Self::AaCompromise => "aACompromise",
        };
        write!(f, "{name}")
    }
}

impl TryFrom<i64> for RevocationReason {
    type Error = RevokerError;

    fn try_from(code: i64) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Self::Unspecified),
            1 => Ok(Self::KeyCompromise),
            3 => Ok(Self::AffiliationChanged),
            4 => Ok(Self::Superseded),
            5 => Ok(Self::CessationOfOperation),
            6 => Ok(Self::CertificateHold),
            8 => Ok(Self::RemoveFromCrl),
            9 => Ok(Self::PrivilegeWithdrawn),
            10 => Ok(Self::AaCompromise),
            _ => Err(RevokerError::BadRequest(format!(
                "invalid revocation reason code: {code}"
            ))),
        }
    }
}

/// Source of a blocked-key insertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum BlockedKeySource {
    Api = 0,
    AdminRevoker = 1,
}

impl TryFrom<i64> for BlockedKeySource {
    type Error = RevokerError;

    fn try_from(v: i64) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(Self::Api),
            1 => Ok(Self::AdminRevoker),
            _ => Err(RevokerError::BadRequest(format!(
                "invalid blocked-key source: {v}"
            ))),
        }
    }
}

/// An immutable certificate record as stored at issuance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateRecord {
    pub serial: Serial,
    pub registration_id: i64,
    pub der: Vec<u8>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub issuer_id: i64,
}

/// Certificate status (the mutable, OCSP-bearing row).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateStatus {
    pub serial: Serial,
    pub is_revoked: bool,
    pub revoked_reason: Option<RevocationReason>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub ocsp_last_updated_at: Option<DateTime<Utc>>,
    pub ocsp_response: Vec<u8>,
    pub not_after: DateTime<Utc>,
    pub is_expired: bool,
    pub issuer_id: i64,
}

impl CertificateStatus {
    #[must_use]
    pub fn is_revoked_as(&self, reason: RevocationReason) -> bool {
        self.is_revoked && self.revoked_reason == Some(reason)
    }
}

/// One row of the key-hash-to-serial index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialNotAfter {
    pub serial: Serial,
    pub not_after: DateTime<Utc>,
}

/// A blocked-key row. Once inserted, never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockedKeyRow {
    pub fingerprint: KeyFingerprint,
    pub added_at: DateTime<Utc>,
    pub source: BlockedKeySource,
    pub comment: String,
    pub revoked_by: i64,
    pub extant_certificates_checked: bool,
}

/// A new blocked-key row to insert.
#[derive(Debug, Clone)]
pub struct NewBlockedKey {
    pub fingerprint: KeyFingerprint,
    pub added_at: DateTime<Utc>,
    pub source: BlockedKeySource,
    pub comment: String,
    pub revoked_by: i64,
}

/// A registration (subscriber account).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Registration {
    pub id: i64,
    /// Contact URIs, e.g. `mailto:alice@example.com`.
    pub contacts: Vec<String>,
}

impl Registration {
    /// Contacts with the `mailto:` prefix stripped. An empty list becomes
    /// a single empty-string placeholder so the owning certificate is not
    /// dropped from downstream fan-out.
    #[must_use]
    pub fn email_addresses(&self) -> Vec<String> {
        let addrs: Vec<String> = self
            .contacts
            .iter()
            .filter_map(|c| c.strip_prefix("mailto:").map(str::to_string))
            .collect();
        if addrs.is_empty() {
            vec![String::new()]
        } else {
            addrs
        }
    }
}

/// One row streamed from an incident table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentSerial {
    pub serial: Serial,
    pub registration_id: i64,
    pub order_id: i64,
    pub last_notice_sent: Option<DateTime<Utc>>,
}

/// One row streamed by `revokedCertsInWindow`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevokedCertRow {
    pub serial: Serial,
    pub reason: RevocationReason,
    pub revoked_at: DateTime<Utc>,
}
