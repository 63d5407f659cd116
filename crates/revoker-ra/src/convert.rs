//! Conversions between the wire (protobuf) shapes and the domain types in
//! `revoker_core`.

use chrono::{DateTime, TimeZone, Utc};
use revoker_core::{CertificateStatus, IncidentSerial, RevocationReason, RevokerError, Serial};

use crate::pb;

pub fn millis_to_datetime(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis).single().unwrap_or_default()
}

pub fn datetime_to_millis(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

pub fn status_from_proto(msg: pb::CertificateStatusMessage) -> Result<CertificateStatus, RevokerError> {
    let serial = Serial::parse(msg.serial)?;
    let revoked_reason = if msg.is_revoked {
        Some(RevocationReason::try_from(i64::from(msg.revoked_reason))?)
    } else {
        None
    };
    Ok(CertificateStatus {
        serial,
        is_revoked: msg.is_revoked,
        revoked_reason,
        revoked_at: msg.is_revoked.then(|| millis_to_datetime(msg.revoked_at_unix_millis)),
        ocsp_last_updated_at: msg
            .is_revoked
            .then(|| millis_to_datetime(msg.ocsp_last_updated_unix_millis)),
        ocsp_response: msg.ocsp_response,
        not_after: millis_to_datetime(msg.not_after_unix_millis),
        is_expired: msg.is_expired,
        issuer_id: msg.issuer_id,
    })
}

pub fn incident_serial_from_proto(msg: pb::IncidentSerialMessage) -> Result<IncidentSerial, RevokerError> {
    Ok(IncidentSerial {
        serial: Serial::parse(msg.serial)?,
        registration_id: msg.registration_id,
        order_id: msg.order_id,
        last_notice_sent: (msg.last_notice_sent_unix_millis != 0)
            .then(|| millis_to_datetime(msg.last_notice_sent_unix_millis)),
    })
}
