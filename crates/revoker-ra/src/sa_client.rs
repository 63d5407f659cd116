use async_trait::async_trait;
use futures_core::stream::BoxStream;
use revoker_core::{CertificateStatus, IncidentSerial, NewBlockedKey, Registration, RevokerError, Serial};
use tonic::transport::Channel;

use crate::convert::{datetime_to_millis, incident_serial_from_proto, status_from_proto};
use crate::pb;

/// The subset of the Storage Authority's surface the core consumes
/// directly over gRPC, rather than through its own MySQL pool: row-level
/// reads that the Storage Authority already caches/serves, and the two
/// writes (`addBlockedKey`) that must go through the Storage Authority so
/// its own invariants (e.g. the unique index on fingerprint) are enforced
/// in one place.
#[async_trait]
pub trait StorageAuthorityClient: Send + Sync {
    async fn get_certificate_status(&self, serial: &Serial) -> Result<CertificateStatus, RevokerError>;
    async fn get_registration(&self, id: i64) -> Result<Registration, RevokerError>;
    async fn add_blocked_key(&self, row: NewBlockedKey) -> Result<(), RevokerError>;
    fn serials_for_incident(&self, table_name: String) -> BoxStream<'static, Result<IncidentSerial, RevokerError>>;
}

/// A `tonic`-backed [`StorageAuthorityClient`].
#[derive(Clone)]
pub struct GrpcStorageAuthorityClient {
    inner: pb::storage_authority_client::StorageAuthorityClient<Channel>,
}

impl GrpcStorageAuthorityClient {
    #[must_use]
    pub fn new(channel: Channel) -> Self {
        Self {
            inner: pb::storage_authority_client::StorageAuthorityClient::new(channel),
        }
    }
}

#[async_trait]
impl StorageAuthorityClient for GrpcStorageAuthorityClient {
    async fn get_certificate_status(&self, serial: &Serial) -> Result<CertificateStatus, RevokerError> {
        let mut client = self.inner.clone();
        let resp = client
            .get_certificate_status(tonic::Request::new(pb::SerialRequest {
                serial: serial.as_str().to_string(),
            }))
            .await?
            .into_inner();
        status_from_proto(resp)
    }

    async fn get_registration(&self, id: i64) -> Result<Registration, RevokerError> {
        let mut client = self.inner.clone();
        let resp = client
            .get_registration(tonic::Request::new(pb::RegistrationIdRequest { id }))
            .await?
            .into_inner();
        Ok(Registration {
            id: resp.id,
            contacts: resp.contacts,
        })
    }

    async fn add_blocked_key(&self, row: NewBlockedKey) -> Result<(), RevokerError> {
        let mut client = self.inner.clone();
        client
            .add_blocked_key(tonic::Request::new(pb::AddBlockedKeyRequest {
                key_hash: row.fingerprint.as_bytes().to_vec(),
                added_unix_millis: datetime_to_millis(row.added_at),
                source: i32::from(row.source as u8),
                comment: row.comment,
                revoked_by: row.revoked_by,
            }))
            .await?;
        Ok(())
    }

    fn serials_for_incident(&self, table_name: String) -> BoxStream<'static, Result<IncidentSerial, RevokerError>> {
        let mut client = self.inner.clone();
        Box::pin(async_stream::try_stream! {
            let mut stream = client
                .serials_for_incident(tonic::Request::new(pb::IncidentTableRequest { table_name }))
                .await?
                .into_inner();
            while let Some(msg) = stream.message().await? {
                yield incident_serial_from_proto(msg)?;
            }
        })
    }
}
