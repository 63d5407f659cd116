use async_trait::async_trait;
use revoker_core::{RevocationReason, RevokerError, Serial};
use tonic::transport::Channel;

use crate::pb;

/// A certificate can be referenced by its full DER, or just by serial when
/// the DER isn't parseable (the malformed-revoke path).
#[derive(Debug, Clone)]
pub enum CertRef {
    Der(Vec<u8>),
    Serial(Serial),
}

/// The Registration Authority's one relevant RPC: perform the authoritative
/// revocation transition.
#[async_trait]
pub trait RegistrationAuthorityClient: Send + Sync {
    async fn administratively_revoke(
        &self,
        cert_ref: CertRef,
        reason: RevocationReason,
        admin_name: &str,
        skip_block_key: bool,
    ) -> Result<(), RevokerError>;
}

/// A `tonic`-backed [`RegistrationAuthorityClient`].
#[derive(Clone)]
pub struct GrpcRegistrationAuthorityClient {
    inner: pb::registration_authority_client::RegistrationAuthorityClient<Channel>,
}

impl GrpcRegistrationAuthorityClient {
    #[must_use]
    pub fn new(channel: Channel) -> Self {
        Self {
            inner: pb::registration_authority_client::RegistrationAuthorityClient::new(channel),
        }
    }
}

#[async_trait]
impl RegistrationAuthorityClient for GrpcRegistrationAuthorityClient {
    async fn administratively_revoke(
        &self,
        cert_ref: CertRef,
        reason: RevocationReason,
        admin_name: &str,
        skip_block_key: bool,
    ) -> Result<(), RevokerError> {
        let target = match cert_ref {
            CertRef::Der(der) => pb::administratively_revoke_request::Target::CertDer(der),
            CertRef::Serial(serial) => {
                pb::administratively_revoke_request::Target::Serial(serial.as_str().to_string())
            }
        };
        let request = pb::AdministrativelyRevokeRequest {
            target: Some(target),
            reason: i32::from(reason.code()),
            admin_name: admin_name.to_string(),
            skip_block_key,
        };

        let mut client = self.inner.clone();
        client
            .administratively_revoke(tonic::Request::new(request))
            .await?;
        Ok(())
    }
}
