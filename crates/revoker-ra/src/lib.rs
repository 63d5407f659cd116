//! gRPC-shaped clients for the two external collaborators the revocation
//! core calls out to: the Registration Authority (the one RPC that
//! actually flips a certificate's status) and the Storage Authority (the
//! slice of row-level reads and the blocked-key write that live behind
//! its own service rather than the core's direct MySQL pool).
//!
//! Both are exposed as `async_trait`s so the engine, the admin drivers,
//! and the bad-key worker depend on a trait object, never on `tonic`
//! directly — the same shape `i1-providers::Provider` puts in front of
//! its HTTP-backed implementations.

mod convert;
mod pb;
mod ra_client;
mod sa_client;

pub use ra_client::{CertRef, GrpcRegistrationAuthorityClient, RegistrationAuthorityClient};
pub use sa_client::{GrpcStorageAuthorityClient, StorageAuthorityClient};
