//! Key fingerprinting and the single-certificate revocation engine: the
//! "hard math" at the center of the revocation core, kept deliberately
//! small and heavily tested.

mod fingerprint;
mod revocation;

pub use fingerprint::{fingerprint_from_spki_der, PrivateKey};
pub use revocation::{operator_identity, revoke_certificate};
