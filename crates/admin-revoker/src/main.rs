//! admin-revoker - operator tool for certificate revocation and
//! private-key blocking.

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    admin_revoker::init_logging();
    admin_revoker::run().await
}
