//! bad-key-revoker - continuous worker for compromised-key revocation.

use std::path::PathBuf;

use tokio_util::sync::CancellationToken;

fn config_path() -> PathBuf {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "-config" || arg == "--config" {
            if let Some(path) = args.next() {
                return PathBuf::from(path);
            }
        }
    }
    eprintln!("usage: bad-key-revoker -config <path>");
    std::process::exit(2);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    bad_key_revoker::init_logging();

    let config = bad_key_revoker::config::Config::load(&config_path())?;
    let cancel = CancellationToken::new();

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        shutdown.cancel();
    });

    bad_key_revoker::run(config, cancel).await
}
