#[cfg(not(any(target_os = "macos", unix)))]
compile_error!("Only macos and unix are currently supported");

use parley::{Engine, find_config_file};
use parley_common::{internal, logging};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();

    let config_path = find_config_file()?;
    internal!(level = INFO, "Using configuration {}", config_path.display());

    let gateway = Engine::from_file(&config_path)?.init().await?;

    let mut terminate =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            internal!(level = INFO, "CTRL+C entered, shutting down");
        }
        _ = terminate.recv() => {
            internal!(level = INFO, "Terminate Signal received, shutting down");
        }
    };

    gateway.shutdown();

    Ok(())
}
