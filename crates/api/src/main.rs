use std::sync::Arc;

use anyhow::Context;

use keygate_api::config::Config;
use keygate_auth::TokenService;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    keygate_observability::init();

    let config = Config::from_env()?;
    let services = keygate_api::app::services::build_services(&config).await?;

    #[cfg(unix)]
    spawn_key_reload(&config, services.tokens.clone())?;

    let app = keygate_api::app::build_app(services);

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}

/// Re-read the key directory on SIGHUP. A failed reload keeps the old set.
#[cfg(unix)]
fn spawn_key_reload(config: &Config, tokens: Arc<TokenService>) -> anyhow::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let Some(dir) = config.keys_dir.clone() else {
        return Ok(());
    };
    let active_kid = config.active_kid.clone();
    let mut hangups = signal(SignalKind::hangup()).context("installing SIGHUP handler")?;

    tokio::spawn(async move {
        while hangups.recv().await.is_some() {
            match tokens.keys().reload_from_pem_dir(&dir, active_kid.as_deref()) {
                Ok(()) => tracing::info!(dir = %dir.display(), "signing keys reloaded"),
                Err(e) => tracing::error!(error = %e, "signing key reload failed; keeping current keys"),
            }
        }
    });
    Ok(())
}
