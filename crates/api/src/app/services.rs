use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;

use keygate_auth::{KeySet, KeyStore, TokenService};
use keygate_identity::{
    ConfirmationNotifier, CredentialStore, IdentityCore, LogNotifier, PasswordHasher,
};
use keygate_infra::{InMemoryCredentialStore, PostgresCredentialStore, WebhookNotifier};

use crate::config::Config;

/// Kid used for the throwaway key when no key directory is configured.
pub const EPHEMERAL_KID: &str = "ephemeral";

#[derive(Clone)]
pub struct AppServices {
    pub identity: IdentityCore,
    pub tokens: Arc<TokenService>,
}

impl AppServices {
    pub fn new(identity: IdentityCore, tokens: Arc<TokenService>) -> Self {
        Self { identity, tokens }
    }

    /// In-memory store with the given notifier; used by tests and local runs.
    pub fn in_memory(
        keys: KeySet,
        notifier: Arc<dyn ConfirmationNotifier>,
        hasher: PasswordHasher,
    ) -> Self {
        let tokens = Arc::new(TokenService::new(
            Arc::new(KeyStore::new(keys)),
            keygate_auth::DEFAULT_ISSUER,
        ));
        let identity = IdentityCore::new(Arc::new(InMemoryCredentialStore::new()), notifier)
            .with_hasher(hasher)
            .with_issuer(tokens.issuer());
        Self { identity, tokens }
    }
}

pub fn load_keys(config: &Config) -> anyhow::Result<KeySet> {
    match &config.keys_dir {
        Some(dir) => KeySet::from_pem_dir(dir, config.active_kid.as_deref())
            .with_context(|| format!("loading signing keys from {}", dir.display())),
        None => {
            tracing::warn!(
                "KEYGATE_KEYS_DIR not set; generated an ephemeral signing key, tokens will not survive a restart"
            );
            KeySet::generate(EPHEMERAL_KID).context("generating ephemeral signing key")
        }
    }
}

async fn build_store(config: &Config) -> anyhow::Result<Arc<dyn CredentialStore>> {
    let Some(database_url) = &config.database_url else {
        tracing::info!("using in-memory credential store");
        return Ok(Arc::new(InMemoryCredentialStore::new()));
    };

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
        .context("connecting to Postgres")?;

    let store = PostgresCredentialStore::new(pool);
    store.ensure_schema().await.context("preparing users schema")?;
    tracing::info!("using Postgres credential store");
    Ok(Arc::new(store))
}

fn build_notifier(config: &Config) -> anyhow::Result<Arc<dyn ConfirmationNotifier>> {
    match &config.notify_url {
        Some(url) => {
            let notifier = WebhookNotifier::new(url.clone()).context("building code relay client")?;
            tracing::info!(relay = %url, "confirmation codes go to relay");
            Ok(Arc::new(notifier))
        }
        None => {
            tracing::warn!(
                "KEYGATE_NOTIFY_URL not set; confirmation codes are not delivered anywhere"
            );
            Ok(Arc::new(LogNotifier))
        }
    }
}

pub async fn build_services(config: &Config) -> anyhow::Result<AppServices> {
    let keys = Arc::new(KeyStore::new(load_keys(config)?));
    let tokens = Arc::new(TokenService::new(keys, config.issuer.clone()));

    let store = build_store(config).await?;
    let identity = IdentityCore::new(store, build_notifier(config)?)
        .with_hasher(PasswordHasher::new(config.bcrypt_cost))
        .with_issuer(config.issuer.clone())
        .with_token_ttl(config.token_ttl);

    Ok(AppServices::new(identity, tokens))
}
