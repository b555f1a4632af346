//! Process configuration read from the environment.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;

use keygate_auth::DEFAULT_ISSUER;
use keygate_identity::{DEFAULT_TOKEN_TTL_SECS, PasswordHasher};

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind_addr: SocketAddr,
    /// Directory of `<kid>.pem` signing keys. `None` means an ephemeral key.
    pub keys_dir: Option<PathBuf>,
    pub active_kid: Option<String>,
    pub issuer: String,
    pub token_ttl: chrono::Duration,
    pub bcrypt_cost: u32,
    /// Relay that receives confirmation codes. `None` logs issuance only.
    pub notify_url: Option<String>,
    /// Set only when `USE_PERSISTENT_STORES=true`.
    pub database_url: Option<String>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let bind_addr = get("KEYGATE_BIND_ADDR")
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string())
            .parse::<SocketAddr>()
            .context("KEYGATE_BIND_ADDR is not a socket address")?;

        let token_ttl_secs = match get("KEYGATE_TOKEN_TTL_SECS") {
            Some(v) => v.parse::<i64>().context("KEYGATE_TOKEN_TTL_SECS is not an integer")?,
            None => DEFAULT_TOKEN_TTL_SECS,
        };
        if token_ttl_secs <= 0 {
            anyhow::bail!("KEYGATE_TOKEN_TTL_SECS must be positive");
        }

        let bcrypt_cost = match get("KEYGATE_BCRYPT_COST") {
            Some(v) => v.parse::<u32>().context("KEYGATE_BCRYPT_COST is not an integer")?,
            None => PasswordHasher::default().cost(),
        };
        if !(4..=31).contains(&bcrypt_cost) {
            anyhow::bail!("KEYGATE_BCRYPT_COST must be between 4 and 31");
        }

        let use_persistent = get("USE_PERSISTENT_STORES")
            .and_then(|v| v.parse::<bool>().ok())
            .unwrap_or(false);
        let database_url = if use_persistent {
            Some(get("DATABASE_URL").context("DATABASE_URL must be set when USE_PERSISTENT_STORES=true")?)
        } else {
            None
        };

        Ok(Self {
            bind_addr,
            keys_dir: get("KEYGATE_KEYS_DIR").map(PathBuf::from),
            active_kid: get("KEYGATE_ACTIVE_KID"),
            issuer: get("KEYGATE_ISSUER").unwrap_or_else(|| DEFAULT_ISSUER.to_string()),
            token_ttl: chrono::Duration::seconds(token_ttl_secs),
            bcrypt_cost,
            notify_url: get("KEYGATE_NOTIFY_URL"),
            database_url,
        })
    }
}
