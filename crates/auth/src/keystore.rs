//! Signing key store with whole-set rotation.
//!
//! The active key set is an immutable [`KeySet`] snapshot held behind an
//! [`ArcSwap`]. Verifiers take one snapshot per lookup; rotation publishes a
//! complete replacement set in a single store. Entries are never edited in
//! place.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use ed25519_dalek::SigningKey;
use ed25519_dalek::pkcs8::{DecodePrivateKey, EncodePrivateKey};
use jsonwebtoken::{DecodingKey, EncodingKey};
use rand::rngs::OsRng;
use thiserror::Error;
use tracing::{info, warn};

/// Opaque identifier of a signing key, carried as `kid` in token headers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyId(String);

impl KeyId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for KeyId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for KeyId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Error)]
pub enum KeyStoreError {
    #[error("unknown signing key '{0}'")]
    UnknownKey(String),

    #[error("key set is empty")]
    Empty,

    #[error("current signing key '{0}' cannot be retired")]
    RetireCurrent(String),

    #[error("invalid key material for '{kid}': {reason}")]
    InvalidKey { kid: String, reason: String },

    #[error("reading key material from {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// One signing key pair plus the optional end of its verification window.
#[derive(Clone)]
pub struct KeyEntry {
    kid: KeyId,
    encoding: EncodingKey,
    decoding: DecodingKey,
    public_key: [u8; 32],
    not_after: Option<DateTime<Utc>>,
}

impl KeyEntry {
    pub fn from_signing_key(kid: impl Into<KeyId>, signing_key: &SigningKey) -> Result<Self, KeyStoreError> {
        let kid = kid.into();
        let public_key = signing_key.verifying_key().to_bytes();

        let invalid = |reason: String| KeyStoreError::InvalidKey {
            kid: kid.to_string(),
            reason,
        };

        let pkcs8_der = signing_key.to_pkcs8_der().map_err(|e| invalid(e.to_string()))?;
        let encoding = EncodingKey::from_ed_der(pkcs8_der.as_bytes());

        let decoding = DecodingKey::from_ed_components(&URL_SAFE_NO_PAD.encode(public_key))
            .map_err(|e| invalid(e.to_string()))?;

        Ok(Self {
            kid,
            encoding,
            decoding,
            public_key,
            not_after: None,
        })
    }

    /// Fresh key from the OS CSPRNG.
    pub fn generate(kid: impl Into<KeyId>) -> Result<Self, KeyStoreError> {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self::from_signing_key(kid, &signing_key)
    }

    /// Parse a PKCS#8 PEM-encoded Ed25519 private key.
    pub fn from_pkcs8_pem(kid: impl Into<KeyId>, pem: &str) -> Result<Self, KeyStoreError> {
        let kid = kid.into();
        let signing_key = SigningKey::from_pkcs8_pem(pem).map_err(|e| KeyStoreError::InvalidKey {
            kid: kid.to_string(),
            reason: e.to_string(),
        })?;
        Self::from_signing_key(kid, &signing_key)
    }

    /// Stop accepting this key for verification after `at`.
    pub fn with_not_after(mut self, at: DateTime<Utc>) -> Self {
        self.not_after = Some(at);
        self
    }

    pub fn kid(&self) -> &KeyId {
        &self.kid
    }

    pub fn encoding_key(&self) -> &EncodingKey {
        &self.encoding
    }

    pub fn decoding_key(&self) -> &DecodingKey {
        &self.decoding
    }

    pub fn public_key_bytes(&self) -> &[u8; 32] {
        &self.public_key
    }

    pub fn not_after(&self) -> Option<DateTime<Utc>> {
        self.not_after
    }

    pub fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
        self.not_after.is_none_or(|end| now < end)
    }
}

impl core::fmt::Debug for KeyEntry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("KeyEntry")
            .field("kid", &self.kid)
            .field("public_key", &URL_SAFE_NO_PAD.encode(self.public_key))
            .field("not_after", &self.not_after)
            .finish_non_exhaustive()
    }
}

/// Immutable set of signing keys with exactly one designated as current.
#[derive(Debug, Clone)]
pub struct KeySet {
    current: KeyId,
    keys: BTreeMap<KeyId, Arc<KeyEntry>>,
}

impl KeySet {
    pub fn builder() -> KeySetBuilder {
        KeySetBuilder::default()
    }

    /// Single freshly generated key (dev/test).
    pub fn generate(kid: impl Into<KeyId>) -> Result<Self, KeyStoreError> {
        Self::builder().with_entry(KeyEntry::generate(kid)?).build()
    }

    /// Load every `<kid>.pem` file in `dir`.
    ///
    /// When `current` is `None` the greatest key id becomes current, so naming
    /// keys by date or sequence gives the newest key.
    pub fn from_pem_dir(dir: impl AsRef<Path>, current: Option<&str>) -> Result<Self, KeyStoreError> {
        let dir = dir.as_ref();
        let io_err = |source| KeyStoreError::Io {
            path: dir.to_path_buf(),
            source,
        };

        let mut builder = Self::builder();
        for dirent in std::fs::read_dir(dir).map_err(io_err)? {
            let path = dirent.map_err(io_err)?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("pem") {
                continue;
            }
            let Some(kid) = path.file_stem().and_then(|s| s.to_str()) else {
                warn!(path = %path.display(), "skipping key file with non-UTF-8 name");
                continue;
            };

            let pem = std::fs::read_to_string(&path).map_err(|source| KeyStoreError::Io {
                path: path.clone(),
                source,
            })?;
            builder = builder.with_entry(KeyEntry::from_pkcs8_pem(kid, &pem)?);
        }

        if let Some(current) = current {
            builder = builder.current(current);
        }
        let set = builder.build()?;
        info!(dir = %dir.display(), keys = set.len(), current = %set.current_id(), "loaded signing keys");
        Ok(set)
    }

    pub fn current_id(&self) -> &KeyId {
        &self.current
    }

    pub fn current(&self) -> &Arc<KeyEntry> {
        // `build` guarantees the current id is present.
        &self.keys[&self.current]
    }

    pub fn get(&self, kid: &str) -> Option<&Arc<KeyEntry>> {
        self.keys.get(&KeyId::from(kid))
    }

    pub fn key_ids(&self) -> impl Iterator<Item = &KeyId> {
        self.keys.keys()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Builder seeded with this set's entries and current id.
    pub fn to_builder(&self) -> KeySetBuilder {
        KeySetBuilder {
            current: Some(self.current.clone()),
            keys: self.keys.clone(),
        }
    }
}

#[derive(Debug, Default)]
pub struct KeySetBuilder {
    current: Option<KeyId>,
    keys: BTreeMap<KeyId, Arc<KeyEntry>>,
}

impl KeySetBuilder {
    pub fn with_entry(mut self, entry: KeyEntry) -> Self {
        self.keys.insert(entry.kid().clone(), Arc::new(entry));
        self
    }

    pub fn without(mut self, kid: &str) -> Self {
        self.keys.remove(&KeyId::from(kid));
        self
    }

    pub fn current(mut self, kid: impl Into<KeyId>) -> Self {
        self.current = Some(kid.into());
        self
    }

    pub fn build(self) -> Result<KeySet, KeyStoreError> {
        let current = match self.current {
            Some(kid) => kid,
            None => self.keys.keys().next_back().cloned().ok_or(KeyStoreError::Empty)?,
        };
        if !self.keys.contains_key(&current) {
            return Err(KeyStoreError::UnknownKey(current.to_string()));
        }
        Ok(KeySet {
            current,
            keys: self.keys,
        })
    }
}

/// Process-wide signing key store.
#[derive(Debug)]
pub struct KeyStore {
    set: ArcSwap<KeySet>,
}

impl KeyStore {
    pub fn new(set: KeySet) -> Self {
        Self {
            set: ArcSwap::from_pointee(set),
        }
    }

    /// Consistent view of the whole key set.
    pub fn snapshot(&self) -> Arc<KeySet> {
        self.set.load_full()
    }

    pub fn current(&self) -> Arc<KeyEntry> {
        self.set.load().current().clone()
    }

    pub fn entry(&self, kid: &str) -> Result<Arc<KeyEntry>, KeyStoreError> {
        self.set
            .load()
            .get(kid)
            .cloned()
            .ok_or_else(|| KeyStoreError::UnknownKey(kid.to_string()))
    }

    /// Private signing key for `kid`.
    pub fn key(&self, kid: &str) -> Result<EncodingKey, KeyStoreError> {
        Ok(self.entry(kid)?.encoding_key().clone())
    }

    /// Public verification key for `kid`.
    pub fn public_key(&self, kid: &str) -> Result<DecodingKey, KeyStoreError> {
        Ok(self.entry(kid)?.decoding_key().clone())
    }

    /// Replace the whole key set.
    pub fn rotate(&self, set: KeySet) {
        info!(current = %set.current_id(), keys = set.len(), "rotating signing key set");
        self.set.store(Arc::new(set));
    }

    /// Drop `kid` from the set; tokens signed under it stop verifying.
    pub fn retire(&self, kid: &str) -> Result<(), KeyStoreError> {
        let mut outcome = Ok(());
        self.set.rcu(|set| {
            if set.current_id().as_str() == kid {
                outcome = Err(KeyStoreError::RetireCurrent(kid.to_string()));
                return set.clone();
            }
            if set.get(kid).is_none() {
                outcome = Err(KeyStoreError::UnknownKey(kid.to_string()));
                return set.clone();
            }
            outcome = Ok(());
            let keys = set
                .keys
                .iter()
                .filter(|(k, _)| k.as_str() != kid)
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            Arc::new(KeySet {
                current: set.current.clone(),
                keys,
            })
        });
        if outcome.is_ok() {
            info!(kid, "retired signing key");
        }
        outcome
    }

    /// Reload from a PEM directory and swap the result in.
    pub fn reload_from_pem_dir(&self, dir: impl AsRef<Path>, current: Option<&str>) -> Result<(), KeyStoreError> {
        let set = KeySet::from_pem_dir(dir, current)?;
        self.rotate(set);
        Ok(())
    }
}
