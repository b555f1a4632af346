//! Password hashing (bcrypt, fixed cost per process).
//!
//! bcrypt is deliberately slow, so both hashing and verification run on the
//! blocking pool.

use bcrypt::DEFAULT_COST;

use crate::errors::IdentityError;

/// Bytes bcrypt actually consumes; anything longer would be silently cut.
pub const MAX_PASSWORD_BYTES: usize = 72;

/// Salt and digest of a well-formed bcrypt hash; prefixed with the hasher's
/// cost to build the decoy used when there is no stored hash to check.
const DECOY_SALT_AND_DIGEST: &str = "R9h/cIPz0gi.URNNX3kh2OPST9/PgBkqquzi.Ss7KIUgO2t0jWMUW";

/// A stored bcrypt hash. Never rendered in `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct PasswordHash(String);

impl PasswordHash {
    pub fn from_stored(hash: impl Into<String>) -> Self {
        Self(hash.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Debug for PasswordHash {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("PasswordHash(<redacted>)")
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PasswordHasher {
    cost: u32,
}

impl Default for PasswordHasher {
    fn default() -> Self {
        Self { cost: DEFAULT_COST }
    }
}

impl PasswordHasher {
    pub fn new(cost: u32) -> Self {
        Self { cost }
    }

    pub fn cost(&self) -> u32 {
        self.cost
    }

    pub async fn hash(&self, password: &str) -> Result<PasswordHash, IdentityError> {
        let cost = self.cost;
        let password = password.to_owned();
        let hashed = tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
            .await
            .map_err(|e| IdentityError::Persistence(format!("hashing task failed: {e}")))?
            .map_err(|e| IdentityError::Persistence(format!("generating password hash: {e}")))?;
        Ok(PasswordHash(hashed))
    }

    /// Constant-time comparison of `password` against `hash`.
    ///
    /// A malformed stored hash is a store fault, not a mismatch.
    pub async fn verify(&self, password: &str, hash: &PasswordHash) -> Result<bool, IdentityError> {
        let password = password.to_owned();
        let hash = hash.0.clone();
        tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
            .await
            .map_err(|e| IdentityError::Persistence(format!("verification task failed: {e}")))?
            .map_err(|e| IdentityError::Persistence(format!("verifying password hash: {e}")))
    }

    /// Verify against `hash`, or against a decoy at the same cost when there
    /// is none. The decoy path always yields `false`.
    pub async fn verify_or_decoy(
        &self,
        password: &str,
        hash: Option<&PasswordHash>,
    ) -> Result<bool, IdentityError> {
        match hash {
            Some(hash) => self.verify(password, hash).await,
            None => {
                self.verify(password, &self.decoy_hash()).await?;
                Ok(false)
            }
        }
    }

    fn decoy_hash(&self) -> PasswordHash {
        PasswordHash(format!("$2b${:02}${DECOY_SALT_AND_DIGEST}", self.cost))
    }
}
