//! Bearer token issuance and verification (EdDSA JWS, `kid`-addressed keys).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, Header, Validation, decode, decode_header, encode};
use thiserror::Error;
use tracing::debug;

use keygate_core::ErrorCategory;

use crate::claims::{Claims, validate_claims};
use crate::keystore::KeyStore;

/// The only signing algorithm issued or accepted.
pub const ALGORITHM: Algorithm = Algorithm::EdDSA;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    /// Any structural, cryptographic or temporal verification failure.
    ///
    /// The cause is intentionally not carried.
    #[error("invalid token")]
    Invalid,

    /// The service could not sign (server-side fault).
    #[error("token signing failed: {0}")]
    Signing(String),
}

impl TokenError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            TokenError::Invalid => ErrorCategory::Unauthenticated,
            TokenError::Signing(_) => ErrorCategory::Persistence,
        }
    }
}

/// Signs claims with the current key and verifies tokens against any key
/// still present in the [`KeyStore`].
///
/// Tokens cannot be revoked individually; retiring a key invalidates every
/// token signed under it.
#[derive(Debug, Clone)]
pub struct TokenService {
    keys: Arc<KeyStore>,
    issuer: String,
}

impl TokenService {
    pub fn new(keys: Arc<KeyStore>, issuer: impl Into<String>) -> Self {
        Self {
            keys,
            issuer: issuer.into(),
        }
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn keys(&self) -> &Arc<KeyStore> {
        &self.keys
    }

    /// Sign `claims` into a compact token under the current key.
    pub fn issue(&self, claims: &Claims) -> Result<String, TokenError> {
        let entry = self.keys.current();

        let mut header = Header::new(ALGORITHM);
        header.kid = Some(entry.kid().to_string());

        encode(&header, claims, entry.encoding_key()).map_err(|e| TokenError::Signing(e.to_string()))
    }

    /// Verify `token` and return its claims.
    ///
    /// Every failure is reported as [`TokenError::Invalid`]; the specific
    /// reason only reaches the debug log.
    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<Claims, TokenError> {
        let header = decode_header(token).map_err(|e| reject("malformed header", &e))?;

        if header.alg != ALGORITHM {
            return Err(reject("unexpected algorithm", &format!("{:?}", header.alg)));
        }
        let kid = header.kid.ok_or_else(|| reject("missing kid", &""))?;

        let entry = self.keys.entry(&kid).map_err(|e| reject("key lookup", &e))?;
        if !entry.is_usable_at(now) {
            return Err(reject("key past its verification window", &kid));
        }

        let mut validation = Validation::new(ALGORITHM);
        validation.leeway = 0;
        validation.validate_aud = false;
        validation.set_issuer(&[&self.issuer]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);

        let data = decode::<Claims>(token, entry.decoding_key(), &validation)
            .map_err(|e| reject("signature or claims", &e))?;

        validate_claims(&data.claims, now).map_err(|e| reject("time window", &e))?;

        Ok(data.claims)
    }
}

fn reject(stage: &str, detail: &dyn core::fmt::Display) -> TokenError {
    debug!(stage, detail = %detail, "token rejected");
    TokenError::Invalid
}
