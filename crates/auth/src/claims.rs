use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::Role;

/// Issuer stamped into every token unless configured otherwise.
pub const DEFAULT_ISSUER: &str = "keygate";

/// Claims carried inside a bearer token.
///
/// This is a closed structure: a payload with extra fields fails to decode,
/// so nothing unexpected can reach an authorization decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Claims {
    /// Subject: the identity id.
    pub sub: String,

    /// Issuing service name.
    pub iss: String,

    /// Roles granted to the subject.
    pub roles: Vec<Role>,

    /// Issued-at (UNIX seconds).
    pub iat: i64,

    /// Expiration (UNIX seconds).
    pub exp: i64,
}

impl Claims {
    /// Build claims valid for `ttl` starting at `now`.
    ///
    /// `now` is captured once by the caller so `iat` and `exp` cannot skew.
    pub fn new(
        subject: impl Into<String>,
        issuer: impl Into<String>,
        roles: Vec<Role>,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        Self {
            sub: subject.into(),
            iss: issuer.into(),
            roles,
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
        }
    }

    pub fn has_role(&self, role: &Role) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    pub fn issued_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.iat, 0)
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.exp, 0)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenValidationError {
    #[error("token has expired")]
    Expired,

    #[error("token not yet valid (issued_at is in the future)")]
    NotYetValid,

    #[error("invalid token time window (expires_at <= issued_at)")]
    InvalidTimeWindow,
}

/// Deterministically validate the claims time window against `now`.
///
/// Signature verification happens in [`crate::TokenService`]; this checks the
/// claims only.
pub fn validate_claims(claims: &Claims, now: DateTime<Utc>) -> Result<(), TokenValidationError> {
    let now = now.timestamp();
    if claims.exp <= claims.iat {
        return Err(TokenValidationError::InvalidTimeWindow);
    }
    if now < claims.iat {
        return Err(TokenValidationError::NotYetValid);
    }
    if now >= claims.exp {
        return Err(TokenValidationError::Expired);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims_at(now: DateTime<Utc>) -> Claims {
        Claims::new("subject", DEFAULT_ISSUER, vec![Role::USER], now, Duration::hours(1))
    }

    #[test]
    fn window_is_one_ttl_wide() {
        let now = Utc::now();
        let claims = claims_at(now);
        assert_eq!(claims.exp - claims.iat, 3600);
        assert!(validate_claims(&claims, now).is_ok());
    }

    #[test]
    fn expired_and_future_tokens_rejected() {
        let now = Utc::now();
        let claims = claims_at(now);

        assert_eq!(
            validate_claims(&claims, now + Duration::hours(2)),
            Err(TokenValidationError::Expired)
        );
        assert_eq!(
            validate_claims(&claims, now - Duration::minutes(5)),
            Err(TokenValidationError::NotYetValid)
        );
    }

    #[test]
    fn inverted_window_rejected() {
        let now = Utc::now();
        let mut claims = claims_at(now);
        claims.exp = claims.iat;
        assert_eq!(
            validate_claims(&claims, now),
            Err(TokenValidationError::InvalidTimeWindow)
        );
    }

    #[test]
    fn unknown_fields_do_not_decode() {
        let json = r#"{"sub":"a","iss":"keygate","roles":["user"],"iat":1,"exp":2,"admin":true}"#;
        assert!(serde_json::from_str::<Claims>(json).is_err());
    }
}
