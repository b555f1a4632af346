//! Identity lifecycle: registration, confirmation, authentication and admin
//! maintenance.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::instrument;

use keygate_auth::{Claims, DEFAULT_ISSUER};
use keygate_core::UserId;

use crate::code::ConfirmationCode;
use crate::errors::IdentityError;
use crate::identity::{Confirmation, Identity, IdentityPatch, NewIdentity, dedup_roles};
use crate::notify::ConfirmationNotifier;
use crate::password::PasswordHasher;
use crate::store::{CredentialStore, StoreError};
use crate::validate;

pub const DEFAULT_TOKEN_TTL_SECS: i64 = 3600;

/// Entry point for every identity operation.
///
/// Cheap to clone; all state sits behind `Arc`s.
#[derive(Clone)]
pub struct IdentityCore {
    store: Arc<dyn CredentialStore>,
    notifier: Arc<dyn ConfirmationNotifier>,
    hasher: PasswordHasher,
    issuer: String,
    token_ttl: Duration,
}

impl IdentityCore {
    pub fn new(store: Arc<dyn CredentialStore>, notifier: Arc<dyn ConfirmationNotifier>) -> Self {
        Self {
            store,
            notifier,
            hasher: PasswordHasher::default(),
            issuer: DEFAULT_ISSUER.to_string(),
            token_ttl: Duration::seconds(DEFAULT_TOKEN_TTL_SECS),
        }
    }

    pub fn with_hasher(mut self, hasher: PasswordHasher) -> Self {
        self.hasher = hasher;
        self
    }

    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = issuer.into();
        self
    }

    pub fn with_token_ttl(mut self, ttl: Duration) -> Self {
        self.token_ttl = ttl;
        self
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn token_ttl(&self) -> Duration {
        self.token_ttl
    }

    /// Register a new, unconfirmed identity and send its confirmation code.
    ///
    /// The notifier runs after commit; its failure is logged and swallowed.
    #[instrument(skip(self, new), fields(email = %new.email), err)]
    pub async fn register(&self, new: NewIdentity, now: DateTime<Utc>) -> Result<Identity, IdentityError> {
        validate::check_new(&new)?;

        let password_hash = self.hasher.hash(&new.password).await?;
        let code = ConfirmationCode::generate();

        let identity = Identity {
            id: UserId::new(),
            name: new.name,
            email: new.email,
            password_hash,
            roles: dedup_roles(new.roles),
            confirmation: Confirmation::Pending(code),
            date_created: now,
            date_updated: now,
        };

        let mut tx = self.store.begin().await?;
        tx.create(&identity).await?;
        tx.commit().await?;

        if let Err(e) = self.notifier.send_code(&identity.email, code).await {
            tracing::warn!(user_id = %identity.id, error = %e, "confirmation code delivery failed");
        }

        tracing::info!(user_id = %identity.id, "identity registered");
        Ok(identity)
    }

    /// Confirm ownership of `email` with the code it was sent.
    ///
    /// A wrong code leaves the stored code untouched.
    #[instrument(skip(self, code), fields(email = %email), err)]
    pub async fn confirm(&self, email: &str, code: u32, now: DateTime<Utc>) -> Result<(), IdentityError> {
        validate::check_email(email)?;

        let mut tx = self.store.begin().await?;
        let mut identity = tx.query_by_email(email).await?;

        match identity.confirmation {
            Confirmation::Confirmed => return Err(IdentityError::AlreadyConfirmed),
            Confirmation::Pending(expected) if !expected.matches(code) => {
                return Err(IdentityError::CodeMismatch);
            }
            Confirmation::Pending(_) => {}
        }

        identity.confirmation = Confirmation::Confirmed;
        identity.date_updated = now;
        tx.update(&identity).await?;
        tx.commit().await?;

        tracing::info!(user_id = %identity.id, "identity confirmed");
        Ok(())
    }

    /// Deliver the pending code of `id` again. The code itself does not change.
    ///
    /// Unlike registration, a delivery failure is reported to the caller.
    #[instrument(skip(self), fields(user_id = %id), err)]
    pub async fn resend_code(&self, id: UserId) -> Result<(), IdentityError> {
        let identity = self.store.query_by_id(id).await?;
        let Some(code) = identity.confirmation.code() else {
            return Err(IdentityError::AlreadyConfirmed);
        };

        self.notifier
            .send_code(&identity.email, code)
            .await
            .map_err(|e| IdentityError::Delivery(e.to_string()))?;

        tracing::info!(user_id = %id, "confirmation code re-sent");
        Ok(())
    }

    /// Check credentials and build claims for a token.
    ///
    /// Every rejection reason surfaces as [`IdentityError::AuthenticationFailed`].
    #[instrument(skip(self, password), fields(email = %email), err)]
    pub async fn authenticate(
        &self,
        email: &str,
        password: &str,
        now: DateTime<Utc>,
    ) -> Result<Claims, IdentityError> {
        let identity = match self.store.query_by_email(email).await {
            Ok(identity) => Some(identity),
            Err(StoreError::NotFound) => None,
            Err(e) => return Err(e.into()),
        };

        // One bcrypt verification runs on every path so rejections cost the same.
        let password_ok = self
            .hasher
            .verify_or_decoy(password, identity.as_ref().map(|i| &i.password_hash))
            .await?;

        let identity = match identity {
            None => {
                tracing::debug!(reason = "unknown email", "authentication rejected");
                return Err(IdentityError::AuthenticationFailed);
            }
            Some(identity) if !identity.is_confirmed() => {
                tracing::debug!(user_id = %identity.id, reason = "unconfirmed", "authentication rejected");
                return Err(IdentityError::AuthenticationFailed);
            }
            Some(identity) if !password_ok => {
                tracing::debug!(user_id = %identity.id, reason = "password mismatch", "authentication rejected");
                return Err(IdentityError::AuthenticationFailed);
            }
            Some(identity) => identity,
        };

        Ok(Claims::new(
            identity.id.to_string(),
            self.issuer.clone(),
            identity.roles,
            now,
            self.token_ttl,
        ))
    }

    /// Apply a merge-patch; only `Some` fields change.
    #[instrument(skip(self, patch), fields(user_id = %id), err)]
    pub async fn update(&self, id: UserId, patch: IdentityPatch, now: DateTime<Utc>) -> Result<Identity, IdentityError> {
        validate::check_patch(&patch)?;

        let password_hash = match &patch.password {
            Some(password) => Some(self.hasher.hash(password).await?),
            None => None,
        };

        let mut tx = self.store.begin().await?;
        let mut identity = tx.query_by_id(id).await?;

        if let Some(name) = patch.name {
            identity.name = name;
        }
        if let Some(email) = patch.email {
            identity.email = email;
        }
        if let Some(roles) = patch.roles {
            identity.roles = dedup_roles(roles);
        }
        if let Some(hash) = password_hash {
            identity.password_hash = hash;
        }
        identity.date_updated = now;

        tx.update(&identity).await?;
        tx.commit().await?;

        Ok(identity)
    }

    #[instrument(skip(self), fields(user_id = %id), err)]
    pub async fn delete(&self, id: UserId) -> Result<(), IdentityError> {
        let mut tx = self.store.begin().await?;
        tx.delete(id).await?;
        tx.commit().await?;

        tracing::info!(user_id = %id, "identity deleted");
        Ok(())
    }

    #[instrument(skip(self), err)]
    pub async fn query(&self, page: u32, rows_per_page: u32) -> Result<Vec<Identity>, IdentityError> {
        validate::check_page(page, rows_per_page)?;
        Ok(self.store.query(page, rows_per_page).await?)
    }

    #[instrument(skip(self), fields(user_id = %id), err)]
    pub async fn query_by_id(&self, id: UserId) -> Result<Identity, IdentityError> {
        Ok(self.store.query_by_id(id).await?)
    }

    #[instrument(skip(self), err)]
    pub async fn query_by_email(&self, email: &str) -> Result<Identity, IdentityError> {
        validate::check_email(email)?;
        Ok(self.store.query_by_email(email).await?)
    }
}

impl core::fmt::Debug for IdentityCore {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("IdentityCore")
            .field("hasher", &self.hasher)
            .field("issuer", &self.issuer)
            .field("token_ttl", &self.token_ttl)
            .finish_non_exhaustive()
    }
}
