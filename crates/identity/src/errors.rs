use thiserror::Error;

use keygate_core::{ErrorCategory, FieldErrors};

use crate::store::StoreError;

/// Failure of an identity operation.
///
/// The API layer branches on [`IdentityError::category`] only.
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error(transparent)]
    Validation(#[from] FieldErrors),

    #[error("identity not found")]
    NotFound,

    #[error("email is already in use")]
    EmailInUse,

    #[error("identity is already confirmed")]
    AlreadyConfirmed,

    #[error("confirmation code does not match")]
    CodeMismatch,

    /// Same variant for unknown email, unconfirmed identity and bad password.
    #[error("authentication failed")]
    AuthenticationFailed,

    #[error("persistence failure: {0}")]
    Persistence(String),

    /// The notifier could not hand the code over.
    #[error("code delivery failed: {0}")]
    Delivery(String),
}

impl IdentityError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            IdentityError::Validation(_) | IdentityError::CodeMismatch => ErrorCategory::Validation,
            IdentityError::NotFound => ErrorCategory::NotFound,
            IdentityError::EmailInUse | IdentityError::AlreadyConfirmed => ErrorCategory::Conflict,
            IdentityError::AuthenticationFailed => ErrorCategory::Unauthenticated,
            IdentityError::Persistence(_) | IdentityError::Delivery(_) => ErrorCategory::Persistence,
        }
    }
}

impl From<StoreError> for IdentityError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => IdentityError::NotFound,
            StoreError::Duplicate(_) => IdentityError::EmailInUse,
            StoreError::Backend(msg) => IdentityError::Persistence(msg),
        }
    }
}
