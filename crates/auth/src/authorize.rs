use thiserror::Error;

use keygate_core::ErrorCategory;

use crate::{Claims, Role};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("forbidden: missing role '{0}'")]
    MissingRole(String),

    #[error("forbidden: not the resource owner")]
    NotOwner,
}

impl AuthzError {
    pub fn category(&self) -> ErrorCategory {
        ErrorCategory::Forbidden
    }
}

/// Require `required` among the verified claims' roles.
///
/// - No IO
/// - No panics
/// - Pure policy check
pub fn authorize(claims: &Claims, required: &Role) -> Result<(), AuthzError> {
    if claims.has_role(required) {
        Ok(())
    } else {
        Err(AuthzError::MissingRole(required.as_str().to_string()))
    }
}

/// Allow the subject acting on its own resource, or anyone holding `role`.
pub fn authorize_owner_or(claims: &Claims, owner: &str, role: &Role) -> Result<(), AuthzError> {
    if claims.sub == owner || claims.has_role(role) {
        Ok(())
    } else {
        Err(AuthzError::NotOwner)
    }
}
