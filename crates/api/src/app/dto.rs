use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use keygate_auth::Role;
use keygate_identity::{Identity, IdentityPatch, NewIdentity};

// -------------------------
// Request DTOs
// -------------------------

// Missing fields default to empty so validation can report them by name.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    pub password_confirm: String,
    pub roles: Vec<Role>,
}

impl From<RegisterRequest> for NewIdentity {
    fn from(req: RegisterRequest) -> Self {
        NewIdentity {
            name: req.name,
            email: req.email,
            password: req.password,
            password_confirm: req.password_confirm,
            roles: req.roles,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ConfirmRequest {
    pub email: String,
    pub code: u32,
}

#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct UpdateUserRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub roles: Option<Vec<Role>>,
    pub password: Option<String>,
    pub password_confirm: Option<String>,
}

impl From<UpdateUserRequest> for IdentityPatch {
    fn from(req: UpdateUserRequest) -> Self {
        IdentityPatch {
            name: req.name,
            email: req.email,
            roles: req.roles,
            password: req.password,
            password_confirm: req.password_confirm,
        }
    }
}

// -------------------------
// Response DTOs
// -------------------------

/// Public view of an identity. Hash and confirmation code never leave the
/// service.
#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: String,
    pub name: String,
    pub email: String,
    pub roles: Vec<Role>,
    pub confirmed: bool,
    pub date_created: DateTime<Utc>,
    pub date_updated: DateTime<Utc>,
}

impl From<&Identity> for UserResponse {
    fn from(identity: &Identity) -> Self {
        UserResponse {
            id: identity.id.to_string(),
            name: identity.name.clone(),
            email: identity.email.clone(),
            roles: identity.roles.clone(),
            confirmed: identity.is_confirmed(),
            date_created: identity.date_created,
            date_updated: identity.date_updated,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct UserListResponse {
    pub items: Vec<UserResponse>,
    pub page: u32,
    pub rows: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_request_tolerates_missing_fields() {
        let req: RegisterRequest = serde_json::from_str(r#"{"name":"Ann"}"#).unwrap();
        assert_eq!(req.name, "Ann");
        assert!(req.email.is_empty());
        assert!(req.roles.is_empty());
    }

    #[test]
    fn update_request_keeps_absent_fields_absent() {
        let req: UpdateUserRequest = serde_json::from_str(r#"{"roles":["admin"]}"#).unwrap();
        let patch = IdentityPatch::from(req);
        assert_eq!(patch.roles, Some(vec![Role::ADMIN]));
        assert!(patch.name.is_none());
        assert!(patch.password.is_none());
    }
}
