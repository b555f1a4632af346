//! Identity record and its inputs.

use chrono::{DateTime, Utc};

use keygate_auth::Role;
use keygate_core::UserId;

use crate::code::ConfirmationCode;
use crate::password::PasswordHash;

/// Confirmation state of an identity.
///
/// A code exists exactly while the identity is unconfirmed; confirming drops
/// it for good.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Confirmation {
    Pending(ConfirmationCode),
    Confirmed,
}

impl Confirmation {
    /// Rebuild from the persisted `(confirmed, confirm_code)` column pair.
    ///
    /// Returns `None` for combinations that break the code-iff-unconfirmed rule.
    pub fn from_parts(confirmed: bool, code: Option<u32>) -> Option<Self> {
        match (confirmed, code) {
            (true, None) => Some(Confirmation::Confirmed),
            (false, Some(code)) => Some(Confirmation::Pending(ConfirmationCode::from_stored(code))),
            _ => None,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        matches!(self, Confirmation::Confirmed)
    }

    pub fn code(&self) -> Option<ConfirmationCode> {
        match self {
            Confirmation::Pending(code) => Some(*code),
            Confirmation::Confirmed => None,
        }
    }
}

/// A registered user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: UserId,
    pub name: String,
    pub email: String,
    pub password_hash: PasswordHash,
    pub roles: Vec<Role>,
    pub confirmation: Confirmation,
    pub date_created: DateTime<Utc>,
    pub date_updated: DateTime<Utc>,
}

impl Identity {
    pub fn is_confirmed(&self) -> bool {
        self.confirmation.is_confirmed()
    }
}

/// Registration input.
#[derive(Debug, Clone, Default)]
pub struct NewIdentity {
    pub name: String,
    pub email: String,
    pub password: String,
    pub password_confirm: String,
    pub roles: Vec<Role>,
}

/// Merge-patch for an existing identity; `None` leaves a field untouched.
#[derive(Debug, Clone, Default)]
pub struct IdentityPatch {
    pub name: Option<String>,
    pub email: Option<String>,
    pub roles: Option<Vec<Role>>,
    pub password: Option<String>,
    pub password_confirm: Option<String>,
}

impl IdentityPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.email.is_none() && self.roles.is_none() && self.password.is_none()
    }
}

/// Drop repeated roles, keeping first-seen order.
pub(crate) fn dedup_roles(roles: Vec<Role>) -> Vec<Role> {
    let mut out: Vec<Role> = Vec::with_capacity(roles.len());
    for role in roles {
        if !out.contains(&role) {
            out.push(role);
        }
    }
    out
}
