//! `keygate-identity`: identity lifecycle.
//!
//! Owns registration, email confirmation, password authentication and the
//! admin maintenance operations. Persistence and code delivery sit behind the
//! [`CredentialStore`] and [`ConfirmationNotifier`] ports.

pub mod code;
pub mod errors;
pub mod identity;
pub mod notify;
pub mod password;
pub mod service;
pub mod store;
pub mod validate;

pub use code::ConfirmationCode;
pub use errors::IdentityError;
pub use identity::{Confirmation, Identity, IdentityPatch, NewIdentity};
pub use notify::{ConfirmationNotifier, LogNotifier, NotifyError, RecordingNotifier};
pub use password::{MAX_PASSWORD_BYTES, PasswordHash, PasswordHasher};
pub use service::{DEFAULT_TOKEN_TTL_SECS, IdentityCore};
pub use store::{CredentialStore, CredentialTx, StoreError};
