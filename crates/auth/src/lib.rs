//! `keygate-auth`: token and role boundary.
//!
//! Key storage, claims, token signing/verification and role checks. This crate
//! is decoupled from HTTP and from the credential store.

pub mod authorize;
pub mod claims;
pub mod keystore;
pub mod roles;
pub mod token;

pub use authorize::{AuthzError, authorize, authorize_owner_or};
pub use claims::{Claims, DEFAULT_ISSUER, TokenValidationError, validate_claims};
pub use keystore::{KeyEntry, KeyId, KeySet, KeySetBuilder, KeyStore, KeyStoreError};
pub use roles::Role;
pub use token::{TokenError, TokenService};
