//! `keygate-core`: identifiers and the shared error taxonomy.
//!
//! This crate has no infrastructure concerns.

pub mod error;
pub mod id;

pub use error::{ErrorCategory, FieldError, FieldErrors};
pub use id::UserId;
