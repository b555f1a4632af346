//! Credential store adapters.
//!
//! Both adapters implement `keygate_identity::CredentialStore`. Email
//! uniqueness is case-insensitive in each.

pub mod in_memory;
pub mod postgres;

pub use in_memory::InMemoryCredentialStore;
pub use postgres::PostgresCredentialStore;

/// Offset of the first row on 1-based `page`.
pub(crate) fn page_offset(page: u32, rows_per_page: u32) -> u64 {
    u64::from(page.saturating_sub(1)) * u64::from(rows_per_page)
}
