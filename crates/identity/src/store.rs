//! Credential store port.
//!
//! Adapters live in `keygate-infra`. Every read-modify-write goes through a
//! [`CredentialTx`]; dropping a transaction without [`CredentialTx::commit`]
//! discards its changes.

use async_trait::async_trait;
use thiserror::Error;

use keygate_core::UserId;

use crate::identity::Identity;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,

    /// A uniqueness constraint fired; carries the backend's detail.
    #[error("duplicate record: {0}")]
    Duplicate(String),

    #[error("store backend failure: {0}")]
    Backend(String),
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn CredentialTx>, StoreError>;

    /// Page `page` (1-based) of `rows_per_page` identities, ordered by id.
    async fn query(&self, page: u32, rows_per_page: u32) -> Result<Vec<Identity>, StoreError>;

    async fn query_by_id(&self, id: UserId) -> Result<Identity, StoreError>;

    /// Case-insensitive email lookup.
    async fn query_by_email(&self, email: &str) -> Result<Identity, StoreError>;
}

/// A single store transaction.
///
/// Lookups inside a transaction lock the record until commit or drop.
#[async_trait]
pub trait CredentialTx: Send {
    async fn create(&mut self, identity: &Identity) -> Result<(), StoreError>;

    async fn query_by_id(&mut self, id: UserId) -> Result<Identity, StoreError>;

    async fn query_by_email(&mut self, email: &str) -> Result<Identity, StoreError>;

    async fn update(&mut self, identity: &Identity) -> Result<(), StoreError>;

    async fn delete(&mut self, id: UserId) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}
