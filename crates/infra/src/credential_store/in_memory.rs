use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};

use keygate_core::UserId;
use keygate_identity::{CredentialStore, CredentialTx, Identity, StoreError};

use super::page_offset;

type Table = BTreeMap<UserId, Identity>;

fn email_taken(table: &Table, email: &str, except: Option<UserId>) -> bool {
    let wanted = email.to_lowercase();
    table
        .values()
        .any(|row| Some(row.id) != except && row.email.to_lowercase() == wanted)
}

fn find_by_email(table: &Table, email: &str) -> Result<Identity, StoreError> {
    let wanted = email.to_lowercase();
    table
        .values()
        .find(|row| row.email.to_lowercase() == wanted)
        .cloned()
        .ok_or(StoreError::NotFound)
}

/// In-memory credential store.
///
/// Intended for tests/dev. A transaction holds the table lock until it
/// commits or is dropped, so transactions are fully serialized.
#[derive(Debug, Default, Clone)]
pub struct InMemoryCredentialStore {
    table: Arc<Mutex<Table>>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.table.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.table.lock().await.is_empty()
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn begin(&self) -> Result<Box<dyn CredentialTx>, StoreError> {
        let guard = self.table.clone().lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(InMemoryTx { guard, staged }))
    }

    async fn query(&self, page: u32, rows_per_page: u32) -> Result<Vec<Identity>, StoreError> {
        let skip = usize::try_from(page_offset(page, rows_per_page)).unwrap_or(usize::MAX);
        let table = self.table.lock().await;
        Ok(table
            .values()
            .skip(skip)
            .take(rows_per_page as usize)
            .cloned()
            .collect())
    }

    async fn query_by_id(&self, id: UserId) -> Result<Identity, StoreError> {
        self.table.lock().await.get(&id).cloned().ok_or(StoreError::NotFound)
    }

    async fn query_by_email(&self, email: &str) -> Result<Identity, StoreError> {
        find_by_email(&*self.table.lock().await, email)
    }
}

/// Changes are staged on a copy and written back on commit.
struct InMemoryTx {
    guard: OwnedMutexGuard<Table>,
    staged: Table,
}

#[async_trait]
impl CredentialTx for InMemoryTx {
    async fn create(&mut self, identity: &Identity) -> Result<(), StoreError> {
        if self.staged.contains_key(&identity.id) {
            return Err(StoreError::Duplicate(format!("user_id {}", identity.id)));
        }
        if email_taken(&self.staged, &identity.email, None) {
            return Err(StoreError::Duplicate("email".into()));
        }
        self.staged.insert(identity.id, identity.clone());
        Ok(())
    }

    async fn query_by_id(&mut self, id: UserId) -> Result<Identity, StoreError> {
        self.staged.get(&id).cloned().ok_or(StoreError::NotFound)
    }

    async fn query_by_email(&mut self, email: &str) -> Result<Identity, StoreError> {
        find_by_email(&self.staged, email)
    }

    async fn update(&mut self, identity: &Identity) -> Result<(), StoreError> {
        if !self.staged.contains_key(&identity.id) {
            return Err(StoreError::NotFound);
        }
        if email_taken(&self.staged, &identity.email, Some(identity.id)) {
            return Err(StoreError::Duplicate("email".into()));
        }
        self.staged.insert(identity.id, identity.clone());
        Ok(())
    }

    async fn delete(&mut self, id: UserId) -> Result<(), StoreError> {
        self.staged.remove(&id).map(|_| ()).ok_or(StoreError::NotFound)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let InMemoryTx { mut guard, staged } = *self;
        *guard = staged;
        Ok(())
    }
}
