//! Postgres-backed credential store.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `Duplicate` |
//! | Database (other) | Any other | `Backend` |
//! | RowNotFound | N/A | `NotFound` |
//! | Other | N/A | `Backend` |
//!
//! Rows whose `confirmed`/`confirm_code` pair breaks the code-iff-unconfirmed
//! rule are reported as `Backend` faults, never silently repaired.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::instrument;

use keygate_auth::Role;
use keygate_core::UserId;
use keygate_identity::{Confirmation, CredentialStore, CredentialTx, Identity, PasswordHash, StoreError};

use super::page_offset;

const SELECT_USERS: &str = r#"
    SELECT
        user_id,
        name,
        email,
        password_hash,
        roles,
        confirmed,
        confirm_code,
        date_created,
        date_updated
    FROM users
"#;

#[derive(Debug, Clone)]
pub struct PostgresCredentialStore {
    pool: PgPool,
}

impl PostgresCredentialStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the `users` table and its case-insensitive email index.
    ///
    /// Idempotent; safe to call on every start.
    #[instrument(skip(self), err)]
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                user_id       UUID PRIMARY KEY,
                name          TEXT NOT NULL,
                email         TEXT NOT NULL,
                password_hash TEXT NOT NULL,
                roles         TEXT[] NOT NULL,
                confirmed     BOOLEAN NOT NULL DEFAULT FALSE,
                confirm_code  INTEGER NULL,
                date_created  TIMESTAMPTZ NOT NULL,
                date_updated  TIMESTAMPTZ NOT NULL,
                CONSTRAINT users_code_iff_unconfirmed CHECK (confirmed = (confirm_code IS NULL))
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("create_users_table", e))?;

        sqlx::query("CREATE UNIQUE INDEX IF NOT EXISTS users_email_lower_key ON users (lower(email))")
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("create_users_email_index", e))?;

        Ok(())
    }
}

#[async_trait]
impl CredentialStore for PostgresCredentialStore {
    async fn begin(&self) -> Result<Box<dyn CredentialTx>, StoreError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        Ok(Box::new(PostgresCredentialTx { tx }))
    }

    #[instrument(skip(self), err)]
    async fn query(&self, page: u32, rows_per_page: u32) -> Result<Vec<Identity>, StoreError> {
        let offset = i64::try_from(page_offset(page, rows_per_page)).unwrap_or(i64::MAX);
        let rows = sqlx::query(&format!("{SELECT_USERS} ORDER BY user_id LIMIT $1 OFFSET $2"))
            .bind(i64::from(rows_per_page))
            .bind(offset)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("query_users", e))?;

        rows.iter().map(identity_from_row).collect()
    }

    #[instrument(skip(self), fields(user_id = %id), err)]
    async fn query_by_id(&self, id: UserId) -> Result<Identity, StoreError> {
        let row = sqlx::query(&format!("{SELECT_USERS} WHERE user_id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("query_user_by_id", e))?;
        row.as_ref().map(identity_from_row).unwrap_or(Err(StoreError::NotFound))
    }

    #[instrument(skip(self), err)]
    async fn query_by_email(&self, email: &str) -> Result<Identity, StoreError> {
        let row = sqlx::query(&format!("{SELECT_USERS} WHERE lower(email) = lower($1)"))
            .bind(email)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("query_user_by_email", e))?;
        row.as_ref().map(identity_from_row).unwrap_or(Err(StoreError::NotFound))
    }
}

/// One `sqlx` transaction; rolled back on drop unless committed.
pub struct PostgresCredentialTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl CredentialTx for PostgresCredentialTx {
    #[instrument(skip(self, identity), fields(user_id = %identity.id), err)]
    async fn create(&mut self, identity: &Identity) -> Result<(), StoreError> {
        let (confirmed, code) = confirmation_columns(&identity.confirmation);
        sqlx::query(
            r#"
            INSERT INTO users (
                user_id,
                name,
                email,
                password_hash,
                roles,
                confirmed,
                confirm_code,
                date_created,
                date_updated
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(identity.id.as_uuid())
        .bind(&identity.name)
        .bind(&identity.email)
        .bind(identity.password_hash.as_str())
        .bind(role_names(&identity.roles))
        .bind(confirmed)
        .bind(code)
        .bind(identity.date_created)
        .bind(identity.date_updated)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_user", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(user_id = %id), err)]
    async fn query_by_id(&mut self, id: UserId) -> Result<Identity, StoreError> {
        let row = sqlx::query(&format!("{SELECT_USERS} WHERE user_id = $1 FOR UPDATE"))
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("lock_user_by_id", e))?;
        row.as_ref().map(identity_from_row).unwrap_or(Err(StoreError::NotFound))
    }

    #[instrument(skip(self), err)]
    async fn query_by_email(&mut self, email: &str) -> Result<Identity, StoreError> {
        let row = sqlx::query(&format!("{SELECT_USERS} WHERE lower(email) = lower($1) FOR UPDATE"))
            .bind(email)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("lock_user_by_email", e))?;
        row.as_ref().map(identity_from_row).unwrap_or(Err(StoreError::NotFound))
    }

    #[instrument(skip(self, identity), fields(user_id = %identity.id), err)]
    async fn update(&mut self, identity: &Identity) -> Result<(), StoreError> {
        let (confirmed, code) = confirmation_columns(&identity.confirmation);
        let result = sqlx::query(
            r#"
            UPDATE users SET
                name = $2,
                email = $3,
                password_hash = $4,
                roles = $5,
                confirmed = $6,
                confirm_code = $7,
                date_updated = $8
            WHERE user_id = $1
            "#,
        )
        .bind(identity.id.as_uuid())
        .bind(&identity.name)
        .bind(&identity.email)
        .bind(identity.password_hash.as_str())
        .bind(role_names(&identity.roles))
        .bind(confirmed)
        .bind(code)
        .bind(identity.date_updated)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("update_user", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    #[instrument(skip(self), fields(user_id = %id), err)]
    async fn delete(&mut self, id: UserId) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM users WHERE user_id = $1")
            .bind(id.as_uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("delete_user", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx
            .commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }
}

fn role_names(roles: &[Role]) -> Vec<String> {
    roles.iter().map(|r| r.as_str().to_string()).collect()
}

fn confirmation_columns(confirmation: &Confirmation) -> (bool, Option<i32>) {
    match confirmation {
        Confirmation::Confirmed => (true, None),
        // Six-digit codes always fit in an INTEGER.
        Confirmation::Pending(code) => (false, Some(code.value() as i32)),
    }
}

#[derive(Debug)]
struct UserRow {
    user_id: uuid::Uuid,
    name: String,
    email: String,
    password_hash: String,
    roles: Vec<String>,
    confirmed: bool,
    confirm_code: Option<i32>,
    date_created: DateTime<Utc>,
    date_updated: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for UserRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(UserRow {
            user_id: row.try_get("user_id")?,
            name: row.try_get("name")?,
            email: row.try_get("email")?,
            password_hash: row.try_get("password_hash")?,
            roles: row.try_get("roles")?,
            confirmed: row.try_get("confirmed")?,
            confirm_code: row.try_get("confirm_code")?,
            date_created: row.try_get("date_created")?,
            date_updated: row.try_get("date_updated")?,
        })
    }
}

impl TryFrom<UserRow> for Identity {
    type Error = StoreError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        let code = row.confirm_code.map(|c| c as u32);
        let confirmation = Confirmation::from_parts(row.confirmed, code).ok_or_else(|| {
            StoreError::Backend(format!(
                "user {} has inconsistent confirmation state",
                row.user_id
            ))
        })?;

        Ok(Identity {
            id: UserId::from_uuid(row.user_id),
            name: row.name,
            email: row.email,
            password_hash: PasswordHash::from_stored(row.password_hash),
            roles: row.roles.into_iter().map(Role::new).collect(),
            confirmation,
            date_created: row.date_created,
            date_updated: row.date_updated,
        })
    }
}

fn identity_from_row(row: &sqlx::postgres::PgRow) -> Result<Identity, StoreError> {
    let user = <UserRow as sqlx::FromRow<_>>::from_row(row)
        .map_err(|e| StoreError::Backend(format!("failed to deserialize user row: {e}")))?;
    Identity::try_from(user)
}

/// Map SQLx errors to StoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::Duplicate(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::RowNotFound => StoreError::NotFound,
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {}", operation))
        }
        _ => StoreError::Backend(format!("sqlx error in {}: {}", operation, err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keygate_identity::ConfirmationCode;

    #[test]
    fn confirmation_maps_onto_columns() {
        assert_eq!(confirmation_columns(&Confirmation::Confirmed), (true, None));
        let pending = Confirmation::Pending(ConfirmationCode::from_stored(654_321));
        assert_eq!(confirmation_columns(&pending), (false, Some(654_321)));
    }

    #[test]
    fn inconsistent_row_is_a_backend_fault() {
        let now = Utc::now();
        let row = UserRow {
            user_id: uuid::Uuid::now_v7(),
            name: "Ann".into(),
            email: "ann@x.com".into(),
            password_hash: "$2b$04$x".into(),
            roles: vec!["user".into()],
            confirmed: true,
            confirm_code: Some(123_456),
            date_created: now,
            date_updated: now,
        };
        assert!(matches!(Identity::try_from(row), Err(StoreError::Backend(_))));
    }

    #[test]
    fn row_converts_to_identity() {
        let now = Utc::now();
        let id = uuid::Uuid::now_v7();
        let row = UserRow {
            user_id: id,
            name: "Ann".into(),
            email: "ann@x.com".into(),
            password_hash: "$2b$04$x".into(),
            roles: vec!["user".into(), "admin".into()],
            confirmed: false,
            confirm_code: Some(123_456),
            date_created: now,
            date_updated: now,
        };
        let identity = Identity::try_from(row).unwrap();
        assert_eq!(identity.id.as_uuid(), &id);
        assert_eq!(identity.roles, vec![Role::USER, Role::ADMIN]);
        assert_eq!(identity.confirmation.code().map(|c| c.value()), Some(123_456));
    }

    #[test]
    fn non_database_errors_never_map_to_duplicate() {
        assert!(matches!(
            map_sqlx_error("insert_user", sqlx::Error::PoolClosed),
            StoreError::Backend(_)
        ));
        assert_eq!(map_sqlx_error("x", sqlx::Error::RowNotFound), StoreError::NotFound);
    }
}
