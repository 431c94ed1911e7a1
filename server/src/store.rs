#[cfg(test)]
use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
#[cfg(test)]
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::account::{Account, SubscriptionTier};

/// Failures surfaced by a [`UserStore`] implementation.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Unique-constraint violation on email. The store, not the engine's
    /// existence pre-check, is the arbiter for concurrent signups.
    #[error("email already exists")]
    Duplicate,

    /// Any other backend failure. The detail is for logs only.
    #[error("storage failure: {0}")]
    Backend(String),
}

/// Persistence collaborator for accounts. All durable state lives behind
/// this trait; reads and writes are atomic per call.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, StoreError>;

    /// Look up the *unverified* account holding this verification token.
    /// Consumed tokens are sentinel-valued and verified, so they never match.
    async fn find_by_verification_token(&self, token: &str)
        -> Result<Option<Account>, StoreError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Account>, StoreError>;

    /// Insert a new account; a concurrent insert of the same email loses
    /// with [`StoreError::Duplicate`].
    async fn insert(&self, account: &Account) -> Result<Account, StoreError>;

    /// Persist a mutation of an existing account.
    async fn update(&self, account: &Account) -> Result<Account, StoreError>;
}

/// Postgres-backed store.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct AccountRow {
    id: Uuid,
    email: String,
    password_hash: String,
    verification_token: String,
    verified: bool,
    session_token: Option<String>,
    subscription: String,
    avatar_url: String,
    created_at_utc: DateTime<Utc>,
    updated_at_utc: DateTime<Utc>,
}

impl AccountRow {
    fn into_account(self) -> Result<Account, StoreError> {
        let subscription = self
            .subscription
            .parse::<SubscriptionTier>()
            .map_err(|err| StoreError::Backend(err.to_string()))?;

        Ok(Account {
            id: self.id,
            email: self.email,
            password_hash: self.password_hash,
            verification_token: self.verification_token,
            verified: self.verified,
            session_token: self.session_token,
            subscription,
            avatar_url: self.avatar_url,
            created_at_utc: self.created_at_utc,
            updated_at_utc: self.updated_at_utc,
        })
    }
}

const ACCOUNT_COLUMNS: &str = "id, email, password_hash, verification_token, verified, \
     session_token, subscription, avatar_url, created_at_utc, updated_at_utc";

fn backend(err: sqlx::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}

#[async_trait]
impl UserStore for PgStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, StoreError> {
        let row = sqlx::query_as::<_, AccountRow>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        row.map(AccountRow::into_account).transpose()
    }

    async fn find_by_verification_token(
        &self,
        token: &str,
    ) -> Result<Option<Account>, StoreError> {
        let row = sqlx::query_as::<_, AccountRow>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM users \
             WHERE verification_token = $1 AND verified = FALSE"
        ))
        .bind(token)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        row.map(AccountRow::into_account).transpose()
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Account>, StoreError> {
        let row = sqlx::query_as::<_, AccountRow>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        row.map(AccountRow::into_account).transpose()
    }

    async fn insert(&self, account: &Account) -> Result<Account, StoreError> {
        let row = sqlx::query_as::<_, AccountRow>(&format!(
            "INSERT INTO users ({ACCOUNT_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             RETURNING {ACCOUNT_COLUMNS}"
        ))
        .bind(account.id)
        .bind(&account.email)
        .bind(&account.password_hash)
        .bind(&account.verification_token)
        .bind(account.verified)
        .bind(&account.session_token)
        .bind(account.subscription.as_str())
        .bind(&account.avatar_url)
        .bind(account.created_at_utc)
        .bind(account.updated_at_utc)
        .fetch_one(&self.pool)
        .await
        .map_err(|err| match &err {
            sqlx::Error::Database(db)
                if matches!(db.kind(), sqlx::error::ErrorKind::UniqueViolation) =>
            {
                StoreError::Duplicate
            }
            _ => backend(err),
        })?;

        row.into_account()
    }

    async fn update(&self, account: &Account) -> Result<Account, StoreError> {
        let row = sqlx::query_as::<_, AccountRow>(&format!(
            "UPDATE users SET email = $2, password_hash = $3, verification_token = $4, \
             verified = $5, session_token = $6, subscription = $7, avatar_url = $8, \
             updated_at_utc = NOW() \
             WHERE id = $1 \
             RETURNING {ACCOUNT_COLUMNS}"
        ))
        .bind(account.id)
        .bind(&account.email)
        .bind(&account.password_hash)
        .bind(&account.verification_token)
        .bind(account.verified)
        .bind(&account.session_token)
        .bind(account.subscription.as_str())
        .bind(&account.avatar_url)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        match row {
            Some(row) => row.into_account(),
            None => Err(StoreError::Backend(format!(
                "no account with id {}",
                account.id
            ))),
        }
    }
}

/// In-memory store keyed by account id. Backs the test suites; same
/// uniqueness semantics as the Postgres store.
#[cfg(test)]
#[derive(Default)]
pub struct MemoryStore {
    accounts: RwLock<HashMap<Uuid, Account>>,
}

#[cfg(test)]
impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
#[async_trait]
impl UserStore for MemoryStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, StoreError> {
        let accounts = self.accounts.read().await;
        Ok(accounts.values().find(|a| a.email == email).cloned())
    }

    async fn find_by_verification_token(
        &self,
        token: &str,
    ) -> Result<Option<Account>, StoreError> {
        let accounts = self.accounts.read().await;
        Ok(accounts
            .values()
            .find(|a| a.verification_token == token && !a.verified)
            .cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Account>, StoreError> {
        let accounts = self.accounts.read().await;
        Ok(accounts.get(&id).cloned())
    }

    async fn insert(&self, account: &Account) -> Result<Account, StoreError> {
        let mut accounts = self.accounts.write().await;
        if accounts.values().any(|a| a.email == account.email) {
            return Err(StoreError::Duplicate);
        }

        accounts.insert(account.id, account.clone());
        Ok(account.clone())
    }

    async fn update(&self, account: &Account) -> Result<Account, StoreError> {
        let mut accounts = self.accounts.write().await;
        if !accounts.contains_key(&account.id) {
            return Err(StoreError::Backend(format!(
                "no account with id {}",
                account.id
            )));
        }

        let mut updated = account.clone();
        updated.updated_at_utc = Utc::now();
        accounts.insert(updated.id, updated.clone());
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(email: &str) -> Account {
        Account::new(email, "hash".into(), "token".into())
    }

    #[tokio::test]
    async fn duplicate_email_insert_is_rejected() {
        let store = MemoryStore::new();
        store.insert(&account("a@x.com")).await.unwrap();

        let err = store.insert(&account("a@x.com")).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate));
    }

    #[tokio::test]
    async fn update_of_unknown_account_fails() {
        let store = MemoryStore::new();
        let err = store.update(&account("a@x.com")).await.unwrap_err();
        assert!(matches!(err, StoreError::Backend(_)));
    }

    #[tokio::test]
    async fn token_lookup_skips_verified_accounts() {
        let store = MemoryStore::new();
        let mut acc = account("a@x.com");
        store.insert(&acc).await.unwrap();

        let found = store.find_by_verification_token("token").await.unwrap();
        assert!(found.is_some());

        acc.verified = true;
        acc.verification_token = crate::account::VERIFICATION_TOKEN_SENTINEL.into();
        store.update(&acc).await.unwrap();

        assert!(store
            .find_by_verification_token("token")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn find_by_id_returns_inserted_account() {
        let store = MemoryStore::new();
        let acc = account("a@x.com");
        store.insert(&acc).await.unwrap();

        let found = store.find_by_id(acc.id).await.unwrap().unwrap();
        assert_eq!(found.email, "a@x.com");
    }
}
