//! Persistence seams for users and sessions.
//!
//! Handlers and middleware never touch the database directly: they receive a
//! [`UserStore`] and a [`SessionStore`] through [`crate::state::AppState`]. The
//! production implementation is [`SqliteStore`]; tests can substitute their own.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::session::Session;
use crate::types::{NewUser, User};

mod sqlite;

pub use sqlite::SqliteStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("invalid session data: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("invalid record: {0}")]
    Corrupt(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Counter state after a failed login was recorded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FailedLogin {
    pub failed_logins: u32,
    pub account_locked: bool,
}

/// Narrow read/update operations on user accounts.
///
/// Every mutation is a single statement so that concurrent transitions on the
/// same row cannot interleave half-way.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn get_user(&self, id: i64) -> StoreResult<Option<User>>;

    /// Case-insensitive lookup.
    async fn get_user_by_username(&self, username: &str) -> StoreResult<Option<User>>;

    async fn get_user_by_api_key(&self, api_key: &str) -> StoreResult<Option<User>>;

    async fn list_users(&self) -> StoreResult<Vec<User>>;

    async fn count_users(&self) -> StoreResult<i64>;

    async fn create_user(&self, user: NewUser) -> StoreResult<User>;

    /// Sets `last_login` and clears the failed-login counter.
    async fn record_login(&self, id: i64, at: DateTime<Utc>) -> StoreResult<Option<User>>;

    /// Increments the failed-login counter and sets the lockout flag once it
    /// reaches `max_failed_logins` (0 disables locking).
    async fn record_failed_login(&self, id: i64, max_failed_logins: u32) -> StoreResult<FailedLogin>;

    /// Replaces the password hash and clears the reset flag.
    async fn set_password(&self, id: i64, hash: &str) -> StoreResult<bool>;

    /// Like [`UserStore::set_password`] but only applies while a reset is still required.
    async fn complete_password_reset(&self, id: i64, hash: &str) -> StoreResult<bool>;

    /// Returns `true` if the flag actually changed. Unlocking also clears the counter.
    async fn set_locked(&self, id: i64, locked: bool) -> StoreResult<bool>;

    async fn set_password_change_required(&self, id: i64, required: bool) -> StoreResult<bool>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load_session(&self, id: &str) -> StoreResult<Option<Session>>;

    /// Upserts the session and drops the row of the id it replaced, if any.
    async fn save_session(&self, session: &Session) -> StoreResult<()>;

    async fn delete_session(&self, id: &str) -> StoreResult<()>;

    async fn purge_expired_sessions(&self, now: DateTime<Utc>) -> StoreResult<u64>;
}
