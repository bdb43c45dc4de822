use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use super::{FailedLogin, SessionStore, StoreError, StoreResult, UserStore};
use crate::session::Session;
use crate::types::{NewUser, Role, User};

const USER_COLUMNS: &str = "id, username, hash, api_key, role, account_locked, password_change_required, \
                            failed_logins, last_login";

/// The single authoritative store, backed by one SQLite pool.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    session_ttl: Duration,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool, session_ttl: Duration) -> Self {
        Self { pool, session_ttl }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn get_setting(&self, key: &str) -> StoreResult<Option<String>> {
        let value = sqlx::query_scalar::<_, String>("SELECT value FROM settings WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    /// Stores `value` unless the key already exists and returns whatever is stored afterwards.
    ///
    /// Two instances racing on first start therefore agree on one value.
    pub async fn insert_setting_if_absent(&self, key: &str, value: &str) -> StoreResult<String> {
        sqlx::query("INSERT OR IGNORE INTO settings (key, value) VALUES (?1, ?2)")
            .bind(key)
            .bind(value)
            .execute(&self.pool)
            .await?;
        let stored = sqlx::query_scalar::<_, String>("SELECT value FROM settings WHERE key = ?1")
            .bind(key)
            .fetch_one(&self.pool)
            .await?;
        Ok(stored)
    }

    async fn fetch_user_where(&self, clause: &str, bind: &str) -> StoreResult<Option<User>> {
        let sql = format!("SELECT {} FROM users WHERE {}", USER_COLUMNS, clause);
        let row = sqlx::query(&sql).bind(bind).fetch_optional(&self.pool).await?;
        row.as_ref().map(user_from_row).transpose()
    }
}

fn user_from_row(row: &SqliteRow) -> StoreResult<User> {
    let role: String = row.try_get("role")?;
    let role = role.parse::<Role>().map_err(StoreError::Corrupt)?;
    let failed_logins: i64 = row.try_get("failed_logins")?;
    Ok(User {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        hash: row.try_get("hash")?,
        api_key: row.try_get("api_key")?,
        role,
        account_locked: row.try_get("account_locked")?,
        password_change_required: row.try_get("password_change_required")?,
        failed_logins: u32::try_from(failed_logins.max(0)).unwrap_or(u32::MAX),
        last_login: row.try_get::<Option<DateTime<Utc>>, _>("last_login")?,
    })
}

#[async_trait]
impl UserStore for SqliteStore {
    async fn get_user(&self, id: i64) -> StoreResult<Option<User>> {
        let sql = format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS);
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn get_user_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        // The column is declared COLLATE NOCASE.
        self.fetch_user_where("username = ?1", username).await
    }

    async fn get_user_by_api_key(&self, api_key: &str) -> StoreResult<Option<User>> {
        self.fetch_user_where("api_key = ?1", api_key).await
    }

    async fn list_users(&self) -> StoreResult<Vec<User>> {
        let sql = format!("SELECT {} FROM users ORDER BY username", USER_COLUMNS);
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(user_from_row).collect()
    }

    async fn count_users(&self) -> StoreResult<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users").fetch_one(&self.pool).await?;
        Ok(count)
    }

    async fn create_user(&self, user: NewUser) -> StoreResult<User> {
        let sql = format!(
            "INSERT INTO users (username, hash, api_key, role, password_change_required) \
             VALUES (?1, ?2, ?3, ?4, ?5) RETURNING {}",
            USER_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(&user.username)
            .bind(&user.hash)
            .bind(&user.api_key)
            .bind(user.role.as_str())
            .bind(user.password_change_required)
            .fetch_one(&self.pool)
            .await?;
        user_from_row(&row)
    }

    async fn record_login(&self, id: i64, at: DateTime<Utc>) -> StoreResult<Option<User>> {
        let sql = format!(
            "UPDATE users SET last_login = ?1, failed_logins = 0 WHERE id = ?2 RETURNING {}",
            USER_COLUMNS
        );
        let row = sqlx::query(&sql).bind(at).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn record_failed_login(&self, id: i64, max_failed_logins: u32) -> StoreResult<FailedLogin> {
        // SET expressions see the pre-update row, hence `failed_logins + 1` in the CASE.
        let row = sqlx::query(
            "UPDATE users SET failed_logins = failed_logins + 1, \
                 account_locked = CASE WHEN ?1 > 0 AND failed_logins + 1 >= ?1 THEN 1 ELSE account_locked END \
             WHERE id = ?2 RETURNING failed_logins, account_locked",
        )
        .bind(i64::from(max_failed_logins))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let failed: i64 = row.try_get("failed_logins")?;
                Ok(FailedLogin {
                    failed_logins: u32::try_from(failed.max(0)).unwrap_or(u32::MAX),
                    account_locked: row.try_get("account_locked")?,
                })
            }
            None => Ok(FailedLogin::default()),
        }
    }

    async fn set_password(&self, id: i64, hash: &str) -> StoreResult<bool> {
        let res = sqlx::query("UPDATE users SET hash = ?1, password_change_required = 0 WHERE id = ?2")
            .bind(hash)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() == 1)
    }

    async fn complete_password_reset(&self, id: i64, hash: &str) -> StoreResult<bool> {
        let res = sqlx::query(
            "UPDATE users SET hash = ?1, password_change_required = 0 \
             WHERE id = ?2 AND password_change_required = 1",
        )
        .bind(hash)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected() == 1)
    }

    async fn set_locked(&self, id: i64, locked: bool) -> StoreResult<bool> {
        let res = sqlx::query(
            "UPDATE users SET account_locked = ?1, \
                 failed_logins = CASE WHEN ?1 = 0 THEN 0 ELSE failed_logins END \
             WHERE id = ?2 AND account_locked != ?1",
        )
        .bind(locked)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected() == 1)
    }

    async fn set_password_change_required(&self, id: i64, required: bool) -> StoreResult<bool> {
        let res = sqlx::query(
            "UPDATE users SET password_change_required = ?1 WHERE id = ?2 AND password_change_required != ?1",
        )
        .bind(required)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected() == 1)
    }
}

#[async_trait]
impl SessionStore for SqliteStore {
    async fn load_session(&self, id: &str) -> StoreResult<Option<Session>> {
        let row = sqlx::query("SELECT data, expires_at FROM sessions WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let data: String = row.try_get("data")?;
        let expires_at: i64 = row.try_get("expires_at")?;
        let expires_at = DateTime::<Utc>::from_timestamp(expires_at, 0)
            .ok_or_else(|| StoreError::Corrupt(format!("session expiry out of range: {}", expires_at)))?;
        let session = Session::from_record(id.to_string(), &data, expires_at, self.session_ttl)?;
        Ok(Some(session))
    }

    async fn save_session(&self, session: &Session) -> StoreResult<()> {
        let data = session.data_json()?;
        let mut tx = self.pool.begin().await?;
        if let Some(old) = session.replaced_id() {
            sqlx::query("DELETE FROM sessions WHERE id = ?1").bind(old).execute(&mut *tx).await?;
        }
        sqlx::query(
            "INSERT INTO sessions (id, data, expires_at) VALUES (?1, ?2, ?3) \
             ON CONFLICT(id) DO UPDATE SET data = excluded.data, expires_at = excluded.expires_at",
        )
        .bind(session.id())
        .bind(data)
        .bind(session.expires_at().timestamp())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn delete_session(&self, id: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM sessions WHERE id = ?1").bind(id).execute(&self.pool).await?;
        Ok(())
    }

    async fn purge_expired_sessions(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let res = sqlx::query("DELETE FROM sessions WHERE expires_at <= ?1")
            .bind(now.timestamp())
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected())
    }
}
