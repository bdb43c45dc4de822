use std::sync::Arc;

use chrono::Utc;
use tokio::sync::OnceCell;
use tracing::{debug, error, info, warn};

use super::password::{check_password_policy, hash_password, verify_password, PolicyViolation};
use super::{generate_secure_key, AuthError, API_KEY_LENGTH};
use crate::config::AuthConfig;
use crate::metrics::Metrics;
use crate::store::UserStore;
use crate::types::{NewUser, Role, User};

#[derive(Debug, Clone)]
pub struct AuthPolicy {
    /// 0 disables automatic lockout.
    pub max_failed_logins: u32,
    pub min_password_length: usize,
    pub bcrypt_cost: u32,
}

impl From<&AuthConfig> for AuthPolicy {
    fn from(cfg: &AuthConfig) -> Self {
        Self {
            max_failed_logins: cfg.max_failed_logins,
            min_password_length: cfg.min_password_length,
            bcrypt_cost: cfg.bcrypt_cost,
        }
    }
}

/// Drives every account-state transition.
#[derive(Clone)]
pub struct Authenticator {
    users: Arc<dyn UserStore>,
    policy: AuthPolicy,
    metrics: Metrics,
    // Verified against when the username is unknown so both paths cost one bcrypt check.
    dummy_hash: Arc<OnceCell<String>>,
}

impl Authenticator {
    pub fn new(users: Arc<dyn UserStore>, policy: AuthPolicy, metrics: Metrics) -> Self {
        Self { users, policy, metrics, dummy_hash: Arc::new(OnceCell::new()) }
    }

    pub fn policy(&self) -> &AuthPolicy {
        &self.policy
    }

    /// Computes the unknown-user hash up front so the first miss after startup
    /// costs the same single verify as every later one.
    pub async fn warm_up(&self) -> Result<(), AuthError> {
        self.dummy_hash().await.map(|_| ())
    }

    /// Password login.
    ///
    /// The password is checked before the lockout flag, so a locked account
    /// only reveals its state to someone who already knows the password.
    pub async fn login(&self, username: &str, password: &str) -> Result<User, AuthError> {
        let user = match self.users.get_user_by_username(username.trim()).await? {
            Some(user) => user,
            None => {
                let dummy = self.dummy_hash().await?;
                let _ = verify_blocking(password, &dummy).await?;
                debug!("Login attempt for unknown user");
                return Err(AuthError::InvalidCredentials);
            }
        };

        if !verify_blocking(password, &user.hash).await? {
            let outcome = self.users.record_failed_login(user.id, self.policy.max_failed_logins).await?;
            if outcome.account_locked && !user.account_locked {
                self.metrics.inc_accounts_locked();
                warn!(
                    user_id = user.id,
                    failed_logins = outcome.failed_logins,
                    "Account locked after repeated failed logins"
                );
            } else {
                debug!(user_id = user.id, failed_logins = outcome.failed_logins, "Invalid password");
            }
            return Err(AuthError::InvalidCredentials);
        }

        if user.account_locked {
            info!(user_id = user.id, "Login refused: account locked");
            return Err(AuthError::AccountLocked);
        }

        Ok(self.touch_last_login(user).await)
    }

    /// Single sign-on: trusts the asserted username but still honours the lockout flag.
    pub async fn sso(&self, username: &str) -> Result<User, AuthError> {
        let username = username.trim().to_lowercase();
        if username.is_empty() {
            return Err(AuthError::InvalidCredentials);
        }
        let user = self.users.get_user_by_username(&username).await?.ok_or(AuthError::InvalidCredentials)?;
        if user.account_locked {
            return Err(AuthError::AccountLocked);
        }
        Ok(self.touch_last_login(user).await)
    }

    /// Resolves the impersonation target. Lockout is deliberately not checked.
    pub async fn impersonate(&self, username: &str) -> Result<User, AuthError> {
        let username = username.trim();
        self.users
            .get_user_by_username(username)
            .await?
            .ok_or_else(|| AuthError::UserNotFound(username.to_string()))
    }

    /// `PasswordResetRequired -> Active`.
    pub async fn reset_password(&self, user: &User, new_password: &str, confirm: &str) -> Result<(), AuthError> {
        if !user.password_change_required {
            return Err(AuthError::ResetNotRequired);
        }
        let hash = self.validate_password_change(&user.hash, new_password, confirm).await?;
        // Conditional on the flag: a concurrent reset that already landed wins.
        if !self.users.complete_password_reset(user.id, &hash).await? {
            return Err(AuthError::ResetNotRequired);
        }
        info!(user_id = user.id, "Password reset completed");
        Ok(())
    }

    /// Voluntary password change from the settings page.
    pub async fn change_password(
        &self,
        user: &User,
        current: &str,
        new_password: &str,
        confirm: &str,
    ) -> Result<(), AuthError> {
        if !verify_blocking(current, &user.hash).await? {
            return Err(AuthError::IncorrectPassword);
        }
        let hash = self.validate_password_change(&user.hash, new_password, confirm).await?;
        if !self.users.set_password(user.id, &hash).await? {
            return Err(AuthError::UserNotFound(user.username.clone()));
        }
        info!(user_id = user.id, "Password changed");
        Ok(())
    }

    /// `Locked -> Active`.
    pub async fn unlock(&self, username: &str) -> Result<User, AuthError> {
        let user = self.require_user(username).await?;
        if self.users.set_locked(user.id, false).await? {
            info!(user_id = user.id, "Account unlocked");
        }
        self.refresh(user).await
    }

    /// Administrative lock, independent of the failure counter.
    pub async fn lock(&self, username: &str) -> Result<User, AuthError> {
        let user = self.require_user(username).await?;
        if self.users.set_locked(user.id, true).await? {
            info!(user_id = user.id, "Account locked by administrator");
        }
        self.refresh(user).await
    }

    /// `Active -> PasswordResetRequired`.
    pub async fn require_password_reset(&self, username: &str) -> Result<User, AuthError> {
        let user = self.require_user(username).await?;
        if self.users.set_password_change_required(user.id, true).await? {
            info!(user_id = user.id, "Password reset required");
        }
        self.refresh(user).await
    }

    /// Creates an account with a fresh API key.
    pub async fn provision(
        &self,
        username: &str,
        password: &str,
        role: Role,
        password_change_required: bool,
    ) -> Result<User, AuthError> {
        let hash = self.hash_blocking(password).await?;
        let user = self
            .users
            .create_user(NewUser {
                username: username.trim().to_string(),
                hash,
                api_key: generate_secure_key(API_KEY_LENGTH),
                role,
                password_change_required,
            })
            .await?;
        Ok(user)
    }

    /// Creates the initial administrator when no account exists yet.
    ///
    /// Returns the generated password when none was configured, so the caller can
    /// show it once.
    pub async fn bootstrap_admin(&self, username: &str, password: Option<&str>) -> Result<Option<String>, AuthError> {
        self.warm_up().await?;
        if self.users.count_users().await? > 0 {
            return Ok(None);
        }
        let generated = password.is_none().then(|| generate_secure_key(API_KEY_LENGTH / 2));
        let password = password.or(generated.as_deref()).unwrap_or_default();
        let admin = self.provision(username, password, Role::Admin, true).await?;
        info!(user_id = admin.id, username = %admin.username, "Created initial administrator");
        Ok(generated)
    }

    async fn validate_password_change(
        &self,
        current_hash: &str,
        new_password: &str,
        confirm: &str,
    ) -> Result<String, AuthError> {
        check_password_policy(new_password, self.policy.min_password_length)?;
        if new_password != confirm {
            return Err(PolicyViolation::Mismatch.into());
        }
        if verify_blocking(new_password, current_hash).await? {
            return Err(PolicyViolation::Reused.into());
        }
        self.hash_blocking(new_password).await
    }

    async fn require_user(&self, username: &str) -> Result<User, AuthError> {
        let username = username.trim();
        self.users
            .get_user_by_username(username)
            .await?
            .ok_or_else(|| AuthError::UserNotFound(username.to_string()))
    }

    async fn refresh(&self, user: User) -> Result<User, AuthError> {
        self.users.get_user(user.id).await?.ok_or(AuthError::UserNotFound(user.username))
    }

    async fn touch_last_login(&self, user: User) -> User {
        match self.users.record_login(user.id, Utc::now()).await {
            Ok(Some(updated)) => updated,
            Ok(None) => user,
            Err(e) => {
                // The login itself already succeeded; a stale timestamp is not worth refusing it.
                error!(user_id = user.id, "Failed to record last login: {}", e);
                user
            }
        }
    }

    async fn dummy_hash(&self) -> Result<String, AuthError> {
        let cost = self.policy.bcrypt_cost;
        self.dummy_hash
            .get_or_try_init(|| async move {
                let seed = generate_secure_key(16);
                tokio::task::spawn_blocking(move || hash_password(&seed, cost))
                    .await
                    .map_err(|e| AuthError::Hashing(e.to_string()))?
                    .map_err(|e| AuthError::Hashing(e.to_string()))
            })
            .await
            .cloned()
    }

    async fn hash_blocking(&self, password: &str) -> Result<String, AuthError> {
        let password = password.to_owned();
        let cost = self.policy.bcrypt_cost;
        tokio::task::spawn_blocking(move || hash_password(&password, cost))
            .await
            .map_err(|e| AuthError::Hashing(e.to_string()))?
            .map_err(|e| AuthError::Hashing(e.to_string()))
    }
}

async fn verify_blocking(password: &str, hash: &str) -> Result<bool, AuthError> {
    let (password, hash) = (password.to_owned(), hash.to_owned());
    tokio::task::spawn_blocking(move || verify_password(&password, &hash))
        .await
        .map_err(|e| AuthError::Hashing(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use crate::tests::support::test_pool;

    #[tokio::test]
    async fn bootstrap_precomputes_the_unknown_user_hash() {
        let (pool, _dir) = test_pool().await;
        let store = SqliteStore::new(pool, chrono::Duration::hours(1));
        let policy = AuthPolicy { max_failed_logins: 5, min_password_length: 8, bcrypt_cost: 4 };
        let auth = Authenticator::new(Arc::new(store), policy, Metrics::new());
        assert!(!auth.dummy_hash.initialized());

        auth.bootstrap_admin("admin", Some("initial-password")).await.unwrap();
        let warmed = auth.dummy_hash.get().cloned().unwrap();

        // later misses reuse the same hash
        assert!(matches!(auth.login("ghost", "whatever").await, Err(AuthError::InvalidCredentials)));
        assert_eq!(auth.dummy_hash.get(), Some(&warmed));
    }
}
