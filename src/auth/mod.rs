//! Authentication and account-state machine.
//!
//! Accounts are in one of three states derived from their flags
//! ([`AccountState`](crate::types::AccountState)):
//!
//! - `Active --(max_failed_logins consecutive failures)--> Locked`
//! - `Locked --(administrative unlock)--> Active`
//! - `Active --(administrator forces reset)--> PasswordResetRequired`
//! - `PasswordResetRequired --(valid new password)--> Active`
//!
//! The [`Authenticator`] is the only component that writes those flags.

use rand::{rngs::OsRng, RngCore};

pub mod password;
mod service;

pub use password::PolicyViolation;
pub use service::{AuthPolicy, Authenticator};

use crate::store::StoreError;

/// Length in bytes of generated API keys and bootstrap passwords.
pub const API_KEY_LENGTH: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Unknown user or wrong password. Both render the same message on purpose.
    #[error("Invalid Username/Password")]
    InvalidCredentials,
    #[error("Account Locked")]
    AccountLocked,
    #[error("User not found: {0}")]
    UserNotFound(String),
    #[error("{0}")]
    PasswordPolicy(#[from] PolicyViolation),
    /// The current password given on the settings page was wrong.
    #[error("Invalid Password")]
    IncorrectPassword,
    #[error("Password reset is not required for this account")]
    ResetNotRequired,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("password hashing failed: {0}")]
    Hashing(String),
}

/// Hex-encoded random key of `len` bytes from the OS generator.
pub fn generate_secure_key(len: usize) -> String {
    let mut buf = vec![0u8; len];
    OsRng.fill_bytes(&mut buf);
    hex::encode(buf)
}
