use bcrypt::{hash, verify};

/// bcrypt ignores everything past this many bytes.
pub const MAX_PASSWORD_BYTES: usize = 72;

/// Reasons a new password is refused. The messages are shown to the user verbatim.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyViolation {
    #[error("No password provided")]
    Empty,
    #[error("Password must be at least {0} characters")]
    TooShort(usize),
    #[error("Password must be at most {0} bytes")]
    TooLong(usize),
    #[error("Passwords must match")]
    Mismatch,
    #[error("Cannot reuse existing password")]
    Reused,
}

/// Length-only policy. The minimum counts characters, the maximum counts bytes.
pub fn check_password_policy(password: &str, min_length: usize) -> Result<(), PolicyViolation> {
    if password.is_empty() {
        return Err(PolicyViolation::Empty);
    }
    if password.chars().count() < min_length {
        return Err(PolicyViolation::TooShort(min_length));
    }
    if password.len() > MAX_PASSWORD_BYTES {
        return Err(PolicyViolation::TooLong(MAX_PASSWORD_BYTES));
    }
    Ok(())
}

pub fn hash_password(password: &str, cost: u32) -> Result<String, bcrypt::BcryptError> {
    hash(password, cost)
}

/// A malformed stored hash counts as a mismatch.
pub fn verify_password(password: &str, hash: &str) -> bool {
    match verify(password, hash) {
        Ok(matches) => matches,
        Err(e) => {
            tracing::warn!("Stored password hash could not be verified: {}", e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_messages() {
        assert_eq!(check_password_policy("", 8).unwrap_err().to_string(), "No password provided");
        assert_eq!(
            check_password_policy("short", 8).unwrap_err().to_string(),
            "Password must be at least 8 characters"
        );
        assert!(check_password_policy("long enough", 8).is_ok());
        // multi-byte characters count once
        assert!(check_password_policy("ääääääää", 8).is_ok());
    }

    #[test]
    fn test_policy_rejects_passwords_bcrypt_would_truncate() {
        let at_limit = "a".repeat(MAX_PASSWORD_BYTES);
        assert!(check_password_policy(&at_limit, 8).is_ok());

        let over = format!("{}b", at_limit);
        assert_eq!(check_password_policy(&over, 8), Err(PolicyViolation::TooLong(72)));
        assert_eq!(
            check_password_policy(&over, 8).unwrap_err().to_string(),
            "Password must be at most 72 bytes"
        );

        // 37 two-byte characters: short enough in characters, too long in bytes
        assert_eq!(check_password_policy(&"ä".repeat(37), 8), Err(PolicyViolation::TooLong(72)));
    }

    #[test]
    fn test_hash_verify() {
        let h = hash_password("correct horse", 4).unwrap();
        assert!(verify_password("correct horse", &h));
        assert!(!verify_password("battery staple", &h));
        assert!(!verify_password("correct horse", "not-a-bcrypt-hash"));
    }
}
