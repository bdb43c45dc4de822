//! Server-side session record.
//!
//! A session is referenced by an opaque id held in the client's cookie. The
//! record itself (named values and queued flashes) lives in the
//! [`SessionStore`](crate::store::SessionStore).

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::auth::generate_secure_key;
use crate::types::Flash;

/// Value name holding the authenticated user's id.
pub const USER_ID_KEY: &str = "id";
/// Value name holding the id of the administrator who impersonated this session.
pub const IMPERSONATOR_KEY: &str = "impersonator";

const SESSION_ID_BYTES: usize = 32;

/// `now + ttl`, saturating at the latest representable instant.
fn expiry_after(ttl: Duration) -> DateTime<Utc> {
    Utc::now().checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SessionData {
    #[serde(default)]
    values: Map<String, Value>,
    #[serde(default)]
    flashes: Vec<Flash>,
}

#[derive(Debug, Clone)]
pub struct Session {
    id: String,
    values: Map<String, Value>,
    flashes: Vec<Flash>,
    expires_at: DateTime<Utc>,
    ttl: Duration,
    is_new: bool,
    modified: bool,
    replaced_id: Option<String>,
}

impl Session {
    /// A fresh, anonymous, not yet persisted session.
    pub fn new(ttl: Duration) -> Self {
        Self {
            id: generate_secure_key(SESSION_ID_BYTES),
            values: Map::new(),
            flashes: Vec::new(),
            expires_at: expiry_after(ttl),
            ttl,
            is_new: true,
            modified: false,
            replaced_id: None,
        }
    }

    /// Rebuilds a session from its stored representation.
    pub fn from_record(
        id: String,
        data: &str,
        expires_at: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<Self, serde_json::Error> {
        let data: SessionData = serde_json::from_str(data)?;
        Ok(Self {
            id,
            values: data.values,
            flashes: data.flashes,
            expires_at,
            ttl,
            is_new: false,
            modified: false,
            replaced_id: None,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn is_new(&self) -> bool {
        self.is_new
    }

    /// Whether the session must be written back at the end of the request.
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    /// The id this session was rotated away from during the current request.
    pub fn replaced_id(&self) -> Option<&str> {
        self.replaced_id.as_deref()
    }

    pub fn mark_saved(&mut self) {
        self.is_new = false;
        self.modified = false;
        self.replaced_id = None;
    }

    /// Forces persistence, e.g. because a CSRF token bound to this id was handed out.
    pub fn touch(&mut self) {
        self.modified = true;
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
        self.modified = true;
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let removed = self.values.remove(key);
        if removed.is_some() {
            self.modified = true;
        }
        removed
    }

    pub fn user_id(&self) -> Option<i64> {
        self.values.get(USER_ID_KEY).and_then(Value::as_i64)
    }

    pub fn impersonator(&self) -> Option<i64> {
        self.values.get(IMPERSONATOR_KEY).and_then(Value::as_i64)
    }

    /// Binds the session to `user_id` under a fresh id.
    ///
    /// The old id stops resolving once the session is saved.
    pub fn establish(&mut self, user_id: i64, impersonator: Option<i64>) {
        self.rotate_id();
        self.values.insert(USER_ID_KEY.to_string(), Value::from(user_id));
        match impersonator {
            Some(admin_id) => {
                self.values.insert(IMPERSONATOR_KEY.to_string(), Value::from(admin_id));
            }
            None => {
                self.values.remove(IMPERSONATOR_KEY);
            }
        }
        self.expires_at = expiry_after(self.ttl);
        self.modified = true;
    }

    /// Removes the identity entries; the session itself (and its flashes) survives.
    pub fn clear_identity(&mut self) {
        self.values.remove(USER_ID_KEY);
        self.values.remove(IMPERSONATOR_KEY);
        self.modified = true;
    }

    pub fn add_flash(&mut self, flash: Flash) {
        self.flashes.push(flash);
        self.modified = true;
    }

    /// Drains the flash queue.
    pub fn take_flashes(&mut self) -> Vec<Flash> {
        if !self.flashes.is_empty() {
            self.modified = true;
        }
        std::mem::take(&mut self.flashes)
    }

    pub fn data_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&SessionData { values: self.values.clone(), flashes: self.flashes.clone() })
    }

    fn rotate_id(&mut self) {
        let old = std::mem::replace(&mut self.id, generate_secure_key(SESSION_ID_BYTES));
        // A new session was never stored, so there is nothing to delete.
        if !self.is_new && self.replaced_id.is_none() {
            self.replaced_id = Some(old);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FlashKind;

    #[test]
    fn new_session_is_anonymous() {
        let s = Session::new(Duration::hours(1));
        assert_eq!(s.id().len(), SESSION_ID_BYTES * 2);
        assert!(s.user_id().is_none());
        assert!(s.is_new());
        assert!(!s.is_modified());
    }

    #[test]
    fn establish_rotates_id_and_records_replaced_one() {
        let mut s = Session::from_record("old-id".into(), "{}", Utc::now() + Duration::hours(1), Duration::hours(1))
            .unwrap();
        s.establish(7, None);
        assert_ne!(s.id(), "old-id");
        assert_eq!(s.replaced_id(), Some("old-id"));
        assert_eq!(s.user_id(), Some(7));
        assert!(s.impersonator().is_none());

        // A second rotation in the same request still remembers the stored id.
        s.establish(8, Some(1));
        assert_eq!(s.replaced_id(), Some("old-id"));
        assert_eq!(s.impersonator(), Some(1));
    }

    #[test]
    fn clear_identity_keeps_flashes() {
        let mut s = Session::new(Duration::hours(1));
        s.establish(3, Some(1));
        s.add_flash(Flash::new(FlashKind::Success, "bye"));
        s.clear_identity();
        assert!(s.user_id().is_none());
        assert!(s.impersonator().is_none());
        assert_eq!(s.take_flashes().len(), 1);
        assert!(s.take_flashes().is_empty());
    }

    #[test]
    fn record_round_trip_preserves_values_and_flashes() {
        let mut s = Session::new(Duration::hours(1));
        s.establish(42, None);
        s.add_flash(Flash::new(FlashKind::Danger, "nope"));
        let json = s.data_json().unwrap();

        let mut loaded = Session::from_record(s.id().to_string(), &json, s.expires_at(), Duration::hours(1)).unwrap();
        assert_eq!(loaded.user_id(), Some(42));
        assert_eq!(loaded.take_flashes(), vec![Flash::new(FlashKind::Danger, "nope")]);
    }

    #[test]
    fn oversized_ttl_saturates_instead_of_overflowing() {
        let mut s = Session::new(Duration::days(365 * 1_000_000));
        assert_eq!(s.expires_at(), DateTime::<Utc>::MAX_UTC);
        s.establish(1, None);
        assert!(!s.is_expired(Utc::now()));
    }

    #[test]
    fn expiry_is_inclusive() {
        let now = Utc::now();
        let s = Session::from_record("x".into(), "{}", now, Duration::hours(1)).unwrap();
        assert!(s.is_expired(now));
        assert!(!s.is_expired(now - Duration::seconds(1)));
    }
}
