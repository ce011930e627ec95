use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Key under which a session's role is mirrored in its attribute map.
pub const ROLE_ATTRIBUTE: &str = "role";

/// The role tiers a caller can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
    Guest,
    /// Empty or unrecognised.
    #[default]
    Unknown,
}

impl Role {
    /// Maps an issued role string onto a tier. Matching is exact, as issued.
    pub fn parse(raw: &str) -> Self {
        match raw {
            "admin" => Role::Admin,
            "user" => Role::User,
            "guest" => Role::Guest,
            _ => Role::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::User => "user",
            Role::Guest => "guest",
            Role::Unknown => "",
        }
    }

    pub fn is_known(&self) -> bool {
        *self != Role::Unknown
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One logical caller across many calls.
///
/// Values handed out by the store are snapshots; they stop tracking the
/// stored record at the next mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Server-generated, never reused.
    pub id: String,
    /// Empty for anonymous sessions.
    pub user_id: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    pub last_access: DateTime<Utc>,
    /// Pushed forward on every successful lookup.
    pub expires_at: DateTime<Utc>,
    /// Session-scoped attributes.
    pub data: HashMap<String, String>,
}

impl Session {
    pub(crate) fn new(id: String, user_id: String, role: Role, now: DateTime<Utc>, ttl: chrono::Duration) -> Self {
        let mut data = HashMap::new();
        if role.is_known() {
            data.insert(ROLE_ATTRIBUTE.to_string(), role.as_str().to_string());
        }
        Self {
            id,
            user_id,
            role,
            created_at: now,
            last_access: now,
            expires_at: now + ttl,
            data,
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.user_id.is_empty()
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub(crate) fn set_role(&mut self, role: Role) {
        self.role = role;
        self.data.insert(ROLE_ATTRIBUTE.to_string(), role.as_str().to_string());
    }
}
