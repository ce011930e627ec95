use serde::{Deserialize, Serialize};

use super::session::Role;

/// The claim carried inside an identity token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// The caller's user name.
    #[serde(default)]
    pub name: String,
    /// The caller's role, as issued.
    #[serde(default)]
    pub role: String,
}

impl Identity {
    pub fn new(name: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role: role.into(),
        }
    }

    /// The issued role, mapped onto the known tiers.
    pub fn role(&self) -> Role {
        Role::parse(&self.role)
    }
}

/// Who holds a session, as kept by the identity index.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UserInfo {
    pub user_id: String,
    pub role: Role,
}
