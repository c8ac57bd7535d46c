// src/models/user.rs

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Host,
    Participant,
}

impl Role {
    /// Roles allowed to own and drive sessions.
    pub fn can_host(&self) -> bool {
        matches!(self, Role::Admin | Role::Host)
    }
}

/// What the identity directory knows about a user.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Identity {
    pub id: i64,
    pub display_name: String,
    pub role: Role,
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Role::Admin),
            "host" => Ok(Role::Host),
            "participant" | "user" => Ok(Role::Participant),
            other => Err(format!("Unknown role '{}'", other)),
        }
    }
}

/// The authenticated caller of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Requester {
    pub id: i64,
    pub role: Role,
}

impl Requester {
    pub fn new(id: i64, role: Role) -> Self {
        Self { id, role }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}
