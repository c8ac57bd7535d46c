// src/services/identity.rs

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::{
    error::AppError,
    models::user::{Identity, Role},
};

/// Lookup failures are distinct so callers can tell "no such user" from "not allowed".
#[derive(Debug)]
pub enum IdentityError {
    Unknown(i64),
    WrongRole { id: i64, role: Role },
    Backend(String),
}

impl From<IdentityError> for AppError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::Unknown(id) => AppError::NotFound(format!("User {} not found", id)),
            IdentityError::WrongRole { id, role } => AppError::PermissionDenied(format!(
                "User {} has role '{:?}' which is not allowed here",
                id, role
            )),
            IdentityError::Backend(msg) => AppError::InternalServerError(msg),
        }
    }
}

/// Resolves user ids to display names and roles.
#[async_trait]
pub trait IdentityDirectory: Send + Sync {
    async fn lookup(&self, id: i64) -> Result<Identity, IdentityError>;

    /// Like `lookup`, but also requires the user to be able to host sessions.
    async fn lookup_host(&self, id: i64) -> Result<Identity, IdentityError> {
        let identity = self.lookup(id).await?;
        if identity.role.can_host() {
            Ok(identity)
        } else {
            Err(IdentityError::WrongRole {
                id,
                role: identity.role,
            })
        }
    }
}

/// Identity directory backed by the `users` table.
#[derive(Clone)]
pub struct SqlIdentityDirectory {
    pool: SqlitePool,
}

impl SqlIdentityDirectory {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IdentityDirectory for SqlIdentityDirectory {
    async fn lookup(&self, id: i64) -> Result<Identity, IdentityError> {
        sqlx::query_as::<_, Identity>("SELECT id, display_name, role FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!("Failed to look up user {}: {:?}", id, e);
                IdentityError::Backend(e.to_string())
            })?
            .ok_or(IdentityError::Unknown(id))
    }
}
