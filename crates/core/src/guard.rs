//! Access guard: resolves the caller's session and checks its role.
//!
//! The guard is the only way to obtain a [`Caller`] or an [`Admin`]; workflow
//! operations take one of those as their first argument, so an operation
//! cannot run without the check having happened.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{persistence, WorkflowError};
use crate::model::{Account, Role};

/// Identity/session collaborator.
#[async_trait]
pub trait SessionResolver: Send + Sync {
    /// Returns the account behind `token`, or `None` for an unknown/expired session.
    async fn resolve(&self, token: &str) -> anyhow::Result<Option<Account>>;
}

/// Any authenticated account.
#[derive(Debug, Clone)]
pub struct Caller(Account);

impl Caller {
    pub fn account(&self) -> &Account {
        &self.0
    }

    pub fn id(&self) -> &str {
        &self.0.id
    }

    pub fn is_admin(&self) -> bool {
        self.0.role == Role::Admin
    }
}

/// An authenticated account holding the `admin` role.
#[derive(Debug, Clone)]
pub struct Admin(Account);

impl Admin {
    pub fn account(&self) -> &Account {
        &self.0
    }

    pub fn id(&self) -> &str {
        &self.0.id
    }

    /// Admins can do everything a caller can.
    pub fn as_caller(&self) -> Caller {
        Caller(self.0.clone())
    }
}

/// Capability gate in front of every workflow operation.
#[derive(Clone)]
pub struct AccessGuard {
    sessions: Arc<dyn SessionResolver>,
}

impl AccessGuard {
    pub fn new(sessions: Arc<dyn SessionResolver>) -> Self {
        Self { sessions }
    }

    /// Fails with `Unauthenticated` unless `token` maps to a live session.
    pub async fn require_authenticated(&self, token: Option<&str>) -> Result<Caller, WorkflowError> {
        let token = token
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(WorkflowError::Unauthenticated)?;
        let account = self
            .sessions
            .resolve(token)
            .await
            .map_err(persistence)?
            .ok_or(WorkflowError::Unauthenticated)?;
        Ok(Caller(account))
    }

    /// As [`require_authenticated`](Self::require_authenticated), then `Forbidden`
    /// unless the account is an admin.
    pub async fn require_admin(&self, token: Option<&str>) -> Result<Admin, WorkflowError> {
        let caller = self.require_authenticated(token).await?;
        Self::elevate(caller)
    }

    /// Upgrades an already-resolved caller.
    pub fn elevate(caller: Caller) -> Result<Admin, WorkflowError> {
        if caller.is_admin() {
            Ok(Admin(caller.0))
        } else {
            tracing::warn!(account_id = %caller.id(), "admin operation refused");
            Err(WorkflowError::Forbidden)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemorySessions;

    fn account(id: &str, role: Role) -> Account {
        Account {
            id: id.into(),
            email: format!("{id}@example.com"),
            role,
            email_verified: true,
            created_at: 0,
            updated_at: 0,
        }
    }

    fn guard() -> AccessGuard {
        let sessions = InMemorySessions::new();
        sessions.insert("user-token", account("u1", Role::User)).unwrap();
        sessions.insert("admin-token", account("a1", Role::Admin)).unwrap();
        AccessGuard::new(Arc::new(sessions))
    }

    #[tokio::test]
    async fn missing_or_unknown_token_is_unauthenticated() {
        let g = guard();
        assert!(matches!(
            g.require_authenticated(None).await,
            Err(WorkflowError::Unauthenticated)
        ));
        assert!(matches!(
            g.require_authenticated(Some("  ")).await,
            Err(WorkflowError::Unauthenticated)
        ));
        assert!(matches!(
            g.require_admin(Some("nope")).await,
            Err(WorkflowError::Unauthenticated)
        ));
    }

    #[tokio::test]
    async fn user_is_not_admin() {
        let g = guard();
        let caller = g.require_authenticated(Some("user-token")).await.unwrap();
        assert_eq!(caller.id(), "u1");
        assert!(matches!(
            g.require_admin(Some("user-token")).await,
            Err(WorkflowError::Forbidden)
        ));
    }

    #[tokio::test]
    async fn admin_passes_both_checks() {
        let g = guard();
        assert!(g.require_authenticated(Some("admin-token")).await.unwrap().is_admin());
        let admin = g.require_admin(Some("admin-token")).await.unwrap();
        assert_eq!(admin.id(), "a1");
        assert_eq!(admin.as_caller().id(), "a1");
    }
}
