//! # Identity Boundary & Permission Descriptors
//!
//! The identity service supplies the acting user stamped onto audit rows;
//! team ids drive the permission descriptors attached to newly created
//! rows. Descriptors are plain strings of the form `read("team:…")`.

use crate::error::StoreError;
use crate::types::{TeamId, UserId};

/// The acting user, as resolved by the identity service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdentity {
    pub id: UserId,
    pub email: Option<String>,
}

/// The identity-service contract.
#[allow(async_fn_in_trait)]
pub trait IdentityProvider {
    /// Resolve the acting user.
    async fn current_user(&self) -> Result<UserIdentity, StoreError>;
}

/// Identity provider with a fixed user, for tests and single-user tools.
#[derive(Debug, Clone)]
pub struct StaticIdentity {
    user: UserIdentity,
}

impl StaticIdentity {
    /// Create a provider that always resolves to the given user.
    #[must_use]
    pub fn new(id: impl Into<String>, email: Option<String>) -> Self {
        Self {
            user: UserIdentity {
                id: UserId::new(id),
                email,
            },
        }
    }
}

impl IdentityProvider for StaticIdentity {
    async fn current_user(&self) -> Result<UserIdentity, StoreError> {
        Ok(self.user.clone())
    }
}

// =============================================================================
// PERMISSION DESCRIPTORS
// =============================================================================

/// Read descriptor for a team.
#[must_use]
pub fn team_read(team: &TeamId) -> String {
    format!("read(\"team:{team}\")")
}

/// Update descriptor for a team.
#[must_use]
pub fn team_update(team: &TeamId) -> String {
    format!("update(\"team:{team}\")")
}

/// Delete descriptor for a team.
#[must_use]
pub fn team_delete(team: &TeamId) -> String {
    format!("delete(\"team:{team}\")")
}

/// Full descriptor set for rows owned by a team.
#[must_use]
pub fn team_full(team: &TeamId) -> Vec<String> {
    vec![team_read(team), team_update(team), team_delete(team)]
}

/// Descriptor set for audit rows reviewed by a team: readable and
/// reviewable, never deletable.
#[must_use]
pub fn review_permissions(team: &TeamId) -> Vec<String> {
    vec![team_read(team), team_update(team)]
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_identity_resolves() {
        let identity = StaticIdentity::new("u1", Some("u1@example.org".into()));
        let user = identity.current_user().await.expect("resolve");
        assert_eq!(user.id, UserId::new("u1"));
        assert_eq!(user.email.as_deref(), Some("u1@example.org"));
    }

    #[test]
    fn descriptor_shapes() {
        let team = TeamId::new("editors");
        assert_eq!(team_read(&team), "read(\"team:editors\")");
        assert_eq!(team_full(&team).len(), 3);
        assert_eq!(review_permissions(&team).len(), 2);
    }
}
