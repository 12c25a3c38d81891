//! The authorization decision layer.
//!
//! Request handlers ask their questions here and nowhere else. Denial is a
//! value, not an error: the evaluator never returns `Err` for "no" — only
//! for storage faults on the resource-scoped path.

use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

use crate::error::{AccessError, Result};
use crate::rbac::models::{PrincipalId, ResourceEntry, ResourceId, ResourceRole};
use crate::rbac::roles::GlobalRoleStore;
use crate::store::AccessStore;

/// Result of a global permission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Permit,
    /// Valid principal, insufficient permissions. Carries the alternatives
    /// that would have satisfied the check and the principal's current
    /// holdings, for operator diagnostics.
    Forbidden {
        required: Vec<String>,
        principal_roles: Vec<String>,
        principal_permissions: Vec<String>,
    },
    /// No principal was presented at all.
    Unauthenticated,
}

impl Decision {
    pub fn is_permitted(&self) -> bool {
        matches!(self, Self::Permit)
    }

    /// Convert into the error taxonomy for callers that want `?`.
    pub fn into_result(self) -> Result<()> {
        match self {
            Self::Permit => Ok(()),
            Self::Unauthenticated => Err(AccessError::Unauthenticated),
            Self::Forbidden {
                required,
                principal_roles,
                principal_permissions,
            } => Err(AccessError::Forbidden {
                required,
                roles: principal_roles,
                permissions: principal_permissions,
            }),
        }
    }
}

/// Combines the global role store and the resource access store into the two
/// total check functions consumed by request handlers.
#[derive(Clone)]
pub struct AuthorizationEvaluator {
    roles: GlobalRoleStore,
    store: Arc<dyn AccessStore>,
    /// Global roles whose holders bypass resource-scoped checks entirely.
    elevated_roles: BTreeSet<String>,
}

impl AuthorizationEvaluator {
    pub fn new(
        roles: GlobalRoleStore,
        store: Arc<dyn AccessStore>,
        elevated_roles: BTreeSet<String>,
    ) -> Self {
        Self {
            roles,
            store,
            elevated_roles,
        }
    }

    pub fn roles(&self) -> &GlobalRoleStore {
        &self.roles
    }

    /// May the principal perform any of the listed global permissions?
    ///
    /// OR semantics: one match suffices. An empty list means "authentication
    /// required only" and permits any authenticated principal.
    pub fn can_global(
        &self,
        principal: Option<&PrincipalId>,
        required: &[String],
    ) -> Decision {
        let Some(principal) = principal else {
            return Decision::Unauthenticated;
        };
        if required.is_empty() {
            return Decision::Permit;
        }
        if required.iter().any(|p| self.roles.has_permission(principal, p)) {
            debug!(principal = %principal, required = ?required, "global check permitted");
            return Decision::Permit;
        }
        Decision::Forbidden {
            required: required.to_vec(),
            principal_roles: self.roles.roles_of(principal),
            principal_permissions: self
                .roles
                .permissions_of(principal)
                .into_iter()
                .collect(),
        }
    }

    /// Convenience over a comma-separated alternative list, the form route
    /// declarations use ("users.manage,users.invite").
    pub fn can_global_spec(&self, principal: Option<&PrincipalId>, spec: &str) -> Decision {
        self.can_global(principal, &parse_spec(spec))
    }

    /// Whether the principal holds a global role from the elevated set.
    pub fn is_elevated(&self, principal: &PrincipalId) -> bool {
        self.roles.holds_any_role(principal, &self.elevated_roles)
    }

    /// May the principal act on this resource in one of the allowed roles?
    ///
    /// Elevated principals bypass resource scoping entirely. Everyone else
    /// needs an access row whose role is in `allowed`.
    pub async fn can_on_resource(
        &self,
        principal: &PrincipalId,
        resource: &ResourceId,
        allowed: &[ResourceRole],
    ) -> Result<bool> {
        if self.is_elevated(principal) {
            return Ok(true);
        }
        let access = self.store.access_for(principal, resource).await?;
        Ok(access.map(|a| allowed.contains(&a.role)).unwrap_or(false))
    }

    /// Original authors keep mutation rights over their own entries
    /// regardless of resource role; used as an additional OR-branch next to
    /// `can_on_resource`.
    pub fn is_original_author(&self, principal: &PrincipalId, entry: &ResourceEntry) -> bool {
        &entry.author == principal
    }
}

/// Split a comma-separated permission spec into its alternatives.
pub(crate) fn parse_spec(spec: &str) -> Vec<String> {
    spec.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
