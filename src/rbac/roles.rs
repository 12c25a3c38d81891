//! Global role registry and per-principal role assignments.
//!
//! This is the single code path for "does this user hold permission X via
//! some role" — request handlers never join roles to permissions themselves.
//!
//! Thread-safe via `DashMap`.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::catalog::PermissionCatalog;
use crate::error::{AccessError, Result};
use crate::rbac::models::PrincipalId;

/// An application-wide role: a named set of global permission names.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalRole {
    /// Unique, human-readable name.
    pub name: String,
    pub description: String,
    pub permissions: BTreeSet<String>,
    /// Built-in roles cannot be deleted.
    pub is_system: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl GlobalRole {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        permissions: BTreeSet<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            description: description.into(),
            permissions,
            is_system: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Mark this as a built-in system role.
    pub fn system(mut self) -> Self {
        self.is_system = true;
        self
    }
}

/// Holds global roles and which principals hold them, plus direct
/// per-principal permission grants (evaluated identically to role-derived
/// permissions).
#[derive(Debug, Clone)]
pub struct GlobalRoleStore {
    catalog: Arc<PermissionCatalog>,
    roles: Arc<DashMap<String, GlobalRole>>,
    /// principal → set of held role names.
    assignments: Arc<DashMap<PrincipalId, BTreeSet<String>>>,
    /// principal → directly granted permission names.
    direct: Arc<DashMap<PrincipalId, BTreeSet<String>>>,
}

impl GlobalRoleStore {
    pub fn new(catalog: Arc<PermissionCatalog>) -> Self {
        Self {
            catalog,
            roles: Arc::new(DashMap::new()),
            assignments: Arc::new(DashMap::new()),
            direct: Arc::new(DashMap::new()),
        }
    }

    /// Create a store preloaded with the built-in roles.
    pub fn with_builtin_roles(catalog: Arc<PermissionCatalog>) -> Self {
        let store = Self::new(catalog.clone());
        for role in super::builtin::BuiltinRole::all_defaults(&catalog) {
            store
                .define_role(role)
                .expect("built-in roles reference only catalog permissions");
        }
        store
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Role registry
    // ─────────────────────────────────────────────────────────────────────────

    /// Register a role. Every permission it names must exist in the catalog.
    pub fn define_role(&self, role: GlobalRole) -> Result<()> {
        for perm in &role.permissions {
            if !self.catalog.exists(perm) {
                return Err(AccessError::UnknownPermission(perm.clone()));
            }
        }
        debug!(role = %role.name, "defining global role");
        self.roles.insert(role.name.clone(), role);
        Ok(())
    }

    pub fn get_role(&self, name: &str) -> Option<GlobalRole> {
        self.roles.get(name).map(|r| r.clone())
    }

    pub fn role_names(&self) -> Vec<String> {
        self.roles.iter().map(|r| r.key().clone()).collect()
    }

    /// Rename a role, preserving its identity: every assignment follows the
    /// new name. The new name must be free.
    pub fn rename_role(&self, old: &str, new: &str) -> Result<()> {
        if old == new {
            return Ok(());
        }
        if self.roles.contains_key(new) {
            return Err(AccessError::RoleNameTaken(new.to_string()));
        }
        let (_, mut role) = self
            .roles
            .remove(old)
            .ok_or_else(|| AccessError::UnknownRole(old.to_string()))?;
        role.name = new.to_string();
        role.updated_at = Utc::now();
        self.roles.insert(new.to_string(), role);

        for mut held in self.assignments.iter_mut() {
            if held.remove(old) {
                held.insert(new.to_string());
            }
        }
        Ok(())
    }

    /// Delete a role. Blocked for system roles and while any principal still
    /// holds it.
    pub fn delete_role(&self, name: &str) -> Result<()> {
        let role = self
            .roles
            .get(name)
            .ok_or_else(|| AccessError::UnknownRole(name.to_string()))?;
        if role.is_system {
            warn!(role = name, "refusing to delete system role");
            return Err(AccessError::RoleInUse(name.to_string()));
        }
        drop(role);
        let held = self.assignments.iter().any(|a| a.contains(name));
        if held {
            return Err(AccessError::RoleInUse(name.to_string()));
        }
        self.roles.remove(name);
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Assignments
    // ─────────────────────────────────────────────────────────────────────────

    /// Assign a role to a principal. Idempotent: re-assigning a held role is
    /// a no-op success. An unknown role name is an error.
    pub fn assign_role(&self, principal: &PrincipalId, role_name: &str) -> Result<()> {
        if !self.roles.contains_key(role_name) {
            return Err(AccessError::UnknownRole(role_name.to_string()));
        }
        debug!(principal = %principal, role = role_name, "assigning global role");
        self.assignments
            .entry(principal.clone())
            .or_default()
            .insert(role_name.to_string());
        Ok(())
    }

    /// Revoke a role from a principal. Idempotent: revoking a role the
    /// principal does not hold (or that does not exist) is a no-op success.
    pub fn revoke_role(&self, principal: &PrincipalId, role_name: &str) {
        if let Some(mut held) = self.assignments.get_mut(principal) {
            held.remove(role_name);
        }
    }

    /// The role names a principal holds, for diagnostics and UI. Ordering is
    /// not semantically meaningful.
    pub fn roles_of(&self, principal: &PrincipalId) -> Vec<String> {
        self.assignments
            .get(principal)
            .map(|held| held.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn holds_role(&self, principal: &PrincipalId, role_name: &str) -> bool {
        self.assignments
            .get(principal)
            .map(|held| held.contains(role_name))
            .unwrap_or(false)
    }

    /// Whether the principal holds any role from the given set.
    pub fn holds_any_role(&self, principal: &PrincipalId, names: &BTreeSet<String>) -> bool {
        self.assignments
            .get(principal)
            .map(|held| held.iter().any(|r| names.contains(r)))
            .unwrap_or(false)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Direct grants
    // ─────────────────────────────────────────────────────────────────────────

    /// Grant a permission directly to a principal, bypassing roles. Treated
    /// identically to role-derived permissions at evaluation time.
    pub fn grant_permission(&self, principal: &PrincipalId, permission: &str) -> Result<()> {
        if !self.catalog.exists(permission) {
            return Err(AccessError::UnknownPermission(permission.to_string()));
        }
        self.direct
            .entry(principal.clone())
            .or_default()
            .insert(permission.to_string());
        Ok(())
    }

    /// Remove a direct grant. Idempotent.
    pub fn revoke_permission(&self, principal: &PrincipalId, permission: &str) {
        if let Some(mut granted) = self.direct.get_mut(principal) {
            granted.remove(permission);
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Evaluation
    // ─────────────────────────────────────────────────────────────────────────

    /// Union of permissions across all held roles plus direct grants.
    pub fn permissions_of(&self, principal: &PrincipalId) -> BTreeSet<String> {
        let mut perms = BTreeSet::new();
        if let Some(held) = self.assignments.get(principal) {
            for role_name in held.iter() {
                if let Some(role) = self.roles.get(role_name) {
                    perms.extend(role.permissions.iter().cloned());
                }
            }
        }
        if let Some(granted) = self.direct.get(principal) {
            perms.extend(granted.iter().cloned());
        }
        perms
    }

    pub fn has_permission(&self, principal: &PrincipalId, permission: &str) -> bool {
        if let Some(granted) = self.direct.get(principal) {
            if granted.contains(permission) {
                return true;
            }
        }
        if let Some(held) = self.assignments.get(principal) {
            for role_name in held.iter() {
                if let Some(role) = self.roles.get(role_name) {
                    if role.permissions.contains(permission) {
                        return true;
                    }
                }
            }
        }
        false
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> GlobalRoleStore {
        GlobalRoleStore::with_builtin_roles(Arc::new(PermissionCatalog::builtin()))
    }

    fn p(id: &str) -> PrincipalId {
        PrincipalId::new(id)
    }

    #[test]
    fn test_assign_unknown_role_fails() {
        let s = store();
        assert!(matches!(
            s.assign_role(&p("alice"), "warlord"),
            Err(AccessError::UnknownRole(_))
        ));
    }

    #[test]
    fn test_assign_and_revoke_idempotent() {
        let s = store();
        s.assign_role(&p("alice"), "member").unwrap();
        s.assign_role(&p("alice"), "member").unwrap();
        assert_eq!(s.roles_of(&p("alice")), vec!["member".to_string()]);

        s.revoke_role(&p("alice"), "member");
        s.revoke_role(&p("alice"), "member");
        assert!(s.roles_of(&p("alice")).is_empty());

        // Revoking a role that was never held is a no-op success.
        s.revoke_role(&p("bob"), "member");
    }

    #[test]
    fn test_permissions_union_across_roles() {
        let s = store();
        s.assign_role(&p("alice"), "member").unwrap();
        s.assign_role(&p("alice"), "auditor").unwrap();

        let perms = s.permissions_of(&p("alice"));
        assert!(perms.contains("logbooks.create"));
        assert!(perms.contains("audit.view"));
        assert!(!perms.contains("roles.manage"));
    }

    #[test]
    fn test_direct_grant_evaluated_like_roles() {
        let s = store();
        assert!(!s.has_permission(&p("carol"), "logbooks.export"));
        s.grant_permission(&p("carol"), "logbooks.export").unwrap();
        assert!(s.has_permission(&p("carol"), "logbooks.export"));
        assert!(s.permissions_of(&p("carol")).contains("logbooks.export"));

        s.revoke_permission(&p("carol"), "logbooks.export");
        assert!(!s.has_permission(&p("carol"), "logbooks.export"));
    }

    #[test]
    fn test_direct_grant_unknown_permission_fails() {
        let s = store();
        assert!(matches!(
            s.grant_permission(&p("carol"), "logbooks.launch"),
            Err(AccessError::UnknownPermission(_))
        ));
    }

    #[test]
    fn test_define_role_validates_permissions() {
        let s = store();
        let bad = GlobalRole::new("curator", "Curates things", {
            let mut set = BTreeSet::new();
            set.insert("museum.curate".to_string());
            set
        });
        assert!(matches!(
            s.define_role(bad),
            Err(AccessError::UnknownPermission(_))
        ));
    }

    #[test]
    fn test_delete_blocked_while_held() {
        let s = store();
        let role = GlobalRole::new("exporter", "Can export logbooks", {
            let mut set = BTreeSet::new();
            set.insert("logbooks.export".to_string());
            set
        });
        s.define_role(role).unwrap();
        s.assign_role(&p("dave"), "exporter").unwrap();

        assert!(matches!(
            s.delete_role("exporter"),
            Err(AccessError::RoleInUse(_))
        ));

        s.revoke_role(&p("dave"), "exporter");
        s.delete_role("exporter").unwrap();
        assert!(s.get_role("exporter").is_none());
    }

    #[test]
    fn test_delete_system_role_blocked() {
        let s = store();
        assert!(matches!(
            s.delete_role("super_admin"),
            Err(AccessError::RoleInUse(_))
        ));
    }

    #[test]
    fn test_rename_preserves_assignments() {
        let s = store();
        let role = GlobalRole::new("reviewer", "Reviews assessment status", {
            let mut set = BTreeSet::new();
            set.insert("assessment.view".to_string());
            set
        });
        s.define_role(role).unwrap();
        s.assign_role(&p("erin"), "reviewer").unwrap();

        s.rename_role("reviewer", "inspector").unwrap();
        assert!(s.get_role("reviewer").is_none());
        assert!(s.holds_role(&p("erin"), "inspector"));
        assert!(s.has_permission(&p("erin"), "assessment.view"));
    }

    #[test]
    fn test_rename_to_taken_name_fails() {
        let s = store();
        assert!(matches!(
            s.rename_role("member", "auditor"),
            Err(AccessError::RoleNameTaken(_))
        ));
    }
}
