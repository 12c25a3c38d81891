//! Built-in global roles seeded at startup.
//!
//! | Role        | Description                                                   |
//! |-------------|---------------------------------------------------------------|
//! | Super Admin | Every permission; bypasses resource-scoped checks             |
//! | Admin       | Everything except role administration; also elevated          |
//! | Assessor    | Performs assessments on fully verified logbooks               |
//! | Member      | Creates logbooks and edits entries                            |
//! | Auditor     | Read-only view of audit trail and assessment status           |

use std::collections::BTreeSet;

use crate::catalog::PermissionCatalog;
use super::roles::GlobalRole;

/// Built-in role templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinRole {
    SuperAdmin,
    Admin,
    Assessor,
    Member,
    Auditor,
}

impl BuiltinRole {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SuperAdmin => "super_admin",
            Self::Admin => "admin",
            Self::Assessor => "assessor",
            Self::Member => "member",
            Self::Auditor => "auditor",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::SuperAdmin => "Full access to every capability, including role administration",
            Self::Admin => "Administers users and logbooks; cannot change role definitions",
            Self::Assessor => "Marks fully verified logbooks as assessed",
            Self::Member => "Creates logbook templates and edits entries",
            Self::Auditor => "Read-only access to audit events and assessment status",
        }
    }

    /// The permission set for this role, resolved against the catalog so
    /// that built-ins always track the full permission list.
    pub fn permissions(&self, catalog: &PermissionCatalog) -> BTreeSet<String> {
        match self {
            Self::SuperAdmin => catalog.permission_names().clone(),
            Self::Admin => catalog
                .permission_names()
                .iter()
                .filter(|name| *name != "roles.manage")
                .cloned()
                .collect(),
            Self::Assessor => names(&["assessment.view", "assessment.perform", "logbooks.view"]),
            Self::Member => names(&[
                "logbooks.view",
                "logbooks.create",
                "logbooks.entries.edit",
            ]),
            Self::Auditor => names(&["audit.view", "logbooks.view", "assessment.view"]),
        }
    }

    pub fn to_role(&self, catalog: &PermissionCatalog) -> GlobalRole {
        GlobalRole::new(self.name(), self.description(), self.permissions(catalog)).system()
    }

    pub fn all() -> [BuiltinRole; 5] {
        [
            Self::SuperAdmin,
            Self::Admin,
            Self::Assessor,
            Self::Member,
            Self::Auditor,
        ]
    }

    pub fn all_defaults(catalog: &PermissionCatalog) -> Vec<GlobalRole> {
        Self::all().iter().map(|r| r.to_role(catalog)).collect()
    }
}

fn names(list: &[&str]) -> BTreeSet<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_super_admin_has_everything() {
        let catalog = PermissionCatalog::builtin();
        let role = BuiltinRole::SuperAdmin.to_role(&catalog);
        assert_eq!(&role.permissions, catalog.permission_names());
        assert!(role.is_system);
    }

    #[test]
    fn test_admin_cannot_manage_roles() {
        let catalog = PermissionCatalog::builtin();
        let role = BuiltinRole::Admin.to_role(&catalog);
        assert!(role.permissions.contains("users.manage"));
        assert!(!role.permissions.contains("roles.manage"));
    }

    #[test]
    fn test_assessor_can_assess_but_not_manage_users() {
        let catalog = PermissionCatalog::builtin();
        let role = BuiltinRole::Assessor.to_role(&catalog);
        assert!(role.permissions.contains("assessment.perform"));
        assert!(!role.permissions.contains("users.manage"));
    }

    #[test]
    fn test_builtin_permissions_exist_in_catalog() {
        let catalog = PermissionCatalog::builtin();
        for builtin in BuiltinRole::all() {
            for perm in builtin.permissions(&catalog) {
                assert!(catalog.exists(&perm), "{perm} missing from catalog");
            }
        }
    }

    #[test]
    fn test_all_defaults() {
        let catalog = PermissionCatalog::builtin();
        let roles = BuiltinRole::all_defaults(&catalog);
        assert_eq!(roles.len(), 5);
        assert!(roles.iter().all(|r| r.is_system));
    }
}
