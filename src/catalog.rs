//! Immutable permission and resource-role catalogs.
//!
//! Both catalogs are configuration data: built once at process start, shared
//! behind `Arc`, and never mutated afterwards. Changing the catalog is a
//! controlled migration, not a runtime API.

use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

use crate::error::{AccessError, Result};
use crate::rbac::models::{ResourceRole, RiskLevel};

/// Dotted permission-name convention: `module.action` with an optional
/// trailing `.scope` segment.
static NAME_PATTERN: OnceLock<Regex> = OnceLock::new();

fn name_pattern() -> &'static Regex {
    NAME_PATTERN.get_or_init(|| {
        Regex::new(r"^[a-z][a-z0-9_]*\.[a-z][a-z0-9_]*(\.[a-z][a-z0-9_]*)?$")
            .expect("permission name pattern is valid")
    })
}

/// One global permission as presented to admin tooling.
#[derive(Debug, Clone, Serialize)]
pub struct PermissionInfo {
    pub label: String,
    pub description: String,
    pub risk_level: RiskLevel,
}

/// A module grouping of permissions, with display metadata.
#[derive(Debug, Clone, Serialize)]
pub struct ModuleGroup {
    pub label: String,
    pub icon: String,
    pub permissions: BTreeMap<String, PermissionInfo>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// PermissionCatalog
// ═══════════════════════════════════════════════════════════════════════════════

/// The process-wide registry of global permissions, grouped by module.
#[derive(Debug)]
pub struct PermissionCatalog {
    modules: BTreeMap<String, ModuleGroup>,
    // Flattened name set, kept alongside for O(log n) existence checks.
    names: BTreeSet<String>,
}

impl PermissionCatalog {
    /// Build a catalog from module groups. Panics on malformed permission
    /// names or duplicates: the catalog is static configuration and a bad
    /// entry is a programming error, caught at startup.
    pub fn new(modules: BTreeMap<String, ModuleGroup>) -> Self {
        let mut names = BTreeSet::new();
        for (module, group) in &modules {
            for name in group.permissions.keys() {
                assert!(
                    name_pattern().is_match(name),
                    "permission name {name:?} in module {module:?} violates the naming convention"
                );
                assert!(
                    names.insert(name.clone()),
                    "duplicate permission name {name:?}"
                );
            }
        }
        Self { modules, names }
    }

    /// Build the built-in catalog for the logbook application.
    pub fn builtin() -> Self {
        let mut modules = BTreeMap::new();

        modules.insert(
            "users".to_string(),
            module("User administration", "users", &[
                ("users.view", "View users", "List user accounts and their profile details", RiskLevel::Low),
                ("users.invite", "Invite users", "Send account invitations to new users", RiskLevel::Medium),
                ("users.manage", "Manage users", "Create, edit, deactivate and delete user accounts", RiskLevel::High),
                ("users.roles.assign", "Assign roles", "Grant or revoke global roles held by a user", RiskLevel::High),
            ]),
        );
        modules.insert(
            "roles".to_string(),
            module("Roles & permissions", "shield", &[
                ("roles.view", "View roles", "Inspect global roles and their permission sets", RiskLevel::Low),
                ("roles.manage", "Manage roles", "Define, rename and delete global roles", RiskLevel::Critical),
            ]),
        );
        modules.insert(
            "logbooks".to_string(),
            module("Logbook templates", "book", &[
                ("logbooks.view", "View logbooks", "Browse logbook templates visible to the account", RiskLevel::Low),
                ("logbooks.create", "Create logbooks", "Create new logbook templates (creator becomes owner)", RiskLevel::Medium),
                ("logbooks.export", "Export logbooks", "Export logbook contents for archival purposes", RiskLevel::Medium),
                ("logbooks.entries.edit", "Edit entries", "Edit logbook entries subject to resource-role checks", RiskLevel::Medium),
                ("logbooks.delete", "Delete logbooks", "Permanently delete logbook templates and their entries", RiskLevel::High),
            ]),
        );
        modules.insert(
            "assessment".to_string(),
            module("Assessment", "clipboard", &[
                ("assessment.view", "View assessments", "See verification and assessment status of logbooks", RiskLevel::Low),
                ("assessment.perform", "Perform assessment", "Mark fully verified logbooks as assessed (one-way)", RiskLevel::Critical),
            ]),
        );
        modules.insert(
            "audit".to_string(),
            module("Audit trail", "scroll", &[
                ("audit.view", "View audit trail", "Read the immutable audit event stream", RiskLevel::Medium),
            ]),
        );

        Self::new(modules)
    }

    /// The full module → group mapping. Pure and deterministic.
    pub fn all(&self) -> &BTreeMap<String, ModuleGroup> {
        &self.modules
    }

    /// The flattened set of all permission names.
    pub fn permission_names(&self) -> &BTreeSet<String> {
        &self.names
    }

    /// All permission names at the given risk level. An unknown level name
    /// is not an error: it simply matches nothing.
    pub fn by_risk_level(&self, level: &str) -> BTreeSet<&str> {
        let Some(level) = RiskLevel::parse(level) else {
            return BTreeSet::new();
        };
        self.modules
            .values()
            .flat_map(|g| g.permissions.iter())
            .filter(|(_, info)| info.risk_level == level)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    pub fn exists(&self, name: &str) -> bool {
        self.names.contains(name)
    }
}

fn module(
    label: &str,
    icon: &str,
    perms: &[(&str, &str, &str, RiskLevel)],
) -> ModuleGroup {
    ModuleGroup {
        label: label.to_string(),
        icon: icon.to_string(),
        permissions: perms
            .iter()
            .map(|(name, label, description, risk)| {
                (
                    name.to_string(),
                    PermissionInfo {
                        label: label.to_string(),
                        description: description.to_string(),
                        risk_level: *risk,
                    },
                )
            })
            .collect(),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ResourceRoleCatalog
// ═══════════════════════════════════════════════════════════════════════════════

/// The fixed mapping from resource roles to resource-scoped permissions.
#[derive(Debug)]
pub struct ResourceRoleCatalog {
    permissions: BTreeMap<ResourceRole, BTreeSet<String>>,
}

impl ResourceRoleCatalog {
    pub fn builtin() -> Self {
        let mut permissions = BTreeMap::new();
        permissions.insert(
            ResourceRole::Owner,
            perms(&[
                "template.view",
                "template.edit",
                "entries.view",
                "entries.edit",
                "access.manage",
                "verification.sign",
            ]),
        );
        permissions.insert(
            ResourceRole::Editor,
            perms(&["template.view", "template.edit", "entries.view", "entries.edit"]),
        );
        permissions.insert(
            ResourceRole::Supervisor,
            perms(&["template.view", "entries.view", "verification.sign"]),
        );
        permissions.insert(
            ResourceRole::Viewer,
            perms(&["template.view", "entries.view"]),
        );
        Self { permissions }
    }

    /// Permissions implied by a resource role, looked up by name.
    ///
    /// An unknown role name is an error, distinct from a role with zero
    /// permissions.
    pub fn role_permissions(&self, role_name: &str) -> Result<&BTreeSet<String>> {
        let role = ResourceRole::parse(role_name)
            .ok_or_else(|| AccessError::UnknownRole(role_name.to_string()))?;
        Ok(self
            .permissions
            .get(&role)
            .expect("every resource role is present in the catalog"))
    }

    pub fn permissions_of(&self, role: ResourceRole) -> &BTreeSet<String> {
        self.permissions
            .get(&role)
            .expect("every resource role is present in the catalog")
    }
}

fn perms(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|s| s.to_string()).collect()
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_module_has_entries() {
        let catalog = PermissionCatalog::builtin();
        for (module, group) in catalog.all() {
            assert!(
                !group.permissions.is_empty(),
                "module {module} declares no permissions"
            );
        }
    }

    #[test]
    fn test_names_match_convention() {
        let catalog = PermissionCatalog::builtin();
        for name in catalog.permission_names() {
            assert!(name_pattern().is_match(name), "bad name {name}");
        }
    }

    #[test]
    fn test_descriptions_are_meaningful() {
        let catalog = PermissionCatalog::builtin();
        for group in catalog.all().values() {
            for (name, info) in &group.permissions {
                assert!(
                    info.description.len() >= 10,
                    "description of {name} is too short"
                );
            }
        }
    }

    #[test]
    fn test_risk_distribution_policy() {
        // Organizational policy: at least half of all permissions must be
        // low or medium risk.
        let catalog = PermissionCatalog::builtin();
        let total = catalog.permission_names().len();
        let low_medium =
            catalog.by_risk_level("low").len() + catalog.by_risk_level("medium").len();
        assert!(
            low_medium * 2 >= total,
            "low+medium permissions ({low_medium}) below half of {total}"
        );
    }

    #[test]
    fn test_by_risk_level_unknown_is_empty() {
        let catalog = PermissionCatalog::builtin();
        assert!(catalog.by_risk_level("catastrophic").is_empty());
    }

    #[test]
    fn test_exists() {
        let catalog = PermissionCatalog::builtin();
        assert!(catalog.exists("assessment.perform"));
        assert!(catalog.exists("logbooks.entries.edit"));
        assert!(!catalog.exists("logbooks.publish"));
    }

    #[test]
    fn test_resource_role_lookup() {
        let catalog = ResourceRoleCatalog::builtin();
        let owner = catalog.role_permissions("owner").unwrap();
        assert!(owner.contains("access.manage"));
        assert!(owner.contains("verification.sign"));

        let viewer = catalog.role_permissions("viewer").unwrap();
        assert!(!viewer.contains("entries.edit"));
    }

    #[test]
    fn test_resource_role_unknown_is_error() {
        let catalog = ResourceRoleCatalog::builtin();
        assert!(matches!(
            catalog.role_permissions("manager"),
            Err(AccessError::UnknownRole(_))
        ));
    }

    #[test]
    fn test_supervisor_cannot_edit() {
        let catalog = ResourceRoleCatalog::builtin();
        let supervisor = catalog.permissions_of(ResourceRole::Supervisor);
        assert!(supervisor.contains("verification.sign"));
        assert!(!supervisor.contains("template.edit"));
    }

    #[test]
    #[should_panic(expected = "naming convention")]
    fn test_malformed_name_rejected_at_startup() {
        let mut modules = BTreeMap::new();
        modules.insert(
            "bad".to_string(),
            module("Bad", "x", &[("BadName", "Bad", "A malformed entry", RiskLevel::Low)]),
        );
        PermissionCatalog::new(modules);
    }
}
