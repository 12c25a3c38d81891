//! Access management and the sequential verification workflow.
//!
//! `AccessService` is the admin-facing surface for granting, changing and
//! revoking per-resource roles, and the single entry point for creating
//! logbooks (which is what pins the ownership invariant: creation and the
//! Owner grant are one store operation).
//!
//! `VerificationWorkflow` enforces the sign-off order: the Owner verifies
//! first, then any Supervisor, and only then may a principal with the
//! administrative assessment capability mark the resource assessed.
//! Transitions on one resource are strictly serialized; resources never
//! contend with each other.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::audit::{AuditEvent, AuditEventType, AuditRecorder};
use crate::error::{AccessError, Result};
use crate::rbac::models::{
    AccessId, PrincipalId, Resource, ResourceId, ResourceRole, VerificationState,
};
use crate::rbac::roles::GlobalRoleStore;
use crate::store::AccessStore;

// ═══════════════════════════════════════════════════════════════════════════════
// Access management
// ═══════════════════════════════════════════════════════════════════════════════

/// Admin-facing access management over the store, with audit emission.
#[derive(Clone)]
pub struct AccessService {
    store: Arc<dyn AccessStore>,
    audit: Arc<dyn AuditRecorder>,
}

impl AccessService {
    pub fn new(store: Arc<dyn AccessStore>, audit: Arc<dyn AuditRecorder>) -> Self {
        Self { store, audit }
    }

    /// Create a logbook. The creator receives the Owner role in the same
    /// atomic unit; a logbook can never exist without its owner.
    pub async fn create_logbook(&self, creator: &PrincipalId) -> Result<Resource> {
        let (resource, owner) = self.store.create_resource(creator).await?;
        info!(resource = %resource.id, creator = %creator, "logbook created");
        self.audit.record(AuditEvent::new(
            AuditEventType::AccessGranted,
            resource.id.clone(),
            creator.clone(),
            serde_json::json!({
                "access_id": owner.id,
                "role": ResourceRole::Owner.as_str(),
                "on_creation": true,
            }),
        ));
        Ok(resource)
    }

    /// Grant a role on a resource. The pair must not already have a row;
    /// callers change the existing row's role instead.
    pub async fn grant_access(
        &self,
        resource: &ResourceId,
        principal: &PrincipalId,
        role_name: &str,
        granted_by: &PrincipalId,
    ) -> Result<AccessId> {
        let role = parse_role(role_name)?;
        let row = self
            .store
            .grant(principal, resource, role, Some(granted_by))
            .await?;
        debug!(resource = %resource, principal = %principal, role = role_name, "access granted");
        self.audit.record(AuditEvent::new(
            AuditEventType::AccessGranted,
            resource.clone(),
            principal.clone(),
            serde_json::json!({
                "access_id": row.id,
                "role": role.as_str(),
                "granted_by": granted_by,
            }),
        ));
        Ok(row.id)
    }

    /// Replace an access row's role. Resets its verification flag: sign-off
    /// is role-specific and does not survive reassignment.
    pub async fn change_access_role(
        &self,
        id: &AccessId,
        new_role_name: &str,
        actor: &PrincipalId,
    ) -> Result<()> {
        let new_role = parse_role(new_role_name)?;
        let before = self
            .store
            .get_access(id)
            .await?
            .ok_or_else(|| AccessError::UnknownAccess(id.to_string()))?;
        let after = self.store.change_role(id, new_role).await?;
        self.audit.record(AuditEvent::new(
            AuditEventType::RoleChanged,
            after.resource.clone(),
            after.principal.clone(),
            serde_json::json!({
                "access_id": id,
                "from": before.role.as_str(),
                "to": new_role.as_str(),
                "changed_by": actor,
            }),
        ));
        Ok(())
    }

    /// Delete an access row. The sole Owner row of a live resource cannot be
    /// revoked; ownership is transferred, never deleted.
    pub async fn revoke_access(&self, id: &AccessId, actor: &PrincipalId) -> Result<()> {
        let removed = self.store.revoke(id).await?;
        self.audit.record(AuditEvent::new(
            AuditEventType::AccessRevoked,
            removed.resource.clone(),
            removed.principal.clone(),
            serde_json::json!({
                "access_id": id,
                "role": removed.role.as_str(),
                "revoked_by": actor,
            }),
        ));
        Ok(())
    }
}

fn parse_role(name: &str) -> Result<ResourceRole> {
    ResourceRole::parse(name).ok_or_else(|| AccessError::UnknownRole(name.to_string()))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Verification workflow
// ═══════════════════════════════════════════════════════════════════════════════

/// Per-resource state machine: Unverified → OwnerVerified → FullyVerified →
/// Assessed (terminal).
pub struct VerificationWorkflow {
    store: Arc<dyn AccessStore>,
    roles: GlobalRoleStore,
    audit: Arc<dyn AuditRecorder>,
    /// The global permission that authorizes assessment, independent of any
    /// resource role.
    assess_permission: String,
    /// Per-resource transition locks; cross-resource operations never
    /// contend.
    locks: DashMap<ResourceId, Arc<Mutex<()>>>,
}

impl VerificationWorkflow {
    pub fn new(
        store: Arc<dyn AccessStore>,
        roles: GlobalRoleStore,
        audit: Arc<dyn AuditRecorder>,
        assess_permission: impl Into<String>,
    ) -> Self {
        Self {
            store,
            roles,
            audit,
            assess_permission: assess_permission.into(),
            locks: DashMap::new(),
        }
    }

    fn lock_for(&self, resource: &ResourceId) -> Arc<Mutex<()>> {
        self.locks
            .entry(resource.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the transition lock for a resource. Call after deleting the
    /// resource; `Assessed` evicts its own entry since the state is
    /// terminal.
    pub fn release(&self, resource: &ResourceId) {
        self.locks.remove(resource);
    }

    /// The current derived state of a resource.
    pub async fn state_of(&self, resource: &ResourceId) -> Result<VerificationState> {
        let res = self
            .store
            .get_resource(resource)
            .await?
            .ok_or_else(|| AccessError::UnknownResource(resource.to_string()))?;
        let rows = self.store.all_access_for(resource).await?;
        Ok(VerificationState::compute(res.assessed, &rows))
    }

    /// Record the Owner's sign-off. Only the resource's Owner may call this;
    /// repeating it is a no-op success.
    pub async fn verify_as_owner(
        &self,
        resource: &ResourceId,
        principal: &PrincipalId,
    ) -> Result<VerificationState> {
        let lock = self.lock_for(resource);
        let _guard = lock.lock().await;
        self.verify_locked(resource, principal, ResourceRole::Owner).await
    }

    /// Record a Supervisor's sign-off. Valid only after the Owner's row is
    /// verified; repeating it is a no-op success.
    pub async fn verify_as_supervisor(
        &self,
        resource: &ResourceId,
        principal: &PrincipalId,
    ) -> Result<VerificationState> {
        let lock = self.lock_for(resource);
        let _guard = lock.lock().await;
        self.verify_locked(resource, principal, ResourceRole::Supervisor).await
    }

    /// External contract form: dispatch on the caller's held role.
    pub async fn verify(
        &self,
        resource: &ResourceId,
        principal: &PrincipalId,
    ) -> Result<VerificationState> {
        let access = self
            .store
            .access_for(principal, resource)
            .await?
            .ok_or(AccessError::NotAResourceRoleHolder)?;
        match access.role {
            ResourceRole::Owner => self.verify_as_owner(resource, principal).await,
            ResourceRole::Supervisor => self.verify_as_supervisor(resource, principal).await,
            _ => Err(AccessError::NotAResourceRoleHolder),
        }
    }

    // Re-reads rows and writes the flag while the per-resource lock is held,
    // so a concurrent transition cannot interleave its check and write.
    async fn verify_locked(
        &self,
        resource: &ResourceId,
        principal: &PrincipalId,
        as_role: ResourceRole,
    ) -> Result<VerificationState> {
        let res = self
            .store
            .get_resource(resource)
            .await?
            .ok_or_else(|| AccessError::UnknownResource(resource.to_string()))?;

        let access = self
            .store
            .access_for(principal, resource)
            .await?
            .ok_or(AccessError::NotAResourceRoleHolder)?;
        if access.role != as_role {
            return Err(AccessError::NotAResourceRoleHolder);
        }

        let rows = self.store.all_access_for(resource).await?;
        if as_role == ResourceRole::Supervisor {
            let owner_verified = rows
                .iter()
                .any(|r| r.role == ResourceRole::Owner && r.verified);
            if !owner_verified {
                return Err(AccessError::OwnerNotYetVerified);
            }
        }

        if !access.verified {
            self.store.set_verified(&access.id, true).await?;
            info!(resource = %resource, principal = %principal, role = %as_role, "verification recorded");
            self.audit.record(AuditEvent::new(
                AuditEventType::Verified,
                resource.clone(),
                principal.clone(),
                serde_json::json!({ "role": as_role.as_str() }),
            ));
        }

        let rows = self.store.all_access_for(resource).await?;
        Ok(VerificationState::compute(res.assessed, &rows))
    }

    /// Mark the resource assessed. Requires the administrative assessment
    /// permission and every existing Owner/Supervisor row verified. One-way:
    /// assessing an already-assessed resource is a no-op success.
    pub async fn assess(&self, resource: &ResourceId, principal: &PrincipalId) -> Result<()> {
        if !self.roles.has_permission(principal, &self.assess_permission) {
            return Err(AccessError::Forbidden {
                required: vec![self.assess_permission.clone()],
                roles: self.roles.roles_of(principal),
                permissions: self.roles.permissions_of(principal).into_iter().collect(),
            });
        }

        let lock = self.lock_for(resource);
        let _guard = lock.lock().await;

        let res = self
            .store
            .get_resource(resource)
            .await?
            .ok_or_else(|| AccessError::UnknownResource(resource.to_string()))?;
        if res.assessed {
            return Ok(());
        }

        let rows = self.store.all_access_for(resource).await?;
        let pending: Vec<String> = rows
            .iter()
            .filter(|r| r.role.is_verifying() && !r.verified)
            .map(|r| r.principal.to_string())
            .collect();
        if !pending.is_empty() {
            return Err(AccessError::VerificationIncomplete { pending });
        }

        self.store.mark_assessed(resource).await?;
        info!(resource = %resource, assessor = %principal, "resource assessed");
        self.audit.record(AuditEvent::new(
            AuditEventType::Assessed,
            resource.clone(),
            principal.clone(),
            serde_json::Value::Null,
        ));
        // Terminal state: every later transition on this resource is a
        // no-op, so the lock entry can go.
        self.locks.remove(resource);
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::NullRecorder;
    use crate::catalog::PermissionCatalog;
    use crate::store::MemoryStore;

    fn p(id: &str) -> PrincipalId {
        PrincipalId::new(id)
    }

    struct Fixture {
        service: AccessService,
        workflow: VerificationWorkflow,
        roles: GlobalRoleStore,
    }

    fn fixture() -> Fixture {
        let store: Arc<dyn AccessStore> = Arc::new(MemoryStore::new());
        let audit: Arc<dyn AuditRecorder> = Arc::new(NullRecorder);
        let catalog = Arc::new(PermissionCatalog::builtin());
        let roles = GlobalRoleStore::with_builtin_roles(catalog);
        Fixture {
            service: AccessService::new(store.clone(), audit.clone()),
            workflow: VerificationWorkflow::new(
                store,
                roles.clone(),
                audit,
                "assessment.perform",
            ),
            roles,
        }
    }

    #[tokio::test]
    async fn test_supervisor_blocked_until_owner_verifies() {
        let f = fixture();
        let resource = f.service.create_logbook(&p("u1")).await.unwrap();
        f.service
            .grant_access(&resource.id, &p("u2"), "supervisor", &p("u1"))
            .await
            .unwrap();

        let err = f.workflow.verify_as_supervisor(&resource.id, &p("u2")).await.unwrap_err();
        assert!(matches!(err, AccessError::OwnerNotYetVerified));

        let state = f.workflow.verify_as_owner(&resource.id, &p("u1")).await.unwrap();
        assert_eq!(state, VerificationState::OwnerVerified);

        let state = f.workflow.verify_as_supervisor(&resource.id, &p("u2")).await.unwrap();
        assert_eq!(state, VerificationState::FullyVerified);
    }

    #[tokio::test]
    async fn test_assess_evicts_transition_lock() {
        let f = fixture();
        f.roles.assign_role(&p("admin1"), "assessor").unwrap();

        let resource = f.service.create_logbook(&p("u1")).await.unwrap();
        f.workflow.verify_as_owner(&resource.id, &p("u1")).await.unwrap();
        assert!(f.workflow.locks.contains_key(&resource.id));

        f.workflow.assess(&resource.id, &p("admin1")).await.unwrap();
        assert!(f.workflow.locks.is_empty());

        // Explicit release covers deletion flows that never reach Assessed.
        let other = f.service.create_logbook(&p("u1")).await.unwrap();
        f.workflow.verify_as_owner(&other.id, &p("u1")).await.unwrap();
        f.workflow.release(&other.id);
        assert!(f.workflow.locks.is_empty());
    }

    #[tokio::test]
    async fn test_verify_requires_matching_role() {
        let f = fixture();
        let resource = f.service.create_logbook(&p("u1")).await.unwrap();
        f.service
            .grant_access(&resource.id, &p("u3"), "viewer", &p("u1"))
            .await
            .unwrap();

        // Viewer holds a row but not a verifying role.
        assert!(matches!(
            f.workflow.verify(&resource.id, &p("u3")).await,
            Err(AccessError::NotAResourceRoleHolder)
        ));
        // No row at all.
        assert!(matches!(
            f.workflow.verify(&resource.id, &p("ghost")).await,
            Err(AccessError::NotAResourceRoleHolder)
        ));
        // The supervisor path rejects a principal whose row is Owner-typed.
        assert!(matches!(
            f.workflow.verify_as_supervisor(&resource.id, &p("u1")).await,
            Err(AccessError::NotAResourceRoleHolder)
        ));
    }

    #[tokio::test]
    async fn test_verify_is_idempotent() {
        let f = fixture();
        let resource = f.service.create_logbook(&p("u1")).await.unwrap();

        let first = f.workflow.verify_as_owner(&resource.id, &p("u1")).await.unwrap();
        let second = f.workflow.verify_as_owner(&resource.id, &p("u1")).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(second, VerificationState::FullyVerified);
    }

    #[tokio::test]
    async fn test_owner_alone_suffices_without_supervisor() {
        let f = fixture();
        let resource = f.service.create_logbook(&p("u1")).await.unwrap();

        let state = f.workflow.verify_as_owner(&resource.id, &p("u1")).await.unwrap();
        assert_eq!(state, VerificationState::FullyVerified);
    }

    #[tokio::test]
    async fn test_assess_requires_capability_and_complete_verification() {
        let f = fixture();
        let resource = f.service.create_logbook(&p("u1")).await.unwrap();
        f.service
            .grant_access(&resource.id, &p("u2"), "supervisor", &p("u1"))
            .await
            .unwrap();
        f.roles.assign_role(&p("admin1"), "assessor").unwrap();

        // No capability: Forbidden regardless of verification state.
        assert!(matches!(
            f.workflow.assess(&resource.id, &p("u1")).await,
            Err(AccessError::Forbidden { .. })
        ));

        // Capability but incomplete verification.
        match f.workflow.assess(&resource.id, &p("admin1")).await {
            Err(AccessError::VerificationIncomplete { pending }) => {
                assert_eq!(pending.len(), 2);
            }
            other => panic!("expected VerificationIncomplete, got {other:?}"),
        }

        f.workflow.verify_as_owner(&resource.id, &p("u1")).await.unwrap();
        f.workflow.verify_as_supervisor(&resource.id, &p("u2")).await.unwrap();
        f.workflow.assess(&resource.id, &p("admin1")).await.unwrap();

        assert_eq!(
            f.workflow.state_of(&resource.id).await.unwrap(),
            VerificationState::Assessed
        );

        // One-way and idempotent.
        f.workflow.assess(&resource.id, &p("admin1")).await.unwrap();
        assert_eq!(
            f.workflow.state_of(&resource.id).await.unwrap(),
            VerificationState::Assessed
        );
    }

    #[tokio::test]
    async fn test_role_change_regresses_verification_but_not_assessment() {
        let f = fixture();
        let resource = f.service.create_logbook(&p("u1")).await.unwrap();
        let supervisor_access = f
            .service
            .grant_access(&resource.id, &p("u2"), "supervisor", &p("u1"))
            .await
            .unwrap();

        f.workflow.verify_as_owner(&resource.id, &p("u1")).await.unwrap();
        f.workflow.verify_as_supervisor(&resource.id, &p("u2")).await.unwrap();
        assert_eq!(
            f.workflow.state_of(&resource.id).await.unwrap(),
            VerificationState::FullyVerified
        );

        // Reassigning the supervisor's role clears their sign-off and
        // regresses the state.
        f.service
            .change_access_role(&supervisor_access, "supervisor", &p("u1"))
            .await
            .unwrap();
        assert_eq!(
            f.workflow.state_of(&resource.id).await.unwrap(),
            VerificationState::OwnerVerified
        );

        // But an assessed resource never regresses.
        f.workflow.verify_as_supervisor(&resource.id, &p("u2")).await.unwrap();
        f.roles.assign_role(&p("admin1"), "assessor").unwrap();
        f.workflow.assess(&resource.id, &p("admin1")).await.unwrap();
        f.service
            .change_access_role(&supervisor_access, "supervisor", &p("u1"))
            .await
            .unwrap();
        assert_eq!(
            f.workflow.state_of(&resource.id).await.unwrap(),
            VerificationState::Assessed
        );
    }

    #[tokio::test]
    async fn test_revoking_verified_supervisor_keeps_state() {
        let f = fixture();
        let resource = f.service.create_logbook(&p("u1")).await.unwrap();
        let supervisor_access = f
            .service
            .grant_access(&resource.id, &p("u2"), "supervisor", &p("u1"))
            .await
            .unwrap();

        f.workflow.verify_as_owner(&resource.id, &p("u1")).await.unwrap();
        f.workflow.verify_as_supervisor(&resource.id, &p("u2")).await.unwrap();
        f.service.revoke_access(&supervisor_access, &p("u1")).await.unwrap();

        // Remaining rows (owner only) are all verified.
        assert_eq!(
            f.workflow.state_of(&resource.id).await.unwrap(),
            VerificationState::FullyVerified
        );
    }

    #[tokio::test]
    async fn test_grant_unknown_role_name() {
        let f = fixture();
        let resource = f.service.create_logbook(&p("u1")).await.unwrap();
        assert!(matches!(
            f.service
                .grant_access(&resource.id, &p("u2"), "manager", &p("u1"))
                .await,
            Err(AccessError::UnknownRole(_))
        ));
    }

    #[tokio::test]
    async fn test_audit_events_emitted() {
        use std::sync::Mutex;

        #[derive(Default)]
        struct Collecting(Mutex<Vec<AuditEventType>>);
        impl AuditRecorder for Collecting {
            fn record(&self, event: AuditEvent) {
                self.0.lock().unwrap().push(event.event_type);
            }
        }

        let store: Arc<dyn AccessStore> = Arc::new(MemoryStore::new());
        let audit = Arc::new(Collecting::default());
        let catalog = Arc::new(PermissionCatalog::builtin());
        let roles = GlobalRoleStore::with_builtin_roles(catalog);
        let service = AccessService::new(store.clone(), audit.clone());
        let workflow =
            VerificationWorkflow::new(store, roles.clone(), audit.clone(), "assessment.perform");
        roles.assign_role(&p("admin1"), "assessor").unwrap();

        let resource = service.create_logbook(&p("u1")).await.unwrap();
        let viewer = service
            .grant_access(&resource.id, &p("u2"), "viewer", &p("u1"))
            .await
            .unwrap();
        service.change_access_role(&viewer, "editor", &p("u1")).await.unwrap();
        service.revoke_access(&viewer, &p("u1")).await.unwrap();
        workflow.verify_as_owner(&resource.id, &p("u1")).await.unwrap();
        workflow.assess(&resource.id, &p("admin1")).await.unwrap();

        let seen = audit.0.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![
                AuditEventType::AccessGranted,
                AuditEventType::AccessGranted,
                AuditEventType::RoleChanged,
                AuditEventType::AccessRevoked,
                AuditEventType::Verified,
                AuditEventType::Assessed,
            ]
        );
    }
}
