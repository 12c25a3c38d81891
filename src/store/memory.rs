//! In-memory `AccessStore`.
//!
//! Backs tests and single-process deployments. Pair uniqueness rides on
//! `DashMap` entry occupancy: the vacant-entry insert is atomic per key, so
//! concurrent grants for the same (principal, resource) pair cannot both
//! succeed.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{AccessError, Result};
use crate::rbac::models::{
    AccessId, PrincipalId, Resource, ResourceAccess, ResourceId, ResourceRole,
};

use super::AccessStore;

#[derive(Debug, Default)]
pub struct MemoryStore {
    resources: DashMap<ResourceId, Resource>,
    access: DashMap<AccessId, ResourceAccess>,
    by_pair: DashMap<(PrincipalId, ResourceId), AccessId>,
    // Serializes owner-affecting mutations per resource. The sole-owner
    // guard reads sibling rows, so the count and the write must not
    // interleave with another demotion or revocation on the same resource.
    owner_locks: DashMap<ResourceId, Arc<Mutex<()>>>,
    #[cfg(test)]
    fail_next_owner_grant: std::sync::atomic::AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn owner_lock(&self, resource: &ResourceId) -> Arc<Mutex<()>> {
        self.owner_locks
            .entry(resource.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn owner_rows(&self, resource: &ResourceId) -> usize {
        self.access
            .iter()
            .filter(|r| &r.resource == resource && r.role == ResourceRole::Owner)
            .count()
    }

    fn insert_row(&self, row: ResourceAccess) -> Result<ResourceAccess> {
        let key = (row.principal.clone(), row.resource.clone());
        match self.by_pair.entry(key) {
            Entry::Occupied(_) => Err(AccessError::DuplicateAccess),
            Entry::Vacant(slot) => {
                self.access.insert(row.id, row.clone());
                slot.insert(row.id);
                Ok(row)
            }
        }
    }
}

#[async_trait]
impl AccessStore for MemoryStore {
    async fn create_resource(
        &self,
        creator: &PrincipalId,
    ) -> Result<(Resource, ResourceAccess)> {
        let resource = Resource::new(creator.clone());
        self.resources.insert(resource.id.clone(), resource.clone());

        #[cfg(test)]
        if self
            .fail_next_owner_grant
            .swap(false, std::sync::atomic::Ordering::SeqCst)
        {
            self.resources.remove(&resource.id);
            return Err(AccessError::Storage("injected owner-grant failure".into()));
        }

        let owner = ResourceAccess::new(
            creator.clone(),
            resource.id.clone(),
            ResourceRole::Owner,
            None,
        );
        match self.insert_row(owner) {
            Ok(row) => {
                debug!(resource = %resource.id, creator = %creator, "created resource with owner row");
                Ok((resource, row))
            }
            Err(e) => {
                // Fresh resource id, so this cannot be DuplicateAccess; but
                // whatever went wrong, the resource must not survive alone.
                self.resources.remove(&resource.id);
                Err(e)
            }
        }
    }

    async fn get_resource(&self, id: &ResourceId) -> Result<Option<Resource>> {
        Ok(self.resources.get(id).map(|r| r.clone()))
    }

    async fn delete_resource(&self, id: &ResourceId) -> Result<()> {
        self.resources
            .remove(id)
            .ok_or_else(|| AccessError::UnknownResource(id.to_string()))?;
        let doomed: Vec<(AccessId, PrincipalId)> = self
            .access
            .iter()
            .filter(|r| &r.resource == id)
            .map(|r| (r.id, r.principal.clone()))
            .collect();
        for (access_id, principal) in doomed {
            self.access.remove(&access_id);
            self.by_pair.remove(&(principal, id.clone()));
        }
        self.owner_locks.remove(id);
        Ok(())
    }

    async fn mark_assessed(&self, id: &ResourceId) -> Result<()> {
        let mut resource = self
            .resources
            .get_mut(id)
            .ok_or_else(|| AccessError::UnknownResource(id.to_string()))?;
        resource.assessed = true;
        Ok(())
    }

    async fn grant(
        &self,
        principal: &PrincipalId,
        resource: &ResourceId,
        role: ResourceRole,
        granted_by: Option<&PrincipalId>,
    ) -> Result<ResourceAccess> {
        if !self.resources.contains_key(resource) {
            return Err(AccessError::UnknownResource(resource.to_string()));
        }
        let row = ResourceAccess::new(
            principal.clone(),
            resource.clone(),
            role,
            granted_by.cloned(),
        );
        self.insert_row(row)
    }

    async fn change_role(
        &self,
        id: &AccessId,
        new_role: ResourceRole,
    ) -> Result<ResourceAccess> {
        let resource = self
            .access
            .get(id)
            .map(|r| r.resource.clone())
            .ok_or_else(|| AccessError::UnknownAccess(id.to_string()))?;
        let lock = self.owner_lock(&resource);
        let _guard = lock.lock().await;

        // Re-read under the lock; the row may have changed since the
        // resource id was resolved.
        let current = self
            .access
            .get(id)
            .map(|r| r.clone())
            .ok_or_else(|| AccessError::UnknownAccess(id.to_string()))?;

        if current.role == ResourceRole::Owner
            && new_role != ResourceRole::Owner
            && self.owner_rows(&current.resource) == 1
        {
            return Err(AccessError::OwnerRevocationForbidden);
        }

        let mut row = self
            .access
            .get_mut(id)
            .ok_or_else(|| AccessError::UnknownAccess(id.to_string()))?;
        row.role = new_role;
        // Verification is role-specific; a new role starts unverified.
        row.verified = false;
        Ok(row.clone())
    }

    async fn revoke(&self, id: &AccessId) -> Result<ResourceAccess> {
        let resource = self
            .access
            .get(id)
            .map(|r| r.resource.clone())
            .ok_or_else(|| AccessError::UnknownAccess(id.to_string()))?;
        let lock = self.owner_lock(&resource);
        let _guard = lock.lock().await;

        let current = self
            .access
            .get(id)
            .map(|r| r.clone())
            .ok_or_else(|| AccessError::UnknownAccess(id.to_string()))?;

        if current.role == ResourceRole::Owner
            && self.resources.contains_key(&current.resource)
            && self.owner_rows(&current.resource) == 1
        {
            return Err(AccessError::OwnerRevocationForbidden);
        }

        self.access.remove(id);
        self.by_pair
            .remove(&(current.principal.clone(), current.resource.clone()));
        Ok(current)
    }

    async fn set_verified(&self, id: &AccessId, value: bool) -> Result<()> {
        let mut row = self
            .access
            .get_mut(id)
            .ok_or_else(|| AccessError::UnknownAccess(id.to_string()))?;
        row.verified = value;
        Ok(())
    }

    async fn get_access(&self, id: &AccessId) -> Result<Option<ResourceAccess>> {
        Ok(self.access.get(id).map(|r| r.clone()))
    }

    async fn access_for(
        &self,
        principal: &PrincipalId,
        resource: &ResourceId,
    ) -> Result<Option<ResourceAccess>> {
        let Some(access_id) = self
            .by_pair
            .get(&(principal.clone(), resource.clone()))
            .map(|id| *id)
        else {
            return Ok(None);
        };
        Ok(self.access.get(&access_id).map(|r| r.clone()))
    }

    async fn all_access_for(&self, resource: &ResourceId) -> Result<Vec<ResourceAccess>> {
        Ok(self
            .access
            .iter()
            .filter(|r| &r.resource == resource)
            .map(|r| r.clone())
            .collect())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
