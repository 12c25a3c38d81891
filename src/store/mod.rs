//! Storage layer for resources and their access rows.
//!
//! The trait is the authorization subsystem's only seam to persistence.
//! Resource creation and the creator's Owner grant are a single operation
//! here, which is what makes the ownership invariant structurally
//! unbreakable: there is no way to create a resource without its Owner row.

use async_trait::async_trait;

use crate::error::Result;
use crate::rbac::models::{
    AccessId, PrincipalId, Resource, ResourceAccess, ResourceId, ResourceRole,
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// The authoritative table of resources and per-resource role assignments.
///
/// Implementations must guarantee, even under concurrent writers:
/// - at most one access row per (principal, resource) pair — two concurrent
///   `grant` calls for the same pair yield one success and one
///   `DuplicateAccess`;
/// - a resource is never observable without its Owner row.
#[async_trait]
pub trait AccessStore: Send + Sync {
    /// Create a resource and its creator's Owner access row atomically.
    /// If either insert fails the whole operation rolls back.
    async fn create_resource(
        &self,
        creator: &PrincipalId,
    ) -> Result<(Resource, ResourceAccess)>;

    async fn get_resource(&self, id: &ResourceId) -> Result<Option<Resource>>;

    /// Delete a resource; its access rows are removed with it.
    async fn delete_resource(&self, id: &ResourceId) -> Result<()>;

    /// Flip the one-way `assessed` flag.
    async fn mark_assessed(&self, id: &ResourceId) -> Result<()>;

    /// Insert an access row. `DuplicateAccess` if the pair already has one;
    /// `UnknownResource` if the resource does not exist.
    async fn grant(
        &self,
        principal: &PrincipalId,
        resource: &ResourceId,
        role: ResourceRole,
        granted_by: Option<&PrincipalId>,
    ) -> Result<ResourceAccess>;

    /// Replace the row's role and reset its `verified` flag. Demoting the
    /// sole Owner row is `OwnerRevocationForbidden`.
    async fn change_role(
        &self,
        id: &AccessId,
        new_role: ResourceRole,
    ) -> Result<ResourceAccess>;

    /// Delete the row, returning it. Revoking the sole Owner row of a live
    /// resource is `OwnerRevocationForbidden`.
    async fn revoke(&self, id: &AccessId) -> Result<ResourceAccess>;

    /// Low-level flag flip. Ordering rules live in the workflow, not here.
    async fn set_verified(&self, id: &AccessId, value: bool) -> Result<()>;

    async fn get_access(&self, id: &AccessId) -> Result<Option<ResourceAccess>>;

    async fn access_for(
        &self,
        principal: &PrincipalId,
        resource: &ResourceId,
    ) -> Result<Option<ResourceAccess>>;

    async fn all_access_for(&self, resource: &ResourceId) -> Result<Vec<ResourceAccess>>;
}
