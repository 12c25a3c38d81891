//! PostgreSQL `AccessStore` backed by sqlx.
//!
//! Uniqueness invariants live in the schema: the (principal, resource) pair
//! constraint decides races between concurrent grants, and resource creation
//! plus the Owner grant share one transaction so neither can commit without
//! the other. Role changes and revocations take a row lock (`FOR UPDATE`)
//! around their check-then-write.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use tracing::warn;

use crate::error::{AccessError, Result};
use crate::rbac::models::{
    AccessId, PrincipalId, Resource, ResourceAccess, ResourceId, ResourceRole,
};
use crate::rbac::roles::GlobalRoleStore;

use super::AccessStore;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(std::time::Duration::from_secs(5))
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AccessError::Storage(e.to_string()))?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Load persisted global role assignments and direct permission grants
    /// into an in-memory role store at startup. Rows naming roles or
    /// permissions that no longer exist are skipped with a warning.
    pub async fn load_global_state(&self, roles: &GlobalRoleStore) -> Result<()> {
        let assignments: Vec<(String, String)> =
            sqlx::query_as("SELECT principal_id, role_name FROM global_role_assignments")
                .fetch_all(&self.pool)
                .await?;
        for (principal, role_name) in assignments {
            let principal = PrincipalId(principal);
            if let Err(e) = roles.assign_role(&principal, &role_name) {
                warn!(principal = %principal, role = %role_name, error = %e, "skipping stale role assignment");
            }
        }

        let grants: Vec<(String, String)> =
            sqlx::query_as("SELECT principal_id, permission FROM global_permission_grants")
                .fetch_all(&self.pool)
                .await?;
        for (principal, permission) in grants {
            let principal = PrincipalId(principal);
            if let Err(e) = roles.grant_permission(&principal, &permission) {
                warn!(principal = %principal, permission = %permission, error = %e, "skipping stale permission grant");
            }
        }
        Ok(())
    }

    /// Record a role assignment. Idempotent.
    pub async fn persist_role_assignment(
        &self,
        principal: &PrincipalId,
        role_name: &str,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO global_role_assignments (principal_id, role_name) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(principal.as_str())
        .bind(role_name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Remove a role assignment. Idempotent.
    pub async fn remove_role_assignment(
        &self,
        principal: &PrincipalId,
        role_name: &str,
    ) -> Result<()> {
        sqlx::query(
            "DELETE FROM global_role_assignments WHERE principal_id = $1 AND role_name = $2",
        )
        .bind(principal.as_str())
        .bind(role_name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record a direct permission grant. Idempotent.
    pub async fn persist_permission_grant(
        &self,
        principal: &PrincipalId,
        permission: &str,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO global_permission_grants (principal_id, permission) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(principal.as_str())
        .bind(permission)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Remove a direct permission grant. Idempotent.
    pub async fn remove_permission_grant(
        &self,
        principal: &PrincipalId,
        permission: &str,
    ) -> Result<()> {
        sqlx::query(
            "DELETE FROM global_permission_grants WHERE principal_id = $1 AND permission = $2",
        )
        .bind(principal.as_str())
        .bind(permission)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn owner_rows(
        tx: &mut Transaction<'_, Postgres>,
        resource: Uuid,
    ) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM resource_access WHERE resource_id = $1 AND role_name = 'owner'",
        )
        .bind(resource)
        .fetch_one(&mut **tx)
        .await?;
        Ok(count)
    }

    /// Locks the parent resource row so owner-affecting mutations on the
    /// same resource serialize. Locking only the target access row is not
    /// enough: the sole-owner count reads sibling rows, and two racing
    /// demotions could each see the other's row still present.
    async fn lock_resource(
        tx: &mut Transaction<'_, Postgres>,
        resource: Uuid,
    ) -> Result<()> {
        sqlx::query("SELECT 1 FROM resources WHERE id = $1 FOR UPDATE")
            .bind(resource)
            .fetch_optional(&mut **tx)
            .await?;
        Ok(())
    }

    async fn locked_row(
        tx: &mut Transaction<'_, Postgres>,
        id: &AccessId,
    ) -> Result<ResourceAccess> {
        let row = sqlx::query_as::<_, AccessRow>(
            r#"
            SELECT id, principal_id, resource_id, role_name, verified, granted_at, granted_by
            FROM resource_access
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(id.0)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| AccessError::UnknownAccess(id.to_string()))?;
        row.try_into()
    }
}

#[async_trait]
impl AccessStore for PgStore {
    async fn create_resource(
        &self,
        creator: &PrincipalId,
    ) -> Result<(Resource, ResourceAccess)> {
        let resource = Resource::new(creator.clone());
        let owner = ResourceAccess::new(
            creator.clone(),
            resource.id.clone(),
            ResourceRole::Owner,
            None,
        );

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO resources (id, creator_id, assessed, created_at) VALUES ($1, $2, $3, $4)",
        )
        .bind(resource.id.0)
        .bind(resource.creator.as_str())
        .bind(resource.assessed)
        .bind(resource.created_at)
        .execute(&mut *tx)
        .await?;
        insert_access(&mut tx, &owner).await?;
        tx.commit().await?;

        Ok((resource, owner))
    }

    async fn get_resource(&self, id: &ResourceId) -> Result<Option<Resource>> {
        let row = sqlx::query_as::<_, ResourceRow>(
            "SELECT id, creator_id, assessed, created_at FROM resources WHERE id = $1",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Resource::from))
    }

    async fn delete_resource(&self, id: &ResourceId) -> Result<()> {
        // Access rows cascade via the schema.
        let result = sqlx::query("DELETE FROM resources WHERE id = $1")
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AccessError::UnknownResource(id.to_string()));
        }
        Ok(())
    }

    async fn mark_assessed(&self, id: &ResourceId) -> Result<()> {
        let result = sqlx::query("UPDATE resources SET assessed = TRUE WHERE id = $1")
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AccessError::UnknownResource(id.to_string()));
        }
        Ok(())
    }

    async fn grant(
        &self,
        principal: &PrincipalId,
        resource: &ResourceId,
        role: ResourceRole,
        granted_by: Option<&PrincipalId>,
    ) -> Result<ResourceAccess> {
        let exists: Option<i32> = sqlx::query_scalar("SELECT 1 FROM resources WHERE id = $1")
            .bind(resource.0)
            .fetch_optional(&self.pool)
            .await?;
        if exists.is_none() {
            return Err(AccessError::UnknownResource(resource.to_string()));
        }

        let row = ResourceAccess::new(
            principal.clone(),
            resource.clone(),
            role,
            granted_by.cloned(),
        );
        let result = sqlx::query(
            r#"
            INSERT INTO resource_access (id, principal_id, resource_id, role_name, verified, granted_at, granted_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT ON CONSTRAINT resource_access_pair DO NOTHING
            "#,
        )
        .bind(row.id.0)
        .bind(row.principal.as_str())
        .bind(row.resource.0)
        .bind(row.role.as_str())
        .bind(row.verified)
        .bind(row.granted_at)
        .bind(row.granted_by.as_ref().map(|p| p.as_str()))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AccessError::DuplicateAccess);
        }
        Ok(row)
    }

    async fn change_role(
        &self,
        id: &AccessId,
        new_role: ResourceRole,
    ) -> Result<ResourceAccess> {
        let mut tx = self.pool.begin().await?;
        let mut current = Self::locked_row(&mut tx, id).await?;

        if current.role == ResourceRole::Owner && new_role != ResourceRole::Owner {
            Self::lock_resource(&mut tx, current.resource.0).await?;
            if Self::owner_rows(&mut tx, current.resource.0).await? == 1 {
                return Err(AccessError::OwnerRevocationForbidden);
            }
        }

        sqlx::query("UPDATE resource_access SET role_name = $2, verified = FALSE WHERE id = $1")
            .bind(id.0)
            .bind(new_role.as_str())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        current.role = new_role;
        current.verified = false;
        Ok(current)
    }

    async fn revoke(&self, id: &AccessId) -> Result<ResourceAccess> {
        let mut tx = self.pool.begin().await?;
        let current = Self::locked_row(&mut tx, id).await?;

        if current.role == ResourceRole::Owner {
            Self::lock_resource(&mut tx, current.resource.0).await?;
            if Self::owner_rows(&mut tx, current.resource.0).await? == 1 {
                return Err(AccessError::OwnerRevocationForbidden);
            }
        }

        sqlx::query("DELETE FROM resource_access WHERE id = $1")
            .bind(id.0)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(current)
    }

    async fn set_verified(&self, id: &AccessId, value: bool) -> Result<()> {
        let result = sqlx::query("UPDATE resource_access SET verified = $2 WHERE id = $1")
            .bind(id.0)
            .bind(value)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AccessError::UnknownAccess(id.to_string()));
        }
        Ok(())
    }

    async fn get_access(&self, id: &AccessId) -> Result<Option<ResourceAccess>> {
        let row = sqlx::query_as::<_, AccessRow>(
            r#"
            SELECT id, principal_id, resource_id, role_name, verified, granted_at, granted_by
            FROM resource_access
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn access_for(
        &self,
        principal: &PrincipalId,
        resource: &ResourceId,
    ) -> Result<Option<ResourceAccess>> {
        let row = sqlx::query_as::<_, AccessRow>(
            r#"
            SELECT id, principal_id, resource_id, role_name, verified, granted_at, granted_by
            FROM resource_access
            WHERE principal_id = $1 AND resource_id = $2
            "#,
        )
        .bind(principal.as_str())
        .bind(resource.0)
        .fetch_optional(&self.pool)
        .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn all_access_for(&self, resource: &ResourceId) -> Result<Vec<ResourceAccess>> {
        let rows = sqlx::query_as::<_, AccessRow>(
            r#"
            SELECT id, principal_id, resource_id, role_name, verified, granted_at, granted_by
            FROM resource_access
            WHERE resource_id = $1
            ORDER BY granted_at
            "#,
        )
        .bind(resource.0)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }
}

async fn insert_access(
    tx: &mut Transaction<'_, Postgres>,
    row: &ResourceAccess,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO resource_access (id, principal_id, resource_id, role_name, verified, granted_at, granted_by)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(row.id.0)
    .bind(row.principal.as_str())
    .bind(row.resource.0)
    .bind(row.role.as_str())
    .bind(row.verified)
    .bind(row.granted_at)
    .bind(row.granted_by.as_ref().map(|p| p.as_str()))
    .execute(&mut **tx)
    .await?;
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════════
// Row types
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, sqlx::FromRow)]
struct ResourceRow {
    id: Uuid,
    creator_id: String,
    assessed: bool,
    created_at: DateTime<Utc>,
}

impl From<ResourceRow> for Resource {
    fn from(row: ResourceRow) -> Self {
        Self {
            id: ResourceId(row.id),
            creator: PrincipalId(row.creator_id),
            assessed: row.assessed,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct AccessRow {
    id: Uuid,
    principal_id: String,
    resource_id: Uuid,
    role_name: String,
    verified: bool,
    granted_at: DateTime<Utc>,
    granted_by: Option<String>,
}

impl TryFrom<AccessRow> for ResourceAccess {
    type Error = AccessError;

    fn try_from(row: AccessRow) -> Result<Self> {
        let role = ResourceRole::parse(&row.role_name).ok_or_else(|| {
            AccessError::Storage(format!("corrupt role name in storage: {}", row.role_name))
        })?;
        Ok(Self {
            id: AccessId(row.id),
            principal: PrincipalId(row.principal_id),
            resource: ResourceId(row.resource_id),
            role,
            verified: row.verified,
            granted_at: row.granted_at,
            granted_by: row.granted_by.map(PrincipalId),
        })
    }
}
