//! # Logbook Access
//!
//! Authorization and verification-workflow subsystem for a multi-tenant
//! logbook application.
//!
//! ## Architecture
//!
//! - **Catalog**: the static registry of global permissions, grouped by
//!   application module and classified by risk level
//! - **RBAC**: named global roles over the catalog, resource-scoped roles
//!   (owner, editor, supervisor, viewer), and the authorization evaluator
//! - **Store**: resource and access-row persistence, in-memory and Postgres,
//!   with logbook creation and the owner grant as one atomic operation
//! - **Workflow**: the sequential verification state machine (owner signs
//!   first, then supervisors, then administrative assessment)
//! - **Audit**: append-only event emission for every access mutation
//! - **Middleware**: Axum request-level permission enforcement

pub mod audit;
pub mod catalog;
pub mod config;
pub mod error;
pub mod rbac;
pub mod store;
pub mod telemetry;
pub mod workflow;

pub use error::{AccessError, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::audit::{AuditEvent, AuditEventType, AuditRecorder, ChannelAuditRecorder};
    pub use crate::catalog::{PermissionCatalog, ResourceRoleCatalog};
    pub use crate::error::{AccessError, Result};
    pub use crate::rbac::{
        AccessId, AuthorizationEvaluator, AuthzContext, BuiltinRole, CurrentPrincipal, Decision,
        EntryId, GlobalRole, GlobalRoleStore, PrincipalId, RequirePermissionLayer, Resource,
        ResourceAccess, ResourceId, ResourceRole, RiskLevel, VerificationState,
    };
    pub use crate::store::{AccessStore, MemoryStore, PgStore};
    pub use crate::workflow::{AccessService, VerificationWorkflow};
}
