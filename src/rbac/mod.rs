//! Role-Based Access Control: the global layer and the resource layer.
//!
//! This module provides:
//! - **Models**: Principal, resource and access-row data structures
//! - **Global Role Store**: named roles over the permission catalog, with
//!   per-principal assignments and direct permission grants
//! - **Built-in Roles**: super_admin, admin, assessor, member, auditor
//! - **Evaluator**: the single authorization decision point for global and
//!   resource-scoped checks
//! - **Authorization Middleware**: Axum middleware for request-level
//!   permission checks
//!
//! # Usage
//!
//! ```rust,ignore
//! use logbook_access::rbac::{AuthorizationEvaluator, RequirePermissionLayer};
//!
//! // Check permissions programmatically
//! let decision = evaluator.can_global_spec(Some(&principal), "logbooks.view");
//!
//! // Or use as Axum middleware
//! let app = Router::new()
//!     .route("/api/v1/logbooks", post(create_logbook))
//!     .layer(RequirePermissionLayer::new(evaluator, "logbooks.create"));
//! ```

pub mod builtin;
pub mod evaluator;
pub mod middleware;
pub mod models;
pub mod roles;

pub use builtin::BuiltinRole;
pub use evaluator::{AuthorizationEvaluator, Decision};
pub use middleware::{
    AuthzContext, CurrentPrincipal, RequirePermissionLayer, RequirePermissionService,
};
pub use models::{
    AccessId, EntryId, PrincipalId, Resource, ResourceAccess, ResourceEntry, ResourceId,
    ResourceRole, RiskLevel, VerificationState,
};
pub use roles::{GlobalRole, GlobalRoleStore};
