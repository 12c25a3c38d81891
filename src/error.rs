//! Error taxonomy for the access-control subsystem.
//!
//! Every variant except `Storage` is an expected, typed outcome that callers
//! handle; only storage-layer failures are treated as infrastructure faults.
//! Denial of access (`Forbidden`) carries the required-vs-held sets so that
//! operator-facing tooling can explain the decision; end-user responses can
//! suppress that detail.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use metrics::counter;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

/// A specialized Result type for access-control operations.
pub type Result<T> = std::result::Result<T, AccessError>;

/// All expected failure outcomes, plus the single infrastructure arm.
#[derive(Debug, Error)]
pub enum AccessError {
    /// No valid principal was presented at all. Distinct from denial.
    #[error("authentication required")]
    Unauthenticated,

    /// A valid principal lacks the required permission or role.
    #[error("permission denied: requires one of {required:?}")]
    Forbidden {
        /// The alternative permissions (or roles) that would have satisfied
        /// the check.
        required: Vec<String>,
        /// Roles currently held by the principal.
        roles: Vec<String>,
        /// Effective permissions currently held by the principal.
        permissions: Vec<String>,
    },

    #[error("unknown role: {0}")]
    UnknownRole(String),

    #[error("unknown permission: {0}")]
    UnknownPermission(String),

    #[error("unknown resource: {0}")]
    UnknownResource(String),

    #[error("unknown principal: {0}")]
    UnknownPrincipal(String),

    #[error("unknown access row: {0}")]
    UnknownAccess(String),

    /// An access row already exists for this (principal, resource) pair.
    #[error("access already granted for this principal and resource")]
    DuplicateAccess,

    /// The sole Owner row of a live resource cannot be revoked or demoted;
    /// ownership is transferred, never deleted.
    #[error("the owner's access cannot be revoked; transfer ownership instead")]
    OwnerRevocationForbidden,

    /// A global role cannot be deleted while principals still hold it.
    #[error("role {0} is still assigned and cannot be deleted")]
    RoleInUse(String),

    /// A role definition or rename collides with an existing role name.
    #[error("a role named {0} already exists")]
    RoleNameTaken(String),

    /// Supervisor verification attempted before the owner has verified.
    #[error("the owner has not verified this resource yet")]
    OwnerNotYetVerified,

    /// Assessment attempted while verifying rows remain unverified.
    #[error("verification incomplete: awaiting {pending:?}")]
    VerificationIncomplete {
        /// Principals whose Owner/Supervisor sign-off is still missing.
        pending: Vec<String>,
    },

    /// The acting principal holds no resource role that permits this
    /// operation on this resource.
    #[error("principal holds no qualifying role on this resource")]
    NotAResourceRoleHolder,

    /// Storage-layer failure (connection loss, constraint engine faults).
    /// The only variant representing an unrecoverable infrastructure error.
    #[error("storage failure: {0}")]
    Storage(String),
}

impl From<sqlx::Error> for AccessError {
    fn from(e: sqlx::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

impl AccessError {
    /// Stable machine-readable code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "UNAUTHENTICATED",
            Self::Forbidden { .. } => "FORBIDDEN",
            Self::UnknownRole(_) => "UNKNOWN_ROLE",
            Self::UnknownPermission(_) => "UNKNOWN_PERMISSION",
            Self::UnknownResource(_) => "UNKNOWN_RESOURCE",
            Self::UnknownPrincipal(_) => "UNKNOWN_PRINCIPAL",
            Self::UnknownAccess(_) => "UNKNOWN_ACCESS",
            Self::DuplicateAccess => "DUPLICATE_ACCESS",
            Self::OwnerRevocationForbidden => "OWNER_REVOCATION_FORBIDDEN",
            Self::RoleInUse(_) => "ROLE_IN_USE",
            Self::RoleNameTaken(_) => "ROLE_NAME_TAKEN",
            Self::OwnerNotYetVerified => "OWNER_NOT_YET_VERIFIED",
            Self::VerificationIncomplete { .. } => "VERIFICATION_INCOMPLETE",
            Self::NotAResourceRoleHolder => "NOT_A_RESOURCE_ROLE_HOLDER",
            Self::Storage(_) => "STORAGE_FAILURE",
        }
    }

    /// HTTP status mapping for transport layers.
    pub fn http_status(&self) -> StatusCode {
        match self {
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::Forbidden { .. } | Self::NotAResourceRoleHolder => StatusCode::FORBIDDEN,
            Self::UnknownRole(_)
            | Self::UnknownPermission(_)
            | Self::UnknownResource(_)
            | Self::UnknownPrincipal(_)
            | Self::UnknownAccess(_) => StatusCode::NOT_FOUND,
            Self::DuplicateAccess
            | Self::OwnerRevocationForbidden
            | Self::RoleInUse(_)
            | Self::RoleNameTaken(_)
            | Self::OwnerNotYetVerified
            | Self::VerificationIncomplete { .. } => StatusCode::CONFLICT,
            Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether this is one of the expected, typed outcomes (everything but
    /// `Storage`).
    pub fn is_expected(&self) -> bool {
        !matches!(self, Self::Storage(_))
    }
}

/// Diagnostic payload attached to `Forbidden` responses when the caller has
/// opted into exposing decision detail.
#[derive(Debug, Clone, Serialize)]
pub struct DenialDetail {
    pub required: Vec<String>,
    pub principal_roles: Vec<String>,
    pub principal_permissions: Vec<String>,
}

impl IntoResponse for AccessError {
    fn into_response(self) -> Response {
        let status = self.http_status();
        let code = self.code();
        counter!("access_errors_total", "code" => code).increment(1);

        let message = match &self {
            // Internal detail stays in the logs.
            Self::Storage(detail) => {
                error!(detail = %detail, "storage failure");
                "An internal error occurred".to_string()
            }
            other => {
                if matches!(other, Self::Forbidden { .. }) {
                    warn!(code = code, "access denied");
                }
                other.to_string()
            }
        };

        let body = serde_json::json!({
            "success": false,
            "error": {
                "code": code,
                "message": message,
            }
        });
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(AccessError::Unauthenticated.http_status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            AccessError::Forbidden {
                required: vec![],
                roles: vec![],
                permissions: vec![]
            }
            .http_status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(AccessError::DuplicateAccess.http_status(), StatusCode::CONFLICT);
        assert_eq!(
            AccessError::UnknownRole("x".into()).http_status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AccessError::Storage("down".into()).http_status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_expected_vs_infrastructure() {
        assert!(AccessError::DuplicateAccess.is_expected());
        assert!(AccessError::OwnerNotYetVerified.is_expected());
        assert!(!AccessError::Storage("connection reset".into()).is_expected());
    }

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(AccessError::OwnerRevocationForbidden.code(), "OWNER_REVOCATION_FORBIDDEN");
        assert_eq!(
            AccessError::RoleNameTaken("auditor".into()).code(),
            "ROLE_NAME_TAKEN"
        );
        assert_eq!(
            AccessError::VerificationIncomplete { pending: vec![] }.code(),
            "VERIFICATION_INCOMPLETE"
        );
    }
}
