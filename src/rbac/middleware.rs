//! Axum middleware that enforces global permissions on requests.
//!
//! The middleware reads the `CurrentPrincipal` extension (injected by an
//! upstream authentication layer) and asks the evaluator whether the request
//! may proceed. The required-permission spec is comma-separated; any one
//! alternative suffices.

use axum::{
    body::Body,
    extract::{FromRequestParts, Request},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use futures::future::BoxFuture;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::warn;

use super::evaluator::{parse_spec, AuthorizationEvaluator, Decision};
use super::models::PrincipalId;
use crate::error::DenialDetail;

// ═══════════════════════════════════════════════════════════════════════════════
// Principal and authorization context
// ═══════════════════════════════════════════════════════════════════════════════

/// The authenticated principal for a request, inserted into request
/// extensions by the upstream authentication layer.
#[derive(Debug, Clone)]
pub struct CurrentPrincipal(pub PrincipalId);

/// Authorization context inserted by `RequirePermissionService` after a
/// successful check, so handlers can see who passed and on what grounds
/// without re-evaluating.
#[derive(Debug, Clone)]
pub struct AuthzContext {
    pub principal: PrincipalId,
    /// The permission alternatives that were required for this route.
    pub checked_permissions: Vec<String>,
}

/// Axum extractor for `AuthzContext`.
#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthzContext
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthzContext>()
            .cloned()
            .ok_or_else(|| {
                let body = serde_json::json!({
                    "success": false,
                    "error": {
                        "code": "MISSING_AUTHZ_CONTEXT",
                        "message": "Authorization context not available. Ensure the permission middleware is applied.",
                    }
                });
                (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
            })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tower Layer
// ═══════════════════════════════════════════════════════════════════════════════

/// Layer that wraps services with global permission enforcement.
///
/// # Example
///
/// ```rust,ignore
/// use logbook_access::rbac::RequirePermissionLayer;
///
/// let app = Router::new()
///     .route("/api/v1/logbooks", post(create_logbook))
///     .layer(RequirePermissionLayer::new(evaluator.clone(), "logbooks.create"));
/// ```
#[derive(Clone)]
pub struct RequirePermissionLayer {
    evaluator: Arc<AuthorizationEvaluator>,
    permissions: Vec<String>,
    expose_denial_details: bool,
}

impl RequirePermissionLayer {
    /// Require any one of the comma-separated permission names, e.g.
    /// `"logbooks.view, audit.view"`. An empty spec admits any
    /// authenticated principal.
    pub fn new(evaluator: Arc<AuthorizationEvaluator>, spec: &str) -> Self {
        Self {
            evaluator,
            permissions: parse_spec(spec),
            expose_denial_details: false,
        }
    }

    /// Include the required/held permission lists in denial response
    /// bodies. Off by default; meant for internal deployments.
    pub fn expose_denial_details(mut self, expose: bool) -> Self {
        self.expose_denial_details = expose;
        self
    }
}

impl<S> Layer<S> for RequirePermissionLayer {
    type Service = RequirePermissionService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequirePermissionService {
            inner,
            evaluator: self.evaluator.clone(),
            permissions: self.permissions.clone(),
            expose_denial_details: self.expose_denial_details,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tower Service
// ═══════════════════════════════════════════════════════════════════════════════

/// Service that enforces the required permissions per request.
#[derive(Clone)]
pub struct RequirePermissionService<S> {
    inner: S,
    evaluator: Arc<AuthorizationEvaluator>,
    permissions: Vec<String>,
    expose_denial_details: bool,
}

impl<S> Service<Request<Body>> for RequirePermissionService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut request: Request<Body>) -> Self::Future {
        let evaluator = self.evaluator.clone();
        let permissions = self.permissions.clone();
        let expose_details = self.expose_denial_details;
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let principal = request
                .extensions()
                .get::<CurrentPrincipal>()
                .map(|p| p.0.clone());

            match evaluator.can_global(principal.as_ref(), &permissions) {
                Decision::Permit => {
                    // Permit implies a principal was presented.
                    let principal = match principal {
                        Some(p) => p,
                        None => return Ok(unauthenticated_response()),
                    };
                    request.extensions_mut().insert(AuthzContext {
                        principal,
                        checked_permissions: permissions,
                    });
                    inner.call(request).await
                }
                Decision::Unauthenticated => Ok(unauthenticated_response()),
                Decision::Forbidden {
                    required,
                    principal_roles,
                    principal_permissions,
                } => {
                    if let Some(p) = &principal {
                        warn!(
                            principal = %p,
                            required = ?required,
                            "permission denied"
                        );
                    }
                    let detail = DenialDetail {
                        required,
                        principal_roles,
                        principal_permissions,
                    };
                    Ok(forbidden_response(&detail, expose_details))
                }
            }
        })
    }
}

fn unauthenticated_response() -> Response {
    let body = serde_json::json!({
        "success": false,
        "error": {
            "code": "UNAUTHENTICATED",
            "message": "Authentication required for this resource",
        }
    });
    (StatusCode::UNAUTHORIZED, Json(body)).into_response()
}

fn forbidden_response(detail: &DenialDetail, expose_details: bool) -> Response {
    let mut error = serde_json::json!({
        "code": "FORBIDDEN",
        "message": "You do not have permission to perform this action",
    });
    if expose_details {
        error["details"] = serde_json::json!(detail);
    }
    let body = serde_json::json!({ "success": false, "error": error });
    (StatusCode::FORBIDDEN, Json(body)).into_response()
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::PermissionCatalog;
    use crate::rbac::roles::GlobalRoleStore;
    use crate::store::{AccessStore, MemoryStore};
    use axum::{body::to_bytes, routing::get, Router};
    use std::collections::BTreeSet;
    use tower::ServiceExt;

    fn evaluator() -> Arc<AuthorizationEvaluator> {
        let catalog = Arc::new(PermissionCatalog::builtin());
        let roles = GlobalRoleStore::with_builtin_roles(catalog);
        roles.assign_role(&PrincipalId::new("alice"), "member").unwrap();
        let store: Arc<dyn AccessStore> = Arc::new(MemoryStore::new());
        Arc::new(AuthorizationEvaluator::new(
            roles,
            store,
            BTreeSet::from(["super_admin".to_string(), "admin".to_string()]),
        ))
    }

    async fn handler(ctx: AuthzContext) -> String {
        ctx.principal.to_string()
    }

    fn app(layer: RequirePermissionLayer) -> Router {
        Router::new().route("/", get(handler)).layer(layer)
    }

    fn request_as(principal: Option<&str>) -> Request<Body> {
        let mut req = Request::builder().uri("/").body(Body::empty()).unwrap();
        if let Some(p) = principal {
            req.extensions_mut()
                .insert(CurrentPrincipal(PrincipalId::new(p)));
        }
        req
    }

    #[tokio::test]
    async fn test_permit_injects_context() {
        let app = app(RequirePermissionLayer::new(evaluator(), "logbooks.view"));
        let response = app.oneshot(request_as(Some("alice"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"alice");
    }

    #[tokio::test]
    async fn test_missing_principal_is_unauthorized() {
        let app = app(RequirePermissionLayer::new(evaluator(), "logbooks.view"));
        let response = app.oneshot(request_as(None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_insufficient_permission_is_forbidden() {
        let app = app(RequirePermissionLayer::new(evaluator(), "roles.manage"));
        let response = app.oneshot(request_as(Some("alice"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"]["code"], "FORBIDDEN");
        assert!(body["error"].get("details").is_none());
    }

    #[tokio::test]
    async fn test_denial_details_exposed_when_enabled() {
        let layer = RequirePermissionLayer::new(evaluator(), "roles.manage")
            .expose_denial_details(true);
        let response = app(layer).oneshot(request_as(Some("alice"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(
            body["error"]["details"]["required"],
            serde_json::json!(["roles.manage"])
        );
    }

    #[tokio::test]
    async fn test_or_semantics_any_alternative_passes() {
        // Member lacks audit.view but holds logbooks.view.
        let app = app(RequirePermissionLayer::new(
            evaluator(),
            "audit.view, logbooks.view",
        ));
        let response = app.oneshot(request_as(Some("alice"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_empty_spec_admits_any_authenticated_principal() {
        let app = app(RequirePermissionLayer::new(evaluator(), ""));
        assert_eq!(
            app.clone()
                .oneshot(request_as(Some("nobody-special")))
                .await
                .unwrap()
                .status(),
            StatusCode::OK
        );
        assert_eq!(
            app.oneshot(request_as(None)).await.unwrap().status(),
            StatusCode::UNAUTHORIZED
        );
    }
}
