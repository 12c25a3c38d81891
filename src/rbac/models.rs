//! Core data model: identifiers, resource roles, access rows, and the
//! derived verification state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ═══════════════════════════════════════════════════════════════════════════════
// Identifiers
// ═══════════════════════════════════════════════════════════════════════════════

/// Strongly-typed principal (user) identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PrincipalId(pub String);

impl PrincipalId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PrincipalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for PrincipalId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for PrincipalId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Strongly-typed logbook resource identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceId(pub Uuid);

impl ResourceId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for ResourceId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

/// Identifier of a single access row (principal × resource).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccessId(pub Uuid);

impl AccessId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for AccessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a single entry inside a logbook.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntryId(pub Uuid);

impl EntryId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Risk levels
// ═══════════════════════════════════════════════════════════════════════════════

/// Risk classification attached to every global permission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    /// Parse a risk level name. Unknown names yield `None`, which callers
    /// treat as an empty result set rather than an error.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Resource roles
// ═══════════════════════════════════════════════════════════════════════════════

/// The fixed catalog of per-logbook roles.
///
/// This is a closed set: new resource roles require a code change, not a
/// runtime API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceRole {
    Owner,
    Editor,
    Supervisor,
    Viewer,
}

impl ResourceRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Editor => "editor",
            Self::Supervisor => "supervisor",
            Self::Viewer => "viewer",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "owner" => Some(Self::Owner),
            "editor" => Some(Self::Editor),
            "supervisor" => Some(Self::Supervisor),
            "viewer" => Some(Self::Viewer),
            _ => None,
        }
    }

    /// Whether rows with this role take part in the verification workflow.
    pub fn is_verifying(&self) -> bool {
        matches!(self, Self::Owner | Self::Supervisor)
    }

    pub fn all() -> [ResourceRole; 4] {
        [Self::Owner, Self::Editor, Self::Supervisor, Self::Viewer]
    }
}

impl fmt::Display for ResourceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Resources and access rows
// ═══════════════════════════════════════════════════════════════════════════════

/// A protected logbook template.
///
/// `creator` is immutable once set. `assessed` is one-way: it can only move
/// from `false` to `true`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    pub id: ResourceId,
    pub creator: PrincipalId,
    pub assessed: bool,
    pub created_at: DateTime<Utc>,
}

impl Resource {
    pub fn new(creator: PrincipalId) -> Self {
        Self {
            id: ResourceId::generate(),
            creator,
            assessed: false,
            created_at: Utc::now(),
        }
    }
}

/// The join row binding one principal to one resource with one role.
///
/// Invariant: at most one row exists per (principal, resource) pair, and
/// every resource has exactly one `Owner` row whose principal is the
/// resource's creator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceAccess {
    pub id: AccessId,
    pub principal: PrincipalId,
    pub resource: ResourceId,
    pub role: ResourceRole,
    pub verified: bool,
    pub granted_at: DateTime<Utc>,
    pub granted_by: Option<PrincipalId>,
}

impl ResourceAccess {
    pub fn new(
        principal: PrincipalId,
        resource: ResourceId,
        role: ResourceRole,
        granted_by: Option<PrincipalId>,
    ) -> Self {
        Self {
            id: AccessId::generate(),
            principal,
            resource,
            role,
            verified: false,
            granted_at: Utc::now(),
            granted_by,
        }
    }
}

/// A single authored item inside a logbook, carried here only as far as the
/// authorization model needs it: original authors keep mutation rights over
/// their own entries regardless of resource role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceEntry {
    pub id: EntryId,
    pub resource: ResourceId,
    pub author: PrincipalId,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Verification state
// ═══════════════════════════════════════════════════════════════════════════════

/// Derived per-resource verification state. Never stored: always computed
/// from the current Owner/Supervisor access rows plus the `assessed` flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationState {
    Unverified,
    OwnerVerified,
    FullyVerified,
    Assessed,
}

impl VerificationState {
    /// Compute the state from a resource's access rows.
    ///
    /// Only rows whose role takes part in verification count. A resource
    /// with no Supervisor row is fully verified once its Owner row is; the
    /// rule is "all existing verifying rows verified", not "one of each".
    pub fn compute(assessed: bool, rows: &[ResourceAccess]) -> Self {
        if assessed {
            return Self::Assessed;
        }
        let verifying: Vec<&ResourceAccess> =
            rows.iter().filter(|r| r.role.is_verifying()).collect();
        let owner_verified = verifying
            .iter()
            .any(|r| r.role == ResourceRole::Owner && r.verified);
        if verifying.iter().all(|r| r.verified) && owner_verified {
            Self::FullyVerified
        } else if owner_verified {
            Self::OwnerVerified
        } else {
            Self::Unverified
        }
    }
}

impl fmt::Display for VerificationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unverified => "unverified",
            Self::OwnerVerified => "owner_verified",
            Self::FullyVerified => "fully_verified",
            Self::Assessed => "assessed",
        };
        f.write_str(s)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
