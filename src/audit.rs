//! Audit event contract.
//!
//! The recorder is a fire-and-forget collaborator: emitting an event can
//! never block or fail the operation that triggered it. The default
//! implementation hands events to a bounded channel drained by a background
//! task; when the channel is full the event is dropped and counted.

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::info;

use crate::rbac::models::{PrincipalId, ResourceId};

/// The five event types mutating operations produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AuditEventType {
    AccessGranted,
    AccessRevoked,
    RoleChanged,
    Verified,
    Assessed,
}

impl AuditEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AccessGranted => "access_granted",
            Self::AccessRevoked => "access_revoked",
            Self::RoleChanged => "role_changed",
            Self::Verified => "verified",
            Self::Assessed => "assessed",
        }
    }
}

/// One immutable audit notification.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub event_type: AuditEventType,
    pub resource_id: ResourceId,
    pub principal_id: PrincipalId,
    pub timestamp: DateTime<Utc>,
    /// Opaque, event-specific payload (role names, access ids, state).
    pub details: serde_json::Value,
}

impl AuditEvent {
    pub fn new(
        event_type: AuditEventType,
        resource_id: ResourceId,
        principal_id: PrincipalId,
        details: serde_json::Value,
    ) -> Self {
        Self {
            event_type,
            resource_id,
            principal_id,
            timestamp: Utc::now(),
            details,
        }
    }
}

/// Inbound contract of the external audit collaborator.
pub trait AuditRecorder: Send + Sync {
    /// Must return promptly and must not propagate failure to the caller.
    fn record(&self, event: AuditEvent);
}

/// Recorder that discards everything. Useful in tests that do not assert on
/// the audit stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullRecorder;

impl AuditRecorder for NullRecorder {
    fn record(&self, _event: AuditEvent) {}
}

/// Default recorder: bounded mpsc channel plus a drain task that logs each
/// event under `target: "audit"` for downstream collection.
#[derive(Debug, Clone)]
pub struct ChannelAuditRecorder {
    sender: mpsc::Sender<AuditEvent>,
}

impl ChannelAuditRecorder {
    /// Spawns the drain task on the current tokio runtime.
    pub fn new(buffer: usize) -> Self {
        let (sender, mut receiver) = mpsc::channel::<AuditEvent>(buffer);
        tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                info!(
                    target: "audit",
                    event = event.event_type.as_str(),
                    resource = %event.resource_id,
                    principal = %event.principal_id,
                    details = %event.details,
                    "audit event"
                );
            }
        });
        Self { sender }
    }
}

impl AuditRecorder for ChannelAuditRecorder {
    fn record(&self, event: AuditEvent) {
        if self.sender.try_send(event).is_err() {
            // Never block the triggering operation on a slow consumer.
            counter!("audit_events_dropped_total").increment(1);
        }
    }
}
