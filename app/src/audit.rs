// ==============================================================================
// audit.rs - Audit Trail for Submission Operations
// ==============================================================================
// Description: Job and batch lifecycle events, emitted as JSON on the "audit"
//              tracing target
// Author: Matt Barham
// Created: 2026-10-05
// Modified: 2026-10-15
// Version: 1.0.0
// Compliance: Every externally delivered file is traceable to a queue message
// ==============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const AUDIT_TARGET: &str = "audit";

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    // Job lifecycle
    JobReceived,
    JobCompleted,
    JobRetried,
    JobDropped,

    // Variant batches
    BatchSealed,
    BatchShipped,
    BatchShipFailed,

    // External callbacks
    NotificationFailed,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogSeverity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub event_type: AuditEventType,
    pub worker_id: Option<String>,
    /// Queue message id or batch archive name
    pub resource: Option<String>,
    pub details: serde_json::Value,
    pub severity: LogSeverity,
}

impl AuditEvent {
    pub fn new(
        event_type: AuditEventType,
        worker_id: Option<String>,
        resource: Option<String>,
        details: serde_json::Value,
    ) -> Self {
        let severity = match event_type {
            AuditEventType::JobRetried | AuditEventType::NotificationFailed => LogSeverity::Warning,

            AuditEventType::JobDropped | AuditEventType::BatchShipFailed => LogSeverity::Error,

            _ => LogSeverity::Info,
        };

        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            event_type,
            worker_id,
            resource,
            details,
            severity,
        }
    }

    /// Emit on the audit target; never fails the caller
    pub fn log(&self) {
        let payload = match serde_json::to_string(self) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(target: AUDIT_TARGET, "Failed to serialize audit event: {}", e);
                return;
            }
        };

        match self.severity {
            LogSeverity::Info => tracing::info!(target: AUDIT_TARGET, "{}", payload),
            LogSeverity::Warning => tracing::warn!(target: AUDIT_TARGET, "{}", payload),
            LogSeverity::Error => tracing::error!(target: AUDIT_TARGET, "{}", payload),
        }
    }
}

/// Convenience function to log an audit event
pub fn log_event(
    event_type: AuditEventType,
    worker_id: &str,
    resource: Option<String>,
    details: serde_json::Value,
) {
    AuditEvent::new(event_type, Some(worker_id.to_string()), resource, details).log();
}
