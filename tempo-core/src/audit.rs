//! Audit/event sink for lifecycle transitions.
//!
//! Fire-and-forget: callers log sink failures and carry on.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Result, SchedulerError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub description: String,
    pub metadata: serde_json::Value,
}

impl AuditEvent {
    pub fn new(kind: impl Into<String>, description: impl Into<String>, metadata: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            description: description.into(),
            metadata,
        }
    }
}

pub trait AuditSink {
    fn record(&self, event: &AuditEvent) -> Result<()>;
}

/// Emits audit records as structured tracing events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: &AuditEvent) -> Result<()> {
        info!(
            target: "tempo_core::audit",
            kind = %event.kind,
            metadata = %event.metadata,
            "{}",
            event.description
        );
        Ok(())
    }
}

/// Collects events in memory; can be switched into a failing mode.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
    failing: bool,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            events: Mutex::default(),
            failing: true,
        }
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: &AuditEvent) -> Result<()> {
        if self.failing {
            return Err(SchedulerError::Store("audit sink unavailable".to_string()));
        }
        let mut events = self
            .events
            .lock()
            .map_err(|_| SchedulerError::Store("audit sink lock poisoned".to_string()))?;
        events.push(event.clone());
        Ok(())
    }
}
