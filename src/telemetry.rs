//! Telemetry Module
//!
//! Emits structured audit events for body modification so decode failures,
//! dropped instructions and skipped edits can be reproduced from logs.
//! In Wasm, we emit structured logs that can be collected by
//! Envoy's access logging or external collectors.

use log::{info, warn};
use serde::Serialize;

use crate::modification::{ApplyError, DecodeError};

/// Longest raw header excerpt carried in an event
const MAX_RAW_VALUE_LEN: usize = 256;

/// Audit event types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    /// Control header decoded into a non-empty plan
    PlanDecoded,
    /// Control header was not a JSON array
    DecodeFailed,
    /// One instruction dropped at decode time
    OperationRejected,
    /// One instruction skipped at apply time
    OperationSkipped,
    /// An edit range was clipped by an earlier one
    OverlapClipped,
    /// Body replaced with the mutated result
    BodyModified,
    /// Body forwarded untouched despite a plan
    BodyPassedThrough,
    /// Targeted message carried no body, nothing to edit
    NoBody,
}

impl AuditEventType {
    fn is_warning(&self) -> bool {
        !matches!(
            self,
            AuditEventType::PlanDecoded | AuditEventType::BodyModified | AuditEventType::NoBody
        )
    }
}

/// Audit event for logging
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    /// Event type
    pub event_type: AuditEventType,
    /// HTTP context the event belongs to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_id: Option<u32>,
    /// Body being edited (request, response)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<&'static str>,
    /// Index of the instruction in the control header
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation_index: Option<usize>,
    /// Reason for action
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Offending raw input, truncated
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_value: Option<String>,
    /// Number of operations in the plan
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operations: Option<usize>,
    /// Body size before modification
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_len: Option<usize>,
    /// Body size after modification
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified_len: Option<usize>,
}

impl AuditEvent {
    /// Create a new audit event
    pub fn new(event_type: AuditEventType) -> Self {
        Self {
            event_type,
            context_id: None,
            target: None,
            operation_index: None,
            reason: None,
            raw_value: None,
            operations: None,
            original_len: None,
            modified_len: None,
        }
    }

    pub fn with_context(mut self, context_id: u32) -> Self {
        self.context_id = Some(context_id);
        self
    }

    pub fn with_target(mut self, target: &'static str) -> Self {
        self.target = Some(target);
        self
    }

    pub fn with_index(mut self, index: usize) -> Self {
        self.operation_index = Some(index);
        self
    }

    pub fn with_reason(mut self, reason: &str) -> Self {
        self.reason = Some(reason.to_string());
        self
    }

    /// Attach raw input, truncated on a character boundary
    pub fn with_raw_value(mut self, raw: &str) -> Self {
        self.raw_value = Some(truncate(raw, MAX_RAW_VALUE_LEN).to_string());
        self
    }

    pub fn with_operations(mut self, count: usize) -> Self {
        self.operations = Some(count);
        self
    }

    pub fn with_sizes(mut self, original_len: usize, modified_len: usize) -> Self {
        self.original_len = Some(original_len);
        self.modified_len = Some(modified_len);
        self
    }

    /// Log the event
    pub fn emit(&self) {
        match serde_json::to_string(self) {
            Ok(json) => {
                if self.event_type.is_warning() {
                    warn!("[BODY-MOD-AUDIT] {}", json);
                } else {
                    info!("[BODY-MOD-AUDIT] {}", json);
                }
            }
            Err(e) => {
                warn!("Failed to serialize audit event: {}", e);
            }
        }
    }
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Whole control header rejected
pub fn audit_decode_failed(error: &DecodeError, raw: &str) -> AuditEvent {
    AuditEvent::new(AuditEventType::DecodeFailed)
        .with_reason(&error.to_string())
        .with_raw_value(raw)
}

/// One instruction dropped while decoding
pub fn audit_rejected(error: &DecodeError) -> AuditEvent {
    let event = AuditEvent::new(AuditEventType::OperationRejected).with_reason(&error.to_string());
    match error.element_index() {
        Some(index) => event.with_index(index),
        None => event,
    }
}

/// Skip or clip found while applying
pub fn audit_apply(error: &ApplyError) -> AuditEvent {
    let event_type = match error {
        ApplyError::OverlapClipped { .. } => AuditEventType::OverlapClipped,
        ApplyError::InvalidPosition { .. } | ApplyError::OffsetOutOfRange { .. } => {
            AuditEventType::OperationSkipped
        }
    };
    let event = AuditEvent::new(event_type)
        .with_index(error.index())
        .with_reason(&error.to_string());
    match error {
        ApplyError::InvalidPosition { raw, .. } => event.with_raw_value(raw),
        _ => event,
    }
}

pub fn audit_plan(operations: usize) -> AuditEvent {
    AuditEvent::new(AuditEventType::PlanDecoded).with_operations(operations)
}

pub fn audit_modified(applied: usize, original_len: usize, modified_len: usize) -> AuditEvent {
    AuditEvent::new(AuditEventType::BodyModified)
        .with_operations(applied)
        .with_sizes(original_len, modified_len)
}

pub fn audit_pass_through(reason: &str) -> AuditEvent {
    AuditEvent::new(AuditEventType::BodyPassedThrough).with_reason(reason)
}

pub fn audit_no_body(reason: &str) -> AuditEvent {
    AuditEvent::new(AuditEventType::NoBody).with_reason(reason)
}
