//! Stream Context
//!
//! Per-message glue between host lifecycle events and the modification
//! core. The host is reached only through `MessageHost`, so the same state
//! machine runs against Envoy in production and an in-memory fake in tests.

use log::{debug, info, warn};
use proxy_wasm::types::Action;
use std::fmt;

use crate::config::{BodyTarget, FilterConfig};
use crate::modification::{decode, BodyDecision, BodyMutationEngine};
use crate::telemetry::{
    audit_apply, audit_decode_failed, audit_modified, audit_no_body, audit_pass_through,
    audit_plan, audit_rejected, AuditEvent,
};

const CONTENT_LENGTH: &str = "content-length";

/// Failed host call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostError(pub String);

impl fmt::Display for HostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "host call failed: {}", self.0)
    }
}

impl std::error::Error for HostError {}

/// Header and body primitives the filter needs from the proxy
pub trait MessageHost {
    fn get_header(&self, message: BodyTarget, name: &str) -> Option<String>;

    fn remove_header(&mut self, message: BodyTarget, name: &str) -> Result<(), HostError>;

    /// Read `length` bytes of the buffered body starting at `offset`
    fn get_body_bytes(&self, message: BodyTarget, offset: usize, length: usize) -> Option<Vec<u8>>;

    /// Replace the first `buffered_len` bytes of the body with `body`
    fn replace_body_bytes(
        &mut self,
        message: BodyTarget,
        buffered_len: usize,
        body: &[u8],
    ) -> Result<(), HostError>;
}

/// What happened to the message, reported when the stream is done
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamSummary {
    pub control_header_seen: bool,
    pub operations: usize,
    pub rejected: usize,
    pub applied: usize,
    pub skipped: usize,
    pub original_len: Option<usize>,
    pub modified_len: Option<usize>,
    pub pass_through: Option<&'static str>,
}

/// Per-message state: the plan (inside its engine) and the body buffer
pub struct StreamContext {
    context_id: u32,
    config: FilterConfig,
    engine: Option<BodyMutationEngine>,
    summary: StreamSummary,
}

impl StreamContext {
    pub fn new(context_id: u32, config: FilterConfig) -> Self {
        Self {
            context_id,
            config,
            engine: None,
            summary: StreamSummary::default(),
        }
    }

    pub fn summary(&self) -> &StreamSummary {
        &self.summary
    }

    /// Whether a plan is waiting for (or consuming) a body
    pub fn is_active(&self) -> bool {
        self.engine.as_ref().map_or(false, |e| !e.is_complete())
    }

    /// Read, strip and decode the control header
    pub fn on_request_headers<H: MessageHost>(&mut self, host: &mut H, end_of_stream: bool) -> Action {
        let header = self.config.control_header.clone();

        let raw = match host.get_header(BodyTarget::Request, &header) {
            Some(raw) => raw,
            None => {
                debug!("[context_id={}] No {} header", self.context_id, header);
                return Action::Continue;
            }
        };

        self.summary.control_header_seen = true;
        debug!("[context_id={}] {} value: {}", self.context_id, header, raw);

        // Never forwarded, whatever it contains
        if let Err(e) = host.remove_header(BodyTarget::Request, &header) {
            warn!("[context_id={}] Unable to strip {}: {}", self.context_id, header, e);
        }

        let decoded = match decode(&raw) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!("[context_id={}] Unable to parse {} value", self.context_id, header);
                audit_decode_failed(&e, &raw).with_context(self.context_id).emit();
                return Action::Continue;
            }
        };

        self.summary.rejected = decoded.rejected.len();
        for rejected in &decoded.rejected {
            audit_rejected(rejected).with_context(self.context_id).emit();
        }

        let plan = decoded.plan;
        if plan.is_empty() {
            debug!("[context_id={}] No operations to apply", self.context_id);
            return Action::Continue;
        }

        if self.config.log_operations {
            for (index, op) in plan.iter().enumerate() {
                debug!("[context_id={}] op[{}]: {}", self.context_id, index, op);
            }
        }

        self.summary.operations = plan.len();
        let target = self.config.target;
        audit_plan(plan.len())
            .with_context(self.context_id)
            .with_target(target.as_str())
            .emit();

        if target == BodyTarget::Request && end_of_stream {
            self.no_body("request has no body");
            return Action::Continue;
        }

        self.engine = Some(BodyMutationEngine::new(plan, self.config.max_body_size));

        if target == BodyTarget::Request {
            self.drop_content_length(host, BodyTarget::Request);
        }

        Action::Continue
    }

    pub fn on_response_headers<H: MessageHost>(&mut self, host: &mut H, end_of_stream: bool) -> Action {
        if self.config.target != BodyTarget::Response || !self.is_active() {
            return Action::Continue;
        }

        if end_of_stream {
            self.no_body("response has no body");
            return Action::Continue;
        }

        self.drop_content_length(host, BodyTarget::Response);
        Action::Continue
    }

    /// Handle a body event. `buffered_len` is the total body size the host
    /// currently holds for this message.
    pub fn on_body<H: MessageHost>(
        &mut self,
        host: &mut H,
        message: BodyTarget,
        buffered_len: usize,
        end_of_stream: bool,
    ) -> Action {
        if message != self.config.target {
            return Action::Continue;
        }

        let engine = match self.engine.as_mut() {
            Some(engine) if !engine.is_complete() => engine,
            _ => return Action::Continue,
        };

        // While paused the host keeps accumulating, so only the tail is new
        let observed = engine.total_bytes();
        let chunk = if buffered_len > observed {
            match host.get_body_bytes(message, observed, buffered_len - observed) {
                Some(chunk) => chunk,
                None => {
                    self.pass_through("body bytes unavailable");
                    return Action::Continue;
                }
            }
        } else {
            Vec::new()
        };

        debug!(
            "[context_id={}] Received body chunk: {} bytes, end_of_stream: {}",
            self.context_id,
            chunk.len(),
            end_of_stream
        );

        match engine.on_body_chunk(&chunk, end_of_stream) {
            BodyDecision::Buffering => {
                debug!(
                    "[context_id={}] Buffering chunk, total buffered: {} bytes",
                    self.context_id,
                    engine.buffered_bytes()
                );
                Action::Pause
            }
            BodyDecision::PassThrough(reason) => {
                self.pass_through(reason);
                Action::Continue
            }
            BodyDecision::Modified(report) => {
                for diagnostic in &report.diagnostics {
                    audit_apply(diagnostic).with_context(self.context_id).emit();
                }

                if let Err(e) = host.replace_body_bytes(message, buffered_len, &report.body) {
                    warn!("[context_id={}] Unable to replace body: {}", self.context_id, e);
                    self.pass_through("body replace failed");
                    return Action::Continue;
                }

                self.summary.applied = report.applied;
                self.summary.skipped = report.skipped();
                self.summary.original_len = Some(report.original_len);
                self.summary.modified_len = Some(report.body.len());

                audit_modified(report.applied, report.original_len, report.body.len())
                    .with_context(self.context_id)
                    .with_target(message.as_str())
                    .emit();

                Action::Continue
            }
        }
    }

    /// Log the outcome and release the plan and any buffered body
    pub fn on_done(&mut self) {
        let summary = &self.summary;
        if summary.modified_len.is_some() {
            info!(
                "[context_id={}] Body modified: {} applied, {} skipped, {} -> {} bytes",
                self.context_id,
                summary.applied,
                summary.skipped,
                summary.original_len.unwrap_or(0),
                summary.modified_len.unwrap_or(0)
            );
        } else if let Some(reason) = summary.pass_through {
            info!("[context_id={}] Body passed through: {}", self.context_id, reason);
        } else {
            debug!("[context_id={}] Request processing complete", self.context_id);
        }

        self.engine = None;
    }

    fn drop_content_length<H: MessageHost>(&self, host: &mut H, message: BodyTarget) {
        if let Err(e) = host.remove_header(message, CONTENT_LENGTH) {
            warn!(
                "[context_id={}] Unable to remove {} content-length: {}",
                self.context_id,
                message.as_str(),
                e
            );
        }
    }

    /// Size cap or host failure: forward the body untouched
    fn pass_through(&mut self, reason: &'static str) {
        self.finish_unmodified(audit_pass_through(reason), reason);
    }

    /// Headers-only message: routine, nothing to edit
    fn no_body(&mut self, reason: &'static str) {
        self.finish_unmodified(audit_no_body(reason), reason);
    }

    fn finish_unmodified(&mut self, event: AuditEvent, reason: &'static str) {
        if let Some(engine) = self.engine.as_mut() {
            engine.abandon();
        }
        self.summary.pass_through = Some(reason);
        event
            .with_context(self.context_id)
            .with_target(self.config.target.as_str())
            .emit();
    }
}
