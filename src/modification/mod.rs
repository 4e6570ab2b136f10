//! Body modification core
//!
//! This module provides:
//! - Instruction decoding from the control header
//! - The per-message operation plan
//! - The buffering mutation engine

pub mod decoder;
pub mod engine;
pub mod op;
pub mod plan;

pub use decoder::{decode, DecodeError, Decoded};
pub use engine::{apply, ApplyError, ApplyReport, BodyDecision, BodyMutationEngine};
pub use op::{ModifyOp, ModifyType, Operation, Position};
pub use plan::OperationPlan;
