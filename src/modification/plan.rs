//! Operation Plan
//!
//! Ordered, read-only list of decoded edits for one message. Declaration
//! order is preserved and breaks ties between edits at the same offset.

use super::op::ModifyOp;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationPlan {
    ops: Vec<ModifyOp>,
}

impl OperationPlan {
    pub fn new(ops: Vec<ModifyOp>) -> Self {
        Self { ops }
    }

    /// An empty plan is a pass-through
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn get(&self, index: usize) -> Option<&ModifyOp> {
        self.ops.get(index)
    }

    /// Operations in declaration order
    pub fn iter(&self) -> std::slice::Iter<'_, ModifyOp> {
        self.ops.iter()
    }
}
