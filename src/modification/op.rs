//! Body modification instruction types
//!
//! A `ModifyOp` is one edit declared in the control header. Positions are
//! kept as the raw text the client sent and resolved against the body only
//! once its full length is known.

use std::fmt;

/// Reserved position token meaning "before the first byte"
pub const POSITION_START: &str = "start";
/// Reserved position token meaning "after the last byte"
pub const POSITION_END: &str = "end";

/// Edit operation kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Insert `value` at `position`
    Insert,
    /// Replace `length` bytes at `position` with `value`
    Replace,
    /// Remove `length` bytes at `position`
    Delete,
}

impl Operation {
    /// Parse the wire name of an operation (exact, case-sensitive)
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "insert" => Some(Operation::Insert),
            "replace" => Some(Operation::Replace),
            "delete" => Some(Operation::Delete),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Insert => "insert",
            Operation::Replace => "replace",
            Operation::Delete => "delete",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Interpretation mode for `position` and `value`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModifyType {
    /// Raw byte offset into the body
    Byte,
}

impl ModifyType {
    /// Parse the wire name of a type. An empty string selects byte mode.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "" | "byte" => Some(ModifyType::Byte),
            _ => None,
        }
    }
}

/// Where an edit lands, resolved against a body of known length
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    Start,
    End,
    Offset(usize),
}

impl Position {
    /// Parse a position descriptor: `start`, `end`, or decimal digits
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            POSITION_START => Some(Position::Start),
            POSITION_END => Some(Position::End),
            // `usize::from_str` would also accept a leading '+'
            _ if !raw.is_empty() && raw.bytes().all(|b| b.is_ascii_digit()) => {
                // Too many digits is still an offset, just past any body
                Some(Position::Offset(raw.parse().unwrap_or(usize::MAX)))
            }
            _ => None,
        }
    }

    /// Absolute offset in a body of `body_len` bytes, if it lies inside it
    pub fn resolve(&self, body_len: usize) -> Option<usize> {
        match *self {
            Position::Start => Some(0),
            Position::End => Some(body_len),
            Position::Offset(offset) if offset <= body_len => Some(offset),
            Position::Offset(_) => None,
        }
    }
}

/// One declared edit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModifyOp {
    /// Raw position descriptor (`start`, `end` or a decimal offset)
    pub position: String,
    /// Literal bytes to insert or replace with
    pub value: String,
    /// Edit kind
    pub operation: Operation,
    /// Number of existing bytes superseded by replace/delete
    pub length: usize,
}

impl ModifyOp {
    pub fn new(operation: Operation, position: &str, value: &str, length: usize) -> Self {
        Self {
            position: position.to_string(),
            value: value.to_string(),
            operation,
            length,
        }
    }

    pub fn insert(position: &str, value: &str) -> Self {
        Self::new(Operation::Insert, position, value, 0)
    }

    pub fn replace(position: &str, length: usize, value: &str) -> Self {
        Self::new(Operation::Replace, position, value, length)
    }

    pub fn delete(position: &str, length: usize) -> Self {
        Self::new(Operation::Delete, position, "", length)
    }

    /// Bytes of the original body this edit supersedes
    pub fn consumed_len(&self) -> usize {
        match self.operation {
            Operation::Insert => 0,
            Operation::Replace | Operation::Delete => self.length,
        }
    }

    /// Bytes this edit writes into the output
    pub fn payload(&self) -> &[u8] {
        match self.operation {
            Operation::Insert | Operation::Replace => self.value.as_bytes(),
            Operation::Delete => &[],
        }
    }
}

impl fmt::Display for ModifyOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} position={} length={} value_len={}",
            self.operation,
            self.position,
            self.length,
            self.value.len()
        )
    }
}
