//! Body Mutation Engine
//!
//! Buffers the message body until end of stream, then applies the whole
//! plan in one merge pass over the original bytes. All positions refer to
//! the original, unmodified body, so edits never shift each other's
//! offsets. Edits are ordered by resolved start offset, declaration order
//! breaking ties. Bytes consumed by a replace/delete are never consumed a
//! second time: a later range that overlaps is clipped to start where the
//! earlier one ended, and one that is entirely covered is dropped.

use std::fmt;

use super::op::Position;
use super::plan::OperationPlan;

/// Per-operation problems found while applying a plan. None of them abort
/// the remaining operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyError {
    /// Position is neither `start`, `end` nor a decimal offset; skipped
    InvalidPosition { index: usize, raw: String },
    /// Offset lies past the end of the body; skipped
    OffsetOutOfRange {
        index: usize,
        offset: usize,
        body_len: usize,
    },
    /// Range overlapped bytes already consumed by an earlier edit.
    /// `superseded` means nothing was left and the edit was dropped.
    OverlapClipped {
        index: usize,
        requested_start: usize,
        clipped_start: usize,
        superseded: bool,
    },
}

impl ApplyError {
    pub fn index(&self) -> usize {
        match self {
            ApplyError::InvalidPosition { index, .. }
            | ApplyError::OffsetOutOfRange { index, .. }
            | ApplyError::OverlapClipped { index, .. } => *index,
        }
    }

    /// Whether the operation contributed nothing to the output
    pub fn is_skip(&self) -> bool {
        match self {
            ApplyError::InvalidPosition { .. } | ApplyError::OffsetOutOfRange { .. } => true,
            ApplyError::OverlapClipped { superseded, .. } => *superseded,
        }
    }
}

impl fmt::Display for ApplyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApplyError::InvalidPosition { index, raw } => {
                write!(f, "operation {}: invalid position '{}'", index, raw)
            }
            ApplyError::OffsetOutOfRange {
                index,
                offset,
                body_len,
            } => write!(
                f,
                "operation {}: offset {} out of range for body of {} bytes",
                index, offset, body_len
            ),
            ApplyError::OverlapClipped {
                index,
                requested_start,
                clipped_start,
                superseded,
            } => {
                if *superseded {
                    write!(
                        f,
                        "operation {}: range at {} fully covered by an earlier edit, dropped",
                        index, requested_start
                    )
                } else {
                    write!(
                        f,
                        "operation {}: range start clipped from {} to {}",
                        index, requested_start, clipped_start
                    )
                }
            }
        }
    }
}

impl std::error::Error for ApplyError {}

/// Output of applying a plan to a complete body
#[derive(Debug, Clone, Default)]
pub struct ApplyReport {
    /// The mutated body
    pub body: Vec<u8>,
    /// Length of the original body
    pub original_len: usize,
    /// Operations that contributed to the output
    pub applied: usize,
    /// Skips and clips, in the order they were found
    pub diagnostics: Vec<ApplyError>,
}

impl ApplyReport {
    pub fn skipped(&self) -> usize {
        self.diagnostics.iter().filter(|d| d.is_skip()).count()
    }
}

/// An operation resolved against the original body
struct Edit<'a> {
    index: usize,
    start: usize,
    end: usize,
    payload: &'a [u8],
}

/// Apply every operation of `plan` to `original`.
pub fn apply(plan: &OperationPlan, original: &[u8]) -> ApplyReport {
    let body_len = original.len();
    let mut diagnostics = Vec::new();
    let mut edits = Vec::with_capacity(plan.len());

    for (index, op) in plan.iter().enumerate() {
        let position = match Position::parse(&op.position) {
            Some(position) => position,
            None => {
                diagnostics.push(ApplyError::InvalidPosition {
                    index,
                    raw: op.position.clone(),
                });
                continue;
            }
        };

        let start = match position.resolve(body_len) {
            Some(start) => start,
            None => {
                let offset = match position {
                    Position::Offset(offset) => offset,
                    Position::Start | Position::End => body_len,
                };
                diagnostics.push(ApplyError::OffsetOutOfRange {
                    index,
                    offset,
                    body_len,
                });
                continue;
            }
        };

        // Ranges running past the end are clamped to it
        let end = start.saturating_add(op.consumed_len()).min(body_len);

        edits.push(Edit {
            index,
            start,
            end,
            payload: op.payload(),
        });
    }

    // Stable: equal offsets keep declaration order
    edits.sort_by_key(|edit| edit.start);

    let payload_len: usize = edits.iter().map(|edit| edit.payload.len()).sum();
    let mut body = Vec::with_capacity(body_len + payload_len);
    let mut cursor = 0;
    let mut applied = 0;

    for edit in &edits {
        let consumes = edit.end > edit.start;

        if consumes && edit.end <= cursor {
            diagnostics.push(ApplyError::OverlapClipped {
                index: edit.index,
                requested_start: edit.start,
                clipped_start: edit.end,
                superseded: true,
            });
            continue;
        }

        if edit.start > cursor {
            body.extend_from_slice(&original[cursor..edit.start]);
            cursor = edit.start;
        } else if consumes && edit.start < cursor {
            diagnostics.push(ApplyError::OverlapClipped {
                index: edit.index,
                requested_start: edit.start,
                clipped_start: cursor,
                superseded: false,
            });
        }

        body.extend_from_slice(edit.payload);
        cursor = cursor.max(edit.end);
        applied += 1;
    }

    body.extend_from_slice(&original[cursor..]);

    ApplyReport {
        body,
        original_len: body_len,
        applied,
        diagnostics,
    }
}

/// Decision after feeding a body chunk to the engine
#[derive(Debug, Clone)]
pub enum BodyDecision {
    /// Hold the body, more chunks expected
    Buffering,
    /// Forward the body untouched
    PassThrough(&'static str),
    /// Replace the whole body with the report's output
    Modified(ApplyReport),
}

impl BodyDecision {
    pub fn is_buffering(&self) -> bool {
        matches!(self, BodyDecision::Buffering)
    }

    pub fn modified_body(&self) -> Option<&[u8]> {
        match self {
            BodyDecision::Modified(report) => Some(&report.body),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EngineState {
    Buffering,
    Finished,
    Abandoned,
}

/// Accumulates one message body and applies its plan at end of stream
pub struct BodyMutationEngine {
    plan: OperationPlan,
    buffer: Vec<u8>,
    /// Total bytes observed, including any released buffer
    total_bytes_seen: usize,
    max_body_size: usize,
    state: EngineState,
}

impl BodyMutationEngine {
    pub fn new(plan: OperationPlan, max_body_size: usize) -> Self {
        Self {
            plan,
            buffer: Vec::new(),
            total_bytes_seen: 0,
            max_body_size,
            state: EngineState::Buffering,
        }
    }

    /// Feed the next slice of body bytes
    pub fn on_body_chunk(&mut self, chunk: &[u8], end_of_stream: bool) -> BodyDecision {
        match self.state {
            EngineState::Buffering => {}
            EngineState::Finished => return BodyDecision::PassThrough("body already modified"),
            EngineState::Abandoned => return BodyDecision::PassThrough("modification abandoned"),
        }

        self.total_bytes_seen += chunk.len();

        if self.plan.is_empty() {
            self.state = EngineState::Finished;
            self.buffer = Vec::new();
            return BodyDecision::PassThrough("no operations");
        }

        if self.total_bytes_seen > self.max_body_size {
            self.state = EngineState::Abandoned;
            self.buffer = Vec::new();
            return BodyDecision::PassThrough("body exceeds max size");
        }

        self.buffer.extend_from_slice(chunk);

        if !end_of_stream {
            return BodyDecision::Buffering;
        }

        self.state = EngineState::Finished;
        let original = std::mem::take(&mut self.buffer);
        BodyDecision::Modified(apply(&self.plan, &original))
    }

    /// Give up on this body; later chunks pass through untouched
    pub fn abandon(&mut self) {
        self.state = EngineState::Abandoned;
        self.buffer = Vec::new();
    }

    /// Get total bytes observed
    pub fn total_bytes(&self) -> usize {
        self.total_bytes_seen
    }

    /// Bytes currently held
    pub fn buffered_bytes(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_complete(&self) -> bool {
        self.state != EngineState::Buffering
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modification::op::ModifyOp;

    fn run(body: &str, ops: Vec<ModifyOp>) -> ApplyReport {
        apply(&OperationPlan::new(ops), body.as_bytes())
    }

    fn output(body: &str, ops: Vec<ModifyOp>) -> String {
        String::from_utf8(run(body, ops).body).unwrap()
    }

    #[test]
    fn test_empty_plan_is_identity() {
        let body = b"{\"model\":\"x\",\"binary\":\"\xff\x00\"}";
        let report = apply(&OperationPlan::empty(), body);
        assert_eq!(report.body, body.to_vec());
        assert_eq!(report.applied, 0);
        assert!(report.diagnostics.is_empty());
    }

    #[test]
    fn test_insert_at_start() {
        assert_eq!(output("body", vec![ModifyOp::insert("start", "pre-")]), "pre-body");
    }

    #[test]
    fn test_insert_at_end() {
        assert_eq!(output("body", vec![ModifyOp::insert("end", "-post")]), "body-post");
    }

    #[test]
    fn test_insert_into_empty_body() {
        assert_eq!(output("", vec![ModifyOp::insert("end", "x")]), "x");
        assert_eq!(output("", vec![ModifyOp::insert("0", "y")]), "y");
    }

    #[test]
    fn test_insert_at_offset() {
        assert_eq!(output("abcdef", vec![ModifyOp::insert("3", "-")]), "abc-def");
    }

    #[test]
    fn test_replace_exact_range() {
        assert_eq!(output("abcdef", vec![ModifyOp::replace("1", 2, "XYZ")]), "aXYZdef");
    }

    #[test]
    fn test_replace_clamped_to_body_end() {
        assert_eq!(output("abcdef", vec![ModifyOp::replace("4", 10, "!")]), "abcd!");
    }

    #[test]
    fn test_replace_with_zero_length_inserts() {
        assert_eq!(output("abc", vec![ModifyOp::replace("1", 0, "_")]), "a_bc");
    }

    #[test]
    fn test_delete_equals_replace_with_empty_value() {
        let deleted = output("abcdef", vec![ModifyOp::delete("2", 3)]);
        let replaced = output("abcdef", vec![ModifyOp::replace("2", 3, "")]);
        assert_eq!(deleted, "abf");
        assert_eq!(deleted, replaced);
    }

    #[test]
    fn test_positions_refer_to_original_body() {
        let ops = vec![
            ModifyOp::insert("start", "0123"),
            ModifyOp::replace("2", 1, "C"),
        ];
        assert_eq!(output("abcdef", ops), "0123abCdef");
    }

    #[test]
    fn test_non_overlapping_ops_independent_of_order() {
        let a = ModifyOp::replace("0", 1, "A");
        let b = ModifyOp::delete("3", 2);
        let c = ModifyOp::insert("end", "!");

        let forward = output("abcdef", vec![a.clone(), b.clone(), c.clone()]);
        let backward = output("abcdef", vec![c, b, a]);
        assert_eq!(forward, "Abcf!");
        assert_eq!(forward, backward);
    }

    #[test]
    fn test_overlap_lower_start_wins() {
        let report = run(
            "abcdef",
            vec![ModifyOp::replace("1", 3, "X"), ModifyOp::replace("2", 2, "Y")],
        );
        assert_eq!(report.body, b"aXef".to_vec());
        assert_eq!(report.applied, 1);
        assert_eq!(
            report.diagnostics,
            vec![ApplyError::OverlapClipped {
                index: 1,
                requested_start: 2,
                clipped_start: 4,
                superseded: true,
            }]
        );
    }

    #[test]
    fn test_overlap_lower_start_wins_regardless_of_declaration() {
        let report = run(
            "abcdef",
            vec![ModifyOp::replace("2", 2, "Y"), ModifyOp::replace("1", 3, "X")],
        );
        assert_eq!(report.body, b"aXef".to_vec());
        assert_eq!(report.diagnostics[0].index(), 0);
    }

    #[test]
    fn test_partial_overlap_is_clipped() {
        let report = run(
            "abcdefgh",
            vec![ModifyOp::delete("1", 3), ModifyOp::replace("3", 3, "Z")],
        );
        // delete takes b,c,d; replace keeps only e,f
        assert_eq!(report.body, b"aZgh".to_vec());
        assert_eq!(report.applied, 2);
        assert_eq!(
            report.diagnostics,
            vec![ApplyError::OverlapClipped {
                index: 1,
                requested_start: 3,
                clipped_start: 4,
                superseded: false,
            }]
        );
        assert_eq!(report.skipped(), 0);
    }

    #[test]
    fn test_same_offset_ties_follow_declaration_order() {
        let ops = vec![ModifyOp::insert("2", "1"), ModifyOp::insert("2", "2")];
        assert_eq!(output("abcd", ops), "ab12cd");

        let ops = vec![ModifyOp::insert("2", "2"), ModifyOp::insert("2", "1")];
        assert_eq!(output("abcd", ops), "ab21cd");
    }

    #[test]
    fn test_equal_start_replace_earlier_declared_wins() {
        let report = run(
            "abcdef",
            vec![ModifyOp::replace("1", 2, "X"), ModifyOp::replace("1", 2, "Y")],
        );
        assert_eq!(report.body, b"aXdef".to_vec());
        assert_eq!(report.skipped(), 1);
    }

    #[test]
    fn test_out_of_range_skipped_others_applied() {
        let report = run(
            "abc",
            vec![
                ModifyOp::insert("start", "<"),
                ModifyOp::insert("4", "?"),
                ModifyOp::insert("end", ">"),
            ],
        );
        assert_eq!(report.body, b"<abc>".to_vec());
        assert_eq!(report.applied, 2);
        assert_eq!(
            report.diagnostics,
            vec![ApplyError::OffsetOutOfRange {
                index: 1,
                offset: 4,
                body_len: 3,
            }]
        );
    }

    #[test]
    fn test_insert_inside_consumed_range_follows_payload() {
        let forward = run(
            "abcdef",
            vec![ModifyOp::replace("1", 3, "X"), ModifyOp::insert("2", "I")],
        );
        assert_eq!(forward.body, b"aXIef".to_vec());
        assert_eq!(forward.applied, 2);
        assert!(forward.diagnostics.is_empty());

        let backward = run(
            "abcdef",
            vec![ModifyOp::insert("2", "I"), ModifyOp::replace("1", 3, "X")],
        );
        assert_eq!(backward.body, b"aXIef".to_vec());
    }

    #[test]
    fn test_huge_offset_reported_out_of_range() {
        let report = run(
            "abc",
            vec![
                ModifyOp::insert("99999999999999999999", "?"),
                ModifyOp::insert("end", "!"),
            ],
        );
        assert_eq!(report.body, b"abc!".to_vec());
        assert_eq!(
            report.diagnostics,
            vec![ApplyError::OffsetOutOfRange {
                index: 0,
                offset: usize::MAX,
                body_len: 3,
            }]
        );
    }

    #[test]
    fn test_invalid_position_skipped() {
        let report = run(
            "abc",
            vec![ModifyOp::insert("middle", "?"), ModifyOp::delete("0", 1)],
        );
        assert_eq!(report.body, b"bc".to_vec());
        assert_eq!(
            report.diagnostics,
            vec![ApplyError::InvalidPosition {
                index: 0,
                raw: "middle".to_string(),
            }]
        );
        assert_eq!(report.skipped(), 1);
    }

    #[test]
    fn test_engine_buffers_until_end_of_stream() {
        let plan = OperationPlan::new(vec![ModifyOp::replace("4", 4, "ABCD")]);
        let mut engine = BodyMutationEngine::new(plan, 1024);

        // Target range straddles the chunk boundary
        assert!(engine.on_body_chunk(b"0123456", false).is_buffering());
        assert_eq!(engine.buffered_bytes(), 7);

        let decision = engine.on_body_chunk(b"789", true);
        assert_eq!(decision.modified_body(), Some(&b"0123ABCD89"[..]));
        assert!(engine.is_complete());
        assert_eq!(engine.total_bytes(), 10);
        assert_eq!(engine.buffered_bytes(), 0);
    }

    #[test]
    fn test_engine_empty_final_chunk() {
        let plan = OperationPlan::new(vec![ModifyOp::insert("end", "!")]);
        let mut engine = BodyMutationEngine::new(plan, 1024);

        engine.on_body_chunk(b"hi", false);
        let decision = engine.on_body_chunk(b"", true);
        assert_eq!(decision.modified_body(), Some(&b"hi!"[..]));
    }

    #[test]
    fn test_engine_size_limit_passes_through() {
        let plan = OperationPlan::new(vec![ModifyOp::insert("start", "x")]);
        let mut engine = BodyMutationEngine::new(plan, 8);

        assert!(engine.on_body_chunk(b"12345", false).is_buffering());
        let decision = engine.on_body_chunk(b"67890", false);
        assert!(matches!(decision, BodyDecision::PassThrough("body exceeds max size")));
        assert_eq!(engine.buffered_bytes(), 0);

        let decision = engine.on_body_chunk(b"end", true);
        assert!(matches!(decision, BodyDecision::PassThrough(_)));
    }

    #[test]
    fn test_engine_empty_plan_passes_through() {
        let mut engine = BodyMutationEngine::new(OperationPlan::empty(), 1024);
        let decision = engine.on_body_chunk(b"data", false);
        assert!(matches!(decision, BodyDecision::PassThrough("no operations")));
        assert!(engine.is_complete());
    }

    #[test]
    fn test_engine_finished_ignores_further_chunks() {
        let plan = OperationPlan::new(vec![ModifyOp::delete("0", 1)]);
        let mut engine = BodyMutationEngine::new(plan, 1024);

        assert!(engine.on_body_chunk(b"abc", true).modified_body().is_some());
        assert!(matches!(
            engine.on_body_chunk(b"more", true),
            BodyDecision::PassThrough(_)
        ));
    }

    #[test]
    fn test_engine_abandon() {
        let plan = OperationPlan::new(vec![ModifyOp::delete("0", 1)]);
        let mut engine = BodyMutationEngine::new(plan, 1024);

        engine.on_body_chunk(b"abc", false);
        engine.abandon();
        assert!(engine.is_complete());
        assert!(matches!(
            engine.on_body_chunk(b"def", true),
            BodyDecision::PassThrough("modification abandoned")
        ));
    }
}
