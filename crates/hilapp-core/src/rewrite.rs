//! Ordered source edits applied in a single pass.
//!
//! Edits are recorded against byte offsets of the original text and applied
//! together, so recording order never shifts later offsets. When two edits
//! overlap the one with the higher priority wins, and between equal
//! priorities the one recorded first wins. Insertions at the same position
//! keep priority order, then recording order.

use crate::errors::TranspileError;
use hilapp_syntax::Span;
use std::fmt::Write as _;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditKind {
    Replace,
    Insert,
    Remove,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edit {
    pub kind: EditKind,
    pub span: Span,
    pub text: String,
    pub priority: i32,
    seq: usize,
}

impl Edit {
    fn conflicts_with(&self, other: &Edit) -> bool {
        match (self.span.is_empty(), other.span.is_empty()) {
            (true, true) => false,
            (true, false) => other.span.start < self.span.start && self.span.start < other.span.end,
            (false, true) => self.span.start < other.span.start && other.span.start < self.span.end,
            (false, false) => self.span.overlaps(other.span),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EditList {
    edits: Vec<Edit>,
}

impl EditList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.edits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }

    pub fn replace(&mut self, span: Span, text: impl Into<String>) {
        self.push(EditKind::Replace, span, text.into(), 0);
    }

    pub fn replace_with_priority(&mut self, span: Span, text: impl Into<String>, priority: i32) {
        self.push(EditKind::Replace, span, text.into(), priority);
    }

    pub fn insert(&mut self, pos: usize, text: impl Into<String>) {
        self.push(EditKind::Insert, Span::point(pos), text.into(), 0);
    }

    pub fn insert_with_priority(&mut self, pos: usize, text: impl Into<String>, priority: i32) {
        self.push(EditKind::Insert, Span::point(pos), text.into(), priority);
    }

    pub fn remove(&mut self, span: Span) {
        self.push(EditKind::Remove, span, String::new(), 0);
    }

    fn push(&mut self, kind: EditKind, span: Span, text: String, priority: i32) {
        tracing::trace!(?kind, %span, priority, "edit");
        let seq = self.edits.len();
        self.edits.push(Edit {
            kind,
            span,
            text,
            priority,
            seq,
        });
    }

    /// One line per recorded edit, in recording order.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        for e in &self.edits {
            let kind = match e.kind {
                EditKind::Replace => "replace",
                EditKind::Insert => "insert",
                EditKind::Remove => "remove",
            };
            let _ = writeln!(out, "{} {} p{} {:?}", e.span, kind, e.priority, e.text);
        }
        out
    }

    /// Edits that survive overlap resolution, in application order.
    fn resolved(&self, range: Span) -> Vec<&Edit> {
        let mut by_rank: Vec<&Edit> = self
            .edits
            .iter()
            .filter(|e| range.contains(e.span))
            .collect();
        by_rank.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.seq.cmp(&b.seq)));

        let mut accepted: Vec<&Edit> = Vec::with_capacity(by_rank.len());
        for edit in by_rank {
            if accepted.iter().any(|a| a.conflicts_with(edit)) {
                tracing::trace!(span = %edit.span, "edit dropped by overlap");
                continue;
            }
            accepted.push(edit);
        }

        accepted.sort_by(|a, b| {
            a.span
                .start
                .cmp(&b.span.start)
                .then(b.span.is_empty().cmp(&a.span.is_empty()))
                .then(b.priority.cmp(&a.priority))
                .then(a.seq.cmp(&b.seq))
        });
        accepted
    }

    /// Applies every edit to `source`.
    pub fn apply(&self, source: &str) -> Result<String, TranspileError> {
        self.check_bounds(source)?;
        Ok(self.splice(source, Span::new(0, source.len())))
    }

    /// Text of `range` with the edits that lie inside it applied. Edits
    /// crossing the boundary of `range` are ignored.
    pub fn apply_range(&self, source: &str, range: Span) -> Result<String, TranspileError> {
        if range.end > source.len() {
            return Err(TranspileError::fatal(
                format!("edit range {} outside source of {} bytes", range, source.len()),
                range,
            ));
        }
        self.check_bounds(source)?;
        Ok(self.splice(source, range))
    }

    fn check_bounds(&self, source: &str) -> Result<(), TranspileError> {
        for e in &self.edits {
            if e.span.end > source.len()
                || !source.is_char_boundary(e.span.start)
                || !source.is_char_boundary(e.span.end)
            {
                return Err(TranspileError::fatal(
                    format!("edit {} outside source of {} bytes", e.span, source.len()),
                    e.span,
                ));
            }
        }
        Ok(())
    }

    fn splice(&self, source: &str, range: Span) -> String {
        let mut out = String::with_capacity(range.len());
        let mut cursor = range.start;
        for edit in self.resolved(range) {
            if edit.span.start > cursor {
                out.push_str(&source[cursor..edit.span.start]);
            }
            out.push_str(&edit.text);
            cursor = cursor.max(edit.span.end);
        }
        out.push_str(&source[cursor..range.end]);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offsets_refer_to_original_text() {
        let src = "a + b;";
        let mut edits = EditList::new();
        edits.replace(Span::new(4, 5), "bb");
        edits.replace(Span::new(0, 1), "aaa");
        assert_eq!(edits.apply(src).unwrap(), "aaa + bb;");
    }

    #[test]
    fn test_insertions_at_same_point_keep_order() {
        let mut edits = EditList::new();
        edits.insert(0, "1");
        edits.insert(0, "2");
        edits.insert_with_priority(0, "0", 5);
        assert_eq!(edits.apply("x").unwrap(), "012x");
    }

    #[test]
    fn test_overlap_resolved_by_priority() {
        let src = "f[X + e_x] = 1;";
        let mut edits = EditList::new();
        edits.replace(Span::new(5, 8), "dir");
        edits.replace_with_priority(Span::new(0, 10), "tmp", 1);
        assert_eq!(edits.apply(src).unwrap(), "tmp = 1;");

        let mut edits = EditList::new();
        edits.replace(Span::new(0, 10), "first");
        edits.replace(Span::new(0, 3), "second");
        assert_eq!(edits.apply(src).unwrap(), "first = 1;");
    }

    #[test]
    fn test_insert_inside_replacement_dropped() {
        let mut edits = EditList::new();
        edits.replace(Span::new(0, 4), "ab");
        edits.insert(2, "!");
        edits.insert(4, "?");
        assert_eq!(edits.apply("wxyz.").unwrap(), "ab?.");
    }

    #[test]
    fn test_apply_range_only_uses_inner_edits() {
        let src = "int a = b + c;";
        let mut edits = EditList::new();
        edits.replace(Span::new(8, 9), "B");
        edits.replace(Span::new(0, 3), "long");
        assert_eq!(edits.apply_range(src, Span::new(8, 13)).unwrap(), "B + c");
    }

    #[test]
    fn test_remove_and_dump() {
        let mut edits = EditList::new();
        edits.remove(Span::new(3, 7));
        assert_eq!(edits.apply("abc = 1;").unwrap(), "abc;");
        assert_eq!(edits.dump(), "3..7 remove p0 \"\"\n");
    }

    #[test]
    fn test_out_of_bounds_is_fatal() {
        let mut edits = EditList::new();
        edits.replace(Span::new(2, 20), "x");
        assert!(matches!(
            edits.apply("abc"),
            Err(TranspileError::Fatal { .. })
        ));
    }
}
