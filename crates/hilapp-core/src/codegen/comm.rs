//! Neighbour communication schedule of a loop.
//!
//! Every distinct (field, direction) pair is fetched once. A field read
//! through a direction that changes inside the loop fetches all
//! directions. With overlap enabled the loop runs twice over the sites:
//! first the sites whose neighbours are local, then the rest after the
//! fetches have completed.

use super::emitter::Emitter;
use super::{LOOP_PARITY, SITE_INDEX};
use crate::analysis::refs::DirectionKey;
use crate::analysis::LoopAnalysis;

pub const DIR_MASK: &str = "_HILA_dir_mask";
pub const WAIT_PASS: &str = "_HILA_wait_i";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fetch {
    pub field: String,
    pub direction: String,
}

#[derive(Debug, Clone, Default)]
pub struct CommPlan {
    pub fetches: Vec<Fetch>,
    /// Fields fetched in every direction.
    pub all_directions: Vec<String>,
}

impl CommPlan {
    pub fn for_loop(analysis: &LoopAnalysis) -> Self {
        let mut plan = CommPlan::default();
        for field in &analysis.fields {
            if field.has_loop_local_direction() {
                plan.all_directions.push(field.name.clone());
                continue;
            }
            let mut seen: Vec<&DirectionKey> = Vec::new();
            for dir in &field.directions {
                if seen.contains(&&dir.key) {
                    continue;
                }
                seen.push(&dir.key);
                plan.fetches.push(Fetch {
                    field: field.name.clone(),
                    direction: dir.text.clone(),
                });
            }
        }
        plan
    }

    pub fn is_empty(&self) -> bool {
        self.fetches.is_empty() && self.all_directions.is_empty()
    }

    /// `start_get` calls; with `masked` the returned direction bits are
    /// collected into the pending mask.
    pub fn start_lines(&self, masked: bool) -> Vec<String> {
        let lhs = if masked {
            format!("{} |= ", DIR_MASK)
        } else {
            String::new()
        };
        let mut lines = Vec::new();
        if masked {
            lines.push(format!("dir_mask_t {} = 0;", DIR_MASK));
        }
        for f in &self.fetches {
            lines.push(format!(
                "{}{}.start_get({}, {});",
                lhs, f.field, f.direction, LOOP_PARITY
            ));
        }
        for field in &self.all_directions {
            lines.push(format!(
                "for (int _HILA_d = 0; _HILA_d < NDIRS; ++_HILA_d) {}{}.start_get((Direction)_HILA_d, {});",
                lhs, field, LOOP_PARITY
            ));
        }
        lines
    }

    pub fn wait_lines(&self) -> Vec<String> {
        let mut lines: Vec<String> = self
            .fetches
            .iter()
            .map(|f| format!("{}.wait_get({}, {});", f.field, f.direction, LOOP_PARITY))
            .collect();
        for field in &self.all_directions {
            lines.push(format!(
                "for (int _HILA_d = 0; _HILA_d < NDIRS; ++_HILA_d) {}.wait_get((Direction)_HILA_d, {});",
                field, LOOP_PARITY
            ));
        }
        lines
    }
}

/// Opens the two-pass loop over pending communication.
pub fn open_wait_loop(e: &mut Emitter) {
    e.open(&format!(
        "for (int {w} = 0; {w} < 2; ++{w}) {{",
        w = WAIT_PASS
    ));
}

/// Site filter of the current pass. `lattice` is the lattice object
/// prefix, `lattice.` or `_HILA_vlattice->`.
pub fn open_wait_filter(e: &mut Emitter, lattice: &str) {
    e.open(&format!(
        "if ((({}wait_mask({}) & {}) != 0) == {}) {{",
        lattice, SITE_INDEX, DIR_MASK, WAIT_PASS
    ));
}

/// Ends the first pass: stops if nothing was pending, otherwise waits for
/// the fetches before the second pass.
pub fn close_wait_loop(e: &mut Emitter, plan: &CommPlan) {
    e.write_indented(&format!("if ({} == 0) break;", DIR_MASK));
    for line in plan.wait_lines() {
        e.write_indented(&line);
    }
    e.close("}");
}

/// Offsets are materialized before the loop into shifted copies.
pub fn shift_lines(analysis: &LoopAnalysis) -> Vec<String> {
    let mut lines = Vec::new();
    for field in &analysis.fields {
        for offset in &field.offsets {
            lines.push(format!(
                "const Field<{}> {} = {}.shift({}, {});",
                field.element_type, offset.temp, field.name, offset.text, LOOP_PARITY
            ));
        }
    }
    lines
}
