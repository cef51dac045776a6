//! Field access aggregation and read-after-write hazard detection.

use super::context::{LoopContext, Parity};
use super::refs::*;
use super::vectorize::{vector_info, TypeInspector};
use crate::diagnostics::DiagnosticHandler;
use hilapp_syntax::{TranslationUnit, TypeName};
use indexmap::IndexMap;

/// Merges field references into one descriptor per field, in order of
/// first appearance.
pub fn aggregate(
    tu: &TranslationUnit,
    ctx: &LoopContext,
    refs: &[FieldReference],
    inspector: &dyn TypeInspector,
    vector_bits: u32,
    diagnostics: &dyn DiagnosticHandler,
) -> Vec<FieldDescriptor> {
    let mut fields: IndexMap<String, FieldDescriptor> = IndexMap::new();

    for r in refs {
        let field = fields
            .entry(r.name.clone())
            .or_insert_with(|| new_descriptor(tu, r));

        match r.kind {
            FieldAccessKind::AtSite | FieldAccessKind::AtParity => {
                if r.is_written {
                    field.is_written = true;
                    field.is_compound_written |= r.is_compound;
                    field.is_conditionally_written |= r.is_conditional;
                    field.first_write_seq = Some(
                        field
                            .first_write_seq
                            .map_or(r.sequence, |s| s.min(r.sequence)),
                    );
                }
                // later reads see the value already held in the temporary
                if r.is_read && field.first_write_seq.map_or(true, |w| r.sequence <= w) {
                    field.is_read_at_site = true;
                }
            }
            FieldAccessKind::Direction => {
                field.is_read_via_neighbor = true;
                let key = r.direction.clone().unwrap_or_else(|| DirectionKey::Expr(r.direction_text.clone()));
                match field.directions.iter_mut().find(|d| d.key == key) {
                    Some(entry) => {
                        entry.count += 1;
                        entry.is_loop_local |= r.direction_is_loop_local;
                        entry.refs.push(r.expr);
                    }
                    None => field.directions.push(DirectionEntry {
                        key,
                        text: r.direction_text.clone(),
                        count: 1,
                        is_loop_local: r.direction_is_loop_local,
                        refs: vec![r.expr],
                    }),
                }
            }
            FieldAccessKind::Offset => {
                field.is_read_via_offset = true;
                match field.offsets.iter_mut().find(|o| o.text == r.direction_text) {
                    Some(entry) => entry.refs.push(r.expr),
                    None => {
                        let temp = format!("_HILA_shift_{}_{}", sanitize(&r.name), field.offsets.len());
                        field.offsets.push(OffsetEntry {
                            text: r.direction_text.clone(),
                            temp,
                            refs: vec![r.expr],
                        });
                    }
                }
            }
        }
    }

    let mut fields: Vec<FieldDescriptor> = fields.into_values().collect();
    for field in &mut fields {
        check_hazard(ctx, field, refs, diagnostics);
        field.vector = vector_info(inspector, tu, &field.element_type, vector_bits);
    }
    tracing::debug!(count = fields.len(), "aggregated fields");
    fields
}

fn new_descriptor(tu: &TranslationUnit, r: &FieldReference) -> FieldDescriptor {
    let field_type = tu
        .expr_type(r.name_expr)
        .map(|t| tu.resolve_alias(&t))
        .unwrap_or_else(|| TypeName::new("Field<auto>"));
    let element_type = field_type
        .field_element()
        .unwrap_or_else(|| TypeName::new("auto"));
    let is_const = tu.expr_type(r.name_expr).is_some_and(|t| t.is_const());
    FieldDescriptor {
        temp: format!("_HILA_field_{}", sanitize(&r.name)),
        name: r.name.clone(),
        name_expr: r.name_expr,
        field_type,
        element_type,
        is_const,
        is_written: false,
        is_read_at_site: false,
        is_read_via_neighbor: false,
        is_read_via_offset: false,
        is_compound_written: false,
        is_conditionally_written: false,
        first_write_seq: None,
        directions: Vec::new(),
        offsets: Vec::new(),
        vector: None,
        needs_parity_assertion: false,
    }
}

/// A field that is written and read through a neighbour in the same loop
/// may read values the loop has already overwritten. With parity ALL this
/// is certain; with EVEN or ODD the neighbours are of the other parity and
/// it is safe as long as the field is not aliased, which is checked at run
/// time.
fn check_hazard(
    ctx: &LoopContext,
    field: &mut FieldDescriptor,
    refs: &[FieldReference],
    diagnostics: &dyn DiagnosticHandler,
) {
    if !field.is_written || !field.is_read_via_neighbor || ctx.is_safe(&field.name) {
        return;
    }
    let neighbour_reads: Vec<&FieldReference> = refs
        .iter()
        .filter(|r| r.name == field.name && r.kind == FieldAccessKind::Direction)
        .collect();
    match ctx.parity {
        Parity::All => {
            for read in neighbour_reads {
                diagnostics.error(
                    read.span,
                    &format!(
                        "Simultaneous access of '{}[X]' and neighbour '{}[X + {}]' is not allowed with parity ALL; use EVEN or ODD, or '#pragma hila safe({})'",
                        field.name, field.name, read.direction_text, field.name
                    ),
                );
            }
            for write in refs.iter().filter(|r| r.name == field.name && r.is_written) {
                diagnostics.remark(write.span, &format!("Location where '{}' is written", field.name));
            }
        }
        _ => {
            if let Some(read) = neighbour_reads.first() {
                diagnostics.remark(
                    read.span,
                    &format!(
                        "Field '{}' is written and read through a neighbour; a run-time parity check is inserted",
                        field.name
                    ),
                );
            }
            field.needs_parity_assertion = true;
        }
    }
}

/// Identifier-safe form of a field expression, for temporary names.
pub fn sanitize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if c.is_ascii_alphanumeric() || c == '_' {
            out.push(c);
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    out.trim_end_matches('_').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("f"), "f");
        assert_eq!(sanitize("s.links[1]"), "s_links_1");
        assert_eq!(sanitize("this->u"), "this_u");
    }
}
