//! Rewriting of the loop body text.
//!
//! All substitutions are recorded as edits against the original source and
//! applied to the body range in one pass. Backends choose which groups of
//! substitutions they need and how site operations are spelled.

use super::SITE_INDEX;
use crate::analysis::refs::*;
use crate::analysis::vectorize::vectorized_type;
use crate::analysis::LoopAnalysis;
use crate::diagnostics::DiagnosticHandler;
use crate::errors::TranspileError;
use crate::rewrite::EditList;
use hilapp_syntax::ast::{DeclId, ExprId, ExprKind};
use hilapp_syntax::query::is_integral;
use hilapp_syntax::{Span, TranslationUnit, TypeName};
use rustc_hash::FxHashSet;

/// Priority of edits replacing a whole statement, above the expression
/// edits inside it.
const STATEMENT_PRIORITY: i32 = 10;

/// How a backend spells per-site operations.
pub trait SiteSyntax {
    /// Prefix of lattice queries: `lattice.`, `_HILA_vlattice->`.
    fn lattice(&self) -> &str;

    /// Object through which `field` is accessed inside the loop.
    fn field_object(&self, field: &FieldDescriptor) -> String {
        field.name.clone()
    }

    /// Value of `field` read through `object` at site `index`.
    fn load(&self, object: &str, field: &FieldDescriptor, index: &str) -> String;

    /// Statement writing `value` to `field` through `object` at `index`.
    fn store(&self, object: &str, field: &FieldDescriptor, value: &str, index: &str) -> String;

    /// Type of the temporaries holding values of `field`.
    fn value_type(&self, field: &FieldDescriptor) -> String {
        field.element_type.to_string()
    }
}

/// Element type of `field` as held in the loop, for the lane width `lanes`
/// on the vector backend.
pub fn lane_type(ty: &TypeName, info: &VectorInfo, lanes: usize) -> String {
    if info.adapts_width {
        vectorized_type(ty, &info.base_type, lanes)
    } else {
        info.vector_type.clone()
    }
}

pub struct BodyRewriter<'a> {
    tu: &'a TranslationUnit,
    analysis: &'a LoopAnalysis,
    edits: EditList,
}

impl<'a> BodyRewriter<'a> {
    pub fn new(tu: &'a TranslationUnit, analysis: &'a LoopAnalysis) -> Self {
        Self {
            tu,
            analysis,
            edits: EditList::new(),
        }
    }

    fn span(&self, id: ExprId) -> Span {
        self.tu.expr(id).span
    }

    /// Field references become site temporaries, neighbour temporaries or
    /// inline loads.
    pub fn fields(&mut self, syntax: &dyn SiteSyntax) -> Result<(), TranspileError> {
        let a = self.analysis;
        for r in &a.field_refs {
            let field = a.field(&r.name).ok_or_else(|| {
                TranspileError::fatal(format!("no descriptor for field '{}'", r.name), r.span)
            })?;
            let text = match r.kind {
                FieldAccessKind::AtSite | FieldAccessKind::AtParity => field.temp.clone(),
                FieldAccessKind::Direction => {
                    let (index, entry) = field
                        .directions
                        .iter()
                        .enumerate()
                        .find(|(_, d)| d.refs.contains(&r.expr))
                        .ok_or_else(|| {
                            TranspileError::fatal(
                                format!("neighbour reference of '{}' without a direction entry", r.name),
                                r.span,
                            )
                        })?;
                    if field.has_loop_local_direction() {
                        let neighbour = format!("{}neighbours({}, {})", syntax.lattice(), entry.text, SITE_INDEX);
                        syntax.load(&syntax.field_object(field), field, &neighbour)
                    } else {
                        field.direction_temp(&entry.key, index)
                    }
                }
                FieldAccessKind::Offset => {
                    let entry = field
                        .offsets
                        .iter()
                        .find(|o| o.refs.contains(&r.expr))
                        .ok_or_else(|| {
                            TranspileError::fatal(format!("offset reference of '{}' without a shift", r.name), r.span)
                        })?;
                    syntax.load(&entry.temp, field, SITE_INDEX)
                }
            };
            self.edits.replace(r.span, text);
        }
        Ok(())
    }

    /// `X.coordinates()`, `X.coordinate(d)` and `X.parity()`.
    pub fn special_calls(&mut self, syntax: &dyn SiteSyntax) {
        for call in &self.analysis.calls {
            let Some(special) = call.special else {
                continue;
            };
            let text = match special {
                SpecialCall::Coordinates => format!("{}coordinates({})", syntax.lattice(), SITE_INDEX),
                SpecialCall::Coordinate => {
                    let arg = call
                        .args
                        .first()
                        .map(|a| self.tu.expr_text(a.expr).to_string())
                        .unwrap_or_default();
                    format!("{}coordinate({}, {})", syntax.lattice(), SITE_INDEX, arg)
                }
                SpecialCall::Parity => format!("{}site_parity({})", syntax.lattice(), SITE_INDEX),
                SpecialCall::Random => continue,
            };
            self.edits.replace(call.span, text);
        }
    }

    /// Updates of outer variables and loop-constant expressions go to the
    /// loop's accumulators.
    pub fn reductions(&mut self) {
        for var in self.analysis.reductions() {
            let temp = var.reduction_temp();
            for r in &var.refs {
                self.edits.replace(r.span, temp.clone());
            }
        }
        for lc in self.analysis.loop_consts.iter().filter(|c| c.reduction.is_reduction()) {
            let temp = lc.temp();
            for r in &lc.refs {
                self.edits.replace(self.tu.expr(*r).span, temp.clone());
            }
        }
    }

    /// `sel.select(X[, v])` becomes `object.select_site[_value](index[, v])`.
    pub fn selections(&mut self, object: &dyn Fn(&SelectionDescriptor, usize) -> String) {
        for (i, sel) in self.analysis.selections.iter().enumerate() {
            let object = object(sel, i);
            for call in &sel.calls {
                let ExprKind::Call { callee, args, .. } = &self.tu.expr(call.expr).kind else {
                    continue;
                };
                let method = if call.value.is_some() {
                    "select_site_value"
                } else {
                    "select_site"
                };
                self.edits.replace(self.span(*callee), format!("{}.{}", object, method));
                if let Some(cursor) = args.first() {
                    self.edits.replace(self.span(*cursor), SITE_INDEX);
                }
            }
        }
    }

    /// Site-dependent loop-local variables are declared with vector types.
    pub fn vector_declarations(&mut self, lanes: usize) {
        for var in &self.analysis.variables {
            if !var.is_loop_local || !var.is_site_dependent || var.reduction.is_reduction() {
                continue;
            }
            let Some(info) = &var.vector else {
                continue;
            };
            let decl = self.tu.decl(var.decl);
            self.edits.replace(decl.ty_span, lane_type(&var.ty, info, lanes));
            // integer registers are not converted implicitly to floating ones
            let Some(init) = decl.init else {
                continue;
            };
            let conversion = match var.ty.unqualified().as_str() {
                "double" => "to_double",
                "float" => "to_float",
                _ => continue,
            };
            let init_span = self.span(init);
            let integral = self
                .tu
                .expr_type(init)
                .is_some_and(|ty| is_integral(&self.tu.resolve_alias(&ty)));
            if integral && self.mentions_site_value(init_span) {
                self.edits.insert(init_span.start, format!("{}(", conversion));
                self.edits.insert(init_span.end, ")");
            }
        }
    }

    fn mentions_site_value(&self, span: Span) -> bool {
        let a = self.analysis;
        a.field_refs.iter().any(|r| span.contains(r.span))
            || a.variables
                .iter()
                .filter(|v| v.is_site_dependent)
                .any(|v| v.refs.iter().any(|r| span.contains(r.span)))
    }

    /// Outer compile-time constants are replaced by their values so the
    /// kernel does not refer to host variables. Returns the replaced
    /// declarations.
    pub fn constants(&mut self, diagnostics: &dyn DiagnosticHandler) -> FxHashSet<DeclId> {
        let mut replaced = FxHashSet::default();
        for var in &self.analysis.variables {
            if !var.is_constant || var.is_loop_local {
                continue;
            }
            let decl = self.tu.decl(var.decl);
            let Some(init) = decl.init else {
                continue;
            };
            let ty = var.ty.unqualified();
            let literal = if is_integral(&ty) {
                self.tu.const_int(init).map(|v| v.to_string())
            } else {
                self.tu.const_float(init).map(format_float)
            };
            let Some(literal) = literal else {
                continue;
            };
            let text = if matches!(ty.as_str(), "int" | "double") {
                literal
            } else {
                diagnostics.warning(
                    decl.name_span,
                    &format!(
                        "Constant '{}' of type '{}' is replaced by the literal {} inside the kernel; a cast is added",
                        var.name, ty, literal
                    ),
                );
                format!("(({}){})", ty, literal)
            };
            for r in &var.refs {
                self.edits.replace(r.span, text.clone());
            }
            replaced.insert(var.decl);
        }
        replaced
    }

    /// Loop-constant expressions are read from kernel parameters.
    pub fn loop_consts(&mut self) {
        for lc in self.analysis.loop_consts.iter().filter(|c| !c.reduction.is_reduction()) {
            let temp = lc.temp();
            for r in &lc.refs {
                self.edits.replace(self.tu.expr(*r).span, temp.clone());
            }
        }
    }

    /// Captured arrays are read from device copies named by `name`.
    pub fn arrays(&mut self, name: &dyn Fn(&ArrayReference) -> String) {
        for array in &self.analysis.arrays {
            let replacement = name(array);
            for r in &array.refs {
                if let Some(root) = array_root_ident(self.tu, *r) {
                    self.edits.replace(self.span(root), replacement.clone());
                }
            }
        }
    }

    /// `rv[index] op= value;` statements are replaced by the text `update`
    /// builds from the rewritten index and value.
    pub fn reduction_vector_updates(
        &mut self,
        update: &dyn Fn(&ReductionVectorUpdate, &str, &str) -> String,
    ) -> Result<(), TranspileError> {
        let source = &self.tu.source;
        let mut replacements = Vec::new();
        for u in &self.analysis.reduction_vector_updates {
            let index = self.edits.apply_range(source, self.span(u.index))?;
            let value = self.edits.apply_range(source, self.span(u.value))?;
            replacements.push((self.tu.stmt(u.stmt).span, update(u, &index, &value)));
        }
        for (span, text) in replacements {
            self.edits
                .replace_with_priority(span, text, STATEMENT_PRIORITY);
        }
        Ok(())
    }

    /// Rewritten text of the loop body.
    pub fn finish(self) -> Result<String, TranspileError> {
        let body = self.analysis.site_loop.body_span;
        self.edits.apply_range(&self.tu.source, body)
    }
}

/// `a` of `a[i]` or `a[i][j]`.
fn array_root_ident(tu: &TranslationUnit, mut id: ExprId) -> Option<ExprId> {
    loop {
        match &tu.expr(id).kind {
            ExprKind::Index { base, .. } | ExprKind::Paren(base) => id = *base,
            ExprKind::Ident(_) => return Some(id),
            _ => return None,
        }
    }
}

/// Shortest literal that reads back as the same `f64`, always with a
/// decimal point or exponent.
pub fn format_float(v: f64) -> String {
    let text = format!("{:?}", v);
    if text.contains(['.', 'e', 'E']) || text.contains("inf") || text.contains("NaN") {
        text
    } else {
        format!("{}.0", text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_float() {
        assert_eq!(format_float(2.0), "2.0");
        assert_eq!(format_float(0.25), "0.25");
        assert_eq!(format_float(1e-30), "1e-30");
    }

    #[test]
    fn test_lane_type_follows_loop_width_for_integers() {
        let info = VectorInfo {
            base_type: "int".into(),
            lane_width: 8,
            vector_type: "Vec8i".into(),
            adapts_width: true,
        };
        assert_eq!(lane_type(&TypeName::new("int"), &info, 4), "Vec4i");
        let info = VectorInfo {
            base_type: "double".into(),
            lane_width: 4,
            vector_type: "Vec4d".into(),
            adapts_width: false,
        };
        assert_eq!(lane_type(&TypeName::new("double"), &info, 4), "Vec4d");
    }
}
