//! Site loop analysis.
//!
//! A loop is analyzed in one pass per stage: references are collected,
//! site dependence is resolved, field accesses are aggregated, loop
//! functions are verified and the vectorization verdict is computed.

pub mod collector;
pub mod context;
pub mod dependency;
pub mod fields;
pub mod loop_functions;
pub mod refs;
pub mod vectorize;
pub mod walk;

use crate::config::TranspilerConfig;
use crate::diagnostics::DiagnosticHandler;
use context::{LoopContext, LoopFlags, Parity};
use hilapp_syntax::ast::*;
use hilapp_syntax::pragma::Pragma;
use hilapp_syntax::{Span, TranslationUnit};
use indexmap::IndexMap;
use refs::*;
use rustc_hash::FxHashSet;
use serde::Serialize;
use vectorize::{DefaultTypeInspector, VectorInput, VectorizationVerdict};
use walk::{walk_stmt, Flow, Visitor};

/// Raw output of the reference collector, refined in place by the
/// dependency resolver.
#[derive(Debug, Default)]
pub struct Collection {
    pub field_refs: Vec<FieldReference>,
    pub variables: IndexMap<DeclId, VariableDescriptor>,
    pub assignments: Vec<VarAssignment>,
    pub arrays: IndexMap<DeclId, ArrayReference>,
    pub loop_consts: IndexMap<String, LoopConstExpr>,
    pub selections: IndexMap<String, SelectionDescriptor>,
    pub calls: Vec<CallInfo>,
    pub reduction_vector_updates: Vec<ReductionVectorUpdate>,
}

pub fn is_field_expr(tu: &TranslationUnit, e: ExprId) -> bool {
    tu.expr_type(e)
        .is_some_and(|t| tu.resolve_alias(&t).is_field())
}

pub fn is_site_cursor(tu: &TranslationUnit, e: ExprId) -> bool {
    matches!(&tu.expr(e).kind, ExprKind::Ident(Name { text, decl: None }) if text == hilapp_syntax::builtins::SITE_CURSOR)
}

/// A loop over lattice sites found in a function body: `onsites(P) body`
/// or a single field-parity statement `f[P] = expr;`.
#[derive(Debug, Clone)]
pub struct SiteLoop {
    pub stmt: StmtId,
    pub parity_text: String,
    pub body: StmtId,
    /// Whole statement, replaced by the generated code.
    pub span: Span,
    pub body_span: Span,
    pub pragmas: Vec<Pragma>,
    /// `f[P]` of a field-parity statement.
    pub parity_target: Option<ExprId>,
}

impl SiteLoop {
    pub fn is_field_parity(&self) -> bool {
        self.parity_target.is_some()
    }
}

struct LoopFinder {
    loops: Vec<SiteLoop>,
}

impl Visitor for LoopFinder {
    fn statement(&mut self, tu: &TranslationUnit, id: StmtId, _depth: usize) -> Flow {
        let stmt = tu.stmt(id);
        let StmtKind::Expr(e) = stmt.kind else {
            return Flow::Descend;
        };
        let ExprKind::Assign { lhs, .. } = tu.expr(tu.strip_parens(e)).kind else {
            return Flow::Descend;
        };
        let target = tu.strip_parens(lhs);
        let ExprKind::Index { base, index } = tu.expr(target).kind else {
            return Flow::Descend;
        };
        let is_parity = tu
            .expr_type(index)
            .is_some_and(|t| t.unqualified().as_str() == "Parity");
        if !is_parity || !is_field_expr(tu, tu.strip_parens(base)) {
            return Flow::Descend;
        }
        self.loops.push(SiteLoop {
            stmt: id,
            parity_text: tu.normalized_text(index),
            body: id,
            span: stmt.span,
            body_span: stmt.span,
            pragmas: stmt.pragmas.clone(),
            parity_target: Some(target),
        });
        Flow::Skip
    }

    fn site_loop(&mut self, tu: &TranslationUnit, id: StmtId) -> Flow {
        let stmt = tu.stmt(id);
        if let StmtKind::Onsites { parity, body } = stmt.kind {
            self.loops.push(SiteLoop {
                stmt: id,
                parity_text: tu.normalized_text(parity),
                body,
                span: stmt.span,
                body_span: tu.stmt(body).span,
                pragmas: stmt.pragmas.clone(),
                parity_target: None,
            });
        }
        Flow::Skip
    }
}

/// Site loops of a function body in source order. Loops nested in a site
/// loop are not returned; the collector reports them.
pub fn find_site_loops(tu: &TranslationUnit, body: StmtId) -> Vec<SiteLoop> {
    let mut finder = LoopFinder { loops: Vec::new() };
    walk_stmt(tu, body, 0, &mut finder);
    finder.loops
}

/// Everything known about one site loop after analysis.
#[derive(Debug, Serialize)]
pub struct LoopAnalysis {
    #[serde(skip)]
    pub site_loop: SiteLoop,
    #[serde(skip)]
    pub ctx: LoopContext,
    pub line: usize,
    pub parity: Parity,
    #[serde(skip)]
    pub field_refs: Vec<FieldReference>,
    pub fields: Vec<FieldDescriptor>,
    pub variables: Vec<VariableDescriptor>,
    pub arrays: Vec<ArrayReference>,
    pub loop_consts: Vec<LoopConstExpr>,
    pub selections: Vec<SelectionDescriptor>,
    pub calls: Vec<CallInfo>,
    #[serde(skip)]
    pub reduction_vector_updates: Vec<ReductionVectorUpdate>,
    pub verdict: VectorizationVerdict,
    #[serde(skip)]
    pub loop_functions: Vec<FunctionId>,
    pub has_errors: bool,
}

impl LoopAnalysis {
    pub fn variable(&self, decl: DeclId) -> Option<&VariableDescriptor> {
        self.variables.iter().find(|v| v.decl == decl)
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Outer variables accumulated by the loop.
    pub fn reductions(&self) -> impl Iterator<Item = &VariableDescriptor> {
        self.variables
            .iter()
            .filter(|v| !v.is_loop_local && v.reduction.is_reduction())
    }

    pub fn has_flag(&self, flag: LoopFlags) -> bool {
        self.ctx.flags.contains(flag)
    }
}

/// Runs the analysis stages over one loop. Usage errors are reported to
/// `diagnostics` and recorded in [`LoopAnalysis::has_errors`].
pub fn analyze_loop(
    tu: &TranslationUnit,
    site_loop: &SiteLoop,
    config: &TranspilerConfig,
    diagnostics: &dyn DiagnosticHandler,
    memo: &mut FxHashSet<FunctionId>,
) -> LoopAnalysis {
    let errors_before = diagnostics.error_count();
    let mut ctx = LoopContext::new(
        &site_loop.parity_text,
        site_loop.span,
        site_loop.body_span,
        site_loop.pragmas.clone(),
    );
    if site_loop.is_field_parity() {
        ctx.parity_target = site_loop.parity_target;
        ctx.flags |= LoopFlags::FIELD_PARITY_STATEMENT;
    }

    let mut collection = collector::collect(tu, &mut ctx, site_loop.body, diagnostics);
    dependency::resolve(tu, &mut ctx, &mut collection, config, diagnostics);

    let inspector = DefaultTypeInspector::new(config);
    let mut fields = fields::aggregate(
        tu,
        &ctx,
        &collection.field_refs,
        &inspector,
        config.vector_bits,
        diagnostics,
    );

    // members of a class template seen from a specialized method still
    // carry the class's parameter names
    let type_args = tu
        .enclosing_function(site_loop.span.start)
        .map(|f| crate::specialize::enclosing_type_args(tu, tu.function(f)))
        .unwrap_or_default();
    if !type_args.is_empty() {
        for field in &mut fields {
            field.field_type = field.field_type.substitute(&type_args);
            field.element_type = field.element_type.substitute(&type_args);
            field.vector = vectorize::vector_info(&inspector, tu, &field.element_type, config.vector_bits);
        }
        for var in collection.variables.values_mut() {
            var.ty = var.ty.substitute(&type_args);
        }
        for lc in collection.loop_consts.values_mut() {
            lc.ty = lc.ty.as_ref().map(|t| t.substitute(&type_args));
        }
        for array in collection.arrays.values_mut() {
            array.ty = array.ty.substitute(&type_args);
            array.element_type = array.element_type.substitute(&type_args);
        }
    }
    let loop_functions = loop_functions::verify(tu, &collection.calls, config, diagnostics, memo);

    let mut variables: Vec<VariableDescriptor> = collection.variables.into_values().collect();
    for var in &mut variables {
        let lanes = (var.is_loop_local && var.is_site_dependent) || var.reduction.is_reduction();
        if lanes {
            var.vector = vectorize::vector_info(&inspector, tu, &var.ty, config.vector_bits);
        }
    }
    let vector_variables: Vec<&VariableDescriptor> = variables
        .iter()
        .filter(|v| (v.is_loop_local && v.is_site_dependent) || v.reduction.is_reduction())
        .collect();
    let verdict = vectorize::check(&VectorInput {
        ctx: &ctx,
        fields: &fields,
        variables: &vector_variables,
        calls: &collection.calls,
        reduction_vector_updates: &collection.reduction_vector_updates,
        vector_bits: config.vector_bits,
    });
    if !verdict.vectorizable && config.verbosity > 0 {
        diagnostics.remark(site_loop.span, &format!("Loop is not vectorized: {}", verdict.reason));
    }

    let has_errors = diagnostics.error_count() > errors_before;
    let line = tu.line(site_loop.span.start);
    tracing::debug!(
        line,
        fields = fields.len(),
        variables = variables.len(),
        vectorizable = verdict.vectorizable,
        has_errors,
        "analyzed site loop"
    );

    LoopAnalysis {
        site_loop: site_loop.clone(),
        parity: ctx.parity.clone(),
        ctx,
        line,
        field_refs: collection.field_refs,
        fields,
        variables,
        arrays: collection.arrays.into_values().collect(),
        loop_consts: collection.loop_consts.into_values().collect(),
        selections: collection.selections.into_values().collect(),
        calls: collection.calls,
        reduction_vector_updates: collection.reduction_vector_updates,
        verdict,
        loop_functions,
        has_errors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hilapp_syntax::parse;

    #[test]
    fn test_find_onsites_and_field_parity_statements() {
        let src = "Field<double> f;\nField<double> g;\nvoid run() {\n    onsites(ALL) f[X] = 1.0;\n    g[EVEN] = f[X] + 2.0;\n    double s = 0;\n}\n";
        let tu = parse(src).unwrap();
        let func = tu.functions_named("run")[0];
        let body = tu.function(func).body.unwrap();
        let loops = find_site_loops(&tu, body);
        assert_eq!(loops.len(), 2);
        assert_eq!(loops[0].parity_text, "ALL");
        assert!(!loops[0].is_field_parity());
        assert_eq!(loops[1].parity_text, "EVEN");
        assert!(loops[1].is_field_parity());
    }
}
