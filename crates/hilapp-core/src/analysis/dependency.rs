//! Site dependence and reduction classification.
//!
//! A value is site-dependent when it can differ between lattice sites. The
//! collector records every assignment to a loop-local variable; this pass
//! inspects each assigned expression, then propagates site dependence over
//! the variable dependency graph until nothing changes.

use super::context::{LoopContext, LoopFlags};
use super::refs::{ReductionKind, VarAccess, VarAssignment, VariableDescriptor};
use super::walk::{walk_expr, Access, Flow, Visitor};
use super::{is_field_expr, Collection};
use crate::config::TranspilerConfig;
use crate::diagnostics::DiagnosticHandler;
use hilapp_syntax::ast::*;
use hilapp_syntax::builtins;
use hilapp_syntax::TranslationUnit;
use indexmap::IndexMap;
use rustc_hash::FxHashSet;

/// What an expression's value depends on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dependence {
    pub site_dependent: bool,
    /// Loop-local variables the value depends on.
    pub deps: Vec<DeclId>,
}

impl Dependence {
    pub fn merge(&mut self, other: Dependence) {
        self.site_dependent |= other.site_dependent;
        for d in other.deps {
            if !self.deps.contains(&d) {
                self.deps.push(d);
            }
        }
    }

    /// Same value at every site and every iteration.
    pub fn is_loop_constant(&self) -> bool {
        !self.site_dependent && self.deps.is_empty()
    }
}

struct DependenceScan<'a, L, S> {
    is_loop_local: &'a L,
    is_site_dependent: &'a S,
    result: Dependence,
}

impl<L, S> Visitor for DependenceScan<'_, L, S>
where
    L: Fn(DeclId) -> bool,
    S: Fn(DeclId) -> bool,
{
    fn expression(&mut self, tu: &TranslationUnit, id: ExprId, _access: Access) -> Flow {
        match &tu.expr(id).kind {
            ExprKind::Ident(name) => match name.decl {
                None if name.text == builtins::SITE_CURSOR => self.result.site_dependent = true,
                None => {}
                Some(d) => {
                    if (self.is_site_dependent)(d) {
                        self.result.site_dependent = true;
                    } else if (self.is_loop_local)(d) {
                        if !self.result.deps.contains(&d) {
                            self.result.deps.push(d);
                        }
                    } else if tu.resolve_alias(&tu.decl(d).ty).is_field() {
                        self.result.site_dependent = true;
                    }
                }
            },
            ExprKind::Index { base, .. } if is_field_expr(tu, *base) => {
                self.result.site_dependent = true;
            }
            ExprKind::Call { callee, .. } if is_random_call(tu, *callee) => {
                self.result.site_dependent = true;
            }
            _ => {}
        }
        Flow::Descend
    }
}

pub fn is_random_call(tu: &TranslationUnit, callee: ExprId) -> bool {
    matches!(
        &tu.expr(tu.strip_parens(callee)).kind,
        ExprKind::Ident(name) if matches!(name.text.as_str(), "hila::random" | "hila::gaussian_random" | "hila::gaussrand")
    )
}

/// Dependence of `expr` given which declarations are loop-local and which
/// are already known to be site-dependent.
pub fn expr_dependence<L, S>(
    tu: &TranslationUnit,
    expr: ExprId,
    is_loop_local: &L,
    is_site_dependent: &S,
) -> Dependence
where
    L: Fn(DeclId) -> bool,
    S: Fn(DeclId) -> bool,
{
    let mut scan = DependenceScan {
        is_loop_local,
        is_site_dependent,
        result: Dependence::default(),
    };
    walk_expr(tu, expr, Access::Read, &mut scan);
    scan.result
}

/// Marks every node that depends on a marked node, until a full pass
/// changes nothing. Returns the number of passes made; it never exceeds
/// `flags.len() + 1`.
pub fn propagate_site_dependence(flags: &mut [bool], deps: &[Vec<usize>]) -> usize {
    let mut passes = 0;
    loop {
        passes += 1;
        let mut changed = false;
        for (i, node_deps) in deps.iter().enumerate() {
            if !flags[i] && node_deps.iter().any(|&d| flags[d]) {
                flags[i] = true;
                changed = true;
            }
        }
        if !changed {
            return passes;
        }
    }
}

/// Resolves site dependence of loop-local variables, call arguments and
/// array indices, and classifies assignments to outer variables.
pub fn resolve(
    tu: &TranslationUnit,
    ctx: &mut LoopContext,
    collection: &mut Collection,
    config: &TranspilerConfig,
    diagnostics: &dyn DiagnosticHandler,
) {
    resolve_site_dependence(tu, ctx, &mut collection.variables, &collection.assignments);

    let sd: FxHashSet<DeclId> = collection
        .variables
        .values()
        .filter(|v| v.is_site_dependent)
        .map(|v| v.decl)
        .collect();
    let is_local = |d: DeclId| ctx.is_loop_local(d);
    let is_sd = |d: DeclId| sd.contains(&d);

    for call in &mut collection.calls {
        let mut any_sd = call.is_site_dependent;
        for arg in &mut call.args {
            let dep = expr_dependence(tu, arg.expr, &is_local, &is_sd);
            arg.is_site_dependent = dep.site_dependent;
            arg.dependencies = dep.deps;
            any_sd |= arg.is_site_dependent;
        }
        if let Some(base) = call.method_base {
            any_sd |= expr_dependence(tu, base, &is_local, &is_sd).site_dependent;
        }
        call.is_site_dependent = any_sd;
    }

    let mut site_dependent_index = false;
    for array in collection.arrays.values_mut() {
        array.has_site_dependent_index = array
            .index_exprs
            .iter()
            .any(|i| expr_dependence(tu, *i, &is_local, &is_sd).site_dependent);
        site_dependent_index |= array.has_site_dependent_index && !array.is_reduction_vector;
    }

    let site_dependent_condition = ctx
        .all_conditions()
        .iter()
        .any(|c| expr_dependence(tu, *c, &is_local, &is_sd).site_dependent);

    if site_dependent_index {
        ctx.flags |= LoopFlags::HAS_SITE_DEPENDENT_INDEX;
    }
    if site_dependent_condition {
        ctx.flags |= LoopFlags::HAS_SITE_DEPENDENT_CONDITION;
    }

    classify_reductions(ctx, collection, config, diagnostics);
}

fn resolve_site_dependence(
    tu: &TranslationUnit,
    ctx: &LoopContext,
    variables: &mut IndexMap<DeclId, VariableDescriptor>,
    assignments: &[VarAssignment],
) {
    let is_local = |d: DeclId| ctx.is_loop_local(d);

    // direct scan in execution order
    for assignment in assignments {
        let mut dep = Dependence::default();
        {
            let known = |d: DeclId| variables.get(&d).is_some_and(|v| v.is_site_dependent);
            if let Some(value) = assignment.value {
                dep.merge(expr_dependence(tu, value, &is_local, &known));
            }
            for cond in &assignment.conditions {
                dep.merge(expr_dependence(tu, *cond, &is_local, &known));
            }
        }
        if let Some(var) = variables.get_mut(&assignment.decl) {
            if dep.site_dependent {
                var.is_site_dependent = true;
            }
            for d in dep.deps {
                if d != assignment.decl && !var.dependencies.contains(&d) {
                    var.dependencies.push(d);
                }
            }
        }
    }

    let index: IndexMap<DeclId, usize> = variables
        .keys()
        .enumerate()
        .map(|(i, d)| (*d, i))
        .collect();
    let mut flags: Vec<bool> = variables.values().map(|v| v.is_site_dependent).collect();
    let deps: Vec<Vec<usize>> = variables
        .values()
        .map(|v| {
            v.dependencies
                .iter()
                .filter_map(|d| index.get(d).copied())
                .collect()
        })
        .collect();
    let passes = propagate_site_dependence(&mut flags, &deps);
    tracing::trace!(passes, variables = flags.len(), "site dependence fixed point");
    for (var, flag) in variables.values_mut().zip(flags) {
        var.is_site_dependent = flag;
    }
}

fn classify_reductions(
    ctx: &LoopContext,
    collection: &mut Collection,
    config: &TranspilerConfig,
    diagnostics: &dyn DiagnosticHandler,
) {
    for var in collection.variables.values_mut() {
        if var.is_loop_local || ctx.has_access(&var.name) {
            continue;
        }
        let writes: Vec<_> = var
            .refs
            .iter()
            .filter_map(|r| match r.access {
                VarAccess::Write(op) => Some((op, r.span)),
                VarAccess::Read => None,
            })
            .collect();
        if writes.is_empty() {
            continue;
        }
        var.is_assigned = true;
        var.reduction = reduction_of(
            &var.name,
            &var.ty.to_string(),
            &writes,
            var.is_plain_read,
            config,
            diagnostics,
        );
    }

    for lc in collection.loop_consts.values_mut() {
        if lc.writes.is_empty() || ctx.has_access(&lc.text) {
            continue;
        }
        let ty = lc.ty.as_ref().map(|t| t.to_string()).unwrap_or_default();
        lc.reduction = reduction_of(
            &lc.text,
            &ty,
            &lc.writes,
            lc.is_read,
            config,
            diagnostics,
        );
    }

    for array in collection.arrays.values_mut() {
        if !array.is_reduction_vector || array.writes.is_empty() {
            continue;
        }
        if array.is_read {
            diagnostics.error(
                array.writes[0].1,
                &format!(
                    "ReductionVector '{}' cannot be both read and updated in the same site loop",
                    array.name
                ),
            );
        }
        let kinds: FxHashSet<ReductionKind> = array
            .writes
            .iter()
            .map(|(op, _)| ReductionKind::from_op(*op))
            .collect();
        if kinds.len() > 1 {
            diagnostics.error(
                array.writes[0].1,
                &format!(
                    "ReductionVector '{}' cannot mix += and *= in the same site loop",
                    array.name
                ),
            );
        }
        array.reduction = kinds.into_iter().next().unwrap_or_default();
    }
}

fn reduction_of(
    name: &str,
    ty: &str,
    writes: &[(AssignOp, hilapp_syntax::Span)],
    is_plain_read: bool,
    config: &TranspilerConfig,
    diagnostics: &dyn DiagnosticHandler,
) -> ReductionKind {
    let mut kind = ReductionKind::None;
    let mut ok = true;
    for (op, span) in writes {
        let this = ReductionKind::from_op(*op);
        if !this.is_reduction() {
            diagnostics.error(
                *span,
                &format!(
                    "Cannot assign to '{}' declared outside the site loop with '{}'; only += and *= reductions are allowed",
                    name,
                    op.as_str()
                ),
            );
            ok = false;
            continue;
        }
        if kind.is_reduction() && kind != this {
            diagnostics.error(
                *span,
                &format!("Reduction variable '{}' cannot mix += and *=", name),
            );
            ok = false;
        }
        kind = this;
    }
    if !ok {
        return ReductionKind::None;
    }
    if kind == ReductionKind::Product && !config.allows_product_reduction(ty) {
        diagnostics.error(
            writes[0].1,
            &format!(
                "Product reduction is not supported for variable '{}' of type '{}'",
                name, ty
            ),
        );
        return ReductionKind::None;
    }
    if is_plain_read {
        diagnostics.error(
            writes[0].1,
            &format!(
                "Reduction variable '{}' cannot also be read inside the site loop",
                name
            ),
        );
        return ReductionKind::None;
    }
    kind
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_propagation_follows_chain() {
        // 0 <- 1 <- 2, and 3 independent
        let mut flags = vec![true, false, false, false];
        let deps = vec![vec![], vec![0], vec![1], vec![]];
        let passes = propagate_site_dependence(&mut flags, &deps);
        assert_eq!(flags, vec![true, true, true, false]);
        assert!(passes <= 3);
    }

    #[test]
    fn test_propagation_reverse_order_needs_more_passes() {
        let mut flags = vec![false, false, true];
        let deps = vec![vec![1], vec![2], vec![]];
        let passes = propagate_site_dependence(&mut flags, &deps);
        assert_eq!(flags, vec![true, true, true]);
        assert_eq!(passes, 3);
    }

    proptest! {
        #[test]
        fn prop_fixed_point_is_monotone_and_terminates(
            seeds in proptest::collection::vec(any::<bool>(), 1..24),
            edges in proptest::collection::vec((0usize..24, 0usize..24), 0..64),
        ) {
            let n = seeds.len();
            let mut deps = vec![Vec::new(); n];
            for (a, b) in edges {
                deps[a % n].push(b % n);
            }
            let mut flags = seeds.clone();
            let passes = propagate_site_dependence(&mut flags, &deps);

            prop_assert!(passes <= n + 1);
            for (before, after) in seeds.iter().zip(&flags) {
                prop_assert!(!before || *after);
            }
            // closed under dependencies
            for (i, node_deps) in deps.iter().enumerate() {
                if node_deps.iter().any(|&d| flags[d]) {
                    prop_assert!(flags[i]);
                }
            }
            // idempotent
            let mut again = flags.clone();
            prop_assert_eq!(propagate_site_dependence(&mut again, &deps), 1);
            prop_assert_eq!(again, flags);
        }
    }
}
