//! Reference collection: one walk over a loop body that classifies every
//! field access, variable reference, bracket access and call.
//!
//! Usage errors are reported as they are found and the offending
//! expression is not descended into, so one mistake produces one message.

use super::context::{LoopContext, LoopFlags};
use super::dependency::{expr_dependence, is_random_call, Dependence};
use super::refs::*;
use super::walk::{any_expr, walk_expr, walk_stmt, Access, Flow, Visitor};
use super::{is_field_expr, is_site_cursor, Collection};
use crate::diagnostics::DiagnosticHandler;
use hilapp_syntax::ast::*;
use hilapp_syntax::builtins;
use hilapp_syntax::pragma::{self, PragmaKind};
use hilapp_syntax::{Span, TranslationUnit, TypeName};
use rustc_hash::{FxHashMap, FxHashSet};

/// Classified index of a field access.
#[derive(Debug)]
enum FieldIndex {
    Site,
    Parity,
    Neighbour {
        key: DirectionKey,
        text: String,
        dir: ExprId,
    },
    Offset {
        text: String,
        offset: ExprId,
    },
    Invalid,
}

pub struct Collector<'a> {
    ctx: &'a mut LoopContext,
    diagnostics: &'a dyn DiagnosticHandler,
    out: Collection,
    recorded: FxHashSet<ExprId>,
    /// Out-parameter positions of calls seen so far.
    out_params: FxHashMap<ExprId, Vec<bool>>,
    inner_loops: usize,
    current_stmt: Option<StmtId>,
}

/// Collects the references of the loop body `body`.
pub fn collect(
    tu: &TranslationUnit,
    ctx: &mut LoopContext,
    body: StmtId,
    diagnostics: &dyn DiagnosticHandler,
) -> Collection {
    let mut collector = Collector {
        ctx,
        diagnostics,
        out: Collection::default(),
        recorded: FxHashSet::default(),
        out_params: FxHashMap::default(),
        inner_loops: 0,
        current_stmt: None,
    };
    match &tu.stmt(body).kind {
        StmtKind::Block(stmts) => {
            for stmt in stmts {
                collector.ctx.next_statement();
                walk_stmt(tu, *stmt, 0, &mut collector);
            }
        }
        _ => {
            collector.ctx.next_statement();
            walk_stmt(tu, body, 0, &mut collector);
        }
    }
    collector.out
}

impl Collector<'_> {
    fn error(&self, span: Span, message: String) -> Flow {
        self.diagnostics.error(span, &message);
        Flow::Skip
    }

    fn loop_dependence(&self, tu: &TranslationUnit, expr: ExprId) -> Dependence {
        let ctx = &*self.ctx;
        expr_dependence(tu, expr, &|d| ctx.is_loop_local(d), &|_| false)
    }

    // ===== Identifiers =====

    fn identifier(&mut self, tu: &TranslationUnit, id: ExprId, name: &Name, access: Access) -> Flow {
        let span = tu.expr(id).span;
        let Some(decl) = name.decl else {
            if name.text == builtins::SITE_CURSOR {
                return self.error(
                    span,
                    "Site cursor X can only be used as a field index or with coordinates(), coordinate() or parity()".into(),
                );
            }
            if builtins::is_builtin_name(&name.text) || !tu.functions_named(&name.text).is_empty() {
                return Flow::Descend;
            }
            return self.error(
                span,
                format!(
                    "Reference to '{}' is not supported inside a site loop (unimplemented construct)",
                    name.text
                ),
            );
        };

        let d = tu.decl(decl);
        if d.kind == DeclKind::Enumerator {
            return Flow::Descend;
        }
        if tu.resolve_alias(&d.ty).is_field() {
            return self.error(
                span,
                format!("Field '{}' must be indexed with [X] inside a site loop", d.name),
            );
        }
        self.variable(tu, id, decl, access);
        Flow::Descend
    }

    fn variable(&mut self, tu: &TranslationUnit, id: ExprId, decl: DeclId, access: Access) {
        let is_loop_local = self.ctx.is_loop_local(decl);
        let var = self
            .out
            .variables
            .entry(decl)
            .or_insert_with(|| new_variable(tu, decl, is_loop_local));
        let span = tu.expr(id).span;
        match access {
            Access::Read => {
                var.is_plain_read = true;
                var.refs.push(VarRef {
                    expr: id,
                    span,
                    access: VarAccess::Read,
                });
            }
            Access::Write { op, value } => {
                var.refs.push(VarRef {
                    expr: id,
                    span,
                    access: VarAccess::Write(op),
                });
                if is_loop_local {
                    var.is_assigned = true;
                    self.out.assignments.push(VarAssignment {
                        decl,
                        value,
                        conditions: self.ctx.conditions().to_vec(),
                        span,
                    });
                }
            }
        }
    }

    // ===== Field accesses =====

    fn field_access(
        &mut self,
        tu: &TranslationUnit,
        id: ExprId,
        base: ExprId,
        index: ExprId,
        access: Access,
    ) -> Flow {
        let span = tu.expr(id).span;
        let name = tu.normalized_text(base);

        if !self.loop_dependence(tu, base).deps.is_empty() {
            return self.error(
                span,
                format!(
                    "Field expression '{}' cannot depend on a variable declared inside the site loop",
                    name
                ),
            );
        }
        if any_expr(tu, index, |tu, e| {
            matches!(&tu.expr(e).kind, ExprKind::Call { callee, .. } if is_random_call(tu, *callee))
        }) {
            return self.error(
                span,
                format!("Random number generator cannot be called inside the index of field '{}'", name),
            );
        }

        let (kind, direction, direction_text, direction_is_loop_local) =
            match classify_field_index(tu, index) {
                FieldIndex::Invalid => {
                    return self.error(
                        span,
                        format!(
                            "Field '{}' must be indexed with X, X + direction or X + offset inside a site loop",
                            name
                        ),
                    )
                }
                FieldIndex::Parity => {
                    if self.ctx.parity_target != Some(id) {
                        return self.error(
                            span,
                            format!(
                                "Parity index '{}' is only allowed on the left side of a single-statement field assignment",
                                tu.expr_text(id)
                            ),
                        );
                    }
                    (FieldAccessKind::AtParity, None, String::new(), false)
                }
                FieldIndex::Site => (FieldAccessKind::AtSite, None, String::new(), false),
                FieldIndex::Neighbour { key, text, dir } => {
                    if access.is_write() {
                        return self.error(
                            span,
                            format!("Cannot assign to neighbour value '{}' of field '{}'", tu.expr_text(id), name),
                        );
                    }
                    let loop_local = !self.loop_dependence(tu, dir).deps.is_empty();
                    walk_expr(tu, dir, Access::Read, self);
                    (FieldAccessKind::Direction, Some(key), text, loop_local)
                }
                FieldIndex::Offset { text, offset } => {
                    if access.is_write() {
                        return self.error(
                            span,
                            format!("Cannot assign to shifted value '{}' of field '{}'", tu.expr_text(id), name),
                        );
                    }
                    if !self.loop_dependence(tu, offset).deps.is_empty() {
                        return self.error(
                            span,
                            format!(
                                "Offset '{}' of field '{}' cannot depend on a variable declared inside the site loop",
                                text, name
                            ),
                        );
                    }
                    (FieldAccessKind::Offset, None, text, false)
                }
            };

        if access.is_write() && tu.expr_type(base).is_some_and(|t| t.is_const()) {
            return self.error(span, format!("Cannot assign to const field '{}'", name));
        }

        if self.recorded.insert(id) {
            let (is_written, is_compound) = match access {
                Access::Read => (false, false),
                Access::Write { op, value } => (true, op.is_compound() || value.is_none()),
            };
            self.out.field_refs.push(FieldReference {
                expr: id,
                name_expr: base,
                span,
                name,
                kind,
                is_read: access.reads(),
                is_written,
                is_compound,
                is_conditional: !self.ctx.conditions().is_empty(),
                sequence: self.ctx.sequence(),
                direction,
                direction_text,
                direction_is_loop_local,
            });
        }
        Flow::Skip
    }

    // ===== Bracket accesses =====

    fn bracket(
        &mut self,
        tu: &TranslationUnit,
        id: ExprId,
        base: ExprId,
        index: ExprId,
        access: Access,
    ) -> Flow {
        let base = tu.strip_parens(base);
        if is_field_expr(tu, base) {
            return self.field_access(tu, id, base, index, access);
        }
        if let Some(decl) = array_root(tu, base) {
            if self.ctx.is_loop_local(decl) {
                return Flow::Descend;
            }
            return self.array_access(tu, id, decl, index, access);
        }
        if tu.expr_type(base).is_none() && self.loop_dependence(tu, base).deps.is_empty() {
            self.diagnostics.warning(
                tu.expr(id).span,
                &format!(
                    "Cannot determine what '{}' is indexing; treating it as an ordinary expression",
                    tu.expr_text(id)
                ),
            );
        }
        Flow::Descend
    }

    fn array_access(
        &mut self,
        tu: &TranslationUnit,
        id: ExprId,
        decl: DeclId,
        index: ExprId,
        access: Access,
    ) -> Flow {
        let span = tu.expr(id).span;
        let d = tu.decl(decl);
        let ty = tu.resolve_alias(&d.ty);
        let is_reduction_vector = ty.short_head() == "ReductionVector";

        if is_reduction_vector {
            let entry = self.array_entry(tu, decl, ArrayRefKind::Reduction);
            entry.refs.push(id);
            entry.index_exprs.push(index);
            match access {
                Access::Read => entry.is_read = true,
                Access::Write { op, value } => {
                    entry.writes.push((op, span));
                    if !matches!(op, AssignOp::Add | AssignOp::Mul) || value.is_none() {
                        return self.error(
                            span,
                            format!("ReductionVector '{}' can only be updated with += or *=", d.name),
                        );
                    }
                    match (self.standalone_update(tu, id), value) {
                        (Some(stmt), Some(value)) => {
                            self.out.reduction_vector_updates.push(ReductionVectorUpdate {
                                stmt,
                                array: decl,
                                base_text: d.name.clone(),
                                index,
                                value,
                                kind: ReductionKind::from_op(op),
                            })
                        }
                        _ => self.ctx.flags |= LoopFlags::NO_VECTOR,
                    }
                }
            }
            walk_expr(tu, index, Access::Read, self);
            return Flow::Skip;
        }

        let index_is_constant = self.loop_dependence(tu, index).is_loop_constant();
        match access {
            Access::Write { op, .. } => {
                if !index_is_constant {
                    return self.error(
                        span,
                        format!(
                            "Cannot assign to an element of array '{}' with an index that changes inside the site loop",
                            d.name
                        ),
                    );
                }
                self.loop_const(tu, id).writes.push((op, span));
            }
            Access::Read if index_is_constant => {
                self.loop_const(tu, id).is_read = true;
            }
            Access::Read => {
                if array_size(tu, d).is_none() {
                    return self.error(
                        span,
                        format!("Cannot determine the size of array '{}' used inside the site loop", d.name),
                    );
                }
                let entry = self.array_entry(tu, decl, ArrayRefKind::WholeCapture);
                entry.refs.push(id);
                entry.index_exprs.push(index);
                entry.is_read = true;
            }
        }
        walk_expr(tu, index, Access::Read, self);
        Flow::Skip
    }

    fn array_entry(&mut self, tu: &TranslationUnit, decl: DeclId, kind: ArrayRefKind) -> &mut ArrayReference {
        self.out.arrays.entry(decl).or_insert_with(|| {
            let d = tu.decl(decl);
            let ty = tu.resolve_alias(&d.ty);
            let element_type = if d.is_array() {
                ty.clone()
            } else {
                ty.container_element().unwrap_or_else(|| ty.clone())
            };
            ArrayReference {
                decl,
                name: d.name.clone(),
                is_reduction_vector: ty.short_head() == "ReductionVector",
                ty,
                element_type,
                kind,
                reduction: ReductionKind::None,
                size_expr: array_size(tu, d),
                dims: d.array_dims.len().max(1),
                dim_texts: d
                    .array_dims
                    .iter()
                    .map(|dim| dim.map(|e| tu.expr_text(e).to_string()).unwrap_or_default())
                    .collect(),
                refs: Vec::new(),
                index_exprs: Vec::new(),
                has_site_dependent_index: false,
                is_read: false,
                writes: Vec::new(),
            }
        })
    }

    /// The statement, if `lhs` is the target of an assignment that forms a
    /// whole expression statement.
    fn standalone_update(&self, tu: &TranslationUnit, lhs: ExprId) -> Option<StmtId> {
        let stmt = self.current_stmt?;
        let StmtKind::Expr(e) = tu.stmt(stmt).kind else {
            return None;
        };
        match tu.expr(tu.strip_parens(e)).kind {
            ExprKind::Assign { lhs: target, .. } if tu.strip_parens(target) == lhs => Some(stmt),
            _ => None,
        }
    }

    fn loop_const(&mut self, tu: &TranslationUnit, id: ExprId) -> &mut LoopConstExpr {
        let key = tu.normalized_text(id);
        let next = self.out.loop_consts.len();
        let lc = self
            .out
            .loop_consts
            .entry(key.clone())
            .or_insert_with(|| LoopConstExpr {
                expr: id,
                text: key,
                ty: tu.expr_type(id),
                reduction: ReductionKind::None,
                is_read: false,
                writes: Vec::new(),
                refs: Vec::new(),
                index: next,
            });
        lc.refs.push(id);
        lc
    }

    // ===== Member accesses =====

    fn member(&mut self, tu: &TranslationUnit, id: ExprId, access: Access) -> Flow {
        if is_field_expr(tu, id) {
            return self.error(
                tu.expr(id).span,
                format!("Field '{}' must be indexed with [X] inside a site loop", tu.expr_text(id)),
            );
        }
        let Some(root) = loop_const_root(tu, id) else {
            return Flow::Descend;
        };
        let outer = match &tu.expr(root).kind {
            ExprKind::This => true,
            ExprKind::Ident(Name { decl: Some(d), .. }) => {
                !self.ctx.is_loop_local(*d) && !tu.resolve_alias(&tu.decl(*d).ty).is_field()
            }
            _ => false,
        };
        if !outer {
            return Flow::Descend;
        }
        let span = tu.expr(id).span;
        let lc = self.loop_const(tu, id);
        match access {
            Access::Read => lc.is_read = true,
            Access::Write { op, .. } => lc.writes.push((op, span)),
        }
        Flow::Skip
    }

    // ===== Calls =====

    fn call(&mut self, tu: &TranslationUnit, id: ExprId, callee: ExprId, args: &[ExprId]) -> Flow {
        let span = tu.expr(id).span;
        let callee = tu.strip_parens(callee);
        match &tu.expr(callee).kind {
            ExprKind::Member { base, member, .. } => {
                let base = tu.strip_parens(*base);
                if is_site_cursor(tu, base) {
                    let special = match member.as_str() {
                        "coordinates" => SpecialCall::Coordinates,
                        "coordinate" => SpecialCall::Coordinate,
                        "parity" => SpecialCall::Parity,
                        other => {
                            return self.error(span, format!("Unsupported site cursor method X.{}()", other));
                        }
                    };
                    self.push_call(tu, id, member.clone(), None, Some(special), None, args, true);
                    for arg in args {
                        walk_expr(tu, *arg, Access::Read, self);
                    }
                    return Flow::Skip;
                }
                if member == "select" && is_selection(tu, base) {
                    return self.selection(tu, id, base, args);
                }
                let function = method_of(tu, base, member);
                let vectorizable = builtins::is_value_method(member)
                    || function.is_some_and(|f| is_loop_function(tu, f));
                self.push_call(tu, id, member.clone(), function, None, Some(base), args, vectorizable);
                Flow::Descend
            }
            ExprKind::Ident(name) => {
                if is_random_call(tu, callee) {
                    self.ctx.flags |= LoopFlags::CONTAINS_RANDOM;
                    self.push_call(tu, id, name.text.clone(), None, Some(SpecialCall::Random), None, args, false);
                    return Flow::Descend;
                }
                let function = function_for_call(tu, &name.text, args.len());
                let vectorizable = builtins::is_math_function(&name.text)
                    || function.is_some_and(|f| is_loop_function(tu, f));
                self.push_call(tu, id, name.text.clone(), function, None, None, args, vectorizable);
                Flow::Descend
            }
            _ => Flow::Descend,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn push_call(
        &mut self,
        tu: &TranslationUnit,
        id: ExprId,
        name: String,
        function: Option<FunctionId>,
        special: Option<SpecialCall>,
        method_base: Option<ExprId>,
        args: &[ExprId],
        is_vectorizable: bool,
    ) {
        let out_params: Vec<bool> = match function {
            Some(f) => (0..args.len())
                .map(|i| {
                    tu.function(f).params.get(i).is_some_and(|p| {
                        let ty = &tu.decl(*p).ty;
                        ty.is_reference() && !ty.is_const()
                    })
                })
                .collect(),
            None => vec![false; args.len()],
        };
        let call_args = args
            .iter()
            .zip(&out_params)
            .map(|(arg, out)| ArgInfo {
                expr: *arg,
                is_site_dependent: false,
                dependencies: Vec::new(),
                is_out_param: *out,
            })
            .collect();
        self.out_params.insert(id, out_params);
        self.out.calls.push(CallInfo {
            expr: id,
            span: tu.expr(id).span,
            name,
            function,
            args: call_args,
            is_method: method_base.is_some(),
            method_base,
            special,
            is_site_dependent: special.is_some(),
            is_vectorizable,
        });
    }

    fn selection(&mut self, tu: &TranslationUnit, id: ExprId, base: ExprId, args: &[ExprId]) -> Flow {
        let span = tu.expr(id).span;
        let text = tu.normalized_text(base);
        if !args.first().is_some_and(|a| is_site_cursor(tu, tu.strip_parens(*a))) {
            return self.error(span, format!("'{}.select()' must be called with X as the first argument", text));
        }
        if !self.loop_dependence(tu, base).is_loop_constant() {
            return self.error(
                span,
                format!("Selection '{}' must not depend on variables declared inside the site loop", text),
            );
        }
        let decl = match &tu.expr(base).kind {
            ExprKind::Ident(name) => name.decl,
            _ => None,
        };
        let value = args.get(1).copied();
        let selection = self
            .out
            .selections
            .entry(text.clone())
            .or_insert_with(|| SelectionDescriptor {
                text,
                decl,
                has_value: false,
                calls: Vec::new(),
            });
        selection.has_value |= value.is_some();
        selection.calls.push(SelectionCall { expr: id, value });
        self.ctx.flags |= LoopFlags::HAS_SELECTION;
        if let Some(value) = value {
            walk_expr(tu, value, Access::Read, self);
        }
        Flow::Skip
    }
}

impl Visitor for Collector<'_> {
    fn statement(&mut self, tu: &TranslationUnit, id: StmtId, _depth: usize) -> Flow {
        let span = tu.stmt(id).span;
        match &tu.stmt(id).kind {
            StmtKind::Return(_) => {
                return self.error(span, "'return' is not allowed inside a site loop".into());
            }
            StmtKind::Break | StmtKind::Continue if self.inner_loops == 0 => {
                return self.error(
                    span,
                    format!(
                        "'{}' is only allowed inside a loop nested in the site loop",
                        tu.text(span).trim_end_matches(';').trim()
                    ),
                );
            }
            StmtKind::For { .. }
            | StmtKind::While { .. }
            | StmtKind::DoWhile { .. }
            | StmtKind::Switch { .. }
            | StmtKind::Foralldir { .. } => self.inner_loops += 1,
            StmtKind::Expr(_) | StmtKind::Decl(_) => self.current_stmt = Some(id),
            _ => {}
        }
        Flow::Descend
    }

    fn leave_statement(&mut self, tu: &TranslationUnit, id: StmtId, _depth: usize) {
        if matches!(
            tu.stmt(id).kind,
            StmtKind::For { .. }
                | StmtKind::While { .. }
                | StmtKind::DoWhile { .. }
                | StmtKind::Switch { .. }
                | StmtKind::Foralldir { .. }
        ) {
            self.inner_loops -= 1;
        }
    }

    fn declaration(&mut self, tu: &TranslationUnit, id: DeclId) -> Flow {
        let d = tu.decl(id);
        if d.is_static || d.is_extern {
            return self.error(
                d.span,
                format!("Static or extern variable '{}' cannot be declared inside a site loop", d.name),
            );
        }
        if tu.resolve_alias(&d.ty).is_field() {
            return self.error(
                d.span,
                format!("Field '{}' cannot be declared inside a site loop", d.name),
            );
        }
        if d.name == builtins::SITE_CURSOR {
            self.diagnostics.warning(
                d.name_span,
                "Declaring a variable named 'X' inside a site loop hides the site cursor",
            );
        }
        self.ctx.declare_local(id);
        self.out
            .variables
            .insert(id, new_variable(tu, id, true));
        let value = match d.kind {
            DeclKind::DirectionLoop => None,
            _ => d.init,
        };
        if value.is_some() || d.kind == DeclKind::DirectionLoop {
            self.out.assignments.push(VarAssignment {
                decl: id,
                value,
                conditions: self.ctx.conditions().to_vec(),
                span: d.span,
            });
        }
        Flow::Descend
    }

    fn site_loop(&mut self, tu: &TranslationUnit, id: StmtId) -> Flow {
        self.error(tu.stmt(id).span, "Site loops cannot be nested".into())
    }

    fn enter_scope(&mut self) {
        self.ctx.push_scope();
    }

    fn leave_scope(&mut self) {
        self.ctx.pop_scope();
    }

    fn enter_branch(&mut self, _tu: &TranslationUnit, cond: ExprId) {
        self.ctx.push_condition(cond);
    }

    fn leave_branch(&mut self) {
        self.ctx.pop_condition();
    }

    fn expression(&mut self, tu: &TranslationUnit, id: ExprId, access: Access) -> Flow {
        match &tu.expr(id).kind {
            ExprKind::Index { base, index } => self.bracket(tu, id, *base, *index, access),
            ExprKind::Ident(name) => self.identifier(tu, id, name, access),
            ExprKind::Member { .. } => self.member(tu, id, access),
            ExprKind::Call { callee, args, .. } => self.call(tu, id, *callee, args),
            _ => Flow::Descend,
        }
    }

    fn call_argument_access(&mut self, _tu: &TranslationUnit, call: ExprId, index: usize) -> Access {
        let is_out = self
            .out_params
            .get(&call)
            .and_then(|params| params.get(index))
            .copied()
            .unwrap_or(false);
        if is_out {
            Access::Write {
                op: AssignOp::Assign,
                value: Some(call),
            }
        } else {
            Access::Read
        }
    }
}

fn new_variable(tu: &TranslationUnit, decl: DeclId, is_loop_local: bool) -> VariableDescriptor {
    let d = tu.decl(decl);
    let ty = match (d.ty.is_auto(), d.init) {
        (true, Some(init)) => tu.expr_type(init).unwrap_or_else(|| d.ty.clone()),
        _ => d.ty.clone(),
    };
    VariableDescriptor {
        decl,
        name: d.name.clone(),
        ty,
        is_loop_local,
        is_assigned: false,
        is_site_dependent: false,
        reduction: ReductionKind::None,
        dependencies: Vec::new(),
        refs: Vec::new(),
        vector: None,
        is_plain_read: false,
        is_constant: !is_loop_local && d.is_const() && !d.is_array(),
    }
}

fn classify_field_index(tu: &TranslationUnit, index: ExprId) -> FieldIndex {
    let idx = tu.strip_parens(index);
    if is_site_cursor(tu, idx) {
        return FieldIndex::Site;
    }
    if let ExprKind::Binary {
        op: op @ (BinaryOp::Add | BinaryOp::Sub),
        lhs,
        rhs,
    } = &tu.expr(idx).kind
    {
        if !is_site_cursor(tu, tu.strip_parens(*lhs)) {
            return FieldIndex::Invalid;
        }
        let mut negate = *op == BinaryOp::Sub;
        let mut inner = tu.strip_parens(*rhs);
        if let ExprKind::Unary {
            op: UnaryOp::Neg,
            operand,
        } = &tu.expr(inner).kind
        {
            negate = !negate;
            inner = tu.strip_parens(*operand);
        }
        let inner_text = tu.normalized_text(inner);
        let text = if negate {
            negated(&inner_text)
        } else {
            inner_text.clone()
        };
        if is_offset_expr(tu, inner) {
            return FieldIndex::Offset {
                text,
                offset: *rhs,
            };
        }
        let key = match tu.const_int(inner) {
            Some(v) if negate => DirectionKey::Const(NEGATIVE_DIRECTION_OFFSET + v),
            Some(v) => DirectionKey::Const(v),
            None => DirectionKey::Expr(text.clone()),
        };
        return FieldIndex::Neighbour {
            key,
            text,
            dir: *rhs,
        };
    }
    if tu
        .expr_type(idx)
        .is_some_and(|t| t.unqualified().as_str() == "Parity")
    {
        return FieldIndex::Parity;
    }
    FieldIndex::Invalid
}

fn negated(text: &str) -> String {
    if text.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        format!("-{}", text)
    } else {
        format!("-({})", text)
    }
}

fn is_offset_expr(tu: &TranslationUnit, id: ExprId) -> bool {
    if matches!(
        tu.expr(id).kind,
        ExprKind::Binary {
            op: BinaryOp::Add | BinaryOp::Sub,
            ..
        }
    ) {
        return true;
    }
    tu.expr_type(id)
        .is_some_and(|t| t.head().starts_with("CoordinateVector"))
}

/// Declaration of an array-like object indexed by `base`: a C array, a
/// `std::vector`/`std::array` or a `ReductionVector`.
fn array_root(tu: &TranslationUnit, base: ExprId) -> Option<DeclId> {
    match &tu.expr(base).kind {
        ExprKind::Ident(Name { decl: Some(d), .. }) => {
            let decl = tu.decl(*d);
            let ty = tu.resolve_alias(&decl.ty);
            let is_container = matches!(
                ty.short_head().as_str(),
                "vector" | "array" | "ReductionVector"
            );
            (decl.is_array() || is_container).then_some(*d)
        }
        ExprKind::Index { base: inner, .. } => {
            let inner = tu.strip_parens(*inner);
            match &tu.expr(inner).kind {
                ExprKind::Ident(Name { decl: Some(d), .. }) if tu.decl(*d).array_dims.len() >= 2 => Some(*d),
                _ => None,
            }
        }
        _ => None,
    }
}

/// Number of elements of an array declaration as a C++ expression.
pub fn array_size(tu: &TranslationUnit, d: &Decl) -> Option<String> {
    if d.is_array() {
        let dims: Option<Vec<String>> = d
            .array_dims
            .iter()
            .map(|dim| dim.map(|e| tu.expr_text(e).trim().to_string()))
            .collect();
        let dims = dims?;
        return Some(if dims.len() == 1 {
            dims[0].clone()
        } else {
            dims.iter()
                .map(|t| format!("({})", t))
                .collect::<Vec<_>>()
                .join(" * ")
        });
    }
    let ty = tu.resolve_alias(&d.ty);
    match ty.short_head().as_str() {
        "array" => ty.template_args().get(1).map(|n| n.to_string()),
        "vector" | "ReductionVector" => Some(format!("{}.size()", d.name)),
        _ => None,
    }
}

/// Leftmost operand of a member chain `a.b.c`, if the chain has no
/// indexing or calls.
fn loop_const_root(tu: &TranslationUnit, id: ExprId) -> Option<ExprId> {
    let mut current = id;
    loop {
        match &tu.expr(current).kind {
            ExprKind::Member { base, .. } | ExprKind::Paren(base) => current = *base,
            ExprKind::Ident(_) | ExprKind::This => return Some(current),
            _ => return None,
        }
    }
}

fn is_selection(tu: &TranslationUnit, base: ExprId) -> bool {
    tu.expr_type(base)
        .is_some_and(|t| matches!(t.head().as_str(), "SiteSelect" | "SiteValueSelect"))
}

fn is_loop_function(tu: &TranslationUnit, f: FunctionId) -> bool {
    pragma::has_kind(&tu.function(f).pragmas, &PragmaKind::LoopFunction)
}

/// Best match among the functions named `name` for a call with `nargs`
/// arguments, preferring concrete definitions.
pub fn function_for_call(tu: &TranslationUnit, name: &str, nargs: usize) -> Option<FunctionId> {
    let fits = |f: FunctionId| {
        let func = tu.function(f);
        let required = func
            .params
            .iter()
            .filter(|p| tu.decl(**p).default_span.is_none())
            .count();
        func.record.is_none() && required <= nargs && nargs <= func.params.len()
    };
    let mut candidates = tu.functions_named(name).iter().copied().filter(|f| fits(*f));
    let first = candidates.next()?;
    let concrete = |f: FunctionId| tu.function(f).body.is_some() && !tu.function(f).is_generic();
    if concrete(first) {
        return Some(first);
    }
    candidates.find(|f| concrete(*f)).or(Some(first))
}

pub fn method_of(tu: &TranslationUnit, base: ExprId, member: &str) -> Option<FunctionId> {
    let ty: TypeName = tu.resolve_alias(&tu.expr_type(base)?);
    let record = tu.record_named(&ty.head())?;
    tu.record(record)
        .methods
        .iter()
        .copied()
        .find(|m| tu.function(*m).name == member)
}
