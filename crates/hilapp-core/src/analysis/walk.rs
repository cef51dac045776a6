//! One tree-walk engine shared by every pass that inspects loop bodies.
//!
//! The engine owns the traversal order and the propagation of read/write
//! access from an assignment target down to the identifier it names. Passes
//! implement [`Visitor`] and see each node once, in execution order; a hook
//! returning [`Flow::Skip`] keeps the engine from descending into that node.

use hilapp_syntax::ast::*;
use hilapp_syntax::TranslationUnit;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Descend,
    Skip,
}

/// How the value of an expression is used at the point it is visited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    /// Target of an assignment. `value` is the assigned expression; it is
    /// `None` for increments, which read the old value.
    Write { op: AssignOp, value: Option<ExprId> },
}

impl Access {
    pub fn is_write(self) -> bool {
        matches!(self, Access::Write { .. })
    }

    /// Compound assignments and increments read the target too.
    pub fn reads(self) -> bool {
        match self {
            Access::Read => true,
            Access::Write { op, value } => op.is_compound() || value.is_none(),
        }
    }
}

pub trait Visitor {
    fn statement(&mut self, _tu: &TranslationUnit, _id: StmtId, _depth: usize) -> Flow {
        Flow::Descend
    }

    fn leave_statement(&mut self, _tu: &TranslationUnit, _id: StmtId, _depth: usize) {}

    /// Called once per declarator, before its initializer is walked.
    fn declaration(&mut self, _tu: &TranslationUnit, _id: DeclId) -> Flow {
        Flow::Descend
    }

    /// A nested `onsites` statement.
    fn site_loop(&mut self, _tu: &TranslationUnit, _id: StmtId) -> Flow {
        Flow::Descend
    }

    fn enter_scope(&mut self) {}

    fn leave_scope(&mut self) {}

    /// Entering code that runs only when `cond` holds.
    fn enter_branch(&mut self, _tu: &TranslationUnit, _cond: ExprId) {}

    fn leave_branch(&mut self) {}

    fn expression(&mut self, _tu: &TranslationUnit, _id: ExprId, _access: Access) -> Flow {
        Flow::Descend
    }

    /// Access used for argument `index` of `call`.
    fn call_argument_access(&mut self, _tu: &TranslationUnit, _call: ExprId, _index: usize) -> Access {
        Access::Read
    }
}

pub fn walk_stmt<V: Visitor + ?Sized>(tu: &TranslationUnit, id: StmtId, depth: usize, v: &mut V) {
    if v.statement(tu, id, depth) == Flow::Skip {
        return;
    }
    match &tu.stmt(id).kind {
        StmtKind::Decl(decls) => {
            for decl in decls {
                walk_decl(tu, *decl, v);
            }
        }
        StmtKind::Expr(e) => walk_expr(tu, *e, Access::Read, v),
        StmtKind::Block(stmts) => {
            v.enter_scope();
            for s in stmts {
                walk_stmt(tu, *s, depth + 1, v);
            }
            v.leave_scope();
        }
        StmtKind::If {
            cond,
            then_branch,
            else_branch,
        } => {
            walk_expr(tu, *cond, Access::Read, v);
            v.enter_branch(tu, *cond);
            walk_stmt(tu, *then_branch, depth + 1, v);
            if let Some(else_branch) = else_branch {
                walk_stmt(tu, *else_branch, depth + 1, v);
            }
            v.leave_branch();
        }
        StmtKind::For {
            init,
            cond,
            step,
            body,
        } => {
            v.enter_scope();
            if let Some(init) = init {
                walk_stmt(tu, *init, depth + 1, v);
            }
            if let Some(cond) = cond {
                walk_expr(tu, *cond, Access::Read, v);
                v.enter_branch(tu, *cond);
            }
            walk_stmt(tu, *body, depth + 1, v);
            if let Some(step) = step {
                walk_expr(tu, *step, Access::Read, v);
            }
            if cond.is_some() {
                v.leave_branch();
            }
            v.leave_scope();
        }
        StmtKind::While { cond, body } | StmtKind::Switch { cond, body } => {
            walk_expr(tu, *cond, Access::Read, v);
            v.enter_branch(tu, *cond);
            walk_stmt(tu, *body, depth + 1, v);
            v.leave_branch();
        }
        StmtKind::DoWhile { body, cond } => {
            v.enter_branch(tu, *cond);
            walk_stmt(tu, *body, depth + 1, v);
            v.leave_branch();
            walk_expr(tu, *cond, Access::Read, v);
        }
        StmtKind::Case(Some(e)) | StmtKind::Return(Some(e)) => walk_expr(tu, *e, Access::Read, v),
        StmtKind::Onsites { parity, body } => {
            if v.site_loop(tu, id) == Flow::Descend {
                walk_expr(tu, *parity, Access::Read, v);
                walk_stmt(tu, *body, depth + 1, v);
            }
        }
        StmtKind::Foralldir { var, body } => {
            v.enter_scope();
            walk_decl(tu, *var, v);
            walk_stmt(tu, *body, depth + 1, v);
            v.leave_scope();
        }
        StmtKind::Case(None)
        | StmtKind::Return(None)
        | StmtKind::Break
        | StmtKind::Continue
        | StmtKind::Empty
        | StmtKind::Directive => {}
    }
    v.leave_statement(tu, id, depth);
}

fn walk_decl<V: Visitor + ?Sized>(tu: &TranslationUnit, id: DeclId, v: &mut V) {
    if v.declaration(tu, id) == Flow::Skip {
        return;
    }
    let decl = tu.decl(id);
    for dim in decl.array_dims.iter().flatten() {
        walk_expr(tu, *dim, Access::Read, v);
    }
    if let Some(init) = decl.init {
        walk_expr(tu, init, Access::Read, v);
    }
}

pub fn walk_expr<V: Visitor + ?Sized>(tu: &TranslationUnit, id: ExprId, access: Access, v: &mut V) {
    if v.expression(tu, id, access) == Flow::Skip {
        return;
    }
    match &tu.expr(id).kind {
        ExprKind::Ident(_)
        | ExprKind::IntLit(_)
        | ExprKind::FloatLit { .. }
        | ExprKind::BoolLit(_)
        | ExprKind::StrLit
        | ExprKind::CharLit
        | ExprKind::This => {}
        ExprKind::Unary { op, operand } => {
            let inner = match op {
                UnaryOp::PreInc | UnaryOp::PostInc => Access::Write {
                    op: AssignOp::Add,
                    value: None,
                },
                UnaryOp::PreDec | UnaryOp::PostDec => Access::Write {
                    op: AssignOp::Sub,
                    value: None,
                },
                _ => Access::Read,
            };
            walk_expr(tu, *operand, inner, v);
        }
        ExprKind::Binary { op, lhs, rhs } => {
            walk_expr(tu, *lhs, Access::Read, v);
            // the right operand of && and || is evaluated conditionally
            let short_circuit = matches!(op, BinaryOp::And | BinaryOp::Or);
            if short_circuit {
                v.enter_branch(tu, *lhs);
            }
            walk_expr(tu, *rhs, Access::Read, v);
            if short_circuit {
                v.leave_branch();
            }
        }
        ExprKind::Assign { op, lhs, rhs } => {
            walk_expr(tu, *rhs, Access::Read, v);
            let target = Access::Write {
                op: *op,
                value: Some(*rhs),
            };
            walk_expr(tu, *lhs, target, v);
        }
        ExprKind::Conditional {
            cond,
            then_expr,
            else_expr,
        } => {
            walk_expr(tu, *cond, Access::Read, v);
            v.enter_branch(tu, *cond);
            walk_expr(tu, *then_expr, Access::Read, v);
            walk_expr(tu, *else_expr, Access::Read, v);
            v.leave_branch();
        }
        ExprKind::Call { callee, args, .. } => {
            match &tu.expr(tu.strip_parens(*callee)).kind {
                // function names are not values
                ExprKind::Ident(_) => {}
                ExprKind::Member { base, .. } => walk_expr(tu, *base, Access::Read, v),
                _ => walk_expr(tu, *callee, Access::Read, v),
            }
            for (i, arg) in args.iter().enumerate() {
                let arg_access = v.call_argument_access(tu, id, i);
                walk_expr(tu, *arg, arg_access, v);
            }
        }
        ExprKind::Construct { args, .. } | ExprKind::InitList(args) => {
            for arg in args {
                walk_expr(tu, *arg, Access::Read, v);
            }
        }
        ExprKind::Index { base, index } => {
            walk_expr(tu, *base, access, v);
            walk_expr(tu, *index, Access::Read, v);
        }
        ExprKind::Member { base, .. } => walk_expr(tu, *base, access, v),
        ExprKind::Paren(inner) => walk_expr(tu, *inner, access, v),
    }
}

/// Collects every expression node of a subtree, for passes that only need
/// to look at node kinds.
pub fn any_expr(
    tu: &TranslationUnit,
    root: ExprId,
    mut pred: impl FnMut(&TranslationUnit, ExprId) -> bool,
) -> bool {
    struct Finder<F> {
        pred: F,
        found: bool,
    }
    impl<F: FnMut(&TranslationUnit, ExprId) -> bool> Visitor for Finder<F> {
        fn expression(&mut self, tu: &TranslationUnit, id: ExprId, _access: Access) -> Flow {
            if self.found || (self.pred)(tu, id) {
                self.found = true;
                return Flow::Skip;
            }
            Flow::Descend
        }
    }
    let mut finder = Finder {
        pred: &mut pred,
        found: false,
    };
    walk_expr(tu, root, Access::Read, &mut finder);
    finder.found
}

#[cfg(test)]
mod tests {
    use super::*;
    use hilapp_syntax::parse;

    #[derive(Default)]
    struct Recorder {
        writes: Vec<String>,
        reads: Vec<String>,
        branches: usize,
        decls: Vec<String>,
    }

    impl Visitor for Recorder {
        fn declaration(&mut self, tu: &TranslationUnit, id: DeclId) -> Flow {
            self.decls.push(tu.decl(id).name.clone());
            Flow::Descend
        }

        fn enter_branch(&mut self, _tu: &TranslationUnit, _cond: ExprId) {
            self.branches += 1;
        }

        fn expression(&mut self, tu: &TranslationUnit, id: ExprId, access: Access) -> Flow {
            if let ExprKind::Ident(name) = &tu.expr(id).kind {
                match access {
                    Access::Write { .. } => self.writes.push(name.text.clone()),
                    Access::Read => self.reads.push(name.text.clone()),
                }
            }
            Flow::Descend
        }
    }

    fn body_of_first_function(tu: &TranslationUnit) -> StmtId {
        tu.functions
            .iter()
            .find_map(|(_, f)| f.body)
            .unwrap()
    }

    #[test]
    fn test_write_access_reaches_base_identifier() {
        let tu = parse("void f(int i, double s) { double a[3]; (a[i]) = s; i++; }").unwrap();
        let mut rec = Recorder::default();
        walk_stmt(&tu, body_of_first_function(&tu), 0, &mut rec);
        assert_eq!(rec.writes, vec!["a", "i"]);
        assert_eq!(rec.reads, vec!["s", "i"]);
    }

    #[test]
    fn test_branches_and_declarations() {
        let tu = parse(
            "void f(int n) { int t = n; if (t > 0) t = 1; for (int i = 0; i < n; i++) t += i; }",
        )
        .unwrap();
        let mut rec = Recorder::default();
        walk_stmt(&tu, body_of_first_function(&tu), 0, &mut rec);
        assert_eq!(rec.decls, vec!["t", "i"]);
        assert_eq!(rec.branches, 2);
    }

    #[test]
    fn test_callee_name_not_visited() {
        let tu = parse("double g(double x); void f(double y) { double z = g(y); }").unwrap();
        let mut rec = Recorder::default();
        walk_stmt(&tu, body_of_first_function(&tu), 0, &mut rec);
        assert_eq!(rec.reads, vec!["y"]);
    }

    #[test]
    fn test_any_expr_finds_node() {
        let tu = parse("void f(int a) { int b = a + (3 * a); }").unwrap();
        let found = tu.exprs.iter().any(|(id, e)| {
            matches!(e.kind, ExprKind::Binary { op: BinaryOp::Add, .. })
                && any_expr(&tu, id, |tu, e| matches!(tu.expr(e).kind, ExprKind::IntLit(3)))
        });
        assert!(found);
    }
}
