//! Verification of functions called from site loops.
//!
//! A function called inside a loop runs once per site, possibly on a
//! device, so it may not touch fields, the site cursor or mutable global
//! state. Callees are verified transitively; the visited set is an explicit
//! memo owned by the caller.

use super::collector::{function_for_call, method_of};
use super::is_field_expr;
use super::refs::CallInfo;
use super::walk::{walk_stmt, Access, Flow, Visitor};
use crate::config::TranspilerConfig;
use crate::diagnostics::DiagnosticHandler;
use hilapp_syntax::ast::*;
use hilapp_syntax::builtins;
use hilapp_syntax::TranslationUnit;
use rustc_hash::FxHashSet;

/// Verifies every function reachable from `calls`. Returns the functions
/// with a body, in the order they were first reached.
pub fn verify(
    tu: &TranslationUnit,
    calls: &[CallInfo],
    config: &TranspilerConfig,
    diagnostics: &dyn DiagnosticHandler,
    memo: &mut FxHashSet<FunctionId>,
) -> Vec<FunctionId> {
    memo.clear();
    let mut order = Vec::new();
    let mut pending: Vec<FunctionId> = calls.iter().filter_map(|c| c.function).collect();
    pending.reverse();

    while let Some(f) = pending.pop() {
        if !memo.insert(f) {
            continue;
        }
        let Some(body) = tu.function(f).body else {
            continue;
        };
        order.push(f);
        let mut checker = FunctionChecker {
            function: tu.function(f),
            config,
            diagnostics,
            locals: FxHashSet::default(),
            callees: Vec::new(),
        };
        for param in &tu.function(f).params {
            checker.locals.insert(*param);
        }
        walk_stmt(tu, body, 0, &mut checker);
        let mut callees = checker.callees;
        callees.reverse();
        pending.extend(callees.into_iter().filter(|c| !memo.contains(c)));
    }

    tracing::debug!(count = order.len(), "verified loop functions");
    memo.clear();
    order
}

struct FunctionChecker<'a> {
    function: &'a Function,
    config: &'a TranspilerConfig,
    diagnostics: &'a dyn DiagnosticHandler,
    locals: FxHashSet<DeclId>,
    callees: Vec<FunctionId>,
}

impl FunctionChecker<'_> {
    fn error(&self, span: hilapp_syntax::Span, what: &str) -> Flow {
        self.diagnostics.error(
            span,
            &format!(
                "Function '{}' is called from a site loop and cannot {}",
                self.function.qualified_name(),
                what
            ),
        );
        Flow::Skip
    }

    fn global(&self, tu: &TranslationUnit, id: ExprId, decl: &Decl, access: Access) -> Flow {
        let span = tu.expr(id).span;
        if access.is_write() {
            return self.error(span, &format!("modify global variable '{}'", decl.name));
        }
        if decl.is_const() {
            return Flow::Descend;
        }
        if self.config.allow_func_globals {
            self.diagnostics.warning(
                span,
                &format!(
                    "Function '{}' reads global variable '{}' inside a site loop; the value must be identical on all nodes",
                    self.function.qualified_name(),
                    decl.name
                ),
            );
            Flow::Descend
        } else {
            self.error(span, &format!("read global variable '{}'", decl.name))
        }
    }
}

impl Visitor for FunctionChecker<'_> {
    fn declaration(&mut self, tu: &TranslationUnit, id: DeclId) -> Flow {
        let d = tu.decl(id);
        if d.is_static || d.is_extern {
            return self.error(d.span, &format!("declare static or extern variable '{}'", d.name));
        }
        if tu.resolve_alias(&d.ty).is_field() {
            return self.error(d.span, &format!("declare field '{}'", d.name));
        }
        self.locals.insert(id);
        Flow::Descend
    }

    fn site_loop(&mut self, tu: &TranslationUnit, id: StmtId) -> Flow {
        self.error(tu.stmt(id).span, "contain a site loop")
    }

    fn expression(&mut self, tu: &TranslationUnit, id: ExprId, access: Access) -> Flow {
        match &tu.expr(id).kind {
            ExprKind::Ident(name) => match name.decl {
                None if name.text == builtins::SITE_CURSOR => {
                    self.error(tu.expr(id).span, "use the site cursor X")
                }
                None => Flow::Descend,
                Some(decl) => {
                    let d = tu.decl(decl);
                    if tu.resolve_alias(&d.ty).is_field() {
                        return self.error(tu.expr(id).span, &format!("access field '{}'", d.name));
                    }
                    if d.kind == DeclKind::Global && !self.locals.contains(&decl) {
                        return self.global(tu, id, d, access);
                    }
                    Flow::Descend
                }
            },
            ExprKind::Member { .. } if is_field_expr(tu, id) => {
                self.error(tu.expr(id).span, &format!("access field '{}'", tu.expr_text(id)))
            }
            ExprKind::Call { callee, args, .. } => {
                let callee = tu.strip_parens(*callee);
                let function = match &tu.expr(callee).kind {
                    ExprKind::Ident(name) => function_for_call(tu, &name.text, args.len()),
                    ExprKind::Member { base, member, .. } => method_of(tu, *base, member),
                    _ => None,
                };
                if let Some(f) = function {
                    self.callees.push(f);
                }
                Flow::Descend
            }
            _ => Flow::Descend,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::{CollectingDiagnosticHandler, DiagnosticLevel};
    use hilapp_syntax::parse;
    use hilapp_syntax::Span;

    fn call_to(tu: &TranslationUnit, name: &str) -> CallInfo {
        CallInfo {
            expr: tu.exprs.iter().next().map(|(id, _)| id).unwrap(),
            span: Span::default(),
            name: name.to_string(),
            function: function_for_call(tu, name, 1),
            args: Vec::new(),
            is_method: false,
            method_base: None,
            special: None,
            is_site_dependent: false,
            is_vectorizable: false,
        }
    }

    #[test]
    fn test_recursion_terminates_and_memo_is_cleared() {
        let tu = parse("double g(double x);\ndouble f(double x) { return g(x); }\ndouble g(double x) { return f(x) * 2.0; }\n").unwrap();
        let handler = CollectingDiagnosticHandler::new();
        let mut memo = FxHashSet::default();
        let visited = verify(&tu, &[call_to(&tu, "f")], &TranspilerConfig::default(), &handler, &mut memo);
        assert_eq!(visited.len(), 2);
        assert!(memo.is_empty());
        assert!(!handler.has_errors());
    }

    #[test]
    fn test_global_write_is_error_and_read_is_configurable() {
        let src = "double counter;\ndouble f(double x) { return x + counter; }\nvoid h(double x) { counter = x; }\n";
        let tu = parse(src).unwrap();
        let mut memo = FxHashSet::default();

        let handler = CollectingDiagnosticHandler::new();
        verify(&tu, &[call_to(&tu, "f")], &TranspilerConfig::default(), &handler, &mut memo);
        assert_eq!(handler.error_count(), 1);

        let handler = CollectingDiagnosticHandler::new();
        let config = TranspilerConfig {
            allow_func_globals: true,
            ..TranspilerConfig::default()
        };
        verify(&tu, &[call_to(&tu, "f")], &config, &handler, &mut memo);
        assert!(!handler.has_errors());
        assert_eq!(handler.messages(DiagnosticLevel::Warning).len(), 1);

        let handler = CollectingDiagnosticHandler::new();
        verify(&tu, &[call_to(&tu, "h")], &config, &handler, &mut memo);
        assert!(handler.messages(DiagnosticLevel::Error)[0].contains("modify global variable 'counter'"));
    }

    #[test]
    fn test_field_access_in_callee() {
        let src = "Field<double> f;\ndouble get(int i) { return f[X]; }\n";
        let tu = parse(src).unwrap();
        let handler = CollectingDiagnosticHandler::new();
        let mut memo = FxHashSet::default();
        verify(&tu, &[call_to(&tu, "get")], &TranspilerConfig::default(), &handler, &mut memo);
        assert!(handler.has_errors());
    }
}
