//! Concrete copies of generic functions that contain site loops.
//!
//! Site loops are analyzed on concrete code only. A function template or a
//! method of a class template that contains a site loop is copied once for
//! every distinct set of concrete template arguments it is used with, as an
//! explicit specialization. The unit is re-parsed after each round, since a
//! new specialization may itself instantiate further templates.

use crate::analysis::find_site_loops;
use crate::diagnostics::DiagnosticHandler;
use crate::errors::TranspileError;
use crate::rewrite::EditList;
use hilapp_syntax::ast::*;
use hilapp_syntax::types::substitute_tokens;
use hilapp_syntax::unit::normalize;
use hilapp_syntax::{parse, Span, TranslationUnit, TypeName};
use rustc_hash::{FxHashMap, FxHashSet};

const MAX_ROUNDS: usize = 16;

/// One use of a template with concrete arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct Instantiation {
    pub function: FunctionId,
    pub args: Vec<TypeName>,
    /// Start of the first use, used to check the insertion point.
    pub first_use: usize,
}

/// Expands specializations until no new instantiation appears. Returns the
/// rewritten source and the names of the specializations added.
pub fn expand(
    source: &str,
    diagnostics: &dyn DiagnosticHandler,
) -> Result<(String, Vec<String>), TranspileError> {
    let mut text = source.to_string();
    let mut seen: FxHashSet<String> = FxHashSet::default();
    let mut added = Vec::new();
    for round in 0..MAX_ROUNDS {
        let tu = parse(&text)?;
        let mut edits = EditList::new();
        let names = specialize_unit(&tu, &mut seen, &mut edits, diagnostics);
        if names.is_empty() {
            report_undeduced(&tu, diagnostics);
            return Ok((text, added));
        }
        tracing::debug!(round, count = names.len(), "added specializations");
        text = edits.apply(&tu.source)?;
        added.extend(names);
    }
    diagnostics.warning(
        Span::point(0),
        &format!("Specialization stopped after {} rounds; new instantiations keep appearing", MAX_ROUNDS),
    );
    Ok((text, added))
}

/// One round over a parsed unit. Adds an insertion to `edits` for every new
/// instantiation and returns their names.
pub fn specialize_unit(
    tu: &TranslationUnit,
    seen: &mut FxHashSet<String>,
    edits: &mut EditList,
    diagnostics: &dyn DiagnosticHandler,
) -> Vec<String> {
    // specializations already present in the source
    for (_, f) in tu.functions.iter() {
        if f.is_explicit_specialization() {
            seen.insert(specialized_name(tu, f, &f.explicit_args, false));
        }
    }

    let mut names = Vec::new();
    for inst in instantiations(tu) {
        let f = tu.function(inst.function);
        let of_class = f.record.is_some_and(|r| tu.record(r).is_generic());
        let name = specialized_name(tu, f, &inst.args, of_class);
        if !seen.insert(name.clone()) {
            continue;
        }
        match specialization_text(tu, &inst, &name) {
            Ok(text) => {
                let pos = insertion_point(tu, &inst, diagnostics, &name);
                edits.insert(pos, format!("\n// hilapp specialization of {}\n{}\n", f.qualified_name(), text));
                names.push(name);
            }
            Err(e) => diagnostics.warning(f.name_span, &format!("Cannot specialize '{}': {}", name, e)),
        }
    }
    names
}

/// Whether the body of `f` may be analyzed directly.
pub fn is_concrete(tu: &TranslationUnit, f: &Function) -> bool {
    if f.is_generic() {
        return false;
    }
    match f.record {
        Some(r) => !tu.record(r).is_generic() || f.is_explicit_specialization(),
        None => true,
    }
}

fn has_site_loop(tu: &TranslationUnit, f: &Function) -> bool {
    f.body.is_some_and(|body| !find_site_loops(tu, body).is_empty())
}

/// Template parameters of the template `f` belongs to: its own, or its
/// class's.
fn template_params<'a>(tu: &'a TranslationUnit, f: &'a Function) -> Option<&'a [TemplateParam]> {
    if f.is_generic() {
        return f.template_params.as_deref();
    }
    let record = tu.record(f.record?);
    if record.is_generic() {
        record.template_params.as_deref()
    } else {
        None
    }
}

/// A call of a generic function that contains a site loop. `args` is `None`
/// when the template arguments were neither given nor deducible.
struct TemplateCall {
    span: Span,
    function: FunctionId,
    args: Option<Vec<TypeName>>,
}

/// Calls of generic functions with site loops from concrete code, in source
/// order. Explicit `f<T>(...)` calls match on arity; calls without
/// arguments are deduced from the argument types.
fn template_calls(tu: &TranslationUnit) -> Vec<TemplateCall> {
    let mut out = Vec::new();
    let mut calls: Vec<(&Expr, &str, &Vec<TypeName>, &Vec<ExprId>)> = Vec::new();
    for (_, expr) in tu.exprs.iter() {
        let ExprKind::Call {
            callee,
            template_args,
            args,
        } = &expr.kind
        else {
            continue;
        };
        let in_generic_code = tu
            .enclosing_function(expr.span.start)
            .is_some_and(|f| !is_concrete(tu, tu.function(f)));
        if in_generic_code {
            continue;
        }
        let name = match &tu.expr(*callee).kind {
            ExprKind::Ident(n) => n.text.as_str(),
            ExprKind::Member { member, .. } => member.as_str(),
            _ => continue,
        };
        calls.push((expr, name, template_args, args));
    }
    calls.sort_by_key(|(expr, ..)| expr.span.start);

    for (expr, name, template_args, args) in calls {
        let short = name.rsplit("::").next().unwrap_or(name);
        let candidates = tu.functions_named(short);
        if template_args.is_empty() {
            // an ordinary overload takes the call
            let ordinary = |fid: &FunctionId| {
                let f = tu.function(*fid);
                is_concrete(tu, f) && !f.is_explicit_specialization()
            };
            if candidates.iter().any(ordinary) {
                continue;
            }
            for &fid in candidates {
                let f = tu.function(fid);
                let own_template = f.record.map_or(true, |r| !tu.record(r).is_generic());
                if f.is_generic() && own_template && has_site_loop(tu, f) {
                    out.push(TemplateCall {
                        span: expr.span,
                        function: fid,
                        args: deduce_args(tu, f, args),
                    });
                }
            }
        } else {
            for &fid in candidates {
                let f = tu.function(fid);
                let arity = f.template_params.as_ref().map_or(0, Vec::len);
                if f.is_generic() && arity == template_args.len() && has_site_loop(tu, f) {
                    out.push(TemplateCall {
                        span: expr.span,
                        function: fid,
                        args: Some(template_args.clone()),
                    });
                }
            }
        }
    }
    out
}

/// Template arguments of `f` deduced from the call arguments by matching
/// each parameter type against the argument type. `None` if a parameter
/// stays unbound or two arguments disagree.
fn deduce_args(tu: &TranslationUnit, f: &Function, args: &[ExprId]) -> Option<Vec<TypeName>> {
    let params = f.template_params.as_deref()?;
    if args.len() > f.params.len() {
        return None;
    }
    let names: FxHashSet<&str> = params.iter().map(|p| p.name.as_str()).collect();
    let mut bound: FxHashMap<String, TypeName> = FxHashMap::default();
    for (param, arg) in f.params.iter().zip(args) {
        let pattern = tu.decl(*param).ty.unqualified();
        if !identifiers(pattern.as_str()).any(|w| names.contains(w)) {
            continue;
        }
        let actual = tu.resolve_alias(&tu.expr_type(*arg)?);
        if !match_type(&pattern, &actual, &names, &mut bound) {
            return None;
        }
    }
    params.iter().map(|p| bound.get(&p.name).cloned()).collect()
}

fn match_type(
    pattern: &TypeName,
    actual: &TypeName,
    names: &FxHashSet<&str>,
    bound: &mut FxHashMap<String, TypeName>,
) -> bool {
    let pattern = pattern.unqualified();
    let actual = actual.unqualified();
    if names.contains(pattern.as_str()) {
        return match bound.get(pattern.as_str()) {
            Some(previous) => normalize(previous.as_str()) == normalize(actual.as_str()),
            None => {
                bound.insert(pattern.as_str().to_string(), actual);
                true
            }
        };
    }
    let pattern_args = pattern.template_args();
    if pattern_args.is_empty() {
        return true;
    }
    let actual_args = actual.template_args();
    pattern.short_head() == actual.short_head()
        && pattern_args.len() == actual_args.len()
        && pattern_args
            .iter()
            .zip(&actual_args)
            .all(|(p, a)| match_type(p, a, names, bound))
}

/// Reports calls whose template arguments could not be deduced. Their site
/// loops would otherwise stay untransformed.
pub fn report_undeduced(tu: &TranslationUnit, diagnostics: &dyn DiagnosticHandler) {
    for call in template_calls(tu) {
        if call.args.is_none() {
            let name = tu.function(call.function).name.as_str();
            diagnostics.error(
                call.span,
                &format!(
                    "Cannot deduce the template arguments of '{}', which contains a site loop; give them explicitly as {}<...>(...)",
                    name, name
                ),
            );
        }
    }
}

/// Uses with concrete arguments, in source order: calls of generic
/// functions and variables of type `C<T>`.
fn instantiations(tu: &TranslationUnit) -> Vec<Instantiation> {
    fn push(out: &mut Vec<Instantiation>, function: FunctionId, args: Vec<TypeName>, pos: usize) {
        match out.iter_mut().find(|i| i.function == function && i.args == args) {
            Some(existing) => existing.first_use = existing.first_use.min(pos),
            None => out.push(Instantiation {
                function,
                args,
                first_use: pos,
            }),
        }
    }

    let mut out: Vec<Instantiation> = Vec::new();

    let in_generic_code = |pos: usize| {
        tu.enclosing_function(pos)
            .is_some_and(|f| !is_concrete(tu, tu.function(f)))
    };

    for call in template_calls(tu) {
        if let Some(args) = call.args {
            push(&mut out, call.function, args, call.span.start);
        }
    }

    let mut decls: Vec<&Decl> = tu
        .decls
        .iter()
        .map(|(_, d)| d)
        .filter(|d| !in_generic_code(d.span.start))
        .collect();
    decls.sort_by_key(|d| d.span.start);
    for d in decls {
        if let DeclKind::Member(r) = d.kind {
            if tu.record(r).is_generic() {
                continue;
            }
        }
        let ty = tu.resolve_alias(&d.ty);
        let args = ty.template_args();
        if args.is_empty() {
            continue;
        }
        let Some(rid) = tu.record_named(&ty.head()) else {
            continue;
        };
        let record = tu.record(rid);
        if !record.is_generic() || record.template_params.as_ref().map_or(0, Vec::len) != args.len() {
            continue;
        }
        for (fid, f) in tu.functions.iter() {
            if f.record == Some(rid) && !f.is_generic() && !f.is_explicit_specialization() && has_site_loop(tu, f) {
                push(&mut out, fid, args.clone(), d.span.start);
            }
        }
        // out-of-line definitions `template <class T> R C<T>::m() {}`
        for (fid, f) in tu.functions.iter() {
            let out_of_line = f.record == Some(rid)
                && f.qualifier.is_some()
                && f.is_generic()
                && f.template_params.as_ref().map_or(0, Vec::len) == args.len();
            if out_of_line && has_site_loop(tu, f) {
                push(&mut out, fid, args.clone(), d.span.start);
            }
        }
    }
    out
}

/// `apply<Matrix3x3>`, `Ops::apply<double>` or `Wrapper<double>::fill`,
/// normalized so that names from source and generated text compare equal.
/// With `of_class` the arguments belong to the function's class.
fn specialized_name(tu: &TranslationUnit, f: &Function, args: &[TypeName], of_class: bool) -> String {
    let args: Vec<&str> = args.iter().map(TypeName::as_str).collect();
    let args = args.join(", ");
    let class = f.record.map(|r| tu.record(r).name.as_str());
    let name = match (of_class, &f.qualifier, class) {
        (true, _, Some(class)) => format!("{}<{}>::{}", class, args, f.name),
        (_, Some(q), _) => format!("{}::{}", q, f.name),
        (_, None, Some(class)) => format!("{}::{}", class, f.name),
        (_, None, None) => f.name.clone(),
    };
    if of_class || args.is_empty() {
        normalize(&name)
    } else {
        normalize(&format!("{}<{}>", name, args))
    }
}

fn specialization_text(tu: &TranslationUnit, inst: &Instantiation, name: &str) -> Result<String, TranspileError> {
    let f = tu.function(inst.function);
    let body = f
        .body
        .ok_or_else(|| TranspileError::fatal(format!("'{}' has no body", f.name), f.name_span))?;
    let params = template_params(tu, f)
        .ok_or_else(|| TranspileError::fatal(format!("'{}' is not a template", f.name), f.name_span))?;
    let map: FxHashMap<String, String> = params
        .iter()
        .zip(&inst.args)
        .map(|(p, a)| (p.name.clone(), a.to_string()))
        .collect();

    let mut edits = EditList::new();
    for spec in &f.specifier_spans {
        edits.remove(*spec);
    }
    for param in &f.params {
        if let Some(default) = tu.decl(*param).default_span {
            edits.remove(default);
        }
    }
    edits.replace(f.name_span, name);

    let end = tu.stmt(body).span.end;
    let text = edits.apply_range(&tu.source, Span::new(f.signature_start, end))?;
    Ok(format!("template <>\ninline {}", substitute_tokens(text.trim_start(), &map)))
}

/// Start of the line after everything the specialization depends on: the
/// template itself, its class and the declarations of the argument types.
fn insertion_point(
    tu: &TranslationUnit,
    inst: &Instantiation,
    diagnostics: &dyn DiagnosticHandler,
    name: &str,
) -> usize {
    let f = tu.function(inst.function);
    let mut end = tu.top_level_item_at(f.span.start).map_or(f.span.end, |item| item.span.end);
    if let Some(r) = f.record {
        end = end.max(tu.record(r).span.end);
    }
    for arg in &inst.args {
        for word in identifiers(arg.as_str()) {
            if let Some(span) = tu.type_decl_span(word) {
                end = end.max(span.end);
            }
        }
    }
    let pos = if end == 0 {
        0
    } else {
        tu.source_map.next_line_start(end - 1)
    };

    let use_item = tu
        .top_level_item_at(inst.first_use)
        .map_or(inst.first_use, |item| item.span.start);
    if pos > use_item {
        diagnostics.warning(
            Span::point(inst.first_use),
            &format!(
                "Specialization '{}' is placed after its first use because the types it needs are declared later",
                name
            ),
        );
    }
    pos
}

fn identifiers(text: &str) -> impl Iterator<Item = &str> {
    text.split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .filter(|w| w.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_'))
}

/// Template arguments of the class a concrete method belongs to, as a
/// substitution map from parameter names, for `Wrapper<double>::fill`.
pub fn enclosing_type_args(tu: &TranslationUnit, f: &Function) -> FxHashMap<String, String> {
    let mut map = FxHashMap::default();
    let (Some(r), Some(qualifier)) = (f.record, &f.qualifier) else {
        return map;
    };
    let record = tu.record(r);
    if let Some(params) = &record.template_params {
        for (p, a) in params.iter().zip(qualifier.template_args()) {
            map.insert(p.name.clone(), a.to_string());
        }
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::CollectingDiagnosticHandler;

    #[test]
    fn test_concrete_functions() {
        let src = "template <typename T>\nvoid apply(Field<T> &f) {\n    onsites(ALL) f[X] = f[X] * 2;\n}\nvoid run() {\n}\n";
        let tu = parse(src).unwrap();
        let apply = tu.function(tu.functions_named("apply")[0]);
        let run = tu.function(tu.functions_named("run")[0]);
        assert!(!is_concrete(&tu, apply));
        assert!(is_concrete(&tu, run));
    }

    #[test]
    fn test_identifiers_of_type() {
        let words: Vec<&str> = identifiers("Matrix<3, 3, Complex<double>>").collect();
        assert_eq!(words, vec!["Matrix", "Complex", "double"]);
    }

    #[test]
    fn test_unused_template_is_not_specialized() {
        let src = "template <typename T>\nvoid apply(Field<T> &f) {\n    onsites(ALL) f[X] = f[X] * 2;\n}\n";
        let handler = CollectingDiagnosticHandler::new();
        let (out, added) = expand(src, &handler).unwrap();
        assert_eq!(out, src);
        assert!(added.is_empty());
    }
}
