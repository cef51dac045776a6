use hilapp_syntax::ast::*;
use hilapp_syntax::pragma::PragmaKind;
use hilapp_syntax::{parse, TranslationUnit};
use indoc::indoc;

fn function<'a>(tu: &'a TranslationUnit, name: &str) -> &'a Function {
    let id = tu.functions_named(name)[0];
    tu.function(id)
}

fn body_stmts(tu: &TranslationUnit, f: &Function) -> Vec<StmtId> {
    match &tu.stmt(f.body.unwrap()).kind {
        StmtKind::Block(stmts) => stmts.clone(),
        other => panic!("expected block, got {:?}", other),
    }
}

fn find_onsites(tu: &TranslationUnit, f: &Function) -> (ExprId, StmtId) {
    body_stmts(tu, f)
        .into_iter()
        .find_map(|s| match tu.stmt(s).kind {
            StmtKind::Onsites { parity, body } => Some((parity, body)),
            _ => None,
        })
        .expect("no site loop")
}

#[test]
fn test_parse_simple_site_loop() {
    let source = indoc! {r#"
        #include "hila.h"

        void update(Field<double>& f, const Field<double>& g, double a) {
            onsites(ALL) {
                f[X] = a * g[X + e_x];
            }
        }
    "#};
    let tu = parse(source).unwrap();
    let f = function(&tu, "update");
    assert_eq!(f.params.len(), 3);
    assert_eq!(tu.decl(f.params[0]).ty.as_str(), "Field<double>&");
    assert_eq!(tu.decl(f.params[1]).ty.as_str(), "const Field<double>&");

    let (parity, body) = find_onsites(&tu, f);
    assert_eq!(tu.expr_text(parity), "ALL");
    assert!(matches!(tu.stmt(body).kind, StmtKind::Block(_)));
}

#[test]
fn test_identifiers_resolve_to_declarations() {
    let source = indoc! {r#"
        double scale;
        void run(Field<double>& f) {
            double local = 2.0;
            onsites(EVEN) f[X] = local * scale;
        }
    "#};
    let tu = parse(source).unwrap();
    let mut resolved = Vec::new();
    for (_, expr) in tu.exprs.iter() {
        if let ExprKind::Ident(name) = &expr.kind {
            resolved.push((name.text.clone(), name.decl.map(|d| tu.decl(d).kind)));
        }
    }
    assert!(resolved.contains(&("local".into(), Some(DeclKind::Local))));
    assert!(resolved.contains(&("scale".into(), Some(DeclKind::Global))));
    assert!(resolved.contains(&("f".into(), Some(DeclKind::Param))));
    assert!(resolved.contains(&("X".into(), None)));
}

#[test]
fn test_nested_template_types() {
    let source = "Field<Complex<double>> g; std::vector<Matrix<3,3,double>> v;";
    let tu = parse(source).unwrap();
    let tys: Vec<String> = tu.decls.iter().map(|(_, d)| d.ty.to_string()).collect();
    assert_eq!(tys, vec!["Field<Complex<double>>", "std::vector<Matrix<3,3,double>>"]);
}

#[test]
fn test_shift_operator_from_adjacent_gt() {
    let tu = parse("int a = 16 >> 2; int b = 3 > 1;").unwrap();
    let values: Vec<Option<i64>> = tu
        .decls
        .iter()
        .map(|(_, d)| d.init.and_then(|e| tu.const_int(e)))
        .collect();
    assert_eq!(values, vec![Some(4), Some(1)]);
}

#[test]
fn test_pragmas_attach_to_next_statement() {
    let source = indoc! {r#"
        void run(Field<double>& f) {
            #pragma hila novector
            #pragma hila safe(f)
            onsites(ALL) f[X] = f[X + e_y];
        }
    "#};
    let tu = parse(source).unwrap();
    let f = function(&tu, "run");
    let loop_stmt = body_stmts(&tu, f)
        .into_iter()
        .find(|s| matches!(tu.stmt(*s).kind, StmtKind::Onsites { .. }))
        .unwrap();
    let kinds: Vec<_> = tu.stmt(loop_stmt).pragmas.iter().map(|p| p.kind.clone()).collect();
    assert_eq!(
        kinds,
        vec![PragmaKind::NoVector, PragmaKind::Safe(vec!["f".into()])]
    );
}

#[test]
fn test_loop_function_pragma_on_function() {
    let source = indoc! {r#"
        #pragma hila loop_function
        double twice(double x) { return 2 * x; }
    "#};
    let tu = parse(source).unwrap();
    let f = function(&tu, "twice");
    assert_eq!(f.pragmas.len(), 1);
    assert_eq!(f.pragmas[0].kind, PragmaKind::LoopFunction);
}

#[test]
fn test_template_function_and_record() {
    let source = indoc! {r#"
        struct Matrix3x3 { double e[3][3]; };

        template <typename T>
        void fill(Field<T>& f, T value) {
            onsites(ALL) f[X] = value;
        }

        void caller(Field<Matrix3x3>& m, Matrix3x3 v) {
            fill<Matrix3x3>(m, v);
            fill(m, v);
        }
    "#};
    let tu = parse(source).unwrap();
    let fill = function(&tu, "fill");
    assert!(fill.is_generic());
    assert_eq!(tu.decl(fill.params[1]).ty.as_str(), "T");

    let record = tu.record_named("Matrix3x3").unwrap();
    let member = tu.decl(tu.record(record).members[0]);
    assert_eq!(member.name, "e");
    assert_eq!(member.array_dims.len(), 2);

    let explicit_calls = tu
        .exprs
        .iter()
        .filter(|(_, e)| matches!(&e.kind, ExprKind::Call { template_args, .. } if !template_args.is_empty()))
        .count();
    assert_eq!(explicit_calls, 1);
}

#[test]
fn test_out_of_line_method_sees_members() {
    let source = indoc! {r#"
        template <typename T>
        struct Wrapper {
            T factor;
            void apply(Field<T>& f);
        };

        template <typename T>
        void Wrapper<T>::apply(Field<T>& f) {
            onsites(ALL) f[X] *= factor;
        }
    "#};
    let tu = parse(source).unwrap();
    let defs: Vec<_> = tu
        .functions_named("apply")
        .iter()
        .map(|id| tu.function(*id))
        .filter(|f| f.body.is_some())
        .collect();
    assert_eq!(defs.len(), 1);
    assert_eq!(defs[0].qualified_name(), "Wrapper<T>::apply");
    assert!(defs[0].record.is_some());

    let factor_resolved = tu.exprs.iter().any(|(_, e)| {
        matches!(&e.kind, ExprKind::Ident(n) if n.text == "factor" && n.decl.is_some())
    });
    assert!(factor_resolved);
}

#[test]
fn test_foralldir_declares_direction() {
    let source = indoc! {r#"
        void lap(Field<double>& f, const Field<double>& g) {
            onsites(ALL) {
                f[X] = 0;
                foralldir(d) f[X] += g[X + d] + g[X - d];
            }
        }
    "#};
    let tu = parse(source).unwrap();
    let d = tu
        .decls
        .iter()
        .find(|(_, d)| d.kind == DeclKind::DirectionLoop)
        .map(|(_, d)| d)
        .unwrap();
    assert_eq!(d.name, "d");
    assert_eq!(d.ty.as_str(), "Direction");
}

#[test]
fn test_casts_and_constructors() {
    let source = indoc! {r#"
        void run(Field<Complex<double>>& c, int n) {
            onsites(ALL) c[X] = Complex<double>(1.0, (double)n);
        }
    "#};
    let tu = parse(source).unwrap();
    let constructs: Vec<String> = tu
        .exprs
        .iter()
        .filter_map(|(_, e)| match &e.kind {
            ExprKind::Construct { ty, .. } => Some(ty.to_string()),
            _ => None,
        })
        .collect();
    assert!(constructs.contains(&"Complex<double>".to_string()));
    assert!(constructs.contains(&"double".to_string()));
}

#[test]
fn test_control_flow_statements() {
    let source = indoc! {r#"
        int count(int n) {
            int s = 0;
            for (int i = 0; i < n; i++) {
                if (i % 2 == 0) continue;
                else s += i;
            }
            while (s > 100) s -= 10;
            do { s++; } while (s < 0);
            switch (s) {
                case 1: return 1;
                default: break;
            }
            return s;
        }
    "#};
    let tu = parse(source).unwrap();
    let f = function(&tu, "count");
    assert_eq!(body_stmts(&tu, f).len(), 6);
}

#[test]
fn test_syntax_error_has_span() {
    let err = parse("void f() { int x = ; }").unwrap_err();
    let span = err.span().unwrap();
    assert_eq!(&"void f() { int x = ; }"[span.start..span.end], ";");
}

#[test]
fn test_enum_values() {
    let tu = parse("enum Mode { A, B = 5, C }; int x = C;").unwrap();
    let x = tu
        .decls
        .iter()
        .find(|(_, d)| d.name == "x")
        .and_then(|(_, d)| d.init)
        .unwrap();
    assert_eq!(tu.const_int(x), Some(6));
}
