//! Generic functions with site loops are copied into explicit
//! specializations before analysis.

use hilapp_core::diagnostics::{CollectingDiagnosticHandler, DiagnosticHandler};
use hilapp_core::specialize::expand;
use hilapp_test_helpers::fixtures;
use hilapp_test_helpers::{analyze, transpile};
use indoc::indoc;

#[test]
fn test_function_template_with_user_type() {
    let handler = CollectingDiagnosticHandler::new();
    let (code, added) = expand(fixtures::MATRIX_APPLY, &handler).unwrap();
    assert_eq!(added, vec!["apply<Matrix3x3>".to_string()]);
    assert_eq!(code.matches("template <>").count(), 1);
    assert!(code.contains("// hilapp specialization of apply\ntemplate <>\ninline void apply<Matrix3x3>(Field<Matrix3x3>& f, Matrix3x3 value) {"));

    let record = code.find("struct Matrix3x3").unwrap();
    let specialization = code.find("template <>").unwrap();
    let caller = code.find("void caller").unwrap();
    assert!(record < specialization && specialization < caller);
    assert!(handler.get_diagnostics().is_empty());
}

#[test]
fn test_only_the_specialization_is_analyzed() {
    let run = analyze(fixtures::MATRIX_APPLY);
    assert!(run.errors().is_empty(), "{:?}", run.errors());
    let loops = run.loops();
    assert_eq!(loops.len(), 1);
    let field = loops[0].field("f").unwrap();
    assert_eq!(field.element_type.as_str(), "Matrix3x3");
    assert!(field.is_written);
}

#[test]
fn test_transpiled_specialization() {
    let run = transpile(fixtures::MATRIX_APPLY);
    let out = run.result.as_ref().unwrap();
    assert_eq!(out.specializations, vec!["apply<Matrix3x3>".to_string()]);
    let code = &out.code;
    assert!(code.contains("//-- onsites(ALL) f[X] = value;"));
    assert!(code.contains("f.set_value_at(_HILA_field_f, _HILA_index);"));
    // the template itself keeps its loop
    assert!(code.contains("void apply(Field<T>& f, T value) {\n    onsites(ALL) f[X] = value;\n}"));
}

#[test]
fn test_repeated_use_is_specialized_once() {
    let source = indoc! {r#"
        template <typename T>
        void scale(Field<T>& f, T s) {
            onsites(ALL) f[X] *= s;
        }

        void first(Field<double>& a) {
            scale<double>(a, 2.0);
        }

        void second(Field<double>& b) {
            scale<double>(b, 0.5);
            scale<float>(b, 0.5);
        }
    "#};
    let handler = CollectingDiagnosticHandler::new();
    let (code, added) = expand(source, &handler).unwrap();
    assert_eq!(added, vec!["scale<double>".to_string(), "scale<float>".to_string()]);
    assert_eq!(code.matches("template <>").count(), 2);
}

#[test]
fn test_existing_specialization_is_kept() {
    let source = indoc! {r#"
        template <typename T>
        void scale(Field<T>& f, T s) {
            onsites(ALL) f[X] *= s;
        }

        template <>
        void scale<double>(Field<double>& f, double s) {
            onsites(ALL) f[X] *= s;
        }

        void run(Field<double>& a) {
            scale<double>(a, 2.0);
        }
    "#};
    let handler = CollectingDiagnosticHandler::new();
    let (code, added) = expand(source, &handler).unwrap();
    assert!(added.is_empty());
    assert_eq!(code, source);
}

#[test]
fn test_method_of_class_template() {
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

        void run(Field<double>& f) {
            Wrapper<double> w;
            w.apply(f);
        }
    "#};
    let handler = CollectingDiagnosticHandler::new();
    let (code, added) = expand(source, &handler).unwrap();
    assert_eq!(added, vec!["Wrapper<double>::apply".to_string()]);
    assert!(code.contains("template <>\ninline void Wrapper<double>::apply(Field<double>& f) {"));

    let run = analyze(source);
    assert!(run.errors().is_empty(), "{:?}", run.errors());
    let loops = run.loops();
    assert_eq!(loops.len(), 1);
    assert_eq!(loops[0].field("f").unwrap().element_type.as_str(), "double");
    assert!(loops[0].verdict.vectorizable, "{}", loops[0].verdict.reason);
}

#[test]
fn test_template_without_uses_generates_nothing() {
    let source = indoc! {r#"
        template <typename T>
        void unused(Field<T>& f) {
            onsites(ALL) f[X] = 0;
        }
    "#};
    let run = transpile(source);
    let out = run.result.as_ref().unwrap();
    assert!(out.loops.is_empty());
    assert!(out.specializations.is_empty());
    assert!(out.code.ends_with(source));
}

#[test]
fn test_deduced_call_is_specialized() {
    let source = indoc! {r#"
        template <typename T>
        void apply(Field<T>& f, T value) {
            onsites(ALL) f[X] = value;
        }

        struct Matrix3x3 {
            double e[3][3];
        };

        void run() {
            Field<Matrix3x3> m;
            Matrix3x3 v;
            apply(m, v);
        }
    "#};
    let handler = CollectingDiagnosticHandler::new();
    let (code, added) = expand(source, &handler).unwrap();
    assert_eq!(added, vec!["apply<Matrix3x3>".to_string()]);
    assert!(code.contains("template <>\ninline void apply<Matrix3x3>(Field<Matrix3x3>& f, Matrix3x3 value) {"));
    assert!(handler.get_diagnostics().is_empty());

    let run = transpile(source);
    assert!(run.errors().is_empty(), "{:?}", run.errors());
    assert_eq!(run.loops().len(), 1);
    assert_eq!(run.loops()[0].field("f").unwrap().element_type.as_str(), "Matrix3x3");
    assert!(run.code().contains("f.set_value_at(_HILA_field_f, _HILA_index);"));
}

#[test]
fn test_deduction_from_literal_argument() {
    let source = indoc! {r#"
        template <typename T>
        void fill(Field<T>& f, T value) {
            onsites(ALL) f[X] = value;
        }

        void run(Field<double>& a) {
            fill(a, 0.5);
        }
    "#};
    let handler = CollectingDiagnosticHandler::new();
    let (_, added) = expand(source, &handler).unwrap();
    assert_eq!(added, vec!["fill<double>".to_string()]);
}

#[test]
fn test_conflicting_deduction_is_an_error() {
    let source = indoc! {r#"
        template <typename T>
        void fill(Field<T>& f, T value) {
            onsites(ALL) f[X] = value;
        }

        void run(Field<float>& a) {
            fill(a, 0.5);
        }
    "#};
    let run = analyze(source);
    let out = run.result.as_ref().unwrap();
    assert!(out.specializations.is_empty());
    assert!(
        run.has_error_containing("Cannot deduce the template arguments of 'fill'"),
        "{:?}",
        run.errors()
    );
}
