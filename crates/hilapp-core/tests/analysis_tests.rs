//! Site-loop analysis through the public driver: field aggregation,
//! dependence, reductions, vectorization and usage errors.

use hilapp_core::analysis::context::{LoopFlags, Parity};
use hilapp_core::analysis::refs::ReductionKind;
use hilapp_core::DiagnosticHandler;
use hilapp_test_helpers::fixtures;
use hilapp_test_helpers::{analyze, analyze_first_loop};
use indoc::indoc;

#[test]
fn test_neighbour_sum_fields() {
    let (a, diagnostics) = analyze_first_loop(fixtures::NEIGHBOUR_SUM);
    assert!(!a.has_errors, "{:?}", diagnostics.get_diagnostics());
    assert_eq!(a.parity, Parity::All);
    assert_eq!(a.fields.len(), 3);

    let out = a.field("a").unwrap();
    assert!(out.is_written);
    assert!(!out.is_read_at_site);
    assert!(!out.needs_site_load());

    let b = a.field("b").unwrap();
    assert!(b.is_read_at_site);
    assert!(!b.is_written);
    assert!(b.directions.is_empty());

    let c = a.field("c").unwrap();
    assert!(c.is_read_via_neighbor);
    assert!(!c.is_read_at_site);
    assert_eq!(c.directions.len(), 1);
    assert_eq!(c.directions[0].text, "e_x");
    assert!(!c.needs_parity_assertion);

    assert!(a.verdict.vectorizable, "{}", a.verdict.reason);
    assert_eq!(a.verdict.lane_width, Some(4));
}

#[test]
fn test_loop_local_direction() {
    let (a, _) = analyze_first_loop(fixtures::LAPLACIAN);
    assert!(!a.has_errors);
    let src = a.field("src").unwrap();
    assert!(src.is_read_at_site);
    assert!(src.is_read_via_neighbor);
    assert!(src.has_loop_local_direction());

    let s = a.variables.iter().find(|v| v.name == "s").unwrap();
    assert!(s.is_loop_local);
    assert!(s.is_site_dependent);
    assert_eq!(s.reduction, ReductionKind::None);
}

#[test]
fn test_read_after_write_uses_the_written_value() {
    let source = indoc! {r#"
        void copy(Field<double>& a, const Field<double>& b, Field<double>& c) {
            onsites(ALL) {
                a[X] = b[X];
                c[X] = a[X] * 2.0;
            }
        }
    "#};
    let (a, _) = analyze_first_loop(source);
    let field = a.field("a").unwrap();
    assert!(field.is_written);
    assert!(!field.is_read_at_site);
    assert!(!field.needs_site_load());

    let (a, _) = analyze_first_loop(fixtures::HAZARD_EVEN);
    assert!(!a.field("a").unwrap().is_read_at_site);

    let update = indoc! {r#"
        void bump(Field<double>& a) {
            onsites(ALL) {
                a[X] = a[X] + 1.0;
            }
        }
    "#};
    let (a, _) = analyze_first_loop(update);
    assert!(a.field("a").unwrap().is_read_at_site);
}

#[test]
fn test_site_dependent_condition_blocks_vectorization() {
    let (a, _) = analyze_first_loop(fixtures::SITE_DEPENDENT_CONDITION);
    assert!(!a.has_errors);
    assert!(a.has_flag(LoopFlags::HAS_SITE_DEPENDENT_CONDITION));
    assert!(a.field("a").unwrap().is_conditionally_written);
    assert!(!a.verdict.vectorizable);
    assert!(a.verdict.reason.contains("site-dependent condition"));
}

#[test]
fn test_loop_constant_condition_keeps_vectorization() {
    let source = indoc! {r#"
        void clip(Field<double>& a, double limit) {
            onsites(ALL) {
                if (limit > 0.5) a[X] = limit;
            }
        }
    "#};
    let (a, _) = analyze_first_loop(source);
    assert!(!a.has_errors);
    assert!(!a.has_flag(LoopFlags::HAS_SITE_DEPENDENT_CONDITION));
    assert!(a.verdict.vectorizable, "{}", a.verdict.reason);
}

#[test]
fn test_site_dependence_propagates_through_locals() {
    let source = indoc! {r#"
        void chain(Field<double>& a, const Field<double>& b, double c) {
            onsites(ALL) {
                double k = c * 2.0;
                double u = b[X];
                double w = u + k;
                a[X] = w;
            }
        }
    "#};
    let (a, _) = analyze_first_loop(source);
    assert!(!a.has_errors);
    let var = |name: &str| a.variables.iter().find(|v| v.name == name).unwrap();
    assert!(!var("k").is_site_dependent);
    assert!(var("u").is_site_dependent);
    assert!(var("w").is_site_dependent);
    assert!(!var("c").is_loop_local);
    assert!(var("c").is_plain_read);
}

#[test]
fn test_reductions() {
    let (a, _) = analyze_first_loop(fixtures::REDUCTION);
    assert!(!a.has_errors);
    assert_eq!(a.parity, Parity::Even);
    let kind = |name: &str| {
        a.variables
            .iter()
            .find(|v| v.name == name)
            .map(|v| v.reduction)
            .unwrap()
    };
    assert_eq!(kind("sum"), ReductionKind::Sum);
    assert_eq!(kind("prod"), ReductionKind::Product);
    assert_eq!(a.reductions().count(), 2);
}

#[test]
fn test_reduction_variable_cannot_be_read() {
    let source = indoc! {r#"
        double total(const Field<double>& f) {
            double s = 0;
            onsites(ALL) {
                s += f[X] * s;
            }
            return s;
        }
    "#};
    let run = analyze(source);
    assert!(run.has_error_containing("cannot also be read inside the site loop"));
}

#[test]
fn test_mixed_reduction_operators() {
    let source = indoc! {r#"
        double total(const Field<double>& f) {
            double s = 0;
            onsites(ALL) {
                s += f[X];
                s *= 2.0;
            }
            return s;
        }
    "#};
    let run = analyze(source);
    assert!(run.has_error_containing("cannot mix += and *="));
}

#[test]
fn test_lane_width_conflict() {
    let (a, _) = analyze_first_loop(fixtures::LANE_CONFLICT);
    assert!(!a.has_errors);
    assert!(!a.verdict.vectorizable);
    assert!(
        a.verdict.reason.contains("lane width conflict"),
        "{}",
        a.verdict.reason
    );
}

#[test]
fn test_random_call_blocks_vectorization() {
    let source = indoc! {r#"
        void noise(Field<double>& a) {
            onsites(ALL) a[X] = hila::random();
        }
    "#};
    let (a, _) = analyze_first_loop(source);
    assert!(!a.has_errors);
    assert!(a.has_flag(LoopFlags::CONTAINS_RANDOM));
    assert!(!a.verdict.vectorizable);
}

#[test]
fn test_novector_pragma() {
    let source = indoc! {r#"
        void copy(Field<double>& a, const Field<double>& b) {
            #pragma hila novector
            onsites(ALL) a[X] = b[X];
        }
    "#};
    let (a, _) = analyze_first_loop(source);
    assert!(!a.verdict.vectorizable);
    assert!(a.verdict.reason.contains("novector"));
}

#[test]
fn test_hazard_with_parity_all_is_an_error() {
    let run = analyze(fixtures::HAZARD_ALL);
    assert!(run.has_error_containing("not allowed with parity ALL"));
    assert!(run.loops()[0].has_errors);
    assert!(run
        .remarks()
        .iter()
        .any(|m| m.contains("Location where 'a' is written")));
}

#[test]
fn test_hazard_with_even_parity_needs_runtime_check() {
    let run = analyze(fixtures::HAZARD_EVEN);
    assert!(run.errors().is_empty(), "{:?}", run.errors());
    let a = &run.loops()[0];
    assert!(a.field("a").unwrap().needs_parity_assertion);
}

#[test]
fn test_safe_pragma_silences_hazard() {
    let source = indoc! {r#"
        void smear(Field<double>& a) {
            #pragma hila safe(a)
            onsites(ALL) a[X] = a[X + e_x];
        }
    "#};
    let run = analyze(source);
    assert!(run.errors().is_empty(), "{:?}", run.errors());
    assert!(!run.loops()[0].field("a").unwrap().needs_parity_assertion);
}

#[test]
fn test_usage_errors() {
    let cases = [
        (fixtures::BAD_RETURN, "'return' is not allowed inside a site loop"),
        (fixtures::BAD_NEIGHBOUR_WRITE, "Cannot assign to neighbour value"),
        (fixtures::BAD_OUTER_ASSIGN, "only += and *= reductions are allowed"),
    ];
    for (source, needle) in cases {
        let run = analyze(source);
        assert!(
            run.has_error_containing(needle),
            "expected '{}' in {:?}",
            needle,
            run.errors()
        );
        assert!(run.loops()[0].has_errors);
    }
}

#[test]
fn test_break_inside_direction_loop() {
    let source = indoc! {r#"
        void partial(Field<double>& a, const Field<double>& b) {
            onsites(ALL) {
                double s = 0;
                foralldir(d) {
                    if (d == e_y) break;
                    s += b[X + d];
                }
                a[X] = s;
            }
        }
    "#};
    let run = analyze(source);
    assert!(run.errors().is_empty(), "{:?}", run.errors());
    assert!(!run.loops()[0].has_errors);

    let direct = indoc! {r#"
        void partial(Field<double>& a) {
            onsites(ALL) {
                a[X] = 1.0;
                break;
            }
        }
    "#};
    let run = analyze(direct);
    assert!(run.has_error_containing("'break' is only allowed inside a loop nested in the site loop"));
}

#[test]
fn test_unindexed_field_is_rejected() {
    let source = indoc! {r#"
        void bad(Field<double>& a, Field<double>& b) {
            onsites(ALL) a[X] = b;
        }
    "#};
    let run = analyze(source);
    assert!(run.has_error_containing("must be indexed with [X]"));
}

#[test]
fn test_loop_function_is_recorded() {
    let run = analyze(fixtures::LOOP_FUNCTION);
    assert!(run.errors().is_empty(), "{:?}", run.errors());
    let a = &run.loops()[0];
    assert_eq!(a.parity, Parity::Odd);
    assert_eq!(a.loop_functions.len(), 1);
    assert!(a.verdict.vectorizable, "{}", a.verdict.reason);
}

#[test]
fn test_plain_function_with_site_argument_is_not_vectorized() {
    let source = fixtures::LOOP_FUNCTION.replace("#pragma hila loop_function\n", "");
    let (a, _) = analyze_first_loop(&source);
    assert!(!a.has_errors);
    assert!(!a.verdict.vectorizable);
    assert!(a.verdict.reason.contains("'twice'"), "{}", a.verdict.reason);
}

#[test]
fn test_loop_function_cannot_write_globals() {
    let source = indoc! {r#"
        double counter;

        double bump(double v) {
            counter = v;
            return v;
        }

        void run(Field<double>& a) {
            onsites(ALL) a[X] = bump(a[X]);
        }
    "#};
    let run = analyze(source);
    assert!(run.has_error_containing("cannot modify global variable 'counter'"));
}

#[test]
fn test_analysis_serializes_to_json() {
    let (a, _) = analyze_first_loop(fixtures::REDUCTION);
    let json = serde_json::to_value(&a).unwrap();
    assert_eq!(json["parity"], "even");
    assert_eq!(json["fields"][0]["name"], "f");
}
