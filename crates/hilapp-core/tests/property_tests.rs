use hilapp_core::analysis::refs::ReductionKind;
use hilapp_core::analysis::vectorize::{lanes, register_type};
use hilapp_core::codegen::sanitize_identifier;
use hilapp_core::rewrite::EditList;
use hilapp_core::{Target, TranspilerConfig};
use hilapp_test_helpers::fixtures;
use hilapp_test_helpers::{transpile, transpile_for, transpile_with};
use proptest::prelude::*;

fn parity() -> impl Strategy<Value = &'static str> {
    prop::sample::select(vec!["EVEN", "ODD", "ALL"])
}

fn direction() -> impl Strategy<Value = &'static str> {
    prop::sample::select(vec!["e_x", "e_y", "e_z", "e_t"])
}

fn target() -> impl Strategy<Value = Target> {
    prop::sample::select(vec![Target::Cpu, Target::Vector, Target::Cuda, Target::Hip])
}

/// Initial value of the accumulator declared as `needle(value)`.
fn seed_after(code: &str, needle: &str) -> f64 {
    let start = code.find(needle).unwrap_or_else(|| panic!("missing `{}`", needle)) + needle.len();
    let end = start + code[start..].find(')').unwrap();
    code[start..end].parse().unwrap()
}

fn combine(kind: ReductionKind, acc: f64, value: f64) -> f64 {
    match kind {
        ReductionKind::Product => acc * value,
        _ => acc + value,
    }
}

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-9 * a.abs().max(b.abs()).max(1.0)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// Sites are dealt to lanes in order; lanes past the last site keep the
    /// seed. Collapsing the lanes must give the scalar fold.
    #[test]
    fn prop_lane_partials_collapse_to_scalar_fold(
        bits in prop::sample::select(vec![128u32, 256, 512]),
        values in prop::collection::vec(0.5f64..2.0, 0..70),
    ) {
        let width = lanes("double", bits);
        let config = TranspilerConfig {
            target: Target::Vector,
            vector_bits: bits,
            ..TranspilerConfig::default()
        };
        let vector = transpile_with(fixtures::REDUCTION, config).code().to_string();
        let scalar = transpile(fixtures::REDUCTION).code().to_string();
        let register = register_type("double", width);

        for (name, kind) in [("sum", ReductionKind::Sum), ("prod", ReductionKind::Product)] {
            let seed = seed_after(&vector, &format!("{} _HILA_reduction_{}(", register, name));
            prop_assert_eq!(seed, kind.identity().parse::<f64>().unwrap());
            let collapse = format!("{}(_HILA_reduction_{})", kind.lane_collapse(), name);
            prop_assert!(vector.contains(&collapse));

            let mut partial = vec![seed; width];
            for chunk in values.chunks(width) {
                for (lane, value) in chunk.iter().enumerate() {
                    partial[lane] = combine(kind, partial[lane], *value);
                }
            }
            let collapsed = partial.iter().fold(seed, |acc, lane| combine(kind, acc, *lane));

            let scalar_seed = seed_after(&scalar, &format!("double _HILA_reduction_{}(", name));
            let expected = values.iter().fold(scalar_seed, |acc, v| combine(kind, acc, *v));
            prop_assert!(close(collapsed, expected), "{} {} vs {}", name, collapsed, expected);
        }
    }

    #[test]
    fn prop_stencil_loops_transpile_cleanly(p in parity(), d in direction(), t in target()) {
        let source = format!(
            "void step(Field<double>& a, const Field<double>& b, double k) {{\n    onsites({p}) a[X] = b[X + {d}] * k;\n}}\n"
        );
        let run = transpile_for(&source, t);
        prop_assert!(run.errors().is_empty(), "{:?}", run.errors());
        let code = run.code().to_string();
        let start_get = format!("b.start_get({}, _HILA_loop_parity);", d);
        prop_assert!(code.contains(&start_get));
        let parity_line = format!("const Parity _HILA_loop_parity = {};", p);
        prop_assert!(code.contains(&parity_line));
        prop_assert_eq!(run.loops().len(), 1);

        let again = transpile_for(&source, t);
        prop_assert_eq!(code, again.code().to_string());
    }

    #[test]
    fn prop_sanitized_names_are_identifiers(text in "[A-Za-z0-9_:<>, \\[\\]\\.\\*&]{0,40}") {
        let name = sanitize_identifier(&text);
        prop_assert!(name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'));
        prop_assert!(!name.contains("__"));
        prop_assert!(!name.starts_with('_') && !name.ends_with('_'));
    }

    #[test]
    fn prop_disjoint_replacements_apply_in_any_order(
        cuts in prop::collection::btree_set(0usize..60, 0..12),
        reversed in any::<bool>(),
    ) {
        let source: String = (0..60).map(|i| char::from(b'a' + (i % 26) as u8)).collect();
        // pair consecutive cut points into disjoint ranges
        let points: Vec<usize> = cuts.into_iter().collect();
        let ranges: Vec<(usize, usize)> = points.chunks_exact(2).map(|c| (c[0], c[1])).collect();

        let mut expected = String::new();
        let mut last = 0;
        for (start, end) in &ranges {
            expected.push_str(&source[last..*start]);
            expected.push('#');
            last = *end;
        }
        expected.push_str(&source[last..]);

        let mut edits = EditList::new();
        let ordered: Vec<&(usize, usize)> = if reversed {
            ranges.iter().rev().collect()
        } else {
            ranges.iter().collect()
        };
        for (start, end) in ordered {
            edits.replace(hilapp_syntax::Span::new(*start, *end), "#");
        }
        prop_assert_eq!(edits.apply(&source).unwrap(), expected);
    }
}
