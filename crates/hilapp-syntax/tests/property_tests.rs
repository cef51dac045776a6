use hilapp_syntax::parse;
use proptest::prelude::*;

/// Integer expression text together with its value.
#[derive(Debug, Clone)]
struct IntExpr {
    text: String,
    value: i64,
}

fn int_expr() -> impl Strategy<Value = IntExpr> {
    let leaf = (0i64..10).prop_map(|v| IntExpr {
        text: v.to_string(),
        value: v,
    });
    leaf.prop_recursive(4, 16, 2, |inner| {
        prop_oneof![
            (inner.clone(), prop::sample::select(vec!["+", "-", "*"]), inner.clone()).prop_map(|(a, op, b)| {
                let value = match op {
                    "+" => a.value + b.value,
                    "-" => a.value - b.value,
                    _ => a.value * b.value,
                };
                IntExpr {
                    text: format!("({} {} {})", a.text, op, b.text),
                    value,
                }
            }),
            inner.prop_map(|a| IntExpr {
                text: format!("-({})", a.text),
                value: -a.value,
            }),
        ]
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Constant initializers fold to their value and keep their source text.
    #[test]
    fn prop_constant_initializer_folds(expr in int_expr()) {
        let source = format!("const int n = {};\n", expr.text);
        let tu = parse(&source).unwrap();
        let (_, decl) = tu.decls.iter().find(|(_, d)| d.name == "n").unwrap();
        let init = decl.init.unwrap();
        prop_assert_eq!(tu.expr_text(init), expr.text.as_str());
        prop_assert_eq!(tu.const_int(init), Some(expr.value));
    }

    /// Whitespace between tokens does not change the parsed declaration.
    #[test]
    fn prop_whitespace_is_insignificant(expr in int_expr(), pad in "[ \t\n]{1,4}") {
        let spaced = expr.text.replace(' ', &pad);
        let source = format!("const{}int{}n{}={}{};\n", pad, pad, pad, pad, spaced);
        let tu = parse(&source).unwrap();
        let (_, decl) = tu.decls.iter().find(|(_, d)| d.name == "n").unwrap();
        prop_assert_eq!(decl.ty.as_str(), "const int");
        prop_assert_eq!(tu.const_int(decl.init.unwrap()), Some(expr.value));
    }
}
