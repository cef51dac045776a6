//! Names the lattice library provides without a visible declaration.

use once_cell::sync::Lazy;
use rustc_hash::FxHashSet;

/// The site cursor inside a site loop.
pub const SITE_CURSOR: &str = "X";

/// Lattice dimension assumed when folding `NDIM`.
pub const DEFAULT_NDIM: i64 = 4;

pub const PARITY_NAMES: [&str; 3] = ["EVEN", "ODD", "ALL"];

pub const DIRECTION_NAMES: [&str; 4] = ["e_x", "e_y", "e_z", "e_t"];

/// Integer value of a direction constant.
pub fn direction_value(name: &str) -> Option<i64> {
    DIRECTION_NAMES
        .iter()
        .position(|d| *d == name)
        .map(|i| i as i64)
}

pub fn is_parity_name(name: &str) -> bool {
    PARITY_NAMES.contains(&name)
}

/// Names that resolve to the library rather than a user declaration.
pub fn is_builtin_name(name: &str) -> bool {
    name == SITE_CURSOR
        || is_parity_name(name)
        || direction_value(name).is_some()
        || matches!(name, "NDIM" | "NDIRS" | "lattice" | "M_PI" | "nullptr")
        || name.starts_with("hila::")
        || name.starts_with("std::")
}

static BUILTIN_TYPES: Lazy<FxHashSet<&'static str>> = Lazy::new(|| {
    [
        "void", "bool", "char", "short", "int", "long", "float", "double", "unsigned", "signed",
        "auto", "size_t", "int64_t", "uint64_t", "int32_t", "uint32_t", "int8_t", "uint8_t",
    ]
    .into_iter()
    .collect()
});

static LIBRARY_TYPES: Lazy<FxHashSet<&'static str>> = Lazy::new(|| {
    [
        "Field",
        "Complex",
        "Cmplx",
        "Matrix",
        "SquareMatrix",
        "Vector",
        "RowVector",
        "SU",
        "Array",
        "CoordinateVector",
        "CoordinateVector_t",
        "Direction",
        "Parity",
        "ReductionVector",
        "Reduction",
        "SiteSelect",
        "SiteValueSelect",
        "std::vector",
        "std::array",
        "std::string",
        "std::complex",
        "hila::Field",
    ]
    .into_iter()
    .collect()
});

static LIBRARY_TEMPLATES: Lazy<FxHashSet<&'static str>> = Lazy::new(|| {
    [
        "Field",
        "hila::Field",
        "Complex",
        "Cmplx",
        "Matrix",
        "SquareMatrix",
        "Vector",
        "RowVector",
        "SU",
        "Array",
        "CoordinateVector_t",
        "ReductionVector",
        "Reduction",
        "SiteValueSelect",
        "std::vector",
        "std::array",
        "std::complex",
    ]
    .into_iter()
    .collect()
});

/// Free functions that are safe and vectorizable with any arithmetic type.
static MATH_FUNCTIONS: Lazy<FxHashSet<&'static str>> = Lazy::new(|| {
    [
        "sqrt", "exp", "log", "sin", "cos", "tan", "asin", "acos", "atan", "atan2", "sinh",
        "cosh", "tanh", "pow", "abs", "fabs", "floor", "ceil", "round", "min", "max", "mul_add",
        "squarenorm", "conj", "real", "imag", "arg", "norm", "expi",
    ]
    .into_iter()
    .collect()
});

/// Methods on arithmetic library types that return a value of the element
/// type and do not modify the object.
static VALUE_METHODS: Lazy<FxHashSet<&'static str>> = Lazy::new(|| {
    [
        "abs", "squarenorm", "norm", "conj", "dagger", "transpose", "trace", "real", "imag",
        "arg", "det", "e", "column", "row", "dot",
    ]
    .into_iter()
    .collect()
});

pub fn is_builtin_type(name: &str) -> bool {
    BUILTIN_TYPES.contains(name)
}

pub fn is_library_type(name: &str) -> bool {
    LIBRARY_TYPES.contains(name)
}

pub fn is_library_template(name: &str) -> bool {
    LIBRARY_TEMPLATES.contains(name)
}

/// `sqrt`, `std::exp`, `hila::pow`, ...
pub fn is_math_function(name: &str) -> bool {
    let short = name
        .strip_prefix("std::")
        .or_else(|| name.strip_prefix("hila::"))
        .unwrap_or(name);
    MATH_FUNCTIONS.contains(short)
}

pub fn is_value_method(name: &str) -> bool {
    VALUE_METHODS.contains(name)
}

/// C++ keywords that can start a declaration.
pub fn is_decl_specifier(word: &str) -> bool {
    matches!(
        word,
        "const" | "static" | "extern" | "constexpr" | "volatile" | "inline" | "typename" | "struct"
            | "class" | "virtual" | "explicit" | "friend" | "mutable" | "register"
    )
}

pub fn is_reserved_word(word: &str) -> bool {
    matches!(
        word,
        "if" | "else"
            | "for"
            | "while"
            | "do"
            | "switch"
            | "case"
            | "default"
            | "return"
            | "break"
            | "continue"
            | "onsites"
            | "foralldir"
            | "template"
            | "using"
            | "typedef"
            | "namespace"
            | "enum"
            | "operator"
            | "public"
            | "private"
            | "protected"
            | "this"
            | "true"
            | "false"
            | "new"
            | "delete"
            | "sizeof"
    ) || is_decl_specifier(word)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directions() {
        assert_eq!(direction_value("e_x"), Some(0));
        assert_eq!(direction_value("e_t"), Some(3));
        assert_eq!(direction_value("e_w"), None);
    }

    #[test]
    fn test_builtin_names() {
        assert!(is_builtin_name("X"));
        assert!(is_builtin_name("EVEN"));
        assert!(is_builtin_name("hila::random"));
        assert!(!is_builtin_name("f"));
    }

    #[test]
    fn test_math_functions_accept_namespaces() {
        assert!(is_math_function("sqrt"));
        assert!(is_math_function("std::exp"));
        assert!(!is_math_function("my_update"));
    }
}
