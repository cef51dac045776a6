//! Lattice programs shared by the integration tests.

/// Nearest-neighbour stencil over all four directions.
pub const LAPLACIAN: &str = r#"#include "hila.h"

void laplacian(Field<double>& out, const Field<double>& src) {
    onsites(ALL) {
        double s = 0;
        foralldir(d) s += src[X + d] + src[X - d];
        out[X] = s - 8.0 * src[X];
    }
}
"#;

/// One field written from a site read and a neighbour read of two others.
pub const NEIGHBOUR_SUM: &str = r#"void step(Field<double>& a, const Field<double>& b, const Field<double>& c) {
    onsites(ALL) {
        a[X] = b[X] + c[X + e_x];
    }
}
"#;

/// Branch on a field value.
pub const SITE_DEPENDENT_CONDITION: &str = r#"void clip(Field<double>& a, const Field<double>& b) {
    onsites(ALL) {
        if (b[X] > 0.5) a[X] = 1.0;
    }
}
"#;

/// Sum and product reductions into outer variables.
pub const REDUCTION: &str = r#"double measure(const Field<double>& f) {
    double sum = 0;
    double prod = 1;
    onsites(EVEN) {
        sum += f[X];
        prod *= f[X];
    }
    return sum + prod;
}
"#;

/// Double and float fields in one loop need different lane counts.
pub const LANE_CONFLICT: &str = r#"void mix(Field<double>& a, const Field<float>& b) {
    onsites(ALL) {
        a[X] = b[X];
    }
}
"#;

/// Writing a field while reading its neighbour over all sites.
pub const HAZARD_ALL: &str = r#"void smear(Field<double>& a) {
    onsites(ALL) a[X] = a[X + e_x];
}
"#;

/// The same access pattern restricted to one parity.
pub const HAZARD_EVEN: &str = r#"void smear(Field<double>& a) {
    onsites(EVEN) a[X] = a[X + e_x];
}
"#;

/// A template called with a user type declared after the template.
pub const MATRIX_APPLY: &str = r#"template <typename T>
void apply(Field<T>& f, T value) {
    onsites(ALL) f[X] = value;
}

struct Matrix3x3 {
    double e[3][3];
};

void caller(Field<Matrix3x3>& m, Matrix3x3 v) {
    apply<Matrix3x3>(m, v);
}
"#;

/// A loop function with a site-dependent argument.
pub const LOOP_FUNCTION: &str = r#"#pragma hila loop_function
double twice(double v) {
    return 2.0 * v;
}

void scale(Field<double>& a, const Field<double>& b) {
    onsites(ODD) a[X] = twice(b[X]);
}
"#;

/// Usage errors the collector rejects.
pub const BAD_RETURN: &str = r#"void bad(Field<double>& a) {
    onsites(ALL) {
        a[X] = 1.0;
        return;
    }
}
"#;

pub const BAD_NEIGHBOUR_WRITE: &str = r#"void bad(Field<double>& a) {
    onsites(EVEN) a[X + e_y] = 1.0;
}
"#;

pub const BAD_OUTER_ASSIGN: &str = r#"void bad(Field<double>& a) {
    double last = 0;
    onsites(ALL) last = a[X];
}
"#;
