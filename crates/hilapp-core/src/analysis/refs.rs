//! Reference and descriptor types produced by the loop analysis.
//!
//! Raw references are keyed by the expression node that produced them, so a
//! node is never recorded twice. Descriptors merge references that denote
//! the same field, variable or loop constant.

use hilapp_syntax::ast::{AssignOp, DeclId, ExprId, FunctionId, StmtId};
use hilapp_syntax::{Span, TypeName};
use serde::Serialize;
use std::fmt;

/// Offset added to a constant direction written as `-dir`, so that negated
/// constant directions never collide with positive ones.
pub const NEGATIVE_DIRECTION_OFFSET: i64 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FieldAccessKind {
    /// `f[X]`
    AtSite,
    /// `f[EVEN]` as the target of a field-parity statement.
    AtParity,
    /// `f[X + dir]`
    Direction,
    /// `f[X + offset]` with a coordinate vector offset.
    Offset,
}

/// Identity of a neighbour direction: a folded constant or normalized text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum DirectionKey {
    Const(i64),
    Expr(String),
}

impl fmt::Display for DirectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DirectionKey::Const(v) => write!(f, "{}", v),
            DirectionKey::Expr(text) => f.write_str(text),
        }
    }
}

/// One syntactic field access inside a loop.
#[derive(Debug, Clone, Serialize)]
pub struct FieldReference {
    #[serde(skip)]
    pub expr: ExprId,
    #[serde(skip)]
    pub name_expr: ExprId,
    pub span: Span,
    /// Normalized text of the field expression.
    pub name: String,
    pub kind: FieldAccessKind,
    pub is_read: bool,
    pub is_written: bool,
    /// Written with a compound operator, which reads the old value.
    pub is_compound: bool,
    /// Written under a condition, so the old value may survive.
    pub is_conditional: bool,
    pub sequence: usize,
    pub direction: Option<DirectionKey>,
    /// Direction or offset expression as it must appear in generated code.
    pub direction_text: String,
    pub direction_is_loop_local: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DirectionEntry {
    pub key: DirectionKey,
    pub text: String,
    /// Number of neighbour references using this direction.
    pub count: usize,
    pub is_loop_local: bool,
    #[serde(skip)]
    pub refs: Vec<ExprId>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OffsetEntry {
    pub text: String,
    /// Temporary field holding the shifted copy.
    pub temp: String,
    #[serde(skip)]
    pub refs: Vec<ExprId>,
}

/// How a value can be laid out in SIMD lanes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VectorInfo {
    /// Scalar type of one lane, `double`, `float`, `int` or `int64_t`.
    pub base_type: String,
    pub lane_width: usize,
    /// Vectorized spelling of the full element type.
    pub vector_type: String,
    /// Integer-based types follow whatever width the loop settles on.
    pub adapts_width: bool,
}

/// One distinct field used in a loop.
#[derive(Debug, Clone, Serialize)]
pub struct FieldDescriptor {
    pub name: String,
    #[serde(skip)]
    pub name_expr: ExprId,
    pub field_type: TypeName,
    pub element_type: TypeName,
    pub is_const: bool,
    pub is_written: bool,
    pub is_read_at_site: bool,
    pub is_read_via_neighbor: bool,
    pub is_read_via_offset: bool,
    pub is_compound_written: bool,
    pub is_conditionally_written: bool,
    pub first_write_seq: Option<usize>,
    pub directions: Vec<DirectionEntry>,
    pub offsets: Vec<OffsetEntry>,
    pub vector: Option<VectorInfo>,
    pub needs_parity_assertion: bool,
    /// Temporary holding the value at the current site.
    pub temp: String,
}

impl FieldDescriptor {
    pub fn has_loop_local_direction(&self) -> bool {
        self.directions.iter().any(|d| d.is_loop_local)
    }

    /// Whether the site temporary must be initialized from the field.
    pub fn needs_site_load(&self) -> bool {
        self.is_read_at_site || self.is_conditionally_written || self.is_compound_written
    }

    pub fn direction_temp(&self, key: &DirectionKey, index: usize) -> String {
        match key {
            DirectionKey::Const(v) => format!("{}_dir_{}", self.temp, v),
            DirectionKey::Expr(_) => format!("{}_dir_v{}", self.temp, index),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum ReductionKind {
    #[default]
    None,
    Sum,
    Product,
}

impl ReductionKind {
    pub fn from_op(op: AssignOp) -> ReductionKind {
        match op {
            AssignOp::Add => ReductionKind::Sum,
            AssignOp::Mul => ReductionKind::Product,
            _ => ReductionKind::None,
        }
    }

    pub fn is_reduction(self) -> bool {
        self != ReductionKind::None
    }

    /// Value the accumulator starts from.
    pub fn identity(self) -> &'static str {
        match self {
            ReductionKind::Product => "1",
            _ => "0",
        }
    }

    pub fn operator(self) -> &'static str {
        match self {
            ReductionKind::Product => "*=",
            _ => "+=",
        }
    }

    /// Horizontal collapse of one SIMD accumulator.
    pub fn lane_collapse(self) -> &'static str {
        match self {
            ReductionKind::Product => "reduce_prod",
            _ => "reduce_sum",
        }
    }

    pub fn node_reduce(self) -> &'static str {
        match self {
            ReductionKind::Product => "hila::reduce_node_product",
            _ => "hila::reduce_node_sum",
        }
    }

    pub fn gpu_reduce(self) -> &'static str {
        match self {
            ReductionKind::Product => "gpu_reduce_product",
            _ => "gpu_reduce_sum",
        }
    }
}

/// How a variable is touched at one reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VarAccess {
    Read,
    /// Written with `op`; compound operators also read.
    Write(AssignOp),
}

#[derive(Debug, Clone, Serialize)]
pub struct VarRef {
    #[serde(skip)]
    pub expr: ExprId,
    pub span: Span,
    pub access: VarAccess,
}

/// One assignment to a loop-local variable, recorded in execution order.
#[derive(Debug, Clone)]
pub struct VarAssignment {
    pub decl: DeclId,
    pub value: Option<ExprId>,
    pub conditions: Vec<ExprId>,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize)]
pub struct VariableDescriptor {
    #[serde(skip)]
    pub decl: DeclId,
    pub name: String,
    pub ty: TypeName,
    pub is_loop_local: bool,
    pub is_assigned: bool,
    pub is_site_dependent: bool,
    pub reduction: ReductionKind,
    #[serde(skip)]
    pub dependencies: Vec<DeclId>,
    pub refs: Vec<VarRef>,
    pub vector: Option<VectorInfo>,
    /// Read as a value somewhere in the loop.
    pub is_plain_read: bool,
    /// Compile-time constant declared outside the loop.
    pub is_constant: bool,
}

impl VariableDescriptor {
    pub fn reduction_temp(&self) -> String {
        format!("_HILA_reduction_{}", self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ArrayRefKind {
    /// The whole array is made available inside the loop.
    WholeCapture,
    /// A `ReductionVector` or element reduction target.
    Reduction,
}

/// Indexed access to an array declared outside the loop.
#[derive(Debug, Clone, Serialize)]
pub struct ArrayReference {
    #[serde(skip)]
    pub decl: DeclId,
    pub name: String,
    pub ty: TypeName,
    pub element_type: TypeName,
    pub kind: ArrayRefKind,
    pub reduction: ReductionKind,
    pub is_reduction_vector: bool,
    /// Number of elements as a C++ expression.
    pub size_expr: Option<String>,
    pub dims: usize,
    /// Declared extent of each dimension of a C array.
    pub dim_texts: Vec<String>,
    #[serde(skip)]
    pub refs: Vec<ExprId>,
    /// Index expressions, used to decide site dependence.
    #[serde(skip)]
    pub index_exprs: Vec<ExprId>,
    pub has_site_dependent_index: bool,
    pub is_read: bool,
    /// Element updates, for `ReductionVector` targets.
    #[serde(skip)]
    pub writes: Vec<(AssignOp, Span)>,
}

/// A loop-constant expression that is not a plain variable: member
/// access, constant-index element.
#[derive(Debug, Clone, Serialize)]
pub struct LoopConstExpr {
    #[serde(skip)]
    pub expr: ExprId,
    pub text: String,
    pub ty: Option<TypeName>,
    pub reduction: ReductionKind,
    pub is_read: bool,
    #[serde(skip)]
    pub writes: Vec<(AssignOp, Span)>,
    #[serde(skip)]
    pub refs: Vec<ExprId>,
    pub index: usize,
}

impl LoopConstExpr {
    pub fn temp(&self) -> String {
        if self.reduction.is_reduction() {
            format!("_HILA_reduction_c{}", self.index)
        } else {
            format!("_HILA_const_{}", self.index)
        }
    }
}

/// `sel.select(X)` / `sel.select(X, value)`.
#[derive(Debug, Clone, Serialize)]
pub struct SelectionDescriptor {
    pub text: String,
    #[serde(skip)]
    pub decl: Option<DeclId>,
    pub has_value: bool,
    #[serde(skip)]
    pub calls: Vec<SelectionCall>,
}

#[derive(Debug, Clone)]
pub struct SelectionCall {
    pub expr: ExprId,
    pub value: Option<ExprId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SpecialCall {
    /// `X.coordinates()`
    Coordinates,
    /// `X.coordinate(d)`
    Coordinate,
    /// `X.parity()`
    Parity,
    /// `hila::random()`
    Random,
}

#[derive(Debug, Clone, Serialize)]
pub struct ArgInfo {
    #[serde(skip)]
    pub expr: ExprId,
    pub is_site_dependent: bool,
    #[serde(skip)]
    pub dependencies: Vec<DeclId>,
    /// Bound to a non-const reference parameter.
    pub is_out_param: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CallInfo {
    #[serde(skip)]
    pub expr: ExprId,
    pub span: Span,
    pub name: String,
    #[serde(skip)]
    pub function: Option<FunctionId>,
    pub args: Vec<ArgInfo>,
    pub is_method: bool,
    #[serde(skip)]
    pub method_base: Option<ExprId>,
    pub special: Option<SpecialCall>,
    pub is_site_dependent: bool,
    /// Math builtin, library value method or `#pragma hila loop_function`.
    pub is_vectorizable: bool,
}

/// `rv[index] op= value;` where `rv` is a `ReductionVector`.
#[derive(Debug, Clone)]
pub struct ReductionVectorUpdate {
    pub stmt: StmtId,
    pub array: DeclId,
    pub base_text: String,
    pub index: ExprId,
    pub value: ExprId,
    pub kind: ReductionKind,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reduction_kind_from_op() {
        assert_eq!(ReductionKind::from_op(AssignOp::Add), ReductionKind::Sum);
        assert_eq!(ReductionKind::from_op(AssignOp::Mul), ReductionKind::Product);
        assert_eq!(ReductionKind::from_op(AssignOp::Sub), ReductionKind::None);
        assert_eq!(ReductionKind::Product.identity(), "1");
        assert_eq!(ReductionKind::Sum.identity(), "0");
    }

    #[test]
    fn test_direction_key_display() {
        assert_eq!(DirectionKey::Const(NEGATIVE_DIRECTION_OFFSET + 1).to_string(), "51");
        assert_eq!(DirectionKey::Expr("-d".into()).to_string(), "-d");
    }
}
