//! Light semantic queries over parsed expressions: constant folding and a
//! best-effort static type.

use crate::ast::*;
use crate::builtins;
use crate::types::TypeName;
use crate::unit::TranslationUnit;

impl TranslationUnit {
    /// Skips any number of enclosing parentheses.
    pub fn strip_parens(&self, mut id: ExprId) -> ExprId {
        while let ExprKind::Paren(inner) = self.exprs[id].kind {
            id = inner;
        }
        id
    }

    /// Folds an integer constant expression, following `const`/`constexpr`
    /// initializers, enumerators and the direction names.
    pub fn const_int(&self, id: ExprId) -> Option<i64> {
        self.const_int_depth(id, 0)
    }

    fn const_int_depth(&self, id: ExprId, depth: usize) -> Option<i64> {
        if depth > 32 {
            return None;
        }
        match &self.exprs[id].kind {
            ExprKind::IntLit(v) => Some(*v),
            ExprKind::BoolLit(b) => Some(*b as i64),
            ExprKind::Paren(inner) => self.const_int_depth(*inner, depth + 1),
            ExprKind::Unary { op, operand } => {
                let v = self.const_int_depth(*operand, depth + 1)?;
                match op {
                    UnaryOp::Neg => Some(-v),
                    UnaryOp::Plus => Some(v),
                    UnaryOp::BitNot => Some(!v),
                    UnaryOp::Not => Some((v == 0) as i64),
                    _ => None,
                }
            }
            ExprKind::Binary { op, lhs, rhs } => {
                let a = self.const_int_depth(*lhs, depth + 1)?;
                let b = self.const_int_depth(*rhs, depth + 1)?;
                match op {
                    BinaryOp::Add => a.checked_add(b),
                    BinaryOp::Sub => a.checked_sub(b),
                    BinaryOp::Mul => a.checked_mul(b),
                    BinaryOp::Div => a.checked_div(b),
                    BinaryOp::Rem => a.checked_rem(b),
                    BinaryOp::Shl => a.checked_shl(u32::try_from(b).ok()?),
                    BinaryOp::Shr => a.checked_shr(u32::try_from(b).ok()?),
                    BinaryOp::BitAnd => Some(a & b),
                    BinaryOp::BitOr => Some(a | b),
                    BinaryOp::BitXor => Some(a ^ b),
                    BinaryOp::Lt => Some((a < b) as i64),
                    BinaryOp::Gt => Some((a > b) as i64),
                    BinaryOp::Le => Some((a <= b) as i64),
                    BinaryOp::Ge => Some((a >= b) as i64),
                    BinaryOp::Eq => Some((a == b) as i64),
                    BinaryOp::Ne => Some((a != b) as i64),
                    BinaryOp::And => Some((a != 0 && b != 0) as i64),
                    BinaryOp::Or => Some((a != 0 || b != 0) as i64),
                    BinaryOp::Comma => Some(b),
                }
            }
            ExprKind::Conditional {
                cond,
                then_expr,
                else_expr,
            } => {
                if self.const_int_depth(*cond, depth + 1)? != 0 {
                    self.const_int_depth(*then_expr, depth + 1)
                } else {
                    self.const_int_depth(*else_expr, depth + 1)
                }
            }
            ExprKind::Construct { ty, args } if args.len() == 1 && is_integral(ty) => {
                self.const_int_depth(args[0], depth + 1)
            }
            ExprKind::Ident(name) => match name.decl {
                Some(d) => {
                    let decl = &self.decls[d];
                    if let Some(v) = decl.enum_value {
                        return Some(v);
                    }
                    if decl.is_const() && is_integral(&decl.ty) && !decl.is_array() {
                        self.const_int_depth(decl.init?, depth + 1)
                    } else {
                        None
                    }
                }
                None => match name.text.as_str() {
                    "NDIM" => Some(builtins::DEFAULT_NDIM),
                    "NDIRS" => Some(2 * builtins::DEFAULT_NDIM),
                    other => builtins::direction_value(other),
                },
            },
            _ => None,
        }
    }

    /// Folds a floating point constant expression.
    pub fn const_float(&self, id: ExprId) -> Option<f64> {
        match &self.exprs[id].kind {
            ExprKind::FloatLit { value, .. } => Some(*value),
            ExprKind::Paren(inner) => self.const_float(*inner),
            ExprKind::Unary {
                op: UnaryOp::Neg,
                operand,
            } => self.const_float(*operand).map(|v| -v),
            ExprKind::Binary { op, lhs, rhs } => {
                let a = self.const_float(*lhs)?;
                let b = self.const_float(*rhs)?;
                match op {
                    BinaryOp::Add => Some(a + b),
                    BinaryOp::Sub => Some(a - b),
                    BinaryOp::Mul => Some(a * b),
                    BinaryOp::Div => Some(a / b),
                    _ => None,
                }
            }
            ExprKind::Ident(Name { decl: Some(d), .. }) => {
                let decl = &self.decls[*d];
                if decl.is_const() && !decl.is_array() {
                    self.const_float(decl.init?)
                } else {
                    None
                }
            }
            _ => self.const_int(id).map(|v| v as f64),
        }
    }

    /// Static type of an expression as far as it can be determined from the
    /// declarations in this unit. Library calls that are not known return
    /// `None`.
    pub fn expr_type(&self, id: ExprId) -> Option<TypeName> {
        match &self.exprs[id].kind {
            ExprKind::IntLit(_) | ExprKind::CharLit => Some(TypeName::new("int")),
            ExprKind::FloatLit { single, .. } => Some(TypeName::new(if *single {
                "float"
            } else {
                "double"
            })),
            ExprKind::BoolLit(_) => Some(TypeName::new("bool")),
            ExprKind::StrLit => Some(TypeName::new("const char*")),
            ExprKind::This => None,
            ExprKind::Paren(inner) => self.expr_type(*inner),
            ExprKind::Ident(name) => match name.decl {
                Some(d) => Some(self.decls[d].ty.clone()),
                None => builtin_type_of(&name.text),
            },
            ExprKind::Unary { op, operand } => match op {
                UnaryOp::Not => Some(TypeName::new("bool")),
                UnaryOp::AddrOf | UnaryOp::Deref => None,
                _ => self.expr_type(*operand),
            },
            ExprKind::Binary { op, lhs, rhs } => {
                if op.is_comparison() {
                    return Some(TypeName::new("bool"));
                }
                if *op == BinaryOp::Comma {
                    return self.expr_type(*rhs);
                }
                let a = self.expr_type(*lhs);
                let b = self.expr_type(*rhs);
                match (a, b) {
                    (Some(a), Some(b)) => Some(wider(a, b)),
                    (a, b) => a.or(b),
                }
            }
            ExprKind::Assign { lhs, .. } => self.expr_type(*lhs),
            ExprKind::Conditional {
                then_expr,
                else_expr,
                ..
            } => self
                .expr_type(*then_expr)
                .or_else(|| self.expr_type(*else_expr)),
            ExprKind::Construct { ty, .. } => Some(ty.clone()),
            ExprKind::InitList(_) => None,
            ExprKind::Index { base, .. } => {
                let base_id = self.strip_parens(*base);
                if let ExprKind::Ident(Name { decl: Some(d), .. }) = &self.exprs[base_id].kind {
                    let decl = &self.decls[*d];
                    if decl.is_array() {
                        return Some(decl.ty.clone());
                    }
                }
                let ty = self.resolve_alias(&self.expr_type(base_id)?);
                ty.container_element()
            }
            ExprKind::Member { base, member, .. } => {
                let ty = self.resolve_alias(&self.expr_type(*base)?);
                let record = self.record_named(&ty.head())?;
                self.records[record]
                    .members
                    .iter()
                    .map(|d| &self.decls[*d])
                    .find(|d| d.name == *member)
                    .map(|d| d.ty.clone())
            }
            ExprKind::Call { callee, args, .. } => self.call_type(*callee, args),
        }
    }

    fn call_type(&self, callee: ExprId, args: &[ExprId]) -> Option<TypeName> {
        match &self.exprs[self.strip_parens(callee)].kind {
            ExprKind::Ident(name) => {
                if name.text == "hila::random" || name.text == "hila::gaussian_random" {
                    return Some(TypeName::new("double"));
                }
                if builtins::is_math_function(&name.text) {
                    return args.first().and_then(|a| self.expr_type(*a));
                }
                self.functions_named(&name.text)
                    .iter()
                    .map(|f| &self.functions[*f])
                    .find(|f| f.record.is_none() && !f.is_generic())
                    .map(|f| f.ret.clone())
            }
            ExprKind::Member { base, member, .. } => {
                let ty = self.resolve_alias(&self.expr_type(*base)?);
                if let Some(record) = self.record_named(&ty.head()) {
                    return self.records[record]
                        .methods
                        .iter()
                        .map(|f| &self.functions[*f])
                        .find(|f| f.name == *member)
                        .map(|f| f.ret.clone());
                }
                if builtins::is_value_method(member) && !ty.is_field() {
                    return Some(ty);
                }
                None
            }
            _ => None,
        }
    }
}

fn builtin_type_of(name: &str) -> Option<TypeName> {
    if builtins::is_parity_name(name) {
        Some(TypeName::new("Parity"))
    } else if builtins::direction_value(name).is_some() {
        Some(TypeName::new("Direction"))
    } else if name == "NDIM" || name == "NDIRS" {
        Some(TypeName::new("int"))
    } else if name == "M_PI" {
        Some(TypeName::new("double"))
    } else {
        None
    }
}

pub fn is_integral(ty: &TypeName) -> bool {
    matches!(
        ty.unqualified().as_str(),
        "int"
            | "unsigned"
            | "unsigned int"
            | "long"
            | "long int"
            | "long long"
            | "unsigned long"
            | "short"
            | "char"
            | "bool"
            | "size_t"
            | "int64_t"
            | "uint64_t"
            | "int32_t"
            | "uint32_t"
            | "Direction"
            | "Parity"
    )
}

/// Result type of arithmetic between `a` and `b`: a library type or
/// floating point operand wins over an integer one.
fn wider(a: TypeName, b: TypeName) -> TypeName {
    let rank = |t: &TypeName| match t.unqualified().as_str() {
        s if is_integral(&TypeName::new(s)) => 0,
        "float" => 1,
        "double" => 2,
        _ => 3,
    };
    if rank(&b) > rank(&a) {
        b
    } else {
        a
    }
}

#[cfg(test)]
mod tests {
    use crate::ast::{ExprId, ItemKind, StmtKind};
    use crate::parse;
    use crate::unit::TranslationUnit;

    fn global_init(tu: &TranslationUnit, name: &str) -> ExprId {
        tu.items
            .iter()
            .find_map(|item| match &item.kind {
                ItemKind::Globals(s) => match &tu.stmt(*s).kind {
                    StmtKind::Decl(ds) => ds
                        .iter()
                        .find(|d| tu.decl(**d).name == name)
                        .and_then(|d| tu.decl(*d).init),
                    _ => None,
                },
                _ => None,
            })
            .unwrap()
    }

    #[test]
    fn test_const_int_follows_constants() {
        let tu = parse("const int N = 3; int a = N * 2 + e_y; int b = NDIM - 1;").unwrap();
        assert_eq!(tu.const_int(global_init(&tu, "a")), Some(7));
        assert_eq!(tu.const_int(global_init(&tu, "b")), Some(3));
    }

    #[test]
    fn test_const_int_rejects_mutable() {
        let tu = parse("int n = 3; int a = n + 1;").unwrap();
        assert_eq!(tu.const_int(global_init(&tu, "a")), None);
    }

    #[test]
    fn test_expr_type_prefers_floating() {
        let tu = parse("double d; int i; double a = i * d; float f = 1.0f;").unwrap();
        let a = global_init(&tu, "a");
        assert_eq!(tu.expr_type(a).unwrap().as_str(), "double");
        let f = global_init(&tu, "f");
        assert_eq!(tu.expr_type(f).unwrap().as_str(), "float");
    }

    #[test]
    fn test_expr_type_field_element() {
        let tu = parse("Field<Complex<double>> g; Complex<double> c = g[ALL];").unwrap();
        let c = global_init(&tu, "c");
        assert_eq!(tu.expr_type(c).unwrap().as_str(), "Complex<double>");
    }
}
