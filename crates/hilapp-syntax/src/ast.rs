//! Arena-allocated syntax tree.
//!
//! Every node lives in an `id_arena::Arena` owned by the
//! [`TranslationUnit`](crate::TranslationUnit); nodes refer to each other by
//! `Id`. Ids are stable for the lifetime of the unit and double as
//! deduplication keys during analysis.

use crate::pragma::Pragma;
use crate::span::Span;
use crate::types::TypeName;
use id_arena::Id;

pub type ExprId = Id<Expr>;
pub type StmtId = Id<Stmt>;
pub type DeclId = Id<Decl>;
pub type FunctionId = Id<Function>;
pub type RecordId = Id<Record>;

#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

/// An identifier, resolved to its declaration when one is in scope.
#[derive(Debug, Clone, PartialEq)]
pub struct Name {
    pub text: String,
    pub decl: Option<DeclId>,
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    Ident(Name),
    IntLit(i64),
    FloatLit { value: f64, single: bool },
    BoolLit(bool),
    StrLit,
    CharLit,
    This,
    Unary {
        op: UnaryOp,
        operand: ExprId,
    },
    Binary {
        op: BinaryOp,
        lhs: ExprId,
        rhs: ExprId,
    },
    Assign {
        op: AssignOp,
        lhs: ExprId,
        rhs: ExprId,
    },
    Conditional {
        cond: ExprId,
        then_expr: ExprId,
        else_expr: ExprId,
    },
    Call {
        callee: ExprId,
        template_args: Vec<TypeName>,
        args: Vec<ExprId>,
    },
    /// Functional cast or temporary, `T(args)` / `T{args}` / `(T)expr`.
    Construct {
        ty: TypeName,
        args: Vec<ExprId>,
    },
    Index {
        base: ExprId,
        index: ExprId,
    },
    Member {
        base: ExprId,
        member: String,
        arrow: bool,
    },
    Paren(ExprId),
    InitList(Vec<ExprId>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Plus,
    Not,
    BitNot,
    Deref,
    AddrOf,
    PreInc,
    PreDec,
    PostInc,
    PostDec,
}

impl UnaryOp {
    pub fn is_increment(self) -> bool {
        matches!(
            self,
            UnaryOp::PreInc | UnaryOp::PreDec | UnaryOp::PostInc | UnaryOp::PostDec
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Shl,
    Shr,
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Ne,
    BitAnd,
    BitOr,
    BitXor,
    And,
    Or,
    Comma,
}

impl BinaryOp {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Lt
                | BinaryOp::Gt
                | BinaryOp::Le
                | BinaryOp::Ge
                | BinaryOp::Eq
                | BinaryOp::Ne
                | BinaryOp::And
                | BinaryOp::Or
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssignOp {
    Assign,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
}

impl AssignOp {
    pub fn as_str(self) -> &'static str {
        match self {
            AssignOp::Assign => "=",
            AssignOp::Add => "+=",
            AssignOp::Sub => "-=",
            AssignOp::Mul => "*=",
            AssignOp::Div => "/=",
            AssignOp::Rem => "%=",
            AssignOp::BitAnd => "&=",
            AssignOp::BitOr => "|=",
            AssignOp::BitXor => "^=",
            AssignOp::Shl => "<<=",
        }
    }

    /// Compound operators read the target before writing it.
    pub fn is_compound(self) -> bool {
        self != AssignOp::Assign
    }
}

impl serde::Serialize for AssignOp {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
    /// `#pragma hila` lines immediately preceding the statement.
    pub pragmas: Vec<Pragma>,
}

#[derive(Debug, Clone)]
pub enum StmtKind {
    Decl(Vec<DeclId>),
    Expr(ExprId),
    Block(Vec<StmtId>),
    If {
        cond: ExprId,
        then_branch: StmtId,
        else_branch: Option<StmtId>,
    },
    For {
        init: Option<StmtId>,
        cond: Option<ExprId>,
        step: Option<ExprId>,
        body: StmtId,
    },
    While {
        cond: ExprId,
        body: StmtId,
    },
    DoWhile {
        body: StmtId,
        cond: ExprId,
    },
    Switch {
        cond: ExprId,
        body: StmtId,
    },
    /// `case value:` or `default:`
    Case(Option<ExprId>),
    Return(Option<ExprId>),
    Break,
    Continue,
    Empty,
    /// `onsites(parity) body`
    Onsites {
        parity: ExprId,
        body: StmtId,
    },
    /// `foralldir(d) body`, `var` is the loop-local direction.
    Foralldir {
        var: DeclId,
        body: StmtId,
    },
    /// Preprocessor line other than `#pragma hila`.
    Directive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclKind {
    Global,
    Local,
    Param,
    Member(RecordId),
    Enumerator,
    DirectionLoop,
}

#[derive(Debug, Clone)]
pub struct Decl {
    pub name: String,
    pub ty: TypeName,
    pub ty_span: Span,
    pub name_span: Span,
    /// Whole declarator including the initializer.
    pub span: Span,
    pub init: Option<ExprId>,
    pub array_dims: Vec<Option<ExprId>>,
    pub kind: DeclKind,
    pub is_static: bool,
    pub is_extern: bool,
    pub is_constexpr: bool,
    /// For parameters: the `= value` default argument, including `=`.
    pub default_span: Option<Span>,
    /// Constant value of an enumerator.
    pub enum_value: Option<i64>,
}

impl Decl {
    pub fn is_array(&self) -> bool {
        !self.array_dims.is_empty()
    }

    pub fn is_const(&self) -> bool {
        self.is_constexpr || self.ty.is_const()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TemplateParamKind {
    Type,
    Value(TypeName),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TemplateParam {
    pub name: String,
    pub kind: TemplateParamKind,
}

#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    /// Class qualifier of an out-of-line member definition, `Wrapper<T>`.
    pub qualifier: Option<TypeName>,
    pub record: Option<RecordId>,
    /// `None` for ordinary functions, `Some(vec![])` for `template <>`.
    pub template_params: Option<Vec<TemplateParam>>,
    /// Explicit arguments of a specialization, `apply<double>`.
    pub explicit_args: Vec<TypeName>,
    pub ret: TypeName,
    pub params: Vec<DeclId>,
    pub body: Option<StmtId>,
    /// From the `template` keyword (if any) to the end of the body or `;`.
    pub span: Span,
    /// First byte after the template header.
    pub signature_start: usize,
    /// Qualified name as written, e.g. `Wrapper<T>::apply`.
    pub name_span: Span,
    /// `static`, `virtual`, `inline`, `explicit` specifier tokens.
    pub specifier_spans: Vec<Span>,
    pub is_inline: bool,
    pub pragmas: Vec<Pragma>,
}

impl Function {
    pub fn is_generic(&self) -> bool {
        matches!(&self.template_params, Some(p) if !p.is_empty())
    }

    pub fn is_explicit_specialization(&self) -> bool {
        matches!(&self.template_params, Some(p) if p.is_empty())
    }

    /// `Wrapper<T>::apply` or `apply`.
    pub fn qualified_name(&self) -> String {
        match &self.qualifier {
            Some(q) => format!("{}::{}", q, self.name),
            None => self.name.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Record {
    pub name: String,
    pub is_class: bool,
    pub template_params: Option<Vec<TemplateParam>>,
    pub members: Vec<DeclId>,
    pub methods: Vec<FunctionId>,
    /// From the `template`/`struct` keyword to the closing `};`.
    pub span: Span,
}

impl Record {
    pub fn is_generic(&self) -> bool {
        matches!(&self.template_params, Some(p) if !p.is_empty())
    }
}

#[derive(Debug, Clone)]
pub enum ItemKind {
    Directive,
    Function(FunctionId),
    Record(RecordId),
    /// Global variable declarations.
    Globals(StmtId),
    Alias { name: String, ty: TypeName },
    Enum,
}

/// A top-level declaration.
#[derive(Debug, Clone)]
pub struct Item {
    pub kind: ItemKind,
    pub span: Span,
}
