//! Per-loop analysis state.

use bitflags::bitflags;
use hilapp_syntax::ast::{DeclId, ExprId};
use hilapp_syntax::pragma::{self, Pragma, PragmaKind};
use hilapp_syntax::Span;
use rustc_hash::FxHashSet;
use serde::Serialize;
use std::fmt;

/// Parity requested by a site loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    Even,
    Odd,
    All,
    /// Not a compile-time constant; holds the expression text.
    Unresolved(String),
}

impl Parity {
    pub fn from_text(text: &str) -> Parity {
        match text {
            "EVEN" => Parity::Even,
            "ODD" => Parity::Odd,
            "ALL" => Parity::All,
            other => Parity::Unresolved(other.to_string()),
        }
    }

    pub fn is_all(&self) -> bool {
        matches!(self, Parity::All)
    }
}

impl fmt::Display for Parity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Parity::Even => f.write_str("EVEN"),
            Parity::Odd => f.write_str("ODD"),
            Parity::All => f.write_str("ALL"),
            Parity::Unresolved(text) => f.write_str(text),
        }
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct LoopFlags: u32 {
        const HAS_SITE_DEPENDENT_CONDITION = 1 << 0;
        const HAS_CONDITIONAL = 1 << 1;
        const CONTAINS_RANDOM = 1 << 2;
        const NO_VECTOR = 1 << 3;
        const HAS_SELECTION = 1 << 4;
        /// Loop written as `f[PARITY] = expr;`.
        const FIELD_PARITY_STATEMENT = 1 << 5;
        const HAS_SITE_DEPENDENT_INDEX = 1 << 6;
    }
}

/// State of the loop under analysis. Created at loop entry and dropped
/// after code generation.
#[derive(Debug, Clone)]
pub struct LoopContext {
    pub parity: Parity,
    pub parity_text: String,
    pub flags: LoopFlags,
    pub pragmas: Vec<Pragma>,
    /// Span of the whole loop statement.
    pub span: Span,
    /// Span of the loop body that is rewritten.
    pub body_span: Span,
    /// The `f[PARITY]` target of a field-parity statement.
    pub parity_target: Option<ExprId>,
    sequence: usize,
    scopes: Vec<Vec<DeclId>>,
    locals: FxHashSet<DeclId>,
    conditions: Vec<ExprId>,
    all_conditions: Vec<ExprId>,
}

impl LoopContext {
    pub fn new(parity_text: &str, span: Span, body_span: Span, pragmas: Vec<Pragma>) -> Self {
        let mut flags = LoopFlags::empty();
        if pragma::has_kind(&pragmas, &PragmaKind::NoVector) {
            flags |= LoopFlags::NO_VECTOR;
        }
        Self {
            parity: Parity::from_text(parity_text),
            parity_text: parity_text.to_string(),
            flags,
            pragmas,
            span,
            body_span,
            parity_target: None,
            sequence: 0,
            scopes: vec![Vec::new()],
            locals: FxHashSet::default(),
            conditions: Vec::new(),
            all_conditions: Vec::new(),
        }
    }

    pub fn sequence(&self) -> usize {
        self.sequence
    }

    /// Advances to the next top-level statement.
    pub fn next_statement(&mut self) -> usize {
        self.sequence += 1;
        self.sequence
    }

    pub fn push_scope(&mut self) {
        self.scopes.push(Vec::new());
    }

    pub fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    pub fn declare_local(&mut self, decl: DeclId) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.push(decl);
        }
        self.locals.insert(decl);
    }

    /// Declared inside the loop, whether or not its scope is still open.
    pub fn is_loop_local(&self, decl: DeclId) -> bool {
        self.locals.contains(&decl)
    }

    /// Declared inside the loop in a scope that is still open.
    pub fn is_in_scope(&self, decl: DeclId) -> bool {
        self.scopes.iter().any(|s| s.contains(&decl))
    }

    pub fn push_condition(&mut self, cond: ExprId) {
        self.flags |= LoopFlags::HAS_CONDITIONAL;
        self.conditions.push(cond);
        self.all_conditions.push(cond);
    }

    pub fn pop_condition(&mut self) {
        self.conditions.pop();
    }

    /// Conditions enclosing the current point, outermost first.
    pub fn conditions(&self) -> &[ExprId] {
        &self.conditions
    }

    /// Every condition seen in the loop.
    pub fn all_conditions(&self) -> &[ExprId] {
        &self.all_conditions
    }

    pub fn is_safe(&self, field: &str) -> bool {
        pragma::is_safe(&self.pragmas, field)
    }

    pub fn has_access(&self, name: &str) -> bool {
        pragma::access_names(&self.pragmas).any(|n| n == name)
    }
}
