use crate::ast::*;
use crate::lexer;
use crate::span::{SourceMap, Span};
use crate::types::{join_tokens, TypeName};
use id_arena::Arena;
use rustc_hash::FxHashMap;

/// One parsed source file and all of its nodes.
///
/// The unit is read-only once parsed; analysis queries it through the
/// accessors here and in [`crate::query`].
#[derive(Debug)]
pub struct TranslationUnit {
    pub source: String,
    pub items: Vec<Item>,
    pub exprs: Arena<Expr>,
    pub stmts: Arena<Stmt>,
    pub decls: Arena<Decl>,
    pub functions: Arena<Function>,
    pub records: Arena<Record>,
    pub source_map: SourceMap,
    pub(crate) records_by_name: FxHashMap<String, RecordId>,
    pub(crate) functions_by_name: FxHashMap<String, Vec<FunctionId>>,
    pub(crate) aliases: FxHashMap<String, TypeName>,
}

impl TranslationUnit {
    pub(crate) fn empty(source: &str) -> Self {
        Self {
            source: source.to_string(),
            items: Vec::new(),
            exprs: Arena::new(),
            stmts: Arena::new(),
            decls: Arena::new(),
            functions: Arena::new(),
            records: Arena::new(),
            source_map: SourceMap::new(source),
            records_by_name: FxHashMap::default(),
            functions_by_name: FxHashMap::default(),
            aliases: FxHashMap::default(),
        }
    }

    pub fn expr(&self, id: ExprId) -> &Expr {
        &self.exprs[id]
    }

    pub fn stmt(&self, id: StmtId) -> &Stmt {
        &self.stmts[id]
    }

    pub fn decl(&self, id: DeclId) -> &Decl {
        &self.decls[id]
    }

    pub fn function(&self, id: FunctionId) -> &Function {
        &self.functions[id]
    }

    pub fn record(&self, id: RecordId) -> &Record {
        &self.records[id]
    }

    pub fn text(&self, span: Span) -> &str {
        span.text(&self.source)
    }

    pub fn expr_text(&self, id: ExprId) -> &str {
        self.text(self.exprs[id].span)
    }

    /// Expression text with whitespace and comments normalized, used to
    /// compare expressions structurally.
    pub fn normalized_text(&self, id: ExprId) -> String {
        normalize(self.expr_text(id))
    }

    pub fn line(&self, pos: usize) -> usize {
        self.source_map.line(pos)
    }

    pub fn record_named(&self, name: &str) -> Option<RecordId> {
        self.records_by_name.get(name).copied()
    }

    pub fn functions_named(&self, name: &str) -> &[FunctionId] {
        self.functions_by_name
            .get(name)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Follows `using`/`typedef` aliases.
    pub fn resolve_alias(&self, ty: &TypeName) -> TypeName {
        let mut current = ty.unqualified();
        for _ in 0..16 {
            match self.aliases.get(current.as_str()) {
                Some(next) => current = next.unqualified(),
                None => break,
            }
        }
        current
    }

    /// Span of the declaration of a user-defined type, if it is declared in
    /// this unit.
    pub fn type_decl_span(&self, name: &str) -> Option<Span> {
        let head = TypeName::new(name).head();
        if let Some(r) = self.record_named(&head) {
            return Some(self.records[r].span);
        }
        self.items.iter().find_map(|item| match &item.kind {
            ItemKind::Alias { name: n, .. } if *n == head => Some(item.span),
            _ => None,
        })
    }

    /// Innermost function whose body contains `pos`.
    pub fn enclosing_function(&self, pos: usize) -> Option<FunctionId> {
        self.functions
            .iter()
            .filter(|(_, f)| f.body.is_some() && f.span.start <= pos && pos < f.span.end)
            .min_by_key(|(_, f)| f.span.len())
            .map(|(id, _)| id)
    }

    /// The top-level item containing `pos`.
    pub fn top_level_item_at(&self, pos: usize) -> Option<&Item> {
        self.items
            .iter()
            .find(|item| item.span.start <= pos && pos < item.span.end)
    }

    pub fn record_of_item(&self, item: &Item) -> Option<RecordId> {
        match item.kind {
            ItemKind::Record(r) => Some(r),
            _ => None,
        }
    }
}

/// Re-joins the tokens of `text` with canonical spacing.
pub fn normalize(text: &str) -> String {
    match lexer::lex(text) {
        Ok(tokens) => join_tokens(tokens.iter().map(|t| t.span.text(text))),
        Err(_) => text.split_whitespace().collect::<Vec<_>>().join(" "),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("a . b [ X +  e_x ]"), "a.b[X+e_x]");
        assert_eq!(normalize("const   int  x"), "const int x");
        assert_eq!(normalize("f /* c */ (1)"), "f(1)");
    }
}
