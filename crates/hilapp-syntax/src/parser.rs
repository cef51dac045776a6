//! Recursive-descent parser for the hilapp C++ subset.
//!
//! The parser resolves identifiers to declarations while it goes, using a
//! scope stack, and decides between declarations and expressions with the
//! usual "is this name a type" heuristic: builtin and library types,
//! records, aliases and template parameters seen so far are types, and two
//! identifiers in a row always start a declaration.

use crate::ast::*;
use crate::builtins;
use crate::error::SyntaxError;
use crate::lexer::{lex, Spanned, Token};
use crate::pragma::Pragma;
use crate::span::Span;
use crate::types::{join_tokens, TypeName};
use crate::unit::TranslationUnit;
use rustc_hash::{FxHashMap, FxHashSet};

type PResult<T> = Result<T, SyntaxError>;

/// Parses a whole source file.
pub fn parse(source: &str) -> Result<TranslationUnit, SyntaxError> {
    let tokens = lex(source)?;
    let mut parser = Parser::new(source, tokens);
    parser.parse_unit()?;
    tracing::trace!(
        items = parser.tu.items.len(),
        functions = parser.tu.functions.len(),
        "parsed translation unit"
    );
    Ok(parser.tu)
}

#[derive(Default)]
struct Specifiers {
    is_static: bool,
    is_extern: bool,
    is_inline: bool,
    is_constexpr: bool,
    spans: Vec<Span>,
}

#[derive(Clone, Copy, PartialEq)]
enum DeclContext {
    Global,
    Member(RecordId),
}

struct Parser<'src> {
    src: &'src str,
    tokens: Vec<Spanned<Token<'src>>>,
    pos: usize,
    tu: TranslationUnit,
    scopes: Vec<FxHashMap<String, DeclId>>,
    type_names: FxHashSet<String>,
    template_names: FxHashSet<String>,
    pending_pragmas: Vec<Pragma>,
    member_scope: Option<RecordId>,
}

impl<'src> Parser<'src> {
    fn new(src: &'src str, tokens: Vec<Spanned<Token<'src>>>) -> Self {
        Self {
            src,
            tokens,
            pos: 0,
            tu: TranslationUnit::empty(src),
            scopes: vec![FxHashMap::default()],
            type_names: FxHashSet::default(),
            template_names: FxHashSet::default(),
            pending_pragmas: Vec::new(),
            member_scope: None,
        }
    }

    // =========================================================================
    // Token helpers
    // =========================================================================

    fn peek(&self) -> Option<Token<'src>> {
        self.peek_at(0)
    }

    fn peek_at(&self, n: usize) -> Option<Token<'src>> {
        self.tokens.get(self.pos + n).map(|t| t.token)
    }

    fn peek_span(&self) -> Span {
        match self.tokens.get(self.pos) {
            Some(t) => t.span,
            None => Span::point(self.src.len()),
        }
    }

    fn prev_end(&self) -> usize {
        if self.pos == 0 {
            0
        } else {
            self.tokens[self.pos - 1].span.end
        }
    }

    fn bump(&mut self) -> Option<Spanned<Token<'src>>> {
        let t = self.tokens.get(self.pos).copied();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn at(&self, tok: Token<'_>) -> bool {
        self.peek() == Some(tok)
    }

    fn at_ident(&self, text: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(s)) if s == text)
    }

    fn eat(&mut self, tok: Token<'_>) -> bool {
        if self.at(tok) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_ident(&mut self, text: &str) -> bool {
        if self.at_ident(text) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn error(&self, expected: &str) -> SyntaxError {
        match self.tokens.get(self.pos) {
            Some(t) => SyntaxError::Unexpected {
                expected: expected.to_string(),
                found: t.span.text(self.src).to_string(),
                span: t.span,
            },
            None => SyntaxError::UnexpectedEof {
                expected: expected.to_string(),
            },
        }
    }

    fn unsupported(&self, what: &str) -> SyntaxError {
        SyntaxError::Unsupported {
            what: what.to_string(),
            span: self.peek_span(),
        }
    }

    fn expect(&mut self, tok: Token<'_>, what: &str) -> PResult<Span> {
        if self.at(tok) {
            let span = self.peek_span();
            self.pos += 1;
            Ok(span)
        } else {
            Err(self.error(what))
        }
    }

    fn expect_ident(&mut self) -> PResult<(&'src str, Span)> {
        match self.tokens.get(self.pos) {
            Some(Spanned {
                token: Token::Ident(s),
                span,
            }) => {
                let out = (*s, *span);
                self.pos += 1;
                Ok(out)
            }
            _ => Err(self.error("identifier")),
        }
    }

    fn token_text(&self, index: usize) -> &'src str {
        self.tokens[index].span.text(self.src)
    }

    /// Skips a balanced `(..)`, `{..}` or `[..]` group starting at the
    /// current token.
    fn skip_balanced(&mut self) -> PResult<()> {
        let mut depth = 0usize;
        loop {
            let Some(t) = self.bump() else {
                return Err(self.error("closing bracket"));
            };
            match t.token {
                Token::LParen | Token::LBrace | Token::LBracket => depth += 1,
                Token::RParen | Token::RBrace | Token::RBracket => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        return Ok(());
                    }
                }
                _ => {}
            }
        }
    }

    /// Skips tokens up to and including the next top-level `;`.
    fn skip_to_semi(&mut self) -> PResult<()> {
        while let Some(t) = self.peek() {
            match t {
                Token::Semi => {
                    self.pos += 1;
                    return Ok(());
                }
                Token::LParen | Token::LBrace | Token::LBracket => self.skip_balanced()?,
                _ => self.pos += 1,
            }
        }
        Err(self.error("';'"))
    }

    // =========================================================================
    // Scopes
    // =========================================================================

    fn push_scope(&mut self) {
        self.scopes.push(FxHashMap::default());
    }

    fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    fn declare(&mut self, name: &str, id: DeclId) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), id);
        }
    }

    fn lookup(&self, name: &str) -> Option<DeclId> {
        for scope in self.scopes.iter().rev() {
            if let Some(id) = scope.get(name) {
                return Some(*id);
            }
        }
        let record = self.member_scope?;
        self.member_named(record, name)
    }

    fn member_named(&self, record: RecordId, name: &str) -> Option<DeclId> {
        self.tu.records[record]
            .members
            .iter()
            .copied()
            .find(|d| self.tu.decls[*d].name == name)
    }

    fn is_type_name(&self, name: &str) -> bool {
        builtins::is_builtin_type(name)
            || builtins::is_library_type(name)
            || self.type_names.contains(name)
    }

    fn is_template_name(&self, name: &str) -> bool {
        builtins::is_library_template(name) || self.template_names.contains(name)
    }

    // =========================================================================
    // Top level
    // =========================================================================

    fn parse_unit(&mut self) -> PResult<()> {
        while self.peek().is_some() {
            if let Some(item) = self.parse_item()? {
                self.tu.items.push(item);
            }
        }
        Ok(())
    }

    fn parse_item(&mut self) -> PResult<Option<Item>> {
        let start = self.peek_span().start;
        let Some(tok) = self.peek() else {
            return Ok(None);
        };
        match tok {
            Token::Directive(text) => {
                let span = self.peek_span();
                self.pos += 1;
                match Pragma::parse(text, span) {
                    Some(p) => self.pending_pragmas.push(p),
                    None => self.pending_pragmas.clear(),
                }
                Ok(Some(Item {
                    kind: ItemKind::Directive,
                    span,
                }))
            }
            Token::Semi => {
                self.pos += 1;
                Ok(None)
            }
            Token::Ident("template") => self.parse_template_item(DeclContext::Global),
            Token::Ident("struct") | Token::Ident("class") if self.is_record_definition() => {
                self.parse_record(None, start)
            }
            Token::Ident("using") => self.parse_using(start),
            Token::Ident("typedef") => self.parse_typedef(start),
            Token::Ident("enum") => self.parse_enum(start),
            Token::Ident("namespace") => Err(self.unsupported("namespace blocks")),
            _ => self.parse_decl_or_function(None, start, DeclContext::Global),
        }
    }

    fn is_record_definition(&self) -> bool {
        matches!(self.peek_at(1), Some(Token::Ident(_)))
            && matches!(
                self.peek_at(2),
                Some(Token::LBrace) | Some(Token::Colon) | Some(Token::Semi) | Some(Token::Ident("final"))
            )
    }

    fn parse_template_item(&mut self, ctx: DeclContext) -> PResult<Option<Item>> {
        let start = self.peek_span().start;
        self.pos += 1; // template
        self.expect(Token::Lt, "'<' after template")?;
        let params = self.parse_template_params()?;

        let added: Vec<String> = params
            .iter()
            .filter(|p| p.kind == TemplateParamKind::Type && self.type_names.insert(p.name.clone()))
            .map(|p| p.name.clone())
            .collect();

        let result = if (self.at_ident("struct") || self.at_ident("class"))
            && self.is_record_definition()
        {
            self.parse_record(Some(params), start)
        } else {
            self.parse_decl_or_function(Some(params), start, ctx)
        };

        for name in added {
            self.type_names.remove(&name);
        }
        result
    }

    fn parse_template_params(&mut self) -> PResult<Vec<TemplateParam>> {
        let mut params = Vec::new();
        if self.eat(Token::Gt) {
            return Ok(params);
        }
        loop {
            let kind = if self.eat_ident("typename") || self.eat_ident("class") {
                TemplateParamKind::Type
            } else {
                let (ty, _) = self.parse_type()?;
                TemplateParamKind::Value(ty)
            };
            self.eat(Token::Ellipsis);
            let (name, _) = self.expect_ident()?;
            if self.eat(Token::Assign) {
                self.skip_template_default()?;
            }
            params.push(TemplateParam {
                name: name.to_string(),
                kind,
            });
            if self.eat(Token::Comma) {
                continue;
            }
            self.expect(Token::Gt, "'>' closing template parameters")?;
            return Ok(params);
        }
    }

    fn skip_template_default(&mut self) -> PResult<()> {
        let mut depth = 0usize;
        while let Some(t) = self.peek() {
            match t {
                Token::Lt | Token::LParen => depth += 1,
                Token::RParen => depth = depth.saturating_sub(1),
                Token::Gt if depth == 0 => return Ok(()),
                Token::Gt => depth -= 1,
                Token::Comma if depth == 0 => return Ok(()),
                _ => {}
            }
            self.pos += 1;
        }
        Err(self.error("'>'"))
    }

    fn parse_record(
        &mut self,
        template_params: Option<Vec<TemplateParam>>,
        start: usize,
    ) -> PResult<Option<Item>> {
        let (keyword, _) = self.expect_ident()?;
        let (name, _) = self.expect_ident()?;
        let name = name.to_string();
        self.type_names.insert(name.clone());
        if template_params.is_some() {
            self.template_names.insert(name.clone());
        }
        self.eat_ident("final");
        if self.eat(Token::Semi) {
            return Ok(None);
        }
        if self.eat(Token::Colon) {
            while !self.at(Token::LBrace) {
                if self.bump().is_none() {
                    return Err(self.error("'{'"));
                }
            }
        }

        let rid = self.tu.records.alloc(Record {
            name: name.clone(),
            is_class: keyword == "class",
            template_params,
            members: Vec::new(),
            methods: Vec::new(),
            span: Span::point(start),
        });
        self.tu.records_by_name.insert(name, rid);

        self.expect(Token::LBrace, "'{'")?;
        let outer = self.member_scope.replace(rid);
        self.push_scope();
        let body = self.parse_record_body(rid);
        self.pop_scope();
        self.member_scope = outer;
        body?;

        // trailing declarators, `} instance;`
        while !self.at(Token::Semi) {
            if self.bump().is_none() {
                return Err(self.error("';' after record"));
            }
        }
        self.pos += 1;

        let span = Span::new(start, self.prev_end());
        self.tu.records[rid].span = span;
        self.resolve_late_members(rid);
        Ok(Some(Item {
            kind: ItemKind::Record(rid),
            span,
        }))
    }

    fn parse_record_body(&mut self, rid: RecordId) -> PResult<()> {
        loop {
            let start = self.peek_span().start;
            match self.peek() {
                None => return Err(self.error("'}'")),
                Some(Token::RBrace) => {
                    self.pos += 1;
                    return Ok(());
                }
                Some(Token::Semi) => self.pos += 1,
                Some(Token::Directive(text)) => {
                    let span = self.peek_span();
                    self.pos += 1;
                    if let Some(p) = Pragma::parse(text, span) {
                        self.pending_pragmas.push(p);
                    }
                }
                Some(Token::Ident("public" | "private" | "protected"))
                    if self.peek_at(1) == Some(Token::Colon) =>
                {
                    self.pos += 2;
                }
                Some(Token::Ident("friend")) | Some(Token::Ident("static_assert")) => {
                    self.skip_member()?
                }
                Some(Token::Ident("using")) => {
                    self.parse_using(start)?;
                }
                Some(Token::Ident("typedef")) => {
                    self.parse_typedef(start)?;
                }
                Some(Token::Ident("enum")) => {
                    self.parse_enum(start)?;
                }
                Some(Token::Ident("struct" | "class")) if self.is_record_definition() => {
                    self.parse_record(None, start)?;
                }
                Some(Token::Ident("template")) => {
                    self.parse_template_item(DeclContext::Member(rid))?;
                }
                _ => {
                    self.parse_decl_or_function(None, start, DeclContext::Member(rid))?;
                }
            }
        }
    }

    fn skip_member(&mut self) -> PResult<()> {
        while let Some(t) = self.peek() {
            match t {
                Token::Semi => {
                    self.pos += 1;
                    return Ok(());
                }
                Token::LBrace => return self.skip_balanced(),
                Token::LParen | Token::LBracket => self.skip_balanced()?,
                _ => self.pos += 1,
            }
        }
        Err(self.error("';'"))
    }

    /// In-class method bodies may use members declared further down.
    fn resolve_late_members(&mut self, rid: RecordId) {
        let span = self.tu.records[rid].span;
        let members: FxHashMap<String, DeclId> = self.tu.records[rid]
            .members
            .iter()
            .map(|d| (self.tu.decls[*d].name.clone(), *d))
            .collect();
        for (_, expr) in self.tu.exprs.iter_mut() {
            if !span.contains(expr.span) {
                continue;
            }
            if let ExprKind::Ident(name) = &mut expr.kind {
                if name.decl.is_none() {
                    if let Some(d) = members.get(&name.text) {
                        name.decl = Some(*d);
                    }
                }
            }
        }
    }

    fn parse_using(&mut self, start: usize) -> PResult<Option<Item>> {
        self.pos += 1; // using
        if self.at_ident("namespace") || self.peek_at(1) != Some(Token::Assign) {
            self.skip_to_semi()?;
            return Ok(Some(Item {
                kind: ItemKind::Directive,
                span: Span::new(start, self.prev_end()),
            }));
        }
        let (name, _) = self.expect_ident()?;
        self.expect(Token::Assign, "'='")?;
        let (ty, _) = self.parse_type()?;
        self.expect(Token::Semi, "';'")?;
        Ok(Some(self.register_alias(name, ty, start)))
    }

    fn parse_typedef(&mut self, start: usize) -> PResult<Option<Item>> {
        self.pos += 1; // typedef
        let (ty, _) = self.parse_type()?;
        let (name, _) = self.expect_ident()?;
        self.expect(Token::Semi, "';'")?;
        Ok(Some(self.register_alias(name, ty, start)))
    }

    fn register_alias(&mut self, name: &str, ty: TypeName, start: usize) -> Item {
        self.type_names.insert(name.to_string());
        self.tu.aliases.insert(name.to_string(), ty.clone());
        Item {
            kind: ItemKind::Alias {
                name: name.to_string(),
                ty,
            },
            span: Span::new(start, self.prev_end()),
        }
    }

    fn parse_enum(&mut self, start: usize) -> PResult<Option<Item>> {
        self.pos += 1; // enum
        let scoped = self.eat_ident("class") || self.eat_ident("struct");
        let name = match self.peek() {
            Some(Token::Ident(n)) => {
                self.pos += 1;
                n.to_string()
            }
            _ => "int".to_string(),
        };
        self.type_names.insert(name.clone());
        if self.eat(Token::Colon) {
            self.parse_type()?;
        }
        if self.eat(Token::Semi) {
            return Ok(None);
        }
        self.expect(Token::LBrace, "'{'")?;
        let mut next_value = 0i64;
        while !self.eat(Token::RBrace) {
            let (ename, espan) = self.expect_ident()?;
            let init = if self.eat(Token::Assign) {
                Some(self.parse_assignment()?)
            } else {
                None
            };
            if let Some(e) = init {
                next_value = self.tu.const_int(e).unwrap_or(next_value);
            }
            let id = self.tu.decls.alloc(Decl {
                name: ename.to_string(),
                ty: TypeName::new(name.clone()),
                ty_span: espan,
                name_span: espan,
                span: Span::new(espan.start, self.prev_end()),
                init,
                array_dims: Vec::new(),
                kind: DeclKind::Enumerator,
                is_static: false,
                is_extern: false,
                is_constexpr: true,
                default_span: None,
                enum_value: Some(next_value),
            });
            next_value += 1;
            if !scoped {
                self.declare(ename, id);
            }
            if !self.eat(Token::Comma) {
                self.expect(Token::RBrace, "'}'")?;
                break;
            }
        }
        self.expect(Token::Semi, "';'")?;
        Ok(Some(Item {
            kind: ItemKind::Enum,
            span: Span::new(start, self.prev_end()),
        }))
    }

    fn parse_specifiers(&mut self) -> Specifiers {
        let mut spec = Specifiers::default();
        while let Some(Token::Ident(word)) = self.peek() {
            let span = self.peek_span();
            match word {
                "static" => spec.is_static = true,
                "extern" => spec.is_extern = true,
                "inline" => spec.is_inline = true,
                "constexpr" => spec.is_constexpr = true,
                "virtual" | "explicit" | "mutable" | "register" => {}
                _ => break,
            }
            spec.spans.push(span);
            self.pos += 1;
        }
        spec
    }

    fn parse_decl_or_function(
        &mut self,
        template_params: Option<Vec<TemplateParam>>,
        start: usize,
        ctx: DeclContext,
    ) -> PResult<Option<Item>> {
        let pragmas = std::mem::take(&mut self.pending_pragmas);
        let signature_start = self.peek_span().start;
        let spec = self.parse_specifiers();

        // constructors and destructors have no return type
        if let DeclContext::Member(rid) = ctx {
            let rname = self.tu.records[rid].name.clone();
            let is_ctor = self.at_ident(&rname) && self.peek_at(1) == Some(Token::LParen);
            let is_dtor = self.at(Token::Tilde);
            if is_ctor || is_dtor {
                let name_start = self.peek_span().start;
                self.eat(Token::Tilde);
                self.expect_ident()?;
                let name = Span::new(name_start, self.prev_end()).text(self.src).to_string();
                let name_span = Span::new(name_start, self.prev_end());
                return self
                    .parse_function_rest(FunctionHeader {
                        name,
                        qualifier: None,
                        explicit_args: Vec::new(),
                        ret: TypeName::default(),
                        template_params,
                        start,
                        signature_start,
                        name_span,
                        spec,
                        pragmas,
                        ctx,
                    })
                    .map(Some);
            }
        }

        let (ty, ty_span) = self.parse_type()?;

        // out-of-line constructors and destructors, `Foo::Foo(...)`,
        // `Foo::~Foo()`
        let out_of_line = if self.at(Token::ColonColon) && self.peek_at(1) == Some(Token::Tilde) {
            self.pos += 2;
            let (dtor, _) = self.expect_ident()?;
            Some((Some(ty.clone()), format!("~{}", dtor)))
        } else if self.at(Token::LParen) && ty.as_str().contains("::") {
            let text = ty.as_str();
            let split = text.rfind("::").unwrap_or(0);
            Some((
                Some(TypeName::new(&text[..split])),
                text[split + 2..].to_string(),
            ))
        } else {
            None
        };
        if let Some((qualifier, name)) = out_of_line {
            return self
                .parse_function_rest(FunctionHeader {
                    name,
                    qualifier,
                    explicit_args: Vec::new(),
                    ret: TypeName::default(),
                    template_params,
                    start,
                    signature_start,
                    name_span: ty_span,
                    spec,
                    pragmas,
                    ctx,
                })
                .map(Some);
        }

        let name_start = self.peek_span().start;
        let (qualifier, name, explicit_args) = self.parse_declarator_name()?;
        let name_span = Span::new(name_start, self.prev_end());

        if self.at(Token::LParen) {
            return self
                .parse_function_rest(FunctionHeader {
                    name,
                    qualifier,
                    explicit_args,
                    ret: ty,
                    template_params,
                    start,
                    signature_start,
                    name_span,
                    spec,
                    pragmas,
                    ctx,
                })
                .map(Some);
        }

        if template_params.is_some() {
            // variable templates
            self.skip_to_semi()?;
            return Ok(None);
        }
        if qualifier.is_some() {
            // out-of-line static member definition
            self.skip_to_semi()?;
            return Ok(None);
        }

        let kind = match ctx {
            DeclContext::Global => DeclKind::Global,
            DeclContext::Member(rid) => DeclKind::Member(rid),
        };
        let decls = self.parse_var_declarators(
            start,
            &spec,
            ty,
            ty_span,
            Some((name, name_span)),
            kind,
        )?;

        match ctx {
            DeclContext::Member(rid) => {
                self.tu.records[rid].members.extend(decls);
                Ok(None)
            }
            DeclContext::Global => {
                let span = Span::new(start, self.prev_end());
                let stmt = self.tu.stmts.alloc(Stmt {
                    kind: StmtKind::Decl(decls),
                    span,
                    pragmas,
                });
                Ok(Some(Item {
                    kind: ItemKind::Globals(stmt),
                    span,
                }))
            }
        }
    }

    /// `name`, `Wrapper<T>::name`, `apply<double>`, `operator+=`.
    fn parse_declarator_name(&mut self) -> PResult<(Option<TypeName>, String, Vec<TypeName>)> {
        let mut parts: Vec<String> = Vec::new();
        let mut explicit_args = Vec::new();
        loop {
            let (word, _) = self.expect_ident()?;
            let mut part = word.to_string();
            if word == "operator" {
                if self.at(Token::LParen) && self.peek_at(1) == Some(Token::RParen) {
                    self.pos += 2;
                    part.push_str("()");
                }
                while !self.at(Token::LParen) {
                    let Some(t) = self.bump() else {
                        return Err(self.error("operator symbol"));
                    };
                    part.push_str(t.span.text(self.src));
                }
            } else if self.at(Token::Lt) && self.is_template_name(word) {
                let args = self.parse_template_args()?;
                if self.at(Token::ColonColon) {
                    part = join_tokens(
                        std::iter::once(word)
                            .chain(std::iter::once("<"))
                            .chain(comma_separated(&args).iter().map(String::as_str))
                            .chain(std::iter::once(">")),
                    );
                } else {
                    explicit_args = args;
                }
            }
            parts.push(part);
            if self.at(Token::ColonColon) {
                self.pos += 1;
                if self.eat(Token::Tilde) {
                    let (dtor, _) = self.expect_ident()?;
                    parts.push(format!("~{}", dtor));
                    break;
                }
                continue;
            }
            break;
        }
        let name = parts.pop().unwrap_or_default();
        let qualifier = if parts.is_empty() {
            None
        } else {
            Some(TypeName::new(parts.join("::")))
        };
        Ok((qualifier, name, explicit_args))
    }

    fn parse_function_rest(&mut self, header: FunctionHeader) -> PResult<Item> {
        let FunctionHeader {
            name,
            qualifier,
            explicit_args,
            ret,
            template_params,
            start,
            signature_start,
            name_span,
            spec,
            pragmas,
            ctx,
        } = header;

        let record = match (&qualifier, ctx) {
            (_, DeclContext::Member(rid)) => Some(rid),
            (Some(q), DeclContext::Global) => self.tu.record_named(&q.head()),
            (None, DeclContext::Global) => None,
        };

        let is_generic = matches!(&template_params, Some(p) if !p.is_empty());
        let fid = self.tu.functions.alloc(Function {
            name: name.clone(),
            qualifier: qualifier.clone(),
            record,
            template_params,
            explicit_args,
            ret,
            params: Vec::new(),
            body: None,
            span: Span::point(start),
            signature_start,
            name_span,
            specifier_spans: spec.spans.clone(),
            is_inline: spec.is_inline,
            pragmas,
        });
        self.tu
            .functions_by_name
            .entry(name.clone())
            .or_default()
            .push(fid);
        if is_generic {
            self.template_names.insert(name.clone());
        }

        let outer_members = self.member_scope;
        if record.is_some() {
            self.member_scope = record;
        }
        self.push_scope();
        let result = self.parse_params_and_body(fid);
        self.pop_scope();
        self.member_scope = outer_members;
        result?;

        let span = Span::new(start, self.prev_end());
        self.tu.functions[fid].span = span;
        if let Some(rid) = record {
            if matches!(ctx, DeclContext::Member(_)) {
                self.tu.records[rid].methods.push(fid);
            }
        }
        Ok(Item {
            kind: ItemKind::Function(fid),
            span,
        })
    }

    fn parse_params_and_body(&mut self, fid: FunctionId) -> PResult<()> {
        self.expect(Token::LParen, "'('")?;
        let params = self.parse_params()?;
        self.tu.functions[fid].params = params;

        // trailing qualifiers
        loop {
            if self.eat_ident("const")
                || self.eat_ident("noexcept")
                || self.eat_ident("override")
                || self.eat_ident("final")
            {
                continue;
            }
            if self.eat(Token::Arrow) {
                self.parse_type()?;
                continue;
            }
            break;
        }

        if self.eat(Token::Assign) {
            // = 0, = default, = delete
            self.skip_to_semi()?;
            return Ok(());
        }
        if self.eat(Token::Colon) {
            self.skip_member_initializers()?;
        }
        if self.eat(Token::Semi) {
            return Ok(());
        }
        let body = self.parse_block_stmt()?;
        self.tu.functions[fid].body = Some(body);
        Ok(())
    }

    fn skip_member_initializers(&mut self) -> PResult<()> {
        loop {
            while !matches!(self.peek(), Some(Token::LParen) | Some(Token::LBrace) | None) {
                self.pos += 1;
            }
            self.skip_balanced()?;
            if !self.eat(Token::Comma) {
                return Ok(());
            }
        }
    }

    fn parse_params(&mut self) -> PResult<Vec<DeclId>> {
        let mut params = Vec::new();
        if self.eat(Token::RParen) {
            return Ok(params);
        }
        if self.at_ident("void") && self.peek_at(1) == Some(Token::RParen) {
            self.pos += 2;
            return Ok(params);
        }
        loop {
            if self.eat(Token::Ellipsis) {
                self.expect(Token::RParen, "')'")?;
                return Ok(params);
            }
            let spec = self.parse_specifiers();
            let (ty, ty_span) = self.parse_type()?;
            let (name, name_span) = match self.peek() {
                Some(Token::Ident(n)) if !builtins::is_reserved_word(n) => {
                    let span = self.peek_span();
                    self.pos += 1;
                    (n.to_string(), span)
                }
                _ => (String::new(), Span::point(ty_span.end)),
            };
            let array_dims = self.parse_array_dims()?;
            let mut init = None;
            let mut default_span = None;
            if self.at(Token::Assign) {
                let eq = self.peek_span().start;
                self.pos += 1;
                init = Some(self.parse_assignment()?);
                default_span = Some(Span::new(eq, self.prev_end()));
            }
            let id = self.tu.decls.alloc(Decl {
                name: name.clone(),
                ty,
                ty_span,
                name_span,
                span: Span::new(ty_span.start, self.prev_end()),
                init,
                array_dims,
                kind: DeclKind::Param,
                is_static: false,
                is_extern: false,
                is_constexpr: spec.is_constexpr,
                default_span,
                enum_value: None,
            });
            if !name.is_empty() {
                self.declare(&name, id);
            }
            params.push(id);
            if self.eat(Token::Comma) {
                continue;
            }
            self.expect(Token::RParen, "')' closing parameters")?;
            return Ok(params);
        }
    }

    fn parse_array_dims(&mut self) -> PResult<Vec<Option<ExprId>>> {
        let mut dims = Vec::new();
        while self.eat(Token::LBracket) {
            if self.eat(Token::RBracket) {
                dims.push(None);
            } else {
                let e = self.parse_expr()?;
                self.expect(Token::RBracket, "']'")?;
                dims.push(Some(e));
            }
        }
        Ok(dims)
    }

    fn parse_var_declarators(
        &mut self,
        start: usize,
        spec: &Specifiers,
        ty: TypeName,
        ty_span: Span,
        mut first: Option<(String, Span)>,
        kind: DeclKind,
    ) -> PResult<Vec<DeclId>> {
        let mut decls = Vec::new();
        loop {
            let decl_start = if decls.is_empty() {
                start
            } else {
                self.peek_span().start
            };
            let mut this_ty = ty.clone();
            let (name, name_span) = match first.take() {
                Some(n) => n,
                None => {
                    let mut extra = Vec::new();
                    while matches!(self.peek(), Some(Token::Star) | Some(Token::Amp)) {
                        extra.push(self.token_text(self.pos));
                        self.pos += 1;
                    }
                    if !extra.is_empty() {
                        this_ty = TypeName::new(format!("{}{}", ty, extra.concat()));
                    }
                    let (n, s) = self.expect_ident()?;
                    (n.to_string(), s)
                }
            };
            let array_dims = self.parse_array_dims()?;
            let init = if self.eat(Token::Assign) {
                Some(self.parse_assignment()?)
            } else if self.at(Token::LParen) {
                let open = self.peek_span().start;
                self.pos += 1;
                let args = self.parse_call_args()?;
                Some(self.alloc_expr(
                    ExprKind::Construct {
                        ty: this_ty.clone(),
                        args,
                    },
                    Span::new(open, self.prev_end()),
                ))
            } else if self.at(Token::LBrace) {
                Some(self.parse_primary()?.0)
            } else {
                None
            };
            let id = self.tu.decls.alloc(Decl {
                name: name.clone(),
                ty: this_ty,
                ty_span,
                name_span,
                span: Span::new(decl_start, self.prev_end()),
                init,
                array_dims,
                kind,
                is_static: spec.is_static,
                is_extern: spec.is_extern,
                is_constexpr: spec.is_constexpr,
                default_span: None,
                enum_value: None,
            });
            self.declare(&name, id);
            decls.push(id);
            if !self.eat(Token::Comma) {
                break;
            }
        }
        self.expect(Token::Semi, "';' after declaration")?;
        Ok(decls)
    }

    // =========================================================================
    // Types
    // =========================================================================

    /// Parses a type, including cv-qualifiers, template arguments and
    /// trailing `*`/`&`.
    fn parse_type(&mut self) -> PResult<(TypeName, Span)> {
        let start = self.peek_span().start;
        let mut toks: Vec<String> = Vec::new();

        while let Some(Token::Ident(w)) = self.peek() {
            match w {
                "const" | "volatile" => toks.push(w.to_string()),
                "typename" | "struct" | "class" => {}
                _ => break,
            }
            self.pos += 1;
        }

        const FUNDAMENTAL: [&str; 10] = [
            "unsigned", "signed", "long", "short", "int", "char", "double", "float", "bool", "void",
        ];
        match self.peek() {
            Some(Token::Ident(w)) if FUNDAMENTAL.contains(&w) => {
                while let Some(Token::Ident(w)) = self.peek() {
                    if !FUNDAMENTAL.contains(&w) {
                        break;
                    }
                    toks.push(w.to_string());
                    self.pos += 1;
                }
            }
            Some(Token::Ident(_)) | Some(Token::ColonColon) => {
                let mut path: Vec<String> = Vec::new();
                if self.eat(Token::ColonColon) {
                    path.push("::".into());
                }
                loop {
                    let (w, _) = self.expect_ident()?;
                    path.push(w.to_string());
                    if self.at(Token::Lt) {
                        let args = self.parse_template_args()?;
                        path.push("<".into());
                        path.extend(comma_separated(&args));
                        path.push(">".into());
                    }
                    if self.at(Token::ColonColon)
                        && matches!(self.peek_at(1), Some(Token::Ident(_)))
                    {
                        self.pos += 1;
                        path.push("::".into());
                        continue;
                    }
                    break;
                }
                toks.extend(path);
            }
            _ => return Err(self.error("type")),
        }

        loop {
            match self.peek() {
                Some(Token::Ident("const")) | Some(Token::Ident("volatile")) => {
                    toks.push(self.token_text(self.pos).to_string());
                }
                Some(Token::Star) => toks.push("*".into()),
                Some(Token::Amp) => toks.push("&".into()),
                Some(Token::AndAnd) => toks.push("&&".into()),
                _ => break,
            }
            self.pos += 1;
        }

        let text = join_tokens(toks.iter().map(String::as_str));
        Ok((TypeName::new(text), Span::new(start, self.prev_end())))
    }

    /// `<A, B<C>, 3>`; each argument is kept as normalized text.
    fn parse_template_args(&mut self) -> PResult<Vec<TypeName>> {
        self.expect(Token::Lt, "'<'")?;
        let mut args = Vec::new();
        let mut current: Vec<&'src str> = Vec::new();
        let mut depth = 0usize;
        loop {
            let Some(t) = self.bump() else {
                return Err(self.error("'>' closing template arguments"));
            };
            let text = t.span.text(self.src);
            match t.token {
                Token::Lt | Token::LParen => {
                    depth += 1;
                    current.push(text);
                }
                Token::RParen => {
                    depth = depth.saturating_sub(1);
                    current.push(text);
                }
                Token::Gt if depth == 0 => {
                    if !current.is_empty() {
                        args.push(TypeName::new(join_tokens(current.drain(..))));
                    }
                    return Ok(args);
                }
                Token::Gt => {
                    depth -= 1;
                    current.push(text);
                }
                Token::Comma if depth == 0 => {
                    args.push(TypeName::new(join_tokens(current.drain(..))));
                }
                Token::Semi | Token::LBrace | Token::RBrace => {
                    return Err(SyntaxError::Unexpected {
                        expected: "template argument".into(),
                        found: text.to_string(),
                        span: t.span,
                    })
                }
                _ => current.push(text),
            }
        }
    }

    /// Scans a possibly qualified name with template arguments starting at
    /// token `i` without consuming anything. Returns the head text and the
    /// index after the name.
    fn scan_name(&self, mut i: usize) -> Option<(String, usize)> {
        let mut head = String::new();
        loop {
            let Some(Token::Ident(w)) = self.tokens.get(i).map(|t| t.token) else {
                return None;
            };
            head.push_str(w);
            i += 1;
            if self.tokens.get(i).map(|t| t.token) == Some(Token::Lt) && self.is_template_name(&head)
            {
                let mut depth = 0usize;
                loop {
                    match self.tokens.get(i).map(|t| t.token) {
                        Some(Token::Lt) => depth += 1,
                        Some(Token::Gt) => {
                            depth -= 1;
                            if depth == 0 {
                                i += 1;
                                break;
                            }
                        }
                        Some(Token::Semi) | Some(Token::LBrace) | None => return None,
                        _ => {}
                    }
                    i += 1;
                }
            }
            if self.tokens.get(i).map(|t| t.token) == Some(Token::ColonColon) {
                head.push_str("::");
                i += 1;
                continue;
            }
            return Some((head, i));
        }
    }

    fn looks_like_declaration(&self) -> bool {
        let Some(Token::Ident(w)) = self.peek() else {
            return false;
        };
        if builtins::is_decl_specifier(w) || builtins::is_builtin_type(w) {
            return true;
        }
        if builtins::is_reserved_word(w) {
            return false;
        }
        let Some((head, mut i)) = self.scan_name(self.pos) else {
            return false;
        };
        let known = self.is_type_name(&head);
        if known {
            while matches!(
                self.tokens.get(i).map(|t| t.token),
                Some(Token::Star) | Some(Token::Amp) | Some(Token::AndAnd) | Some(Token::Ident("const"))
            ) {
                i += 1;
            }
        }
        matches!(
            self.tokens.get(i).map(|t| t.token),
            Some(Token::Ident(n)) if !builtins::is_reserved_word(n) || n == "const"
        )
    }

    // =========================================================================
    // Statements
    // =========================================================================

    fn alloc_stmt(&mut self, kind: StmtKind, start: usize, pragmas: Vec<Pragma>) -> StmtId {
        let span = Span::new(start, self.prev_end());
        self.tu.stmts.alloc(Stmt {
            kind,
            span,
            pragmas,
        })
    }

    fn parse_block_stmt(&mut self) -> PResult<StmtId> {
        let start = self.peek_span().start;
        self.expect(Token::LBrace, "'{'")?;
        self.push_scope();
        let mut stmts = Vec::new();
        let result = loop {
            if self.eat(Token::RBrace) {
                break Ok(());
            }
            if self.peek().is_none() {
                break Err(self.error("'}'"));
            }
            match self.parse_stmt() {
                Ok(s) => stmts.push(s),
                Err(e) => break Err(e),
            }
        };
        self.pop_scope();
        result?;
        Ok(self.alloc_stmt(StmtKind::Block(stmts), start, Vec::new()))
    }

    fn parse_stmt(&mut self) -> PResult<StmtId> {
        if let Some(Token::Directive(text)) = self.peek() {
            let span = self.peek_span();
            self.pos += 1;
            match Pragma::parse(text, span) {
                Some(p) => {
                    self.pending_pragmas.push(p);
                    return self.parse_stmt();
                }
                None => {
                    return Ok(self.tu.stmts.alloc(Stmt {
                        kind: StmtKind::Directive,
                        span,
                        pragmas: Vec::new(),
                    }))
                }
            }
        }

        let pragmas = std::mem::take(&mut self.pending_pragmas);
        let start = self.peek_span().start;
        let kind = match self.peek() {
            None => return Err(self.error("statement")),
            Some(Token::LBrace) => {
                let block = self.parse_block_stmt()?;
                if pragmas.is_empty() {
                    return Ok(block);
                }
                self.tu.stmts[block].pragmas = pragmas;
                return Ok(block);
            }
            Some(Token::Semi) => {
                self.pos += 1;
                StmtKind::Empty
            }
            Some(Token::Ident("if")) => {
                self.pos += 1;
                self.expect(Token::LParen, "'(' after if")?;
                let cond = self.parse_expr()?;
                self.expect(Token::RParen, "')'")?;
                let then_branch = self.parse_scoped_stmt()?;
                let else_branch = if self.eat_ident("else") {
                    Some(self.parse_scoped_stmt()?)
                } else {
                    None
                };
                StmtKind::If {
                    cond,
                    then_branch,
                    else_branch,
                }
            }
            Some(Token::Ident("for")) => {
                self.pos += 1;
                self.expect(Token::LParen, "'(' after for")?;
                self.push_scope();
                let result = self.parse_for_rest();
                self.pop_scope();
                result?
            }
            Some(Token::Ident("while")) => {
                self.pos += 1;
                self.expect(Token::LParen, "'(' after while")?;
                let cond = self.parse_expr()?;
                self.expect(Token::RParen, "')'")?;
                let body = self.parse_scoped_stmt()?;
                StmtKind::While { cond, body }
            }
            Some(Token::Ident("do")) => {
                self.pos += 1;
                let body = self.parse_scoped_stmt()?;
                if !self.eat_ident("while") {
                    return Err(self.error("'while'"));
                }
                self.expect(Token::LParen, "'('")?;
                let cond = self.parse_expr()?;
                self.expect(Token::RParen, "')'")?;
                self.expect(Token::Semi, "';'")?;
                StmtKind::DoWhile { body, cond }
            }
            Some(Token::Ident("switch")) => {
                self.pos += 1;
                self.expect(Token::LParen, "'(' after switch")?;
                let cond = self.parse_expr()?;
                self.expect(Token::RParen, "')'")?;
                let body = self.parse_scoped_stmt()?;
                StmtKind::Switch { cond, body }
            }
            Some(Token::Ident("case")) => {
                self.pos += 1;
                let value = self.parse_conditional()?;
                self.expect(Token::Colon, "':' after case")?;
                StmtKind::Case(Some(value))
            }
            Some(Token::Ident("default")) if self.peek_at(1) == Some(Token::Colon) => {
                self.pos += 2;
                StmtKind::Case(None)
            }
            Some(Token::Ident("return")) => {
                self.pos += 1;
                let value = if self.at(Token::Semi) {
                    None
                } else {
                    Some(self.parse_expr()?)
                };
                self.expect(Token::Semi, "';'")?;
                StmtKind::Return(value)
            }
            Some(Token::Ident("break")) => {
                self.pos += 1;
                self.expect(Token::Semi, "';'")?;
                StmtKind::Break
            }
            Some(Token::Ident("continue")) => {
                self.pos += 1;
                self.expect(Token::Semi, "';'")?;
                StmtKind::Continue
            }
            Some(Token::Ident("onsites")) => {
                self.pos += 1;
                self.expect(Token::LParen, "'(' after onsites")?;
                let parity = self.parse_expr()?;
                self.expect(Token::RParen, "')'")?;
                let body = self.parse_scoped_stmt()?;
                StmtKind::Onsites { parity, body }
            }
            Some(Token::Ident("foralldir")) => {
                self.pos += 1;
                self.expect(Token::LParen, "'(' after foralldir")?;
                let (name, span) = self.expect_ident()?;
                self.expect(Token::RParen, "')'")?;
                self.push_scope();
                let var = self.tu.decls.alloc(Decl {
                    name: name.to_string(),
                    ty: TypeName::new("Direction"),
                    ty_span: span,
                    name_span: span,
                    span,
                    init: None,
                    array_dims: Vec::new(),
                    kind: DeclKind::DirectionLoop,
                    is_static: false,
                    is_extern: false,
                    is_constexpr: false,
                    default_span: None,
                    enum_value: None,
                });
                self.declare(name, var);
                let body = self.parse_stmt();
                self.pop_scope();
                StmtKind::Foralldir { var, body: body? }
            }
            Some(Token::Ident("template"))
            | Some(Token::Ident("namespace"))
            | Some(Token::Ident("new"))
            | Some(Token::Ident("delete")) => {
                return Err(self.unsupported("statement"));
            }
            _ if self.looks_like_declaration() => {
                let spec = self.parse_specifiers();
                let (ty, ty_span) = self.parse_type()?;
                let decls =
                    self.parse_var_declarators(start, &spec, ty, ty_span, None, DeclKind::Local)?;
                StmtKind::Decl(decls)
            }
            _ => {
                let e = self.parse_expr()?;
                self.expect(Token::Semi, "';' after expression")?;
                StmtKind::Expr(e)
            }
        };
        Ok(self.alloc_stmt(kind, start, pragmas))
    }

    fn parse_scoped_stmt(&mut self) -> PResult<StmtId> {
        self.push_scope();
        let s = self.parse_stmt();
        self.pop_scope();
        s
    }

    fn parse_for_rest(&mut self) -> PResult<StmtKind> {
        let init = if self.at(Token::Semi) {
            self.pos += 1;
            None
        } else {
            let s = self.parse_stmt()?;
            if matches!(self.tu.stmts[s].kind, StmtKind::Empty) {
                None
            } else {
                Some(s)
            }
        };
        if self.at(Token::Colon) {
            return Err(self.unsupported("range-based for"));
        }
        let cond = if self.at(Token::Semi) {
            None
        } else {
            Some(self.parse_expr()?)
        };
        self.expect(Token::Semi, "';' in for")?;
        let step = if self.at(Token::RParen) {
            None
        } else {
            Some(self.parse_expr()?)
        };
        self.expect(Token::RParen, "')' closing for")?;
        let body = self.parse_scoped_stmt()?;
        Ok(StmtKind::For {
            init,
            cond,
            step,
            body,
        })
    }

    // =========================================================================
    // Expressions
    // =========================================================================

    fn alloc_expr(&mut self, kind: ExprKind, span: Span) -> ExprId {
        self.tu.exprs.alloc(Expr { kind, span })
    }

    fn span_from(&self, start: usize) -> Span {
        Span::new(start, self.prev_end())
    }

    fn parse_expr(&mut self) -> PResult<ExprId> {
        let start = self.peek_span().start;
        let mut lhs = self.parse_assignment()?;
        while self.eat(Token::Comma) {
            let rhs = self.parse_assignment()?;
            lhs = self.alloc_expr(
                ExprKind::Binary {
                    op: BinaryOp::Comma,
                    lhs,
                    rhs,
                },
                self.span_from(start),
            );
        }
        Ok(lhs)
    }

    fn parse_assignment(&mut self) -> PResult<ExprId> {
        let start = self.peek_span().start;
        let lhs = self.parse_conditional()?;
        let op = match self.peek() {
            Some(Token::Assign) => AssignOp::Assign,
            Some(Token::PlusAssign) => AssignOp::Add,
            Some(Token::MinusAssign) => AssignOp::Sub,
            Some(Token::StarAssign) => AssignOp::Mul,
            Some(Token::SlashAssign) => AssignOp::Div,
            Some(Token::PercentAssign) => AssignOp::Rem,
            Some(Token::AmpAssign) => AssignOp::BitAnd,
            Some(Token::PipeAssign) => AssignOp::BitOr,
            Some(Token::CaretAssign) => AssignOp::BitXor,
            Some(Token::ShlAssign) => AssignOp::Shl,
            _ => return Ok(lhs),
        };
        self.pos += 1;
        let rhs = self.parse_assignment()?;
        Ok(self.alloc_expr(ExprKind::Assign { op, lhs, rhs }, self.span_from(start)))
    }

    fn parse_conditional(&mut self) -> PResult<ExprId> {
        let start = self.peek_span().start;
        let cond = self.parse_binary(1)?;
        if !self.eat(Token::Question) {
            return Ok(cond);
        }
        let then_expr = self.parse_expr()?;
        self.expect(Token::Colon, "':' in conditional")?;
        let else_expr = self.parse_assignment()?;
        Ok(self.alloc_expr(
            ExprKind::Conditional {
                cond,
                then_expr,
                else_expr,
            },
            self.span_from(start),
        ))
    }

    /// Binary operator at the current position with its precedence and the
    /// number of tokens it spans.
    fn peek_binary_op(&self) -> Option<(BinaryOp, u8, usize)> {
        let op = match self.peek()? {
            Token::OrOr => (BinaryOp::Or, 1, 1),
            Token::AndAnd => (BinaryOp::And, 2, 1),
            Token::Pipe => (BinaryOp::BitOr, 3, 1),
            Token::Caret => (BinaryOp::BitXor, 4, 1),
            Token::Amp => (BinaryOp::BitAnd, 5, 1),
            Token::EqEq => (BinaryOp::Eq, 6, 1),
            Token::NotEq => (BinaryOp::Ne, 6, 1),
            Token::Lt => (BinaryOp::Lt, 7, 1),
            Token::LtEq => (BinaryOp::Le, 7, 1),
            Token::GtEq => (BinaryOp::Ge, 7, 1),
            Token::Gt => {
                let adjacent = self.peek_at(1) == Some(Token::Gt)
                    && self.tokens[self.pos + 1].span.start == self.tokens[self.pos].span.end;
                if adjacent {
                    (BinaryOp::Shr, 8, 2)
                } else {
                    (BinaryOp::Gt, 7, 1)
                }
            }
            Token::Shl => (BinaryOp::Shl, 8, 1),
            Token::Plus => (BinaryOp::Add, 9, 1),
            Token::Minus => (BinaryOp::Sub, 9, 1),
            Token::Star => (BinaryOp::Mul, 10, 1),
            Token::Slash => (BinaryOp::Div, 10, 1),
            Token::Percent => (BinaryOp::Rem, 10, 1),
            _ => return None,
        };
        Some(op)
    }

    fn parse_binary(&mut self, min_prec: u8) -> PResult<ExprId> {
        let start = self.peek_span().start;
        let mut lhs = self.parse_unary()?;
        while let Some((op, prec, width)) = self.peek_binary_op() {
            if prec < min_prec {
                break;
            }
            self.pos += width;
            let rhs = self.parse_binary(prec + 1)?;
            lhs = self.alloc_expr(ExprKind::Binary { op, lhs, rhs }, self.span_from(start));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> PResult<ExprId> {
        let start = self.peek_span().start;
        let op = match self.peek() {
            Some(Token::Minus) => Some(UnaryOp::Neg),
            Some(Token::Plus) => Some(UnaryOp::Plus),
            Some(Token::Bang) => Some(UnaryOp::Not),
            Some(Token::Tilde) => Some(UnaryOp::BitNot),
            Some(Token::Star) => Some(UnaryOp::Deref),
            Some(Token::Amp) => Some(UnaryOp::AddrOf),
            Some(Token::PlusPlus) => Some(UnaryOp::PreInc),
            Some(Token::MinusMinus) => Some(UnaryOp::PreDec),
            _ => None,
        };
        if let Some(op) = op {
            self.pos += 1;
            let operand = self.parse_unary()?;
            return Ok(self.alloc_expr(ExprKind::Unary { op, operand }, self.span_from(start)));
        }
        if self.at(Token::LParen) {
            if let Some(cast) = self.try_parse_cast(start)? {
                return Ok(cast);
            }
        }
        self.parse_postfix()
    }

    /// `(Type) expr`, only when the parenthesized name is a known type.
    fn try_parse_cast(&mut self, start: usize) -> PResult<Option<ExprId>> {
        let Some(Token::Ident(w)) = self.peek_at(1) else {
            return Ok(None);
        };
        if !(self.is_type_name(w) || w == "const") || self.lookup(w).is_some() {
            return Ok(None);
        }
        let saved = self.pos;
        self.pos += 1;
        let ty = match self.parse_type() {
            Ok((ty, _)) if self.at(Token::RParen) => ty,
            _ => {
                self.pos = saved;
                return Ok(None);
            }
        };
        self.pos += 1;
        if matches!(
            self.peek(),
            None | Some(Token::Semi) | Some(Token::RParen) | Some(Token::Comma)
        ) {
            self.pos = saved;
            return Ok(None);
        }
        let operand = self.parse_unary()?;
        Ok(Some(self.alloc_expr(
            ExprKind::Construct {
                ty,
                args: vec![operand],
            },
            self.span_from(start),
        )))
    }

    fn parse_postfix(&mut self) -> PResult<ExprId> {
        let start = self.peek_span().start;
        let (mut expr, mut template_args) = self.parse_primary()?;
        loop {
            match self.peek() {
                Some(Token::LParen) => {
                    self.pos += 1;
                    let args = self.parse_call_args()?;
                    expr = self.alloc_expr(
                        ExprKind::Call {
                            callee: expr,
                            template_args: template_args.take().unwrap_or_default(),
                            args,
                        },
                        self.span_from(start),
                    );
                }
                Some(Token::LBracket) => {
                    self.pos += 1;
                    let index = self.parse_expr()?;
                    self.expect(Token::RBracket, "']'")?;
                    expr = self.alloc_expr(ExprKind::Index { base: expr, index }, self.span_from(start));
                }
                Some(Token::Dot) | Some(Token::Arrow) => {
                    let arrow = self.at(Token::Arrow);
                    self.pos += 1;
                    self.eat_ident("template");
                    let (member, _) = self.expect_ident()?;
                    expr = self.alloc_expr(
                        ExprKind::Member {
                            base: expr,
                            member: member.to_string(),
                            arrow,
                        },
                        self.span_from(start),
                    );
                }
                Some(Token::PlusPlus) | Some(Token::MinusMinus) => {
                    let op = if self.at(Token::PlusPlus) {
                        UnaryOp::PostInc
                    } else {
                        UnaryOp::PostDec
                    };
                    self.pos += 1;
                    expr = self.alloc_expr(ExprKind::Unary { op, operand: expr }, self.span_from(start));
                }
                _ => return Ok(expr),
            }
        }
    }

    /// Arguments after an already consumed `(`, through the closing `)`.
    fn parse_call_args(&mut self) -> PResult<Vec<ExprId>> {
        let mut args = Vec::new();
        if self.eat(Token::RParen) {
            return Ok(args);
        }
        loop {
            args.push(self.parse_assignment()?);
            if self.eat(Token::Comma) {
                continue;
            }
            self.expect(Token::RParen, "')' closing arguments")?;
            return Ok(args);
        }
    }

    fn parse_init_list(&mut self) -> PResult<Vec<ExprId>> {
        self.expect(Token::LBrace, "'{'")?;
        let mut items = Vec::new();
        loop {
            if self.eat(Token::RBrace) {
                return Ok(items);
            }
            items.push(self.parse_assignment()?);
            if !self.eat(Token::Comma) {
                self.expect(Token::RBrace, "'}'")?;
                return Ok(items);
            }
        }
    }

    /// Returns the expression and explicit template arguments that belong
    /// to a following call.
    fn parse_primary(&mut self) -> PResult<(ExprId, Option<Vec<TypeName>>)> {
        let start = self.peek_span().start;
        let Some(tok) = self.peek() else {
            return Err(self.error("expression"));
        };
        let kind = match tok {
            Token::Int(text) => {
                self.pos += 1;
                ExprKind::IntLit(parse_int(text))
            }
            Token::Float(text) => {
                self.pos += 1;
                let single = text.ends_with(['f', 'F']);
                let digits = text.trim_end_matches(['f', 'F', 'l', 'L']);
                ExprKind::FloatLit {
                    value: digits.parse().unwrap_or(0.0),
                    single,
                }
            }
            Token::Str(_) => {
                while matches!(self.peek(), Some(Token::Str(_))) {
                    self.pos += 1;
                }
                ExprKind::StrLit
            }
            Token::Char(_) => {
                self.pos += 1;
                ExprKind::CharLit
            }
            Token::LParen => {
                self.pos += 1;
                let inner = self.parse_expr()?;
                self.expect(Token::RParen, "')'")?;
                ExprKind::Paren(inner)
            }
            Token::LBrace => ExprKind::InitList(self.parse_init_list()?),
            Token::Ident("true") => {
                self.pos += 1;
                ExprKind::BoolLit(true)
            }
            Token::Ident("false") => {
                self.pos += 1;
                ExprKind::BoolLit(false)
            }
            Token::Ident("this") => {
                self.pos += 1;
                ExprKind::This
            }
            Token::Ident(_) | Token::ColonColon => return self.parse_name_expr(start),
            _ => return Err(self.error("expression")),
        };
        Ok((self.alloc_expr(kind, self.span_from(start)), None))
    }

    fn parse_name_expr(&mut self, start: usize) -> PResult<(ExprId, Option<Vec<TypeName>>)> {
        // functional casts and temporaries, `double(x)`, `Complex<double>{1, 0}`
        if let Some((head, after)) = self.scan_name(self.pos) {
            let is_type = (self.is_type_name(&head) || builtins::is_builtin_type(&head))
                && self.lookup(&head).is_none();
            let next = self.tokens.get(after).map(|t| t.token);
            if is_type && matches!(next, Some(Token::LParen) | Some(Token::LBrace)) {
                let (ty, _) = self.parse_type()?;
                let args = if self.eat(Token::LParen) {
                    self.parse_call_args()?
                } else {
                    self.parse_init_list()?
                };
                let id = self.alloc_expr(ExprKind::Construct { ty, args }, self.span_from(start));
                return Ok((id, None));
            }
        }

        let mut text = String::new();
        if self.eat(Token::ColonColon) {
            text.push_str("::");
        }
        let (first, _) = self.expect_ident()?;
        text.push_str(first);
        while self.at(Token::ColonColon) && matches!(self.peek_at(1), Some(Token::Ident(_))) {
            self.pos += 1;
            let (w, _) = self.expect_ident()?;
            text.push_str("::");
            text.push_str(w);
        }

        let mut template_args = None;
        if self.at(Token::Lt) && self.template_names.contains(&text) && self.lookup(&text).is_none() {
            let saved = self.pos;
            match self.parse_template_args() {
                Ok(args) if self.at(Token::LParen) => template_args = Some(args),
                _ => self.pos = saved,
            }
        }

        let decl = if text.contains("::") {
            None
        } else {
            self.lookup(&text)
        };
        let span = Span::new(start, self.prev_end());
        let id = self.alloc_expr(ExprKind::Ident(Name { text, decl }), span);
        Ok((id, template_args))
    }
}

struct FunctionHeader {
    name: String,
    qualifier: Option<TypeName>,
    explicit_args: Vec<TypeName>,
    ret: TypeName,
    template_params: Option<Vec<TemplateParam>>,
    start: usize,
    signature_start: usize,
    name_span: Span,
    spec: Specifiers,
    pragmas: Vec<Pragma>,
    ctx: DeclContext,
}

/// Template arguments separated by commas, as a token list.
fn comma_separated(args: &[TypeName]) -> Vec<String> {
    let mut out = Vec::new();
    for (i, a) in args.iter().enumerate() {
        if i > 0 {
            out.push(",".to_string());
        }
        out.push(a.to_string());
    }
    out
}

fn parse_int(text: &str) -> i64 {
    let digits = text.trim_end_matches(['u', 'U', 'l', 'L']);
    let value = if let Some(hex) = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        u64::from_str_radix(hex, 16).unwrap_or(0)
    } else {
        digits.parse::<u64>().unwrap_or(0)
    };
    value as i64
}
