//! Lexer for the hilapp C++ subset.
//!
//! Uses Logos for tokenization. Keywords are lexed as identifiers and
//! recognized by the parser, since most C++ keywords only matter in a few
//! positions. `>>` is never produced: the parser joins adjacent `>` tokens
//! so that nested template argument lists close naturally.

use crate::span::Span;
use logos::Logos;

#[derive(Logos, Debug, Clone, Copy, PartialEq)]
#[logos(skip r"[ \t\r\n\f]+")]
pub enum Token<'src> {
    // === Comments ===
    #[regex(r"//[^\n]*", logos::skip, allow_greedy = true)]
    #[regex(r"/\*([^*]|\*+[^*/])*\*+/", logos::skip)]
    Comment,

    /// A whole preprocessor line, including `#pragma hila ...`.
    #[regex(r"#[^\n]*", |lex| lex.slice(), allow_greedy = true)]
    Directive(&'src str),

    #[regex(r"[A-Za-z_][A-Za-z0-9_]*", |lex| lex.slice())]
    Ident(&'src str),

    #[regex(r"[0-9]+[uUlL]*", |lex| lex.slice())]
    #[regex(r"0[xX][0-9a-fA-F]+[uUlL]*", |lex| lex.slice())]
    Int(&'src str),

    #[regex(r"[0-9]+\.[0-9]*([eE][+-]?[0-9]+)?[fFlL]?", |lex| lex.slice())]
    #[regex(r"\.[0-9]+([eE][+-]?[0-9]+)?[fFlL]?", |lex| lex.slice())]
    #[regex(r"[0-9]+[eE][+-]?[0-9]+[fFlL]?", |lex| lex.slice())]
    Float(&'src str),

    #[regex(r#""([^"\\\n]|\\.)*""#, |lex| lex.slice())]
    Str(&'src str),

    #[regex(r"'([^'\\\n]|\\.)*'", |lex| lex.slice())]
    Char(&'src str),

    // === Punctuation ===
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token(";")]
    Semi,
    #[token(",")]
    Comma,
    #[token("::")]
    ColonColon,
    #[token(":")]
    Colon,
    #[token("?")]
    Question,
    #[token(".")]
    Dot,
    #[token("->")]
    Arrow,
    #[token("...")]
    Ellipsis,

    // === Operators ===
    #[token("=")]
    Assign,
    #[token("+=")]
    PlusAssign,
    #[token("-=")]
    MinusAssign,
    #[token("*=")]
    StarAssign,
    #[token("/=")]
    SlashAssign,
    #[token("%=")]
    PercentAssign,
    #[token("&=")]
    AmpAssign,
    #[token("|=")]
    PipeAssign,
    #[token("^=")]
    CaretAssign,
    #[token("<<=")]
    ShlAssign,
    #[token("++")]
    PlusPlus,
    #[token("--")]
    MinusMinus,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token("==")]
    EqEq,
    #[token("!=")]
    NotEq,
    #[token("<=")]
    LtEq,
    #[token(">=")]
    GtEq,
    #[token("<")]
    Lt,
    #[token(">")]
    Gt,
    #[token("<<")]
    Shl,
    #[token("&&")]
    AndAnd,
    #[token("||")]
    OrOr,
    #[token("!")]
    Bang,
    #[token("~")]
    Tilde,
    #[token("&")]
    Amp,
    #[token("|")]
    Pipe,
    #[token("^")]
    Caret,
}

impl<'src> Token<'src> {
    pub fn ident(&self) -> Option<&'src str> {
        match self {
            Token::Ident(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_ident(&self, text: &str) -> bool {
        matches!(self, Token::Ident(s) if *s == text)
    }
}

/// A token with its source span
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Spanned<T> {
    pub token: T,
    pub span: Span,
}

impl<T> Spanned<T> {
    pub fn new(token: T, span: Span) -> Self {
        Self { token, span }
    }
}

/// Tokenize source code into a vector of spanned tokens
pub fn lex(source: &str) -> Result<Vec<Spanned<Token<'_>>>, LexError> {
    let mut lexer = Token::lexer(source);
    let mut tokens = Vec::new();

    while let Some(result) = lexer.next() {
        match result {
            Ok(Token::Comment) => {}
            Ok(token) => tokens.push(Spanned::new(token, lexer.span().into())),
            Err(()) => {
                return Err(LexError {
                    span: lexer.span().into(),
                    slice: lexer.slice().to_string(),
                });
            }
        }
    }

    Ok(tokens)
}

/// Error during lexing
#[derive(Debug, Clone, thiserror::Error)]
#[error("unexpected character(s) '{slice}' at {span}")]
pub struct LexError {
    pub span: Span,
    pub slice: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<Token<'_>> {
        lex(src).unwrap().into_iter().map(|t| t.token).collect()
    }

    #[test]
    fn test_site_loop_tokens() {
        let toks = kinds("onsites(ALL) f[X + e_x] += 1.5;");
        assert_eq!(toks[0], Token::Ident("onsites"));
        assert_eq!(toks[2], Token::Ident("ALL"));
        assert!(toks.contains(&Token::PlusAssign));
        assert!(toks.contains(&Token::Float("1.5")));
        assert_eq!(*toks.last().unwrap(), Token::Semi);
    }

    #[test]
    fn test_comments_skipped() {
        let toks = kinds("a /* block * comment */ b // line\n c");
        assert_eq!(
            toks,
            vec![Token::Ident("a"), Token::Ident("b"), Token::Ident("c")]
        );
    }

    #[test]
    fn test_directive_keeps_line() {
        let toks = kinds("#pragma hila safe(f)\nint x;");
        assert_eq!(toks[0], Token::Directive("#pragma hila safe(f)"));
        assert_eq!(toks[1], Token::Ident("int"));
    }

    #[test]
    fn test_nested_template_close_is_two_tokens() {
        let toks = kinds("Field<Complex<double>> f;");
        let gts = toks.iter().filter(|t| **t == Token::Gt).count();
        assert_eq!(gts, 2);
    }

    #[test]
    fn test_numbers() {
        assert_eq!(kinds("42u"), vec![Token::Int("42u")]);
        assert_eq!(kinds("0x1F"), vec![Token::Int("0x1F")]);
        assert_eq!(kinds("1e-3"), vec![Token::Float("1e-3")]);
        assert_eq!(kinds("2.0f"), vec![Token::Float("2.0f")]);
    }

    #[test]
    fn test_spans() {
        let toks = lex("ab  cd").unwrap();
        assert_eq!(toks[1].span, Span::new(4, 6));
    }
}
