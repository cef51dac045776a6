use crate::lexer::LexError;
use crate::span::Span;

#[derive(Debug, Clone, thiserror::Error)]
pub enum SyntaxError {
    #[error(transparent)]
    Lex(#[from] LexError),

    #[error("expected {expected}, found '{found}'")]
    Unexpected {
        expected: String,
        found: String,
        span: Span,
    },

    #[error("unexpected end of input, expected {expected}")]
    UnexpectedEof { expected: String },

    #[error("unsupported construct: {what}")]
    Unsupported { what: String, span: Span },
}

impl SyntaxError {
    pub fn span(&self) -> Option<Span> {
        match self {
            SyntaxError::Lex(e) => Some(e.span),
            SyntaxError::Unexpected { span, .. } | SyntaxError::Unsupported { span, .. } => {
                Some(*span)
            }
            SyntaxError::UnexpectedEof { .. } => None,
        }
    }
}
