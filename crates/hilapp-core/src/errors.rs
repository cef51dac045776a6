use crate::config::ConfigError;
use hilapp_syntax::{Span, SyntaxError};

/// Errors that abort a whole translation unit.
///
/// Usage errors in the transpiled program are not represented here; they are
/// reported through the [`DiagnosticHandler`](crate::diagnostics::DiagnosticHandler)
/// and the unit continues.
#[derive(Debug, thiserror::Error)]
pub enum TranspileError {
    #[error("syntax error: {0}")]
    Syntax(#[from] SyntaxError),

    #[error("internal error: {message}")]
    Fatal { message: String, span: Option<Span> },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl TranspileError {
    pub fn fatal(message: impl Into<String>, span: impl Into<Option<Span>>) -> Self {
        TranspileError::Fatal {
            message: message.into(),
            span: span.into(),
        }
    }

    pub fn span(&self) -> Option<Span> {
        match self {
            TranspileError::Syntax(e) => e.span(),
            TranspileError::Fatal { span, .. } => *span,
            TranspileError::Config(_) => None,
        }
    }
}
