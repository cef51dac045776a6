use hilapp_syntax::{SourceMap, Span};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;

/// Severity of a diagnostic, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticLevel {
    Remark,
    Warning,
    Error,
    Fatal,
}

impl fmt::Display for DiagnosticLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DiagnosticLevel::Remark => "remark",
            DiagnosticLevel::Warning => "warning",
            DiagnosticLevel::Error => "error",
            DiagnosticLevel::Fatal => "fatal error",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostic {
    pub level: DiagnosticLevel,
    pub span: Span,
    pub message: String,
}

impl Diagnostic {
    pub fn new(level: DiagnosticLevel, span: Span, message: impl Into<String>) -> Self {
        Self {
            level,
            span,
            message: message.into(),
        }
    }

    /// Renders as `file:line:col: level: message`.
    pub fn render(&self, file: &str, source_map: &SourceMap) -> String {
        let (line, col) = source_map.line_col(self.span.start);
        format!("{}:{}:{}: {}: {}", file, line, col, self.level, self.message)
    }
}

/// Sink for diagnostics produced while transpiling one translation unit.
pub trait DiagnosticHandler: Send + Sync {
    fn report(&self, diagnostic: Diagnostic);

    fn remark(&self, span: Span, message: &str) {
        self.report(Diagnostic::new(DiagnosticLevel::Remark, span, message));
    }

    fn warning(&self, span: Span, message: &str) {
        self.report(Diagnostic::new(DiagnosticLevel::Warning, span, message));
    }

    fn error(&self, span: Span, message: &str) {
        self.report(Diagnostic::new(DiagnosticLevel::Error, span, message));
    }

    fn fatal(&self, span: Span, message: &str) {
        self.report(Diagnostic::new(DiagnosticLevel::Fatal, span, message));
    }

    fn has_errors(&self) -> bool {
        self.error_count() > 0
    }

    /// Number of `Error` and `Fatal` diagnostics.
    fn error_count(&self) -> usize;

    fn get_diagnostics(&self) -> Vec<Diagnostic>;
}

/// Collects diagnostics in report order.
#[derive(Debug, Default)]
pub struct CollectingDiagnosticHandler {
    diagnostics: Mutex<Vec<Diagnostic>>,
}

impl CollectingDiagnosticHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&self) {
        self.diagnostics.lock().clear();
    }

    /// Messages of all diagnostics at `level`, in report order.
    pub fn messages(&self, level: DiagnosticLevel) -> Vec<String> {
        self.diagnostics
            .lock()
            .iter()
            .filter(|d| d.level == level)
            .map(|d| d.message.clone())
            .collect()
    }
}

impl DiagnosticHandler for CollectingDiagnosticHandler {
    fn report(&self, diagnostic: Diagnostic) {
        match diagnostic.level {
            DiagnosticLevel::Remark => tracing::debug!(message = %diagnostic.message, "remark"),
            DiagnosticLevel::Warning => tracing::debug!(message = %diagnostic.message, "warning"),
            DiagnosticLevel::Error | DiagnosticLevel::Fatal => {
                tracing::debug!(level = %diagnostic.level, message = %diagnostic.message, "error")
            }
        }
        self.diagnostics.lock().push(diagnostic);
    }

    fn error_count(&self) -> usize {
        self.diagnostics
            .lock()
            .iter()
            .filter(|d| d.level >= DiagnosticLevel::Error)
            .count()
    }

    fn get_diagnostics(&self) -> Vec<Diagnostic> {
        self.diagnostics.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collects_in_order_and_counts_errors() {
        let handler = CollectingDiagnosticHandler::new();
        handler.remark(Span::new(0, 1), "first");
        handler.error(Span::new(2, 3), "second");
        handler.warning(Span::new(4, 5), "third");
        handler.fatal(Span::new(6, 7), "fourth");

        let all = handler.get_diagnostics();
        assert_eq!(all.len(), 4);
        assert_eq!(all[0].message, "first");
        assert_eq!(handler.error_count(), 2);
        assert!(handler.has_errors());
        assert_eq!(handler.messages(DiagnosticLevel::Warning), vec!["third"]);
    }

    #[test]
    fn test_render_uses_line_and_column() {
        let source = "int a;\n  onsites(ALL) {}\n";
        let map = SourceMap::new(source);
        let d = Diagnostic::new(DiagnosticLevel::Error, Span::new(9, 16), "bad loop");
        assert_eq!(d.render("main.cpp", &map), "main.cpp:2:3: error: bad loop");
    }
}
