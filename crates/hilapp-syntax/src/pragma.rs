//! `#pragma hila ...` directives.

use crate::span::Span;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PragmaKind {
    /// Do not vectorize the following site loop.
    NoVector,
    /// Fields listed may be written and read through a neighbour in one loop.
    Safe(Vec<String>),
    /// Outer variables listed may be assigned inside the loop.
    Access(Vec<String>),
    /// The following function may be called from vectorized site loops.
    LoopFunction,
    Unknown(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pragma {
    pub kind: PragmaKind,
    pub span: Span,
}

impl Pragma {
    /// Parses a directive line. Returns `None` unless it is `#pragma hila`.
    pub fn parse(line: &str, span: Span) -> Option<Pragma> {
        let rest = line.trim_start().strip_prefix('#')?.trim_start();
        let rest = rest.strip_prefix("pragma")?.trim_start();
        let rest = rest.strip_prefix("hila")?;
        if !rest.is_empty() && !rest.starts_with(char::is_whitespace) {
            return None;
        }
        let rest = rest.trim();

        let (word, args) = match rest.find('(') {
            Some(open) => {
                let close = rest.rfind(')').unwrap_or(rest.len());
                let inner = if close > open { &rest[open + 1..close] } else { "" };
                (rest[..open].trim(), split_args(inner))
            }
            None => (rest, Vec::new()),
        };

        let kind = match word.to_ascii_lowercase().as_str() {
            "novector" | "no_vector" => PragmaKind::NoVector,
            "safe" => PragmaKind::Safe(args),
            "access" => PragmaKind::Access(args),
            "loop_function" | "loop function" => PragmaKind::LoopFunction,
            _ => PragmaKind::Unknown(rest.to_string()),
        };
        Some(Pragma { kind, span })
    }
}

fn split_args(inner: &str) -> Vec<String> {
    inner
        .split(',')
        .map(|s| s.split_whitespace().collect::<String>())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Returns true if any `safe` pragma in the list names `field`.
///
/// Matching is by exact token: `safe(f)` does not cover a field named `f2`.
pub fn is_safe(pragmas: &[Pragma], field: &str) -> bool {
    let field: String = field.split_whitespace().collect();
    pragmas.iter().any(|p| match &p.kind {
        PragmaKind::Safe(names) => names.iter().any(|n| *n == field),
        _ => false,
    })
}

pub fn has_kind(pragmas: &[Pragma], kind: &PragmaKind) -> bool {
    pragmas.iter().any(|p| &p.kind == kind)
}

/// Names listed in `access(...)` pragmas.
pub fn access_names(pragmas: &[Pragma]) -> impl Iterator<Item = &str> {
    pragmas
        .iter()
        .flat_map(|p| match &p.kind {
            PragmaKind::Access(names) => names.as_slice(),
            _ => [].as_slice(),
        })
        .map(String::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> Option<PragmaKind> {
        Pragma::parse(line, Span::default()).map(|p| p.kind)
    }

    #[test]
    fn test_parse_kinds() {
        assert_eq!(parse("#pragma hila novector"), Some(PragmaKind::NoVector));
        assert_eq!(
            parse("#pragma hila safe( f, g )"),
            Some(PragmaKind::Safe(vec!["f".into(), "g".into()]))
        );
        assert_eq!(
            parse("#  pragma  hila loop_function"),
            Some(PragmaKind::LoopFunction)
        );
        assert_eq!(parse("#pragma once"), None);
        assert_eq!(parse("#pragma hilax novector"), None);
        assert_eq!(parse("#include <vector>"), None);
    }

    #[test]
    fn test_safe_matches_exact_token() {
        let pragmas = vec![Pragma {
            kind: PragmaKind::Safe(vec!["f".into()]),
            span: Span::default(),
        }];
        assert!(is_safe(&pragmas, "f"));
        assert!(!is_safe(&pragmas, "f2"));
        assert!(!is_safe(&pragmas, "ff"));
    }
}
