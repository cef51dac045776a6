//! Type names as normalized text.
//!
//! Types are kept as the token text the user wrote, joined with a single
//! space only between two word tokens (`const double&`,
//! `Field<Complex<double>>`). That is enough for the transpiler, which
//! substitutes type names textually and only needs a handful of structural
//! queries.

use rustc_hash::FxHashMap;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TypeName(String);

impl TypeName {
    pub fn new(text: impl Into<String>) -> Self {
        TypeName(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_const(&self) -> bool {
        self.0.starts_with("const ") || self.0.ends_with(" const") || self.0.contains(" const&")
    }

    pub fn is_reference(&self) -> bool {
        self.0.ends_with('&')
    }

    pub fn is_pointer(&self) -> bool {
        self.0.trim_end_matches(" const").ends_with('*')
    }

    pub fn is_auto(&self) -> bool {
        self.unqualified().as_str() == "auto"
    }

    /// Type without `const`/`volatile` qualifiers and references.
    pub fn unqualified(&self) -> TypeName {
        let mut s = self.0.as_str().trim();
        loop {
            let before = s;
            for prefix in ["const ", "volatile ", "typename "] {
                if let Some(rest) = s.strip_prefix(prefix) {
                    s = rest.trim_start();
                }
            }
            s = s.trim_end_matches('&');
            if let Some(rest) = s.strip_suffix(" const") {
                s = rest;
            }
            if s == before {
                break;
            }
        }
        TypeName(s.to_string())
    }

    /// Name before the first template argument list, `std::vector` for
    /// `const std::vector<int>&`.
    pub fn head(&self) -> String {
        let u = self.unqualified();
        match u.0.find('<') {
            Some(i) => u.0[..i].to_string(),
            None => u.0,
        }
    }

    /// Last component of the head, `vector` for `std::vector<int>`.
    pub fn short_head(&self) -> String {
        let head = self.head();
        match head.rfind("::") {
            Some(i) => head[i + 2..].to_string(),
            None => head,
        }
    }

    /// Top-level template arguments of the unqualified type.
    pub fn template_args(&self) -> Vec<TypeName> {
        let u = self.unqualified();
        let s = u.as_str();
        let Some(open) = s.find('<') else {
            return Vec::new();
        };
        let mut args = Vec::new();
        let mut depth = 0usize;
        let mut start = open + 1;
        for (i, c) in s.char_indices().skip(open) {
            match c {
                '<' | '(' => depth += 1,
                '>' | ')' => {
                    depth -= 1;
                    if depth == 0 {
                        let arg = s[start..i].trim();
                        if !arg.is_empty() {
                            args.push(TypeName::new(arg));
                        }
                        break;
                    }
                }
                ',' if depth == 1 => {
                    args.push(TypeName::new(s[start..i].trim()));
                    start = i + 1;
                }
                _ => {}
            }
        }
        args
    }

    pub fn is_field(&self) -> bool {
        matches!(self.head().as_str(), "Field" | "hila::Field")
    }

    /// Element type of a `Field<T>`.
    pub fn field_element(&self) -> Option<TypeName> {
        if self.is_field() {
            self.template_args().into_iter().next()
        } else {
            None
        }
    }

    /// Element type of a container indexed with `[]`.
    pub fn container_element(&self) -> Option<TypeName> {
        match self.short_head().as_str() {
            "vector" | "array" | "ReductionVector" | "Field" => {
                self.template_args().into_iter().next()
            }
            _ => None,
        }
    }

    /// Replaces identifier tokens found in `map`.
    pub fn substitute(&self, map: &FxHashMap<String, String>) -> TypeName {
        TypeName(substitute_tokens(&self.0, map))
    }
}

impl fmt::Display for TypeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TypeName {
    fn from(s: &str) -> Self {
        TypeName::new(s)
    }
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Joins token texts, inserting a space only between two word tokens.
pub fn join_tokens<'a>(tokens: impl IntoIterator<Item = &'a str>) -> String {
    let mut out = String::new();
    for tok in tokens {
        let needs_space = matches!(
            (out.chars().last(), tok.chars().next()),
            (Some(a), Some(b)) if is_word_char(a) && is_word_char(b)
        );
        // `const` after `*` or `&` binds to the declarator
        if needs_space || (tok == "const" && out.ends_with(['*', '&'])) {
            out.push(' ');
        }
        out.push_str(tok);
    }
    out
}

/// Replaces whole identifier tokens in `text` using `map`, leaving string
/// and character literals and comments alone.
pub fn substitute_tokens(text: &str, map: &FxHashMap<String, String>) -> String {
    if map.is_empty() {
        return text.to_string();
    }
    let bytes = text.as_bytes();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        if c == b'"' || c == b'\'' {
            let start = i;
            i += 1;
            while i < bytes.len() && bytes[i] != c {
                if bytes[i] == b'\\' {
                    i += 1;
                }
                i += 1;
            }
            i = (i + 1).min(bytes.len());
            out.push_str(&text[start..i]);
        } else if c == b'/' && bytes.get(i + 1) == Some(&b'/') {
            let end = text[i..].find('\n').map_or(text.len(), |n| i + n);
            out.push_str(&text[i..end]);
            i = end;
        } else if c == b'/' && bytes.get(i + 1) == Some(&b'*') {
            let end = text[i + 2..].find("*/").map_or(text.len(), |n| i + 2 + n + 2);
            out.push_str(&text[i..end]);
            i = end;
        } else if c.is_ascii_alphabetic() || c == b'_' {
            let start = i;
            while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                i += 1;
            }
            let word = &text[start..i];
            match map.get(word) {
                Some(rep) => out.push_str(rep),
                None => out.push_str(word),
            }
        } else if c.is_ascii_digit() {
            // keep numeric suffixes such as `1e5f` intact
            let start = i;
            while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'.') {
                i += 1;
            }
            out.push_str(&text[start..i]);
        } else {
            let ch = text[i..].chars().next().unwrap_or(' ');
            out.push(ch);
            i += ch.len_utf8();
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unqualified_and_head() {
        let t = TypeName::new("const Field<Complex<double>>&");
        assert!(t.is_const());
        assert!(t.is_reference());
        assert_eq!(t.unqualified().as_str(), "Field<Complex<double>>");
        assert_eq!(t.head(), "Field");
        assert!(t.is_field());
        assert_eq!(t.field_element().unwrap().as_str(), "Complex<double>");
    }

    #[test]
    fn test_template_args_top_level_only() {
        let t = TypeName::new("Matrix<3,3,Complex<double>>");
        let args: Vec<_> = t.template_args().into_iter().map(|a| a.to_string()).collect();
        assert_eq!(args, vec!["3", "3", "Complex<double>"]);
        assert!(TypeName::new("double").template_args().is_empty());
    }

    #[test]
    fn test_join_tokens() {
        assert_eq!(join_tokens(["const", "double", "&"]), "const double&");
        assert_eq!(
            join_tokens(["std", "::", "vector", "<", "int", ">"]),
            "std::vector<int>"
        );
        assert_eq!(join_tokens(["double", "*", "const"]), "double* const");
    }

    #[test]
    fn test_substitute_tokens_whole_words() {
        let mut map = FxHashMap::default();
        map.insert("T".to_string(), "Matrix3x3".to_string());
        assert_eq!(
            substitute_tokens("Field<T>& f, T TT; \"T\" // T\n", &map),
            "Field<Matrix3x3>& f, Matrix3x3 TT; \"T\" // T\n"
        );
    }

    #[test]
    fn test_container_element() {
        assert_eq!(
            TypeName::new("std::vector<double>").container_element(),
            Some(TypeName::new("double"))
        );
        assert_eq!(
            TypeName::new("ReductionVector<Complex<float>>").container_element(),
            Some(TypeName::new("Complex<float>"))
        );
        assert_eq!(TypeName::new("int").container_element(), None);
    }
}
