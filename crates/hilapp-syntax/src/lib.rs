//! Syntax layer of the hilapp transpiler: lexing, parsing and the arena
//! syntax tree of the C++ subset used by lattice programs.

pub mod ast;
pub mod builtins;
pub mod error;
pub mod lexer;
pub mod parser;
pub mod pragma;
pub mod query;
pub mod span;
pub mod types;
pub mod unit;

pub use error::SyntaxError;
pub use parser::parse;
pub use span::{SourceMap, Span};
pub use types::TypeName;
pub use unit::TranslationUnit;
