//! Site-loop transpiler core.
//!
//! [`Transpiler`] drives one translation unit through specialization of
//! generic code, per-loop analysis ([`analysis`]) and backend code
//! generation ([`codegen`]). Usage errors are reported through a
//! [`DiagnosticHandler`]; only internal failures abort a unit.

pub mod analysis;
pub mod codegen;
pub mod config;
pub mod diagnostics;
pub mod errors;
pub mod rewrite;
pub mod specialize;
pub mod transpiler;

pub use analysis::{analyze_loop, find_site_loops, LoopAnalysis, SiteLoop};
pub use codegen::{strategy_for, CodegenStrategy};
pub use config::{ConfigError, Target, TranspilerConfig};
pub use diagnostics::{CollectingDiagnosticHandler, Diagnostic, DiagnosticHandler, DiagnosticLevel};
pub use errors::TranspileError;
pub use rewrite::EditList;
pub use transpiler::{TranspileOutput, Transpiler};
