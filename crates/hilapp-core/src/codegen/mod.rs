//! Code generation for analyzed site loops.
//!
//! Each backend is a [`CodegenStrategy`]. Strategies share the loop
//! prologue and epilogue written here, the body rewriting in
//! [`substitute`] and the communication schedule in [`comm`].

pub mod comm;
pub mod emitter;
pub mod strategies;
pub mod substitute;

use crate::analysis::refs::ReductionKind;
use crate::analysis::LoopAnalysis;
use crate::config::{Target, TranspilerConfig};
use crate::diagnostics::DiagnosticHandler;
use crate::errors::TranspileError;
use emitter::Emitter;
use hilapp_syntax::TranslationUnit;

pub use strategies::cpu::CpuStrategy;
pub use strategies::gpu::GpuStrategy;
pub use strategies::vector::VectorStrategy;

/// Name of the constant holding the parity of the generated loop.
pub const LOOP_PARITY: &str = "_HILA_loop_parity";
/// Name of the site index variable of the generated loop.
pub const SITE_INDEX: &str = "_HILA_index";

/// Everything a strategy needs to generate one loop.
pub struct LoopInput<'a> {
    pub tu: &'a TranslationUnit,
    pub analysis: &'a LoopAnalysis,
    pub config: &'a TranspilerConfig,
    pub diagnostics: &'a dyn DiagnosticHandler,
    /// Name of the kernel generated for this loop, on GPU targets.
    pub kernel_name: String,
}

impl LoopInput<'_> {
    pub fn source(&self) -> &str {
        &self.tu.source
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedLoop {
    /// Replaces the loop statement.
    pub replacement: String,
    /// Kernel definition inserted before the enclosing declaration.
    pub kernel: Option<String>,
}

/// Backend-specific code generation.
pub trait CodegenStrategy: Send + Sync {
    /// Get the name of this strategy
    fn name(&self) -> &str;

    /// Generate the code replacing one analyzed loop
    fn generate(&self, input: &LoopInput<'_>) -> Result<GeneratedLoop, TranspileError>;

    /// Specifier prepended to functions called from site loops
    fn loop_function_specifier(&self) -> Option<&'static str> {
        None
    }

    /// Lines added at the top of every generated file
    fn preamble(&self) -> Option<String> {
        None
    }
}

pub fn strategy_for(target: Target) -> Box<dyn CodegenStrategy> {
    match target {
        Target::Cpu => Box::new(CpuStrategy),
        Target::Vector => Box::new(VectorStrategy),
        Target::Cuda | Target::Hip => Box::new(GpuStrategy::new(target)),
    }
}

// ===== Shared loop pieces =====

/// Comment lines with the original loop text, so the output shows what was
/// replaced.
pub fn write_original(e: &mut Emitter, input: &LoopInput<'_>) {
    let text = input.tu.text(input.analysis.site_loop.span);
    e.write_commented("//-- ", text);
}

pub fn write_banner(e: &mut Emitter, strategy: &str, input: &LoopInput<'_>, note: &str) {
    e.write_indented(&format!(
        "// hilapp {} loop, line {}, parity {}: {}",
        strategy, input.analysis.line, input.analysis.parity, note
    ));
}

/// Output for a loop that could not be transformed: the original text is
/// left commented out.
pub fn commented_only(input: &LoopInput<'_>) -> GeneratedLoop {
    let mut e = Emitter::new();
    e.writeln("// hilapp: site loop not transformed because of errors");
    write_original(&mut e, input);
    GeneratedLoop {
        replacement: e.take_output(),
        kernel: None,
    }
}

/// Parity constant, allocation checks, hazard assertions and offset shifts.
pub fn write_prologue(e: &mut Emitter, input: &LoopInput<'_>) {
    let a = input.analysis;
    e.write_indented(&format!(
        "const Parity {} = {};",
        LOOP_PARITY, a.site_loop.parity_text
    ));
    for field in &a.fields {
        if field.is_written {
            e.write_indented(&format!("{}.check_alloc();", field.name));
        }
    }
    for field in a.fields.iter().filter(|f| f.needs_parity_assertion) {
        e.write_indented(&format!(
            "assert({} != ALL && \"field '{}' is written and read through a neighbour; parity ALL is not allowed\");",
            LOOP_PARITY, field.name
        ));
    }
    for line in comm::shift_lines(a) {
        e.write_indented(&line);
    }
}

/// Declarations of the per-loop reduction accumulators, seeded with the
/// identity of their operator.
pub fn write_reduction_accumulators(e: &mut Emitter, input: &LoopInput<'_>, ty_of: &dyn Fn(&str) -> String) {
    let a = input.analysis;
    for var in a.reductions() {
        e.write_indented(&format!(
            "{} {}({});",
            ty_of(var.ty.unqualified().as_str()),
            var.reduction_temp(),
            var.reduction.identity()
        ));
    }
    for lc in a.loop_consts.iter().filter(|c| c.reduction.is_reduction()) {
        let ty = lc
            .ty
            .as_ref()
            .map(|t| t.unqualified().to_string())
            .unwrap_or_else(|| "double".to_string());
        e.write_indented(&format!(
            "{} {}({});",
            ty_of(&ty),
            lc.temp(),
            lc.reduction.identity()
        ));
    }
}

/// `mark_changed` for written fields, selection joins and node-level
/// reductions. `local` turns an accumulator name into the expression
/// holding this node's partial result.
pub fn write_epilogue(e: &mut Emitter, input: &LoopInput<'_>, local: &dyn Fn(&str, ReductionKind) -> String) {
    let a = input.analysis;
    for field in a.fields.iter().filter(|f| f.is_written) {
        e.write_indented(&format!("{}.mark_changed({});", field.name, LOOP_PARITY));
    }
    for sel in &a.selections {
        e.write_indented(&format!("{}.join();", sel.text));
    }
    for var in a.reductions() {
        e.write_indented(&format!(
            "{} {} {}({});",
            var.name,
            var.reduction.operator(),
            var.reduction.node_reduce(),
            local(&var.reduction_temp(), var.reduction)
        ));
    }
    for lc in a.loop_consts.iter().filter(|c| c.reduction.is_reduction()) {
        e.write_indented(&format!(
            "{} {} {}({});",
            lc.text,
            lc.reduction.operator(),
            lc.reduction.node_reduce(),
            local(&lc.temp(), lc.reduction)
        ));
    }
    for array in a.arrays.iter().filter(|r| r.is_reduction_vector && r.reduction.is_reduction()) {
        e.write_indented(&format!("{}({});", array.reduction.node_reduce(), array.name));
    }
}

/// `text` with every character that cannot appear in an identifier
/// replaced by `_`.
pub fn sanitize_identifier(text: &str) -> String {
    let mut out: String = text
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    while out.contains("__") {
        out = out.replace("__", "_");
    }
    out.trim_matches('_').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_identifier() {
        assert_eq!(sanitize_identifier("Matrix3x3::apply"), "Matrix3x3_apply");
        assert_eq!(sanitize_identifier("a.f[0]"), "a_f_0");
        assert_eq!(sanitize_identifier("run"), "run");
    }
}
