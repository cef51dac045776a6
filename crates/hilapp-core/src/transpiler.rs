//! Translation unit driver: specialization, loop analysis, code generation
//! and the final rewrite of the source.

use crate::analysis::{analyze_loop, find_site_loops, LoopAnalysis};
use crate::codegen::{commented_only, sanitize_identifier, strategy_for, CodegenStrategy, LoopInput};
use crate::config::TranspilerConfig;
use crate::diagnostics::{DiagnosticHandler, DiagnosticLevel};
use crate::errors::TranspileError;
use crate::rewrite::EditList;
use crate::specialize;
use hilapp_syntax::ast::FunctionId;
use hilapp_syntax::{parse, Span, TranslationUnit};
use rustc_hash::FxHashSet;
use std::sync::Arc;

/// Priority of the file header, ahead of kernels inserted at offset 0.
const HEADER_PRIORITY: i32 = 100;

#[derive(Debug)]
pub struct TranspileOutput {
    pub code: String,
    /// Source after specialization; diagnostic spans refer to this text.
    pub source: String,
    pub loops: Vec<LoopAnalysis>,
    /// Names of the specializations added to the unit.
    pub specializations: Vec<String>,
}

pub struct Transpiler {
    config: TranspilerConfig,
    diagnostics: Arc<dyn DiagnosticHandler>,
    strategy: Box<dyn CodegenStrategy>,
}

impl Transpiler {
    pub fn new(config: TranspilerConfig, diagnostics: Arc<dyn DiagnosticHandler>) -> Self {
        let strategy = strategy_for(config.target);
        Self {
            config,
            diagnostics,
            strategy,
        }
    }

    pub fn config(&self) -> &TranspilerConfig {
        &self.config
    }

    pub fn diagnostics(&self) -> &Arc<dyn DiagnosticHandler> {
        &self.diagnostics
    }

    /// Rewrites every site loop of `source` for the configured target.
    pub fn transpile(&self, source: &str) -> Result<TranspileOutput, TranspileError> {
        self.run(source, true)
    }

    /// Runs the analysis only; the returned code is the specialized source.
    pub fn analyze(&self, source: &str) -> Result<TranspileOutput, TranspileError> {
        self.run(source, false)
    }

    fn run(&self, source: &str, generate: bool) -> Result<TranspileOutput, TranspileError> {
        self.config.validate()?;
        let diagnostics = &*self.diagnostics;
        let (source, specializations) = specialize::expand(source, diagnostics)?;
        let tu = parse(&source)?;

        let mut edits = EditList::new();
        let mut loops = Vec::new();
        let mut memo: FxHashSet<FunctionId> = FxHashSet::default();
        let mut loop_functions: Vec<FunctionId> = Vec::new();
        let mut kernel_index = 0usize;

        let mut functions: Vec<FunctionId> = tu
            .functions
            .iter()
            .filter(|(_, f)| f.body.is_some() && specialize::is_concrete(&tu, f))
            .map(|(id, _)| id)
            .collect();
        functions.sort_by_key(|id| tu.function(*id).span.start);

        for fid in functions {
            let f = tu.function(fid);
            let Some(body) = f.body else {
                continue;
            };
            let site_loops = find_site_loops(&tu, body);
            if site_loops.is_empty() {
                continue;
            }
            if generate && self.config.function_info {
                edits.insert(
                    line_start(&tu, f.span.start),
                    format!(
                        "// hilapp: function {} contains {} site loop(s)\n",
                        f.qualified_name(),
                        site_loops.len()
                    ),
                );
            }

            for site_loop in &site_loops {
                let analysis = analyze_loop(&tu, site_loop, &self.config, diagnostics, &mut memo);
                self.check_fatal()?;
                for lf in &analysis.loop_functions {
                    if !loop_functions.contains(lf) {
                        loop_functions.push(*lf);
                    }
                }

                if generate {
                    let input = LoopInput {
                        tu: &tu,
                        analysis: &analysis,
                        config: &self.config,
                        diagnostics,
                        kernel_name: format!(
                            "_HILA_kernel_{}_{}",
                            sanitize_identifier(&f.qualified_name()),
                            kernel_index
                        ),
                    };
                    kernel_index += 1;
                    let generated = if analysis.has_errors {
                        commented_only(&input)
                    } else {
                        self.strategy.generate(&input)?
                    };
                    let indent = indentation(&tu, site_loop.span.start);
                    edits.replace(site_loop.span, reindent(generated.replacement.trim_end(), &indent));
                    if let Some(kernel) = generated.kernel {
                        let item_start = tu
                            .top_level_item_at(f.span.start)
                            .map_or(f.span.start, |item| item.span.start);
                        edits.insert(line_start(&tu, item_start), format!("{}\n", kernel));
                    }
                }
                loops.push(analysis);
            }
        }

        if !generate {
            return Ok(TranspileOutput {
                code: source.clone(),
                source,
                loops,
                specializations,
            });
        }

        if let Some(specifier) = self.strategy.loop_function_specifier() {
            for lf in &loop_functions {
                edits.insert(tu.function(*lf).signature_start, specifier);
            }
        }

        let mut header = format!(
            "// Generated by hilapp for target {} (configuration {})\n",
            self.config.target,
            self.config.fingerprint()
        );
        if let Some(preamble) = self.strategy.preamble() {
            header.push_str(&preamble);
        }
        edits.insert_with_priority(0, header, HEADER_PRIORITY);

        let code = edits.apply(&tu.source)?;
        self.check_fatal()?;
        tracing::info!(
            backend = %self.config.target,
            loops = loops.len(),
            specializations = specializations.len(),
            "transpiled unit"
        );
        Ok(TranspileOutput {
            code,
            source,
            loops,
            specializations,
        })
    }

    /// A Fatal diagnostic aborts the unit.
    fn check_fatal(&self) -> Result<(), TranspileError> {
        match self
            .diagnostics
            .get_diagnostics()
            .into_iter()
            .find(|d| d.level == DiagnosticLevel::Fatal)
        {
            Some(d) => Err(TranspileError::fatal(d.message, Some(d.span))),
            None => Ok(()),
        }
    }
}

fn line_start(tu: &TranslationUnit, pos: usize) -> usize {
    tu.source_map.line_start(pos)
}

/// Leading whitespace of the line containing `pos`, when nothing but
/// whitespace precedes `pos` on that line.
fn indentation(tu: &TranslationUnit, pos: usize) -> String {
    let prefix = tu.text(Span::new(line_start(tu, pos), pos));
    if prefix.chars().all(char::is_whitespace) {
        prefix.to_string()
    } else {
        String::new()
    }
}

/// Indents every line after the first by `indent`.
fn reindent(text: &str, indent: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for (i, line) in text.lines().enumerate() {
        if i > 0 {
            out.push('\n');
            if !line.is_empty() {
                out.push_str(indent);
            }
        }
        out.push_str(line);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::CollectingDiagnosticHandler;

    #[test]
    fn test_reindent() {
        assert_eq!(reindent("a\nb\n\nc", "  "), "a\n  b\n\n  c");
    }

    #[test]
    fn test_unit_without_loops_only_gains_a_header() {
        let handler = Arc::new(CollectingDiagnosticHandler::new());
        let transpiler = Transpiler::new(TranspilerConfig::default(), handler.clone());
        let src = "int twice(int a) {\n    return 2 * a;\n}\n";
        let out = transpiler.transpile(src).unwrap();
        assert!(out.code.starts_with("// Generated by hilapp for target cpu"));
        assert!(out.code.ends_with(src));
        assert!(out.loops.is_empty());
        assert!(!handler.has_errors());
    }
}
