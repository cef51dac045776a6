//! Test helpers for hilapp
//!
//! Run the transpiler on inline sources with a collecting diagnostic
//! handler, and provide the lattice program fixtures shared by the
//! integration tests.

use hilapp_core::diagnostics::{CollectingDiagnosticHandler, DiagnosticHandler, DiagnosticLevel};
use hilapp_core::{LoopAnalysis, Target, TranspileError, TranspileOutput, Transpiler, TranspilerConfig};
use std::sync::Arc;

pub mod fixtures;

/// Result of one transpiler run together with everything it reported.
pub struct Run {
    pub result: Result<TranspileOutput, TranspileError>,
    pub diagnostics: Arc<CollectingDiagnosticHandler>,
}

impl Run {
    /// Generated code; panics with the diagnostics if the unit failed.
    pub fn code(&self) -> &str {
        match &self.result {
            Ok(out) => &out.code,
            Err(e) => panic!("transpile failed: {e}\n{:#?}", self.diagnostics.get_diagnostics()),
        }
    }

    pub fn loops(&self) -> &[LoopAnalysis] {
        match &self.result {
            Ok(out) => &out.loops,
            Err(e) => panic!("transpile failed: {e}"),
        }
    }

    pub fn errors(&self) -> Vec<String> {
        self.diagnostics.messages(DiagnosticLevel::Error)
    }

    pub fn warnings(&self) -> Vec<String> {
        self.diagnostics.messages(DiagnosticLevel::Warning)
    }

    pub fn remarks(&self) -> Vec<String> {
        self.diagnostics.messages(DiagnosticLevel::Remark)
    }

    pub fn has_error_containing(&self, needle: &str) -> bool {
        self.errors().iter().any(|m| m.contains(needle))
    }
}

/// Transpile `source` with `config`.
pub fn transpile_with(source: &str, config: TranspilerConfig) -> Run {
    let diagnostics = Arc::new(CollectingDiagnosticHandler::new());
    let transpiler = Transpiler::new(config, diagnostics.clone());
    let result = transpiler.transpile(source);
    Run {
        result,
        diagnostics,
    }
}

/// Transpile `source` for the scalar CPU target.
pub fn transpile(source: &str) -> Run {
    transpile_with(source, TranspilerConfig::default())
}

/// Transpile `source` for `target` with otherwise default settings.
pub fn transpile_for(source: &str, target: Target) -> Run {
    let config = TranspilerConfig {
        target,
        ..TranspilerConfig::default()
    };
    transpile_with(source, config)
}

/// Analyze `source` without generating code.
pub fn analyze(source: &str) -> Run {
    let diagnostics = Arc::new(CollectingDiagnosticHandler::new());
    let transpiler = Transpiler::new(TranspilerConfig::default(), diagnostics.clone());
    let result = transpiler.analyze(source);
    Run {
        result,
        diagnostics,
    }
}

/// Analysis of the first site loop of `source`; panics if there is none.
pub fn analyze_first_loop(source: &str) -> (LoopAnalysis, Arc<CollectingDiagnosticHandler>) {
    let run = analyze(source);
    let Run {
        result,
        diagnostics,
    } = run;
    let out = match result {
        Ok(out) => out,
        Err(e) => panic!("analysis failed: {e}"),
    };
    let first = out.loops.into_iter().next();
    match first {
        Some(analysis) => (analysis, diagnostics),
        None => panic!("no site loop in source"),
    }
}
