use super::{write_site_loads, write_site_stores};
use crate::analysis::refs::FieldDescriptor;
use crate::codegen::comm::{self, CommPlan};
use crate::codegen::emitter::Emitter;
use crate::codegen::substitute::{BodyRewriter, SiteSyntax};
use crate::codegen::{
    write_banner, write_epilogue, write_original, write_prologue, write_reduction_accumulators,
    CodegenStrategy, GeneratedLoop, LoopInput, LOOP_PARITY, SITE_INDEX,
};
use crate::errors::TranspileError;

/// Code generation strategy for scalar CPU loops
/// - One iteration per site, fields accessed element by element
/// - Communication overlapped with the interior sites when enabled
pub struct CpuStrategy;

struct HostSyntax;

impl SiteSyntax for HostSyntax {
    fn lattice(&self) -> &str {
        "lattice."
    }

    fn load(&self, object: &str, _field: &FieldDescriptor, index: &str) -> String {
        format!("{}.get_value_at({})", object, index)
    }

    fn store(&self, object: &str, _field: &FieldDescriptor, value: &str, index: &str) -> String {
        format!("{}.set_value_at({}, {});", object, value, index)
    }
}

impl CodegenStrategy for CpuStrategy {
    fn name(&self) -> &str {
        "cpu"
    }

    fn generate(&self, input: &LoopInput<'_>) -> Result<GeneratedLoop, TranspileError> {
        generate_scalar(input, self.name(), "scalar")
    }
}

/// Scalar loop over the sites of the loop parity. Also used by the vector
/// backend for loops that cannot be vectorized.
pub(crate) fn generate_scalar(
    input: &LoopInput<'_>,
    strategy: &str,
    note: &str,
) -> Result<GeneratedLoop, TranspileError> {
    let a = input.analysis;
    let syntax = HostSyntax;

    let mut body = BodyRewriter::new(input.tu, a);
    body.fields(&syntax)?;
    body.special_calls(&syntax);
    body.reductions();
    body.selections(&|sel, _| sel.text.clone());
    let body = body.finish()?;

    let plan = CommPlan::for_loop(a);
    let overlap = input.config.overlap_communication && !plan.is_empty();

    let mut e = Emitter::new();
    write_original(&mut e, input);
    e.open("{");
    write_banner(&mut e, strategy, input, note);
    write_prologue(&mut e, input);
    write_reduction_accumulators(&mut e, input, &|ty| ty.to_string());
    for line in plan.start_lines(overlap) {
        e.write_indented(&line);
    }
    if overlap {
        comm::open_wait_loop(&mut e);
    } else {
        for line in plan.wait_lines() {
            e.write_indented(&line);
        }
    }

    e.open(&format!(
        "for (unsigned {i} = lattice.loop_begin({p}); {i} < lattice.loop_end({p}); ++{i}) {{",
        i = SITE_INDEX,
        p = LOOP_PARITY
    ));
    if overlap {
        comm::open_wait_filter(&mut e, syntax.lattice());
    }
    write_site_loads(&mut e, a, &syntax);
    e.write_source(&body);
    write_site_stores(&mut e, a, &syntax);
    if overlap {
        e.close("}");
    }
    e.close("}");
    if overlap {
        comm::close_wait_loop(&mut e, &plan);
    }

    write_epilogue(&mut e, input, &|temp, _| temp.to_string());
    e.close("}");

    Ok(GeneratedLoop {
        replacement: e.take_output(),
        kernel: None,
    })
}
