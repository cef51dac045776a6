use super::cpu::generate_scalar;
use super::{write_site_loads, write_site_stores};
use crate::analysis::refs::{FieldDescriptor, ReductionVectorUpdate};
use crate::analysis::vectorize::{vector_info, DefaultTypeInspector};
use crate::codegen::comm::{self, CommPlan};
use crate::codegen::emitter::Emitter;
use crate::codegen::substitute::{lane_type, BodyRewriter, SiteSyntax};
use crate::codegen::{
    write_banner, write_epilogue, write_original, write_prologue, CodegenStrategy, GeneratedLoop,
    LoopInput, LOOP_PARITY, SITE_INDEX,
};
use crate::errors::TranspileError;
use hilapp_syntax::TypeName;

const VECTOR_LATTICE: &str = "_HILA_vlattice";
const LANE: &str = "_HILA_lane";

/// Code generation strategy for SIMD loops
/// - Each iteration handles one register of sites
/// - Loops that cannot be vectorized are generated as scalar loops
pub struct VectorStrategy;

struct VectorSyntax {
    lanes: usize,
    lattice: String,
}

impl VectorSyntax {
    fn register(&self, field: &FieldDescriptor) -> String {
        match &field.vector {
            Some(info) => lane_type(&field.element_type, info, self.lanes),
            None => field.element_type.to_string(),
        }
    }
}

impl SiteSyntax for VectorSyntax {
    fn lattice(&self) -> &str {
        &self.lattice
    }

    fn load(&self, object: &str, field: &FieldDescriptor, index: &str) -> String {
        format!("{}.get_vector_at<{}>({})", object, self.register(field), index)
    }

    fn store(&self, object: &str, field: &FieldDescriptor, value: &str, index: &str) -> String {
        format!(
            "{}.set_vector_at<{}>({}, {});",
            object,
            self.register(field),
            value,
            index
        )
    }

    fn value_type(&self, field: &FieldDescriptor) -> String {
        self.register(field)
    }
}

/// `rv[i] op= v` with vector `i` and `v` updates every lane separately,
/// since lanes may hit the same element.
fn lane_scatter(update: &ReductionVectorUpdate, index: &str, value: &str, lanes: usize) -> String {
    let op = update.kind.operator();
    format!(
        "{{ const auto _HILA_rv_index = {index}; const auto _HILA_rv_value = {value}; \
         for (int {l} = 0; {l} < {lanes}; ++{l}) {base}[hila::lane(_HILA_rv_index, {l})] {op} hila::lane(_HILA_rv_value, {l}); }}",
        index = index,
        value = value,
        l = LANE,
        lanes = lanes,
        base = update.base_text,
        op = op
    )
}

impl CodegenStrategy for VectorStrategy {
    fn name(&self) -> &str {
        "vector"
    }

    fn generate(&self, input: &LoopInput<'_>) -> Result<GeneratedLoop, TranspileError> {
        let a = input.analysis;
        if !a.verdict.vectorizable {
            let note = format!("not vectorized: {}", a.verdict.reason);
            return generate_scalar(input, self.name(), &note);
        }
        let lanes = a.verdict.lane_width.ok_or_else(|| {
            TranspileError::fatal("vectorizable loop without a lane width", a.site_loop.span)
        })?;

        // accumulator types of loop-constant reductions are not part of the
        // verdict
        let inspector = DefaultTypeInspector::new(input.config);
        let mut const_accumulators = Vec::new();
        for lc in a.loop_consts.iter().filter(|c| c.reduction.is_reduction()) {
            let ty = lc.ty.clone().unwrap_or_else(|| TypeName::new("double"));
            match vector_info(&inspector, input.tu, &ty, input.config.vector_bits) {
                Some(info) => const_accumulators.push((lc, lane_type(&ty, &info, lanes))),
                None => {
                    let note = format!("not vectorized: reduction of '{}' has no vector type", lc.text);
                    return generate_scalar(input, self.name(), &note);
                }
            }
        }

        let syntax = VectorSyntax {
            lanes,
            lattice: format!("{}->", VECTOR_LATTICE),
        };
        let mut body = BodyRewriter::new(input.tu, a);
        body.fields(&syntax)?;
        body.special_calls(&syntax);
        body.reductions();
        body.vector_declarations(lanes);
        body.reduction_vector_updates(&|u, index, value| lane_scatter(u, index, value, lanes))?;
        let body = body.finish()?;

        let plan = CommPlan::for_loop(a);
        let overlap = input.config.overlap_communication && !plan.is_empty();

        let mut e = Emitter::new();
        write_original(&mut e, input);
        e.open("{");
        write_banner(&mut e, self.name(), input, &format!("{} lanes", lanes));
        write_prologue(&mut e, input);
        e.write_indented(&format!(
            "const auto * RESTRICT {} = lattice.backend_lattice->get_vectorized_lattice<{}>();",
            VECTOR_LATTICE, lanes
        ));
        for var in a.reductions() {
            let ty = match &var.vector {
                Some(info) => lane_type(&var.ty, info, lanes),
                None => var.ty.unqualified().to_string(),
            };
            e.write_indented(&format!(
                "{} {}({});",
                ty,
                var.reduction_temp(),
                var.reduction.identity()
            ));
        }
        for (lc, ty) in &const_accumulators {
            e.write_indented(&format!("{} {}({});", ty, lc.temp(), lc.reduction.identity()));
        }

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
            "for (unsigned {i} = {v}->loop_begin({p}); {i} < {v}->loop_end({p}); ++{i}) {{",
            i = SITE_INDEX,
            v = VECTOR_LATTICE,
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

        write_epilogue(&mut e, input, &|temp, kind| format!("{}({})", kind.lane_collapse(), temp));
        e.close("}");

        Ok(GeneratedLoop {
            replacement: e.take_output(),
            kernel: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::refs::ReductionKind;
    use hilapp_syntax::parse;

    #[test]
    fn test_lane_scatter_updates_each_lane() {
        let tu = parse("double hist[4];\nvoid fill() {\n    int bin = 1;\n    hist[bin] += 2.0;\n}\n").unwrap();
        let expr = tu.exprs.iter().next().map(|(id, _)| id).unwrap();
        let update = ReductionVectorUpdate {
            stmt: tu.stmts.iter().next().map(|(id, _)| id).unwrap(),
            array: tu.decls.iter().next().map(|(id, _)| id).unwrap(),
            base_text: "hist".into(),
            index: expr,
            value: expr,
            kind: ReductionKind::Sum,
        };
        let text = lane_scatter(&update, "bin", "w", 4);
        assert!(text.contains("_HILA_lane < 4"));
        assert!(text.contains("hist[hila::lane(_HILA_rv_index, _HILA_lane)] += hila::lane(_HILA_rv_value, _HILA_lane)"));
    }
}
