use super::{write_site_loads, write_site_stores};
use crate::analysis::refs::{ArrayReference, FieldDescriptor, ReductionKind};
use crate::analysis::LoopAnalysis;
use crate::codegen::comm::CommPlan;
use crate::codegen::emitter::Emitter;
use crate::codegen::substitute::{BodyRewriter, SiteSyntax};
use crate::codegen::{
    sanitize_identifier, write_banner, write_epilogue, write_original, write_prologue, CodegenStrategy,
    GeneratedLoop, LoopInput, LOOP_PARITY, SITE_INDEX,
};
use crate::config::Target;
use crate::errors::TranspileError;
use hilapp_syntax::TypeName;
use rustc_hash::FxHashSet;

const KERNEL_LATTICE: &str = "_HILA_lattice";
const LOOP_BEGIN: &str = "_HILA_loop_begin";
const LOOP_END: &str = "_HILA_loop_end";
const N_SITES: &str = "_HILA_N_sites";
const N_BLOCKS: &str = "_HILA_N_blocks";

/// Code generation strategy for CUDA and HIP
/// - The loop body becomes a kernel with one thread per site
/// - Reductions go through a per-site buffer reduced on the device
/// - Functions called from loops are compiled for host and device
pub struct GpuStrategy {
    target: Target,
}

impl GpuStrategy {
    pub fn new(target: Target) -> Self {
        Self { target }
    }

    fn synchronize(&self) -> &'static str {
        match self.target {
            Target::Hip => "hipDeviceSynchronize();",
            _ => "cudaDeviceSynchronize();",
        }
    }
}

struct KernelSyntax {
    lattice: String,
}

impl SiteSyntax for KernelSyntax {
    fn lattice(&self) -> &str {
        &self.lattice
    }

    fn field_object(&self, field: &FieldDescriptor) -> String {
        format!("_HILA_fs_{}", sanitize_identifier(&field.name))
    }

    fn load(&self, object: &str, _field: &FieldDescriptor, index: &str) -> String {
        format!("{}.get({}, {}.field_alloc_size)", object, index, KERNEL_LATTICE)
    }

    fn store(&self, object: &str, _field: &FieldDescriptor, value: &str, index: &str) -> String {
        format!(
            "{}.set({}, {}, {}.field_alloc_size);",
            object, value, index, KERNEL_LATTICE
        )
    }
}

fn array_param(array: &ArrayReference) -> String {
    format!("_HILA_array_{}", sanitize_identifier(&array.name))
}

fn reduction_buffer(temp: &str) -> String {
    format!("{}_buf", temp)
}

/// Host pointer and byte size of an array captured by the kernel.
fn array_storage(array: &ArrayReference) -> (String, String) {
    if array.dim_texts.is_empty() {
        (
            format!("{}.data()", array.name),
            format!("{}.size() * sizeof({})", array.name, array.element_type.unqualified()),
        )
    } else {
        (array.name.clone(), format!("sizeof({})", array.name))
    }
}

/// Kernel parameter declaration of a captured array. Multi-dimensional C
/// arrays keep their inner extents so that `a[i][j]` still indexes.
fn array_param_decl(array: &ArrayReference) -> String {
    let constness = if array.is_reduction_vector { "" } else { "const " };
    let name = array_param(array);
    if array.dim_texts.len() > 1 {
        let inner: String = array.dim_texts[1..].iter().map(|d| format!("[{}]", d)).collect();
        format!("{}{} (*{}){}", constness, array.element_type.unqualified(), name, inner)
    } else {
        format!("{}{} * {}", constness, array.element_type.unqualified(), name)
    }
}

/// One kernel argument: its parameter declaration and the host
/// expression passed for it.
struct KernelArg {
    param: String,
    value: String,
}

fn kernel_args(
    input: &LoopInput<'_>,
    syntax: &KernelSyntax,
    constants: &FxHashSet<hilapp_syntax::ast::DeclId>,
) -> Vec<KernelArg> {
    let a = input.analysis;
    let mut args = Vec::new();
    for field in &a.fields {
        args.push(KernelArg {
            param: format!("FieldStorage<{}> {}", field.element_type, syntax.field_object(field)),
            value: format!("{}.fs->payload", field.name),
        });
        for offset in &field.offsets {
            args.push(KernelArg {
                param: format!("FieldStorage<{}> {}", field.element_type, offset.temp),
                value: format!("{}.fs->payload", offset.temp),
            });
        }
    }

    let captured: FxHashSet<_> = a
        .arrays
        .iter()
        .map(|r| r.decl)
        .chain(a.selections.iter().filter_map(|s| s.decl))
        .collect();
    for var in &a.variables {
        if var.is_loop_local
            || !var.is_plain_read
            || var.reduction.is_reduction()
            || constants.contains(&var.decl)
            || captured.contains(&var.decl)
            || input.tu.resolve_alias(&var.ty).is_field()
        {
            continue;
        }
        args.push(KernelArg {
            param: format!("const {} {}", var.ty.unqualified(), var.name),
            value: var.name.clone(),
        });
    }

    for lc in a.loop_consts.iter().filter(|c| !c.reduction.is_reduction()) {
        let ty = match &lc.ty {
            Some(ty) => ty.unqualified(),
            None => {
                input.diagnostics.warning(
                    input.tu.expr(lc.expr).span,
                    &format!("Cannot determine the type of '{}'; it is passed to the kernel as double", lc.text),
                );
                TypeName::new("double")
            }
        };
        args.push(KernelArg {
            param: format!("const {} {}", ty, lc.temp()),
            value: lc.text.clone(),
        });
    }

    for array in &a.arrays {
        args.push(KernelArg {
            param: array_param_decl(array),
            value: array_param(array),
        });
    }

    for (i, sel) in a.selections.iter().enumerate() {
        let ty = sel
            .decl
            .map(|d| input.tu.decl(d).ty.unqualified().to_string())
            .unwrap_or_else(|| "SiteSelect".to_string());
        args.push(KernelArg {
            param: format!("{}::device_view _HILA_sel_{}", ty, i),
            value: format!("{}.device_view()", sel.text),
        });
    }

    for (ty, temp, _) in reduction_accumulators(a) {
        let buffer = reduction_buffer(&temp);
        args.push(KernelArg {
            param: format!("{} * {}", ty, buffer),
            value: buffer,
        });
    }
    args
}

/// Type, accumulator name and kind of every reduction of the loop.
fn reduction_accumulators(a: &LoopAnalysis) -> Vec<(String, String, ReductionKind)> {
    let mut out: Vec<(String, String, ReductionKind)> = a
        .reductions()
        .map(|v| (v.ty.unqualified().to_string(), v.reduction_temp(), v.reduction))
        .collect();
    for lc in a.loop_consts.iter().filter(|c| c.reduction.is_reduction()) {
        let ty = lc
            .ty
            .as_ref()
            .map(|t| t.unqualified().to_string())
            .unwrap_or_else(|| "double".to_string());
        out.push((ty, lc.temp(), lc.reduction));
    }
    out
}

impl CodegenStrategy for GpuStrategy {
    fn name(&self) -> &str {
        self.target.as_str()
    }

    fn generate(&self, input: &LoopInput<'_>) -> Result<GeneratedLoop, TranspileError> {
        let a = input.analysis;
        let block = input.config.gpu_block_size;
        let syntax = KernelSyntax {
            lattice: format!("{}.", KERNEL_LATTICE),
        };

        let mut body = BodyRewriter::new(input.tu, a);
        body.fields(&syntax)?;
        body.special_calls(&syntax);
        body.reductions();
        let constants = body.constants(input.diagnostics);
        body.loop_consts();
        body.arrays(&array_param);
        body.selections(&|_, i| format!("_HILA_sel_{}", i));
        body.reduction_vector_updates(&|u, index, value| {
            let atomic = match u.kind {
                ReductionKind::Product => "hila::gpu_atomic_multiply",
                _ => "hila::gpu_atomic_add",
            };
            format!(
                "{}(&_HILA_array_{}[{}], {});",
                atomic,
                sanitize_identifier(&u.base_text),
                index,
                value
            )
        })?;
        let body = body.finish()?;

        let args = kernel_args(input, &syntax, &constants);
        let accumulators = reduction_accumulators(a);

        // ===== Kernel =====
        let mut k = Emitter::new();
        let mut params = vec![
            format!("const int {}", LOOP_BEGIN),
            format!("const int {}", LOOP_END),
            format!("const backend_lattice_struct {}", KERNEL_LATTICE),
        ];
        params.extend(args.iter().map(|arg| arg.param.clone()));
        k.writeln(&format!(
            "// {} kernel of the site loop at line {}",
            self.name(),
            a.line
        ));
        k.writeln(&format!("__global__ void {}({})", input.kernel_name, params.join(", ")));
        k.open("{");
        k.write_indented(&format!(
            "unsigned {} = threadIdx.x + blockIdx.x * blockDim.x + {};",
            SITE_INDEX, LOOP_BEGIN
        ));
        for (ty, temp, kind) in &accumulators {
            k.write_indented(&format!("{} {}({});", ty, temp, kind.identity()));
        }
        k.open(&format!("if ({} < {}) {{", SITE_INDEX, LOOP_END));
        write_site_loads(&mut k, a, &syntax);
        k.write_source(&body);
        write_site_stores(&mut k, a, &syntax);
        for (_, temp, _) in &accumulators {
            k.write_indented(&format!(
                "{}[{} - {}] = {};",
                reduction_buffer(temp),
                SITE_INDEX,
                LOOP_BEGIN,
                temp
            ));
        }
        k.close("}");
        k.close("}");

        // ===== Host side =====
        let plan = CommPlan::for_loop(a);
        let mut e = Emitter::new();
        write_original(&mut e, input);
        e.open("{");
        write_banner(&mut e, self.name(), input, &format!("kernel {}", input.kernel_name));
        write_prologue(&mut e, input);
        for line in plan.start_lines(false).into_iter().chain(plan.wait_lines()) {
            e.write_indented(&line);
        }
        e.write_indented(&format!("const int {} = lattice.loop_begin({});", LOOP_BEGIN, LOOP_PARITY));
        e.write_indented(&format!("const int {} = lattice.loop_end({});", LOOP_END, LOOP_PARITY));
        e.write_indented(&format!("const int {} = {} - {};", N_SITES, LOOP_END, LOOP_BEGIN));
        e.write_indented(&format!(
            "const int {} = ({} + {} - 1) / {};",
            N_BLOCKS, N_SITES, block, block
        ));
        for (ty, temp, _) in &accumulators {
            let buffer = reduction_buffer(temp);
            e.write_indented(&format!("{} * {};", ty, buffer));
            e.write_indented(&format!("gpuMalloc(&{}, {} * sizeof({}));", buffer, N_SITES, ty));
        }
        for array in &a.arrays {
            let (host, size) = array_storage(array);
            let device = array_param(array);
            e.write_indented(&format!("{} * {};", array.element_type.unqualified(), device));
            e.write_indented(&format!("gpuMalloc(&{}, {});", device, size));
            e.write_indented(&format!(
                "gpuMemcpy({}, {}, {}, gpuMemcpyHostToDevice);",
                device, host, size
            ));
        }

        let mut call_args = vec![
            LOOP_BEGIN.to_string(),
            LOOP_END.to_string(),
            "lattice.backend_lattice->d_lattice".to_string(),
        ];
        call_args.extend(args.into_iter().map(|arg| arg.value));
        e.write_indented(&format!(
            "{}<<<{}, {}>>>({});",
            input.kernel_name,
            N_BLOCKS,
            block,
            call_args.join(", ")
        ));
        e.write_indented(&format!("check_device_error(\"{}\");", input.kernel_name));
        e.write_indented(self.synchronize());

        for array in &a.arrays {
            let device = array_param(array);
            if array.is_reduction_vector {
                let (host, size) = array_storage(array);
                e.write_indented(&format!(
                    "gpuMemcpy({}, {}, {}, gpuMemcpyDeviceToHost);",
                    host, device, size
                ));
            }
            e.write_indented(&format!("gpuFree({});", device));
        }
        write_epilogue(&mut e, input, &|temp, kind| {
            format!("{}({}, {})", kind.gpu_reduce(), reduction_buffer(temp), N_SITES)
        });
        for (_, temp, _) in &accumulators {
            e.write_indented(&format!("gpuFree({});", reduction_buffer(temp)));
        }
        e.close("}");

        Ok(GeneratedLoop {
            replacement: e.take_output(),
            kernel: Some(k.take_output()),
        })
    }

    fn loop_function_specifier(&self) -> Option<&'static str> {
        Some("__device__ __host__ ")
    }

    fn preamble(&self) -> Option<String> {
        let header = match self.target {
            Target::Hip => "hip/hip_runtime.h",
            _ => "cuda_runtime.h",
        };
        Some(format!("#include <{}>\n", header))
    }
}
