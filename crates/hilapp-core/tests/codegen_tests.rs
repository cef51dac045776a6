//! Generated code for each target. Assertions look for the distinctive
//! lines of each backend rather than whole outputs.

use hilapp_core::{Target, TranspilerConfig};
use hilapp_test_helpers::fixtures;
use hilapp_test_helpers::{transpile, transpile_for, transpile_with};
use indoc::indoc;

fn assert_contains(code: &str, needle: &str) {
    assert!(code.contains(needle), "missing `{}` in:\n{}", needle, code);
}

#[test]
fn test_cpu_neighbour_sum() {
    let run = transpile(fixtures::NEIGHBOUR_SUM);
    let code = run.code();
    assert!(code.starts_with("// Generated by hilapp for target cpu (configuration "));
    assert_contains(code, "//-- onsites(ALL) {");
    assert_contains(code, "const Parity _HILA_loop_parity = ALL;");
    assert_contains(code, "a.check_alloc();");
    assert_contains(code, "dir_mask_t _HILA_dir_mask = 0;");
    assert_contains(code, "_HILA_dir_mask |= c.start_get(e_x, _HILA_loop_parity);");
    assert_contains(
        code,
        "for (unsigned _HILA_index = lattice.loop_begin(_HILA_loop_parity); _HILA_index < lattice.loop_end(_HILA_loop_parity); ++_HILA_index) {",
    );
    assert_contains(
        code,
        "const double _HILA_field_c_dir_0 = c.get_value_at(lattice.neighbours(e_x, _HILA_index));",
    );
    assert_contains(code, "const double _HILA_field_b = b.get_value_at(_HILA_index);");
    assert_contains(code, "double _HILA_field_a;");
    assert_contains(code, "_HILA_field_a = _HILA_field_b + _HILA_field_c_dir_0;");
    assert_contains(code, "a.set_value_at(_HILA_field_a, _HILA_index);");
    assert_contains(code, "a.mark_changed(_HILA_loop_parity);");
    assert_contains(code, "if (_HILA_dir_mask == 0) break;");
    assert_contains(code, "c.wait_get(e_x, _HILA_loop_parity);");
}

#[test]
fn test_cpu_without_overlap_waits_before_the_loop() {
    let config = TranspilerConfig {
        overlap_communication: false,
        ..TranspilerConfig::default()
    };
    let run = transpile_with(fixtures::NEIGHBOUR_SUM, config);
    let code = run.code();
    assert!(!code.contains("_HILA_dir_mask"));
    let start = code.find("c.start_get(e_x, _HILA_loop_parity);").unwrap();
    let wait = code.find("c.wait_get(e_x, _HILA_loop_parity);").unwrap();
    let loop_start = code.find("for (unsigned _HILA_index").unwrap();
    assert!(start < wait && wait < loop_start);
}

#[test]
fn test_cpu_loop_local_direction_fetches_all_directions() {
    let code = transpile(fixtures::LAPLACIAN).code().to_string();
    assert_contains(
        &code,
        "for (int _HILA_d = 0; _HILA_d < NDIRS; ++_HILA_d) _HILA_dir_mask |= src.start_get((Direction)_HILA_d, _HILA_loop_parity);",
    );
    assert_contains(&code, "src.get_value_at(lattice.neighbours(d, _HILA_index))");
    assert!(!code.contains("_HILA_field_src_dir_"));
}

#[test]
fn test_cpu_reductions() {
    let code = transpile(fixtures::REDUCTION).code().to_string();
    assert_contains(&code, "double _HILA_reduction_sum(0);");
    assert_contains(&code, "double _HILA_reduction_prod(1);");
    assert_contains(&code, "_HILA_reduction_sum += _HILA_field_f;");
    assert_contains(&code, "_HILA_reduction_prod *= _HILA_field_f;");
    assert_contains(&code, "sum += hila::reduce_node_sum(_HILA_reduction_sum);");
    assert_contains(&code, "prod *= hila::reduce_node_product(_HILA_reduction_prod);");
    assert_contains(&code, "return sum + prod;");
}

#[test]
fn test_no_site_load_for_value_written_first() {
    let source = indoc! {r#"
        void copy(Field<double>& a, const Field<double>& b, Field<double>& c) {
            onsites(ALL) {
                a[X] = b[X];
                c[X] = a[X] * 2.0;
            }
        }
    "#};
    let code = transpile(source).code().to_string();
    assert_contains(&code, "double _HILA_field_a;");
    assert!(!code.contains("a.get_value_at(_HILA_index)"), "{}", code);
    assert_contains(&code, "_HILA_field_c = _HILA_field_a * 2.0;");
}

#[test]
fn test_parity_assertion_for_even_hazard() {
    let run = transpile(fixtures::HAZARD_EVEN);
    assert!(run.errors().is_empty());
    assert_contains(run.code(), "assert(_HILA_loop_parity != ALL");
}

#[test]
fn test_loop_with_errors_is_left_commented() {
    let run = transpile(fixtures::HAZARD_ALL);
    let code = run.code();
    assert!(!run.errors().is_empty());
    assert_contains(code, "// hilapp: site loop not transformed because of errors");
    assert_contains(code, "//-- onsites(ALL) a[X] = a[X + e_x];");
    assert!(!code.contains("_HILA_index"));
}

#[test]
fn test_vector_neighbour_sum() {
    let run = transpile_for(fixtures::NEIGHBOUR_SUM, Target::Vector);
    let code = run.code();
    assert!(code.starts_with("// Generated by hilapp for target vector"));
    assert_contains(code, "parity ALL: 4 lanes");
    assert_contains(
        code,
        "const auto * RESTRICT _HILA_vlattice = lattice.backend_lattice->get_vectorized_lattice<4>();",
    );
    assert_contains(code, "_HILA_vlattice->loop_begin(_HILA_loop_parity)");
    assert_contains(code, "b.get_vector_at<Vec4d>(_HILA_index)");
    assert_contains(code, "c.get_vector_at<Vec4d>(_HILA_vlattice->neighbours(e_x, _HILA_index))");
    assert_contains(code, "a.set_vector_at<Vec4d>(_HILA_field_a, _HILA_index);");
    assert_contains(code, "Vec4d _HILA_field_a;");
}

#[test]
fn test_vector_width_follows_register_bits() {
    let config = TranspilerConfig {
        target: Target::Vector,
        vector_bits: 512,
        ..TranspilerConfig::default()
    };
    let run = transpile_with(fixtures::NEIGHBOUR_SUM, config);
    assert_contains(run.code(), "get_vectorized_lattice<8>()");
    assert_contains(run.code(), "Vec8d");
}

#[test]
fn test_vector_reductions_collapse_lanes() {
    let code = transpile_for(fixtures::REDUCTION, Target::Vector).code().to_string();
    assert_contains(&code, "Vec4d _HILA_reduction_sum(0);");
    assert_contains(&code, "sum += hila::reduce_node_sum(reduce_sum(_HILA_reduction_sum));");
    assert_contains(&code, "prod *= hila::reduce_node_product(reduce_prod(_HILA_reduction_prod));");
}

#[test]
fn test_vector_falls_back_to_scalar() {
    let run = transpile_for(fixtures::SITE_DEPENDENT_CONDITION, Target::Vector);
    let code = run.code();
    assert_contains(code, "not vectorized: loop has a site-dependent condition");
    assert_contains(code, "lattice.loop_begin(_HILA_loop_parity)");
    assert_contains(code, "b.get_value_at(_HILA_index)");
    assert!(!code.contains("get_vector_at"));
}

#[test]
fn test_vector_site_dependent_locals_use_registers() {
    let source = indoc! {r#"
        void chain(Field<double>& a, const Field<double>& b) {
            onsites(ALL) {
                double u = b[X] * 2.0;
                a[X] = u;
            }
        }
    "#};
    let code = transpile_for(source, Target::Vector).code().to_string();
    assert_contains(&code, "Vec4d u = _HILA_field_b * 2.0;");
}

#[test]
fn test_vector_integer_value_converted_for_double_local() {
    let source = indoc! {r#"
        void scale(Field<double>& a, const Field<int>& n) {
            onsites(ALL) {
                double t = n[X];
                a[X] = t * 0.5;
            }
        }
    "#};
    let run = transpile_for(source, Target::Vector);
    let code = run.code();
    assert!(run.errors().is_empty(), "{:?}", run.errors());
    assert_contains(code, "n.get_vector_at<Vec4i>(_HILA_index)");
    assert_contains(code, "Vec4d t = to_double(_HILA_field_n);");
}

#[test]
fn test_cuda_kernel_and_launch() {
    let run = transpile_for(fixtures::NEIGHBOUR_SUM, Target::Cuda);
    let code = run.code();
    assert!(run.errors().is_empty(), "{:?}", run.errors());
    assert_contains(code, "#include <cuda_runtime.h>");
    assert_contains(
        code,
        "__global__ void _HILA_kernel_step_0(const int _HILA_loop_begin, const int _HILA_loop_end, const backend_lattice_struct _HILA_lattice",
    );
    assert_contains(code, "FieldStorage<double> _HILA_fs_a");
    assert_contains(code, "_HILA_fs_c.get(_HILA_lattice.neighbours(e_x, _HILA_index), _HILA_lattice.field_alloc_size)");
    assert_contains(code, "_HILA_fs_a.set(_HILA_field_a, _HILA_index, _HILA_lattice.field_alloc_size);");
    assert_contains(code, "const int _HILA_N_sites = _HILA_loop_end - _HILA_loop_begin;");
    assert_contains(code, "_HILA_kernel_step_0<<<_HILA_N_blocks, 256>>>(_HILA_loop_begin, _HILA_loop_end, lattice.backend_lattice->d_lattice, ");
    assert_contains(code, "a.fs->payload");
    assert_contains(code, "check_device_error(\"_HILA_kernel_step_0\");");
    assert_contains(code, "cudaDeviceSynchronize();");

    let kernel = code.find("__global__ void _HILA_kernel_step_0").unwrap();
    let function = code.find("void step(").unwrap();
    assert!(kernel < function, "kernel must precede the function that launches it");
}

#[test]
fn test_hip_uses_hip_runtime() {
    let config = TranspilerConfig {
        target: Target::Hip,
        gpu_block_size: 128,
        ..TranspilerConfig::default()
    };
    let run = transpile_with(fixtures::NEIGHBOUR_SUM, config);
    let code = run.code();
    assert_contains(code, "#include <hip/hip_runtime.h>");
    assert_contains(code, "hipDeviceSynchronize();");
    assert_contains(code, "<<<_HILA_N_blocks, 128>>>");
    assert!(!code.contains("cudaDeviceSynchronize"));
}

#[test]
fn test_gpu_reduction_buffers() {
    let code = transpile_for(fixtures::REDUCTION, Target::Cuda).code().to_string();
    assert_contains(&code, "double * _HILA_reduction_sum_buf");
    assert_contains(&code, "gpuMalloc(&_HILA_reduction_sum_buf, _HILA_N_sites * sizeof(double));");
    assert_contains(&code, "_HILA_reduction_sum_buf[_HILA_index - _HILA_loop_begin] = _HILA_reduction_sum;");
    assert_contains(&code, "sum += hila::reduce_node_sum(gpu_reduce_sum(_HILA_reduction_sum_buf, _HILA_N_sites));");
    assert_contains(&code, "gpuFree(_HILA_reduction_sum_buf);");
}

#[test]
fn test_gpu_loop_functions_get_device_specifier() {
    let run = transpile_for(fixtures::LOOP_FUNCTION, Target::Cuda);
    let code = run.code();
    assert!(run.errors().is_empty(), "{:?}", run.errors());
    assert_contains(code, "__device__ __host__ double twice(double v)");
    assert_eq!(code.matches("__device__ __host__ ").count(), 1);
}

#[test]
fn test_cpu_has_no_device_specifier() {
    let code = transpile(fixtures::LOOP_FUNCTION).code().to_string();
    assert!(!code.contains("__device__"));
    assert_contains(&code, "_HILA_field_a = twice(_HILA_field_b);");
}

#[test]
fn test_function_info_comment() {
    let config = TranspilerConfig {
        function_info: true,
        ..TranspilerConfig::default()
    };
    let run = transpile_with(fixtures::NEIGHBOUR_SUM, config);
    assert_contains(run.code(), "// hilapp: function step contains 1 site loop(s)\nvoid step(");
}

#[test]
fn test_replacement_keeps_loop_indentation() {
    let code = transpile(fixtures::NEIGHBOUR_SUM).code().to_string();
    assert_contains(&code, "\n    //-- onsites(ALL) {");
    assert_contains(&code, "\n        a.check_alloc();");
}

#[test]
fn test_transpile_is_deterministic() {
    for target in [Target::Cpu, Target::Vector, Target::Cuda] {
        let first = transpile_for(fixtures::LAPLACIAN, target).code().to_string();
        let second = transpile_for(fixtures::LAPLACIAN, target).code().to_string();
        assert_eq!(first, second);
    }
}
