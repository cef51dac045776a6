//! Vectorization feasibility: SIMD lane types and the loop verdict.

use super::context::{LoopContext, LoopFlags};
use super::refs::{CallInfo, FieldDescriptor, ReductionVectorUpdate, VariableDescriptor, VectorInfo};
use crate::config::TranspilerConfig;
use hilapp_syntax::builtins;
use hilapp_syntax::{TranslationUnit, TypeName};
use serde::Serialize;

/// Resolves the scalar type held by each SIMD lane of a value type.
pub trait TypeInspector {
    /// `double`, `float`, `int` or `int64_t`, or `None` when the type
    /// cannot be laid out in lanes.
    fn base_type(&self, tu: &TranslationUnit, ty: &TypeName) -> Option<String>;
}

/// Knows the builtin arithmetic types, the lattice library's templates,
/// user records made of one base type, and the configured extra types.
pub struct DefaultTypeInspector<'a> {
    config: &'a TranspilerConfig,
}

impl<'a> DefaultTypeInspector<'a> {
    pub fn new(config: &'a TranspilerConfig) -> Self {
        Self { config }
    }

    fn base_type_depth(&self, tu: &TranslationUnit, ty: &TypeName, depth: usize) -> Option<String> {
        if depth > 16 {
            return None;
        }
        let ty = tu.resolve_alias(ty);
        if let Some(base) = scalar_base(ty.as_str()) {
            return Some(base.to_string());
        }
        if let Some(base) = self
            .config
            .vector_types
            .get(ty.as_str())
            .or_else(|| self.config.vector_types.get(&ty.head()))
        {
            return scalar_base(base).map(str::to_string);
        }
        let head = ty.head();
        if head.starts_with("CoordinateVector") && ty.template_args().is_empty() {
            return Some("int".to_string());
        }
        if builtins::is_library_template(&head) && !ty.is_field() {
            // the element type is the last type argument: Matrix<3,3,T>
            let arg = ty
                .template_args()
                .into_iter()
                .rev()
                .find(|a| !a.as_str().chars().all(|c| c.is_ascii_digit()))?;
            return self.base_type_depth(tu, &arg, depth + 1);
        }
        let record = tu.record_named(&head)?;
        let record = tu.record(record);
        if record.is_generic() {
            return None;
        }
        let mut base: Option<String> = None;
        for member in &record.members {
            let decl = tu.decl(*member);
            if decl.is_static {
                continue;
            }
            let member_base = self.base_type_depth(tu, &decl.ty, depth + 1)?;
            match &base {
                Some(b) if *b != member_base => return None,
                Some(_) => {}
                None => base = Some(member_base),
            }
        }
        base
    }
}

impl TypeInspector for DefaultTypeInspector<'_> {
    fn base_type(&self, tu: &TranslationUnit, ty: &TypeName) -> Option<String> {
        self.base_type_depth(tu, &ty.unqualified(), 0)
    }
}

fn scalar_base(ty: &str) -> Option<&'static str> {
    match ty {
        "double" => Some("double"),
        "float" => Some("float"),
        "int" | "unsigned" | "unsigned int" | "int32_t" | "uint32_t" => Some("int"),
        "long" | "long int" | "int64_t" | "uint64_t" | "long long" | "size_t" => Some("int64_t"),
        _ => None,
    }
}

/// Lanes per register for a base type.
pub fn lanes(base: &str, vector_bits: u32) -> usize {
    let bits = match base {
        "double" | "int64_t" => 64,
        _ => 32,
    };
    (vector_bits / bits) as usize
}

/// vectorclass name of a register of `lanes` values of `base`.
pub fn register_type(base: &str, lanes: usize) -> String {
    let suffix = match base {
        "double" => "d",
        "float" => "f",
        "int64_t" => "q",
        _ => "i",
    };
    format!("Vec{}{}", lanes, suffix)
}

/// Vectorized spelling of `ty` with `lanes` lanes of `base`.
pub fn vectorized_type(ty: &TypeName, base: &str, lanes: usize) -> String {
    let register = register_type(base, lanes);
    let ty = ty.unqualified();
    if scalar_base(ty.as_str()).is_some() {
        register
    } else {
        format!("typename hila::vectorize_type<{}, {}>::type", ty, register)
    }
}

pub fn vector_info(
    inspector: &dyn TypeInspector,
    tu: &TranslationUnit,
    ty: &TypeName,
    vector_bits: u32,
) -> Option<VectorInfo> {
    let base = inspector.base_type(tu, ty)?;
    let lane_width = lanes(&base, vector_bits);
    Some(VectorInfo {
        vector_type: vectorized_type(ty, &base, lane_width),
        adapts_width: base == "int",
        base_type: base,
        lane_width,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaneRequirement {
    Fixed(usize),
    /// Integer lanes can follow the width of the other values.
    Adaptive,
}

/// Picks one lane width for all values, or names the first two that
/// disagree. The first fixed requirement establishes the width.
pub fn reconcile_lane_width(requirements: &[(String, LaneRequirement)]) -> Result<Option<usize>, String> {
    let mut chosen: Option<(&str, usize)> = None;
    for (name, req) in requirements {
        let LaneRequirement::Fixed(width) = *req else {
            continue;
        };
        match chosen {
            None => chosen = Some((name, width)),
            Some((first, w)) if w != width => {
                return Err(format!(
                    "lane width conflict: '{}' needs {} lanes but '{}' needs {}",
                    first, w, name, width
                ));
            }
            Some(_) => {}
        }
    }
    Ok(chosen.map(|(_, w)| w))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VectorizationVerdict {
    pub vectorizable: bool,
    pub lane_width: Option<usize>,
    pub reason: String,
}

impl VectorizationVerdict {
    fn no(reason: impl Into<String>) -> Self {
        Self {
            vectorizable: false,
            lane_width: None,
            reason: reason.into(),
        }
    }
}

pub struct VectorInput<'a> {
    pub ctx: &'a LoopContext,
    pub fields: &'a [FieldDescriptor],
    pub variables: &'a [&'a VariableDescriptor],
    pub calls: &'a [CallInfo],
    pub reduction_vector_updates: &'a [ReductionVectorUpdate],
    pub vector_bits: u32,
}

/// Decides whether a loop can run over SIMD lanes.
pub fn check(input: &VectorInput<'_>) -> VectorizationVerdict {
    let flags = input.ctx.flags;
    if flags.contains(LoopFlags::NO_VECTOR) {
        return VectorizationVerdict::no("vectorization disabled by '#pragma hila novector' or an unsupported ReductionVector update");
    }
    if flags.contains(LoopFlags::HAS_SELECTION) {
        return VectorizationVerdict::no("loop contains site selection calls");
    }
    if flags.contains(LoopFlags::CONTAINS_RANDOM) {
        return VectorizationVerdict::no("loop calls the random number generator");
    }
    if flags.contains(LoopFlags::HAS_SITE_DEPENDENT_CONDITION) {
        return VectorizationVerdict::no("loop has a site-dependent condition");
    }
    if flags.contains(LoopFlags::HAS_SITE_DEPENDENT_INDEX) {
        return VectorizationVerdict::no("loop indexes an array with a site-dependent index");
    }
    if let Some(update) = input
        .reduction_vector_updates
        .iter()
        .find(|u| !u.kind.is_reduction())
    {
        return VectorizationVerdict::no(format!(
            "ReductionVector '{}' is not updated with += or *=",
            update.base_text
        ));
    }
    if let Some(call) = input
        .calls
        .iter()
        .find(|c| c.special.is_none() && !c.is_vectorizable && c.args.iter().any(|a| a.is_site_dependent))
    {
        return VectorizationVerdict::no(format!(
            "function '{}' is called with site-dependent arguments and is not a loop function",
            call.name
        ));
    }

    let mut requirements = Vec::new();
    for field in input.fields {
        match &field.vector {
            Some(info) => requirements.push((field.name.clone(), requirement(info))),
            None => {
                return VectorizationVerdict::no(format!(
                    "type '{}' of field '{}' cannot be vectorized",
                    field.element_type, field.name
                ))
            }
        }
    }
    for var in input.variables {
        match &var.vector {
            Some(info) => requirements.push((var.name.clone(), requirement(info))),
            None => {
                return VectorizationVerdict::no(format!(
                    "type '{}' of variable '{}' cannot be vectorized",
                    var.ty, var.name
                ))
            }
        }
    }

    match reconcile_lane_width(&requirements) {
        Err(conflict) => VectorizationVerdict::no(conflict),
        Ok(width) => {
            let width = width.unwrap_or_else(|| lanes("int", input.vector_bits));
            VectorizationVerdict {
                vectorizable: true,
                lane_width: Some(width),
                reason: format!("vectorizable with {} lanes", width),
            }
        }
    }
}

fn requirement(info: &VectorInfo) -> LaneRequirement {
    if info.adapts_width {
        LaneRequirement::Adaptive
    } else {
        LaneRequirement::Fixed(info.lane_width)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hilapp_syntax::parse;
    use proptest::prelude::*;

    #[test]
    fn test_base_types_through_library_and_records() {
        let tu = parse("struct P { double x; double y; }; struct Q { double a; float b; };").unwrap();
        let config = TranspilerConfig::default();
        let inspector = DefaultTypeInspector::new(&config);
        let base = |t: &str| inspector.base_type(&tu, &TypeName::new(t));
        assert_eq!(base("double").as_deref(), Some("double"));
        assert_eq!(base("Matrix<3,3,Complex<float>>").as_deref(), Some("float"));
        assert_eq!(base("P").as_deref(), Some("double"));
        assert_eq!(base("Q"), None);
        assert_eq!(base("bool"), None);
    }

    #[test]
    fn test_configured_vector_types() {
        let tu = parse("").unwrap();
        let mut config = TranspilerConfig::default();
        config.vector_types.insert("MyVec3".into(), "double".into());
        let inspector = DefaultTypeInspector::new(&config);
        assert_eq!(
            inspector.base_type(&tu, &TypeName::new("MyVec3")).as_deref(),
            Some("double")
        );
    }

    #[test]
    fn test_vectorized_type_names() {
        assert_eq!(vectorized_type(&TypeName::new("double"), "double", 4), "Vec4d");
        assert_eq!(
            vectorized_type(&TypeName::new("Complex<float>"), "float", 8),
            "typename hila::vectorize_type<Complex<float>, Vec8f>::type"
        );
        assert_eq!(lanes("double", 512), 8);
        assert_eq!(lanes("float", 256), 8);
    }

    #[test]
    fn test_conflict_names_both_values() {
        let reqs = vec![
            ("a".to_string(), LaneRequirement::Fixed(4)),
            ("n".to_string(), LaneRequirement::Adaptive),
            ("b".to_string(), LaneRequirement::Fixed(8)),
        ];
        let err = reconcile_lane_width(&reqs).unwrap_err();
        assert!(err.contains("'a'") && err.contains("'b'"));
    }

    proptest! {
        #[test]
        fn prop_reconciled_width_satisfies_every_fixed_requirement(
            widths in proptest::collection::vec(prop_oneof![Just(None), Just(Some(4usize)), Just(Some(8usize))], 1..12),
        ) {
            let reqs: Vec<(String, LaneRequirement)> = widths
                .iter()
                .enumerate()
                .map(|(i, w)| (format!("v{}", i), w.map_or(LaneRequirement::Adaptive, LaneRequirement::Fixed)))
                .collect();
            match reconcile_lane_width(&reqs) {
                Ok(Some(w)) => prop_assert!(widths.iter().flatten().all(|x| *x == w)),
                Ok(None) => prop_assert!(widths.iter().all(|x| x.is_none())),
                Err(_) => {
                    let fixed: Vec<usize> = widths.iter().flatten().copied().collect();
                    prop_assert!(fixed.iter().any(|x| *x != fixed[0]));
                }
            }
        }
    }
}
