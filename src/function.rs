//! Function descriptors, name mangling, and ABI classification.
//!
//! A [`FunctionDesc`] is the immutable record tying a canonical function
//! name to its signature and native address. The same descriptor drives
//! three things that must stay in lockstep: registry lookup, the symbol
//! declared inside generated modules, and the by-value/by-address decision
//! for every argument at both signature-construction and call-site time.

use crate::dtype::DType;

/// Prefix for vector-kernel symbols. The same conceptual operator resolves
/// to a scalar symbol or a vector-kernel symbol purely by argument types.
pub const SIMD_VECTOR_FUNC_PREFIX: &str = "simd_vector";

/// Register budget of the modeled 64-bit calling convention.
const TOTAL_PARAM_REGISTERS: u32 = 6;

/// Canonical name for a unary operator applied to `dtype`.
pub fn function_name_unary(op: &str, dtype: DType) -> String {
    let elem = dtype.elem().map(|e| e.type_string()).unwrap_or("void");
    if dtype.is_simd_vector() {
        format!("{SIMD_VECTOR_FUNC_PREFIX}_{op}_{elem}")
    } else {
        format!("{op}_{elem}")
    }
}

/// Canonical name for a binary operator applied to `(d0, d1)`.
pub fn function_name_binary(op: &str, d0: DType, d1: DType) -> String {
    let e0 = d0.elem().map(|e| e.type_string()).unwrap_or("void");
    let e1 = d1.elem().map(|e| e.type_string()).unwrap_or("void");
    if d0.is_simd_vector() || d1.is_simd_vector() {
        format!("{SIMD_VECTOR_FUNC_PREFIX}_{op}_{e0}_{e1}")
    } else {
        format!("{op}_{e0}_{e1}")
    }
}

/// Immutable record of a function's name, signature, and native address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionDesc {
    pub name: String,
    pub return_type: DType,
    pub arg_types: Vec<DType>,
    /// Native address; zero for functions compiled inside the current unit.
    pub func: usize,
    /// Index of the context-handle argument, if any. Derived by [`init`].
    ///
    /// [`init`]: FunctionDesc::init
    pub context_arg_idx: Option<usize>,
}

impl FunctionDesc {
    pub fn new(
        name: impl Into<String>,
        return_type: DType,
        arg_types: Vec<DType>,
        func: usize,
    ) -> Self {
        let mut desc = Self {
            name: name.into(),
            return_type,
            arg_types,
            func,
            context_arg_idx: None,
        };
        desc.init();
        desc
    }

    /// Scan the argument list for the context-handle argument. At most one
    /// is allowed; extra occurrences are logged and the first index is
    /// retained. Recomputes from scratch, so running it twice is a no-op.
    pub fn init(&mut self) {
        self.context_arg_idx = None;
        for (i, dtype) in self.arg_types.iter().enumerate() {
            if dtype.is_ctx_ptr() {
                match self.context_arg_idx {
                    Some(first) => {
                        log::error!(
                            "Function:{} has more than ONE ctx_ptr arg at:{}, the first is at:{}",
                            self.name,
                            i,
                            first
                        );
                    }
                    None => self.context_arg_idx = Some(i),
                }
            }
        }
    }

    /// Whether argument `argno` is passed as the address of its storage.
    ///
    /// Simulates the register accounting of the native calling convention:
    /// scalar/pointer/bit arguments take one slot, span-like arguments
    /// (vector, span, string view) take two. A span-like argument spills to
    /// by-address exactly when the cumulative slot count through it strictly
    /// exceeds the budget. Pure function of types and position; call-site
    /// construction consults the same routine so generated calls and callee
    /// signatures always agree.
    pub fn pass_arg_by_address(&self, argno: usize) -> bool {
        if argno >= self.arg_types.len() {
            return false;
        }
        if !self.arg_types[argno].is_span_like() {
            return false;
        }
        let mut used: u32 = 0;
        for dtype in self.arg_types.iter().take(argno + 1) {
            used += if dtype.is_span_like() { 2 } else { 1 };
        }
        used > TOTAL_PARAM_REGISTERS
    }

    /// Whether the call-site types can be accepted: arity must match and
    /// every positional type must be castable to the declared type.
    pub fn validate_args(&self, ts: &[DType]) -> bool {
        if self.arg_types.len() != ts.len() {
            return false;
        }
        ts.iter()
            .zip(self.arg_types.iter())
            .all(|(given, declared)| given.can_cast_to(declared))
    }

    /// Exact signature comparison, no casting. Used to confirm an
    /// already-compiled function matches an expected external signature
    /// before it is invoked reflectively.
    pub fn compare_signature(&self, return_type: DType, arg_types: &[DType]) -> bool {
        self.return_type == return_type && self.arg_types.as_slice() == arg_types
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dtype::ScalarType;

    fn desc(args: Vec<DType>) -> FunctionDesc {
        FunctionDesc::new("f", DType::Void, args, 0)
    }

    #[test]
    fn init_records_first_context_arg() {
        let d = desc(vec![DType::I32, DType::CtxPtr, DType::I32]);
        assert_eq!(d.context_arg_idx, Some(1));
    }

    #[test]
    fn init_is_idempotent() {
        let mut d = desc(vec![DType::CtxPtr, DType::F64]);
        let first = d.context_arg_idx;
        d.init();
        assert_eq!(d.context_arg_idx, first);
    }

    #[test]
    fn duplicate_context_args_keep_first() {
        let d = desc(vec![DType::CtxPtr, DType::I32, DType::CtxPtr]);
        assert_eq!(d.context_arg_idx, Some(0));
    }

    #[test]
    fn abi_spill_is_strictly_greater_than_budget() {
        // 4 scalars + one vector: 4 + 2 = 6 slots, exactly the budget.
        let v = DType::Simd(ScalarType::F32);
        let d = desc(vec![DType::I64, DType::I64, DType::I64, DType::I64, v]);
        assert!(!d.pass_arg_by_address(4));

        // One more scalar in front: 5 + 2 = 7 slots, strictly exceeds.
        let d = desc(vec![
            DType::I64,
            DType::I64,
            DType::I64,
            DType::I64,
            DType::I64,
            v,
        ]);
        assert!(d.pass_arg_by_address(5));
    }

    #[test]
    fn scalars_never_spill_to_address() {
        let args: Vec<DType> = std::iter::repeat(DType::I64).take(10).collect();
        let d = desc(args);
        for i in 0..10 {
            assert!(!d.pass_arg_by_address(i));
        }
        assert!(!d.pass_arg_by_address(99));
    }

    #[test]
    fn validate_args_checks_arity_and_casts() {
        let d = FunctionDesc::new("g", DType::F64, vec![DType::I64, DType::F64], 0);
        assert!(d.validate_args(&[DType::I32, DType::F32]));
        assert!(!d.validate_args(&[DType::I32]));
        assert!(!d.validate_args(&[DType::I32, DType::F32, DType::F32]));
        assert!(!d.validate_args(&[DType::Simd(ScalarType::F32), DType::F32]));
    }

    #[test]
    fn compare_signature_is_exact() {
        let d = FunctionDesc::new("g", DType::F64, vec![DType::I64], 0);
        assert!(d.compare_signature(DType::F64, &[DType::I64]));
        assert!(!d.compare_signature(DType::F64, &[DType::I32]));
        assert!(!d.compare_signature(DType::F32, &[DType::I64]));
    }

    #[test]
    fn mangled_names_split_scalar_and_vector() {
        let v = DType::Simd(ScalarType::F32);
        assert_eq!(function_name_binary("add", DType::F32, DType::F32), "add_f32_f32");
        assert_eq!(
            function_name_binary("add", v, v),
            "simd_vector_add_f32_f32"
        );
        assert_eq!(function_name_unary("sort", v), "simd_vector_sort_f32");
        assert_eq!(function_name_unary("abs", DType::F64), "abs_f64");
    }
}
