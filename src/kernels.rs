//! Builtin kernel registration.
//!
//! Leaf numeric kernels are ordinary natively compiled functions with no
//! special-cased path in the compiler: they become callable from generated
//! code solely by being registered under their mangled names. The plain
//! Rust bodies here stand in for a vectorized sort/select library; their
//! internals are irrelevant to the compilation pipeline.
//!
//! All kernels use the `C-unwind` ABI so that size-mismatch panics raised
//! inside a generated call unwind back into the host as ordinary Rust
//! panics.

use std::cmp::Ordering;

use crate::context::ExecContext;
use crate::dtype::{DType, ScalarType};
use crate::function::FunctionDesc;
use crate::registry::FunctionRegistry;
use crate::vector::VectorView;

/// Registered name of the size-mismatch hook. The compiler injects this
/// symbol into every compilation unit so generated code can raise it.
pub const THROW_SIZE_MISMATCH_FUNC: &str = "throw_size_mismatch";

/// Host-level throw raised from inside generated calls when two vector
/// operands disagree on length.
pub extern "C-unwind" fn throw_size_mismatch(current: u64, expected: u64) {
    panic!("vector size mismatch: {current} vs {expected}");
}

fn sort_by<T: Copy>(data: &mut [T], cmp: fn(&T, &T) -> Ordering, descending: bool) {
    if descending {
        data.sort_unstable_by(|a, b| cmp(b, a));
    } else {
        data.sort_unstable_by(cmp);
    }
}

fn select_by<T: Copy>(data: &mut [T], k: usize, cmp: fn(&T, &T) -> Ordering, descending: bool) {
    if k >= data.len() {
        throw_size_mismatch(k as u64, data.len() as u64);
    }
    if descending {
        data.select_nth_unstable_by(k, |a, b| cmp(b, a));
    } else {
        data.select_nth_unstable_by(k, cmp);
    }
}

fn topk_by<T: Copy>(data: &mut [T], k: usize, cmp: fn(&T, &T) -> Ordering, descending: bool) {
    select_by(data, k, cmp, descending);
    sort_by(&mut data[..k], cmp, descending);
}

/// Elementwise binary kernel body: checks sizes, allocates the result from
/// the context arena, maps.
///
/// # Safety
/// `ctx` must point to a live [`ExecContext`].
unsafe fn binary_map<T: Copy + Default>(
    ctx: *mut ExecContext,
    a: VectorView<'_, T>,
    b: VectorView<'_, T>,
    f: fn(T, T) -> T,
) -> VectorView<'static, T> {
    if a.len() != b.len() {
        throw_size_mismatch(a.len() as u64, b.len() as u64);
    }
    let ctx = &*ctx;
    let out = ctx.arena().alloc_slice_fill(a.len(), T::default());
    for (o, (x, y)) in out.iter_mut().zip(a.as_slice().iter().zip(b.as_slice())) {
        *o = f(*x, *y);
    }
    VectorView::from_raw_parts(out.as_mut_ptr(), out.len())
}

macro_rules! sort_kernels {
    ($ty:ty, $cmp:expr, $sort:ident, $select:ident, $topk:ident) => {
        pub extern "C-unwind" fn $sort(
            _ctx: *mut ExecContext,
            mut data: VectorView<'_, $ty>,
            descending: bool,
        ) {
            sort_by(data.as_mut_slice(), $cmp, descending);
        }

        pub extern "C-unwind" fn $select(
            _ctx: *mut ExecContext,
            mut data: VectorView<'_, $ty>,
            k: u64,
            descending: bool,
        ) {
            select_by(data.as_mut_slice(), k as usize, $cmp, descending);
        }

        pub extern "C-unwind" fn $topk(
            _ctx: *mut ExecContext,
            mut data: VectorView<'_, $ty>,
            k: u64,
            descending: bool,
        ) {
            topk_by(data.as_mut_slice(), k as usize, $cmp, descending);
        }
    };
}

macro_rules! arith_kernels {
    ($ty:ty, $add:ident, $sub:ident, $mul:ident, $div:ident) => {
        pub extern "C-unwind" fn $add(
            ctx: *mut ExecContext,
            a: VectorView<'_, $ty>,
            b: VectorView<'_, $ty>,
        ) -> VectorView<'static, $ty> {
            unsafe { binary_map(ctx, a, b, |x, y| x + y) }
        }

        pub extern "C-unwind" fn $sub(
            ctx: *mut ExecContext,
            a: VectorView<'_, $ty>,
            b: VectorView<'_, $ty>,
        ) -> VectorView<'static, $ty> {
            unsafe { binary_map(ctx, a, b, |x, y| x - y) }
        }

        pub extern "C-unwind" fn $mul(
            ctx: *mut ExecContext,
            a: VectorView<'_, $ty>,
            b: VectorView<'_, $ty>,
        ) -> VectorView<'static, $ty> {
            unsafe { binary_map(ctx, a, b, |x, y| x * y) }
        }

        pub extern "C-unwind" fn $div(
            ctx: *mut ExecContext,
            a: VectorView<'_, $ty>,
            b: VectorView<'_, $ty>,
        ) -> VectorView<'static, $ty> {
            unsafe { binary_map(ctx, a, b, |x, y| x / y) }
        }
    };
}

sort_kernels!(f32, |a, b| a.total_cmp(b), simd_vector_sort_f32, simd_vector_select_f32, simd_vector_topk_f32);
sort_kernels!(f64, |a, b| a.total_cmp(b), simd_vector_sort_f64, simd_vector_select_f64, simd_vector_topk_f64);
sort_kernels!(i32, |a, b| a.cmp(b), simd_vector_sort_i32, simd_vector_select_i32, simd_vector_topk_i32);
sort_kernels!(i64, |a, b| a.cmp(b), simd_vector_sort_i64, simd_vector_select_i64, simd_vector_topk_i64);

arith_kernels!(f32, simd_vector_add_f32_f32, simd_vector_sub_f32_f32, simd_vector_mul_f32_f32, simd_vector_div_f32_f32);
arith_kernels!(f64, simd_vector_add_f64_f64, simd_vector_sub_f64_f64, simd_vector_mul_f64_f64, simd_vector_div_f64_f64);
arith_kernels!(i32, simd_vector_add_i32_i32, simd_vector_sub_i32_i32, simd_vector_mul_i32_i32, simd_vector_div_i32_i32);
arith_kernels!(i64, simd_vector_add_i64_i64, simd_vector_sub_i64_i64, simd_vector_mul_i64_i64, simd_vector_div_i64_i64);

pub extern "C-unwind" fn simd_vector_and_u64_u64(
    ctx: *mut ExecContext,
    a: VectorView<'_, u64>,
    b: VectorView<'_, u64>,
) -> VectorView<'static, u64> {
    unsafe { binary_map(ctx, a, b, |x, y| x & y) }
}

pub extern "C-unwind" fn simd_vector_or_u64_u64(
    ctx: *mut ExecContext,
    a: VectorView<'_, u64>,
    b: VectorView<'_, u64>,
) -> VectorView<'static, u64> {
    unsafe { binary_map(ctx, a, b, |x, y| x | y) }
}

pub extern "C-unwind" fn simd_vector_xor_u64_u64(
    ctx: *mut ExecContext,
    a: VectorView<'_, u64>,
    b: VectorView<'_, u64>,
) -> VectorView<'static, u64> {
    unsafe { binary_map(ctx, a, b, |x, y| x ^ y) }
}

pub extern "C-unwind" fn simd_vector_not_u64(
    ctx: *mut ExecContext,
    a: VectorView<'_, u64>,
) -> VectorView<'static, u64> {
    // Unary form of binary_map; reuse with a dummy rhs would double the
    // arena traffic, so map in place over a fresh copy.
    let ctx = unsafe { &*ctx };
    let out = ctx.arena().alloc_slice(a.as_slice());
    for o in out.iter_mut() {
        *o = !*o;
    }
    unsafe { VectorView::from_raw_parts(out.as_mut_ptr(), out.len()) }
}

pub extern "C-unwind" fn abs_f64(x: f64) -> f64 {
    x.abs()
}

pub extern "C-unwind" fn sqrt_f64(x: f64) -> f64 {
    x.sqrt()
}

pub extern "C-unwind" fn pow_f64_f64(x: f64, y: f64) -> f64 {
    x.powf(y)
}

/// Register every builtin kernel. The sole mechanism by which these become
/// visible to the compiler; duplicate names are rejected by the registry.
pub fn register_builtin_kernels(registry: &mut FunctionRegistry) {
    let ctx = DType::CtxPtr;

    macro_rules! reg {
        ($name:expr, $ret:expr, $args:expr, $f:expr) => {
            registry.register(FunctionDesc::new($name, $ret, $args, $f as usize));
        };
    }

    macro_rules! reg_sort_family {
        ($elem:expr, $sort:ident, $select:ident, $topk:ident) => {
            let v = DType::Simd($elem);
            reg!(
                format!("simd_vector_sort_{}", $elem.type_string()),
                DType::Void,
                vec![ctx, v, DType::BIT],
                $sort
            );
            reg!(
                format!("simd_vector_select_{}", $elem.type_string()),
                DType::Void,
                vec![ctx, v, DType::U64, DType::BIT],
                $select
            );
            reg!(
                format!("simd_vector_topk_{}", $elem.type_string()),
                DType::Void,
                vec![ctx, v, DType::U64, DType::BIT],
                $topk
            );
        };
    }

    macro_rules! reg_arith_family {
        ($elem:expr, $add:ident, $sub:ident, $mul:ident, $div:ident) => {
            let v = DType::Simd($elem);
            let t = $elem.type_string();
            reg!(format!("simd_vector_add_{t}_{t}"), v, vec![ctx, v, v], $add);
            reg!(format!("simd_vector_sub_{t}_{t}"), v, vec![ctx, v, v], $sub);
            reg!(format!("simd_vector_mul_{t}_{t}"), v, vec![ctx, v, v], $mul);
            reg!(format!("simd_vector_div_{t}_{t}"), v, vec![ctx, v, v], $div);
        };
    }

    reg_sort_family!(ScalarType::F32, simd_vector_sort_f32, simd_vector_select_f32, simd_vector_topk_f32);
    reg_sort_family!(ScalarType::F64, simd_vector_sort_f64, simd_vector_select_f64, simd_vector_topk_f64);
    reg_sort_family!(ScalarType::I32, simd_vector_sort_i32, simd_vector_select_i32, simd_vector_topk_i32);
    reg_sort_family!(ScalarType::I64, simd_vector_sort_i64, simd_vector_select_i64, simd_vector_topk_i64);

    reg_arith_family!(ScalarType::F32, simd_vector_add_f32_f32, simd_vector_sub_f32_f32, simd_vector_mul_f32_f32, simd_vector_div_f32_f32);
    reg_arith_family!(ScalarType::F64, simd_vector_add_f64_f64, simd_vector_sub_f64_f64, simd_vector_mul_f64_f64, simd_vector_div_f64_f64);
    reg_arith_family!(ScalarType::I32, simd_vector_add_i32_i32, simd_vector_sub_i32_i32, simd_vector_mul_i32_i32, simd_vector_div_i32_i32);
    reg_arith_family!(ScalarType::I64, simd_vector_add_i64_i64, simd_vector_sub_i64_i64, simd_vector_mul_i64_i64, simd_vector_div_i64_i64);

    let vu64 = DType::Simd(ScalarType::U64);
    reg!("simd_vector_and_u64_u64", vu64, vec![ctx, vu64, vu64], simd_vector_and_u64_u64);
    reg!("simd_vector_or_u64_u64", vu64, vec![ctx, vu64, vu64], simd_vector_or_u64_u64);
    reg!("simd_vector_xor_u64_u64", vu64, vec![ctx, vu64, vu64], simd_vector_xor_u64_u64);
    reg!("simd_vector_not_u64", vu64, vec![ctx, vu64], simd_vector_not_u64);

    reg!("abs_f64", DType::F64, vec![DType::F64], abs_f64);
    reg!("sqrt_f64", DType::F64, vec![DType::F64], sqrt_f64);
    reg!("pow_f64_f64", DType::F64, vec![DType::F64, DType::F64], pow_f64_f64);

    reg!(
        THROW_SIZE_MISMATCH_FUNC,
        DType::Void,
        vec![DType::U64, DType::U64],
        throw_size_mismatch
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_exposes_kernels_by_mangled_name() {
        let mut reg = FunctionRegistry::new();
        register_builtin_kernels(&mut reg);

        let sort = reg.get_function("simd_vector_sort_f32").expect("sort kernel");
        assert_eq!(sort.context_arg_idx, Some(0));
        assert_eq!(sort.return_type, DType::Void);
        assert_eq!(sort.arg_types.len(), 3);

        assert!(reg.get_function("simd_vector_add_i64_i64").is_some());
        assert!(reg.get_function(THROW_SIZE_MISMATCH_FUNC).is_some());
    }

    #[test]
    fn sort_kernel_sorts_both_directions() {
        let mut ctx = ExecContext::new();
        let mut data = vec![3.0f32, 1.0, 2.0];
        simd_vector_sort_f32(&mut ctx, VectorView::new(&mut data), false);
        assert_eq!(data, vec![1.0, 2.0, 3.0]);
        simd_vector_sort_f32(&mut ctx, VectorView::new(&mut data), true);
        assert_eq!(data, vec![3.0, 2.0, 1.0]);
    }

    #[test]
    fn topk_partitions_and_orders_prefix() {
        let mut ctx = ExecContext::new();
        let mut data = vec![5i64, 1, 4, 2, 3];
        simd_vector_topk_i64(&mut ctx, VectorView::new(&mut data), 2, true);
        assert_eq!(&data[..2], &[5, 4]);
    }

    #[test]
    fn vector_add_allocates_from_context() {
        let ctx = ExecContext::new();
        let mut a = vec![1.0f64, 2.0];
        let mut b = vec![10.0f64, 20.0];
        let out = simd_vector_add_f64_f64(
            &ctx as *const _ as *mut ExecContext,
            VectorView::new(&mut a),
            VectorView::new(&mut b),
        );
        assert_eq!(out.as_slice(), &[11.0, 22.0]);
        assert!(ctx.memory_usage() > 0);
    }

    #[test]
    #[should_panic(expected = "size mismatch")]
    fn mismatched_lengths_throw() {
        let ctx = ExecContext::new();
        let mut a = vec![1i32, 2];
        let mut b = vec![1i32];
        let _ = simd_vector_add_i32_i32(
            &ctx as *const _ as *mut ExecContext,
            VectorView::new(&mut a),
            VectorView::new(&mut b),
        );
    }
}
