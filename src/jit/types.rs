//! Semantic type to LLVM type mapping.
//!
//! Scalars map onto the matching integer/float types (the boolean bit is
//! `i1`), every span-like type shares one `{ ptr, i64 }` struct layout,
//! and pointers (including the context handle) are untyped byte pointers.
//! Signature construction applies the register-budget classification from
//! [`FunctionDesc`]: spilled span-like arguments become pointer parameters
//! carrying `byval` attributes.

use inkwell::attributes::Attribute;
use inkwell::context::Context;
use inkwell::types::{AnyType, BasicMetadataTypeEnum, BasicType, BasicTypeEnum, FunctionType};
use inkwell::AddressSpace;

use crate::dtype::{DType, ScalarType};
use crate::error::{CompileError, CompileResult};
use crate::function::FunctionDesc;

/// LLVM representation of `dtype`. `None` for `Void`, which only appears
/// in return position.
pub fn llvm_type<'ctx>(context: &'ctx Context, dtype: DType) -> Option<BasicTypeEnum<'ctx>> {
    match dtype {
        DType::Void => None,
        DType::Scalar(s) => Some(scalar_type(context, s)),
        DType::Simd(_) | DType::Span(_) | DType::StringView => {
            let ptr = context.i8_type().ptr_type(AddressSpace::default());
            Some(
                context
                    .struct_type(&[ptr.into(), context.i64_type().into()], false)
                    .into(),
            )
        }
        DType::Ptr | DType::CtxPtr => Some(
            context
                .i8_type()
                .ptr_type(AddressSpace::default())
                .into(),
        ),
    }
}

fn scalar_type<'ctx>(context: &'ctx Context, s: ScalarType) -> BasicTypeEnum<'ctx> {
    match s {
        ScalarType::Bit => context.bool_type().into(),
        ScalarType::I8 | ScalarType::U8 => context.i8_type().into(),
        ScalarType::I16 | ScalarType::U16 => context.i16_type().into(),
        ScalarType::I32 | ScalarType::U32 => context.i32_type().into(),
        ScalarType::I64 | ScalarType::U64 => context.i64_type().into(),
        ScalarType::F32 => context.f32_type().into(),
        ScalarType::F64 => context.f64_type().into(),
    }
}

/// LLVM function type for `desc`, with spilled span-like arguments
/// rewritten to pointer parameters per [`FunctionDesc::pass_arg_by_address`].
pub fn function_llvm_type<'ctx>(
    context: &'ctx Context,
    desc: &FunctionDesc,
) -> CompileResult<FunctionType<'ctx>> {
    let mut params: Vec<BasicMetadataTypeEnum<'ctx>> = Vec::with_capacity(desc.arg_types.len());
    for (i, dtype) in desc.arg_types.iter().enumerate() {
        let base = llvm_type(context, *dtype)
            .ok_or(CompileError::UnsupportedType { dtype: *dtype })?;
        if desc.pass_arg_by_address(i) {
            params.push(base.ptr_type(AddressSpace::default()).into());
        } else {
            params.push(base.into());
        }
    }
    match llvm_type(context, desc.return_type) {
        Some(ret) => Ok(ret.fn_type(&params, false)),
        None => Ok(context.void_type().fn_type(&params, false)),
    }
}

/// Parameter attributes marking a spilled span-like argument: `byval` with
/// the pointee type, natural alignment, and `noundef`. Applied to both the
/// callee declaration and every call site so the two ABIs agree.
pub fn byaddr_attributes<'ctx>(
    context: &'ctx Context,
    pointee: BasicTypeEnum<'ctx>,
) -> [Attribute; 3] {
    let byval = context.create_type_attribute(
        Attribute::get_named_enum_kind_id("byval"),
        pointee.as_any_type_enum(),
    );
    let align = context.create_enum_attribute(Attribute::get_named_enum_kind_id("align"), 8);
    let noundef = context.create_enum_attribute(Attribute::get_named_enum_kind_id("noundef"), 0);
    [byval, align, noundef]
}
