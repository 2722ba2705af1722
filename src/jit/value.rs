//! Uniform value abstraction over SSA values and stack slots.
//!
//! A [`Value`] pairs a semantic type with either a first-class SSA value
//! or a pointer to an `alloca` slot plus the slot's storage type. Reads
//! are transparent: slot-backed values load on demand, SSA values hand
//! back the value directly. Mutation is only possible through slots.

use inkwell::builder::Builder;
use inkwell::context::Context;
use inkwell::types::BasicTypeEnum;
use inkwell::values::{BasicValue, BasicValueEnum, PointerValue};
use inkwell::{FloatPredicate, IntPredicate};

use crate::dtype::DType;
use crate::error::{CompileError, CompileResult};
use crate::jit::types::llvm_type;

#[derive(Debug, Clone)]
pub struct Value<'ctx> {
    dtype: DType,
    /// The SSA value, or the slot pointer when `storage` is present.
    val: Option<BasicValueEnum<'ctx>>,
    /// Storage type of the slot this value lives in, if any.
    storage: Option<BasicTypeEnum<'ctx>>,
}

impl<'ctx> Value<'ctx> {
    /// Read-only SSA value.
    pub fn ssa(dtype: DType, val: BasicValueEnum<'ctx>) -> Self {
        Self {
            dtype,
            val: Some(val),
            storage: None,
        }
    }

    /// Mutable value backed by a stack slot.
    pub fn slot(dtype: DType, ptr: PointerValue<'ctx>, ty: BasicTypeEnum<'ctx>) -> Self {
        Self {
            dtype,
            val: Some(ptr.into()),
            storage: Some(ty),
        }
    }

    /// Untyped placeholder; acquires type and storage on first `copy_from`.
    pub fn empty() -> Self {
        Self {
            dtype: DType::Void,
            val: None,
            storage: None,
        }
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn is_slot(&self) -> bool {
        self.storage.is_some()
    }

    /// Address of the backing slot, when there is one.
    pub fn addr(&self) -> Option<PointerValue<'ctx>> {
        match (&self.storage, &self.val) {
            (Some(_), Some(v)) => Some(v.into_pointer_value()),
            _ => None,
        }
    }

    /// Current value: a load for slot-backed values, the SSA value itself
    /// otherwise.
    pub fn read(&self, builder: &Builder<'ctx>) -> CompileResult<BasicValueEnum<'ctx>> {
        let v = self.val.ok_or_else(|| CompileError::InvalidValue {
            reason: "read of uninitialized value".to_string(),
        })?;
        match self.storage {
            Some(_) => Ok(builder.build_load(v.into_pointer_value(), "load")?),
            None => Ok(v),
        }
    }

    /// Overwrite the backing slot. Hard error on SSA-only values.
    pub fn store(&self, builder: &Builder<'ctx>, v: BasicValueEnum<'ctx>) -> CompileResult<()> {
        let ptr = self.addr().ok_or_else(|| CompileError::InvalidValue {
            reason: "store into value without storage".to_string(),
        })?;
        builder.build_store(ptr, v)?;
        Ok(())
    }

    /// Assignment. An untyped receiver adopts the source's type and
    /// allocates a slot for it; a typed receiver requires the exact same
    /// type and fails hard otherwise.
    pub fn copy_from(
        &mut self,
        other: &Value<'ctx>,
        context: &'ctx Context,
        builder: &Builder<'ctx>,
    ) -> CompileResult<()> {
        if self.dtype.is_void() && self.val.is_none() {
            let ty = llvm_type(context, other.dtype).ok_or(CompileError::UnsupportedType {
                dtype: other.dtype,
            })?;
            let ptr = builder.build_alloca(ty, "var")?;
            self.dtype = other.dtype;
            self.val = Some(ptr.into());
            self.storage = Some(ty);
        } else if self.dtype != other.dtype {
            return Err(CompileError::TypeMismatch {
                have: other.dtype,
                need: self.dtype,
            });
        }
        let incoming = other.read(builder)?;
        match self.storage {
            Some(_) => self.store(builder, incoming),
            None => {
                self.val = Some(incoming);
                Ok(())
            }
        }
    }

    /// Conditional merge with this value as the condition. Soft failure:
    /// branch type disagreement or an unreadable operand logs and yields
    /// `None` rather than aborting the whole compile.
    pub fn select(
        &self,
        true_val: &Value<'ctx>,
        false_val: &Value<'ctx>,
        builder: &Builder<'ctx>,
    ) -> Option<Value<'ctx>> {
        if true_val.dtype != false_val.dtype {
            log::error!(
                "can NOT select between {} and {}",
                true_val.dtype,
                false_val.dtype
            );
            return None;
        }
        let cond = match self.read(builder) {
            Ok(v) => v.into_int_value(),
            Err(e) => {
                log::error!("select cond read failed: {e}");
                return None;
            }
        };
        let (t, f) = match (true_val.read(builder), false_val.read(builder)) {
            (Ok(t), Ok(f)) => (t, f),
            _ => {
                log::error!("select operand read failed");
                return None;
            }
        };
        match builder.build_select(cond, t, f, "select") {
            Ok(v) => Some(Value::ssa(true_val.dtype, v)),
            Err(e) => {
                log::error!("select build failed: {e}");
                None
            }
        }
    }

    /// Convert to `target`. Identity is free; otherwise the conversion must
    /// be permitted by [`DType::can_cast_to`]. The result is a fresh SSA
    /// value, never a slot.
    pub fn cast_to(
        &self,
        target: DType,
        context: &'ctx Context,
        builder: &Builder<'ctx>,
    ) -> CompileResult<Value<'ctx>> {
        if self.dtype == target {
            return Ok(self.clone());
        }
        if !self.dtype.can_cast_to(&target) {
            return Err(CompileError::InvalidCast {
                from: self.dtype,
                to: target,
            });
        }
        let v = self.read(builder)?;

        // Simd view reinterprets as a span of the same element, same layout.
        if self.dtype.is_simd_vector() {
            return Ok(Value::ssa(target, v));
        }

        let target_ty = llvm_type(context, target)
            .ok_or(CompileError::UnsupportedType { dtype: target })?;
        let from_elem = self.dtype.elem().ok_or(CompileError::InvalidCast {
            from: self.dtype,
            to: target,
        })?;
        let out: BasicValueEnum<'ctx> = if target.is_bit() {
            if self.dtype.is_float() {
                let zero = v.get_type().into_float_type().const_zero();
                builder
                    .build_float_compare(FloatPredicate::ONE, v.into_float_value(), zero, "tobit")?
                    .as_basic_value_enum()
            } else {
                let zero = v.get_type().into_int_type().const_zero();
                builder
                    .build_int_compare(IntPredicate::NE, v.into_int_value(), zero, "tobit")?
                    .as_basic_value_enum()
            }
        } else if self.dtype.is_bit() {
            builder
                .build_int_z_extend(v.into_int_value(), target_ty.into_int_type(), "frombit")?
                .as_basic_value_enum()
        } else if self.dtype.is_float() {
            if target.is_float() {
                builder
                    .build_float_cast(v.into_float_value(), target_ty.into_float_type(), "fcast")?
                    .as_basic_value_enum()
            } else if target.elem().map(|e| e.is_signed()).unwrap_or(false) {
                builder
                    .build_float_to_signed_int(
                        v.into_float_value(),
                        target_ty.into_int_type(),
                        "ftoi",
                    )?
                    .as_basic_value_enum()
            } else {
                builder
                    .build_float_to_unsigned_int(
                        v.into_float_value(),
                        target_ty.into_int_type(),
                        "ftou",
                    )?
                    .as_basic_value_enum()
            }
        } else if target.is_float() {
            if from_elem.is_signed() {
                builder
                    .build_signed_int_to_float(
                        v.into_int_value(),
                        target_ty.into_float_type(),
                        "itof",
                    )?
                    .as_basic_value_enum()
            } else {
                builder
                    .build_unsigned_int_to_float(
                        v.into_int_value(),
                        target_ty.into_float_type(),
                        "utof",
                    )?
                    .as_basic_value_enum()
            }
        } else {
            builder
                .build_int_cast_sign_flag(
                    v.into_int_value(),
                    target_ty.into_int_type(),
                    from_elem.is_signed(),
                    "icast",
                )?
                .as_basic_value_enum()
        };
        Ok(Value::ssa(target, out))
    }
}
