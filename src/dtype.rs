//! Semantic type model.
//!
//! Every value flowing through the compiler carries a [`DType`]: a scalar
//! kind, a vector/span over a scalar element, a string view, an opaque
//! pointer, or the distinguished execution-context handle. The type layer
//! only answers structural questions (equality, castability, element kind,
//! canonical name token); LLVM type construction lives in `jit::types`.

use std::fmt;

/// Scalar element kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarType {
    /// Boolean bit.
    Bit,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
}

impl ScalarType {
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            ScalarType::I8
                | ScalarType::I16
                | ScalarType::I32
                | ScalarType::I64
                | ScalarType::U8
                | ScalarType::U16
                | ScalarType::U32
                | ScalarType::U64
        )
    }

    pub fn is_signed(&self) -> bool {
        matches!(
            self,
            ScalarType::I8 | ScalarType::I16 | ScalarType::I32 | ScalarType::I64
        )
    }

    pub fn is_float(&self) -> bool {
        matches!(self, ScalarType::F32 | ScalarType::F64)
    }

    /// Width in bits. The boolean bit reports 1.
    pub fn bits(&self) -> u32 {
        match self {
            ScalarType::Bit => 1,
            ScalarType::I8 | ScalarType::U8 => 8,
            ScalarType::I16 | ScalarType::U16 => 16,
            ScalarType::I32 | ScalarType::U32 | ScalarType::F32 => 32,
            ScalarType::I64 | ScalarType::U64 | ScalarType::F64 => 64,
        }
    }

    /// Canonical token used in mangled function names.
    pub fn type_string(&self) -> &'static str {
        match self {
            ScalarType::Bit => "bit",
            ScalarType::I8 => "i8",
            ScalarType::I16 => "i16",
            ScalarType::I32 => "i32",
            ScalarType::I64 => "i64",
            ScalarType::U8 => "u8",
            ScalarType::U16 => "u16",
            ScalarType::U32 => "u32",
            ScalarType::U64 => "u64",
            ScalarType::F32 => "f32",
            ScalarType::F64 => "f64",
        }
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_string())
    }
}

/// Semantic type of one value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    Void,
    Scalar(ScalarType),
    /// Vector of scalar elements, logically a pointer + length pair.
    Simd(ScalarType),
    /// Borrowed span over scalar elements.
    Span(ScalarType),
    /// String-view-like byte span.
    StringView,
    /// Opaque pointer.
    Ptr,
    /// Execution context handle, auto-threaded through nested calls.
    CtxPtr,
}

impl DType {
    pub const BIT: DType = DType::Scalar(ScalarType::Bit);
    pub const I8: DType = DType::Scalar(ScalarType::I8);
    pub const I16: DType = DType::Scalar(ScalarType::I16);
    pub const I32: DType = DType::Scalar(ScalarType::I32);
    pub const I64: DType = DType::Scalar(ScalarType::I64);
    pub const U8: DType = DType::Scalar(ScalarType::U8);
    pub const U16: DType = DType::Scalar(ScalarType::U16);
    pub const U32: DType = DType::Scalar(ScalarType::U32);
    pub const U64: DType = DType::Scalar(ScalarType::U64);
    pub const F32: DType = DType::Scalar(ScalarType::F32);
    pub const F64: DType = DType::Scalar(ScalarType::F64);

    pub fn is_void(&self) -> bool {
        matches!(self, DType::Void)
    }

    pub fn is_bit(&self) -> bool {
        matches!(self, DType::Scalar(ScalarType::Bit))
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, DType::Scalar(s) if s.is_integer())
    }

    pub fn is_float(&self) -> bool {
        matches!(self, DType::Scalar(s) if s.is_float())
    }

    pub fn is_numeric(&self) -> bool {
        self.is_integer() || self.is_float()
    }

    pub fn is_simd_vector(&self) -> bool {
        matches!(self, DType::Simd(_))
    }

    /// Vector, span, and string-view types are logically pointer + length
    /// pairs and share ABI classification.
    pub fn is_span_like(&self) -> bool {
        matches!(self, DType::Simd(_) | DType::Span(_) | DType::StringView)
    }

    pub fn is_ptr(&self) -> bool {
        matches!(self, DType::Ptr | DType::CtxPtr)
    }

    pub fn is_ctx_ptr(&self) -> bool {
        matches!(self, DType::CtxPtr)
    }

    /// Element scalar kind. Scalars report themselves; string views report
    /// bytes; other shapes have no element.
    pub fn elem(&self) -> Option<ScalarType> {
        match self {
            DType::Scalar(s) | DType::Simd(s) | DType::Span(s) => Some(*s),
            DType::StringView => Some(ScalarType::U8),
            _ => None,
        }
    }

    /// Whether a value of this type may be implicitly converted to `other`
    /// at a call boundary. Identity always holds. Numeric scalars convert
    /// freely among themselves (and to the boolean bit through a zero
    /// test); the boolean bit converts to integers.
    /// Span-like types never convert to scalars of a different element
    /// type, or to each other.
    pub fn can_cast_to(&self, other: &DType) -> bool {
        if self == other {
            return true;
        }
        match (self, other) {
            (DType::Scalar(from), DType::Scalar(to)) => {
                if from.is_float() || from.is_integer() {
                    to.is_float() || to.is_integer() || *to == ScalarType::Bit
                } else {
                    // bit widens to any integer and back
                    *from == ScalarType::Bit && (to.is_integer() || *to == ScalarType::Bit)
                }
            }
            (DType::Scalar(from), _) if *from == ScalarType::Bit => false,
            (DType::Simd(a), DType::Span(b)) => a == b,
            _ => false,
        }
    }

    /// Result type of a binary arithmetic operator over two scalar types:
    /// float beats integer, wider beats narrower. `None` when no common
    /// type exists.
    pub fn promote(a: DType, b: DType) -> Option<DType> {
        if a == b {
            return Some(a);
        }
        let (sa, sb) = match (a, b) {
            (DType::Scalar(sa), DType::Scalar(sb)) => (sa, sb),
            _ => return None,
        };
        if !(sa.is_float() || sa.is_integer()) || !(sb.is_float() || sb.is_integer()) {
            return None;
        }
        let pick = if sa.is_float() == sb.is_float() {
            if sa.bits() >= sb.bits() {
                sa
            } else {
                sb
            }
        } else if sa.is_float() {
            sa
        } else {
            sb
        };
        Some(DType::Scalar(pick))
    }

    /// Canonical token used in mangled function names.
    pub fn type_string(&self) -> String {
        match self {
            DType::Void => "void".to_string(),
            DType::Scalar(s) => s.type_string().to_string(),
            DType::Simd(s) => format!("simd_vector_{}", s.type_string()),
            DType::Span(s) => format!("span_{}", s.type_string()),
            DType::StringView => "string_view".to_string(),
            DType::Ptr => "ptr".to_string(),
            DType::CtxPtr => "ctx_ptr".to_string(),
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.type_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_scalars_cast_freely() {
        assert!(DType::I32.can_cast_to(&DType::I64));
        assert!(DType::I64.can_cast_to(&DType::I32));
        assert!(DType::I32.can_cast_to(&DType::F64));
        assert!(DType::F32.can_cast_to(&DType::U16));
        assert!(DType::BIT.can_cast_to(&DType::I64));
        assert!(DType::I64.can_cast_to(&DType::BIT));
    }

    #[test]
    fn vectors_never_cast_to_foreign_scalars() {
        let v = DType::Simd(ScalarType::F32);
        assert!(v.can_cast_to(&v));
        assert!(!v.can_cast_to(&DType::F32));
        assert!(!v.can_cast_to(&DType::Simd(ScalarType::F64)));
        assert!(!DType::F32.can_cast_to(&v));
        assert!(v.can_cast_to(&DType::Span(ScalarType::F32)));
    }

    #[test]
    fn promotion_prefers_float_and_width() {
        assert_eq!(DType::promote(DType::I32, DType::I64), Some(DType::I64));
        assert_eq!(DType::promote(DType::I64, DType::F32), Some(DType::F32));
        assert_eq!(DType::promote(DType::F32, DType::F64), Some(DType::F64));
        assert_eq!(DType::promote(DType::I32, DType::Ptr), None);
    }

    #[test]
    fn type_strings_are_stable() {
        assert_eq!(DType::I32.type_string(), "i32");
        assert_eq!(DType::Simd(ScalarType::F64).type_string(), "simd_vector_f64");
        assert_eq!(DType::StringView.type_string(), "string_view");
    }
}
