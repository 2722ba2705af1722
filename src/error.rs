//! Compiler error types.

use crate::dtype::DType;
use thiserror::Error;

/// Errors surfaced by compilation and by post-compile lookups.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("function `{name}` not found in unit or registry")]
    FunctionNotFound { name: String },

    #[error("function `{name}` declared more than once in the unit")]
    DuplicateFunction { name: String },

    #[error("call to `{name}` expects {expected} args, {given} given")]
    ArityMismatch {
        name: String,
        expected: usize,
        given: usize,
    },

    #[error("cannot cast {from} to {to}")]
    InvalidCast { from: DType, to: DType },

    #[error("type mismatch: have {have}, need {need}")]
    TypeMismatch { have: DType, need: DType },

    #[error("signature of `{name}` does not match the requested prototype")]
    SignatureMismatch { name: String },

    #[error("type {dtype} has no machine representation")]
    UnsupportedType { dtype: DType },

    #[error("undefined variable `{name}`")]
    UndefinedVariable { name: String },

    #[error("ir verification failed: {reason}")]
    VerifyFailed { reason: String },

    #[error("jit link failed: {reason}")]
    LinkFailed { reason: String },

    #[error("symbol `{name}` missing from linked unit")]
    SymbolNotFound { name: String },

    #[error("no compiled session, compile a unit first")]
    NoSession,

    #[error("invalid value: {reason}")]
    InvalidValue { reason: String },

    #[error("ir builder error: {0}")]
    Builder(#[from] inkwell::builder::BuilderError),
}

pub type CompileResult<T> = Result<T, CompileError>;
