//! LLVM-backed JIT pipeline.
//!
//! `types` maps semantic types onto LLVM types and builds ABI-correct
//! function signatures, `value` is the uniform SSA/stack-slot value
//! abstraction, `session` holds all per-unit LLVM state, `compiler`
//! drives the compile pipeline, and `lowering` walks function trees into
//! IR.

pub mod compiler;
pub mod lowering;
pub mod session;
pub mod types;
pub mod value;

pub use compiler::{JitCompiler, Options};
pub use session::{JitSession, JitStats};
pub use value::Value;
