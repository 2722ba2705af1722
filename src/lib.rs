//! An LLVM-backed JIT compiler for expression functions.
//!
//! Functions arrive as trees ([`ast::FunctionAst`]), compile as one unit
//! into a single LLVM module, and link in-process through MCJIT. Host
//! functions become callable from generated code by registering their
//! signatures and addresses in a [`registry::FunctionRegistry`]; operators
//! over vector operands resolve to registered kernels by canonical name
//! mangling, so scalars lower to native instructions while vectors lower
//! to calls with no special cases in the tree walker.
//!
//! ```no_run
//! use exprjit::ast::{Expr, FunctionArg, FunctionAst, BinaryOp, Stmt};
//! use exprjit::dtype::DType;
//! use exprjit::jit::{JitCompiler, Options};
//! use exprjit::registry::FunctionRegistry;
//! use std::sync::Arc;
//!
//! let context = inkwell::context::Context::create();
//! let mut registry = FunctionRegistry::new();
//! exprjit::kernels::register_builtin_kernels(&mut registry);
//! let mut jit = JitCompiler::new(&context, Arc::new(registry), Options::default());
//!
//! let f = FunctionAst::new(
//!     "add2",
//!     DType::I64,
//!     vec![FunctionArg::new("a", DType::I64), FunctionArg::new("b", DType::I64)],
//!     vec![Stmt::Return(Some(Expr::binary(
//!         BinaryOp::Add,
//!         Expr::var("a"),
//!         Expr::var("b"),
//!     )))],
//! );
//! jit.compile(&[f]).unwrap();
//! let addr = jit.get_function_ptr("add2").unwrap();
//! let add2: extern "C" fn(i64, i64) -> i64 = unsafe { std::mem::transmute(addr) };
//! assert_eq!(add2(2, 3), 5);
//! ```

pub mod arena;
pub mod ast;
pub mod context;
pub mod dtype;
pub mod error;
pub mod function;
pub mod jit;
pub mod kernels;
pub mod registry;
pub mod vector;

pub use arena::{Arena, ThreadCachedArena};
pub use ast::{BinaryOp, Expr, FunctionArg, FunctionAst, Stmt, UnaryOp};
pub use context::ExecContext;
pub use dtype::{DType, ScalarType};
pub use error::{CompileError, CompileResult};
pub use function::FunctionDesc;
pub use jit::{JitCompiler, Options};
pub use registry::FunctionRegistry;
pub use vector::{StringView, VectorView};
