//! End-to-end tests: build trees, compile, link, call native entry points.

use std::mem;
use std::sync::Arc;

use inkwell::context::Context;

use exprjit::ast::{BinaryOp, Expr, FunctionArg, FunctionAst, Stmt, UnaryOp};
use exprjit::dtype::{DType, ScalarType};
use exprjit::error::CompileError;
use exprjit::jit::{JitCompiler, Options};
use exprjit::kernels;
use exprjit::registry::FunctionRegistry;
use exprjit::ExecContext;
use exprjit::FunctionDesc;
use exprjit::VectorView;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn builtin_registry() -> Arc<FunctionRegistry> {
    let mut registry = FunctionRegistry::new();
    kernels::register_builtin_kernels(&mut registry);
    Arc::new(registry)
}

#[test]
fn scalar_add_compiles_and_runs() {
    init_logging();
    let context = Context::create();
    let mut jit = JitCompiler::new(&context, builtin_registry(), Options::default());

    let f = FunctionAst::new(
        "add2",
        DType::I64,
        vec![
            FunctionArg::new("a", DType::I64),
            FunctionArg::new("b", DType::I64),
        ],
        vec![Stmt::Return(Some(Expr::binary(
            BinaryOp::Add,
            Expr::var("a"),
            Expr::var("b"),
        )))],
    );
    let names = jit.compile(&[f]).expect("compile");
    assert_eq!(names, vec!["add2".to_string()]);

    let addr = jit.get_function_ptr("add2").expect("linked symbol");
    let add2: extern "C" fn(i64, i64) -> i64 = unsafe { mem::transmute(addr) };
    assert_eq!(add2(2, 3), 5);
    assert_eq!(add2(-1, 1), 0);
}

#[test]
fn branches_and_loops_lower_correctly() {
    init_logging();
    let context = Context::create();
    let mut jit = JitCompiler::new(&context, builtin_registry(), Options::default());

    // abs through if/else, early return in the then branch.
    let abs = FunctionAst::new(
        "my_abs",
        DType::I64,
        vec![FunctionArg::new("x", DType::I64)],
        vec![
            Stmt::If {
                cond: Expr::binary(BinaryOp::Lt, Expr::var("x"), Expr::Int(0)),
                then_body: vec![Stmt::Return(Some(Expr::Unary {
                    op: UnaryOp::Neg,
                    expr: Box::new(Expr::var("x")),
                }))],
                else_body: vec![],
            },
            Stmt::Return(Some(Expr::var("x"))),
        ],
    );

    // sum of 1..=n through a while loop over mutable locals.
    let sum = FunctionAst::new(
        "sum_to",
        DType::I64,
        vec![FunctionArg::new("n", DType::I64)],
        vec![
            Stmt::Assign {
                name: "acc".to_string(),
                expr: Expr::Int(0),
            },
            Stmt::Assign {
                name: "i".to_string(),
                expr: Expr::Int(1),
            },
            Stmt::While {
                cond: Expr::binary(BinaryOp::Le, Expr::var("i"), Expr::var("n")),
                body: vec![
                    Stmt::Assign {
                        name: "acc".to_string(),
                        expr: Expr::binary(BinaryOp::Add, Expr::var("acc"), Expr::var("i")),
                    },
                    Stmt::Assign {
                        name: "i".to_string(),
                        expr: Expr::binary(BinaryOp::Add, Expr::var("i"), Expr::Int(1)),
                    },
                ],
            },
            Stmt::Return(Some(Expr::var("acc"))),
        ],
    );

    jit.compile(&[abs, sum]).expect("compile");

    let my_abs: extern "C" fn(i64) -> i64 =
        unsafe { mem::transmute(jit.get_function_ptr("my_abs").unwrap()) };
    assert_eq!(my_abs(-7), 7);
    assert_eq!(my_abs(7), 7);

    let sum_to: extern "C" fn(i64) -> i64 =
        unsafe { mem::transmute(jit.get_function_ptr("sum_to").unwrap()) };
    assert_eq!(sum_to(10), 55);
    assert_eq!(sum_to(0), 0);
}

#[test]
fn unit_functions_call_each_other() {
    init_logging();
    let context = Context::create();
    let mut jit = JitCompiler::new(&context, builtin_registry(), Options::default());

    let double = FunctionAst::new(
        "double",
        DType::I64,
        vec![FunctionArg::new("x", DType::I64)],
        vec![Stmt::Return(Some(Expr::binary(
            BinaryOp::Mul,
            Expr::var("x"),
            Expr::Int(2),
        )))],
    );
    let quad = FunctionAst::new(
        "quad",
        DType::I64,
        vec![FunctionArg::new("x", DType::I64)],
        vec![Stmt::Return(Some(Expr::call(
            "double",
            vec![Expr::call("double", vec![Expr::var("x")])],
        )))],
    );
    jit.compile(&[double, quad]).expect("compile");

    let quad: extern "C" fn(i64) -> i64 =
        unsafe { mem::transmute(jit.get_function_ptr("quad").unwrap()) };
    assert_eq!(quad(3), 12);
}

extern "C-unwind" fn fma_f64(a: f64, b: f64, c: f64) -> f64 {
    a.mul_add(b, c)
}

#[test]
fn registered_host_functions_are_callable() {
    init_logging();
    let mut registry = FunctionRegistry::new();
    kernels::register_builtin_kernels(&mut registry);
    assert!(registry.register(FunctionDesc::new(
        "fma_f64",
        DType::F64,
        vec![DType::F64, DType::F64, DType::F64],
        fma_f64 as usize,
    )));

    let context = Context::create();
    let mut jit = JitCompiler::new(&context, Arc::new(registry), Options::default());

    let f = FunctionAst::new(
        "affine",
        DType::F64,
        vec![FunctionArg::new("x", DType::F64)],
        vec![Stmt::Return(Some(Expr::call(
            "fma_f64",
            vec![Expr::var("x"), Expr::Float(3.0), Expr::Float(1.0)],
        )))],
    );
    jit.compile(&[f]).expect("compile");

    let affine: extern "C" fn(f64) -> f64 =
        unsafe { mem::transmute(jit.get_function_ptr("affine").unwrap()) };
    assert_eq!(affine(2.0), 7.0);

    // sqrt from the builtin scalar kernels, through an implicit i64->f64 cast.
    let g = FunctionAst::new(
        "root",
        DType::F64,
        vec![FunctionArg::new("x", DType::I64)],
        vec![Stmt::Return(Some(Expr::call(
            "sqrt_f64",
            vec![Expr::var("x")],
        )))],
    );
    jit.compile(&[g]).expect("compile");
    let root: extern "C" fn(i64) -> f64 =
        unsafe { mem::transmute(jit.get_function_ptr("root").unwrap()) };
    assert_eq!(root(16), 4.0);
}

#[test]
fn context_handle_threads_into_kernel_calls() {
    init_logging();
    let context = Context::create();
    let mut jit = JitCompiler::new(&context, builtin_registry(), Options::default());

    // The call site passes (v, false); the compiler inserts the caller's
    // context handle at the kernel's declared index.
    let v = DType::Simd(ScalarType::F32);
    let f = FunctionAst::new(
        "sort_asc",
        DType::Void,
        vec![
            FunctionArg::new("ctx", DType::CtxPtr),
            FunctionArg::new("v", v),
        ],
        vec![Stmt::Expr(Expr::call(
            "simd_vector_sort_f32",
            vec![Expr::var("v"), Expr::Bool(false)],
        ))],
    );
    jit.compile(&[f]).expect("compile");

    let sort_asc: extern "C" fn(*mut ExecContext, VectorView<'_, f32>) =
        unsafe { mem::transmute(jit.get_function_ptr("sort_asc").unwrap()) };

    let mut ctx = ExecContext::new();
    let mut data = vec![3.0f32, 1.0, 2.0];
    sort_asc(&mut ctx, VectorView::new(&mut data));
    assert_eq!(data, vec![1.0, 2.0, 3.0]);
}

#[test]
fn vector_operators_run_through_kernels() {
    init_logging();
    let context = Context::create();
    let mut jit = JitCompiler::new(&context, builtin_registry(), Options::default());

    let v = DType::Simd(ScalarType::F64);
    let f = FunctionAst::new(
        "vsum",
        v,
        vec![
            FunctionArg::new("ctx", DType::CtxPtr),
            FunctionArg::new("a", v),
            FunctionArg::new("b", v),
        ],
        vec![Stmt::Return(Some(Expr::binary(
            BinaryOp::Add,
            Expr::var("a"),
            Expr::var("b"),
        )))],
    );
    jit.compile(&[f]).expect("compile");

    let vsum: extern "C" fn(
        *mut ExecContext,
        VectorView<'_, f64>,
        VectorView<'_, f64>,
    ) -> VectorView<'static, f64> =
        unsafe { mem::transmute(jit.get_function_ptr("vsum").unwrap()) };

    let mut ctx = ExecContext::new();
    let mut a = vec![1.0f64, 2.0, 3.0];
    let mut b = vec![10.0f64, 20.0, 30.0];
    let out = vsum(&mut ctx, VectorView::new(&mut a), VectorView::new(&mut b));
    assert_eq!(out.as_slice(), &[11.0, 22.0, 33.0]);
    assert!(ctx.memory_usage() > 0);
}

extern "C-unwind" fn weighted_sum(
    a: i64,
    b: i64,
    c: i64,
    d: i64,
    e: i64,
    v: VectorView<'_, f64>,
) -> f64 {
    (a + b + c + d + e) as f64 + v.as_slice().iter().sum::<f64>()
}

#[test]
fn spilled_vector_arguments_round_trip() {
    init_logging();

    // Five scalars ahead of the vector push its cumulative slot count to 7,
    // so both the host descriptor and the forwarder's own sixth parameter
    // classify by-address; the generated call and the callee must agree on
    // the layout for the values to survive.
    let arg_types = vec![
        DType::I64,
        DType::I64,
        DType::I64,
        DType::I64,
        DType::I64,
        DType::Simd(ScalarType::F64),
    ];
    let desc = FunctionDesc::new("weighted_sum", DType::F64, arg_types, weighted_sum as usize);
    assert!(desc.pass_arg_by_address(5));

    let mut registry = FunctionRegistry::new();
    kernels::register_builtin_kernels(&mut registry);
    assert!(registry.register(desc));

    let context = Context::create();
    let mut jit = JitCompiler::new(&context, Arc::new(registry), Options::default());

    let f = FunctionAst::new(
        "forward",
        DType::F64,
        vec![
            FunctionArg::new("a", DType::I64),
            FunctionArg::new("b", DType::I64),
            FunctionArg::new("c", DType::I64),
            FunctionArg::new("d", DType::I64),
            FunctionArg::new("e", DType::I64),
            FunctionArg::new("v", DType::Simd(ScalarType::F64)),
        ],
        vec![Stmt::Return(Some(Expr::call(
            "weighted_sum",
            vec![
                Expr::var("a"),
                Expr::var("b"),
                Expr::var("c"),
                Expr::var("d"),
                Expr::var("e"),
                Expr::var("v"),
            ],
        )))],
    );
    jit.compile(&[f]).expect("compile");

    let forward: extern "C" fn(i64, i64, i64, i64, i64, VectorView<'_, f64>) -> f64 =
        unsafe { mem::transmute(jit.get_function_ptr("forward").unwrap()) };

    let mut data = vec![0.5f64, 1.5, 3.0];
    let got = forward(1, 2, 3, 4, 5, VectorView::new(&mut data));
    assert_eq!(got, 20.0);
}

#[test]
fn unknown_callee_fails_and_poisons_lookups() {
    init_logging();
    let context = Context::create();
    let mut jit = JitCompiler::new(&context, builtin_registry(), Options::default());

    let f = FunctionAst::new(
        "broken",
        DType::I64,
        vec![FunctionArg::new("x", DType::I64)],
        vec![Stmt::Return(Some(Expr::call(
            "no_such_func",
            vec![Expr::var("x")],
        )))],
    );
    let err = jit.compile(&[f]).expect_err("unknown callee");
    assert!(matches!(err, CompileError::FunctionNotFound { .. }));

    // The failed compile installed no session.
    assert!(matches!(
        jit.get_function_ptr("broken"),
        Err(CompileError::NoSession)
    ));
}

#[test]
fn reassigning_a_variable_to_a_new_type_fails() {
    init_logging();
    let context = Context::create();
    let mut jit = JitCompiler::new(&context, builtin_registry(), Options::default());

    let f = FunctionAst::new(
        "retype",
        DType::I64,
        vec![],
        vec![
            Stmt::Assign {
                name: "x".to_string(),
                expr: Expr::Int(1),
            },
            Stmt::Assign {
                name: "x".to_string(),
                expr: Expr::Float(1.0),
            },
            Stmt::Return(Some(Expr::var("x"))),
        ],
    );
    let err = jit.compile(&[f]).expect_err("retyping assignment");
    assert!(matches!(err, CompileError::TypeMismatch { .. }));
}

#[test]
fn checked_lookup_enforces_exact_signature() {
    init_logging();
    let context = Context::create();
    let mut jit = JitCompiler::new(&context, builtin_registry(), Options::default());

    let f = FunctionAst::new(
        "id_f64",
        DType::F64,
        vec![FunctionArg::new("x", DType::F64)],
        vec![Stmt::Return(Some(Expr::var("x")))],
    );
    jit.compile(&[f]).expect("compile");

    assert!(jit
        .get_checked_function_ptr("id_f64", DType::F64, &[DType::F64])
        .is_ok());
    assert!(matches!(
        jit.get_checked_function_ptr("id_f64", DType::F64, &[DType::F32]),
        Err(CompileError::SignatureMismatch { .. })
    ));
    assert!(matches!(
        jit.get_checked_function_ptr("missing", DType::F64, &[DType::F64]),
        Err(CompileError::FunctionNotFound { .. })
    ));
}

#[test]
fn casts_and_select_produce_expected_values() {
    init_logging();
    let context = Context::create();
    let mut jit = JitCompiler::new(&context, builtin_registry(), Options::default());

    // max(x, y) through the conditional merge.
    let max = FunctionAst::new(
        "my_max",
        DType::F64,
        vec![
            FunctionArg::new("x", DType::F64),
            FunctionArg::new("y", DType::F64),
        ],
        vec![Stmt::Return(Some(Expr::Select {
            cond: Box::new(Expr::binary(BinaryOp::Gt, Expr::var("x"), Expr::var("y"))),
            true_expr: Box::new(Expr::var("x")),
            false_expr: Box::new(Expr::var("y")),
        }))],
    );

    // explicit narrowing cast, return value cast comes from the declared type.
    let trunc = FunctionAst::new(
        "trunc_i32",
        DType::I32,
        vec![FunctionArg::new("x", DType::F64)],
        vec![Stmt::Return(Some(Expr::Cast {
            dtype: DType::I32,
            expr: Box::new(Expr::var("x")),
        }))],
    );
    jit.compile(&[max, trunc]).expect("compile");

    let my_max: extern "C" fn(f64, f64) -> f64 =
        unsafe { mem::transmute(jit.get_function_ptr("my_max").unwrap()) };
    assert_eq!(my_max(1.5, 2.5), 2.5);
    assert_eq!(my_max(3.5, 2.5), 3.5);

    let trunc_i32: extern "C" fn(f64) -> i32 =
        unsafe { mem::transmute(jit.get_function_ptr("trunc_i32").unwrap()) };
    assert_eq!(trunc_i32(41.9), 41);
    assert_eq!(trunc_i32(-2.9), -2);
}

#[test]
fn recompiling_replaces_the_previous_unit() {
    init_logging();
    let context = Context::create();
    let mut jit = JitCompiler::new(&context, builtin_registry(), Options::default());

    let one = FunctionAst::new(
        "answer",
        DType::I64,
        vec![],
        vec![Stmt::Return(Some(Expr::Int(1)))],
    );
    jit.compile(&[one]).expect("compile");
    let f: extern "C" fn() -> i64 =
        unsafe { mem::transmute(jit.get_function_ptr("answer").unwrap()) };
    assert_eq!(f(), 1);

    let two = FunctionAst::new(
        "answer",
        DType::I64,
        vec![],
        vec![Stmt::Return(Some(Expr::Int(2)))],
    );
    jit.compile(&[two]).expect("recompile");
    let f: extern "C" fn() -> i64 =
        unsafe { mem::transmute(jit.get_function_ptr("answer").unwrap()) };
    assert_eq!(f(), 2);
}
