//! Compile pipeline driver.
//!
//! [`JitCompiler`] owns the registry handle and the current session, and
//! runs a unit through the fixed stage order: declare unit functions,
//! inject referenced externs, lower each body, verify, optimize, link.
//! A unit compiles and links as one module, so unit functions may call
//! each other freely. Compilation is serialized process-wide; the native
//! target initialization and MCJIT linking underneath are not reentrant.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use inkwell::attributes::AttributeLoc;
use inkwell::context::Context;
use inkwell::module::{Linkage, Module};
use inkwell::targets::{
    CodeModel, FileType, InitializationConfig, RelocMode, Target, TargetMachine,
};
use inkwell::values::{BasicMetadataValueEnum, FunctionValue};
use inkwell::OptimizationLevel;

use crate::ast::FunctionAst;
use crate::dtype::DType;
use crate::error::{CompileError, CompileResult};
use crate::function::FunctionDesc;
use crate::jit::lowering::collect_called_functions;
use crate::jit::session::{ExternFunction, FunctionCompileContext, JitSession};
use crate::jit::types::{byaddr_attributes, function_llvm_type, llvm_type};
use crate::jit::value::Value;
use crate::jit::JitStats;
use crate::kernels::THROW_SIZE_MISMATCH_FUNC;
use crate::registry::FunctionRegistry;

static COMPILE_LOCK: Mutex<()> = Mutex::new(());

#[derive(Debug, Clone)]
pub struct Options {
    /// 0 disables the function pass pipeline, 1..=3 select the backend
    /// codegen level.
    pub optimize_level: u32,
    /// Accepted but not yet applied to generated arithmetic.
    pub fast_math: bool,
    /// Dump the unit's native assembly to stderr before linking.
    pub print_asm: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            optimize_level: 2,
            fast_math: false,
            print_asm: false,
        }
    }
}

pub struct JitCompiler<'ctx> {
    pub(crate) context: &'ctx Context,
    pub(crate) registry: Arc<FunctionRegistry>,
    pub(crate) opts: Options,
    session: Option<JitSession<'ctx>>,
}

impl<'ctx> JitCompiler<'ctx> {
    pub fn new(context: &'ctx Context, registry: Arc<FunctionRegistry>, opts: Options) -> Self {
        if let Err(e) = Target::initialize_native(&InitializationConfig::default()) {
            log::error!("native target init failed: {e}");
        }
        Self {
            context,
            registry,
            opts,
            session: None,
        }
    }

    /// Compile `functions` as one unit. On success the previous session is
    /// replaced and the unit's function names are returned in order; on
    /// failure no session is installed and later lookups fail.
    pub fn compile(&mut self, functions: &[FunctionAst]) -> CompileResult<Vec<String>> {
        let _guard = COMPILE_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        self.session = None;
        let mut session = JitSession::new(self.context);

        let t0 = Instant::now();
        self.declare_unit_functions(&mut session, functions)?;
        self.inject_extern_functions(&mut session, functions)?;
        for f in functions {
            self.build_function(&mut session, f)?;
        }
        session.stats.ir_build_cost = t0.elapsed();

        let t1 = Instant::now();
        self.link(&mut session)?;
        session.stats.compile_cost = t1.elapsed();
        log::debug!(
            "compiled unit of {} functions, ir:{:?} link:{:?}",
            functions.len(),
            session.stats.ir_build_cost,
            session.stats.compile_cost
        );

        let names = functions.iter().map(|f| f.name.clone()).collect();
        self.session = Some(session);
        Ok(names)
    }

    /// Native entry point of a compiled function, as a raw address for the
    /// caller to transmute to the matching `extern "C"` type.
    pub fn get_function_ptr(&self, name: &str) -> CompileResult<usize> {
        let session = self.session.as_ref().ok_or(CompileError::NoSession)?;
        let engine = session.engine.as_ref().ok_or(CompileError::NoSession)?;
        engine.get_function_address(name).map_err(|e| {
            log::error!("no function `{name}` in linked unit: {e}");
            CompileError::SymbolNotFound {
                name: name.to_string(),
            }
        })
    }

    /// Entry point of `name` after confirming its compiled signature is
    /// exactly `(args) -> return_type`.
    pub fn get_checked_function_ptr(
        &self,
        name: &str,
        return_type: DType,
        args: &[DType],
    ) -> CompileResult<usize> {
        let session = self.session.as_ref().ok_or(CompileError::NoSession)?;
        let fctx = session
            .func_ctxs
            .get(name)
            .ok_or_else(|| CompileError::FunctionNotFound {
                name: name.to_string(),
            })?;
        if !fctx.desc.compare_signature(return_type, args) {
            return Err(CompileError::SignatureMismatch {
                name: name.to_string(),
            });
        }
        self.get_function_ptr(name)
    }

    pub fn stats(&self) -> JitStats {
        self.session.as_ref().map(|s| s.stats).unwrap_or_default()
    }

    fn declare_unit_functions(
        &self,
        session: &mut JitSession<'ctx>,
        functions: &[FunctionAst],
    ) -> CompileResult<()> {
        for ast in functions {
            if session.unit_funcs.contains_key(&ast.name) {
                return Err(CompileError::DuplicateFunction {
                    name: ast.name.clone(),
                });
            }
            let desc = ast.to_desc();
            let func = self.declare(session, &desc, None)?;
            session.unit_funcs.insert(ast.name.clone(), (desc, func));
        }
        Ok(())
    }

    /// Declare every registry function the unit references, plus the size
    /// mismatch trap every vector kernel may reach.
    fn inject_extern_functions(
        &self,
        session: &mut JitSession<'ctx>,
        functions: &[FunctionAst],
    ) -> CompileResult<()> {
        let mut called = collect_called_functions(functions, &self.registry);
        called.insert(THROW_SIZE_MISMATCH_FUNC.to_string());
        for name in called {
            if session.unit_funcs.contains_key(&name) {
                continue;
            }
            let Some(desc) = self.registry.get_function(&name) else {
                continue;
            };
            let desc = desc.clone();
            let func = self.declare(session, &desc, Some(Linkage::External))?;
            log::debug!("inject extern func:{name}");
            session
                .extern_funcs
                .insert(name, ExternFunction { desc, func });
        }
        Ok(())
    }

    fn declare(
        &self,
        session: &JitSession<'ctx>,
        desc: &FunctionDesc,
        linkage: Option<Linkage>,
    ) -> CompileResult<FunctionValue<'ctx>> {
        let fn_type = function_llvm_type(self.context, desc)?;
        let func = session.module.add_function(&desc.name, fn_type, linkage);
        for (i, dtype) in desc.arg_types.iter().enumerate() {
            if desc.pass_arg_by_address(i) {
                let pointee = llvm_type(self.context, *dtype)
                    .ok_or(CompileError::UnsupportedType { dtype: *dtype })?;
                for attr in byaddr_attributes(self.context, pointee) {
                    func.add_attribute(AttributeLoc::Param(i as u32), attr);
                }
            }
        }
        Ok(func)
    }

    fn build_function(
        &self,
        session: &mut JitSession<'ctx>,
        ast: &FunctionAst,
    ) -> CompileResult<()> {
        let (desc, func) = session
            .unit_funcs
            .get(&ast.name)
            .map(|(d, f)| (d.clone(), *f))
            .ok_or_else(|| CompileError::FunctionNotFound {
                name: ast.name.clone(),
            })?;
        let entry = self.context.append_basic_block(func, "entry");
        let exit = self.context.append_basic_block(func, "exit");
        session.builder.position_at_end(entry);

        let mut fctx = FunctionCompileContext {
            desc,
            func,
            exit_block: exit,
            named_values: hashbrown::HashMap::new(),
            context_arg_value: None,
            return_value: None,
        };
        if !ast.return_type.is_void() {
            let rty = llvm_type(self.context, ast.return_type).ok_or(
                CompileError::UnsupportedType {
                    dtype: ast.return_type,
                },
            )?;
            let slot = session.builder.build_alloca(rty, "retval")?;
            fctx.return_value = Some(Value::slot(ast.return_type, slot, rty));
        }

        // Spill arguments into named slots so assignment to an argument
        // works like any other variable. The context handle stays SSA.
        for (i, arg) in ast.args.iter().enumerate() {
            let param = func
                .get_nth_param(i as u32)
                .ok_or_else(|| CompileError::InvalidValue {
                    reason: format!("missing param {i} of `{}`", ast.name),
                })?;
            param.set_name(&arg.name);
            if arg.dtype.is_ctx_ptr() {
                let v = Value::ssa(arg.dtype, param);
                fctx.context_arg_value = Some(v.clone());
                fctx.named_values.insert(arg.name.clone(), v);
                continue;
            }
            let base = llvm_type(self.context, arg.dtype)
                .ok_or(CompileError::UnsupportedType { dtype: arg.dtype })?;
            let slot = session.builder.build_alloca(base, &arg.name)?;
            let incoming = if fctx.desc.pass_arg_by_address(i) {
                session
                    .builder
                    .build_load(param.into_pointer_value(), "argload")?
            } else {
                param
            };
            session.builder.build_store(slot, incoming)?;
            fctx.named_values
                .insert(arg.name.clone(), Value::slot(arg.dtype, slot, base));
        }

        self.build_block(session, &mut fctx, &ast.body)?;
        if Self::block_open(session) {
            session
                .builder
                .build_unconditional_branch(fctx.exit_block)?;
        }

        if let Some(last) = func.get_last_basic_block() {
            if last != fctx.exit_block {
                let _ = fctx.exit_block.move_after(last);
            }
        }
        session.builder.position_at_end(fctx.exit_block);
        match &fctx.return_value {
            Some(ret) => {
                let v = ret.read(&session.builder)?;
                session.builder.build_return(Some(&v))?;
            }
            None => {
                session.builder.build_return(None)?;
            }
        }

        if !func.verify(true) {
            let reason = session
                .module
                .verify()
                .err()
                .map(|e| e.to_string())
                .unwrap_or_else(|| format!("function `{}` failed verification", ast.name));
            log::error!("verify `{}` failed: {reason}", ast.name);
            return Err(CompileError::VerifyFailed { reason });
        }
        if self.opts.optimize_level > 0 {
            session.fpm.run_on(&func);
        }
        session.func_ctxs.insert(ast.name.clone(), fctx);
        Ok(())
    }

    /// Whether the builder's current block still needs a terminator.
    pub(crate) fn block_open(session: &JitSession<'ctx>) -> bool {
        session
            .builder
            .get_insert_block()
            .map(|b| b.get_terminator().is_none())
            .unwrap_or(false)
    }

    /// Emit a call to `name`, resolving first among unit functions and
    /// then injected externs. Inserts the caller's context handle when the
    /// callee declares one and the call site omits it; casts the remaining
    /// arguments to the declared types.
    pub(crate) fn build_call(
        &self,
        session: &mut JitSession<'ctx>,
        fctx: &FunctionCompileContext<'ctx>,
        name: &str,
        mut args: Vec<Value<'ctx>>,
    ) -> CompileResult<Value<'ctx>> {
        let (desc, func) = if let Some((d, f)) = session.unit_funcs.get(name) {
            (d.clone(), *f)
        } else if let Some(e) = session.extern_funcs.get(name) {
            (e.desc.clone(), e.func)
        } else {
            return Err(CompileError::FunctionNotFound {
                name: name.to_string(),
            });
        };

        if let Some(idx) = desc.context_arg_idx {
            if args.len() + 1 == desc.arg_types.len() {
                let ctx = fctx
                    .context_arg_value
                    .clone()
                    .ok_or_else(|| CompileError::InvalidValue {
                        reason: format!(
                            "`{name}` needs a context handle, caller `{}` has none",
                            fctx.desc.name
                        ),
                    })?;
                args.insert(idx, ctx);
            }
        }
        if args.len() != desc.arg_types.len() {
            return Err(CompileError::ArityMismatch {
                name: name.to_string(),
                expected: desc.arg_types.len(),
                given: args.len(),
            });
        }

        let mut call_args: Vec<BasicMetadataValueEnum<'ctx>> = Vec::with_capacity(args.len());
        let mut byaddr = Vec::new();
        for (i, given) in args.into_iter().enumerate() {
            let declared = desc.arg_types[i];
            let arg = if given.dtype() == declared {
                given
            } else {
                given.cast_to(declared, self.context, &session.builder)?
            };
            if desc.pass_arg_by_address(i) {
                let pointee = llvm_type(self.context, declared)
                    .ok_or(CompileError::UnsupportedType { dtype: declared })?;
                let ptr = match arg.addr() {
                    Some(p) => p,
                    None => {
                        let tmp = session.builder.build_alloca(pointee, "byaddr")?;
                        session
                            .builder
                            .build_store(tmp, arg.read(&session.builder)?)?;
                        tmp
                    }
                };
                byaddr.push((i, pointee));
                call_args.push(ptr.into());
            } else {
                call_args.push(arg.read(&session.builder)?.into());
            }
        }

        // A void instruction must stay unnamed or verification rejects it.
        let result_name = if desc.return_type.is_void() { "" } else { "call" };
        let call = session.builder.build_call(func, &call_args, result_name)?;
        for (i, pointee) in byaddr {
            for attr in byaddr_attributes(self.context, pointee) {
                call.add_attribute(AttributeLoc::Param(i as u32), attr);
            }
        }
        if desc.return_type.is_void() {
            Ok(Value::empty())
        } else {
            let v = call
                .try_as_basic_value()
                .left()
                .ok_or_else(|| CompileError::InvalidValue {
                    reason: format!("call to `{name}` produced no value"),
                })?;
            Ok(Value::ssa(desc.return_type, v))
        }
    }

    fn link(&self, session: &mut JitSession<'ctx>) -> CompileResult<()> {
        if self.opts.print_asm {
            match emit_asm(&session.module, opt_level(self.opts.optimize_level)) {
                Ok(asm) => eprintln!("{asm}"),
                Err(reason) => log::error!("asm dump failed: {reason}"),
            }
        }
        let engine = session
            .module
            .create_jit_execution_engine(opt_level(self.opts.optimize_level))
            .map_err(|e| CompileError::LinkFailed {
                reason: e.to_string(),
            })?;
        for ext in session.extern_funcs.values() {
            engine.add_global_mapping(&ext.func, ext.desc.func);
        }
        session.engine = Some(engine);
        Ok(())
    }
}

fn emit_asm(module: &Module<'_>, level: OptimizationLevel) -> Result<String, String> {
    let triple = TargetMachine::get_default_triple();
    let target = Target::from_triple(&triple).map_err(|e| e.to_string())?;
    let machine = target
        .create_target_machine(
            &triple,
            TargetMachine::get_host_cpu_name().to_str().unwrap_or(""),
            TargetMachine::get_host_cpu_features().to_str().unwrap_or(""),
            level,
            RelocMode::Default,
            CodeModel::JITDefault,
        )
        .ok_or_else(|| "host target machine unavailable".to_string())?;
    let buf = machine
        .write_to_memory_buffer(module, FileType::Assembly)
        .map_err(|e| e.to_string())?;
    Ok(String::from_utf8_lossy(buf.as_slice()).into_owned())
}

fn opt_level(level: u32) -> OptimizationLevel {
    match level {
        0 => OptimizationLevel::None,
        1 => OptimizationLevel::Less,
        2 => OptimizationLevel::Default,
        _ => OptimizationLevel::Aggressive,
    }
}
