//! Per-unit compile state.
//!
//! One [`JitSession`] exists per compiled unit: the module being filled,
//! the shared IR builder, the function pass pipeline, the declared unit
//! and extern functions, and finally the execution engine. A fresh
//! session replaces the previous one wholesale on recompilation, so
//! pointers from an old unit never alias a new module.

use std::time::Duration;

use hashbrown::HashMap;
use inkwell::basic_block::BasicBlock;
use inkwell::builder::Builder;
use inkwell::context::Context;
use inkwell::execution_engine::ExecutionEngine;
use inkwell::module::Module;
use inkwell::passes::PassManager;
use inkwell::values::FunctionValue;

use crate::function::FunctionDesc;
use crate::jit::value::Value;

/// Wall-clock cost of the pipeline stages of the last compile.
#[derive(Debug, Default, Clone, Copy)]
pub struct JitStats {
    /// Declaring, injecting, and lowering every function to IR.
    pub ir_build_cost: Duration,
    /// Verification, optimization, and native linking.
    pub compile_cost: Duration,
}

/// A registry function declared into the module, to be resolved to its
/// native address at link time.
pub struct ExternFunction<'ctx> {
    pub desc: FunctionDesc,
    pub func: FunctionValue<'ctx>,
}

/// Per-function lowering state: the descriptor, the LLVM function, the
/// shared exit block, and the visible variables.
pub struct FunctionCompileContext<'ctx> {
    pub desc: FunctionDesc,
    pub func: FunctionValue<'ctx>,
    /// Single exit block every `return` branches to.
    pub exit_block: BasicBlock<'ctx>,
    pub named_values: HashMap<String, Value<'ctx>>,
    /// The function's own context-handle argument, threaded into callees.
    pub context_arg_value: Option<Value<'ctx>>,
    /// Slot the return value is accumulated in; absent for void.
    pub return_value: Option<Value<'ctx>>,
}

pub struct JitSession<'ctx> {
    pub module: Module<'ctx>,
    pub builder: Builder<'ctx>,
    pub fpm: PassManager<FunctionValue<'ctx>>,
    pub engine: Option<ExecutionEngine<'ctx>>,
    /// Functions declared by the unit itself, keyed by name.
    pub unit_funcs: HashMap<String, (FunctionDesc, FunctionValue<'ctx>)>,
    /// Registry functions injected into the module.
    pub extern_funcs: HashMap<String, ExternFunction<'ctx>>,
    /// Lowering state of each compiled function, kept for signature checks.
    pub func_ctxs: HashMap<String, FunctionCompileContext<'ctx>>,
    pub stats: JitStats,
    label_cursor: u32,
}

impl<'ctx> JitSession<'ctx> {
    pub fn new(context: &'ctx Context) -> Self {
        let module = context.create_module("exprjit");
        let fpm = PassManager::create(&module);
        fpm.add_promote_memory_to_register_pass();
        fpm.add_instruction_combining_pass();
        fpm.add_reassociate_pass();
        fpm.add_gvn_pass();
        fpm.add_cfg_simplification_pass();
        fpm.add_partially_inline_lib_calls_pass();
        fpm.add_merged_load_store_motion_pass();
        fpm.add_tail_call_elimination_pass();
        fpm.add_slp_vectorize_pass();
        fpm.initialize();
        Self {
            module,
            builder: context.create_builder(),
            fpm,
            engine: None,
            unit_funcs: HashMap::new(),
            extern_funcs: HashMap::new(),
            func_ctxs: HashMap::new(),
            stats: JitStats::default(),
            label_cursor: 0,
        }
    }

    /// Fresh suffix for basic-block labels, unique within the session.
    pub fn next_label(&mut self) -> u32 {
        let n = self.label_cursor;
        self.label_cursor += 1;
        n
    }
}
