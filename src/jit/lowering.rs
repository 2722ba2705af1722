//! Statement and expression lowering.
//!
//! Scalar operators lower to native IR instructions after operand
//! promotion. Any operator touching a span-like operand lowers to a call
//! of the canonically mangled kernel symbol instead, so the same tree
//! compiles against scalar or vector kernels purely by argument types.
//! `collect_called_functions` runs the same bottom-up typing ahead of
//! lowering to discover which registry symbols the unit will need.

use hashbrown::{HashMap, HashSet};
use inkwell::values::BasicValueEnum;
use inkwell::{FloatPredicate, IntPredicate};

use crate::ast::{BinaryOp, Expr, FunctionAst, Stmt, UnaryOp};
use crate::dtype::DType;
use crate::error::{CompileError, CompileResult};
use crate::function::{function_name_binary, function_name_unary};
use crate::jit::compiler::JitCompiler;
use crate::jit::session::{FunctionCompileContext, JitSession};
use crate::jit::value::Value;
use crate::registry::FunctionRegistry;

impl<'ctx> JitCompiler<'ctx> {
    pub(crate) fn build_block(
        &self,
        session: &mut JitSession<'ctx>,
        fctx: &mut FunctionCompileContext<'ctx>,
        stmts: &[Stmt],
    ) -> CompileResult<()> {
        for stmt in stmts {
            self.build_stmt(session, fctx, stmt)?;
        }
        Ok(())
    }

    fn build_stmt(
        &self,
        session: &mut JitSession<'ctx>,
        fctx: &mut FunctionCompileContext<'ctx>,
        stmt: &Stmt,
    ) -> CompileResult<()> {
        match stmt {
            Stmt::Assign { name, expr } => {
                let v = self.build_expr(session, fctx, expr)?;
                let mut slot = fctx
                    .named_values
                    .remove(name)
                    .unwrap_or_else(Value::empty);
                slot.copy_from(&v, self.context, &session.builder)?;
                fctx.named_values.insert(name.clone(), slot);
                Ok(())
            }
            Stmt::Expr(expr) => {
                self.build_expr(session, fctx, expr)?;
                Ok(())
            }
            Stmt::Return(expr) => {
                if let Some(expr) = expr {
                    let v = self.build_expr(session, fctx, expr)?;
                    let v = if v.dtype() == fctx.desc.return_type {
                        v
                    } else {
                        v.cast_to(fctx.desc.return_type, self.context, &session.builder)?
                    };
                    let ret =
                        fctx.return_value
                            .as_ref()
                            .ok_or_else(|| CompileError::InvalidValue {
                                reason: format!(
                                    "`{}` returns a value from a void function",
                                    fctx.desc.name
                                ),
                            })?;
                    ret.store(&session.builder, v.read(&session.builder)?)?;
                }
                session
                    .builder
                    .build_unconditional_branch(fctx.exit_block)?;
                // Anything after the return lowers into a dead block; it is
                // terminated by the enclosing construct's fall-through.
                let dead = self
                    .context
                    .append_basic_block(fctx.func, &format!("dead_{}", session.next_label()));
                session.builder.position_at_end(dead);
                Ok(())
            }
            Stmt::If {
                cond,
                then_body,
                else_body,
            } => {
                let n = session.next_label();
                let then_bb = self
                    .context
                    .append_basic_block(fctx.func, &format!("if_true_{n}"));
                let else_bb = self
                    .context
                    .append_basic_block(fctx.func, &format!("if_false_{n}"));
                let end_bb = self
                    .context
                    .append_basic_block(fctx.func, &format!("if_end_{n}"));

                let cond = self.build_cond(session, fctx, cond)?;
                session
                    .builder
                    .build_conditional_branch(cond, then_bb, else_bb)?;

                session.builder.position_at_end(then_bb);
                self.build_block(session, fctx, then_body)?;
                if Self::block_open(session) {
                    session.builder.build_unconditional_branch(end_bb)?;
                }

                session.builder.position_at_end(else_bb);
                self.build_block(session, fctx, else_body)?;
                if Self::block_open(session) {
                    session.builder.build_unconditional_branch(end_bb)?;
                }

                session.builder.position_at_end(end_bb);
                Ok(())
            }
            Stmt::While { cond, body } => {
                let n = session.next_label();
                let cond_bb = self
                    .context
                    .append_basic_block(fctx.func, &format!("while_cond_{n}"));
                let body_bb = self
                    .context
                    .append_basic_block(fctx.func, &format!("while_body_{n}"));
                let end_bb = self
                    .context
                    .append_basic_block(fctx.func, &format!("while_end_{n}"));

                session.builder.build_unconditional_branch(cond_bb)?;
                session.builder.position_at_end(cond_bb);
                let cond = self.build_cond(session, fctx, cond)?;
                session
                    .builder
                    .build_conditional_branch(cond, body_bb, end_bb)?;

                session.builder.position_at_end(body_bb);
                self.build_block(session, fctx, body)?;
                if Self::block_open(session) {
                    session.builder.build_unconditional_branch(cond_bb)?;
                }

                session.builder.position_at_end(end_bb);
                Ok(())
            }
        }
    }

    /// Lower a branch condition to an `i1`, zero-testing non-bit scalars.
    fn build_cond(
        &self,
        session: &mut JitSession<'ctx>,
        fctx: &mut FunctionCompileContext<'ctx>,
        expr: &Expr,
    ) -> CompileResult<inkwell::values::IntValue<'ctx>> {
        let v = self.build_expr(session, fctx, expr)?;
        let v = if v.dtype().is_bit() {
            v
        } else {
            v.cast_to(DType::BIT, self.context, &session.builder)?
        };
        Ok(v.read(&session.builder)?.into_int_value())
    }

    pub(crate) fn build_expr(
        &self,
        session: &mut JitSession<'ctx>,
        fctx: &mut FunctionCompileContext<'ctx>,
        expr: &Expr,
    ) -> CompileResult<Value<'ctx>> {
        match expr {
            Expr::Int(v) => Ok(Value::ssa(
                DType::I64,
                self.context.i64_type().const_int(*v as u64, true).into(),
            )),
            Expr::Float(v) => Ok(Value::ssa(
                DType::F64,
                self.context.f64_type().const_float(*v).into(),
            )),
            Expr::Bool(v) => Ok(Value::ssa(
                DType::BIT,
                self.context.bool_type().const_int(*v as u64, false).into(),
            )),
            Expr::Var(name) => {
                fctx.named_values
                    .get(name)
                    .cloned()
                    .ok_or_else(|| CompileError::UndefinedVariable { name: name.clone() })
            }
            Expr::Cast { dtype, expr } => {
                let v = self.build_expr(session, fctx, expr)?;
                v.cast_to(*dtype, self.context, &session.builder)
            }
            Expr::Call { name, args } => {
                let mut vals = Vec::with_capacity(args.len());
                for arg in args {
                    vals.push(self.build_expr(session, fctx, arg)?);
                }
                self.build_call(session, fctx, name, vals)
            }
            Expr::Select {
                cond,
                true_expr,
                false_expr,
            } => {
                let c = self.build_expr(session, fctx, cond)?;
                let c = if c.dtype().is_bit() {
                    c
                } else {
                    c.cast_to(DType::BIT, self.context, &session.builder)?
                };
                let t = self.build_expr(session, fctx, true_expr)?;
                let f = self.build_expr(session, fctx, false_expr)?;
                c.select(&t, &f, &session.builder)
                    .ok_or(CompileError::TypeMismatch {
                        have: f.dtype(),
                        need: t.dtype(),
                    })
            }
            Expr::Unary { op, expr } => {
                let v = self.build_expr(session, fctx, expr)?;
                self.build_unary(session, fctx, *op, v)
            }
            Expr::Binary { op, lhs, rhs } => {
                let l = self.build_expr(session, fctx, lhs)?;
                let r = self.build_expr(session, fctx, rhs)?;
                self.build_binary(session, fctx, *op, l, r)
            }
        }
    }

    fn build_unary(
        &self,
        session: &mut JitSession<'ctx>,
        fctx: &mut FunctionCompileContext<'ctx>,
        op: UnaryOp,
        v: Value<'ctx>,
    ) -> CompileResult<Value<'ctx>> {
        if v.dtype().is_span_like() {
            let token = match op {
                UnaryOp::Neg => "neg",
                UnaryOp::Not => "not",
            };
            let name = function_name_unary(token, v.dtype());
            return self.build_call(session, fctx, &name, vec![v]);
        }
        match op {
            UnaryOp::Neg => {
                let dtype = v.dtype();
                let raw = v.read(&session.builder)?;
                let out: BasicValueEnum<'ctx> = if dtype.is_float() {
                    session
                        .builder
                        .build_float_neg(raw.into_float_value(), "fneg")?
                        .into()
                } else if dtype.is_integer() {
                    session
                        .builder
                        .build_int_neg(raw.into_int_value(), "neg")?
                        .into()
                } else {
                    return Err(CompileError::InvalidValue {
                        reason: format!("cannot negate {dtype}"),
                    });
                };
                Ok(Value::ssa(dtype, out))
            }
            UnaryOp::Not => {
                let bit = if v.dtype().is_bit() {
                    v
                } else {
                    v.cast_to(DType::BIT, self.context, &session.builder)?
                };
                let raw = bit.read(&session.builder)?.into_int_value();
                let out = session.builder.build_not(raw, "not")?;
                Ok(Value::ssa(DType::BIT, out.into()))
            }
        }
    }

    fn build_binary(
        &self,
        session: &mut JitSession<'ctx>,
        fctx: &mut FunctionCompileContext<'ctx>,
        op: BinaryOp,
        lhs: Value<'ctx>,
        rhs: Value<'ctx>,
    ) -> CompileResult<Value<'ctx>> {
        if lhs.dtype().is_span_like() || rhs.dtype().is_span_like() {
            let name = function_name_binary(op.token(), lhs.dtype(), rhs.dtype());
            return self.build_call(session, fctx, &name, vec![lhs, rhs]);
        }

        if op.is_logical() {
            let l = self.as_bit(session, lhs)?;
            let r = self.as_bit(session, rhs)?;
            let out = match op {
                BinaryOp::And => session.builder.build_and(l, r, "and")?,
                BinaryOp::Or => session.builder.build_or(l, r, "or")?,
                _ => unreachable!(),
            };
            return Ok(Value::ssa(DType::BIT, out.into()));
        }

        let target = DType::promote(lhs.dtype(), rhs.dtype()).ok_or(CompileError::InvalidCast {
            from: rhs.dtype(),
            to: lhs.dtype(),
        })?;
        let l = lhs
            .cast_to(target, self.context, &session.builder)?
            .read(&session.builder)?;
        let r = rhs
            .cast_to(target, self.context, &session.builder)?
            .read(&session.builder)?;
        let signed = target.elem().map(|e| e.is_signed()).unwrap_or(false);

        if op.is_comparison() {
            let out: BasicValueEnum<'ctx> = if target.is_float() {
                let pred = match op {
                    BinaryOp::Eq => FloatPredicate::OEQ,
                    BinaryOp::Ne => FloatPredicate::ONE,
                    BinaryOp::Lt => FloatPredicate::OLT,
                    BinaryOp::Le => FloatPredicate::OLE,
                    BinaryOp::Gt => FloatPredicate::OGT,
                    BinaryOp::Ge => FloatPredicate::OGE,
                    _ => unreachable!(),
                };
                session
                    .builder
                    .build_float_compare(pred, l.into_float_value(), r.into_float_value(), "fcmp")?
                    .into()
            } else {
                let pred = match (op, signed) {
                    (BinaryOp::Eq, _) => IntPredicate::EQ,
                    (BinaryOp::Ne, _) => IntPredicate::NE,
                    (BinaryOp::Lt, true) => IntPredicate::SLT,
                    (BinaryOp::Le, true) => IntPredicate::SLE,
                    (BinaryOp::Gt, true) => IntPredicate::SGT,
                    (BinaryOp::Ge, true) => IntPredicate::SGE,
                    (BinaryOp::Lt, false) => IntPredicate::ULT,
                    (BinaryOp::Le, false) => IntPredicate::ULE,
                    (BinaryOp::Gt, false) => IntPredicate::UGT,
                    (BinaryOp::Ge, false) => IntPredicate::UGE,
                    _ => unreachable!(),
                };
                session
                    .builder
                    .build_int_compare(pred, l.into_int_value(), r.into_int_value(), "icmp")?
                    .into()
            };
            return Ok(Value::ssa(DType::BIT, out));
        }

        let out: BasicValueEnum<'ctx> = if target.is_float() {
            let (a, b) = (l.into_float_value(), r.into_float_value());
            match op {
                BinaryOp::Add => session.builder.build_float_add(a, b, "fadd")?,
                BinaryOp::Sub => session.builder.build_float_sub(a, b, "fsub")?,
                BinaryOp::Mul => session.builder.build_float_mul(a, b, "fmul")?,
                BinaryOp::Div => session.builder.build_float_div(a, b, "fdiv")?,
                BinaryOp::Mod => session.builder.build_float_rem(a, b, "frem")?,
                _ => unreachable!(),
            }
            .into()
        } else {
            let (a, b) = (l.into_int_value(), r.into_int_value());
            match op {
                BinaryOp::Add => session.builder.build_int_add(a, b, "add")?,
                BinaryOp::Sub => session.builder.build_int_sub(a, b, "sub")?,
                BinaryOp::Mul => session.builder.build_int_mul(a, b, "mul")?,
                BinaryOp::Div => {
                    if signed {
                        session.builder.build_int_signed_div(a, b, "sdiv")?
                    } else {
                        session.builder.build_int_unsigned_div(a, b, "udiv")?
                    }
                }
                BinaryOp::Mod => {
                    if signed {
                        session.builder.build_int_signed_rem(a, b, "srem")?
                    } else {
                        session.builder.build_int_unsigned_rem(a, b, "urem")?
                    }
                }
                _ => unreachable!(),
            }
            .into()
        };
        Ok(Value::ssa(target, out))
    }

    fn as_bit(
        &self,
        session: &mut JitSession<'ctx>,
        v: Value<'ctx>,
    ) -> CompileResult<inkwell::values::IntValue<'ctx>> {
        let v = if v.dtype().is_bit() {
            v
        } else {
            v.cast_to(DType::BIT, self.context, &session.builder)?
        };
        Ok(v.read(&session.builder)?.into_int_value())
    }
}

/// Result type of a scalar-or-vector binary operator, for pre-lowering
/// type inference. Mirrors the promotion rules `build_binary` applies.
fn binary_result_dtype(op: BinaryOp, l: DType, r: DType) -> Option<DType> {
    if l.is_span_like() || r.is_span_like() {
        return if op.is_comparison() || op.is_logical() {
            l.elem()
                .or_else(|| r.elem())
                .map(|_| DType::Simd(crate::dtype::ScalarType::Bit))
        } else if l.is_span_like() {
            Some(l)
        } else {
            Some(r)
        };
    }
    if op.is_comparison() || op.is_logical() {
        return Some(DType::BIT);
    }
    DType::promote(l, r)
}

/// Names of every function the unit's bodies may call: explicit calls plus
/// the kernel symbols operators over span-like operands resolve to.
/// Typing here is best-effort; anything unresolvable is reported precisely
/// during lowering instead.
pub(crate) fn collect_called_functions(
    functions: &[FunctionAst],
    registry: &FunctionRegistry,
) -> HashSet<String> {
    let unit_rets: HashMap<&str, DType> = functions
        .iter()
        .map(|f| (f.name.as_str(), f.return_type))
        .collect();
    let mut called = HashSet::new();
    for f in functions {
        let mut env: HashMap<String, DType> = f
            .args
            .iter()
            .map(|a| (a.name.clone(), a.dtype))
            .collect();
        collect_block(&f.body, &mut env, &unit_rets, registry, &mut called);
    }
    called
}

fn collect_block(
    stmts: &[Stmt],
    env: &mut HashMap<String, DType>,
    unit_rets: &HashMap<&str, DType>,
    registry: &FunctionRegistry,
    called: &mut HashSet<String>,
) {
    for stmt in stmts {
        match stmt {
            Stmt::Assign { name, expr } => {
                let t = collect_expr(expr, env, unit_rets, registry, called);
                if let Some(t) = t {
                    env.insert(name.clone(), t);
                }
            }
            Stmt::Expr(expr) => {
                collect_expr(expr, env, unit_rets, registry, called);
            }
            Stmt::Return(expr) => {
                if let Some(expr) = expr {
                    collect_expr(expr, env, unit_rets, registry, called);
                }
            }
            Stmt::If {
                cond,
                then_body,
                else_body,
            } => {
                collect_expr(cond, env, unit_rets, registry, called);
                collect_block(then_body, env, unit_rets, registry, called);
                collect_block(else_body, env, unit_rets, registry, called);
            }
            Stmt::While { cond, body } => {
                collect_expr(cond, env, unit_rets, registry, called);
                collect_block(body, env, unit_rets, registry, called);
            }
        }
    }
}

fn collect_expr(
    expr: &Expr,
    env: &HashMap<String, DType>,
    unit_rets: &HashMap<&str, DType>,
    registry: &FunctionRegistry,
    called: &mut HashSet<String>,
) -> Option<DType> {
    match expr {
        Expr::Int(_) => Some(DType::I64),
        Expr::Float(_) => Some(DType::F64),
        Expr::Bool(_) => Some(DType::BIT),
        Expr::Var(name) => env.get(name).copied(),
        Expr::Cast { dtype, expr } => {
            collect_expr(expr, env, unit_rets, registry, called);
            Some(*dtype)
        }
        Expr::Unary { op, expr } => {
            let t = collect_expr(expr, env, unit_rets, registry, called)?;
            if t.is_span_like() {
                let token = match op {
                    UnaryOp::Neg => "neg",
                    UnaryOp::Not => "not",
                };
                called.insert(function_name_unary(token, t));
            }
            Some(t)
        }
        Expr::Binary { op, lhs, rhs } => {
            let l = collect_expr(lhs, env, unit_rets, registry, called)?;
            let r = collect_expr(rhs, env, unit_rets, registry, called)?;
            if l.is_span_like() || r.is_span_like() {
                called.insert(function_name_binary(op.token(), l, r));
            }
            binary_result_dtype(*op, l, r)
        }
        Expr::Call { name, args } => {
            for arg in args {
                collect_expr(arg, env, unit_rets, registry, called);
            }
            called.insert(name.clone());
            unit_rets
                .get(name.as_str())
                .copied()
                .or_else(|| registry.get_function(name).map(|d| d.return_type))
        }
        Expr::Select {
            cond,
            true_expr,
            false_expr,
        } => {
            collect_expr(cond, env, unit_rets, registry, called);
            let t = collect_expr(true_expr, env, unit_rets, registry, called);
            collect_expr(false_expr, env, unit_rets, registry, called);
            t
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::FunctionArg;
    use crate::dtype::ScalarType;
    use crate::kernels;

    #[test]
    fn vector_operators_resolve_to_kernel_symbols() {
        let mut registry = FunctionRegistry::new();
        kernels::register_builtin_kernels(&mut registry);

        let v = DType::Simd(ScalarType::F32);
        let f = FunctionAst::new(
            "vadd",
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
        let called = collect_called_functions(&[f], &registry);
        assert!(called.contains("simd_vector_add_f32_f32"));
    }

    #[test]
    fn calls_through_assigned_vars_are_typed() {
        let registry = FunctionRegistry::new();
        let f = FunctionAst::new(
            "g",
            DType::F64,
            vec![FunctionArg::new("x", DType::F64)],
            vec![
                Stmt::Assign {
                    name: "y".to_string(),
                    expr: Expr::binary(BinaryOp::Mul, Expr::var("x"), Expr::Float(2.0)),
                },
                Stmt::Return(Some(Expr::call("helper", vec![Expr::var("y")]))),
            ],
        );
        let called = collect_called_functions(&[f], &registry);
        assert!(called.contains("helper"));
    }
}
