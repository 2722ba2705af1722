//! Function-tree boundary.
//!
//! The surface language's lexer/parser lives outside this crate; what the
//! compiler consumes is this tree: function name, declared argument
//! names/types, declared return type, and a body of statements and
//! expressions whose types are resolvable bottom-up from the argument
//! types. Construct it programmatically or from any front end that can
//! produce it.

use crate::dtype::DType;
use crate::function::FunctionDesc;

/// One declared argument.
#[derive(Debug, Clone)]
pub struct FunctionArg {
    pub name: String,
    pub dtype: DType,
}

impl FunctionArg {
    pub fn new(name: impl Into<String>, dtype: DType) -> Self {
        Self {
            name: name.into(),
            dtype,
        }
    }
}

/// One source function.
#[derive(Debug, Clone)]
pub struct FunctionAst {
    pub name: String,
    pub return_type: DType,
    pub args: Vec<FunctionArg>,
    pub body: Vec<Stmt>,
}

impl FunctionAst {
    pub fn new(
        name: impl Into<String>,
        return_type: DType,
        args: Vec<FunctionArg>,
        body: Vec<Stmt>,
    ) -> Self {
        Self {
            name: name.into(),
            return_type,
            args,
            body,
        }
    }

    /// Descriptor for this function within its compilation unit. The
    /// native address is unknown until link time and left at zero.
    pub fn to_desc(&self) -> FunctionDesc {
        FunctionDesc::new(
            self.name.clone(),
            self.return_type,
            self.args.iter().map(|a| a.dtype).collect(),
            0,
        )
    }
}

/// Statements.
#[derive(Debug, Clone)]
pub enum Stmt {
    /// `name = expr`, declaring the variable on first assignment.
    Assign { name: String, expr: Expr },
    /// Expression evaluated for its effects.
    Expr(Expr),
    Return(Option<Expr>),
    If {
        cond: Expr,
        then_body: Vec<Stmt>,
        else_body: Vec<Stmt>,
    },
    While { cond: Expr, body: Vec<Stmt> },
}

/// Expressions. Literal types are fixed (i64/f64/bit); narrower operand
/// types are reached through `Cast` or by operand promotion.
#[derive(Debug, Clone)]
pub enum Expr {
    Int(i64),
    Float(f64),
    Bool(bool),
    Var(String),
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Call {
        name: String,
        args: Vec<Expr>,
    },
    /// Ternary conditional merge.
    Select {
        cond: Box<Expr>,
        true_expr: Box<Expr>,
        false_expr: Box<Expr>,
    },
    Cast {
        dtype: DType,
        expr: Box<Expr>,
    },
}

impl Expr {
    pub fn var(name: impl Into<String>) -> Expr {
        Expr::Var(name.into())
    }

    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
        Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn call(name: impl Into<String>, args: Vec<Expr>) -> Expr {
        Expr::Call {
            name: name.into(),
            args,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    /// Canonical operator token feeding the name mangler.
    pub fn token(&self) -> &'static str {
        match self {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
            BinaryOp::Div => "div",
            BinaryOp::Mod => "mod",
            BinaryOp::Eq => "eq",
            BinaryOp::Ne => "ne",
            BinaryOp::Lt => "lt",
            BinaryOp::Le => "le",
            BinaryOp::Gt => "gt",
            BinaryOp::Ge => "ge",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
        }
    }

    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }

    pub fn is_logical(&self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_desc_carries_signature() {
        let f = FunctionAst::new(
            "score",
            DType::F64,
            vec![
                FunctionArg::new("ctx", DType::CtxPtr),
                FunctionArg::new("x", DType::F64),
            ],
            vec![Stmt::Return(Some(Expr::var("x")))],
        );
        let desc = f.to_desc();
        assert_eq!(desc.name, "score");
        assert_eq!(desc.arg_types, vec![DType::CtxPtr, DType::F64]);
        assert_eq!(desc.context_arg_idx, Some(0));
        assert_eq!(desc.func, 0);
    }
}
