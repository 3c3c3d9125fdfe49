use std::fmt;
use std::sync::Arc;

use crate::eval::{ControlSignal, Executor, RenderError};
use crate::lexer::Position;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
    Plus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Or => "or",
            BinOp::And => "and",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
        }
    }
}

/// One step of a property/index chain.
#[derive(Debug, Clone, PartialEq)]
pub enum Accessor {
    Property(String), // foo.bar
    Index(usize),     // foo.0
    Subscript(Expr),  // foo[expr]
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Literal(Value),
    Var(String),
    List(Vec<Expr>),
    Access {
        base: Box<Expr>,
        chain: Vec<Accessor>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        lhs: Box<Expr>,
        op: BinOp,
        rhs: Box<Expr>,
    },
    Filter {
        input: Box<Expr>,
        name: String,
        args: Vec<Expr>,
    },
}

/// Expression node with the position of the token that started it.
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub at: Position,
}

impl Expr {
    pub fn new(kind: ExprKind, at: Position) -> Self {
        Self { kind, at }
    }
}

/// A statement kind supplied by an externally registered tag.
///
/// Implementations must be immutable once parsed: a compiled template is
/// shared between concurrent renders.
pub trait CustomStatement: fmt::Debug + Send + Sync {
    fn execute(
        &self,
        executor: &mut Executor<'_>,
        out: &mut String,
    ) -> Result<ControlSignal, RenderError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct Branch {
    pub condition: Expr,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone)]
pub enum Stmt {
    Text(String),
    Output(Expr),
    If {
        branches: Vec<Branch>, // if + elifs, in order
        else_body: Option<Vec<Stmt>>,
    },
    For {
        first: String,
        second: Option<String>, // `for k, v in ...`
        iterable: Expr,
        body: Vec<Stmt>,
        at: Position,
    },
    Break(Position),
    Continue(Position),
    Custom(Arc<dyn CustomStatement>),
}

impl PartialEq for Stmt {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Stmt::Text(a), Stmt::Text(b)) => a == b,
            (Stmt::Output(a), Stmt::Output(b)) => a == b,
            (
                Stmt::If { branches: a, else_body: ae },
                Stmt::If { branches: b, else_body: be },
            ) => a == b && ae == be,
            (
                Stmt::For { first: af, second: asec, iterable: ai, body: ab, at: aat },
                Stmt::For { first: bf, second: bsec, iterable: bi, body: bb, at: bat },
            ) => af == bf && asec == bsec && ai == bi && ab == bb && aat == bat,
            (Stmt::Break(a), Stmt::Break(b)) => a == b,
            (Stmt::Continue(a), Stmt::Continue(b)) => a == b,
            (Stmt::Custom(a), Stmt::Custom(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}
