//! Tree-walking executor.
//!
//! Every statement returns a [`ControlSignal`] next to the text it appends.
//! Conditionals pass their body's signal upward unchanged; loops absorb
//! `Break` and use `Continue` to end the current iteration. The parser
//! guarantees `break`/`continue` only appear inside loop bodies.

use std::borrow::Cow;
use std::collections::HashMap;

use crate::ast::{Accessor, BinOp, Expr, ExprKind, Stmt, UnaryOp};
use crate::context::Context;
use crate::filters::{self, FilterError};
use crate::lexer::Position;
use crate::ops;
use crate::value::{Record, Value, ValueError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControlSignal {
    #[default]
    None,
    Break,
    Continue,
}

/// Render-time failure. The first one aborts the whole render.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RenderError {
    #[error("undefined variable '{name}' at {at}")]
    UndefinedVariable { name: String, at: Position },
    #[error("{source} at {at}")]
    Value { source: ValueError, at: Position },
    #[error("value of type {ty} is not iterable at {at}")]
    NotIterable { ty: &'static str, at: Position },
    #[error("filter '{name}' not found at {at}")]
    FilterNotFound { name: String, at: Position },
    #[error("filter '{name}' failed at {at}: {source}")]
    Filter {
        name: String,
        source: FilterError,
        at: Position,
    },
    #[error("{0}")]
    Custom(String),
}

impl RenderError {
    fn value(source: ValueError, at: Position) -> Self {
        RenderError::Value { source, at }
    }
}

/// Per-iteration loop state. `parent` indexes the enclosing loop's frame on
/// the executor's loop stack, so an inner loop never owns its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopContext {
    pub index: usize,
    pub length: usize,
    pub parent: Option<usize>,
}

impl LoopContext {
    pub fn revindex(&self) -> usize {
        self.length - self.index - 1
    }

    pub fn first(&self) -> bool {
        self.index == 0
    }

    pub fn last(&self) -> bool {
        self.index + 1 == self.length
    }
}

/// Render state for one call. The compiled tree is only borrowed; all
/// mutable state (scopes, loop stack) lives here.
pub struct Executor<'c> {
    globals: &'c Context,
    scopes: Vec<HashMap<String, Value>>,
    loops: Vec<LoopContext>,
}

impl<'c> Executor<'c> {
    pub fn new(globals: &'c Context) -> Self {
        Self {
            globals,
            scopes: vec![HashMap::new()],
            loops: Vec::new(),
        }
    }

    /// Render a statement list into a fresh string.
    pub fn render(&mut self, body: &[Stmt]) -> Result<String, RenderError> {
        let mut output = String::new();
        self.execute_block(body, &mut output)?;
        Ok(output)
    }

    /// Look a name up from the innermost scope out to the render globals.
    pub fn lookup(&self, name: &str) -> Option<&Value> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name))
            .or_else(|| self.globals.get(name))
    }

    /// Bind a name in the innermost scope. Loop scopes are discarded after
    /// each iteration, so the binding never outlives the enclosing loop body.
    pub fn set_local(&mut self, name: impl Into<String>, value: Value) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.into(), value);
        }
    }

    /// The innermost active loop, if any.
    pub fn current_loop(&self) -> Option<&LoopContext> {
        self.loops.last()
    }

    /// Run statements until one of them signals `Break`/`Continue`.
    pub fn execute_block(
        &mut self,
        body: &[Stmt],
        out: &mut String,
    ) -> Result<ControlSignal, RenderError> {
        for stmt in body {
            let signal = self.execute(stmt, out)?;
            if signal != ControlSignal::None {
                return Ok(signal);
            }
        }
        Ok(ControlSignal::None)
    }

    pub fn execute(&mut self, stmt: &Stmt, out: &mut String) -> Result<ControlSignal, RenderError> {
        match stmt {
            Stmt::Text(text) => {
                out.push_str(text);
                Ok(ControlSignal::None)
            }
            Stmt::Output(expr) => {
                let value = self.eval(expr)?;
                out.push_str(&value.to_string());
                Ok(ControlSignal::None)
            }
            Stmt::If {
                branches,
                else_body,
            } => {
                for branch in branches {
                    if self.eval(&branch.condition)?.is_truthy() {
                        return self.execute_block(&branch.body, out);
                    }
                }
                match else_body {
                    Some(body) => self.execute_block(body, out),
                    None => Ok(ControlSignal::None),
                }
            }
            Stmt::For {
                first,
                second,
                iterable,
                body,
                at,
            } => {
                let collection = self.eval(iterable)?;
                self.execute_for(first, second.as_deref(), collection, body, *at, out)?;
                Ok(ControlSignal::None)
            }
            Stmt::Break(_) => Ok(ControlSignal::Break),
            Stmt::Continue(_) => Ok(ControlSignal::Continue),
            Stmt::Custom(custom) => custom.execute(self, out),
        }
    }

    fn execute_for(
        &mut self,
        first: &str,
        second: Option<&str>,
        collection: Value,
        body: &[Stmt],
        at: Position,
        out: &mut String,
    ) -> Result<(), RenderError> {
        // (key-or-index, element); mappings bind their key when only one
        // name is given.
        let (items, single_binds_key): (Vec<(Value, Value)>, bool) = match collection {
            Value::String(s) => (
                s.chars()
                    .enumerate()
                    .map(|(i, c)| (Value::from(i), Value::String(c.to_string())))
                    .collect(),
                false,
            ),
            Value::Seq(items) => (
                items
                    .into_iter()
                    .enumerate()
                    .map(|(i, item)| (Value::from(i), item))
                    .collect(),
                false,
            ),
            Value::Map(map) => (
                map.into_iter().map(|(k, v)| (Value::String(k), v)).collect(),
                true,
            ),
            other => {
                return Err(RenderError::NotIterable {
                    ty: other.type_name(),
                    at,
                })
            }
        };

        let length = items.len();
        let parent = self.loops.len().checked_sub(1);
        let slot = self.loops.len();
        self.loops.push(LoopContext {
            index: 0,
            length,
            parent,
        });

        let result = self.run_iterations(first, second, items, single_binds_key, body, slot, out);
        self.loops.pop();
        result
    }

    #[allow(clippy::too_many_arguments)]
    fn run_iterations(
        &mut self,
        first: &str,
        second: Option<&str>,
        items: Vec<(Value, Value)>,
        single_binds_key: bool,
        body: &[Stmt],
        slot: usize,
        out: &mut String,
    ) -> Result<(), RenderError> {
        let length = items.len();
        let parent = self.loops[slot].parent;

        for (index, (key, item)) in items.into_iter().enumerate() {
            self.loops[slot] = LoopContext {
                index,
                length,
                parent,
            };

            let mut scope = HashMap::new();
            scope.insert("loop".to_string(), self.loop_value(slot));
            match second {
                Some(second) => {
                    scope.insert(first.to_string(), key);
                    scope.insert(second.to_string(), item);
                }
                None if single_binds_key => {
                    scope.insert(first.to_string(), key);
                }
                None => {
                    scope.insert(first.to_string(), item);
                }
            }

            self.scopes.push(scope);
            let signal = self.execute_block(body, out);
            self.scopes.pop();

            match signal? {
                ControlSignal::Break => {
                    tracing::trace!(index, length, "loop break");
                    break;
                }
                ControlSignal::Continue => {
                    tracing::trace!(index, length, "loop continue");
                }
                ControlSignal::None => {}
            }
        }
        Ok(())
    }

    /// Materialise the loop frame at `slot` (and its parents) as a value.
    fn loop_value(&self, slot: usize) -> Value {
        let ctx = self.loops[slot];
        let parent = ctx.parent.map_or(Value::Nil, |p| self.loop_value(p));
        Value::Record(
            Record::new("loop")
                .with_field("index", ctx.index)
                .with_field("revindex", ctx.revindex())
                .with_field("first", ctx.first())
                .with_field("last", ctx.last())
                .with_field("length", ctx.length)
                .with_field("parent", parent),
        )
    }

    /// One step of an access chain, borrowing from `value` where possible.
    fn access<'v>(
        &self,
        value: &'v Value,
        accessor: &Accessor,
        at: Position,
    ) -> Result<Cow<'v, Value>, RenderError> {
        match accessor {
            Accessor::Property(name) => value.property_ref(name).map(Cow::Borrowed),
            Accessor::Index(index) => value.index_ref(*index as i64),
            Accessor::Subscript(key) => {
                let key = self.eval(key)?;
                value.subscript_ref(&key)
            }
        }
        .map_err(|e| RenderError::value(e, at))
    }

    pub fn eval(&self, expr: &Expr) -> Result<Value, RenderError> {
        match &expr.kind {
            ExprKind::Literal(value) => Ok(value.clone()),
            ExprKind::Var(name) => {
                self.lookup(name)
                    .cloned()
                    .ok_or_else(|| RenderError::UndefinedVariable {
                        name: name.clone(),
                        at: expr.at,
                    })
            }
            ExprKind::List(items) => items
                .iter()
                .map(|item| self.eval(item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Seq),
            ExprKind::Access { base, chain } => {
                // Walk the chain on borrowed values; only the final element
                // is cloned out.
                let owned;
                let root = match &base.kind {
                    ExprKind::Var(name) => {
                        self.lookup(name)
                            .ok_or_else(|| RenderError::UndefinedVariable {
                                name: name.clone(),
                                at: base.at,
                            })?
                    }
                    _ => {
                        owned = self.eval(base)?;
                        &owned
                    }
                };
                let mut current = Cow::Borrowed(root);
                for accessor in chain {
                    current = match current {
                        Cow::Borrowed(value) => self.access(value, accessor, expr.at)?,
                        Cow::Owned(value) => {
                            Cow::Owned(self.access(&value, accessor, expr.at)?.into_owned())
                        }
                    };
                }
                Ok(current.into_owned())
            }
            ExprKind::Unary { op, operand } => {
                let value = self.eval(operand)?;
                let result = match op {
                    UnaryOp::Not => Ok(Value::Bool(!value.is_truthy())),
                    UnaryOp::Neg => ops::negate(&value),
                    UnaryOp::Plus => ops::plus(&value),
                };
                result.map_err(|e| RenderError::value(e, expr.at))
            }
            ExprKind::Binary { lhs, op, rhs } => {
                let left = self.eval(lhs)?;
                match op {
                    BinOp::Or if left.is_truthy() => Ok(Value::Bool(true)),
                    BinOp::And if !left.is_truthy() => Ok(Value::Bool(false)),
                    BinOp::Or | BinOp::And => Ok(Value::Bool(self.eval(rhs)?.is_truthy())),
                    _ => {
                        let right = self.eval(rhs)?;
                        ops::binary(*op, &left, &right).map_err(|e| RenderError::value(e, expr.at))
                    }
                }
            }
            ExprKind::Filter { input, name, args } => {
                let filter = filters::lookup_filter(name).ok_or_else(|| RenderError::FilterNotFound {
                    name: name.clone(),
                    at: expr.at,
                })?;
                let input = self.eval(input)?;
                let args = args
                    .iter()
                    .map(|arg| self.eval(arg).map(|v| v.to_string()))
                    .collect::<Result<Vec<_>, _>>()?;
                filter(input, args.as_slice()).map_err(|source| RenderError::Filter {
                    name: name.clone(),
                    source,
                    at: expr.at,
                })
            }
        }
    }
}
