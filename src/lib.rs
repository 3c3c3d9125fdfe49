//! shimmytpl: a small Jinja-like template language.
//!
//! Source text is tokenized, parsed into a statement tree, and interpreted
//! against a [`Context`] of bindings. A compiled [`Template`] is immutable
//! and can be rendered from many threads at once; every render builds its
//! own scopes and loop stack.
//!
//! Syntax:
//! - `{{ expr }}` outputs a value, `{% tag ... %}` runs a tag, `{# ... #}`
//!   is a comment.
//! - Expressions: literals (`1`, `2.5`, `'s'`, `true`, `nil`, `[a, b]`),
//!   variables, `.name` / `.0` / `[expr]` access, `not`/`-`/`+`,
//!   `* / %`, `+ -`, `< <= > >=`, `== !=`, `and`, `or`, and filter
//!   pipes `| name:arg`.
//! - Tags: `if`/`elif`/`else`/`endif`, `for x in xs` / `for k, v in m` ...
//!   `endfor`, `break`, `continue`, plus anything registered through
//!   [`register_tag`].
//! - Inside a loop, `loop` exposes `index`, `revindex`, `first`, `last`,
//!   `length` and `parent`.
//!
//! Typing is strict: `1 + "a"` and `"1" == 1` are render errors, not
//! silent coercions or `false`.
//!
//! ```
//! use shimmytpl::{compile, Context};
//!
//! let template = compile("{% for n in nums %}{{ n * 2 }}{% if not loop.last %},{% endif %}{% endfor %}").unwrap();
//! let ctx = Context::new().with("nums", vec![1, 2, 3]);
//! assert_eq!(template.render(&ctx).unwrap(), "2,4,6");
//! ```

pub mod ast;
pub mod context;
pub mod eval;
pub mod expr;
pub mod filters;
pub mod lexer;
pub mod ops;
pub mod parser;
pub mod tags;
pub mod value;

pub use ast::{CustomStatement, Stmt};
pub use context::{Context, ContextError};
pub use eval::{ControlSignal, Executor, LoopContext, RenderError};
pub use expr::ExprParser;
pub use filters::{
    has_filter, list_filters, lookup_filter, register_filter, unregister_filter, Filter,
    FilterError, FilterRegistry,
};
pub use lexer::{LexError, Position, Token, TokenKind};
pub use parser::{DocumentParser, EndTag, ParseError};
pub use tags::{has_tag, list_tags, lookup_tag, register_tag, unregister_tag, TagParser, TagRegistry};
pub use value::{Record, Value, ValueError};

/// Compile failure: a lexical or syntactic error.
pub type CompileError = ParseError;

/// Either phase failing, for [`render`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("compile error: {0}")]
    Compile(#[from] CompileError),
    #[error("render error: {0}")]
    Render(#[from] RenderError),
}

/// A compiled template.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    statements: Vec<Stmt>,
}

impl Template {
    pub fn statements(&self) -> &[Stmt] {
        &self.statements
    }

    /// Render against `context`. The first runtime error aborts the render;
    /// there is no partial output.
    pub fn render(&self, context: &Context) -> Result<String, RenderError> {
        Executor::new(context).render(&self.statements)
    }
}

/// Tokenize and parse `source`.
pub fn compile(source: &str) -> Result<Template, CompileError> {
    let tokens = lexer::tokenize(source)?;
    let statements = parser::parse(&tokens)?;
    tracing::debug!(
        tokens = tokens.len(),
        statements = statements.len(),
        "compiled template"
    );
    Ok(Template { statements })
}

/// Compile and render in one call.
pub fn render(source: &str, context: &Context) -> Result<String, Error> {
    Ok(compile(source)?.render(context)?)
}
