//! Statement-tag registry and the built-in tags.
//!
//! The registry is process-wide and read-mostly: it is populated with
//! `if`, `for`, `break` and `continue` on first use, and external code may
//! register more tags at startup. Mutating it while other threads are
//! compiling templates is the caller's responsibility to avoid; a parse
//! that races with `unregister_tag` may or may not see the tag.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, LazyLock, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::ast::{Branch, Stmt};
use crate::expr::ExprParser;
use crate::lexer::Token;
use crate::parser::{DocumentParser, ParseError};

/// Parses one tag. Receives the tag-name token, a parser over the tag's
/// inline arguments, and the document parser for nested bodies.
pub type TagParser = Arc<
    dyn for<'t> Fn(&Token, &mut ExprParser<'t>, &mut DocumentParser<'t>) -> Result<Stmt, ParseError>
        + Send
        + Sync,
>;

#[derive(Clone, Default)]
pub struct TagRegistry {
    parsers: HashMap<String, TagParser>,
}

impl fmt::Debug for TagRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TagRegistry").field("tags", &self.names()).finish()
    }
}

impl TagRegistry {
    /// A registry with no tags at all.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A registry holding `if`, `for`, `break` and `continue`.
    pub fn with_builtins() -> Self {
        let mut parsers: HashMap<String, TagParser> = HashMap::new();
        parsers.insert("if".into(), Arc::new(parse_if));
        parsers.insert("for".into(), Arc::new(parse_for));
        parsers.insert("break".into(), Arc::new(parse_break));
        parsers.insert("continue".into(), Arc::new(parse_continue));
        Self { parsers }
    }

    pub fn register<F>(&mut self, name: impl Into<String>, parser: F) -> Result<(), ParseError>
    where
        F: for<'t> Fn(&Token, &mut ExprParser<'t>, &mut DocumentParser<'t>) -> Result<Stmt, ParseError>
            + Send
            + Sync
            + 'static,
    {
        let name = name.into();
        if self.parsers.contains_key(&name) {
            return Err(ParseError::DuplicateTag { name });
        }
        self.parsers.insert(name, Arc::new(parser));
        Ok(())
    }

    pub fn unregister(&mut self, name: &str) -> bool {
        self.parsers.remove(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<TagParser> {
        self.parsers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.parsers.contains_key(name)
    }

    /// Registered tag names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.parsers.keys().cloned().collect();
        names.sort();
        names
    }
}

static REGISTRY: LazyLock<RwLock<TagRegistry>> =
    LazyLock::new(|| RwLock::new(TagRegistry::with_builtins()));

fn read() -> RwLockReadGuard<'static, TagRegistry> {
    REGISTRY.read().unwrap_or_else(PoisonError::into_inner)
}

fn write() -> RwLockWriteGuard<'static, TagRegistry> {
    REGISTRY.write().unwrap_or_else(PoisonError::into_inner)
}

/// Register a tag in the process-wide registry. Fails if the name is taken.
pub fn register_tag<F>(name: impl Into<String>, parser: F) -> Result<(), ParseError>
where
    F: for<'t> Fn(&Token, &mut ExprParser<'t>, &mut DocumentParser<'t>) -> Result<Stmt, ParseError>
        + Send
        + Sync
        + 'static,
{
    let name = name.into();
    tracing::debug!(tag = %name, "registering tag");
    write().register(name, parser)
}

/// Remove a tag. Returns whether it was registered.
pub fn unregister_tag(name: &str) -> bool {
    let removed = write().unregister(name);
    if removed {
        tracing::warn!(tag = %name, "tag unregistered");
    }
    removed
}

pub fn lookup_tag(name: &str) -> Option<TagParser> {
    read().get(name)
}

pub fn has_tag(name: &str) -> bool {
    read().contains(name)
}

pub fn list_tags() -> Vec<String> {
    read().names()
}

const IF_TERMINATORS: [&str; 3] = ["elif", "else", "endif"];

fn parse_if<'t>(
    start: &Token,
    args: &mut ExprParser<'t>,
    doc: &mut DocumentParser<'t>,
) -> Result<Stmt, ParseError> {
    let condition = args.parse_expression()?;
    args.finish_tag("if")?;

    let (body, mut end) = doc.parse_body(start, &IF_TERMINATORS)?;
    let mut branches = vec![Branch { condition, body }];
    let mut else_body = None;

    loop {
        match end.name.text.as_str() {
            "elif" => {
                if else_body.is_some() {
                    return Err(ParseError::ElifAfterElse {
                        at: end.name.position(),
                    });
                }
                let condition = end.args.parse_expression()?;
                end.args.finish_tag("elif")?;
                let (body, next) = doc.parse_body(start, &IF_TERMINATORS)?;
                branches.push(Branch { condition, body });
                end = next;
            }
            "else" => {
                if else_body.is_some() {
                    return Err(ParseError::MultipleElse {
                        at: end.name.position(),
                    });
                }
                end.args.expect_no_args("else")?;
                let (body, next) = doc.parse_body(start, &IF_TERMINATORS)?;
                else_body = Some(body);
                end = next;
            }
            _ => {
                end.args.expect_no_args("endif")?;
                break;
            }
        }
    }

    Ok(Stmt::If {
        branches,
        else_body,
    })
}

fn parse_for<'t>(
    start: &Token,
    args: &mut ExprParser<'t>,
    doc: &mut DocumentParser<'t>,
) -> Result<Stmt, ParseError> {
    let first = args.expect_ident("loop variable")?.text.clone();
    let second = if args.eat_symbol(",") {
        Some(args.expect_ident("second loop variable")?.text.clone())
    } else {
        None
    };
    args.expect_keyword("in")?;
    let iterable = args.parse_expression()?;
    args.finish_tag("for")?;

    let (body, end) = doc.parse_loop_body(start, &["endfor"])?;
    end.args.expect_no_args("endfor")?;

    Ok(Stmt::For {
        first,
        second,
        iterable,
        body,
        at: start.position(),
    })
}

fn parse_break<'t>(
    start: &Token,
    args: &mut ExprParser<'t>,
    doc: &mut DocumentParser<'t>,
) -> Result<Stmt, ParseError> {
    args.expect_no_args("break")?;
    if !doc.in_loop() {
        return Err(ParseError::OutsideLoop {
            tag: "break".into(),
            at: start.position(),
        });
    }
    Ok(Stmt::Break(start.position()))
}

fn parse_continue<'t>(
    start: &Token,
    args: &mut ExprParser<'t>,
    doc: &mut DocumentParser<'t>,
) -> Result<Stmt, ParseError> {
    args.expect_no_args("continue")?;
    if !doc.in_loop() {
        return Err(ParseError::OutsideLoop {
            tag: "continue".into(),
            at: start.position(),
        });
    }
    Ok(Stmt::Continue(start.position()))
}
