use crate::ast::Stmt;
use crate::expr::{parse_expression, ExprParser};
use crate::lexer::{LexError, Position, Token, TokenKind};
use crate::tags;

/// Compile-time failure. Compilation is all-or-nothing: there is no
/// recovery and no partial tree.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseError {
    #[error(transparent)]
    Lex(#[from] LexError),
    #[error("unexpected {found} at {at}, expected {expected}")]
    UnexpectedToken {
        found: String,
        expected: String,
        at: Position,
    },
    #[error("unexpected tokens after '{tag}' arguments: {found} at {at}")]
    UnexpectedTokens {
        tag: String,
        found: String,
        at: Position,
    },
    #[error("missing closing parenthesis for '(' at {at}")]
    MissingClosingParen { at: Position },
    #[error("malformed number '{text}' at {at}")]
    MalformedNumber { text: String, at: Position },
    #[error("expected '{keyword}' at {at}")]
    MissingKeyword { keyword: &'static str, at: Position },
    #[error("unknown tag '{name}' at {at}")]
    UnknownTag { name: String, at: Position },
    #[error("expected '{expected}' to close '{tag}' opened at {at}")]
    MissingEndTag {
        tag: String,
        expected: String,
        at: Position,
    },
    #[error("'{tag}' does not take arguments ({at})")]
    TakesNoArguments { tag: String, at: Position },
    #[error("'elif' after 'else' at {at}")]
    ElifAfterElse { at: Position },
    #[error("multiple 'else' blocks at {at}")]
    MultipleElse { at: Position },
    #[error("'{tag}' outside of loop at {at}")]
    OutsideLoop { tag: String, at: Position },
    #[error("tag '{name}' is already registered")]
    DuplicateTag { name: String },
    #[error("nesting too deep at {at}")]
    NestingTooDeep { at: Position },
}

/// Deepest allowed nesting of blocks, and separately of expressions.
pub const MAX_NESTING: usize = 128;

/// The closing tag that ended a nested body, with its own inline arguments.
pub struct EndTag<'t> {
    pub name: &'t Token,
    pub args: ExprParser<'t>,
}

/// Recursive-descent parser over a full token stream.
///
/// Tags are dispatched through the tag registry; each tag parser gets this
/// parser back so it can parse its own nested body.
pub struct DocumentParser<'t> {
    tokens: &'t [Token],
    pos: usize,
    loop_depth: usize,
    depth: usize,
}

impl<'t> DocumentParser<'t> {
    pub fn new(tokens: &'t [Token]) -> Self {
        Self {
            tokens,
            pos: 0,
            loop_depth: 0,
            depth: 0,
        }
    }

    /// Parse the whole stream into a statement list.
    pub fn parse(mut self) -> Result<Vec<Stmt>, ParseError> {
        let (nodes, _) = self.parse_nodes(&[])?;
        Ok(nodes)
    }

    /// Parse a nested body until one of `terminators` is reached.
    ///
    /// The last terminator names the closing tag; reaching end of input first
    /// is a [`ParseError::MissingEndTag`] pointing at `opener`.
    pub fn parse_body(
        &mut self,
        opener: &Token,
        terminators: &[&str],
    ) -> Result<(Vec<Stmt>, EndTag<'t>), ParseError> {
        if self.depth >= MAX_NESTING {
            return Err(ParseError::NestingTooDeep {
                at: opener.position(),
            });
        }
        self.depth += 1;
        let parsed = self.parse_nodes(terminators);
        self.depth -= 1;
        let (nodes, end) = parsed?;
        match end {
            Some(end) => Ok((nodes, end)),
            None => Err(ParseError::MissingEndTag {
                tag: opener.text.clone(),
                expected: terminators.last().copied().unwrap_or_default().to_string(),
                at: opener.position(),
            }),
        }
    }

    /// Like [`parse_body`](Self::parse_body), but `break`/`continue` are
    /// accepted inside.
    pub fn parse_loop_body(
        &mut self,
        opener: &Token,
        terminators: &[&str],
    ) -> Result<(Vec<Stmt>, EndTag<'t>), ParseError> {
        self.loop_depth += 1;
        let result = self.parse_body(opener, terminators);
        self.loop_depth -= 1;
        result
    }

    /// True while parsing the body of some enclosing loop.
    pub fn in_loop(&self) -> bool {
        self.loop_depth > 0
    }

    fn current(&self) -> Option<&'t Token> {
        self.tokens.get(self.pos)
    }

    /// Take the tokens up to the next `close` delimiter, returning them and
    /// the delimiter's position.
    fn take_until(&mut self, close: TokenKind) -> Result<(&'t [Token], Position), ParseError> {
        let start = self.pos;
        while let Some(token) = self.current() {
            if token.kind == close {
                self.pos += 1;
                return Ok((&self.tokens[start..self.pos - 1], token.position()));
            }
            if matches!(token.kind, TokenKind::Eof | TokenKind::TagOpen | TokenKind::ExprOpen) {
                return Err(ParseError::UnexpectedToken {
                    found: token.describe(),
                    expected: close.to_string(),
                    at: token.position(),
                });
            }
            self.pos += 1;
        }
        let at = self.tokens.last().map_or_else(Position::default, Token::position);
        Err(ParseError::UnexpectedToken {
            found: TokenKind::Eof.to_string(),
            expected: close.to_string(),
            at,
        })
    }

    fn parse_nodes(
        &mut self,
        terminators: &[&str],
    ) -> Result<(Vec<Stmt>, Option<EndTag<'t>>), ParseError> {
        let mut nodes = Vec::new();

        while let Some(token) = self.current() {
            match token.kind {
                TokenKind::Eof => break,
                TokenKind::Text => {
                    self.pos += 1;
                    nodes.push(Stmt::Text(token.text.clone()));
                }
                TokenKind::ExprOpen => {
                    self.pos += 1;
                    let (inner, end) = self.take_until(TokenKind::ExprClose)?;
                    nodes.push(Stmt::Output(parse_expression(inner, end)?));
                }
                TokenKind::TagOpen => {
                    self.pos += 1;
                    let (inner, end) = self.take_until(TokenKind::TagClose)?;
                    let Some(name) = inner.first().filter(|t| t.kind == TokenKind::Ident) else {
                        return Err(ParseError::UnexpectedToken {
                            found: inner.first().map_or_else(|| "'%}'".to_string(), Token::describe),
                            expected: "tag name".to_string(),
                            at: inner.first().map_or(end, Token::position),
                        });
                    };
                    let mut args = ExprParser::new(&inner[1..], end);

                    if terminators.contains(&name.text.as_str()) {
                        return Ok((nodes, Some(EndTag { name, args })));
                    }

                    let parser = tags::lookup_tag(&name.text).ok_or_else(|| ParseError::UnknownTag {
                        name: name.text.clone(),
                        at: name.position(),
                    })?;
                    nodes.push(parser(name, &mut args, self)?);
                }
                _ => {
                    return Err(ParseError::UnexpectedToken {
                        found: token.describe(),
                        expected: "text, '{{' or '{%'".to_string(),
                        at: token.position(),
                    })
                }
            }
        }

        Ok((nodes, None))
    }
}

/// Parse a token stream produced by [`crate::lexer::tokenize`].
pub fn parse(tokens: &[Token]) -> Result<Vec<Stmt>, ParseError> {
    DocumentParser::new(tokens).parse()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::ExprKind;
    use crate::lexer::tokenize;

    fn parse_source(source: &str) -> Result<Vec<Stmt>, ParseError> {
        parse(&tokenize(source)?)
    }

    #[test]
    fn text_and_output() {
        let nodes = parse_source("Hi {{ name }}!").unwrap();
        assert_eq!(nodes.len(), 3);
        assert_eq!(nodes[0], Stmt::Text("Hi ".into()));
        assert!(matches!(&nodes[1], Stmt::Output(e) if e.kind == ExprKind::Var("name".into())));
    }

    #[test]
    fn if_elif_else_structure() {
        let nodes = parse_source("{% if a %}A{% elif b %}B{% elif c %}C{% else %}D{% endif %}").unwrap();
        let Stmt::If { branches, else_body } = &nodes[0] else {
            panic!("expected if");
        };
        assert_eq!(branches.len(), 3);
        assert_eq!(else_body.as_deref(), Some(&[Stmt::Text("D".into())][..]));
    }

    #[test]
    fn for_with_two_names() {
        let nodes = parse_source("{% for k, v in items %}{{ k }}{% endfor %}").unwrap();
        let Stmt::For { first, second, body, .. } = &nodes[0] else {
            panic!("expected for");
        };
        assert_eq!(first, "k");
        assert_eq!(second.as_deref(), Some("v"));
        assert_eq!(body.len(), 1);
    }

    #[test]
    fn nested_blocks() {
        let nodes =
            parse_source("{% for a in x %}{% for b in a %}{% if b %}{% break %}{% endif %}{% endfor %}{% endfor %}")
                .unwrap();
        assert_eq!(nodes.len(), 1);
    }

    #[test]
    fn multiple_else_fails() {
        assert!(matches!(
            parse_source("{% if x %}a{% else %}b{% else %}c{% endif %}"),
            Err(ParseError::MultipleElse { .. })
        ));
    }

    #[test]
    fn elif_after_else_fails() {
        assert!(matches!(
            parse_source("{% if x %}a{% else %}b{% elif y %}c{% endif %}"),
            Err(ParseError::ElifAfterElse { .. })
        ));
    }

    #[test]
    fn argument_errors() {
        assert!(matches!(
            parse_source("{% if x y %}{% endif %}"),
            Err(ParseError::UnexpectedTokens { ref tag, .. }) if tag == "if"
        ));
        assert!(matches!(
            parse_source("{% if x %}{% else y %}{% endif %}"),
            Err(ParseError::TakesNoArguments { ref tag, .. }) if tag == "else"
        ));
        assert!(matches!(
            parse_source("{% if x %}{% endif now %}"),
            Err(ParseError::TakesNoArguments { ref tag, .. }) if tag == "endif"
        ));
        assert!(matches!(
            parse_source("{% for x in y z %}{% endfor %}"),
            Err(ParseError::UnexpectedTokens { ref tag, .. }) if tag == "for"
        ));
        assert!(matches!(
            parse_source("{% for x in y %}{% endfor x %}"),
            Err(ParseError::TakesNoArguments { ref tag, .. }) if tag == "endfor"
        ));
        assert!(matches!(
            parse_source("{% for x in y %}{% break now %}{% endfor %}"),
            Err(ParseError::TakesNoArguments { ref tag, .. }) if tag == "break"
        ));
        assert!(matches!(
            parse_source("{% for x y %}{% endfor %}"),
            Err(ParseError::MissingKeyword { keyword: "in", .. })
        ));
    }

    #[test]
    fn missing_end_tags() {
        assert!(matches!(
            parse_source("{% if x %}open"),
            Err(ParseError::MissingEndTag { ref expected, .. }) if expected == "endif"
        ));
        assert!(matches!(
            parse_source("{% for x in y %}open"),
            Err(ParseError::MissingEndTag { ref expected, .. }) if expected == "endfor"
        ));
    }

    #[test]
    fn break_and_continue_need_a_loop() {
        assert!(matches!(
            parse_source("{% break %}"),
            Err(ParseError::OutsideLoop { ref tag, .. }) if tag == "break"
        ));
        assert!(matches!(
            parse_source("{% if x %}{% continue %}{% endif %}"),
            Err(ParseError::OutsideLoop { ref tag, .. }) if tag == "continue"
        ));
        assert!(parse_source("{% for x in y %}{% if x %}{% continue %}{% endif %}{% endfor %}").is_ok());
    }

    #[test]
    fn unknown_and_stray_tags() {
        assert!(matches!(
            parse_source("{% frobnicate %}"),
            Err(ParseError::UnknownTag { ref name, .. }) if name == "frobnicate"
        ));
        assert!(matches!(
            parse_source("{% endif %}"),
            Err(ParseError::UnknownTag { .. })
        ));
        assert!(matches!(parse_source("{% %}"), Err(ParseError::UnexpectedToken { .. })));
    }

    #[test]
    fn deep_block_nesting_is_an_error() {
        let open = "{% if true %}".repeat(100_000);
        assert!(matches!(parse_source(&open), Err(ParseError::NestingTooDeep { .. })));

        let depth = MAX_NESTING - 1;
        let nested = format!("{}x{}", "{% if true %}".repeat(depth), "{% endif %}".repeat(depth));
        assert!(parse_source(&nested).is_ok());
    }

    #[test]
    fn unclosed_delimiters() {
        assert!(matches!(parse_source("{{ x"), Err(ParseError::UnexpectedToken { .. })));
        assert!(matches!(parse_source("{% if x"), Err(ParseError::UnexpectedToken { .. })));
    }
}
