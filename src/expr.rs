//! Expression parser.
//!
//! Works over a bounded token slice (the inside of one `{{ }}` or one tag)
//! and is also the argument parser handed to tag parsers. Precedence, loosest
//! first: `or`, `and`, equality, relational, additive, multiplicative, unary,
//! postfix access, primary. Filter pipes (`| name:arg`) attach to a whole
//! expression.

use crate::ast::{Accessor, BinOp, Expr, ExprKind, UnaryOp};
use crate::lexer::{Position, Token, TokenKind};
use crate::parser::{ParseError, MAX_NESTING};
use crate::value::Value;

const KEYWORDS: [&str; 4] = ["and", "or", "not", "in"];

pub struct ExprParser<'t> {
    tokens: &'t [Token],
    pos: usize,
    /// Position of the close delimiter, used when the slice runs out.
    end: Position,
    depth: usize,
}

impl<'t> ExprParser<'t> {
    pub fn new(tokens: &'t [Token], end: Position) -> Self {
        Self {
            tokens,
            pos: 0,
            end,
            depth: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    pub fn peek(&self) -> Option<&'t Token> {
        self.tokens.get(self.pos)
    }

    pub fn advance(&mut self) -> Option<&'t Token> {
        let token = self.tokens.get(self.pos)?;
        self.pos += 1;
        Some(token)
    }

    /// Tokens not yet consumed.
    pub fn remaining(&self) -> &'t [Token] {
        &self.tokens[self.pos.min(self.tokens.len())..]
    }

    pub fn position(&self) -> Position {
        self.peek().map_or(self.end, Token::position)
    }

    fn unexpected(&self, expected: &str) -> ParseError {
        match self.peek() {
            Some(token) => ParseError::UnexpectedToken {
                found: token.describe(),
                expected: expected.to_string(),
                at: token.position(),
            },
            None => ParseError::UnexpectedToken {
                found: "end of tag".to_string(),
                expected: expected.to_string(),
                at: self.end,
            },
        }
    }

    pub fn eat_symbol(&mut self, symbol: &str) -> bool {
        if self.peek().is_some_and(|t| t.is_symbol(symbol)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    pub fn eat_keyword(&mut self, word: &str) -> bool {
        if self.peek().is_some_and(|t| t.is_ident(word)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    pub fn expect_symbol(&mut self, symbol: &str) -> Result<&'t Token, ParseError> {
        match self.peek() {
            Some(token) if token.is_symbol(symbol) => {
                self.pos += 1;
                Ok(token)
            }
            _ => Err(self.unexpected(&format!("'{symbol}'"))),
        }
    }

    pub fn expect_keyword(&mut self, word: &'static str) -> Result<&'t Token, ParseError> {
        match self.peek() {
            Some(token) if token.is_ident(word) => {
                self.pos += 1;
                Ok(token)
            }
            _ => Err(ParseError::MissingKeyword {
                keyword: word,
                at: self.position(),
            }),
        }
    }

    /// A plain identifier that is not an operator keyword.
    pub fn expect_ident(&mut self, what: &str) -> Result<&'t Token, ParseError> {
        match self.peek() {
            Some(token) if token.kind == TokenKind::Ident && !KEYWORDS.contains(&token.text.as_str()) => {
                self.pos += 1;
                Ok(token)
            }
            _ => Err(self.unexpected(what)),
        }
    }

    /// Fail if anything is left in the slice.
    pub fn finish(&self) -> Result<(), ParseError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self.unexpected("end of expression"))
        }
    }

    /// Fail if anything follows a tag's arguments.
    pub fn finish_tag(&self, tag: &str) -> Result<(), ParseError> {
        match self.peek() {
            None => Ok(()),
            Some(token) => Err(ParseError::UnexpectedTokens {
                tag: tag.to_string(),
                found: token.describe(),
                at: token.position(),
            }),
        }
    }

    /// For tags such as `else` or `endfor` that take no arguments at all.
    pub fn expect_no_args(&self, tag: &str) -> Result<(), ParseError> {
        match self.peek() {
            None => Ok(()),
            Some(token) => Err(ParseError::TakesNoArguments {
                tag: tag.to_string(),
                at: token.position(),
            }),
        }
    }

    /// Parse one expression including any trailing filter pipeline.
    pub fn parse_expression(&mut self) -> Result<Expr, ParseError> {
        self.enter()?;
        let parsed = self.parse_pipeline();
        self.depth -= 1;
        parsed
    }

    fn enter(&mut self) -> Result<(), ParseError> {
        if self.depth >= MAX_NESTING {
            return Err(ParseError::NestingTooDeep {
                at: self.position(),
            });
        }
        self.depth += 1;
        Ok(())
    }

    fn parse_pipeline(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_or()?;
        while self.peek().is_some_and(|t| t.is_symbol("|")) {
            let pipe = self.advance().map_or(self.end, Token::position);
            let name = self.expect_ident("filter name")?.text.clone();
            let mut args = Vec::new();
            while self.eat_symbol(":") {
                args.push(self.parse_unary()?);
            }
            expr = Expr::new(
                ExprKind::Filter {
                    input: Box::new(expr),
                    name,
                    args,
                },
                pipe,
            );
        }
        Ok(expr)
    }

    fn binary(lhs: Expr, op: BinOp, rhs: Expr) -> Expr {
        let at = lhs.at;
        Expr::new(
            ExprKind::Binary {
                lhs: Box::new(lhs),
                op,
                rhs: Box::new(rhs),
            },
            at,
        )
    }

    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_and()?;
        while self.eat_keyword("or") || self.eat_symbol("||") {
            let rhs = self.parse_and()?;
            lhs = Self::binary(lhs, BinOp::Or, rhs);
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_equality()?;
        while self.eat_keyword("and") || self.eat_symbol("&&") {
            let rhs = self.parse_equality()?;
            lhs = Self::binary(lhs, BinOp::And, rhs);
        }
        Ok(lhs)
    }

    /// Consume the next symbol if it is one of `ops`.
    fn eat_operator(&mut self, ops: &[(&str, BinOp)]) -> Option<BinOp> {
        let token = self.peek()?;
        let (_, op) = ops.iter().find(|(sym, _)| token.is_symbol(sym))?;
        self.pos += 1;
        Some(*op)
    }

    fn parse_equality(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_relational()?;
        while let Some(op) = self.eat_operator(&[("==", BinOp::Eq), ("!=", BinOp::Ne)]) {
            let rhs = self.parse_relational()?;
            lhs = Self::binary(lhs, op, rhs);
        }
        Ok(lhs)
    }

    fn parse_relational(&mut self) -> Result<Expr, ParseError> {
        const OPS: [(&str, BinOp); 4] = [
            ("<", BinOp::Lt),
            ("<=", BinOp::Le),
            (">", BinOp::Gt),
            (">=", BinOp::Ge),
        ];
        let mut lhs = self.parse_additive()?;
        while let Some(op) = self.eat_operator(&OPS) {
            let rhs = self.parse_additive()?;
            lhs = Self::binary(lhs, op, rhs);
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_multiplicative()?;
        while let Some(op) = self.eat_operator(&[("+", BinOp::Add), ("-", BinOp::Sub)]) {
            let rhs = self.parse_multiplicative()?;
            lhs = Self::binary(lhs, op, rhs);
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ParseError> {
        const OPS: [(&str, BinOp); 3] = [("*", BinOp::Mul), ("/", BinOp::Div), ("%", BinOp::Mod)];
        let mut lhs = self.parse_unary()?;
        while let Some(op) = self.eat_operator(&OPS) {
            let rhs = self.parse_unary()?;
            lhs = Self::binary(lhs, op, rhs);
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        let at = self.position();
        let op = if self.eat_keyword("not") || self.eat_symbol("!") {
            UnaryOp::Not
        } else if self.eat_symbol("-") {
            UnaryOp::Neg
        } else if self.eat_symbol("+") {
            UnaryOp::Plus
        } else {
            return self.parse_postfix();
        };
        self.enter()?;
        let operand = self.parse_unary();
        self.depth -= 1;
        let operand = operand?;
        Ok(Expr::new(
            ExprKind::Unary {
                op,
                operand: Box::new(operand),
            },
            at,
        ))
    }

    fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
        let base = self.parse_primary()?;
        let mut chain = Vec::new();

        loop {
            if self.eat_symbol(".") {
                match self.peek() {
                    Some(t) if t.kind == TokenKind::Ident => {
                        chain.push(Accessor::Property(t.text.clone()));
                    }
                    Some(t) if t.kind == TokenKind::Number => {
                        let index = t.text.parse::<usize>().map_err(|_| ParseError::MalformedNumber {
                            text: t.text.clone(),
                            at: t.position(),
                        })?;
                        chain.push(Accessor::Index(index));
                    }
                    _ => return Err(self.unexpected("property name or index")),
                }
                self.pos += 1;
            } else if self.eat_symbol("[") {
                let key = self.parse_expression()?;
                self.expect_symbol("]")?;
                chain.push(Accessor::Subscript(key));
            } else {
                break;
            }
        }

        if chain.is_empty() {
            return Ok(base);
        }
        let at = base.at;
        Ok(Expr::new(
            ExprKind::Access {
                base: Box::new(base),
                chain,
            },
            at,
        ))
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let Some(token) = self.peek() else {
            return Err(self.unexpected("expression"));
        };
        let at = token.position();

        let kind = match token.kind {
            TokenKind::Number => ExprKind::Literal(parse_number(token)?),
            TokenKind::Str => ExprKind::Literal(Value::String(token.text.clone())),
            TokenKind::Ident => match token.text.as_str() {
                "true" => ExprKind::Literal(Value::Bool(true)),
                "false" => ExprKind::Literal(Value::Bool(false)),
                "nil" | "none" => ExprKind::Literal(Value::Nil),
                word if KEYWORDS.contains(&word) => return Err(self.unexpected("expression")),
                name => ExprKind::Var(name.to_string()),
            },
            TokenKind::Symbol if token.text == "(" => {
                self.pos += 1;
                let inner = self.parse_expression()?;
                if !self.eat_symbol(")") {
                    return Err(ParseError::MissingClosingParen { at });
                }
                return Ok(inner);
            }
            TokenKind::Symbol if token.text == "[" => {
                self.pos += 1;
                return self.parse_list(at);
            }
            _ => return Err(self.unexpected("expression")),
        };
        self.pos += 1;
        Ok(Expr::new(kind, at))
    }

    /// `[a, b, c]`, trailing comma allowed. The `[` is already consumed.
    fn parse_list(&mut self, at: Position) -> Result<Expr, ParseError> {
        let mut items = Vec::new();
        while !self.eat_symbol("]") {
            items.push(self.parse_expression()?);
            if !self.eat_symbol(",") {
                self.expect_symbol("]")?;
                break;
            }
        }
        Ok(Expr::new(ExprKind::List(items), at))
    }
}

/// Integer when there is no fraction or exponent, float otherwise.
fn parse_number(token: &Token) -> Result<Value, ParseError> {
    let malformed = || ParseError::MalformedNumber {
        text: token.text.clone(),
        at: token.position(),
    };
    if token.text.contains(['.', 'e', 'E']) {
        token.text.parse::<f64>().map(Value::Float).map_err(|_| malformed())
    } else {
        token.text.parse::<i64>().map(Value::Int).map_err(|_| malformed())
    }
}

/// Parse a complete slice as a single expression.
pub fn parse_expression(tokens: &[Token], end: Position) -> Result<Expr, ParseError> {
    let mut parser = ExprParser::new(tokens, end);
    let expr = parser.parse_expression()?;
    parser.finish()?;
    Ok(expr)
}
