//! Tokenizer for template source.
//!
//! The tokenizer runs in two modes. In text mode everything up to the next
//! `{{`, `{%` or `{#` is emitted as one [`TokenKind::Text`] token. After an
//! opening delimiter it switches to code mode, where whitespace is skipped
//! and identifiers, literals and symbols are produced until the matching
//! close delimiter. Comments (`{# ... #}`) are dropped without tokenizing
//! their contents.

use std::fmt;

/// 1-based line/column location in the template source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

impl Position {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}, column {}", self.line, self.column)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Eof,
    Text,
    TagOpen,   // {%
    TagClose,  // %}
    ExprOpen,  // {{
    ExprClose, // }}
    Ident,
    Str,
    Number,
    Symbol,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TokenKind::Eof => "end of input",
            TokenKind::Text => "text",
            TokenKind::TagOpen => "'{%'",
            TokenKind::TagClose => "'%}'",
            TokenKind::ExprOpen => "'{{'",
            TokenKind::ExprClose => "'}}'",
            TokenKind::Ident => "identifier",
            TokenKind::Str => "string",
            TokenKind::Number => "number",
            TokenKind::Symbol => "symbol",
        };
        f.write_str(name)
    }
}

/// A single lexical token.
///
/// For string literals `text` holds the decoded contents (quotes removed,
/// escapes applied); for every other kind it is the source slice.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub line: usize,
    pub column: usize,
}

impl Token {
    pub fn new(kind: TokenKind, text: impl Into<String>, at: Position) -> Self {
        Self {
            kind,
            text: text.into(),
            line: at.line,
            column: at.column,
        }
    }

    pub fn position(&self) -> Position {
        Position::new(self.line, self.column)
    }

    pub fn is_symbol(&self, symbol: &str) -> bool {
        self.kind == TokenKind::Symbol && self.text == symbol
    }

    /// True when the token is the identifier `word` (keywords are identifiers).
    pub fn is_ident(&self, word: &str) -> bool {
        self.kind == TokenKind::Ident && self.text == word
    }

    /// Short human description used in error messages.
    pub fn describe(&self) -> String {
        match self.kind {
            TokenKind::Ident | TokenKind::Number | TokenKind::Symbol => format!("'{}'", self.text),
            TokenKind::Str => format!("string {:?}", self.text),
            kind => kind.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LexError {
    #[error("unexpected character {ch:?} at {at}")]
    UnexpectedCharacter { ch: char, at: Position },
    #[error("unterminated string literal starting at {at}")]
    UnterminatedString { at: Position },
    #[error("invalid number literal '{text}' at {at}")]
    InvalidNumber { text: String, at: Position },
    #[error("unterminated comment starting at {at}")]
    UnterminatedComment { at: Position },
}

const MULTI_CHAR_SYMBOLS: [&str; 6] = ["==", "!=", "<=", ">=", "&&", "||"];
const SINGLE_CHAR_SYMBOLS: &str = "<>+-*/%!|:,.[]()=";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Text,
    /// Inside `{{ }}` or `{% %}`; carries the expected close delimiter.
    Code(TokenKind),
}

/// Cursor over the source text. Not resumable: call [`tokenize`] to lex a
/// whole template from scratch.
pub struct Tokenizer<'a> {
    input: &'a str,
    cursor: usize,
    line: usize,
    column: usize,
    mode: Mode,
    tokens: Vec<Token>,
}

impl<'a> Tokenizer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            input,
            cursor: 0,
            line: 1,
            column: 1,
            mode: Mode::Text,
            tokens: Vec::new(),
        }
    }

    fn remaining(&self) -> &'a str {
        &self.input[self.cursor..]
    }

    fn position(&self) -> Position {
        Position::new(self.line, self.column)
    }

    /// Advance by `n` bytes, keeping line/column in sync.
    fn advance(&mut self, n: usize) {
        let consumed = &self.input[self.cursor..self.cursor + n];
        for c in consumed.chars() {
            if c == '\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
        }
        self.cursor += n;
    }

    fn push(&mut self, kind: TokenKind, text: impl Into<String>, at: Position) {
        self.tokens.push(Token::new(kind, text, at));
    }

    /// Consume the whole input. The returned stream always ends with an
    /// [`TokenKind::Eof`] token.
    pub fn run(mut self) -> Result<Vec<Token>, LexError> {
        while !self.remaining().is_empty() {
            match self.mode {
                Mode::Text => self.lex_text()?,
                Mode::Code(close) => self.lex_code(close)?,
            }
        }
        let at = self.position();
        self.push(TokenKind::Eof, "", at);
        Ok(self.tokens)
    }

    fn lex_text(&mut self) -> Result<(), LexError> {
        let rest = self.remaining();
        let next_open = ["{{", "{%", "{#"]
            .iter()
            .filter_map(|open| rest.find(open))
            .min();

        match next_open {
            Some(0) => {
                let at = self.position();
                if rest.starts_with("{#") {
                    match rest[2..].find("#}") {
                        Some(end) => self.advance(end + 4),
                        None => return Err(LexError::UnterminatedComment { at }),
                    }
                } else if rest.starts_with("{{") {
                    self.advance(2);
                    self.push(TokenKind::ExprOpen, "{{", at);
                    self.mode = Mode::Code(TokenKind::ExprClose);
                } else {
                    self.advance(2);
                    self.push(TokenKind::TagOpen, "{%", at);
                    self.mode = Mode::Code(TokenKind::TagClose);
                }
            }
            Some(idx) => {
                let at = self.position();
                let text = &rest[..idx];
                self.advance(idx);
                self.push(TokenKind::Text, text, at);
            }
            None => {
                let at = self.position();
                self.advance(rest.len());
                self.push(TokenKind::Text, rest, at);
            }
        }
        Ok(())
    }

    fn lex_code(&mut self, close: TokenKind) -> Result<(), LexError> {
        let rest = self.remaining();
        let trimmed = rest.trim_start();
        self.advance(rest.len() - trimmed.len());

        let rest = self.remaining();
        if rest.is_empty() {
            // Missing close delimiter is reported by the parser.
            return Ok(());
        }

        let at = self.position();
        let close_text = if close == TokenKind::ExprClose { "}}" } else { "%}" };
        if rest.starts_with(close_text) {
            self.advance(2);
            self.push(close, close_text, at);
            self.mode = Mode::Text;
            return Ok(());
        }

        let Some(first) = rest.chars().next() else {
            return Ok(());
        };

        if first == '\'' || first == '"' {
            return self.lex_string(first, at);
        }
        if first.is_ascii_digit() {
            return self.lex_number(at);
        }
        if first.is_alphabetic() || first == '_' {
            let len: usize = rest
                .chars()
                .take_while(|c| c.is_alphanumeric() || *c == '_')
                .map(char::len_utf8)
                .sum();
            let ident = &rest[..len];
            self.advance(len);
            self.push(TokenKind::Ident, ident, at);
            return Ok(());
        }
        if let Some(symbol) = MULTI_CHAR_SYMBOLS.iter().find(|s| rest.starts_with(**s)) {
            self.advance(2);
            self.push(TokenKind::Symbol, *symbol, at);
            return Ok(());
        }
        if SINGLE_CHAR_SYMBOLS.contains(first) {
            self.advance(1);
            self.push(TokenKind::Symbol, first.to_string(), at);
            return Ok(());
        }

        Err(LexError::UnexpectedCharacter { ch: first, at })
    }

    fn lex_string(&mut self, quote: char, at: Position) -> Result<(), LexError> {
        let rest = self.remaining();
        let mut value = String::new();
        let mut chars = rest.char_indices().skip(1);

        while let Some((idx, c)) = chars.next() {
            match c {
                c if c == quote => {
                    self.advance(idx + c.len_utf8());
                    self.push(TokenKind::Str, value, at);
                    return Ok(());
                }
                '\n' => break,
                '\\' => match chars.next() {
                    Some((_, 'n')) => value.push('\n'),
                    Some((_, 't')) => value.push('\t'),
                    Some((_, 'r')) => value.push('\r'),
                    Some((_, '\n')) | None => break,
                    Some((_, esc)) => value.push(esc),
                },
                c => value.push(c),
            }
        }
        Err(LexError::UnterminatedString { at })
    }

    fn lex_number(&mut self, at: Position) -> Result<(), LexError> {
        let rest = self.remaining();
        let bytes = rest.as_bytes();
        let digits = |from: usize| bytes[from..].iter().take_while(|b| b.is_ascii_digit()).count();

        let mut len = digits(0);
        let mut is_float = false;

        // `items.0.1` is two index accesses, not `items` dot `0.1`.
        let after_dot = self.tokens.last().is_some_and(|t| t.is_symbol("."));
        if !after_dot {
            if bytes.get(len) == Some(&b'.') {
                let frac = digits(len + 1);
                if frac == 0 {
                    return Err(self.invalid_number(len + 1, at));
                }
                len += 1 + frac;
                is_float = true;
            }
            if matches!(bytes.get(len), Some(b'e' | b'E')) {
                let mut exp_start = len + 1;
                if matches!(bytes.get(exp_start), Some(b'+' | b'-')) {
                    exp_start += 1;
                }
                let exp = digits(exp_start);
                if exp == 0 {
                    return Err(self.invalid_number(exp_start, at));
                }
                len = exp_start + exp;
                is_float = true;
            }
        }

        if rest[len..]
            .chars()
            .next()
            .is_some_and(|c| c.is_alphanumeric() || c == '_')
        {
            let bad: usize = rest[len..]
                .chars()
                .take_while(|c| c.is_alphanumeric() || *c == '_')
                .map(char::len_utf8)
                .sum();
            return Err(self.invalid_number(len + bad, at));
        }

        let text = &rest[..len];
        let valid = if is_float {
            text.parse::<f64>().is_ok_and(f64::is_finite)
        } else {
            text.parse::<i64>().is_ok()
        };
        if !valid {
            return Err(self.invalid_number(len, at));
        }

        self.advance(len);
        self.push(TokenKind::Number, text, at);
        Ok(())
    }

    fn invalid_number(&self, len: usize, at: Position) -> LexError {
        let rest = self.remaining();
        let end = len.min(rest.len());
        LexError::InvalidNumber {
            text: rest[..end].to_string(),
            at,
        }
    }
}

/// Tokenize a complete template source.
pub fn tokenize(source: &str) -> Result<Vec<Token>, LexError> {
    Tokenizer::new(source).run()
}
