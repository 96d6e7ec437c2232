//! Tokenizer for generated capability source
//!
//! Produces a flat token stream with line numbers. Comments and line
//! continuations are dropped, string literals are decoded (escapes and
//! `r`/`b`/`f` prefixes), and the expressions inside f-string replacement fields are
//! tokenized in place so that they are analyzed like any other code.
//! Newlines inside brackets do not end a logical line.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    /// Identifier or keyword
    Name(String),
    /// Decoded string or bytes literal
    Str(String),
    Number(String),
    /// Operator or delimiter
    Op(&'static str),
    /// End of a logical line
    Newline,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
}

impl Token {
    pub fn name(&self) -> Option<&str> {
        match &self.kind {
            TokenKind::Name(n) => Some(n),
            _ => None,
        }
    }

    pub fn is_op(&self, op: &str) -> bool {
        matches!(self.kind, TokenKind::Op(o) if o == op)
    }

    pub fn is_name(&self, name: &str) -> bool {
        self.name() == Some(name)
    }
}

/// Source that cannot be tokenized
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexError {
    pub line: usize,
    pub message: String,
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

// Longest first so `**=` wins over `**` and `*`
const OPERATORS: &[&str] = &[
    "**=", "//=", ">>=", "<<=", "...", "->", ":=", "==", "!=", "<=", ">=", "**", "//", "<<", ">>",
    "+=", "-=", "*=", "/=", "%=", "&=", "|=", "^=", "@=", "+", "-", "*", "/", "%", "@", "&", "|",
    "^", "~", "<", ">", "(", ")", "[", "]", "{", "}", ",", ":", ";", ".", "=", "!",
];

const STRING_PREFIXES: &[&str] = &["r", "b", "u", "f", "rb", "br", "fr", "rf"];

pub fn tokenize(source: &str) -> Result<Vec<Token>, LexError> {
    let mut lexer = Lexer::new(source, 1);
    lexer.run()?;
    if let Some((open, line)) = lexer.brackets.last() {
        return Err(LexError {
            line: *line,
            message: format!("unclosed '{}'", open),
        });
    }
    Ok(lexer.tokens)
}

struct Lexer {
    chars: Vec<char>,
    index: usize,
    line: usize,
    tokens: Vec<Token>,
    brackets: Vec<(char, usize)>,
}

impl Lexer {
    fn new(source: &str, first_line: usize) -> Self {
        Self {
            chars: source.chars().collect(),
            index: 0,
            line: first_line,
            tokens: Vec::new(),
            brackets: Vec::new(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.index).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.index + offset).copied()
    }

    fn error(&self, message: impl Into<String>) -> LexError {
        LexError {
            line: self.line,
            message: message.into(),
        }
    }

    fn push(&mut self, kind: TokenKind, line: usize) {
        self.tokens.push(Token { kind, line });
    }

    fn run(&mut self) -> Result<(), LexError> {
        while let Some(ch) = self.peek() {
            match ch {
                '\n' => {
                    self.index += 1;
                    if self.brackets.is_empty()
                        && !matches!(
                            self.tokens.last().map(|t| &t.kind),
                            None | Some(TokenKind::Newline)
                        )
                    {
                        self.push(TokenKind::Newline, self.line);
                    }
                    self.line += 1;
                }
                c if c.is_whitespace() => self.index += 1,
                '#' => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.index += 1;
                    }
                }
                '\\' => {
                    // Explicit line continuation
                    match self.peek_at(1) {
                        Some('\n') => {
                            self.index += 2;
                            self.line += 1;
                        }
                        Some('\r') if self.peek_at(2) == Some('\n') => {
                            self.index += 3;
                            self.line += 1;
                        }
                        _ => return Err(self.error("stray '\\' outside a string")),
                    }
                }
                '"' | '\'' => self.read_string(String::new())?,
                c if c.is_ascii_digit() => self.read_number(),
                '.' if self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) => self.read_number(),
                c if c.is_ascii_alphabetic() || c == '_' => self.read_name()?,
                c if !c.is_ascii() => {
                    return Err(self.error(format!("non-ASCII character '{}' in code", c)))
                }
                _ => self.read_operator()?,
            }
        }

        if !matches!(
            self.tokens.last().map(|t| &t.kind),
            None | Some(TokenKind::Newline)
        ) {
            self.push(TokenKind::Newline, self.line);
        }
        Ok(())
    }

    fn read_name(&mut self) -> Result<(), LexError> {
        let start = self.index;
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                self.index += 1;
            } else if !c.is_ascii() && !c.is_whitespace() {
                // Identifiers are NFKC-normalized by the interpreter; refuse
                // anything that could normalize onto a forbidden name
                return Err(self.error("non-ASCII identifier"));
            } else {
                break;
            }
        }
        let word: String = self.chars[start..self.index].iter().collect();

        if matches!(self.peek(), Some('"') | Some('\''))
            && STRING_PREFIXES.contains(&word.to_ascii_lowercase().as_str())
        {
            return self.read_string(word.to_ascii_lowercase());
        }

        let line = self.line;
        self.push(TokenKind::Name(word), line);
        Ok(())
    }

    fn read_number(&mut self) {
        let start = self.index;
        let line = self.line;
        while let Some(c) = self.peek() {
            // `_` is only a digit separator between two alphanumerics, so
            // `1 .__class__` and `1.__class__` both leave the dunder visible
            let separator = c == '_'
                && self.index > start
                && self.chars[self.index - 1].is_ascii_alphanumeric()
                && self.peek_at(1).is_some_and(|n| n.is_ascii_alphanumeric());
            if c.is_ascii_alphanumeric() || c == '.' || separator {
                self.index += 1;
                if (c == 'e' || c == 'E') && matches!(self.peek(), Some('+') | Some('-')) {
                    self.index += 1;
                }
            } else {
                break;
            }
        }
        let text: String = self.chars[start..self.index].iter().collect();
        self.push(TokenKind::Number(text), line);
    }

    fn read_operator(&mut self) -> Result<(), LexError> {
        let line = self.line;
        for op in OPERATORS {
            let len = op.len();
            let matches = op
                .chars()
                .enumerate()
                .all(|(i, c)| self.peek_at(i) == Some(c));
            if !matches {
                continue;
            }
            self.index += len;

            match *op {
                "(" | "[" | "{" => {
                    let open = op.chars().next().unwrap_or('(');
                    self.brackets.push((open, line));
                }
                ")" | "]" | "}" => {
                    let expected = match *op {
                        ")" => '(',
                        "]" => '[',
                        _ => '{',
                    };
                    match self.brackets.pop() {
                        Some((open, _)) if open == expected => {}
                        Some((open, _)) => {
                            return Err(self.error(format!("'{}' closes '{}'", op, open)))
                        }
                        None => return Err(self.error(format!("unmatched '{}'", op))),
                    }
                }
                _ => {}
            }

            self.push(TokenKind::Op(op), line);
            return Ok(());
        }

        Err(self.error(format!(
            "unexpected character '{}'",
            self.peek().unwrap_or(' ')
        )))
    }

    fn read_string(&mut self, prefix: String) -> Result<(), LexError> {
        let start_line = self.line;
        let quote = self.peek().unwrap_or('"');
        let triple = self.peek_at(1) == Some(quote) && self.peek_at(2) == Some(quote);
        self.index += if triple { 3 } else { 1 };

        let raw = prefix.contains('r');
        let formatted = prefix.contains('f');
        let mut body = String::new();

        loop {
            let Some(c) = self.peek() else {
                return Err(LexError {
                    line: start_line,
                    message: "unterminated string literal".to_string(),
                });
            };

            if c == quote {
                if !triple {
                    self.index += 1;
                    break;
                }
                if self.peek_at(1) == Some(quote) && self.peek_at(2) == Some(quote) {
                    self.index += 3;
                    break;
                }
            }

            if c == '\n' {
                if !triple {
                    return Err(LexError {
                        line: start_line,
                        message: "unterminated string literal".to_string(),
                    });
                }
                self.line += 1;
            }

            if c == '\\' {
                if let Some(next) = self.peek_at(1) {
                    // Keep escapes verbatim here; they are decoded below
                    body.push(c);
                    body.push(next);
                    if next == '\n' {
                        self.line += 1;
                    }
                    self.index += 2;
                    continue;
                }
            }

            body.push(c);
            self.index += 1;
        }

        if formatted {
            self.lex_replacement_fields(&body, start_line)?;
        }

        let value = if raw {
            body
        } else {
            decode_escapes(&body).map_err(|message| LexError {
                line: start_line,
                message,
            })?
        };
        self.push(TokenKind::Str(value), start_line);
        Ok(())
    }

    /// Tokenize the `{expr}` fields of an f-string body in place
    fn lex_replacement_fields(&mut self, body: &str, line: usize) -> Result<(), LexError> {
        let chars: Vec<char> = body.chars().collect();
        let mut i = 0;
        while i < chars.len() {
            match chars[i] {
                '{' if chars.get(i + 1) == Some(&'{') => i += 2,
                '{' => {
                    let mut depth = 1;
                    let mut j = i + 1;
                    while j < chars.len() && depth > 0 {
                        match chars[j] {
                            '{' => depth += 1,
                            '}' => depth -= 1,
                            _ => {}
                        }
                        j += 1;
                    }
                    if depth != 0 {
                        return Err(LexError {
                            line,
                            message: "unclosed '{' in f-string".to_string(),
                        });
                    }
                    let expr: String = chars[i + 1..j - 1].iter().collect();
                    let mut inner = Lexer::new(&expr, line);
                    inner.run()?;
                    if !inner.brackets.is_empty() {
                        return Err(LexError {
                            line,
                            message: "unbalanced brackets in f-string".to_string(),
                        });
                    }
                    self.tokens.push(Token {
                        kind: TokenKind::Op("("),
                        line,
                    });
                    self.tokens.extend(
                        inner
                            .tokens
                            .into_iter()
                            .filter(|t| t.kind != TokenKind::Newline),
                    );
                    self.tokens.push(Token {
                        kind: TokenKind::Op(")"),
                        line,
                    });
                    i = j;
                }
                _ => i += 1,
            }
        }
        Ok(())
    }
}

/// Decode backslash escapes of a non-raw literal.
///
/// Named escapes (`\N{...}`) are refused since they cannot be resolved
/// without the Unicode name table.
fn decode_escapes(body: &str) -> Result<String, String> {
    let chars: Vec<char> = body.chars().collect();
    let mut out = String::with_capacity(body.len());
    let mut i = 0;

    let hex_at = |start: usize, len: usize| -> Option<char> {
        if start + len > chars.len() {
            return None;
        }
        let digits: String = chars[start..start + len].iter().collect();
        u32::from_str_radix(&digits, 16).ok().and_then(char::from_u32)
    };

    while i < chars.len() {
        let c = chars[i];
        if c != '\\' || i + 1 >= chars.len() {
            out.push(c);
            i += 1;
            continue;
        }

        let next = chars[i + 1];
        match next {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            '0'..='7' => {
                let mut j = i + 1;
                let mut value = 0u32;
                while j < chars.len() && j < i + 4 && ('0'..='7').contains(&chars[j]) {
                    value = value * 8 + chars[j].to_digit(8).unwrap_or(0);
                    j += 1;
                }
                if let Some(ch) = char::from_u32(value) {
                    out.push(ch);
                }
                i = j;
                continue;
            }
            'x' | 'u' | 'U' => {
                let len = match next {
                    'x' => 2,
                    'u' => 4,
                    _ => 8,
                };
                if let Some(ch) = hex_at(i + 2, len) {
                    out.push(ch);
                    i += 2 + len;
                    continue;
                }
                out.push('\\');
                out.push(next);
            }
            'N' if chars.get(i + 2) == Some(&'{') => {
                return Err("named unicode escape in string literal".to_string());
            }
            '\n' => {}
            '\\' | '\'' | '"' => out.push(next),
            other => {
                out.push('\\');
                out.push(other);
            }
        }
        i += 2;
    }
    Ok(out)
}
