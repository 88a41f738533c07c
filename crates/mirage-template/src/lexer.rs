//! Tokenizer for the expression parts of a template: directive arguments,
//! method arguments, index expressions and braced references.

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// `$`, `$!`, `${` or `$!{`.
    Dollar { quiet: bool, braced: bool },
    Ident(String),
    /// Single-quoted, taken verbatim.
    Str(String),
    /// Double-quoted, interpolated at render time.
    InterpolatedStr(String),
    Int(i64),
    Float(f64),
    True,
    False,
    Null,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Dot,
    DotDot,
    Comma,
    Colon,
    Assign,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Not,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// Byte offset into the lexed text.
    pub offset: usize,
}

pub struct Lexer<'a> {
    source: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Lexer {
            source,
            bytes: source.as_bytes(),
            pos: 0,
        }
    }

    /// Tokenize the whole input. Errors carry the offending byte offset.
    pub fn tokenize(&mut self) -> Result<Vec<Token>, (usize, String)> {
        let mut tokens = Vec::new();
        loop {
            self.skip_whitespace();
            if self.pos >= self.bytes.len() {
                tokens.push(Token {
                    kind: TokenKind::Eof,
                    offset: self.pos,
                });
                return Ok(tokens);
            }
            let offset = self.pos;
            let kind = self.next_kind()?;
            tokens.push(Token { kind, offset });
        }
    }

    fn skip_whitespace(&mut self) {
        while self.pos < self.bytes.len() && self.bytes[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }

    fn peek_at(&self, ahead: usize) -> Option<u8> {
        self.bytes.get(self.pos + ahead).copied()
    }

    fn next_kind(&mut self) -> Result<TokenKind, (usize, String)> {
        let start = self.pos;
        let ch = self.bytes[self.pos];
        let two = |lexer: &mut Self, kind: TokenKind| {
            lexer.pos += 2;
            Ok(kind)
        };
        let one = |lexer: &mut Self, kind: TokenKind| {
            lexer.pos += 1;
            Ok(kind)
        };

        match ch {
            b'$' => {
                self.pos += 1;
                let quiet = self.peek_at(0) == Some(b'!');
                if quiet {
                    self.pos += 1;
                }
                let braced = self.peek_at(0) == Some(b'{');
                if braced {
                    self.pos += 1;
                }
                Ok(TokenKind::Dollar { quiet, braced })
            }
            b'(' => one(self, TokenKind::LParen),
            b')' => one(self, TokenKind::RParen),
            b'[' => one(self, TokenKind::LBracket),
            b']' => one(self, TokenKind::RBracket),
            b'{' => one(self, TokenKind::LBrace),
            b'}' => one(self, TokenKind::RBrace),
            b',' => one(self, TokenKind::Comma),
            b':' => one(self, TokenKind::Colon),
            b'+' => one(self, TokenKind::Plus),
            b'-' => one(self, TokenKind::Minus),
            b'*' => one(self, TokenKind::Star),
            b'/' => one(self, TokenKind::Slash),
            b'%' => one(self, TokenKind::Percent),
            b'.' if self.peek_at(1) == Some(b'.') => two(self, TokenKind::DotDot),
            b'.' => one(self, TokenKind::Dot),
            b'=' if self.peek_at(1) == Some(b'=') => two(self, TokenKind::Eq),
            b'=' => one(self, TokenKind::Assign),
            b'!' if self.peek_at(1) == Some(b'=') => two(self, TokenKind::Ne),
            b'!' => one(self, TokenKind::Not),
            b'<' if self.peek_at(1) == Some(b'=') => two(self, TokenKind::Le),
            b'<' => one(self, TokenKind::Lt),
            b'>' if self.peek_at(1) == Some(b'=') => two(self, TokenKind::Ge),
            b'>' => one(self, TokenKind::Gt),
            b'&' if self.peek_at(1) == Some(b'&') => two(self, TokenKind::And),
            b'|' if self.peek_at(1) == Some(b'|') => two(self, TokenKind::Or),
            b'\'' | b'"' => self.lex_string(ch),
            b'0'..=b'9' => self.lex_number(),
            c if c.is_ascii_alphabetic() || c == b'_' => Ok(self.lex_word()),
            _ => {
                let found = self.source[start..].chars().next().unwrap_or('?');
                Err((start, format!("unexpected character '{}'", found)))
            }
        }
    }

    fn lex_string(&mut self, quote: u8) -> Result<TokenKind, (usize, String)> {
        let start = self.pos;
        self.pos += 1;
        let mut text = String::new();
        let mut segment = self.pos;
        while self.pos < self.bytes.len() {
            let ch = self.bytes[self.pos];
            if ch == b'\\' && self.peek_at(1) == Some(quote) {
                text.push_str(&self.source[segment..self.pos]);
                text.push(quote as char);
                self.pos += 2;
                segment = self.pos;
            } else if ch == quote {
                text.push_str(&self.source[segment..self.pos]);
                self.pos += 1;
                return Ok(if quote == b'"' {
                    TokenKind::InterpolatedStr(text)
                } else {
                    TokenKind::Str(text)
                });
            } else {
                self.pos += 1;
            }
        }
        Err((start, "unterminated string literal".into()))
    }

    fn lex_number(&mut self) -> Result<TokenKind, (usize, String)> {
        let start = self.pos;
        while self.peek_at(0).is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
        }
        // `1..3` is a range, not a float
        let fractional = self.peek_at(0) == Some(b'.')
            && self.peek_at(1).is_some_and(|c| c.is_ascii_digit());
        if fractional {
            self.pos += 1;
            while self.peek_at(0).is_some_and(|c| c.is_ascii_digit()) {
                self.pos += 1;
            }
            let text = &self.source[start..self.pos];
            return text
                .parse()
                .map(TokenKind::Float)
                .map_err(|_| (start, format!("invalid number '{}'", text)));
        }
        let text = &self.source[start..self.pos];
        text.parse()
            .map(TokenKind::Int)
            .map_err(|_| (start, format!("integer '{}' out of range", text)))
    }

    fn lex_word(&mut self) -> TokenKind {
        let start = self.pos;
        while self
            .peek_at(0)
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == b'_' || c == b'-')
        {
            self.pos += 1;
        }
        match &self.source[start..self.pos] {
            "true" => TokenKind::True,
            "false" => TokenKind::False,
            "null" => TokenKind::Null,
            "and" => TokenKind::And,
            "or" => TokenKind::Or,
            "not" => TokenKind::Not,
            "eq" => TokenKind::Eq,
            "ne" => TokenKind::Ne,
            "lt" => TokenKind::Lt,
            "le" => TokenKind::Le,
            "gt" => TokenKind::Gt,
            "ge" => TokenKind::Ge,
            word => TokenKind::Ident(word.to_string()),
        }
    }
}

/// Identifier characters accepted after `$` and `.` in template text.
pub(crate) fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

pub(crate) fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}
