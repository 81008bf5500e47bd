use crate::error::Span;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TokenKind {
    Keyword,
    Identifier,
    IntLiteral,
    RealLiteral,
    StringLiteral,
    Operator,
    Punctuation,
    Eof,
    Error,
}

/// One classified lexeme, as exchanged between the scan and parse stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub kind: TokenKind,
    pub lexeme: String,
    pub line: usize,
    pub column: usize,
}

impl Token {
    pub fn new(kind: TokenKind, lexeme: impl Into<String>, line: usize, column: usize) -> Self {
        Self {
            kind,
            lexeme: lexeme.into(),
            line,
            column,
        }
    }

    pub fn eof(line: usize, column: usize) -> Self {
        Self::new(TokenKind::Eof, "", line, column)
    }

    pub fn span(&self) -> Span {
        Span::new(self.line, self.column)
    }

    /// Keyword test, case-insensitive so hand-written token files still parse.
    pub fn is_keyword(&self, word: &str) -> bool {
        self.kind == TokenKind::Keyword && self.lexeme.eq_ignore_ascii_case(word)
    }

    pub fn is_symbol(&self, symbol: &str) -> bool {
        matches!(self.kind, TokenKind::Operator | TokenKind::Punctuation) && self.lexeme == symbol
    }

    /// Human readable description used in diagnostics.
    pub fn describe(&self) -> String {
        match self.kind {
            TokenKind::Eof => "end of input".to_string(),
            TokenKind::StringLiteral => format!("string \"{}\"", self.lexeme),
            TokenKind::Error => format!("unrecognized input '{}'", self.lexeme),
            _ => format!("'{}'", self.lexeme),
        }
    }
}

pub const KEYWORDS: &[&str] = &[
    "and", "array", "begin", "boolean", "byte", "call", "char", "constants", "create",
    "declarations", "decrement", "define", "destroy", "display", "do", "double",
    "else", "endfor", "endfun", "endif", "endstruct", "endwhile", "exit", "false", "float", "for",
    "forward", "function", "global", "if", "implementations", "import", "increment", "integer",
    "is", "not", "null", "of", "or", "parameters", "pointer", "return", "set", "specifications",
    "step", "string", "struct", "symbol", "then", "to", "true", "type", "using", "variables",
    "void", "while",
];

/// Turns SCL source text into tokens. Scanning never fails: malformed input
/// becomes `ERROR` tokens which the parser reports with the rest.
pub struct Lexer {
    chars: Vec<char>,
    tokens: Vec<Token>,
    start: usize,
    current: usize,
    line: usize,
    column: usize,
    start_line: usize,
    start_column: usize,
    keywords: HashSet<&'static str>,
}

impl Lexer {
    pub fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            tokens: Vec::new(),
            start: 0,
            current: 0,
            line: 1,
            column: 1,
            start_line: 1,
            start_column: 1,
            keywords: KEYWORDS.iter().copied().collect(),
        }
    }

    pub fn scan_tokens(mut self) -> Vec<Token> {
        while !self.is_at_end() {
            self.start = self.current;
            self.start_line = self.line;
            self.start_column = self.column;
            self.scan_token();
        }

        self.tokens.push(Token::eof(self.line, self.column));
        tracing::debug!(count = self.tokens.len(), "scanned tokens");
        self.tokens
    }

    fn is_at_end(&self) -> bool {
        self.current >= self.chars.len()
    }

    fn scan_token(&mut self) {
        let c = self.advance();

        match c {
            '(' | ')' | '[' | ']' | '{' | '}' | ',' | ';' | ':' | '.' => {
                self.add_token(TokenKind::Punctuation)
            }
            '+' | '*' | '^' => self.add_token(TokenKind::Operator),
            '-' => {
                self.match_char('>');
                self.add_token(TokenKind::Operator);
            }
            '=' | '!' | '<' | '>' => {
                self.match_char('=');
                self.add_token(TokenKind::Operator);
            }
            '&' => {
                self.match_char('&');
                self.add_token(TokenKind::Operator);
            }
            '|' => {
                if self.match_char('|') {
                    self.add_token(TokenKind::Operator);
                } else {
                    self.add_token(TokenKind::Error);
                }
            }
            '/' => {
                if self.match_char('/') {
                    // Comment goes until end of line
                    while self.peek() != '\n' && !self.is_at_end() {
                        self.advance();
                    }
                } else if self.match_char('*') {
                    self.block_comment();
                } else {
                    self.add_token(TokenKind::Operator);
                }
            }
            ' ' | '\r' | '\t' | '\n' => {}
            '"' => self.string(),
            c if c.is_ascii_digit() => self.number(),
            c if c.is_alphabetic() || c == '_' => self.identifier(),
            _ => self.add_token(TokenKind::Error),
        }
    }

    fn advance(&mut self) -> char {
        let c = self.chars.get(self.current).copied().unwrap_or('\0');
        self.current += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        c
    }

    fn match_char(&mut self, expected: char) -> bool {
        if self.is_at_end() || self.peek() != expected {
            false
        } else {
            self.advance();
            true
        }
    }

    fn peek(&self) -> char {
        self.chars.get(self.current).copied().unwrap_or('\0')
    }

    fn peek_next(&self) -> char {
        self.chars.get(self.current + 1).copied().unwrap_or('\0')
    }

    fn block_comment(&mut self) {
        while !self.is_at_end() {
            if self.peek() == '*' && self.peek_next() == '/' {
                self.advance();
                self.advance();
                return;
            }
            self.advance();
        }
    }

    fn string(&mut self) {
        while self.peek() != '"' && self.peek() != '\n' && !self.is_at_end() {
            self.advance();
        }

        if self.peek() != '"' {
            let text: String = self.chars[self.start..self.current].iter().collect();
            self.add_token_with_content(TokenKind::Error, text);
            return;
        }

        // Consume the closing "
        self.advance();

        let content: String = self.chars[self.start + 1..self.current - 1].iter().collect();
        self.add_token_with_content(TokenKind::StringLiteral, content);
    }

    fn number(&mut self) {
        while self.peek().is_ascii_digit() {
            self.advance();
        }

        let mut kind = TokenKind::IntLiteral;

        // Look for fractional part
        if self.peek() == '.' && self.peek_next().is_ascii_digit() {
            kind = TokenKind::RealLiteral;
            self.advance();

            while self.peek().is_ascii_digit() {
                self.advance();
            }
        }

        // A number running straight into letters is malformed, e.g. `12ab`
        if self.peek().is_alphabetic() || self.peek() == '_' {
            while self.peek().is_alphanumeric() || self.peek() == '_' {
                self.advance();
            }
            kind = TokenKind::Error;
        }

        self.add_token(kind);
    }

    fn identifier(&mut self) {
        while self.peek().is_alphanumeric() || self.peek() == '_' {
            self.advance();
        }

        let text: String = self.chars[self.start..self.current].iter().collect();
        let lowered = text.to_ascii_lowercase();

        if self.keywords.contains(lowered.as_str()) {
            self.add_token_with_content(TokenKind::Keyword, lowered);
        } else {
            self.add_token_with_content(TokenKind::Identifier, text);
        }
    }

    fn add_token(&mut self, kind: TokenKind) {
        let text: String = self.chars[self.start..self.current].iter().collect();
        self.add_token_with_content(kind, text);
    }

    fn add_token_with_content(&mut self, kind: TokenKind, lexeme: String) {
        self.tokens
            .push(Token::new(kind, lexeme, self.start_line, self.start_column));
    }
}

/// Convenience wrapper for the scan stage.
pub fn scan(source: &str) -> Vec<Token> {
    Lexer::new(source).scan_tokens()
}
