//! Hand-written lexer for script source.
//!
//! Statements are newline-terminated. Newlines inside parentheses and
//! brackets are swallowed so call argument lists and list literals can span
//! lines; consecutive blank lines collapse to a single `Newline` token.

use crate::script::CompileError;

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Int(i64),
    Float(f64),
    Str(String),
    Ident(String),

    Fn,
    Class,
    Import,
    From,
    Return,
    If,
    Else,
    While,
    True,
    False,
    Nil,

    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Dot,
    Assign,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    AndAnd,
    OrOr,
    Bang,

    Newline,
    Eof,
}

impl TokenKind {
    /// Short description used in parse error messages.
    pub fn describe(&self) -> String {
        match self {
            TokenKind::Int(n) => format!("integer '{}'", n),
            TokenKind::Float(n) => format!("number '{}'", n),
            TokenKind::Str(_) => "string literal".to_string(),
            TokenKind::Ident(name) => format!("'{}'", name),
            TokenKind::Newline => "end of line".to_string(),
            TokenKind::Eof => "end of file".to_string(),
            other => format!("'{}'", other.lexeme()),
        }
    }

    fn lexeme(&self) -> &'static str {
        match self {
            TokenKind::Fn => "fn",
            TokenKind::Class => "class",
            TokenKind::Import => "import",
            TokenKind::From => "from",
            TokenKind::Return => "return",
            TokenKind::If => "if",
            TokenKind::Else => "else",
            TokenKind::While => "while",
            TokenKind::True => "true",
            TokenKind::False => "false",
            TokenKind::Nil => "nil",
            TokenKind::LParen => "(",
            TokenKind::RParen => ")",
            TokenKind::LBrace => "{",
            TokenKind::RBrace => "}",
            TokenKind::LBracket => "[",
            TokenKind::RBracket => "]",
            TokenKind::Comma => ",",
            TokenKind::Dot => ".",
            TokenKind::Assign => "=",
            TokenKind::Plus => "+",
            TokenKind::Minus => "-",
            TokenKind::Star => "*",
            TokenKind::Slash => "/",
            TokenKind::Percent => "%",
            TokenKind::Eq => "==",
            TokenKind::Ne => "!=",
            TokenKind::Lt => "<",
            TokenKind::Le => "<=",
            TokenKind::Gt => ">",
            TokenKind::Ge => ">=",
            TokenKind::AndAnd => "&&",
            TokenKind::OrOr => "||",
            TokenKind::Bang => "!",
            _ => "",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: u32,
    pub column: u32,
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: u32,
    column: u32,
    /// Depth of open `(` and `[` pairs; newlines are not significant inside.
    bracket_depth: u32,
    tokens: Vec<Token>,
}

/// Tokenize a full source text.
pub fn tokenize(source: &str) -> Result<Vec<Token>, CompileError> {
    let mut lexer = Lexer {
        chars: source.chars().collect(),
        pos: 0,
        line: 1,
        column: 1,
        bracket_depth: 0,
        tokens: Vec::new(),
    };
    lexer.run()?;
    Ok(lexer.tokens)
}

impl Lexer {
    fn run(&mut self) -> Result<(), CompileError> {
        while let Some(c) = self.peek() {
            let (line, column) = (self.line, self.column);
            match c {
                ' ' | '\t' | '\r' => {
                    self.advance();
                }
                '#' => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                '\n' => {
                    self.advance();
                    self.line += 1;
                    self.column = 1;
                    if self.bracket_depth == 0 {
                        self.push_newline(line, column);
                    }
                }
                '"' => self.string(line, column)?,
                c if c.is_ascii_digit() => self.number(line, column)?,
                c if c.is_ascii_alphabetic() || c == '_' => self.identifier(line, column),
                _ => self.punctuation(line, column)?,
            }
        }

        // Guarantee the final statement is terminated even when the source
        // text lacks a trailing newline.
        if !matches!(
            self.tokens.last().map(|t| &t.kind),
            None | Some(TokenKind::Newline)
        ) {
            self.push(TokenKind::Newline, self.line, self.column);
        }
        self.push(TokenKind::Eof, self.line, self.column);
        Ok(())
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_next(&self) -> Option<char> {
        self.chars.get(self.pos + 1).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
            self.column += 1;
        }
        c
    }

    /// Consume the next character when it matches.
    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn push(&mut self, kind: TokenKind, line: u32, column: u32) {
        self.tokens.push(Token { kind, line, column });
    }

    fn push_newline(&mut self, line: u32, column: u32) {
        // A newline at the start of the file or after another newline
        // carries no information.
        match self.tokens.last().map(|t| &t.kind) {
            None | Some(TokenKind::Newline) => {}
            _ => self.push(TokenKind::Newline, line, column),
        }
    }

    fn string(&mut self, line: u32, column: u32) -> Result<(), CompileError> {
        self.advance();
        let mut text = String::new();
        loop {
            match self.peek() {
                None | Some('\n') => {
                    return Err(CompileError::new("unterminated string literal", line, column));
                }
                Some('"') => {
                    self.advance();
                    break;
                }
                Some('\\') => {
                    self.advance();
                    let escaped = match self.advance() {
                        Some('n') => '\n',
                        Some('t') => '\t',
                        Some('r') => '\r',
                        Some('\\') => '\\',
                        Some('"') => '"',
                        Some(other) => {
                            return Err(CompileError::new(
                                format!("unknown escape sequence '\\{}'", other),
                                self.line,
                                self.column.saturating_sub(2),
                            ));
                        }
                        None => {
                            return Err(CompileError::new(
                                "unterminated string literal",
                                line,
                                column,
                            ));
                        }
                    };
                    text.push(escaped);
                }
                Some(c) => {
                    self.advance();
                    text.push(c);
                }
            }
        }
        self.push(TokenKind::Str(text), line, column);
        Ok(())
    }

    fn number(&mut self, line: u32, column: u32) -> Result<(), CompileError> {
        let mut text = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                text.push(c);
                self.advance();
            } else {
                break;
            }
        }

        let is_float = self.peek() == Some('.')
            && self.peek_next().map(|c| c.is_ascii_digit()).unwrap_or(false);
        if is_float {
            text.push('.');
            self.advance();
            while let Some(c) = self.peek() {
                if c.is_ascii_digit() {
                    text.push(c);
                    self.advance();
                } else {
                    break;
                }
            }
            let value = text.parse::<f64>().map_err(|_| {
                CompileError::new(format!("invalid number literal '{}'", text), line, column)
            })?;
            self.push(TokenKind::Float(value), line, column);
        } else {
            let value = text.parse::<i64>().map_err(|_| {
                CompileError::new(
                    format!("integer literal '{}' out of range", text),
                    line,
                    column,
                )
            })?;
            self.push(TokenKind::Int(value), line, column);
        }
        Ok(())
    }

    fn identifier(&mut self, line: u32, column: u32) {
        let mut text = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                text.push(c);
                self.advance();
            } else {
                break;
            }
        }
        let kind = match text.as_str() {
            "fn" => TokenKind::Fn,
            "class" => TokenKind::Class,
            "import" => TokenKind::Import,
            "from" => TokenKind::From,
            "return" => TokenKind::Return,
            "if" => TokenKind::If,
            "else" => TokenKind::Else,
            "while" => TokenKind::While,
            "true" => TokenKind::True,
            "false" => TokenKind::False,
            "nil" => TokenKind::Nil,
            _ => TokenKind::Ident(text),
        };
        self.push(kind, line, column);
    }

    fn punctuation(&mut self, line: u32, column: u32) -> Result<(), CompileError> {
        let c = match self.advance() {
            Some(c) => c,
            None => return Ok(()),
        };
        let kind = match c {
            '(' => {
                self.bracket_depth += 1;
                TokenKind::LParen
            }
            ')' => {
                self.bracket_depth = self.bracket_depth.saturating_sub(1);
                TokenKind::RParen
            }
            '[' => {
                self.bracket_depth += 1;
                TokenKind::LBracket
            }
            ']' => {
                self.bracket_depth = self.bracket_depth.saturating_sub(1);
                TokenKind::RBracket
            }
            '{' => TokenKind::LBrace,
            '}' => TokenKind::RBrace,
            ',' => TokenKind::Comma,
            '.' => TokenKind::Dot,
            '+' => TokenKind::Plus,
            '-' => TokenKind::Minus,
            '*' => TokenKind::Star,
            '/' => TokenKind::Slash,
            '%' => TokenKind::Percent,
            '=' => {
                if self.eat('=') {
                    TokenKind::Eq
                } else {
                    TokenKind::Assign
                }
            }
            '!' => {
                if self.eat('=') {
                    TokenKind::Ne
                } else {
                    TokenKind::Bang
                }
            }
            '<' => {
                if self.eat('=') {
                    TokenKind::Le
                } else {
                    TokenKind::Lt
                }
            }
            '>' => {
                if self.eat('=') {
                    TokenKind::Ge
                } else {
                    TokenKind::Gt
                }
            }
            '&' => {
                if self.eat('&') {
                    TokenKind::AndAnd
                } else {
                    return Err(CompileError::new("unexpected character '&'", line, column));
                }
            }
            '|' => {
                if self.eat('|') {
                    TokenKind::OrOr
                } else {
                    return Err(CompileError::new("unexpected character '|'", line, column));
                }
            }
            _ => {
                return Err(CompileError::new(
                    format!("unexpected character '{}'", c),
                    line,
                    column,
                ));
            }
        };
        self.push(kind, line, column);
        Ok(())
    }
}
