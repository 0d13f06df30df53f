//! Tokenizer for task scripts.

use std::fmt;

use crate::ports::script_parser::ParseError;
use crate::script::ast::{DurationSegment, DurationUnit};

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Ident(String),
    Int(i64),
    Float(f64),
    Str(String),
    Duration(Vec<DurationSegment>),
    DateTime(String),
    Regex(String),

    Option,
    Import,
    Package,
    Return,
    And,
    Or,
    Not,
    Exists,
    If,
    Then,
    Else,
    With,

    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Colon,
    Dot,
    Question,
    Assign,
    Arrow,
    PipeForward,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Caret,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    RegexEq,
    RegexNotEq,

    Eof,
}

impl TokenKind {
    /// Tokens after which a `/` means division rather than a regex.
    fn ends_operand(&self) -> bool {
        matches!(
            self,
            TokenKind::Ident(_)
                | TokenKind::Int(_)
                | TokenKind::Float(_)
                | TokenKind::Str(_)
                | TokenKind::Duration(_)
                | TokenKind::DateTime(_)
                | TokenKind::Regex(_)
                | TokenKind::RParen
                | TokenKind::RBracket
                | TokenKind::RBrace
        )
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            TokenKind::Ident(name) => return write!(f, "identifier {name}"),
            TokenKind::Int(v) => return write!(f, "integer {v}"),
            TokenKind::Float(v) => return write!(f, "float {v}"),
            TokenKind::Str(s) => return write!(f, "string {s:?}"),
            TokenKind::Duration(_) => "duration",
            TokenKind::DateTime(s) => return write!(f, "time {s}"),
            TokenKind::Regex(_) => "regex",
            TokenKind::Option => "option",
            TokenKind::Import => "import",
            TokenKind::Package => "package",
            TokenKind::Return => "return",
            TokenKind::And => "and",
            TokenKind::Or => "or",
            TokenKind::Not => "not",
            TokenKind::Exists => "exists",
            TokenKind::If => "if",
            TokenKind::Then => "then",
            TokenKind::Else => "else",
            TokenKind::With => "with",
            TokenKind::LParen => "(",
            TokenKind::RParen => ")",
            TokenKind::LBrace => "{",
            TokenKind::RBrace => "}",
            TokenKind::LBracket => "[",
            TokenKind::RBracket => "]",
            TokenKind::Comma => ",",
            TokenKind::Colon => ":",
            TokenKind::Dot => ".",
            TokenKind::Question => "?",
            TokenKind::Assign => "=",
            TokenKind::Arrow => "=>",
            TokenKind::PipeForward => "|>",
            TokenKind::Plus => "+",
            TokenKind::Minus => "-",
            TokenKind::Star => "*",
            TokenKind::Slash => "/",
            TokenKind::Percent => "%",
            TokenKind::Caret => "^",
            TokenKind::Eq => "==",
            TokenKind::NotEq => "!=",
            TokenKind::Lt => "<",
            TokenKind::LtEq => "<=",
            TokenKind::Gt => ">",
            TokenKind::GtEq => ">=",
            TokenKind::RegexEq => "=~",
            TokenKind::RegexNotEq => "!~",
            TokenKind::Eof => "end of input",
        };
        f.write_str(symbol)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
    pub column: usize,
}

/// Split `source` into tokens. The result always ends with `Eof`.
pub fn tokenize(source: &str) -> Result<Vec<Token>, ParseError> {
    Lexer {
        chars: source.chars().collect(),
        pos: 0,
        line: 1,
        column: 1,
        tokens: Vec::new(),
    }
    .run()
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    column: usize,
    tokens: Vec<Token>,
}

impl Lexer {
    fn run(mut self) -> Result<Vec<Token>, ParseError> {
        loop {
            self.skip_trivia();
            let (line, column) = (self.line, self.column);
            let Some(c) = self.peek() else {
                self.tokens.push(Token {
                    kind: TokenKind::Eof,
                    line,
                    column,
                });
                return Ok(self.tokens);
            };

            let kind = match c {
                '"' => self.string()?,
                c if c.is_ascii_digit() => self.number()?,
                c if c.is_alphabetic() || c == '_' => self.word(),
                '/' if self.regex_allowed() => self.regex()?,
                _ => self.punct()?,
            };
            self.tokens.push(Token { kind, line, column });
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, n: usize) -> Option<char> {
        self.chars.get(self.pos + n).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError::new(message, self.line, self.column)
    }

    fn skip_trivia(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.bump();
            } else if c == '/' && self.peek_at(1) == Some('/') {
                while self.peek().is_some_and(|c| c != '\n') {
                    self.bump();
                }
            } else {
                break;
            }
        }
    }

    fn regex_allowed(&self) -> bool {
        self.tokens.last().is_none_or(|t| !t.kind.ends_operand())
    }

    fn string(&mut self) -> Result<TokenKind, ParseError> {
        self.bump();
        let mut value = String::new();
        loop {
            let c = self.bump().ok_or_else(|| self.error("unterminated string literal"))?;
            match c {
                '"' => return Ok(TokenKind::Str(value)),
                '\\' => {
                    let escaped = self.bump().ok_or_else(|| self.error("unterminated string literal"))?;
                    value.push(match escaped {
                        'n' => '\n',
                        't' => '\t',
                        'r' => '\r',
                        '"' | '\\' | '$' => escaped,
                        other => return Err(self.error(format!("invalid escape sequence \\{other}"))),
                    });
                }
                '$' if self.peek() == Some('{') => {
                    value.push(c);
                    self.interpolation(&mut value)?;
                }
                _ => value.push(c),
            }
        }
    }

    /// Copies a `${...}` body verbatim, up to its matching `}`. Quotes and
    /// braces inside it do not end the enclosing string.
    fn interpolation(&mut self, value: &mut String) -> Result<(), ParseError> {
        #[derive(Clone, Copy)]
        enum Mode {
            Braces(usize),
            Quoted,
        }

        let mut stack = Vec::new();
        if let Some(open) = self.bump() {
            value.push(open);
            stack.push(Mode::Braces(1));
        }
        while let Some(mode) = stack.last().copied() {
            let c = self
                .bump()
                .ok_or_else(|| self.error("unterminated string interpolation"))?;
            value.push(c);
            match (mode, c) {
                (Mode::Braces(depth), '{') => {
                    stack.pop();
                    stack.push(Mode::Braces(depth + 1));
                }
                (Mode::Braces(depth), '}') => {
                    stack.pop();
                    if depth > 1 {
                        stack.push(Mode::Braces(depth - 1));
                    }
                }
                (Mode::Braces(_), '"') => stack.push(Mode::Quoted),
                (Mode::Quoted, '"') => {
                    stack.pop();
                }
                (Mode::Quoted, '\\') => {
                    if let Some(escaped) = self.bump() {
                        value.push(escaped);
                    }
                }
                (Mode::Quoted, '$') if self.peek() == Some('{') => {
                    self.bump();
                    value.push('{');
                    stack.push(Mode::Braces(1));
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn digits(&mut self) -> String {
        let mut digits = String::new();
        while let Some(c) = self.peek().filter(|c| c.is_ascii_digit()) {
            digits.push(c);
            self.bump();
        }
        digits
    }

    fn number(&mut self) -> Result<TokenKind, ParseError> {
        let digits = self.digits();

        if digits.len() == 4 && self.looks_like_date() {
            let mut value = digits;
            while let Some(c) = self
                .peek()
                .filter(|c| c.is_ascii_alphanumeric() || matches!(c, ':' | '.' | '+' | '-'))
            {
                value.push(c);
                self.bump();
            }
            return Ok(TokenKind::DateTime(value));
        }

        if self.peek() == Some('.') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
            self.bump();
            let fraction = self.digits();
            let value = format!("{digits}.{fraction}")
                .parse::<f64>()
                .map_err(|e| self.error(format!("invalid float literal: {e}")))?;
            return Ok(TokenKind::Float(value));
        }

        if self.peek().is_some_and(char::is_alphabetic) {
            return self.duration(digits);
        }

        digits
            .parse::<i64>()
            .map(TokenKind::Int)
            .map_err(|_| self.error(format!("integer literal {digits} out of range")))
    }

    /// `-DD-` after four digits starts a date such as `2020-01-01T00:00:00Z`.
    fn looks_like_date(&self) -> bool {
        self.peek() == Some('-')
            && self.peek_at(1).is_some_and(|c| c.is_ascii_digit())
            && self.peek_at(2).is_some_and(|c| c.is_ascii_digit())
            && self.peek_at(3) == Some('-')
    }

    fn duration(&mut self, first: String) -> Result<TokenKind, ParseError> {
        let mut segments = Vec::new();
        let mut digits = first;
        loop {
            let magnitude = digits
                .parse::<i64>()
                .map_err(|_| self.error(format!("duration magnitude {digits} out of range")))?;

            let mut unit = String::new();
            while let Some(c) = self.peek().filter(|c| c.is_alphabetic()) {
                unit.push(c);
                self.bump();
            }
            if unit.is_empty() {
                return Err(self.error("missing duration unit"));
            }
            let unit = DurationUnit::parse(&unit)
                .ok_or_else(|| self.error(format!("invalid duration unit {unit:?}")))?;
            segments.push(DurationSegment { magnitude, unit });

            if !self.peek().is_some_and(|c| c.is_ascii_digit()) {
                return Ok(TokenKind::Duration(segments));
            }
            digits = self.digits();
        }
    }

    fn word(&mut self) -> TokenKind {
        let mut word = String::new();
        while let Some(c) = self.peek().filter(|c| c.is_alphanumeric() || *c == '_') {
            word.push(c);
            self.bump();
        }
        match word.as_str() {
            "option" => TokenKind::Option,
            "import" => TokenKind::Import,
            "package" => TokenKind::Package,
            "return" => TokenKind::Return,
            "and" => TokenKind::And,
            "or" => TokenKind::Or,
            "not" => TokenKind::Not,
            "exists" => TokenKind::Exists,
            "if" => TokenKind::If,
            "then" => TokenKind::Then,
            "else" => TokenKind::Else,
            "with" => TokenKind::With,
            _ => TokenKind::Ident(word),
        }
    }

    fn regex(&mut self) -> Result<TokenKind, ParseError> {
        self.bump();
        let mut pattern = String::new();
        loop {
            match self.bump() {
                None | Some('\n') => return Err(self.error("unterminated regex literal")),
                Some('/') => return Ok(TokenKind::Regex(pattern)),
                Some('\\') => match self.bump() {
                    Some('/') => pattern.push('/'),
                    Some(c) => {
                        pattern.push('\\');
                        pattern.push(c);
                    }
                    None => return Err(self.error("unterminated regex literal")),
                },
                Some(c) => pattern.push(c),
            }
        }
    }

    fn punct(&mut self) -> Result<TokenKind, ParseError> {
        let Some(c) = self.bump() else {
            return Err(self.error("unexpected end of input"));
        };
        let paired = match (c, self.peek()) {
            ('=', Some('=')) => Some(TokenKind::Eq),
            ('=', Some('>')) => Some(TokenKind::Arrow),
            ('=', Some('~')) => Some(TokenKind::RegexEq),
            ('!', Some('=')) => Some(TokenKind::NotEq),
            ('!', Some('~')) => Some(TokenKind::RegexNotEq),
            ('<', Some('=')) => Some(TokenKind::LtEq),
            ('>', Some('=')) => Some(TokenKind::GtEq),
            ('|', Some('>')) => Some(TokenKind::PipeForward),
            _ => None,
        };
        if let Some(kind) = paired {
            self.bump();
            return Ok(kind);
        }

        Ok(match c {
            '=' => TokenKind::Assign,
            '<' => TokenKind::Lt,
            '>' => TokenKind::Gt,
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '{' => TokenKind::LBrace,
            '}' => TokenKind::RBrace,
            '[' => TokenKind::LBracket,
            ']' => TokenKind::RBracket,
            ',' => TokenKind::Comma,
            ':' => TokenKind::Colon,
            '.' => TokenKind::Dot,
            '?' => TokenKind::Question,
            '+' => TokenKind::Plus,
            '-' => TokenKind::Minus,
            '*' => TokenKind::Star,
            '/' => TokenKind::Slash,
            '%' => TokenKind::Percent,
            '^' => TokenKind::Caret,
            other => return Err(self.error(format!("unexpected character {other:?}"))),
        })
    }
}
