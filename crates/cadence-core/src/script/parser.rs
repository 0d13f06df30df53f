//! LiteParser - 軽量な script parser
//!
//! 文（option / 変数代入 / import / 式）と literal を認識するだけで、
//! 型検査や評価はしません。文の区切りは不要で、式が続かなくなった所で次の文になります。
//!
//! # 優先順位（低い順）
//! `or` < `and` < `not` < 比較 < `+ -` < `* / %` < `^` < `|>` < 単項 `- +` < 後置（呼び出し・member・index）
//!
//! 構文木の深さは `MAX_DEPTH` までです。括弧の入れ子も `a + b + ...` の連鎖も
//! 1 段として数え、超えたら `ParseError` を返します。

use crate::ports::script_parser::{ParseError, ScriptParser};
use crate::script::ast::{BinaryOp, Expr, FunctionBody, Param, Program, Property, Statement, UnaryOp};
use crate::script::lexer::{tokenize, Token, TokenKind};

const NOT_BP: u8 = 5;
const PREFIX_BP: u8 = 17;

/// Deepest expression tree the parser builds.
pub const MAX_DEPTH: usize = 256;

#[derive(Debug, Clone, Copy, Default)]
pub struct LiteParser;

impl LiteParser {
    pub fn new() -> Self {
        Self
    }
}

impl ScriptParser for LiteParser {
    fn parse(&self, source: &str) -> Result<Program, ParseError> {
        let tokens = tokenize(source)?;
        Parser {
            tokens,
            pos: 0,
            depth: 0,
        }
        .program()
    }
}

enum Infix {
    Binary(BinaryOp),
    Pipe,
}

fn infix_binding(kind: &TokenKind) -> Option<(u8, u8, Infix)> {
    use BinaryOp::*;
    let (l, r, op) = match kind {
        TokenKind::Or => (1, 2, Or),
        TokenKind::And => (3, 4, And),
        TokenKind::Eq => (7, 8, Equal),
        TokenKind::NotEq => (7, 8, NotEqual),
        TokenKind::Lt => (7, 8, Less),
        TokenKind::LtEq => (7, 8, LessEqual),
        TokenKind::Gt => (7, 8, Greater),
        TokenKind::GtEq => (7, 8, GreaterEqual),
        TokenKind::RegexEq => (7, 8, RegexMatch),
        TokenKind::RegexNotEq => (7, 8, RegexNotMatch),
        TokenKind::Plus => (9, 10, Add),
        TokenKind::Minus => (9, 10, Subtract),
        TokenKind::Star => (11, 12, Multiply),
        TokenKind::Slash => (11, 12, Divide),
        TokenKind::Percent => (11, 12, Modulo),
        TokenKind::Caret => (14, 13, Power),
        TokenKind::PipeForward => return Some((15, 16, Infix::Pipe)),
        _ => return None,
    };
    Some((l, r, Infix::Binary(op)))
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn program(mut self) -> Result<Program, ParseError> {
        let mut body = Vec::new();
        while !self.at(&TokenKind::Eof) {
            body.push(self.statement()?);
        }
        Ok(Program { body })
    }

    // ----- token helpers -----

    fn token_at(&self, n: usize) -> &Token {
        let last = self.tokens.len() - 1;
        &self.tokens[(self.pos + n).min(last)]
    }

    fn peek(&self) -> &TokenKind {
        &self.token_at(0).kind
    }

    fn peek_at(&self, n: usize) -> &TokenKind {
        &self.token_at(n).kind
    }

    fn at(&self, kind: &TokenKind) -> bool {
        std::mem::discriminant(self.peek()) == std::mem::discriminant(kind)
    }

    fn bump(&mut self) -> Token {
        let token = self.token_at(0).clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        let token = self.token_at(0);
        ParseError::new(message, token.line, token.column)
    }

    fn unexpected(&self, wanted: &str) -> ParseError {
        self.error(format!("expected {wanted}, got {}", self.peek()))
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token, ParseError> {
        if self.at(&kind) {
            Ok(self.bump())
        } else {
            Err(self.unexpected(&kind.to_string()))
        }
    }

    fn ident(&mut self, what: &str) -> Result<String, ParseError> {
        if let TokenKind::Ident(name) = self.peek().clone() {
            self.bump();
            Ok(name)
        } else {
            Err(self.unexpected(what))
        }
    }

    // ----- statements -----

    fn statement(&mut self) -> Result<Statement, ParseError> {
        match self.peek() {
            TokenKind::Option => {
                self.bump();
                let mut name = self.ident("option name")?;
                while self.at(&TokenKind::Dot) {
                    self.bump();
                    name.push('.');
                    name.push_str(&self.ident("option name")?);
                }
                self.expect(TokenKind::Assign)?;
                let value = self.expression(0)?;
                Ok(Statement::Option { name, value })
            }
            TokenKind::Import => {
                self.bump();
                let alias = match self.peek() {
                    TokenKind::Ident(_) => Some(self.ident("import alias")?),
                    _ => None,
                };
                match self.bump().kind {
                    TokenKind::Str(path) => Ok(Statement::Import { path, alias }),
                    _ => Err(self.error("expected import path")),
                }
            }
            TokenKind::Package => {
                self.bump();
                Ok(Statement::Package(self.ident("package name")?))
            }
            TokenKind::Return => {
                self.bump();
                Ok(Statement::Return(self.expression(0)?))
            }
            TokenKind::Ident(_) if matches!(self.peek_at(1), TokenKind::Assign) => {
                let name = self.ident("variable name")?;
                self.bump();
                let value = self.expression(0)?;
                Ok(Statement::Variable { name, value })
            }
            _ => Ok(Statement::Expression(self.expression(0)?)),
        }
    }

    // ----- expressions -----

    /// One more level of tree depth.
    fn descend(&mut self) -> Result<(), ParseError> {
        if self.depth >= MAX_DEPTH {
            return Err(self.error(format!(
                "expression nested deeper than {MAX_DEPTH} levels"
            )));
        }
        self.depth += 1;
        Ok(())
    }

    fn expression(&mut self, min_bp: u8) -> Result<Expr, ParseError> {
        let entry = self.depth;
        self.descend()?;
        let mut lhs = self.prefix()?;

        loop {
            match self.peek() {
                TokenKind::LParen => {
                    self.descend()?;
                    self.bump();
                    let arguments = self.properties(TokenKind::RParen)?;
                    lhs = Expr::Call {
                        callee: Box::new(lhs),
                        arguments,
                    };
                    continue;
                }
                TokenKind::Dot => {
                    self.descend()?;
                    self.bump();
                    let property = self.ident("member name")?;
                    lhs = Expr::Member {
                        object: Box::new(lhs),
                        property,
                    };
                    continue;
                }
                TokenKind::LBracket => {
                    self.descend()?;
                    self.bump();
                    let index = self.expression(0)?;
                    self.expect(TokenKind::RBracket)?;
                    lhs = Expr::Index {
                        object: Box::new(lhs),
                        index: Box::new(index),
                    };
                    continue;
                }
                _ => {}
            }

            let Some((l_bp, r_bp, infix)) = infix_binding(self.peek()) else {
                break;
            };
            if l_bp < min_bp {
                break;
            }
            self.descend()?;
            self.bump();
            let rhs = self.expression(r_bp)?;
            lhs = match infix {
                Infix::Pipe => Expr::Pipe {
                    argument: Box::new(lhs),
                    call: Box::new(rhs),
                },
                Infix::Binary(op) => Expr::Binary {
                    op,
                    left: Box::new(lhs),
                    right: Box::new(rhs),
                },
            };
        }

        self.depth = entry;
        Ok(lhs)
    }

    fn prefix(&mut self) -> Result<Expr, ParseError> {
        if self.at(&TokenKind::LParen) && self.arrow_follows_parens() {
            return self.function();
        }

        let token = self.bump();
        Ok(match token.kind {
            TokenKind::Ident(name) => Expr::Identifier(name),
            TokenKind::Int(v) => Expr::Integer(v),
            TokenKind::Float(v) => Expr::Float(v),
            TokenKind::Str(s) => Expr::String(s),
            TokenKind::Duration(segments) => Expr::Duration(segments),
            TokenKind::DateTime(s) => Expr::DateTime(s),
            TokenKind::Regex(s) => Expr::Regex(s),
            TokenKind::Minus => self.unary(UnaryOp::Negate, PREFIX_BP)?,
            TokenKind::Plus => self.unary(UnaryOp::Plus, PREFIX_BP)?,
            TokenKind::Exists => self.unary(UnaryOp::Exists, PREFIX_BP)?,
            TokenKind::Not => self.unary(UnaryOp::Not, NOT_BP)?,
            TokenKind::LParen => {
                let inner = self.expression(0)?;
                self.expect(TokenKind::RParen)?;
                inner
            }
            TokenKind::LBracket => self.array()?,
            TokenKind::LBrace => self.object()?,
            TokenKind::If => {
                let test = self.expression(0)?;
                self.expect(TokenKind::Then)?;
                let consequent = self.expression(0)?;
                self.expect(TokenKind::Else)?;
                let alternate = self.expression(0)?;
                Expr::Conditional {
                    test: Box::new(test),
                    consequent: Box::new(consequent),
                    alternate: Box::new(alternate),
                }
            }
            other => {
                return Err(ParseError::new(
                    format!("unexpected {other}"),
                    token.line,
                    token.column,
                ));
            }
        })
    }

    fn unary(&mut self, op: UnaryOp, bp: u8) -> Result<Expr, ParseError> {
        let operand = self.expression(bp)?;
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    /// Whether the `(` at the cursor opens a parameter list: `() =>`,
    /// `(a) =>`, `(a, ...` or `(a = ...`. Looks at most four tokens ahead.
    fn arrow_follows_parens(&self) -> bool {
        match (self.peek_at(1), self.peek_at(2)) {
            (TokenKind::RParen, TokenKind::Arrow) => true,
            (TokenKind::Ident(_), TokenKind::Comma | TokenKind::Assign) => true,
            (TokenKind::Ident(_), TokenKind::RParen) => {
                matches!(self.peek_at(3), TokenKind::Arrow)
            }
            _ => false,
        }
    }

    fn function(&mut self) -> Result<Expr, ParseError> {
        self.expect(TokenKind::LParen)?;
        let mut params = Vec::new();
        while !self.at(&TokenKind::RParen) {
            let name = self.ident("parameter name")?;
            let default = if self.at(&TokenKind::Assign) {
                self.bump();
                Some(self.expression(0)?)
            } else {
                None
            };
            params.push(Param { name, default });
            if self.at(&TokenKind::Comma) {
                self.bump();
            } else if !self.at(&TokenKind::RParen) {
                return Err(self.unexpected(", or )"));
            }
        }
        self.expect(TokenKind::RParen)?;
        self.expect(TokenKind::Arrow)?;

        let body = if self.at(&TokenKind::LBrace) {
            self.bump();
            let mut block = Vec::new();
            while !self.at(&TokenKind::RBrace) {
                if self.at(&TokenKind::Eof) {
                    return Err(self.unexpected("}"));
                }
                block.push(self.statement()?);
            }
            self.bump();
            FunctionBody::Block(block)
        } else {
            FunctionBody::Expr(Box::new(self.expression(0)?))
        };
        Ok(Expr::Function { params, body })
    }

    fn array(&mut self) -> Result<Expr, ParseError> {
        let mut elements = Vec::new();
        while !self.at(&TokenKind::RBracket) {
            elements.push(self.expression(0)?);
            if self.at(&TokenKind::Comma) {
                self.bump();
            } else if !self.at(&TokenKind::RBracket) {
                return Err(self.unexpected(", or ]"));
            }
        }
        self.bump();
        Ok(Expr::Array(elements))
    }

    fn object(&mut self) -> Result<Expr, ParseError> {
        let with = match (self.peek(), self.peek_at(1)) {
            (TokenKind::Ident(_), TokenKind::With) => {
                let name = self.ident("object name")?;
                self.bump();
                Some(Box::new(Expr::Identifier(name)))
            }
            _ => None,
        };
        let properties = self.properties(TokenKind::RBrace)?;
        Ok(Expr::Object { with, properties })
    }

    /// `key: value` pairs up to and including `close`. A bare key stands
    /// for `key: key`; a trailing comma is allowed.
    fn properties(&mut self, close: TokenKind) -> Result<Vec<Property>, ParseError> {
        let mut properties = Vec::new();
        loop {
            if self.at(&close) {
                self.bump();
                return Ok(properties);
            }
            let key = match self.peek().clone() {
                TokenKind::Ident(key) | TokenKind::Str(key) => {
                    self.bump();
                    key
                }
                _ => return Err(self.unexpected("property key")),
            };
            let value = if self.at(&TokenKind::Colon) {
                self.bump();
                self.expression(0)?
            } else {
                Expr::Identifier(key.clone())
            };
            properties.push(Property { key, value });

            if self.at(&TokenKind::Comma) {
                self.bump();
            } else if !self.at(&close) {
                return Err(self.unexpected(&format!(", or {close}")));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::ast::{DurationSegment, DurationUnit};

    fn parse(source: &str) -> Program {
        LiteParser.parse(source).unwrap()
    }

    #[test]
    fn option_statement_with_object_literal() {
        let program = parse(r#"option task = {name: "a task", every: 1h}"#);
        let values = program.option_assignments("task");
        assert_eq!(values.len(), 1);
        assert_eq!(values[0].1.property("name"), Some(&Expr::String("a task".into())));
        assert_eq!(
            values[0].1.property("every"),
            Some(&Expr::Duration(vec![DurationSegment {
                magnitude: 1,
                unit: DurationUnit::Hour
            }]))
        );
    }

    #[test]
    fn statements_need_no_separators() {
        let program = parse(
            r#"howdy()
            option     task    =     { name:"whatever",  cron:  "* * * * *"  }
            hello()
            "#,
        );
        assert_eq!(program.body.len(), 3);
        assert!(matches!(program.body[0], Statement::Expression(Expr::Call { .. })));
        assert!(matches!(program.body[1], Statement::Option { .. }));
        let found = program.option_assignments("task");
        assert_eq!(found.iter().map(|(at, _)| *at).collect::<Vec<_>>(), vec![1]);
        assert!(program.option_assignments("v").is_empty());
    }

    #[test]
    fn realistic_pipeline_parses() {
        let source = "option v = {\n  bucket: \"bucks\",\n  timeRangeStart: -1h,\n  timeRangeStop: now()\n}\n\n\
            option task = { \n  name: \"asdf\",\n  every: 5m,\n}\n\n\
            from(bucket: \"_monitoring\")\n  |> range(start: v.timeRangeStart, stop: v.timeRangeStop)\n  \
            |> filter(fn: (r) => r[\"_measurement\"] == \"boltdb_reads_total\")\n  \
            |> filter(fn: (r) => r[\"_field\"] == \"counter\")\n  |> to(bucket: \"bucks\", org: \"whos\")";
        let program = parse(source);
        assert_eq!(program.body.len(), 3);
        assert_eq!(program.option_assignments("task").len(), 1);
        let Statement::Expression(Expr::Pipe { call, .. }) = &program.body[2] else {
            panic!("expected a pipe expression, got {:?}", program.body[2]);
        };
        assert!(matches!(**call, Expr::Call { .. }));
    }

    #[test]
    fn precedence_and_functions() {
        let program = parse("f = (r, n=2) => r._value * n + 1 > 3 and not r.ok");
        let Statement::Variable { value, .. } = &program.body[0] else {
            panic!("expected a variable");
        };
        let Expr::Function { params, body } = value else {
            panic!("expected a function");
        };
        assert_eq!(params.len(), 2);
        assert!(params[1].default.is_some());
        let FunctionBody::Expr(body) = body else {
            panic!("expected an expression body");
        };
        assert!(matches!(**body, Expr::Binary { op: BinaryOp::And, .. }));
    }

    #[test]
    fn imports_blocks_and_with() {
        let program = parse(
            r#"import "strings"
            import s "strings"
            g = (t) => {
                x = t + 1
                return {t with x: x}
            }"#,
        );
        assert_eq!(
            program.body[1],
            Statement::Import {
                path: "strings".into(),
                alias: Some("s".into())
            }
        );
        assert!(matches!(program.body[2], Statement::Variable { .. }));
    }

    #[test]
    fn errors_carry_position() {
        let err = LiteParser.parse("option task = {every: }").unwrap_err();
        assert_eq!(err.line, 1);
        assert!(err.message.contains("unexpected }"), "{}", err.message);

        let err = LiteParser.parse("option task = {every: 1h").unwrap_err();
        assert!(err.message.contains("end of input"), "{}", err.message);
    }

    #[test]
    fn deep_nesting_is_rejected() {
        let source = format!("x = {}1{}", "(".repeat(200_000), ")".repeat(200_000));
        let err = LiteParser.parse(&source).unwrap_err();
        assert!(err.message.contains("nested deeper"), "{}", err.message);

        let source = format!("x = 1{}", " + 1".repeat(MAX_DEPTH + 10));
        let err = LiteParser.parse(&source).unwrap_err();
        assert!(err.message.contains("nested deeper"), "{}", err.message);

        let source = format!("x = {}", "[".repeat(1_000));
        assert!(LiteParser.parse(&source).is_err());
    }

    #[test]
    fn moderate_nesting_parses() {
        let source = format!("x = {}1{}", "(".repeat(50), ")".repeat(50));
        let program = parse(&source);
        assert!(matches!(
            &program.body[0],
            Statement::Variable { value: Expr::Integer(1), .. }
        ));

        let source = format!("x = 1{}", " + 1".repeat(100));
        parse(&source);
    }

    #[test]
    fn parenthesized_expressions_are_not_functions() {
        let program = parse("a = (b)\nf = (b) => b\ng = () => 1\nh = (b, c = 2) => b");
        assert!(matches!(
            &program.body[0],
            Statement::Variable { value: Expr::Identifier(_), .. }
        ));
        for statement in &program.body[1..] {
            assert!(matches!(
                statement,
                Statement::Variable { value: Expr::Function { .. }, .. }
            ));
        }
    }
}
