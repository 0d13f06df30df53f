//! Syntax tree produced by the script parser.
//!
//! The tree is generic: it records statements and expressions but carries no
//! type information. Consumers walk it through the small surface at the end
//! of this file (`Program::option_assignments`, `Expr::as_object`, ...).

use std::fmt;

/// Units accepted in duration literals, e.g. the `h` and `m` of `1h30m`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DurationUnit {
    Year,
    Month,
    Week,
    Day,
    Hour,
    Minute,
    Second,
    Millisecond,
    Microsecond,
    Nanosecond,
}

impl DurationUnit {
    pub fn parse(unit: &str) -> Option<Self> {
        Some(match unit {
            "y" => DurationUnit::Year,
            "mo" => DurationUnit::Month,
            "w" => DurationUnit::Week,
            "d" => DurationUnit::Day,
            "h" => DurationUnit::Hour,
            "m" => DurationUnit::Minute,
            "s" => DurationUnit::Second,
            "ms" => DurationUnit::Millisecond,
            "us" | "µs" => DurationUnit::Microsecond,
            "ns" => DurationUnit::Nanosecond,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DurationUnit::Year => "y",
            DurationUnit::Month => "mo",
            DurationUnit::Week => "w",
            DurationUnit::Day => "d",
            DurationUnit::Hour => "h",
            DurationUnit::Minute => "m",
            DurationUnit::Second => "s",
            DurationUnit::Millisecond => "ms",
            DurationUnit::Microsecond => "us",
            DurationUnit::Nanosecond => "ns",
        }
    }
}

impl fmt::Display for DurationUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One `<magnitude><unit>` part of a duration literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DurationSegment {
    pub magnitude: i64,
    pub unit: DurationUnit,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub body: Vec<Statement>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// `option <name> = <value>`; dotted targets keep their dots.
    Option { name: String, value: Expr },
    /// `<name> = <value>`
    Variable { name: String, value: Expr },
    Import { path: String, alias: Option<String> },
    Package(String),
    Return(Expr),
    Expression(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    pub key: String,
    pub value: Expr,
}

/// A function parameter with its optional default value.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub default: Option<Expr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Negate,
    Plus,
    Not,
    Exists,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    RegexMatch,
    RegexNotMatch,
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Power,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FunctionBody {
    Expr(Box<Expr>),
    Block(Vec<Statement>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Identifier(String),
    Integer(i64),
    Float(f64),
    String(String),
    Duration(Vec<DurationSegment>),
    DateTime(String),
    Regex(String),
    Array(Vec<Expr>),
    Object {
        with: Option<Box<Expr>>,
        properties: Vec<Property>,
    },
    Member {
        object: Box<Expr>,
        property: String,
    },
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
    },
    Call {
        callee: Box<Expr>,
        arguments: Vec<Property>,
    },
    Pipe {
        argument: Box<Expr>,
        call: Box<Expr>,
    },
    Function {
        params: Vec<Param>,
        body: FunctionBody,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Conditional {
        test: Box<Expr>,
        consequent: Box<Expr>,
        alternate: Box<Expr>,
    },
}

impl Program {
    /// Values assigned by `option <name> = ...` with their statement index,
    /// in source order.
    pub fn option_assignments(&self, name: &str) -> Vec<(usize, &Expr)> {
        self.body
            .iter()
            .enumerate()
            .filter_map(|(i, stmt)| match stmt {
                Statement::Option { name: n, value } if n == name => Some((i, value)),
                _ => None,
            })
            .collect()
    }
}

impl Expr {
    pub fn as_object(&self) -> Option<&[Property]> {
        match self {
            Expr::Object { properties, .. } => Some(properties),
            _ => None,
        }
    }

    /// Property of an object literal by key.
    pub fn property(&self, key: &str) -> Option<&Expr> {
        self.as_object()?
            .iter()
            .find(|p| p.key == key)
            .map(|p| &p.value)
    }
}
