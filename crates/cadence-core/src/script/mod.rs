//! Script - task script の構文解析
//!
//! - `ast`: 構文木
//! - `lexer`: token 化
//! - `parser`: `LiteParser`（`ScriptParser` port の実装）

pub mod ast;
pub mod lexer;
pub mod parser;

pub use self::ast::{Expr, Program, Statement};
pub use self::parser::LiteParser;
