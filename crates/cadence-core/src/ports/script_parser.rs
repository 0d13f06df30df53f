//! ScriptParser port - task script の構文解析
//!
//! options の抽出が必要とするのは構文木だけです（型検査・評価はしない）。
//!
//! # 実装
//! - `script::LiteParser`: 文と literal を認識する軽量 parser

use thiserror::Error;

use crate::script::ast::Program;

/// Syntax error with the 1-based position where it was detected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("error at {line}:{column}: {message}")]
pub struct ParseError {
    pub message: String,
    pub line: usize,
    pub column: usize,
}

impl ParseError {
    pub fn new(message: impl Into<String>, line: usize, column: usize) -> Self {
        Self {
            message: message.into(),
            line,
            column,
        }
    }
}

/// ScriptParser は script を構文木にする
pub trait ScriptParser: Send + Sync {
    fn parse(&self, source: &str) -> Result<Program, ParseError>;
}

impl<P: ScriptParser + ?Sized> ScriptParser for std::sync::Arc<P> {
    fn parse(&self, source: &str) -> Result<Program, ParseError> {
        (**self).parse(source)
    }
}
