//! Options extractor - `option task = {...}` から `TaskOptions` を作る
//!
//! # 規則（この順で判定）
//! 1. `option task` が無い → "no task options defined"
//! 2. 2 つ以上 → "multiple task options defined"
//! 3. `every` と `cron` の両方 → "cannot use both cron and every in task options"
//! 4. `name` / `every` / `cron` / `offset` / `concurrency` / `retry` を取り出す
//!
//! # Strategy
//! - `Simple`: 値は literal のみ
//! - `Evaluated`: それより前の `option` / 変数代入への参照（`v`, `v.every`,
//!   `v["every"]`）と duration / integer の単項マイナスも解決する

use serde::{Deserialize, Serialize};

use crate::domain::errors::{Error, Result};
use crate::options::duration::ScriptDuration;
use crate::options::{TaskOptions, DEFAULT_CONCURRENCY, DEFAULT_RETRY};
use crate::ports::ScriptParser;
use crate::script::ast::{Expr, Program, Property, Statement, UnaryOp};

/// How property values of the task options object are read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionStrategy {
    Simple,
    #[default]
    Evaluated,
}

/// Parse `script` and read its task options.
///
/// Only structure is checked here; see [`TaskOptions::validate`] for ranges.
pub fn extract_task_options(
    parser: &dyn ScriptParser,
    script: &str,
    strategy: ExtractionStrategy,
) -> Result<TaskOptions> {
    let program = parser
        .parse(script)
        .map_err(|e| Error::invalid(e.to_string()).with_source(e))?;

    let (position, value) = match program.option_assignments("task").as_slice() {
        [] => return Err(Error::invalid("no task options defined")),
        [one] => *one,
        _ => return Err(Error::invalid("multiple task options defined")),
    };

    let resolver = Resolver { program: &program, strategy };
    let (properties, scope) = match resolver.resolve(value, position)? {
        Resolved::Object(properties, scope) => (properties, scope),
        _ => return Err(Error::invalid("task options must be an object")),
    };

    let has = |key: &str| properties.iter().any(|p| p.key == key);
    if has("every") && has("cron") {
        return Err(Error::invalid("cannot use both cron and every in task options"));
    }

    let mut options = TaskOptions {
        concurrency: DEFAULT_CONCURRENCY,
        retry: DEFAULT_RETRY,
        ..TaskOptions::default()
    };
    for property in properties {
        let key = property.key.as_str();
        let field = Field { key, strategy };
        match key {
            "name" => options.name = field.string(resolver.resolve(&property.value, scope)?)?,
            "cron" => options.cron = Some(field.string(resolver.resolve(&property.value, scope)?)?),
            "every" => options.every = Some(field.duration(resolver.resolve(&property.value, scope)?)?),
            "offset" => options.offset = Some(field.duration(resolver.resolve(&property.value, scope)?)?),
            "concurrency" => {
                options.concurrency = field.integer(resolver.resolve(&property.value, scope)?)?;
            }
            "retry" => options.retry = field.integer(resolver.resolve(&property.value, scope)?)?,
            _ => {}
        }
    }
    Ok(options)
}

/// A property value after strategy-dependent resolution.
///
/// Objects carry the statement index they were defined at; references
/// inside them only see assignments before that statement.
enum Resolved<'p> {
    String(String),
    Integer(i64),
    Duration(ScriptDuration),
    Object(&'p [Property], usize),
    Other,
}

struct Resolver<'p> {
    program: &'p Program,
    strategy: ExtractionStrategy,
}

impl<'p> Resolver<'p> {
    fn resolve(&self, expr: &'p Expr, scope: usize) -> Result<Resolved<'p>> {
        if let Some(properties) = expr.as_object() {
            return Ok(Resolved::Object(properties, scope));
        }
        let value = match expr {
            Expr::String(s) => Resolved::String(s.clone()),
            Expr::Integer(n) => Resolved::Integer(*n),
            Expr::Duration(segments) => Resolved::Duration(ScriptDuration::new(segments.clone())),
            _ if self.strategy == ExtractionStrategy::Simple => Resolved::Other,

            Expr::Unary {
                op: UnaryOp::Negate,
                operand,
            } => match self.resolve(operand, scope)? {
                Resolved::Duration(d) => Resolved::Duration(d.negated()),
                Resolved::Integer(n) => Resolved::Integer(n.checked_neg().ok_or_else(|| {
                    Error::invalid("integer negation overflows in task options")
                })?),
                _ => Resolved::Other,
            },
            Expr::Identifier(name) => match self.lookup(name, scope) {
                Some((value, at)) => self.resolve(value, at)?,
                None => {
                    return Err(Error::invalid(format!(
                        "undefined identifier {name} in task options"
                    )));
                }
            },
            Expr::Member { object, property } => self.field(object, property, scope)?,
            Expr::Index { object, index } => match &**index {
                Expr::String(key) => self.field(object, key, scope)?,
                _ => Resolved::Other,
            },
            _ => Resolved::Other,
        };
        Ok(value)
    }

    fn field(&self, object: &'p Expr, key: &str, scope: usize) -> Result<Resolved<'p>> {
        match self.resolve(object, scope)? {
            Resolved::Object(properties, at) => match properties.iter().find(|p| p.key == key) {
                Some(property) => self.resolve(&property.value, at),
                None => Err(Error::invalid(format!("property {key} not found in task options"))),
            },
            _ => Ok(Resolved::Other),
        }
    }

    /// Latest assignment to `name` strictly before statement `scope`.
    fn lookup(&self, name: &str, scope: usize) -> Option<(&'p Expr, usize)> {
        self.program.body[..scope]
            .iter()
            .enumerate()
            .rev()
            .find_map(|(i, stmt)| match stmt {
                Statement::Option { name: n, value } | Statement::Variable { name: n, value }
                    if n == name =>
                {
                    Some((value, i))
                }
                _ => None,
            })
    }
}

struct Field<'k> {
    key: &'k str,
    strategy: ExtractionStrategy,
}

impl Field<'_> {
    fn mismatch(&self, kind: &str) -> Error {
        let wanted = match self.strategy {
            ExtractionStrategy::Simple => format!("a literal {kind}"),
            ExtractionStrategy::Evaluated if kind.starts_with('i') => format!("an {kind}"),
            ExtractionStrategy::Evaluated => format!("a {kind}"),
        };
        Error::invalid(format!("{} option must be {wanted}", self.key))
    }

    fn string(&self, value: Resolved<'_>) -> Result<String> {
        match value {
            Resolved::String(s) => Ok(s),
            _ => Err(self.mismatch("string")),
        }
    }

    fn integer(&self, value: Resolved<'_>) -> Result<i64> {
        match value {
            Resolved::Integer(n) => Ok(n),
            _ => Err(self.mismatch("integer")),
        }
    }

    fn duration(&self, value: Resolved<'_>) -> Result<ScriptDuration> {
        match value {
            Resolved::Duration(d) => Ok(d),
            _ => Err(self.mismatch("duration")),
        }
    }
}
