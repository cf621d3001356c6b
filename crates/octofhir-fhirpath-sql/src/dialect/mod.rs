//! SQL dialect adapters.
//!
//! A dialect supplies SQL syntax only. Every FHIR or FHIRPath decision lives
//! in the translator; the translator never branches on which dialect it is
//! talking to and reaches the database exclusively through [`Dialect`].

mod duckdb;
mod postgres;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::ast::SqlDataType;
use crate::error::{Result, TranslationError};

pub use duckdb::DuckDbDialect;
pub use postgres::PostgresDialect;

/// JSON value kinds a type probe can distinguish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonKind {
    String,
    Number,
    Integer,
    Boolean,
    Object,
    Array,
    Null,
}

/// Aggregate functions a dialect must render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateKind {
    Count,
    Sum,
    Avg,
    Min,
    Max,
    /// Boolean conjunction over rows (`bool_and`).
    BoolAnd,
}

/// Scalar math functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MathFunction {
    Abs,
    Ceiling,
    Floor,
    Round,
    Truncate,
}

/// Boolean combinators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

impl LogicalOp {
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::And => "AND",
            Self::Or => "OR",
        }
    }
}

/// The primitive surface the translator depends on.
///
/// Methods take already-rendered SQL operand expressions and return SQL text.
/// JSON paths use the `$.a.b[0]` notation produced by
/// [`TranslationContext::get_json_path`](crate::TranslationContext::get_json_path);
/// `$` addresses the value itself.
pub trait Dialect: fmt::Debug + Send + Sync {
    fn name(&self) -> &'static str;

    // JSON extraction ------------------------------------------------------

    /// Extract a value at `path` as text.
    fn extract_json_field(&self, column: &str, path: &str) -> String;

    fn extract_json_integer(&self, column: &str, path: &str) -> String;

    fn extract_json_decimal(&self, column: &str, path: &str) -> String;

    fn extract_json_boolean(&self, column: &str, path: &str) -> String;

    /// Extract a value at `path` as JSON.
    fn extract_json_object(&self, column: &str, path: &str) -> String;

    /// Number of elements of the array at `path`; NULL when absent, 0 for scalars.
    fn json_array_length(&self, column: &str, path: Option<&str>) -> String;

    /// Type probe returning the dialect's type-name string for a JSON value.
    fn json_type(&self, expr: &str) -> String;

    /// Type-name strings [`Dialect::json_type`] returns for a kind.
    fn json_type_names(&self, kind: JsonKind) -> &'static [&'static str];

    /// Derived-table row source yielding one row per element of the array at
    /// `path`, aliased `alias` with a single JSON column `value`. Absent paths
    /// yield no rows and scalars yield one row.
    fn iterate_json_array(&self, column: &str, path: &str, alias: &str) -> String;

    /// Aggregate rows into a JSON array; never NULL (empty input gives `[]`).
    fn json_array_agg(&self, expr: &str, filter: Option<&str>) -> String;

    fn empty_json_array(&self) -> String;

    // Strings ----------------------------------------------------------------

    fn regex_match(&self, expr: &str, pattern: &str) -> String;

    fn regex_replace(&self, expr: &str, pattern: &str, replacement: &str) -> String;

    fn upper(&self, expr: &str) -> String {
        format!("UPPER({expr})")
    }

    fn lower(&self, expr: &str) -> String {
        format!("LOWER({expr})")
    }

    fn trim(&self, expr: &str) -> String {
        format!("TRIM({expr})")
    }

    fn string_length(&self, expr: &str) -> String {
        format!("LENGTH({expr})")
    }

    /// Substring with a 1-based start position.
    fn substring(&self, expr: &str, start: &str, length: Option<&str>) -> String {
        match length {
            Some(length) => format!("SUBSTR({expr}, {start}, {length})"),
            None => format!("SUBSTR({expr}, {start})"),
        }
    }

    fn string_concat(&self, parts: &[&str]) -> String {
        format!("({})", parts.join(" || "))
    }

    /// Aggregate text rows into one string.
    fn string_aggregate(&self, expr: &str, separator: &str) -> String {
        format!("STRING_AGG({expr}, {separator})")
    }

    /// Quote a value as a SQL string literal.
    fn string_literal(&self, value: &str) -> String {
        format!("'{}'", value.replace('\'', "''"))
    }

    // Numbers, aggregates, control flow --------------------------------------

    fn cast(&self, expr: &str, to: SqlDataType) -> String;

    fn aggregate_function(&self, kind: AggregateKind, expr: &str) -> String;

    fn math_function(&self, function: MathFunction, expr: &str, precision: Option<&str>) -> String;

    fn case_expression(&self, branches: &[(String, String)], otherwise: Option<&str>) -> String {
        let mut sql = String::from("CASE");
        for (condition, result) in branches {
            sql.push_str(&format!(" WHEN {condition} THEN {result}"));
        }
        if let Some(otherwise) = otherwise {
            sql.push_str(&format!(" ELSE {otherwise}"));
        }
        sql.push_str(" END");
        sql
    }

    fn logical_combine(&self, op: LogicalOp, operands: &[String]) -> String {
        match operands {
            [] => match op {
                LogicalOp::And => "TRUE".to_string(),
                LogicalOp::Or => "FALSE".to_string(),
            },
            [single] => single.clone(),
            _ => format!("({})", operands.join(&format!(" {} ", op.as_sql()))),
        }
    }
}

/// Supported dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DialectKind {
    #[default]
    Postgres,
    DuckDb,
}

impl DialectKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::DuckDb => "duckdb",
        }
    }
}

impl FromStr for DialectKind {
    type Err = TranslationError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Ok(Self::Postgres),
            "duckdb" | "duck" => Ok(Self::DuckDb),
            other => Err(TranslationError::unsupported_dialect(other)),
        }
    }
}

impl fmt::Display for DialectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Construct the adapter for a dialect.
pub fn dialect_for(kind: DialectKind) -> Arc<dyn Dialect> {
    match kind {
        DialectKind::Postgres => Arc::new(PostgresDialect),
        DialectKind::DuckDb => Arc::new(DuckDbDialect),
    }
}

/// Validate an identifier (table name, column name, alias).
///
/// Only allows ASCII alphanumeric characters and underscores, not starting
/// with a digit.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(TranslationError::InvalidIdentifier(
            "identifier cannot be empty".to_string(),
        ));
    }
    let valid = name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit());
    if !valid {
        return Err(TranslationError::InvalidIdentifier(name.to_string()));
    }
    Ok(())
}

/// Quote a JSON path for embedding in a SQL string literal.
pub(crate) fn path_literal(path: &str) -> String {
    format!("'{}'", path.replace('\'', "''"))
}

/// Rewrite negative array indices (`[-1]`) with a dialect-specific form.
pub(crate) fn rewrite_negative_indices(path: &str, render: impl Fn(u64) -> String) -> String {
    let pattern = negative_index_pattern();
    pattern
        .replace_all(path, |caps: &regex::Captures<'_>| {
            let offset = caps[1].parse::<u64>().unwrap_or(1);
            render(offset)
        })
        .into_owned()
}

fn negative_index_pattern() -> &'static regex::Regex {
    static PATTERN: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    PATTERN.get_or_init(|| {
        regex::Regex::new(r"\[-(\d+)\]").unwrap_or_else(|_| unreachable!("static regex"))
    })
}
