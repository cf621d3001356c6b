//! PostgreSQL dialect over `JSONB` document columns.

use super::{AggregateKind, Dialect, JsonKind, MathFunction, path_literal, rewrite_negative_indices};
use crate::ast::SqlDataType;

#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

impl PostgresDialect {
    /// `jsonb_path_query_first` speaks SQL/JSON paths, which index from the
    /// end with `last`.
    fn json_path(path: &str) -> String {
        let path = rewrite_negative_indices(path, |offset| match offset {
            1 => "[last]".to_string(),
            n => format!("[last-{}]", n - 1),
        });
        path_literal(&path)
    }

    fn json_value(column: &str, path: &str) -> String {
        if path == "$" {
            column.to_string()
        } else {
            format!("jsonb_path_query_first({}, {})", column, Self::json_path(path))
        }
    }

    fn json_text(column: &str, path: &str) -> String {
        format!("({} #>> '{{}}')", Self::json_value(column, path))
    }
}

impl Dialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn extract_json_field(&self, column: &str, path: &str) -> String {
        Self::json_text(column, path)
    }

    fn extract_json_integer(&self, column: &str, path: &str) -> String {
        format!("{}::bigint", Self::json_text(column, path))
    }

    fn extract_json_decimal(&self, column: &str, path: &str) -> String {
        format!("{}::numeric", Self::json_text(column, path))
    }

    fn extract_json_boolean(&self, column: &str, path: &str) -> String {
        format!("{}::boolean", Self::json_text(column, path))
    }

    fn extract_json_object(&self, column: &str, path: &str) -> String {
        Self::json_value(column, path)
    }

    fn json_array_length(&self, column: &str, path: Option<&str>) -> String {
        let value = Self::json_value(column, path.unwrap_or("$"));
        format!(
            "(CASE WHEN {value} IS NULL THEN NULL WHEN jsonb_typeof({value}) = 'array' THEN jsonb_array_length({value}) ELSE 0 END)"
        )
    }

    fn json_type(&self, expr: &str) -> String {
        format!("jsonb_typeof({expr})")
    }

    fn json_type_names(&self, kind: JsonKind) -> &'static [&'static str] {
        match kind {
            JsonKind::String => &["string"],
            JsonKind::Number | JsonKind::Integer => &["number"],
            JsonKind::Boolean => &["boolean"],
            JsonKind::Object => &["object"],
            JsonKind::Array => &["array"],
            JsonKind::Null => &["null"],
        }
    }

    fn iterate_json_array(&self, column: &str, path: &str, alias: &str) -> String {
        let value = Self::json_value(column, path);
        format!(
            "jsonb_array_elements(CASE WHEN {value} IS NULL THEN '[]'::jsonb WHEN jsonb_typeof({value}) = 'array' THEN {value} ELSE jsonb_build_array({value}) END) AS {alias}(value)"
        )
    }

    fn json_array_agg(&self, expr: &str, filter: Option<&str>) -> String {
        match filter {
            Some(filter) => format!("COALESCE(jsonb_agg({expr}) FILTER (WHERE {filter}), '[]'::jsonb)"),
            None => format!("COALESCE(jsonb_agg({expr}), '[]'::jsonb)"),
        }
    }

    fn empty_json_array(&self) -> String {
        "'[]'::jsonb".to_string()
    }

    fn regex_match(&self, expr: &str, pattern: &str) -> String {
        format!("({expr} ~ {pattern})")
    }

    fn regex_replace(&self, expr: &str, pattern: &str, replacement: &str) -> String {
        format!("regexp_replace({expr}, {pattern}, {replacement}, 'g')")
    }

    fn cast(&self, expr: &str, to: SqlDataType) -> String {
        let target = match to {
            SqlDataType::Text => "TEXT",
            SqlDataType::Integer => "BIGINT",
            SqlDataType::Decimal => "NUMERIC",
            SqlDataType::Boolean => "BOOLEAN",
            SqlDataType::Json => "JSONB",
        };
        format!("CAST({expr} AS {target})")
    }

    fn aggregate_function(&self, kind: AggregateKind, expr: &str) -> String {
        match kind {
            AggregateKind::Count => format!("COUNT({expr})"),
            AggregateKind::Sum => format!("SUM({expr})"),
            AggregateKind::Avg => format!("AVG({expr})"),
            AggregateKind::Min => format!("MIN({expr})"),
            AggregateKind::Max => format!("MAX({expr})"),
            AggregateKind::BoolAnd => format!("bool_and({expr})"),
        }
    }

    fn math_function(&self, function: MathFunction, expr: &str, precision: Option<&str>) -> String {
        match function {
            MathFunction::Abs => format!("abs({expr})"),
            MathFunction::Ceiling => format!("ceil({expr})"),
            MathFunction::Floor => format!("floor({expr})"),
            // round(numeric, int) has no double precision overload.
            MathFunction::Round => match precision {
                Some(precision) => format!("round(CAST({expr} AS NUMERIC), {precision})"),
                None => format!("round({expr})"),
            },
            MathFunction::Truncate => format!("trunc({expr})"),
        }
    }
}
