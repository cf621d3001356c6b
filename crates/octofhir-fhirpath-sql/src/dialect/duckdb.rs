//! DuckDB dialect over `JSON` document columns.

use super::{AggregateKind, Dialect, JsonKind, MathFunction, path_literal, rewrite_negative_indices};
use crate::ast::SqlDataType;

#[derive(Debug, Clone, Copy, Default)]
pub struct DuckDbDialect;

impl DuckDbDialect {
    /// DuckDB JSON paths index from the end with `#-n`.
    fn json_path(path: &str) -> String {
        path_literal(&rewrite_negative_indices(path, |offset| format!("[#-{offset}]")))
    }

    fn json_value(column: &str, path: &str) -> String {
        if path == "$" {
            column.to_string()
        } else {
            format!("json_extract({}, {})", column, Self::json_path(path))
        }
    }
}

impl Dialect for DuckDbDialect {
    fn name(&self) -> &'static str {
        "duckdb"
    }

    fn extract_json_field(&self, column: &str, path: &str) -> String {
        format!("json_extract_string({}, {})", column, Self::json_path(path))
    }

    fn extract_json_integer(&self, column: &str, path: &str) -> String {
        format!("CAST({} AS BIGINT)", self.extract_json_field(column, path))
    }

    fn extract_json_decimal(&self, column: &str, path: &str) -> String {
        format!("CAST({} AS DOUBLE)", self.extract_json_field(column, path))
    }

    fn extract_json_boolean(&self, column: &str, path: &str) -> String {
        format!("CAST({} AS BOOLEAN)", self.extract_json_field(column, path))
    }

    fn extract_json_object(&self, column: &str, path: &str) -> String {
        Self::json_value(column, path)
    }

    fn json_array_length(&self, column: &str, path: Option<&str>) -> String {
        match path {
            Some(path) if path != "$" => {
                format!("json_array_length({}, {})", column, Self::json_path(path))
            }
            _ => format!("json_array_length({column})"),
        }
    }

    fn json_type(&self, expr: &str) -> String {
        format!("json_type({expr})")
    }

    fn json_type_names(&self, kind: JsonKind) -> &'static [&'static str] {
        match kind {
            JsonKind::String => &["VARCHAR"],
            JsonKind::Number => &["BIGINT", "UBIGINT", "DOUBLE"],
            JsonKind::Integer => &["BIGINT", "UBIGINT"],
            JsonKind::Boolean => &["BOOLEAN"],
            JsonKind::Object => &["OBJECT"],
            JsonKind::Array => &["ARRAY"],
            JsonKind::Null => &["NULL"],
        }
    }

    fn iterate_json_array(&self, column: &str, path: &str, alias: &str) -> String {
        let value = Self::json_value(column, path);
        format!(
            "(SELECT unnest(CASE WHEN {value} IS NULL THEN []::JSON[] WHEN json_type({value}) = 'ARRAY' THEN CAST({value} AS JSON[]) ELSE [{value}] END) AS value) AS {alias}"
        )
    }

    fn json_array_agg(&self, expr: &str, filter: Option<&str>) -> String {
        match filter {
            Some(filter) => format!(
                "COALESCE(json_group_array({expr}) FILTER (WHERE {filter}), '[]'::JSON)"
            ),
            None => format!("COALESCE(json_group_array({expr}), '[]'::JSON)"),
        }
    }

    fn empty_json_array(&self) -> String {
        "'[]'::JSON".to_string()
    }

    fn regex_match(&self, expr: &str, pattern: &str) -> String {
        format!("regexp_matches({expr}, {pattern})")
    }

    fn regex_replace(&self, expr: &str, pattern: &str, replacement: &str) -> String {
        format!("regexp_replace({expr}, {pattern}, {replacement}, 'g')")
    }

    fn cast(&self, expr: &str, to: SqlDataType) -> String {
        let target = match to {
            SqlDataType::Text => "VARCHAR",
            SqlDataType::Integer => "BIGINT",
            SqlDataType::Decimal => "DOUBLE",
            SqlDataType::Boolean => "BOOLEAN",
            SqlDataType::Json => "JSON",
        };
        format!("CAST({expr} AS {target})")
    }

    fn aggregate_function(&self, kind: AggregateKind, expr: &str) -> String {
        match kind {
            AggregateKind::Count => format!("count({expr})"),
            AggregateKind::Sum => format!("sum({expr})"),
            AggregateKind::Avg => format!("avg({expr})"),
            AggregateKind::Min => format!("min({expr})"),
            AggregateKind::Max => format!("max({expr})"),
            AggregateKind::BoolAnd => format!("bool_and({expr})"),
        }
    }

    fn math_function(&self, function: MathFunction, expr: &str, precision: Option<&str>) -> String {
        match function {
            MathFunction::Abs => format!("abs({expr})"),
            MathFunction::Ceiling => format!("ceil({expr})"),
            MathFunction::Floor => format!("floor({expr})"),
            MathFunction::Round => match precision {
                Some(precision) => format!("round({expr}, {precision})"),
                None => format!("round({expr})"),
            },
            MathFunction::Truncate => format!("trunc({expr})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_text() {
        let d = DuckDbDialect;
        assert_eq!(
            d.extract_json_field("resource.resource", "$.name.family"),
            "json_extract_string(resource.resource, '$.name.family')"
        );
    }

    #[test]
    fn test_negative_index_uses_hash() {
        let d = DuckDbDialect;
        assert_eq!(
            d.extract_json_field("resource.resource", "$.name[-1].family"),
            "json_extract_string(resource.resource, '$.name[#-1].family')"
        );
    }

    #[test]
    fn test_extract_object_at_root_is_the_value() {
        assert_eq!(DuckDbDialect.extract_json_object("w_1.value", "$"), "w_1.value");
    }

    #[test]
    fn test_array_length() {
        let d = DuckDbDialect;
        assert_eq!(
            d.json_array_length("resource.resource", Some("$.name")),
            "json_array_length(resource.resource, '$.name')"
        );
        assert_eq!(d.json_array_length("w.value", None), "json_array_length(w.value)");
    }

    #[test]
    fn test_iterate_exposes_value_column() {
        let sql = DuckDbDialect.iterate_json_array("resource.resource", "$.telecom", "w_2");
        assert!(sql.starts_with("(SELECT unnest("));
        assert!(sql.ends_with("AS value) AS w_2"));
    }

    #[test]
    fn test_type_names() {
        let d = DuckDbDialect;
        assert_eq!(d.json_type_names(JsonKind::String), &["VARCHAR"]);
        assert!(d.json_type_names(JsonKind::Number).contains(&"DOUBLE"));
    }
}
