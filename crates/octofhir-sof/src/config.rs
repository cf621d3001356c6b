//! SQL generator configuration

use std::path::Path;

use octofhir_fhirpath_sql::{DialectKind, validate_identifier};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Placeholder replaced with the lowercase resource type in `table_pattern`.
pub const RESOURCE_PLACEHOLDER: &str = "{resource}";

/// Configuration for [`SqlGenerator`](crate::SqlGenerator)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratorConfig {
    /// Target SQL dialect
    #[serde(default)]
    pub dialect: DialectKind,

    /// Schema qualifying every resource table
    #[serde(default)]
    pub schema: Option<String>,

    /// Resource table name, `{resource}` is the lowercase resource type
    #[serde(default = "default_table_pattern")]
    pub table_pattern: String,

    /// Record identifier column
    #[serde(default = "default_id_column")]
    pub id_column: String,

    /// JSON document column
    #[serde(default = "default_json_column")]
    pub json_column: String,

    /// Deepest FHIRPath expression tree accepted for translation
    #[serde(default = "default_max_expression_depth")]
    pub max_expression_depth: usize,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            dialect: DialectKind::default(),
            schema: None,
            table_pattern: default_table_pattern(),
            id_column: default_id_column(),
            json_column: default_json_column(),
            max_expression_depth: default_max_expression_depth(),
        }
    }
}

fn default_table_pattern() -> String {
    RESOURCE_PLACEHOLDER.to_string()
}

fn default_id_column() -> String {
    "id".to_string()
}

fn default_json_column() -> String {
    "resource".to_string()
}

fn default_max_expression_depth() -> usize {
    64
}

impl GeneratorConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read a TOML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;
        Self::from_toml_str(&contents)
    }

    pub fn validate(&self) -> Result<()> {
        let identifier = |what: &str, value: &str| {
            validate_identifier(value).map_err(|e| Error::Config(format!("{what}: {e}")))
        };
        identifier("id_column", &self.id_column)?;
        identifier("json_column", &self.json_column)?;
        if let Some(schema) = &self.schema {
            identifier("schema", schema)?;
        }
        identifier("table_pattern", &self.table_name("resource"))?;
        if self.max_expression_depth == 0 {
            return Err(Error::Config(
                "max_expression_depth must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Table holding resources of one type, without schema.
    pub fn table_name(&self, resource_type: &str) -> String {
        self.table_pattern
            .replace(RESOURCE_PLACEHOLDER, &resource_type.to_lowercase())
    }

    /// Schema-qualified table holding resources of one type.
    pub fn qualified_table(&self, resource_type: &str) -> String {
        let table = self.table_name(resource_type);
        match &self.schema {
            Some(schema) => format!("{schema}.{table}"),
            None => table,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = GeneratorConfig::default();
        assert_eq!(config.dialect, DialectKind::Postgres);
        assert_eq!(config.table_pattern, "{resource}");
        assert_eq!(config.id_column, "id");
        assert_eq!(config.json_column, "resource");
        assert_eq!(config.max_expression_depth, 64);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = GeneratorConfig::from_toml_str(
            r#"
            dialect = "duckdb"
            schema = "fhir"
            table_pattern = "{resource}_resources"
            "#,
        )
        .unwrap();
        assert_eq!(config.dialect, DialectKind::DuckDb);
        assert_eq!(config.json_column, "resource");
        assert_eq!(config.qualified_table("Patient"), "fhir.patient_resources");
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        for toml in [
            r#"id_column = """#,
            r#"json_column = "data; DROP TABLE x""#,
            r#"table_pattern = "{resource}-history""#,
            "max_expression_depth = 0",
            r#"dialect = "oracle""#,
        ] {
            assert!(
                matches!(GeneratorConfig::from_toml_str(toml), Err(Error::Config(_))),
                "accepted: {toml}"
            );
        }
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "id_column = \"resource_id\"").unwrap();
        let config = GeneratorConfig::load(file.path()).unwrap();
        assert_eq!(config.id_column, "resource_id");

        assert!(matches!(
            GeneratorConfig::load(file.path().with_extension("missing")),
            Err(Error::Config(_))
        ));
    }
}
