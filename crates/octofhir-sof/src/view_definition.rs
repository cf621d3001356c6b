//! ViewDefinition parsing and types.
//!
//! This module defines the data structures for parsing FHIR ViewDefinition resources
//! as specified in the SQL on FHIR Implementation Guide.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Error;

/// A ViewDefinition resource that defines a tabular view over FHIR data.
///
/// ViewDefinitions specify how to transform FHIR resources into flat,
/// tabular data suitable for SQL queries and analytics.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewDefinition {
    /// The FHIR resource type (always "ViewDefinition").
    pub resource_type: String,

    /// Canonical URL identifying this ViewDefinition.
    pub url: Option<String>,

    /// Human-readable name for the view.
    pub name: String,

    /// Publication status: draft | active | retired | unknown.
    pub status: String,

    /// The FHIR resource type this view is based on (e.g., "Patient", "Observation").
    pub resource: String,

    /// Description of the view's purpose.
    pub description: Option<String>,

    /// The columns and nested selects to include in the view.
    #[serde(default)]
    pub select: Vec<SelectColumn>,

    /// Filter conditions to apply to the view.
    /// Note: Named `where_` because `where` is a Rust reserved keyword.
    #[serde(default, rename = "where")]
    pub where_: Vec<WhereClause>,

    /// Constants that can be referenced in FHIRPath expressions.
    #[serde(default)]
    pub constant: Vec<Constant>,
}

/// A select clause that defines columns or nested structures.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectColumn {
    /// Nested select clauses.
    #[serde(default)]
    pub select: Vec<SelectColumn>,

    /// Column definitions at this level.
    pub column: Option<Vec<Column>>,

    /// FHIRPath expression for array expansion (creates one row per element).
    pub for_each: Option<String>,

    /// Like forEach, but includes a row with nulls if the array is empty.
    pub for_each_or_null: Option<String>,

    /// Union of multiple select clauses.
    pub union_all: Option<Vec<SelectColumn>>,
}

/// A column definition in a ViewDefinition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Column {
    /// The column name in the output.
    pub name: String,

    /// FHIRPath expression to extract the column value.
    pub path: String,

    /// Expected data type of the column.
    #[serde(rename = "type")]
    pub col_type: Option<String>,

    /// Whether this column can contain multiple values.
    pub collection: Option<bool>,

    /// Human-readable description of the column.
    pub description: Option<String>,
}

/// A where clause for filtering rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhereClause {
    /// FHIRPath expression that must evaluate to true for the row to be included.
    pub path: String,
}

/// A constant value that can be referenced in FHIRPath expressions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Constant {
    /// Name of the constant (referenced as %name in FHIRPath).
    pub name: String,

    /// String value of the constant.
    pub value_string: Option<String>,

    /// Code value of the constant.
    pub value_code: Option<String>,

    /// URI value of the constant.
    pub value_uri: Option<String>,

    /// Date value of the constant.
    pub value_date: Option<String>,

    /// DateTime value of the constant.
    pub value_date_time: Option<String>,

    /// Integer value of the constant.
    pub value_integer: Option<i64>,

    /// Boolean value of the constant.
    pub value_boolean: Option<bool>,

    /// Decimal value of the constant.
    pub value_decimal: Option<f64>,
}

impl ViewDefinition {
    /// Parse a ViewDefinition from a JSON Value.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is not a valid ViewDefinition.
    pub fn from_json(value: &Value) -> Result<Self, Error> {
        let view: Self = serde_json::from_value(value.clone())
            .map_err(|e| Error::InvalidViewDefinition(e.to_string()))?;
        view.validate()?;
        Ok(view)
    }

    /// Parse a ViewDefinition from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not valid JSON or not a valid ViewDefinition.
    pub fn parse(s: &str) -> Result<Self, Error> {
        let view: Self =
            serde_json::from_str(s).map_err(|e| Error::InvalidViewDefinition(e.to_string()))?;
        view.validate()?;
        Ok(view)
    }

    /// Check the structural rules serde cannot express.
    pub fn validate(&self) -> Result<(), Error> {
        if self.resource_type != "ViewDefinition" {
            return Err(Error::InvalidViewDefinition(format!(
                "expected resourceType ViewDefinition, got {}",
                self.resource_type
            )));
        }
        if self.resource.is_empty() {
            return Err(Error::InvalidViewDefinition(
                "resource must not be empty".to_string(),
            ));
        }

        let names = self.column_names();
        if names.is_empty() {
            return Err(Error::InvalidViewDefinition(
                "view defines no columns".to_string(),
            ));
        }
        for (i, name) in names.iter().enumerate() {
            if names[..i].contains(name) {
                return Err(Error::InvalidViewDefinition(format!(
                    "duplicate column name '{name}'"
                )));
            }
        }

        for constant in &self.constant {
            if constant.literal_count() != 1 {
                return Err(Error::InvalidViewDefinition(format!(
                    "constant '{}' must have exactly one value",
                    constant.name
                )));
            }
        }
        Ok(())
    }

    /// Get the list of all column names defined in this view.
    pub fn column_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        collect_column_names(&self.select, &mut names);
        names
    }
}

/// Recursively collect column names from select clauses.
fn collect_column_names(selects: &[SelectColumn], names: &mut Vec<String>) {
    for select in selects {
        if let Some(columns) = &select.column {
            for col in columns {
                names.push(col.name.clone());
            }
        }
        collect_column_names(&select.select, names);

        if let Some(union_selects) = &select.union_all {
            collect_column_names(union_selects, names);
        }
    }
}

impl Constant {
    fn literal_count(&self) -> usize {
        [
            self.value_string.is_some(),
            self.value_code.is_some(),
            self.value_uri.is_some(),
            self.value_date.is_some(),
            self.value_date_time.is_some(),
            self.value_integer.is_some(),
            self.value_boolean.is_some(),
            self.value_decimal.is_some(),
        ]
        .into_iter()
        .filter(|set| *set)
        .count()
    }

    /// Render the value as a SQL literal.
    ///
    /// Text-like values go through `quote`, which must produce a SQL string
    /// literal for the target dialect.
    pub fn sql_literal(&self, quote: impl Fn(&str) -> String) -> Option<String> {
        let text = self
            .value_string
            .as_deref()
            .or(self.value_code.as_deref())
            .or(self.value_uri.as_deref())
            .or(self.value_date.as_deref())
            .or(self.value_date_time.as_deref());
        if let Some(text) = text {
            return Some(quote(text));
        }
        if let Some(i) = self.value_integer {
            return Some(i.to_string());
        }
        if let Some(b) = self.value_boolean {
            return Some(if b { "TRUE" } else { "FALSE" }.to_string());
        }
        self.value_decimal
            .filter(|d| d.is_finite())
            .map(|d| d.to_string())
    }
}
